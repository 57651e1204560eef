//! Recorded frame logs
//!
//! A frame log is JSON Lines, one `FrameRecord` per line. Blank lines and
//! lines starting with `#` are ignored.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::events::MatchEvent;
use crate::frame::{FrameRecord, KeyboardFrame};

/// Parse a frame log held in memory
pub fn parse_frame_log(contents: &str) -> Result<Vec<KeyboardFrame>> {
    let mut frames = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: FrameRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid frame record on line {}", idx + 1))?;
        frames.push(KeyboardFrame::from(record));
    }
    Ok(frames)
}

/// Read a frame log from disk
pub async fn read_frame_log(path: impl AsRef<Path>) -> Result<Vec<KeyboardFrame>> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read frame log: {}", path.display()))?;
    let frames = parse_frame_log(&contents)
        .with_context(|| format!("Failed to parse frame log: {}", path.display()))?;
    debug!("Loaded {} frame(s) from {}", frames.len(), path.display());
    Ok(frames)
}

/// Feed frames through a running engine, then flush what is still pending
///
/// The closing tick lands one grace period after the last frame so any
/// match still in its grace window is emitted.
pub fn replay<I>(engine: &mut Engine, frames: I) -> Result<Vec<MatchEvent>>
where
    I: IntoIterator<Item = KeyboardFrame>,
{
    let mut events = Vec::new();
    let mut last_ts = None;
    let mut count = 0usize;

    for frame in frames {
        let (number, ts) = (frame.frame_number, frame.timestamp);
        let out = engine
            .add_frame(frame)
            .with_context(|| format!("Frame #{} @ {}ms rejected", number, ts))?;
        events.extend(out);
        last_ts = Some(ts);
        count += 1;
    }

    if let Some(ts) = last_ts {
        let flush_at = ts.saturating_add(engine.config().grace_ms);
        events.extend(engine.tick(flush_at).context("Final flush failed")?);
    }

    info!("Replayed {} frame(s), {} event(s)", count, events.len());
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::keys::Key;
    use crate::pattern::PatternDef;
    use crate::step::Step;
    use std::fs;
    use tempfile::TempDir;

    const LOG: &str = r#"
# tap, release, tap on the right arrow
{"frameNumber": 1, "timestamp": 0, "justPressed": ["ArrowRight"], "holdDurations": {"right": 0}}
{"frameNumber": 2, "timestamp": 40, "justReleased": [39]}

{"frame_number": 3, "timestamp": 80, "just_pressed": ["right"]}
"#;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let frames = parse_frame_log(LOG).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].just_released.len(), 1);
        assert!(frames[2].just_pressed.contains(&Key::from("right")));
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = parse_frame_log("{\"frame_number\": 1, \"timestamp\": 0}\n{oops}\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_replay_flushes_pending_matches() {
        let mut engine = Engine::new(EngineConfig::default());
        engine
            .add_pattern(&PatternDef::new(
                "dash",
                vec![Step::press(["right"]), Step::release(["right"]), Step::press(["right"])],
            ))
            .unwrap();
        engine.start();

        let events = replay(&mut engine, parse_frame_log(LOG).unwrap()).unwrap();
        let done: Vec<_> = events.iter().filter_map(|e| e.as_completed()).collect();
        assert_eq!(done.len(), 1);
        assert_eq!((done[0].id.as_str(), done[0].end_time), ("dash", 80));
    }

    #[test]
    fn test_replay_stops_on_bad_order() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.start();
        let frames = vec![KeyboardFrame::new(2, 10), KeyboardFrame::new(1, 20)];
        assert!(replay(&mut engine, frames).is_err());
    }

    #[tokio::test]
    async fn test_read_frame_log_from_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("session.jsonl");
        fs::write(&path, LOG)?;

        let frames = read_frame_log(&path).await?;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].timestamp, 0);
        Ok(())
    }
}
