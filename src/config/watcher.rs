//! Gesture library watcher for hot-reload support
//!
//! Reloads are validated in full before they are forwarded; a broken edit
//! keeps the previous library active.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Delay before re-reading, so editors can finish writing
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Watches a config file and yields each valid new version
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, AppConfig)> {
        let (tx, rx) = mpsc::channel(4);

        let initial = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        // notify calls back on its own thread, outside the runtime
        let runtime = tokio::runtime::Handle::current();
        let path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Watch error: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            debug!("Config changed: {:?}", event.paths);

            let path = path.clone();
            let tx = tx.clone();
            runtime.spawn(async move {
                tokio::time::sleep(SETTLE_DELAY).await;
                match AppConfig::load(&path).await {
                    Ok(config) => {
                        info!("Gesture library reloaded ({} pattern(s))", config.patterns.len());
                        if tx.send(config).await.is_err() {
                            debug!("Reload dropped: receiver closed");
                        }
                    }
                    Err(e) => warn!("Reload rejected, keeping current library: {:#}", e),
                }
            });
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Watching {} for changes", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial,
        ))
    }

    /// Next accepted config, or `None` once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reload_on_edit() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("gestures.yaml");

        fs::write(
            &config_path,
            r#"
patterns:
  - id: tap
    steps:
      - kind: press
        keys: [a]
"#,
        )?;

        let (mut watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.patterns[0].id, "tap");

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &config_path,
            r#"
engine:
  grace_ms: 50
patterns:
  - id: double-tap
    steps:
      - kind: press
        keys: [a]
      - kind: release
        keys: [a]
      - kind: press
        keys: [a]
"#,
        )?;

        let reloaded = tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;
        if let Some(reloaded) = reloaded {
            assert_eq!(reloaded.engine.grace_ms, 50);
            assert_eq!(reloaded.patterns[0].id, "double-tap");
        }

        Ok(())
    }
}
