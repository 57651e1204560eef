//! Gesture engine
//!
//! Single-threaded, frame-driven matcher. Each frame runs, in order:
//! buffer insert, cooldown expiry, ledger pruning, per-pattern tracking,
//! conflict resolution, then emission of the events that survived. Frames
//! are processed sequentially; the caller owns any threading.

use std::sync::Arc;
use tracing::{debug, info};

use crate::buffer::FrameBuffer;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{Failure, FailureReason, MatchEvent};
use crate::frame::KeyboardFrame;
use crate::ledger::{CompletionHistory, ConsumptionLedger, CooldownTable};
use crate::pattern::PatternDef;
use crate::resolver::{ConflictResolver, Submission};
use crate::tracker::{PatternState, PatternTracker};


type SubscriberFn = Arc<dyn Fn(&MatchEvent) + Send + Sync>;

pub struct Engine {
    config: EngineConfig,
    buffer: FrameBuffer,
    tracker: PatternTracker,
    resolver: ConflictResolver,
    ledger: ConsumptionLedger,
    cooldowns: CooldownTable,
    history: CompletionHistory,
    subscribers: Vec<SubscriberFn>,
    running: bool,
    /// Time of the latest frame or tick
    clock: u64,
}

impl Engine {
    /// Create a stopped engine
    pub fn new(config: EngineConfig) -> Self {
        Self {
            buffer: FrameBuffer::new(config.buffer),
            resolver: ConflictResolver::new(config.grace_ms),
            tracker: PatternTracker::new(),
            ledger: ConsumptionLedger::new(),
            cooldowns: CooldownTable::new(),
            history: CompletionHistory::new(),
            subscribers: Vec::new(),
            running: false,
            clock: 0,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn start(&mut self) {
        if !self.running {
            info!("Gesture engine started ({} pattern(s))", self.tracker.registry().len());
            self.running = true;
        }
    }

    /// Stop and drop all runtime state; registrations are kept
    pub fn stop(&mut self) {
        if self.running {
            info!("Gesture engine stopped");
        }
        self.running = false;
        self.reset();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Forget frames, attempts, pending matches, consumption, cooldowns and
    /// completion history
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.tracker.reset();
        self.resolver.reset();
        self.ledger.clear();
        self.cooldowns.clear();
        self.history.clear();
        self.clock = 0;
        debug!("Engine state reset");
    }

    /// Register or replace a pattern
    pub fn add_pattern(&mut self, def: &PatternDef) -> Result<()> {
        self.tracker.add_pattern(def, &self.config)?;
        let id = def.id.trim();
        self.resolver.discard(id);
        self.cooldowns.remove(id);
        Ok(())
    }

    pub fn remove_pattern(&mut self, id: &str) -> Result<()> {
        self.tracker.remove_pattern(id)?;
        self.resolver.discard(id);
        self.cooldowns.remove(id);
        self.ledger.release_owner(id);
        Ok(())
    }

    pub fn remove_all(&mut self) {
        self.tracker.remove_all();
        self.resolver.reset();
        self.ledger.clear();
        self.cooldowns.clear();
    }

    /// Swap the whole pattern library, e.g. on config reload
    ///
    /// Every definition is validated before anything changes.
    pub fn replace_patterns(&mut self, defs: &[PatternDef]) -> Result<()> {
        let mut staged = PatternTracker::new();
        for def in defs {
            staged.add_pattern(def, &self.config)?;
        }
        self.tracker = staged;
        self.resolver.reset();
        self.ledger.clear();
        self.cooldowns.clear();
        info!("Pattern library replaced ({} pattern(s))", defs.len());
        Ok(())
    }

    /// Apply reloaded engine settings together with a pattern library
    ///
    /// Unchanged settings only swap the library. Changed settings rebuild the
    /// buffer and resolver and drop all runtime state; subscribers and the
    /// running flag survive. Returns whether the settings changed.
    pub fn reconfigure(&mut self, config: &EngineConfig, defs: &[PatternDef]) -> Result<bool> {
        if *config == self.config {
            self.replace_patterns(defs)?;
            return Ok(false);
        }

        let mut staged = PatternTracker::new();
        for def in defs {
            staged.add_pattern(def, config)?;
        }
        self.config = config.clone();
        self.buffer = FrameBuffer::new(config.buffer);
        self.resolver = ConflictResolver::new(config.grace_ms);
        self.tracker = staged;
        self.reset();
        info!(
            "Engine reconfigured (grace {}ms, {} pattern(s))",
            config.grace_ms,
            defs.len()
        );
        Ok(true)
    }

    /// Registered ids in evaluation order
    pub fn pattern_ids(&self) -> Vec<String> {
        self.tracker.registry().ids()
    }

    pub fn pattern_state(&self, id: &str) -> Option<PatternState> {
        self.tracker.state(id, &self.cooldowns, self.clock)
    }

    /// Buffered frames, oldest first
    pub fn frames(&self) -> impl Iterator<Item = &KeyboardFrame> {
        self.buffer.frames()
    }

    /// Register a listener for every emitted event
    ///
    /// Returns the subscriber index.
    pub fn subscribe<F>(&mut self, listener: F) -> usize
    where
        F: Fn(&MatchEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(listener));
        self.subscribers.len() - 1
    }

    /// Process one frame and return the events it produced
    pub fn add_frame(&mut self, frame: KeyboardFrame) -> Result<Vec<MatchEvent>> {
        if !self.running {
            return Err(EngineError::NotRunning);
        }

        let now = frame.timestamp;
        self.buffer.add_frame(frame.clone())?;
        self.clock = now;
        self.housekeeping(now);

        if self.config.debug_trace {
            debug!(
                "Frame #{} @ {}ms pressed={:?} held={:?} released={:?}",
                frame.frame_number, now, frame.just_pressed, frame.held_keys, frame.just_released
            );
        }

        let out = self.tracker.on_frame(
            &frame,
            &self.ledger,
            &self.cooldowns,
            self.buffer.oldest_frame_number(),
            self.config.debug_trace,
        );

        let mut events = Self::failures(out.failures);
        for candidate in out.candidates {
            let id = candidate.id().to_string();
            if let Submission::Superseded(n) = self.resolver.submit(candidate, now) {
                debug!("'{}' superseded {} pending match(es)", id, n);
            }
        }
        events.extend(self.emit_ready(now));

        self.publish(&events);
        Ok(events)
    }

    /// Advance time without a frame
    ///
    /// Ages the buffer, ends cooldowns, expires attempts and flushes pending
    /// matches whose grace period ran out.
    pub fn tick(&mut self, now: u64) -> Result<Vec<MatchEvent>> {
        if !self.running {
            return Err(EngineError::NotRunning);
        }

        let now = now.max(self.clock);
        self.clock = now;
        let aged = self.buffer.tick(now);
        if aged > 0 && self.config.debug_trace {
            debug!("Tick @ {}ms aged out {} frame(s)", now, aged);
        }
        self.housekeeping(now);

        let mut events = Self::failures(self.tracker.on_tick(now));
        events.extend(self.emit_ready(now));

        self.publish(&events);
        Ok(events)
    }

    fn housekeeping(&mut self, now: u64) {
        for id in self.cooldowns.expire(now) {
            self.ledger.release_owner(&id);
        }
        match self.buffer.oldest_frame_number() {
            Some(horizon) => self.ledger.prune_before(horizon),
            None => self.ledger.clear(),
        }
    }

    fn failures(failures: Vec<Failure>) -> Vec<MatchEvent> {
        failures.into_iter().map(MatchEvent::Failed).collect()
    }

    /// Emit candidates past their grace period, best first
    fn emit_ready(&mut self, now: u64) -> Vec<MatchEvent> {
        let mut events = Vec::new();

        for candidate in self.resolver.flush(now) {
            let id = candidate.id();
            if self.cooldowns.is_cooling(id, now) {
                debug!("'{}' dropped: cooling down", id);
                continue;
            }
            let claimed = candidate.matched_keys.exclusive_events();
            if self.ledger.any_consumed(claimed.iter()) {
                debug!("'{}' dropped: input already consumed", id);
                continue;
            }

            // A blocked match still owns its input
            self.ledger.consume(id, claimed.iter());
            if let Some(rel) = self.history.violation(&candidate.pattern, candidate.end_time) {
                debug!(
                    "'{}' blocked: {:?} '{}' within {}ms",
                    id, rel.kind, rel.target, rel.window_ms
                );
                events.push(MatchEvent::Failed(Failure {
                    id: id.to_string(),
                    reason: FailureReason::WrongOrder,
                    at_time: now,
                }));
                continue;
            }

            let cooldown = candidate.pattern.cooldown_ms;
            if cooldown > 0 {
                self.cooldowns.start(id, now.saturating_add(cooldown));
            }
            self.history.record(id, candidate.end_time);

            let completion = candidate.to_completion();
            info!(
                "Gesture '{}' [{}..{}ms] confidence={}",
                completion.id, completion.start_time, completion.end_time, completion.confidence
            );
            events.push(MatchEvent::Completed(completion));
        }

        events
    }

    fn publish(&self, events: &[MatchEvent]) {
        for event in events {
            for subscriber in &self.subscribers {
                subscriber(event);
            }
        }
    }
}
