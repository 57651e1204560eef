//! Move dispatch adapter
//!
//! Binds callbacks to pattern ids on top of the engine's event stream. The
//! dispatcher never takes part in matching: it only reacts to events the
//! engine already emitted. `ExecutionGate` rate-limits actions per pattern
//! independently of matcher cooldowns.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::engine::Engine;
use crate::events::{Completion, Failure, MatchEvent};

type CompleteFn = Arc<dyn Fn(&Completion) + Send + Sync>;
type FailFn = Arc<dyn Fn(&Failure) + Send + Sync>;

#[derive(Default)]
struct Bindings {
    on_complete: HashMap<String, Vec<CompleteFn>>,
    on_fail: HashMap<String, Vec<FailFn>>,
}

/// Routes engine events to per-pattern callbacks
#[derive(Clone, Default)]
pub struct ActionDispatcher {
    bindings: Arc<Mutex<Bindings>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` whenever `id` completes
    pub fn on_complete<F>(&self, id: &str, action: F)
    where
        F: Fn(&Completion) + Send + Sync + 'static,
    {
        self.bindings
            .lock()
            .on_complete
            .entry(id.to_string())
            .or_default()
            .push(Arc::new(action));
    }

    /// Run `action` whenever `id` fails
    pub fn on_fail<F>(&self, id: &str, action: F)
    where
        F: Fn(&Failure) + Send + Sync + 'static,
    {
        self.bindings
            .lock()
            .on_fail
            .entry(id.to_string())
            .or_default()
            .push(Arc::new(action));
    }

    /// Drop every callback bound to `id`
    pub fn unbind(&self, id: &str) {
        let mut bindings = self.bindings.lock();
        bindings.on_complete.remove(id);
        bindings.on_fail.remove(id);
    }

    /// Subscribe to an engine's event stream
    pub fn attach(&self, engine: &mut Engine) {
        let dispatcher = self.clone();
        engine.subscribe(move |event| {
            dispatcher.dispatch(event);
        });
    }

    /// Invoke the callbacks bound to the event's pattern
    ///
    /// Returns how many callbacks ran.
    pub fn dispatch(&self, event: &MatchEvent) -> usize {
        // Snapshot under the lock so callbacks may rebind freely
        match event {
            MatchEvent::Completed(c) => {
                let actions = self
                    .bindings
                    .lock()
                    .on_complete
                    .get(&c.id)
                    .cloned()
                    .unwrap_or_default();
                for action in &actions {
                    action(c);
                }
                if actions.is_empty() {
                    trace!("No action bound to '{}'", c.id);
                } else {
                    debug!("Dispatched '{}' to {} action(s)", c.id, actions.len());
                }
                actions.len()
            }
            MatchEvent::Failed(f) => {
                let actions = self
                    .bindings
                    .lock()
                    .on_fail
                    .get(&f.id)
                    .cloned()
                    .unwrap_or_default();
                for action in &actions {
                    action(f);
                }
                actions.len()
            }
        }
    }
}

/// Minimum spacing between executions of the same action
///
/// Works on event time (`end_time`), so replays behave like live input.
#[derive(Debug, Clone)]
pub struct ExecutionGate {
    min_interval_ms: u64,
    last_run: HashMap<String, u64>,
}

impl ExecutionGate {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_run: HashMap::new(),
        }
    }

    /// Record and allow an execution of `id` at `at`, unless it is too soon
    pub fn try_run(&mut self, id: &str, at: u64) -> bool {
        if let Some(&last) = self.last_run.get(id) {
            if at < last.saturating_add(self.min_interval_ms) {
                debug!(
                    "Execution of '{}' gated ({}ms since last, need {}ms)",
                    id,
                    at.saturating_sub(last),
                    self.min_interval_ms
                );
                return false;
            }
        }
        self.last_run.insert(id.to_string(), at);
        true
    }

    /// Gate a completion by its end time
    pub fn admit(&mut self, completion: &Completion) -> bool {
        self.try_run(&completion.id, completion.end_time)
    }

    pub fn last_run(&self, id: &str) -> Option<u64> {
        self.last_run.get(id).copied()
    }

    pub fn clear(&mut self) {
        self.last_run.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::{FailureReason, MatchedKeys};
    use crate::frame::KeyboardFrame;
    use crate::pattern::PatternDef;
    use crate::step::Step;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn completion(id: &str, end_time: u64) -> Completion {
        Completion {
            id: id.to_string(),
            start_time: end_time,
            end_time,
            confidence: 10,
            matched_keys: MatchedKeys::default(),
        }
    }

    #[test]
    fn test_dispatch_routes_by_id() {
        let dispatcher = ActionDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        dispatcher.on_complete("dash", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&MatchEvent::Completed(completion("dash", 10))), 1);
        assert_eq!(dispatcher.dispatch(&MatchEvent::Completed(completion("other", 10))), 0);
        let failed = MatchEvent::Failed(Failure {
            id: "dash".to_string(),
            reason: FailureReason::Timeout,
            at_time: 20,
        });
        assert_eq!(dispatcher.dispatch(&failed), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        dispatcher.unbind("dash");
        assert_eq!(dispatcher.dispatch(&MatchEvent::Completed(completion("dash", 30))), 0);
    }

    #[test]
    fn test_attach_to_engine() {
        let config = EngineConfig {
            grace_ms: 0,
            ..Default::default()
        };
        let mut engine = Engine::new(config);
        engine
            .add_pattern(&PatternDef::new("jump", vec![Step::press(["space"])]))
            .unwrap();

        let dispatcher = ActionDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        dispatcher.on_complete("jump", move |c| sink.lock().push(c.end_time));
        dispatcher.attach(&mut engine);

        engine.start();
        engine
            .add_frame(KeyboardFrame::new(1, 40).with_pressed(["space"]))
            .unwrap();
        assert_eq!(*seen.lock(), vec![40]);
    }

    #[test]
    fn test_gate_spacing() {
        let mut gate = ExecutionGate::new(300);
        assert!(gate.admit(&completion("fire", 0)));
        assert!(!gate.admit(&completion("fire", 299)));
        assert!(gate.admit(&completion("other", 100)));
        assert!(gate.admit(&completion("fire", 300)));
        assert_eq!(gate.last_run("fire"), Some(300));
    }
}
