//! Keymove - real-time keyboard gesture engine
//!
//! Consumes a stream of discretized keyboard frames and reports when
//! registered gestures (timed holds, combos, multi-step sequences) complete
//! or fail.
//!
//! ```text
//!   frames ─► FrameBuffer ─► PatternTracker ─► ConflictResolver ─► MatchEvent
//!                                 ▲                  │
//!                                 └─ ConsumptionLedger / CooldownTable
//! ```

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod keys;
pub mod ledger;
pub mod pattern;
pub mod replay;
pub mod resolver;
pub mod step;
pub mod tracker;

pub use config::{AppConfig, BufferConfig, EngineConfig};
pub use dispatch::{ActionDispatcher, ExecutionGate};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use events::{Completion, Failure, FailureReason, MatchEvent, MatchedKeys};
pub use frame::{FrameRecord, KeyboardFrame};
pub use keys::Key;
pub use pattern::{PatternDef, PatternKind, RelationKind, Relationship};
pub use step::{DurationConstraint, Step};
pub use tracker::{Lifecycle, PatternState};
