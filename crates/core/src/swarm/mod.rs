//! # Round Orchestration
//!
//! Drives the generate → verify → analyze loop for one project.
//!
//! ## Round Flow
//!
//! ```text
//! Init → Generating → Persisting → Verifying → Analyzing → Succeeded
//!             ↑                                    │
//!             └────────────── Iterating ←──────────┤→ Failed
//!                                                  └→ Cancelled
//! ```
//!
//! A round is produced by a `GenerationStrategy`: one generator
//! (`SingleGenerator`) or a planned group of specialized ones
//! (`Coordinator`).

pub mod coordinator;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod planning;
pub mod strategy;

pub use coordinator::{
    Assignment, ConflictEvent, CoordinationState, Coordinator, CoordinatorConfig, HistoryEntry,
};
pub use events::{EngineEvent, EngineEventKind, EventLog};
pub use orchestrator::{Orchestrator, RoundObserver, RunOutcome};
pub use pipeline::{OrchestratorState, Pipeline};
pub use planning::{plan, CollaborationStrategy, ComplexityTier, Phase, Plan};
pub use strategy::{GenerationStrategy, RoundContext, SingleGenerator};
