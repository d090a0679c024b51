//! # Crucible Core
//!
//! Iterative generate → validate → build → test engine. A generator
//! proposes source files; the engine persists them, checks them with
//! static, build and test probes, and feeds ranked findings back until the
//! project passes or the round budget runs out.
//!
//! ## Architecture
//!
//! - `state/` - Project store on disk and the typed specification
//! - `tools/` - Probes (validator, build checker, test executor) and the analyzer
//! - `skills/` - Generator contract and specialized roles
//! - `swarm/` - Round loop, state machine, multi-generator coordination
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crucible_core::swarm::{Orchestrator, SingleGenerator};
//!
//! let store = ProjectStore::create(base, "notes")?;
//! let strategy = Box::new(SingleGenerator::new(generator));
//! let outcome = Orchestrator::new(config, store, strategy)
//!     .run(Arc::new(spec), CancellationToken::new())
//!     .await;
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;

pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use error::{ConfigError, GeneratorError, PathError, SpecError, StoreError};
pub use models::{ArtifactSet, Finding, RoundReport};
pub use state::{ProjectStore, Specification};
pub use swarm::{Orchestrator, OrchestratorState, RunOutcome};
