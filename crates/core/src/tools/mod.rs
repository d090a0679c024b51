//! # Verification Tools
//!
//! Deterministic probes that turn a generated artifact set into
//! structured reports. None of them fail with `Err`: problems become
//! report entries the analyzer can rank.
//!
//! ## Modules
//!
//! - `terminal` - Subprocess runner with timeouts and an environment allow-list
//! - `syntax` - Content-type detection and per-language syntax checks
//! - `imports` - Local reference resolution
//! - `linter` - Static validator (per-file and project-wide checks)
//! - `build` - Build checker (install, compile, container build)
//! - `test_runner` - Test executor (surface classification, runners, parsers)
//! - `analyzer` - Scores, ranking and next-round focus

pub mod analyzer;
pub mod build;
pub mod imports;
pub mod linter;
pub mod syntax;
pub mod terminal;
pub mod test_runner;

pub use analyzer::Analyzer;
pub use build::BuildChecker;
pub use linter::StaticValidator;
pub use test_runner::TestExecutor;
