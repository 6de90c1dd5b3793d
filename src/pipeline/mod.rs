//! Pipeline entry points.
//!
//! - `run_pipeline`: fetch, compare, persist and announce one registry update
//! - `preview`: fetch and compare without writing anything

pub mod assemble;
pub mod diff;
pub mod run;

pub use assemble::assemble;
pub use diff::{Delta, DeltaRow, DiffCalculator, NO_UPDATE, PublishDecision, decide};
pub use run::{Collaborators, RunOutcome, check_consistency, fetch_snapshot, preview, run_pipeline};
