//! The build pipeline: an ordered sequence of stages with strict forward
//! progress, reverse-order cleanup, and cancellation at every suspension
//! point.

pub mod cancel;
pub mod context;
pub mod retry;
pub mod runner;
pub mod state;

pub use cancel::{CancelSource, CancelToken};
pub use context::BuildContext;
pub use runner::{Pipeline, Step, StepAction};
pub use state::{BuildFailure, BuildState};
