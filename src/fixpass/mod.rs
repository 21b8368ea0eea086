//! The fix-pass convergence engine: snapshots, classification, metrics,
//! the stop predicate, and the six-step cycle itself.

pub mod classify;
pub mod convergence;
pub mod engine;
pub mod metrics;
pub mod snapshot;

pub use classify::{Violation, classify, promote_for_impact};
pub use convergence::{ConvergenceDecision, StopReason, check_convergence, compute_convergence};
pub use engine::{FixApplier, FixPassResult, FixStep, run_fix_loop};
pub use metrics::{FixPassMetrics, compute_metrics};
pub use snapshot::{Regression, RegressionKind, ViolationSnapshot, detect_regressions};
