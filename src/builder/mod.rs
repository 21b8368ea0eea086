//! Parallel builder fan-out: service descriptors, subprocess dispatch,
//! and state-file result parsing.

pub mod result;
pub mod scheduler;
pub mod service;

pub use result::{BUILDER_STATE_FILE, BuilderResult, parse_builder_result};
pub use scheduler::{BuildRequest, BuilderInvoker, BuilderScheduler, SchedulerConfig};
pub use service::{ServiceDescriptor, ServiceStatus};
