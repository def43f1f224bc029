//! Job definitions and the job lifecycle.

pub mod bundles;
pub mod orchestrator;
pub mod registry;

pub use bundles::BundleDirectory;
pub use orchestrator::{CallbackTarget, JobParameters, JobSource, Orchestrator, SubmitRequest};
pub use registry::{BundleRef, JobRegistry};
