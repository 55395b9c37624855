//! Coordination primitives for long-running jobs
//!
//! - Job guards that refuse overlapping runs of the same job
//! - Shutdown signalling shared by the daemon loops

pub mod guard;
pub mod shutdown;

pub use guard::{JobGuard, JobPermit};
pub use shutdown::{Shutdown, ShutdownListener};
