//! In-process reentry guard for background jobs.
//!
//! Exclusivity holds within one process only. Several instances sharing a
//! database need a lease in the shared store instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Flag owned by a single job component
#[derive(Debug, Clone)]
pub struct JobGuard {
    name: &'static str,
    running: Arc<AtomicBool>,
}

impl JobGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Claim the guard. Returns `None` while another invocation holds it.
    pub fn try_acquire(&self) -> Option<JobPermit> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{} already running, skipping invocation", self.name);
            return None;
        }

        Some(JobPermit {
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held for the duration of one invocation; released on drop
#[derive(Debug)]
pub struct JobPermit {
    running: Arc<AtomicBool>,
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let guard = JobGuard::new("test_job");
        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_permit_released_on_panic() {
        let guard = JobGuard::new("panicky");
        let cloned = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = cloned.try_acquire();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!guard.is_running());
    }
}
