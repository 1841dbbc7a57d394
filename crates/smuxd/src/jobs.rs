//! Background job table.
//!
//! Jobs are server-spawned child processes that do not belong to any pane
//! (hooks, pipes, format callbacks). The reaper consults this table for
//! every reaped pid, and the control loop refuses to exit while any job is
//! still running.

use std::collections::HashMap;

use tracing::{debug, warn};

/// A tracked background job.
#[derive(Debug, Clone)]
pub struct Job {
    /// Pid of the job process.
    pub pid: i32,
    /// Command line the job was spawned with, for logs.
    pub command: String,
}

/// Table of running jobs keyed by pid.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<i32, Job>,
}

impl JobTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a spawned job.
    pub fn add(&mut self, pid: i32, command: impl Into<String>) {
        let command = command.into();
        debug!(pid, command = %command, "job started");
        self.jobs.insert(pid, Job { pid, command });
    }

    /// Called by the reaper for every reaped pid. Removes and returns the
    /// job if the pid belonged to one.
    pub fn check_died(&mut self, pid: i32) -> Option<Job> {
        let job = self.jobs.remove(&pid)?;
        debug!(pid, command = %job.command, "job died");
        Some(job)
    }

    /// True while any job is still running.
    pub fn still_running(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Number of running jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True if no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Sends SIGTERM to every remaining job. Final-cleanup path; the
    /// processes are not waited for.
    pub fn kill_all(&mut self) {
        for job in self.jobs.values() {
            debug!(pid = job.pid, command = %job.command, "killing job");
            let ret = unsafe { libc::kill(job.pid, libc::SIGTERM) };
            if ret != 0 {
                warn!(pid = job.pid, "failed to signal job");
            }
        }
        self.jobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_died_removes_job() {
        let mut jobs = JobTable::new();
        jobs.add(100, "run-hook");
        assert!(jobs.still_running());

        let job = jobs.check_died(100).unwrap();
        assert_eq!(job.command, "run-hook");
        assert!(!jobs.still_running());

        // Unknown pids are not jobs.
        assert!(jobs.check_died(100).is_none());
        assert!(jobs.check_died(999).is_none());
    }
}
