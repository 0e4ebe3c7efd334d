use std::{collections::BTreeMap, sync::Arc};

use super::{Job, JobState};

/// A service's jobs, ordered by id.
///
/// Ids start at 1 and are never handed out twice, not even after a job is pruned.
pub struct JobTable {
    next_id: u64,
    jobs: BTreeMap<u64, Arc<Job>>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self {
            next_id: 1,
            jobs: BTreeMap::new(),
        }
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a running job under the next id.
    pub fn create(&mut self) -> Arc<Job> {
        let job = Arc::new(Job::new(self.next_id));
        self.jobs.insert(self.next_id, job.clone());
        self.next_id += 1;
        job
    }

    pub fn get(&self, id: u64) -> Option<Arc<Job>> {
        self.jobs.get(&id).cloned()
    }

    /// Drops the oldest terminal jobs until at most `retention` of them remain.
    ///
    /// # Returns
    /// The amount of jobs dropped.
    pub fn prune(&mut self, retention: usize) -> usize {
        let terminal: Vec<u64> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.state().is_terminal())
            .map(|(&id, _)| id)
            .collect();

        let excess = terminal.len().saturating_sub(retention);
        for id in &terminal[..excess] {
            self.jobs.remove(id);
        }

        excess
    }

    /// Every job still running.
    pub fn running(&self) -> Vec<Arc<Job>> {
        self.jobs
            .values()
            .filter(|job| job.state() == JobState::Running)
            .cloned()
            .collect()
    }

    /// `(id, state)` of every job, in id order.
    pub fn states(&self) -> Vec<(u64, JobState)> {
        self.jobs.iter().map(|(&id, job)| (id, job.state())).collect()
    }
}
