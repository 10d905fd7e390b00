//! In-memory job table and its retention sweep

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::errors::{Result, RunnerError};
use crate::job::{Job, JobStatus, JobSummary, JobUpdate, JobView, Principal};
use crate::storage::Workspace;

/// Job table shared by the controller, the status surface and the sweeper.
///
/// Every operation takes the lock once and never across an await, so reads
/// do not wait on running jobs.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn create(&self, job: Job) -> Result<()> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(RunnerError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("job {} already registered", job.id),
            )));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Hand a freshly built workspace to its job. The workspace comes back if
    /// the job is gone or already terminal, and the caller must remove it.
    pub fn attach_workspace(
        &self,
        id: &str,
        workspace: Workspace,
    ) -> std::result::Result<(), Workspace> {
        let mut jobs = self.lock();
        match jobs.get_mut(id) {
            Some(job) if !job.status.is_terminal() && job.workspace.is_none() => {
                job.workspace = Some(workspace);
                Ok(())
            }
            _ => Err(workspace),
        }
    }

    pub fn get(&self, id: &str) -> Option<JobView> {
        self.lock().get(id).map(Job::view)
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.lock().get(id).map(|job| job.status)
    }

    /// Status view, if `principal` may see it
    pub fn view_for(&self, id: &str, principal: &Principal) -> Result<JobView> {
        let jobs = self.lock();
        let job = jobs
            .get(id)
            .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))?;
        if !principal.can_view(job) {
            return Err(RunnerError::AccessDenied);
        }
        Ok(job.view())
    }

    /// Apply one lifecycle transition.
    ///
    /// On a terminal transition the workspace handle is taken out of the record
    /// and returned; the caller owns its removal.
    pub fn update(&self, id: &str, update: JobUpdate) -> Result<Option<Workspace>> {
        self.update_at(id, update, Utc::now())
    }

    pub fn update_at(
        &self,
        id: &str,
        update: JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Workspace>> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))?;

        let next = update.target();
        if !job.status.can_transition_to(next) {
            return Err(RunnerError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }
        job.status = next;

        match update {
            JobUpdate::Running => job.started_at = Some(now),
            JobUpdate::Exited { exit_code } => {
                job.exit_code = Some(exit_code);
                if exit_code != 0 {
                    job.error = Some(format!("Process exited with code {}", exit_code));
                }
            }
            JobUpdate::Errored { message } => job.error = Some(message),
        }

        if next.is_terminal() {
            job.completed_at = Some(now);
            return Ok(job.workspace.take());
        }
        Ok(None)
    }

    /// Jobs visible to `principal`, most recent first
    pub fn list(&self, principal: &Principal) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self
            .lock()
            .values()
            .filter(|job| principal.can_view(job))
            .map(Job::summary)
            .collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    pub fn remove(&self, id: &str) -> Option<Job> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Evict every job created strictly before `now - retention` and delete
    /// whatever workspace it still holds. Returns the number evicted.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        release_all(self.take_expired(now))
    }

    /// Remove the jobs a sweep at `now` would evict and hand them back
    /// unreleased. Only the table lock is taken; no filesystem work.
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<Job> {
        let Some(cutoff) = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return Vec::new();
        };

        let expired: Vec<Job> = {
            let mut jobs = self.lock();
            let ids: Vec<String> = jobs
                .values()
                .filter(|job| job.created_at < cutoff)
                .map(|job| job.id.clone())
                .collect();
            ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        for job in expired.iter().filter(|job| !job.status.is_terminal()) {
            warn!("Evicting job {} while still {}", job.id, job.status);
        }
        if !expired.is_empty() {
            info!("Evicted {} expired job(s)", expired.len());
        }
        expired
    }

    /// Remove every job and its workspace. Used on shutdown.
    pub fn drain(&self) -> usize {
        let jobs: Vec<Job> = self.lock().drain().map(|(_, job)| job).collect();
        release_all(jobs)
    }
}

fn release_all(jobs: Vec<Job>) -> usize {
    let count = jobs.len();
    for job in jobs {
        release(job);
    }
    count
}

fn release(mut job: Job) {
    // Stop a live pipeline before its directory disappears.
    drop(job.eviction.take());
    if let Some(workspace) = job.workspace.take() {
        let path = workspace.path().display().to_string();
        match workspace.remove() {
            Ok(()) => debug!("Removed workspace of job {}", job.id),
            Err(e) => warn!("Failed to remove workspace {}: {}", path, e),
        }
    }
}

/// Periodic sweep task owned by whoever started it
#[derive(Debug)]
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep loop. The first sweep runs one `interval` from now.
    ///
    /// Expired records are taken under the table lock; their workspaces are
    /// deleted on the blocking pool.
    pub fn start(registry: Arc<JobRegistry>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = registry.take_expired(Utc::now());
                        if expired.is_empty() {
                            continue;
                        }
                        let cleanup = tokio::task::spawn_blocking(move || release_all(expired));
                        if let Err(e) = cleanup.await {
                            warn!("Sweep cleanup panicked: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("Sweeper stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop the loop and wait for an in-progress sweep to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Sweeper ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
