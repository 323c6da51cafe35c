//! In-memory job store with periodic TTL reclamation.
//!
//! Terminal jobs linger so late pollers can still fetch results, then age
//! out. Jobs still `pending` or `processing` are never reclaimed, whatever
//! their age — abandoning an in-flight pipeline is the caller's call, not
//! the store's.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::Job;

/// Time source seam so reclamation is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Concurrent map of live jobs, keyed by job id.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl JobStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::seconds(ttl.as_secs() as i64),
            clock,
        }
    }

    pub async fn put(&self, job: Arc<Job>) {
        let mut jobs = self.jobs.write().await;
        debug!(job_id = %job.id, "stored job");
        jobs.insert(job.id.clone(), job);
    }

    pub async fn get(&self, job_id: &str) -> Option<Arc<Job>> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(Arc::clone)
    }

    pub async fn remove(&self, job_id: &str) -> Option<Arc<Job>> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(job_id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// One reclamation pass: drop every terminal job whose completion
    /// timestamp is strictly older than the TTL. Returns how many were
    /// removed.
    pub async fn reclaim_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.ttl;

        let mut expired = Vec::new();
        {
            let jobs = self.jobs.read().await;
            for (job_id, job) in jobs.iter() {
                if !job.status().await.is_terminal() {
                    continue;
                }
                if let Some(completed_at) = job.completed_at().await {
                    if completed_at < cutoff {
                        expired.push(job_id.clone());
                    }
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut jobs = self.jobs.write().await;
        let mut removed = 0;
        for job_id in &expired {
            if jobs.remove(job_id).is_some() {
                removed += 1;
            }
        }
        info!(removed, "reclaimed expired jobs");
        removed
    }

    /// Run reclamation every `interval` until `shutdown` is cancelled.
    pub fn spawn_reclaimer(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("job reclaimer shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        self.reclaim_expired().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubjectRoute;
    use std::sync::Mutex;

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Utc::now()),
            })
        }

        fn advance(&self, duration: chrono::Duration) {
            let mut now = self.now.lock().unwrap();
            *now += duration;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn put_get_remove_round_trip() {
        let store = JobStore::new(Duration::from_secs(3600));
        let job = Arc::new(Job::new("s1", "question"));
        let job_id = job.id.clone();

        store.put(job).await;
        assert!(store.get(&job_id).await.is_some());
        assert!(store.get("unknown").await.is_none());

        assert!(store.remove(&job_id).await.is_some());
        assert!(store.get(&job_id).await.is_none());
    }

    #[tokio::test]
    async fn reclaims_only_terminal_jobs_past_ttl() {
        let clock = ManualClock::new();
        let store = JobStore::with_clock(Duration::from_secs(3600), clock.clone());

        let done = Arc::new(Job::new("s1", "finished"));
        done.mark_processing(SubjectRoute::Math).await;
        done.mark_complete("answer.", "answer.").await;
        let done_id = done.id.clone();

        let failed = Arc::new(Job::new("s1", "failed"));
        failed.mark_error("boom").await;
        let failed_id = failed.id.clone();

        let pending = Arc::new(Job::new("s1", "still waiting"));
        let pending_id = pending.id.clone();

        store.put(done).await;
        store.put(failed).await;
        store.put(pending).await;

        // Inside the TTL window nothing is removed.
        assert_eq!(store.reclaim_expired().await, 0);

        // Twice the TTL later, both terminal jobs age out; the pending job
        // stays regardless of age.
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(store.reclaim_expired().await, 2);
        assert!(store.get(&done_id).await.is_none());
        assert!(store.get(&failed_id).await.is_none());
        assert!(store.get(&pending_id).await.is_some());
    }

    #[tokio::test]
    async fn processing_jobs_survive_reclamation() {
        let clock = ManualClock::new();
        let store = JobStore::with_clock(Duration::from_secs(1), clock.clone());

        let job = Arc::new(Job::new("s1", "long running"));
        job.mark_processing(SubjectRoute::History).await;
        let job_id = job.id.clone();
        store.put(job).await;

        clock.advance(chrono::Duration::days(7));
        assert_eq!(store.reclaim_expired().await, 0);
        assert!(store.get(&job_id).await.is_some());
    }

    #[tokio::test]
    async fn reclaimer_task_stops_on_cancellation() {
        let store = Arc::new(JobStore::new(Duration::from_secs(3600)));
        let shutdown = CancellationToken::new();
        let handle = store
            .clone()
            .spawn_reclaimer(Duration::from_millis(10), shutdown.clone());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
