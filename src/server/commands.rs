//! The job lifecycle engine: every post-handshake command a session can
//! issue, plus the retry-or-dead policy shared with the working reaper.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::job::{Failure, Job, Reservation};
use crate::types::protocol::FailPayload;
use crate::types::worker::Signal;
use crate::util;

use super::ServerState;

impl ServerState {
    /// PUSH: route the job to its queue, or park it in the scheduled set
    /// when its `at` time is still in the future.
    pub async fn push(&self, mut job: Job) -> Result<()> {
        if !util::valid_queue_name(&job.queue) {
            return Err(Error::BadFormat("invalid queue name"));
        }
        if job.created_at.is_none() {
            job.created_at = Some(util::now_ts());
        }

        if let Some(at) = job.at.clone().filter(|at| !at.is_empty()) {
            let when =
                util::parse_ts(&at).map_err(|_| Error::InvalidTimestamp(at.clone()))?;
            if when > Utc::now() {
                let bytes = serde_json::to_vec(&job)?;
                self.store.scheduled().add(&at, &job.jid, &bytes).await?;
                return Ok(());
            }
        }

        job.enqueued_at = Some(util::now_ts());
        let bytes = serde_json::to_vec(&job)?;
        self.store.queue(&job.queue).push(&bytes).await?;
        Ok(())
    }

    /// POP: scan the given queues in order and reserve the first available
    /// job for `wid`. Returns the serialized job, or None when every queue
    /// is empty (including when no queues were named).
    pub async fn pop(&self, wid: &str, queues: &[String]) -> Result<Option<Vec<u8>>> {
        for name in queues {
            let queue = self.store.queue(name);
            loop {
                let Some((entry_id, payload)) = queue.peek().await? else {
                    break;
                };
                let job: Job = serde_json::from_slice(&payload)?;

                // The reservation intent is written before the queue entry
                // is removed: a crash in between leaves the job visible in
                // both places (resolved as a duplicate by the reaper),
                // never in neither.
                let lease = Reservation {
                    job,
                    wid: wid.to_string(),
                    reserved_at: util::now_ts(),
                    expires_at: util::ts_after(self.opts.reservation_ttl),
                };
                let lease_bytes = serde_json::to_vec(&lease)?;
                self.store
                    .working()
                    .add(&lease.expires_at, &lease.job.jid, &lease_bytes)
                    .await?;

                // An error removing the queue entry must also withdraw the
                // reservation: the client gets an error and no job, so no
                // lease may be left behind for the reaper to fail later.
                match queue.remove(entry_id).await {
                    Ok(true) => {
                        self.processed.fetch_add(1, Ordering::Relaxed);
                        return Ok(Some(payload));
                    },
                    Ok(false) => {},
                    Err(error) => {
                        // Best-effort: a leftover lease would otherwise burn
                        // a retry for a job the client never received.
                        if let Err(rollback) = self
                            .store
                            .working()
                            .remove(&lease.expires_at, &lease.job.jid)
                            .await
                        {
                            warn!(%rollback, jid = %lease.job.jid, "failed to withdraw reservation");
                        }
                        return Err(error);
                    },
                }

                // A concurrent pop claimed this entry first; withdraw the
                // reservation and rescan the same queue.
                self.store
                    .working()
                    .remove(&lease.expires_at, &lease.job.jid)
                    .await?;
            }
        }

        Ok(None)
    }

    /// ACK: discard the reservation for `jid`. Acknowledging a jid with no
    /// reservation is success, so a worker retrying a lost ACK is safe.
    pub async fn ack(&self, jid: &str) -> Result<()> {
        self.store.working().remove_by_jid(jid).await?;
        Ok(())
    }

    /// FAIL: release the reservation and route the job to the retries or
    /// dead set according to its budget.
    pub async fn fail(&self, fail: FailPayload) -> Result<()> {
        let Some(lease_bytes) = self.store.working().remove_by_jid(&fail.jid).await? else {
            return Err(Error::UnknownJob(fail.jid));
        };
        let lease: Reservation = serde_json::from_slice(&lease_bytes)?;

        self.retry_or_kill(lease.job, fail.errtype, fail.message, fail.backtrace)
            .await
    }

    /// BEAT: refresh the worker's heartbeat, reporting any pending signal.
    pub fn beat(&self, wid: &str) -> Result<Signal> {
        self.registry.beat(wid)
    }

    /// INFO: a JSON summary of counters and structure sizes.
    pub async fn info(&self) -> Result<Vec<u8>> {
        let store = &self.store;
        let doc = json!({
            "processed": self.processed.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "working": store.working().size().await?,
            "retries": store.retries().size().await?,
            "scheduled": store.scheduled().size().await?,
            "dead": store.dead().size().await?,
            "default": store.queue("default").size().await?,
        });
        Ok(serde_json::to_vec(&doc)?)
    }

    /// STORE stats: the backend's stats map as JSON.
    pub async fn store_stats(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.store.stats().await?)?)
    }

    /// Applies the retry policy to a failed job: schedule it in the retries
    /// set with backoff while budget remains, otherwise move it to the dead
    /// set. Also used by the reaper for expired reservations.
    pub(crate) async fn retry_or_kill(
        &self,
        mut job: Job,
        errtype: Option<String>,
        message: Option<String>,
        backtrace: Vec<String>,
    ) -> Result<()> {
        let failed_at = util::now_ts();
        let prior_count = job.failure.as_ref().map(|f| f.retry_count).unwrap_or(0);

        if prior_count < job.retry {
            let retry_count = prior_count + 1;
            let next_at =
                util::ts_after(Duration::from_secs(retry_delay_secs(retry_count)));
            job.failure = Some(Failure {
                retry_count,
                failed_at,
                next_at: Some(next_at.clone()),
                message,
                errtype,
                backtrace,
            });
            let bytes = serde_json::to_vec(&job)?;
            self.store.retries().add(&next_at, &job.jid, &bytes).await?;
        } else {
            job.failure = Some(Failure {
                retry_count: prior_count,
                failed_at: failed_at.clone(),
                next_at: None,
                message,
                errtype,
                backtrace,
            });
            let bytes = serde_json::to_vec(&job)?;
            let dead = self.store.dead();
            dead.add(&failed_at, &job.jid, &bytes).await?;

            let cutoff = util::ts_before(self.opts.dead_retention);
            dead.trim(self.opts.dead_max_entries, &cutoff).await?;
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// The backoff schedule: retry number `n` becomes due
/// `15 + n^4 + jitter` seconds after the failure, where the jitter is
/// drawn uniformly from `0..30` seconds.
pub fn backoff_secs(retry_count: u32, jitter_secs: u64) -> u64 {
    15u64
        .saturating_add(u64::from(retry_count).saturating_pow(4))
        .saturating_add(jitter_secs)
}

fn retry_delay_secs(retry_count: u32) -> u64 {
    backoff_secs(retry_count, rand::thread_rng().gen_range(0..30))
}
