//! Periodic maintenance: promoting due scheduled and retry entries into
//! their queues, failing expired reservations, and dropping silent
//! workers. Each task runs on its own timer so a slow tick in one never
//! stalls the others, and a failing tick is logged and retried on the next
//! interval rather than taking the server down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::server::ServerState;
use crate::storage::TimedSet;
use crate::types::job::{Job, Reservation};
use crate::util;

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub scheduled_interval: Duration,
    pub retries_interval: Duration,
    pub working_reaper_interval: Duration,
    pub heartbeat_reaper_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduled_interval: Duration::from_secs(5),
            retries_interval: Duration::from_secs(5),
            working_reaper_interval: Duration::from_secs(15),
            heartbeat_reaper_interval: Duration::from_secs(15),
        }
    }
}

pub struct SchedulerSubsystem {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerSubsystem {
    /// Spawns the four periodic tasks.
    pub(crate) fn start(state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        let cfg = state.options().scheduler.clone();

        let handles = vec![
            spawn_periodic("scheduled", cfg.scheduled_interval, cancel.clone(), {
                let state = state.clone();
                move || {
                    let state = state.clone();
                    async move { promote_due(&state, state.store().scheduled()).await }
                }
            }),
            spawn_periodic("retries", cfg.retries_interval, cancel.clone(), {
                let state = state.clone();
                move || {
                    let state = state.clone();
                    async move { promote_due(&state, state.store().retries()).await }
                }
            }),
            spawn_periodic("working", cfg.working_reaper_interval, cancel.clone(), {
                let state = state.clone();
                move || {
                    let state = state.clone();
                    async move { reap_working(&state).await }
                }
            }),
            spawn_periodic(
                "heartbeats",
                cfg.heartbeat_reaper_interval,
                cancel.clone(),
                {
                    let state = state.clone();
                    move || {
                        let state = state.clone();
                        async move { reap_heartbeats(&state) }
                    }
                },
            ),
        ];

        SchedulerSubsystem { cancel, handles }
    }

    /// Cancels the tasks and waits for any tick in progress to finish.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = timer.tick() => {
                    if let Err(error) = tick().await {
                        warn!(%error, task = name, "scheduler tick failed");
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }

        debug!(task = name, "scheduler task stopped");
    })
}

/// Moves every due entry of `set` into its target queue. Per-entry
/// failures leave the entry behind for the next tick; the enqueue happens
/// before the removal so a crash mid-promotion duplicates rather than
/// drops.
async fn promote_due(state: &ServerState, set: TimedSet) -> Result<()> {
    let now = util::now_ts();
    for entry in set.entries_before(&now).await? {
        if let Err(error) = promote_entry(state, &set, &entry.ts, &entry.jid, &entry.payload).await
        {
            warn!(%error, jid = %entry.jid, set = set.name(), "failed to promote entry");
        }
    }
    Ok(())
}

async fn promote_entry(
    state: &ServerState,
    set: &TimedSet,
    ts: &str,
    jid: &str,
    payload: &[u8],
) -> Result<()> {
    let mut job: Job = serde_json::from_slice(payload)?;
    job.enqueued_at = Some(util::now_ts());

    let bytes = serde_json::to_vec(&job)?;
    state.store().queue(&job.queue).push(&bytes).await?;
    set.remove(ts, jid).await?;

    debug!(jid = %jid, queue = %job.queue, set = set.name(), "promoted entry");
    Ok(())
}

/// Fails every reservation whose expiry has passed, feeding each through
/// the usual retry policy with a synthetic error. The retry insert happens
/// before the working entry is removed, for the same duplicate-over-drop
/// reason as promotion.
async fn reap_working(state: &ServerState) -> Result<()> {
    let now = util::now_ts();
    for entry in state.store().working().entries_before(&now).await? {
        if let Err(error) = reap_reservation(state, &entry.ts, &entry.jid, &entry.payload).await {
            warn!(%error, jid = %entry.jid, "failed to reap expired reservation");
        }
    }
    Ok(())
}

async fn reap_reservation(
    state: &ServerState,
    ts: &str,
    jid: &str,
    payload: &[u8],
) -> Result<()> {
    let lease: Reservation = serde_json::from_slice(payload)?;

    warn!(jid = %jid, wid = %lease.wid, "reservation expired");
    state
        .retry_or_kill(
            lease.job,
            Some("ReservationExpired".to_string()),
            Some(format!("reservation held by {} expired", lease.wid)),
            Vec::new(),
        )
        .await?;
    state.store().working().remove(ts, jid).await?;
    Ok(())
}

fn reap_heartbeats(state: &ServerState) -> Result<()> {
    let reaped = state.registry().reap_older_than(state.options().heartbeat_ttl);
    if reaped > 0 {
        debug!(reaped, "removed silent workers");
    }
    Ok(())
}
