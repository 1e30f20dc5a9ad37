use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{Error, Result};
use crate::types::worker::{ClientWorker, Signal};
use crate::util;

/// A worker currently known to the server, as registered by its AHOY.
#[derive(Clone, Debug)]
pub struct RegisteredWorker {
    pub client: ClientWorker,
    pub started_at: String,
    pub last_heartbeat: Instant,
    pub signal: Signal,
}

/// The heartbeat map: the only mutable state shared between sessions and
/// the scheduler outside of storage. All critical sections are short map
/// operations, so a single plain mutex guards it.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, RegisteredWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> WorkerRegistry {
        WorkerRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegisteredWorker>> {
        // A panic while holding this lock leaves the map itself intact, so
        // recover the guard rather than poisoning every later session.
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a worker on AHOY, or refreshes its heartbeat if the wid is
    /// already known. The password is scrubbed before the record is kept.
    pub fn register(&self, mut client: ClientWorker) {
        client.password = None;

        let mut workers = self.lock();
        let wid = client.wid.clone();
        match workers.get_mut(&wid) {
            Some(existing) => existing.last_heartbeat = Instant::now(),
            None => {
                workers.insert(
                    wid.clone(),
                    RegisteredWorker {
                        client,
                        started_at: util::now_ts(),
                        last_heartbeat: Instant::now(),
                        signal: Signal::None,
                    },
                );
                info!(wid = %wid, "worker registered");
            },
        }
    }

    /// Refreshes the heartbeat for `wid` and returns any pending signal.
    /// The signal stays pending: a quieted worker is told so on every BEAT.
    pub fn beat(&self, wid: &str) -> Result<Signal> {
        let mut workers = self.lock();
        let worker = workers
            .get_mut(wid)
            .ok_or_else(|| Error::UnknownClient(wid.to_string()))?;
        worker.last_heartbeat = Instant::now();
        Ok(worker.signal)
    }

    /// Marks `wid` with a signal to deliver on its next BEAT. Returns false
    /// when the wid is unknown.
    pub fn set_signal(&self, wid: &str, signal: Signal) -> bool {
        match self.lock().get_mut(wid) {
            Some(worker) => {
                worker.signal = signal;
                true
            },
            None => false,
        }
    }

    /// Drops registrations silent for longer than `ttl`, returning how many
    /// were removed.
    pub fn reap_older_than(&self, ttl: Duration) -> usize {
        let mut workers = self.lock();
        let before = workers.len();
        workers.retain(|_, worker| worker.last_heartbeat.elapsed() <= ttl);
        before - workers.len()
    }

    pub fn get(&self, wid: &str) -> Option<RegisteredWorker> {
        self.lock().get(wid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(wid: &str) -> ClientWorker {
        ClientWorker {
            wid: wid.to_string(),
            hostname: None,
            pid: None,
            labels: vec![],
            password: Some("secret".to_string()),
        }
    }

    #[test]
    fn test_register_scrubs_password() {
        let registry = WorkerRegistry::new();
        registry.register(client("w1"));

        let kept = registry.get("w1").unwrap();
        assert!(kept.client.password.is_none());
        assert_eq!(kept.signal, Signal::None);
    }

    #[test]
    fn test_beat_unknown_wid_errors() {
        let registry = WorkerRegistry::new();
        assert!(matches!(
            registry.beat("ghost"),
            Err(Error::UnknownClient(w)) if w == "ghost"
        ));
    }

    #[test]
    fn test_beat_delivers_pending_signal_repeatedly() {
        let registry = WorkerRegistry::new();
        registry.register(client("w1"));

        assert_eq!(registry.beat("w1").unwrap(), Signal::None);
        assert!(registry.set_signal("w1", Signal::Quiet));
        assert_eq!(registry.beat("w1").unwrap(), Signal::Quiet);
        assert_eq!(registry.beat("w1").unwrap(), Signal::Quiet);

        assert!(!registry.set_signal("ghost", Signal::Terminate));
    }

    #[test]
    fn test_reap_drops_only_silent_workers() {
        let registry = WorkerRegistry::new();
        registry.register(client("w1"));
        registry.register(client("w2"));

        // Nothing is silent yet.
        assert_eq!(registry.reap_older_than(Duration::from_secs(60)), 0);
        assert_eq!(registry.lock().len(), 2);

        // With a zero ttl everything looks stale.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.reap_older_than(Duration::ZERO), 2);
        assert!(registry.lock().is_empty());
    }

    #[test]
    fn test_reregistering_keeps_signal() {
        let registry = WorkerRegistry::new();
        registry.register(client("w1"));
        registry.set_signal("w1", Signal::Terminate);

        // A reconnecting worker refreshes its heartbeat without clearing
        // the pending signal.
        registry.register(client("w1"));
        assert_eq!(registry.beat("w1").unwrap(), Signal::Terminate);
    }
}
