//! The server supervisor: owns storage, the worker registry, and the
//! counters; accepts connections and fans each one out to a session task;
//! coordinates graceful shutdown.

mod commands;
pub mod registry;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::scheduler::{SchedulerConfig, SchedulerSubsystem};
use crate::storage::Store;

pub use commands::backoff_secs;
pub use registry::WorkerRegistry;

#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Address to listen on.
    pub binding: String,
    /// Database location; derived from the binding when unset.
    pub storage_path: Option<PathBuf>,
    /// When set, every AHOY must carry this password.
    pub password: Option<String>,
    /// How long a popped job may be held before the reaper fails it.
    pub reservation_ttl: Duration,
    /// How long a worker may stay silent before it is deregistered.
    pub heartbeat_ttl: Duration,
    /// How long shutdown waits for in-flight sessions to finish.
    pub drain_timeout: Duration,
    /// Dead set retention.
    pub dead_max_entries: u64,
    pub dead_retention: Duration,
    pub scheduler: SchedulerConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            binding: "localhost:7419".to_string(),
            storage_path: None,
            password: None,
            reservation_ttl: Duration::from_secs(1800),
            heartbeat_ttl: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(10),
            dead_max_entries: 1000,
            dead_retention: Duration::from_secs(180 * 24 * 60 * 60),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServerOptions {
    /// The configured storage path, or `<binding>.db` with the colon made
    /// filesystem-safe.
    pub fn storage_path_or_default(&self) -> PathBuf {
        self.storage_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.db", self.binding.replace(':', "_"))))
    }
}

/// Everything sessions and the scheduler share: the storage facade, the
/// worker registry, and the server counters.
pub struct ServerState {
    pub(crate) opts: ServerOptions,
    pub(crate) store: Store,
    pub(crate) registry: WorkerRegistry,
    pub(crate) processed: AtomicU64,
    pub(crate) failures: AtomicU64,
}

impl ServerState {
    pub fn options(&self) -> &ServerOptions {
        &self.opts
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

type StartHook = Box<dyn Fn(&ServerState) + Send + Sync>;

/// A server that has not yet opened storage or bound its listener.
pub struct Server {
    opts: ServerOptions,
    hooks: Vec<StartHook>,
}

impl Server {
    pub fn new(opts: ServerOptions) -> Server {
        Server {
            opts,
            hooks: Vec::new(),
        }
    }

    /// Registers a callback invoked once storage and the scheduler are up,
    /// before the accept loop starts.
    pub fn on_start(&mut self, hook: impl Fn(&ServerState) + Send + Sync + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Opens storage and binds the listener. Serving starts when
    /// [`BoundServer::serve`] is called.
    pub async fn bind(self) -> Result<BoundServer> {
        let store = Store::open(self.opts.storage_path_or_default()).await?;
        let listener = TcpListener::bind(&self.opts.binding).await?;

        let state = Arc::new(ServerState {
            opts: self.opts,
            store,
            registry: WorkerRegistry::new(),
            processed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });

        Ok(BoundServer {
            state,
            listener,
            hooks: self.hooks,
        })
    }
}

/// A server with open storage and a bound listener, ready to serve.
pub struct BoundServer {
    state: Arc<ServerState>,
    listener: TcpListener,
    hooks: Vec<StartHook>,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The shared state, usable by start hooks' peers: administrative
    /// surfaces signal workers through `state().registry()`.
    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Runs the accept loop until `cancel` fires, then shuts down in
    /// order: stop accepting, stop the scheduler, drain sessions, close
    /// storage.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let BoundServer {
            state,
            listener,
            hooks,
        } = self;

        let scheduler = SchedulerSubsystem::start(state.clone(), cancel.child_token());

        for hook in &hooks {
            hook(&state);
        }

        info!(addr = %listener.local_addr()?, "listening");

        // Every session task holds a clone of this sender; once the accept
        // loop exits and all sessions finish, recv() observes the channel
        // closing.
        let (session_hold, mut session_wait) = mpsc::channel::<()>(1);

        loop {
            let conn = match select! {
                accept = listener.accept() => accept,
                _ = cancel.cancelled() => break,
            } {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "failed to accept connection");
                    continue;
                },
            };

            let (stream, peer) = conn;
            tokio::spawn(session::begin(
                state.clone(),
                cancel.clone(),
                session_hold.clone(),
                stream,
                peer,
            ));
        }

        // No new connections from here on.
        drop(listener);

        scheduler.stop().await;

        drop(session_hold);
        if tokio::time::timeout(state.opts.drain_timeout, session_wait.recv())
            .await
            .is_err()
        {
            warn!("sessions still pending after drain timeout");
        }

        state.store.close().await;
        info!("server stopped");
        Ok(())
    }
}
