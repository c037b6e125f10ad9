//! Worker session state machine.
//!
//! A session moves through `Connecting → Ready → Draining` and back to
//! `Ready`. Every namespace handle holds one reference; a reconnect
//! (triggered by a stale-manifest lookup) waits until the count drops
//! to zero, then re-reads the manifest and swaps the connection.
//!
//! The manifest is only published after `createNamespace` completes on
//! the master, so one reload per stale lookup is enough for progress.

use crate::handle::NsHandle;
use crate::transport::Transport;
use cellar_common::{Error, Result, WorkerConfig};
use cellar_core::namespace::Manifest;
use cellar_proto::{Request, Response};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Count of outstanding server-side handles.
///
/// Decrementing below zero is a fatal invariant violation: the process
/// aborts rather than running with a corrupted count.
pub(crate) struct RefCounter {
    count: AtomicU64,
    idle: Notify,
}

impl RefCounter {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            idle: Notify::new(),
        }
    }

    fn acquire(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            error!("fatal: namespace handle refcount underflow");
            std::process::abort();
        }
        if prev == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no handles are outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // register before checking so a release between the check
            // and the await cannot be missed
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII release of one handle reference. Dropping on any exit path,
/// including panics, keeps the count balanced.
pub(crate) struct RefGuard {
    refs: Arc<RefCounter>,
}

impl RefGuard {
    pub(crate) fn acquire(refs: &Arc<RefCounter>) -> Self {
        refs.acquire();
        Self {
            refs: Arc::clone(refs),
        }
    }
}

impl Drop for RefGuard {
    fn drop(&mut self) {
        self.refs.release();
    }
}

struct Shared {
    transport: Transport,
    manifest: Manifest,
    epoch: u64,
}

/// One worker's connection to the master.
pub struct Session {
    config: WorkerConfig,
    shared: RwLock<Shared>,
    refs: Arc<RefCounter>,
    reconnect_lock: tokio::sync::Mutex<()>,
}

impl Session {
    /// Load the manifest from disk and open the transport.
    pub async fn connect(config: WorkerConfig) -> Result<Arc<Self>> {
        let manifest = Manifest::load(&config.metadata_path)?;
        let transport = Transport::connect(config.endpoint).await?;
        info!(
            endpoint = %config.endpoint,
            manifest_version = manifest.version,
            "session ready"
        );
        Ok(Arc::new(Self {
            config,
            shared: RwLock::new(Shared {
                transport,
                manifest,
                epoch: 1,
            }),
            refs: Arc::new(RefCounter::new()),
            reconnect_lock: tokio::sync::Mutex::new(()),
        }))
    }

    /// Outstanding handle count; zero at every quiescent point.
    pub fn refcount(&self) -> u64 {
        self.refs.count()
    }

    /// Take a refcounted handle on a namespace.
    ///
    /// A lookup the cached manifest cannot satisfy triggers one
    /// reconnect and one retry; a second miss surfaces as an internal
    /// error.
    pub async fn namespace_handle(self: &Arc<Self>, name: &str) -> Result<NsHandle> {
        let seen_epoch = self.shared.read().epoch;
        match self.try_handle(name) {
            Ok(handle) => Ok(handle),
            Err(Error::StaleManifest(_)) => {
                self.reconnect(seen_epoch).await?;
                self.try_handle(name).map_err(|e| match e {
                    Error::StaleManifest(ns) => {
                        error!(namespace = %ns, "namespace still unknown after manifest reload");
                        Error::internal(format!("namespace not found after reconnect: {ns}"))
                    }
                    other => other,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn try_handle(&self, name: &str) -> Result<NsHandle> {
        let shared = self.shared.read();
        if !shared.manifest.advertises(name) {
            return Err(Error::StaleManifest(name.to_string()));
        }
        let transport = shared.transport.clone();
        drop(shared);
        Ok(NsHandle::new(
            name.to_string(),
            transport,
            RefGuard::acquire(&self.refs),
        ))
    }

    /// Ask the master to create a namespace; the master publishes the
    /// updated manifest before replying.
    pub async fn create_namespace(&self, name: &str) -> Result<()> {
        let transport = self.shared.read().transport.clone();
        match transport
            .call(Request::CreateNamespace {
                name: name.to_string(),
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(Error::wire(format!(
                "unexpected response to createNamespace: {other:?}"
            ))),
        }
    }

    /// Reconnect with a fresh manifest once the session is idle.
    ///
    /// Single-flight: concurrent stale lookups queue on the lock and
    /// find the epoch already advanced when their turn comes.
    async fn reconnect(&self, seen_epoch: u64) -> Result<()> {
        let _flight = self.reconnect_lock.lock().await;
        if self.shared.read().epoch != seen_epoch {
            return Ok(());
        }

        debug!(refcount = self.refs.count(), "draining before reconnect");
        self.refs.wait_idle().await;

        let manifest = Manifest::load(&self.config.metadata_path).map_err(|e| {
            // a manifest that no longer parses leaves the worker unable
            // to address any namespace
            error!(error = %e, "fatal: manifest reload failed");
            e
        })?;
        let transport = Transport::connect(self.config.endpoint).await?;

        let mut shared = self.shared.write();
        shared.transport = transport;
        shared.manifest = manifest;
        shared.epoch += 1;
        info!(
            epoch = shared.epoch,
            manifest_version = shared.manifest.version,
            "reconnected with fresh manifest"
        );
        Ok(())
    }
}
