/// Self-refreshing cache of Fabric group topology
///
/// A `FabricCache` owns a background task that periodically fetches the
/// group membership through a `MetadataSource` and publishes it as a
/// whole-snapshot swap. Lookups read the published snapshot and never
/// wait on the network; during an outage the cache keeps serving the
/// last good snapshot while the source retries in the background.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::fetcher::{GroupServers, MetadataSource};
use crate::types::ManagedServer;

/// Refresh interval used until the first successful fetch advertises one
pub const DEFAULT_TTL: Duration = Duration::from_millis(3000);

/// The topology cache: published snapshot plus refresh lifecycle
pub struct FabricCache {
    state: Arc<CacheState>,
    refresh_handle: Option<JoinHandle<()>>,
}

/// State shared between the refresh task and caller threads.
///
/// The snapshot lock is held only to clone a group list or swap the
/// whole map; fetches run entirely outside it. The metadata source is
/// owned by the refresh path alone.
struct CacheState {
    group_data: RwLock<GroupServers>,
    ttl: RwLock<Duration>,
    terminate: AtomicBool,
    source: Mutex<Box<dyn MetadataSource>>,
}

impl FabricCache {
    /// Create the cache and perform one synchronous refresh, so the
    /// first lookup after startup does not wait for the background loop.
    pub async fn new(source: Box<dyn MetadataSource>) -> Self {
        let state = Arc::new(CacheState {
            group_data: RwLock::new(HashMap::new()),
            ttl: RwLock::new(DEFAULT_TTL),
            terminate: AtomicBool::new(false),
            source: Mutex::new(source),
        });

        Self::refresh_cycle(&state).await;

        Self {
            state,
            refresh_handle: None,
        }
    }

    /// Launch the background refresh loop
    pub fn start(&mut self) {
        let state = Arc::clone(&self.state);
        self.refresh_handle = Some(tokio::spawn(async move {
            Self::refresh_loop(state).await;
        }));
    }

    /// Stop the refresh loop and wait for it to exit.
    ///
    /// The loop observes the termination flag once per iteration, so
    /// this may block for up to one in-flight fetch plus the current
    /// refresh interval.
    pub async fn stop(&mut self) {
        self.state.terminate.store(true, Ordering::Release);
        if let Some(handle) = self.refresh_handle.take() {
            let _ = handle.await;
        }
    }

    /// Servers of the given group, in the row order of the last fetch.
    ///
    /// An unknown group is an expected steady-state condition, not a
    /// failure: it returns an empty list and logs a warning.
    pub async fn group_lookup(&self, group_id: &str) -> Vec<ManagedServer> {
        let groups = self.state.group_data.read().await;
        match groups.get(group_id) {
            Some(servers) => servers.clone(),
            None => {
                warn!("Fabric group '{}' not available", group_id);
                Vec::new()
            }
        }
    }

    /// Currently effective refresh interval
    pub async fn refresh_interval(&self) -> Duration {
        *self.state.ttl.read().await
    }

    async fn refresh_loop(state: Arc<CacheState>) {
        while !state.terminate.load(Ordering::Acquire) {
            Self::refresh_cycle(&state).await;

            if state.terminate.load(Ordering::Acquire) {
                return;
            }
            let ttl = *state.ttl.read().await;
            sleep(ttl).await;
        }
    }

    /// One refresh cycle: connect, fetch into scratch data, swap.
    ///
    /// The published snapshot is replaced wholesale under the write
    /// lock only after a complete fetch; a failed cycle leaves the
    /// previous snapshot and interval untouched.
    async fn refresh_cycle(state: &CacheState) {
        let mut source = state.source.lock().await;

        if !source.connect().await {
            source.disconnect().await;
            return;
        }

        match source.fetch_servers().await {
            Ok(groups) => {
                let ttl = source.ttl();
                drop(source);

                *state.group_data.write().await = groups;
                *state.ttl.write().await = ttl;
            }
            Err(err) => {
                debug!("Failed fetching metadata: {}", err);
            }
        }
    }
}

impl Drop for FabricCache {
    fn drop(&mut self) {
        self.state.terminate.store(true, Ordering::Release);
        if let Some(handle) = self.refresh_handle.take() {
            handle.abort();
        }
    }
}
