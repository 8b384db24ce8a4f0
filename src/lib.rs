/// fabrica - self-refreshing topology cache for MySQL Fabric managed clusters
///
/// fabrica keeps an in-memory, read-consistent snapshot of the server
/// membership per high-availability group, fetched from a Fabric
/// metadata server over its dump procedures. Lookups used for request
/// routing always answer from the snapshot; a background task refreshes
/// it on the interval the service advertises and survives arbitrarily
/// long metadata-server outages by serving stale-but-valid data.
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod fetcher;
pub mod protocol;
pub mod types;

use lazy_static::lazy_static;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::FabricCache;
use crate::config::FabricSettings;
use crate::error::{FabricaError, FabricaResult};
use crate::fetcher::MetadataFetcher;
use crate::types::ManagedServer;

lazy_static! {
    /// Process-global registry of named cache instances
    static ref CACHES: Mutex<HashMap<String, FabricCache>> = Mutex::new(HashMap::new());
}

/// Result of a group lookup in a named cache
#[derive(Debug, Clone)]
pub struct LookupResult {
    /// Servers of the group, in the row order of the last fetch
    pub server_list: Vec<ManagedServer>,
}

/// Create and start a named cache instance.
///
/// Connects to the Fabric metadata server with the given resolved
/// credentials (credential prompting and storage are the host's
/// concern), performs the initial refresh and launches the background
/// loop. Fails when a cache with that name already exists.
pub async fn cache_init(
    cache_name: &str,
    host: &str,
    port: u16,
    user: &str,
    password: &str,
) -> FabricaResult<()> {
    {
        let caches = CACHES.lock().await;
        if caches.contains_key(cache_name) {
            return Err(FabricaError::CacheExists(cache_name.to_string()));
        }
    }

    let port = if port == 0 {
        config::DEFAULT_FABRIC_PORT
    } else {
        port
    };
    let settings = FabricSettings {
        host: host.to_string(),
        port,
        user: user.to_string(),
        password: password.to_string(),
        ..Default::default()
    };

    info!(
        "Starting Fabric cache '{}' using metadata server on {}:{}",
        cache_name, host, port
    );

    // The initial refresh blocks through the connect retry loop while
    // the metadata server is down; it must run with the registry
    // unlocked so lookups against other caches stay responsive.
    let fetcher = MetadataFetcher::new(&settings);
    let mut cache = FabricCache::new(Box::new(fetcher)).await;
    cache.start();

    let mut caches = CACHES.lock().await;
    if caches.contains_key(cache_name) {
        drop(caches);
        cache.stop().await;
        return Err(FabricaError::CacheExists(cache_name.to_string()));
    }
    caches.insert(cache_name.to_string(), cache);
    Ok(())
}

/// Whether a cache with the given name was initialized
pub async fn have_cache(cache_name: &str) -> bool {
    CACHES.lock().await.contains_key(cache_name)
}

/// Current membership of a group in a named cache.
///
/// An unknown group yields an empty list; only an unknown cache name
/// is an error.
pub async fn lookup_group(cache_name: &str, group_id: &str) -> FabricaResult<LookupResult> {
    let caches = CACHES.lock().await;
    let cache = caches
        .get(cache_name)
        .ok_or_else(|| FabricaError::UnknownCache(cache_name.to_string()))?;
    Ok(LookupResult {
        server_list: cache.group_lookup(group_id).await,
    })
}

/// Stop and release a named cache instance
pub async fn cache_stop(cache_name: &str) -> FabricaResult<()> {
    let mut cache = {
        let mut caches = CACHES.lock().await;
        caches
            .remove(cache_name)
            .ok_or_else(|| FabricaError::UnknownCache(cache_name.to_string()))?
    };
    cache.stop().await;
    info!("Stopped Fabric cache '{}'", cache_name);
    Ok(())
}
