/// Metadata fetching against the Fabric dump procedures
///
/// The fetcher issues named stored procedure calls over the managed
/// connection and decodes the fixed two-result-set responses into typed
/// records. The first result set always carries the service instance
/// identity and the advertised refresh interval; the second carries the
/// dump rows.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::FabricSettings;
use crate::connection::ConnectionManager;
use crate::error::MetadataError;
use crate::protocol::{lenient_i64, ResultSet};
use crate::types::{ManagedServer, ManagedShard};

/// Group ID to ordered server list, as decoded from one fetch
pub type GroupServers = HashMap<String, Vec<ManagedServer>>;

/// `schema.table` to shard list, as decoded from one fetch
pub type ShardMap = HashMap<String, Vec<ManagedShard>>;

/// Seam between the topology cache and the metadata service.
///
/// The cache only depends on this trait, so tests drive refresh cycles
/// with a fake source and no network.
#[async_trait]
pub trait MetadataSource: Send {
    /// Ensure the connection is established; blocks through the retry
    /// loop. Returns false only when the source cannot come up at all.
    async fn connect(&mut self) -> bool;

    /// Release the connection so the next cycle starts clean
    async fn disconnect(&mut self);

    /// Fetch the current group membership
    async fn fetch_servers(&mut self) -> Result<GroupServers, MetadataError>;

    /// Refresh interval advertised by the most recent successful fetch
    fn ttl(&self) -> Duration;
}

/// Fetches and decodes metadata from the Fabric server
pub struct MetadataFetcher {
    connection: ConnectionManager,
    ttl_sec: u64,
    instance_uuid: String,
    message: String,
}

impl MetadataFetcher {
    pub fn new(settings: &FabricSettings) -> Self {
        Self {
            connection: ConnectionManager::new(settings),
            ttl_sec: 0,
            instance_uuid: String::new(),
            message: String::new(),
        }
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            ttl_sec: 0,
            instance_uuid: String::new(),
            message: String::new(),
        }
    }

    /// Invoke a dump procedure and return its data result set.
    ///
    /// The first result set must hold one row with the instance UUID,
    /// the refresh interval in seconds and a status message; it is
    /// recorded here. The second result set is returned to the caller
    /// for row-by-row decoding; its absence is a metadata error.
    pub async fn fetch(&mut self, procedure: &str) -> Result<ResultSet, MetadataError> {
        self.connection.connect().await;

        let mut response = self.connection.call(procedure).await?;
        if response.result_sets.is_empty() {
            return Err(MetadataError::MissingInstanceRow {
                procedure: procedure.to_string(),
            });
        }

        let header = response.result_sets.remove(0);
        let Some(row) = header.rows.first().filter(|row| row.len() >= 3) else {
            return Err(MetadataError::MissingInstanceRow {
                procedure: procedure.to_string(),
            });
        };
        self.instance_uuid = row[0].clone();
        self.ttl_sec = lenient_i64(&row[1]).max(0) as u64;
        self.message = row[2].clone();

        if response.result_sets.is_empty() {
            return Err(MetadataError::MissingResultSet {
                procedure: procedure.to_string(),
            });
        }
        Ok(response.result_sets.remove(0))
    }

    /// Fetch shard definitions, keyed by fully qualified table name
    pub async fn fetch_shards(&mut self) -> Result<ShardMap, MetadataError> {
        let result = self.fetch("dump.sharding_information").await?;

        let mut shard_map: ShardMap = HashMap::new();
        for row in &result.rows {
            let shard = ManagedShard::from_row(row);
            shard_map
                .entry(shard.qualified_table_name())
                .or_default()
                .push(shard);
        }
        Ok(shard_map)
    }

    /// Refresh interval recorded by the most recent successful fetch,
    /// in whole seconds
    pub fn fetch_ttl(&self) -> u64 {
        self.ttl_sec
    }

    /// UUID of the Fabric instance that answered the last fetch
    pub fn instance_uuid(&self) -> &str {
        &self.instance_uuid
    }

    /// Free-text status message from the last fetch
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
impl MetadataSource for MetadataFetcher {
    async fn connect(&mut self) -> bool {
        self.connection.connect().await;
        true
    }

    async fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    async fn fetch_servers(&mut self) -> Result<GroupServers, MetadataError> {
        let result = self.fetch("dump.servers").await?;

        let mut server_map: GroupServers = HashMap::new();
        for row in &result.rows {
            let server = ManagedServer::from_row(row);
            server_map
                .entry(server.group_id.clone())
                .or_default()
                .push(server);
        }
        Ok(server_map)
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_server;
    use crate::types::{ServerMode, ServerStatus};
    use tokio_test::assert_ok;

    const SERVERS_RESPONSE: &str = "*1\nuuid-1\t5\tok\n\
        *2\n\
        s1\tg1\t10.0.0.1\t3306\t3\t3\t2.5\n\
        s2\tg1\t10.0.0.2\t3306\t1\t2\t1.0\n\
        .\n";

    const SHARDS_RESPONSE: &str = "*1\nuuid-1\t7\tok\n\
        *2\n\
        shop\torders\torder_id\t0\t1\tRANGE\tg1\tg-global\n\
        shop\torders\torder_id\t1000\t2\tRANGE\tg2\tg-global\n\
        .\n";

    async fn fetcher_for(server: &test_server::FakeFabric) -> MetadataFetcher {
        MetadataFetcher::new(&server.settings())
    }

    #[tokio::test]
    async fn test_fetch_servers_grouped_in_row_order() {
        let server = test_server::spawn(SERVERS_RESPONSE).await;
        let mut fetcher = fetcher_for(&server).await;

        let groups = fetcher.fetch_servers().await.unwrap();
        assert_eq!(groups.len(), 1);

        let g1 = &groups["g1"];
        assert_eq!(g1.len(), 2);
        assert_eq!(g1[0].server_uuid, "s1");
        assert_eq!(g1[0].host, "10.0.0.1");
        assert_eq!(g1[0].port, 3306);
        assert_eq!(g1[0].mode, ServerMode::ReadWrite);
        assert_eq!(g1[0].status, ServerStatus::Primary);
        assert_eq!(g1[0].weight, 2.5);
        assert_eq!(g1[1].server_uuid, "s2");
        assert_eq!(g1[1].mode, ServerMode::ReadOnly);
        assert_eq!(g1[1].status, ServerStatus::Secondary);
    }

    #[tokio::test]
    async fn test_fetch_records_instance_row() {
        let server = test_server::spawn(SERVERS_RESPONSE).await;
        let mut fetcher = fetcher_for(&server).await;

        assert_eq!(fetcher.fetch_ttl(), 0);
        fetcher.fetch_servers().await.unwrap();

        assert_eq!(fetcher.fetch_ttl(), 5);
        assert_eq!(fetcher.ttl(), Duration::from_secs(5));
        assert_eq!(fetcher.instance_uuid(), "uuid-1");
        assert_eq!(fetcher.message(), "ok");
    }

    #[tokio::test]
    async fn test_fetch_shards_keyed_by_qualified_table() {
        let server = test_server::spawn(SHARDS_RESPONSE).await;
        let mut fetcher = fetcher_for(&server).await;

        let shards = fetcher.fetch_shards().await.unwrap();
        assert_eq!(shards.len(), 1);

        let orders = &shards["shop.orders"];
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].shard_id, 1);
        assert_eq!(orders[1].lower_bound, "1000");
        assert_eq!(orders[1].group_id, "g2");
        assert_eq!(fetcher.fetch_ttl(), 7);
    }

    #[tokio::test]
    async fn test_missing_second_result_set() {
        let server = test_server::spawn("*1\nuuid-1\t5\tok\n.\n").await;
        let mut fetcher = fetcher_for(&server).await;

        let err = fetcher.fetch_servers().await.unwrap_err();
        assert!(matches!(err, MetadataError::MissingResultSet { .. }));
        // the instance row was still present and recorded
        assert_eq!(fetcher.fetch_ttl(), 5);
    }

    #[tokio::test]
    async fn test_missing_instance_row() {
        let server = test_server::spawn("*0\n*1\ns1\tg1\th\t1\t0\t0\t0\n.\n").await;
        let mut fetcher = fetcher_for(&server).await;

        let err = fetcher.fetch_servers().await.unwrap_err();
        assert!(matches!(err, MetadataError::MissingInstanceRow { .. }));
    }

    #[tokio::test]
    async fn test_server_side_failure() {
        let server = test_server::spawn("-ERR dump.servers is not defined\n").await;
        let mut fetcher = fetcher_for(&server).await;

        let err = fetcher.fetch_servers().await.unwrap_err();
        assert!(matches!(err, MetadataError::CallFailed { .. }));
    }

    #[tokio::test]
    async fn test_malformed_numeric_fields_degrade_to_zero() {
        let server = test_server::spawn(
            "*1\nuuid-1\t5\tok\n*1\ns1\tg1\tdb1\tport?\tmode?\tstatus?\tweight?\n.\n",
        )
        .await;
        let mut fetcher = fetcher_for(&server).await;

        let groups = fetcher.fetch_servers().await.unwrap();
        let server = &groups["g1"][0];
        assert_eq!(server.port, 0);
        assert_eq!(server.mode, ServerMode::Offline);
        assert_eq!(server.status, ServerStatus::Faulty);
        assert_eq!(server.weight, 0.0);
    }

    #[tokio::test]
    async fn test_empty_dump_yields_empty_map() {
        let server = test_server::spawn("*1\nuuid-1\t5\tok\n*0\n.\n").await;
        let mut fetcher = fetcher_for(&server).await;

        let groups = assert_ok!(fetcher.fetch_servers().await);
        assert!(groups.is_empty());
    }
}
