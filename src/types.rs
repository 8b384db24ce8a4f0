/// Record types for servers and shards managed by MySQL Fabric
use std::fmt;

use crate::protocol::{lenient_f32, lenient_i64};

/// Operating mode of a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Offline,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Status of a managed server within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Faulty,
    Spare,
    Secondary,
    Primary,
    Configuring,
}

impl ServerMode {
    /// Map the numeric code used by the dump protocol.
    ///
    /// Unknown codes degrade to `Offline` (code 0), the same value a
    /// malformed field decodes to.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ServerMode::ReadOnly,
            2 => ServerMode::WriteOnly,
            3 => ServerMode::ReadWrite,
            _ => ServerMode::Offline,
        }
    }
}

impl ServerStatus {
    /// Map the numeric code used by the dump protocol; unknown codes
    /// degrade to `Faulty` (code 0).
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ServerStatus::Spare,
            2 => ServerStatus::Secondary,
            3 => ServerStatus::Primary,
            4 => ServerStatus::Configuring,
            _ => ServerStatus::Faulty,
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Offline => write!(f, "offline"),
            ServerMode::ReadOnly => write!(f, "read-only"),
            ServerMode::WriteOnly => write!(f, "write-only"),
            ServerMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Faulty => write!(f, "faulty"),
            ServerStatus::Spare => write!(f, "spare"),
            ServerStatus::Secondary => write!(f, "secondary"),
            ServerStatus::Primary => write!(f, "primary"),
            ServerStatus::Configuring => write!(f, "configuring"),
        }
    }
}

/// A server managed by MySQL Fabric, as reported by `dump.servers`.
///
/// Immutable once decoded from a fetch; copied into and out of the
/// published snapshot as a value.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedServer {
    /// UUID of the server registered with Fabric
    pub server_uuid: String,
    /// ID of the group the server belongs to
    pub group_id: String,
    /// Host the server is running on
    pub host: String,
    /// Port the server is listening on
    pub port: u16,
    /// Operating mode of the server
    pub mode: ServerMode,
    /// Status of the server
    pub status: ServerStatus,
    /// Routing weight of the server
    pub weight: f32,
}

impl ManagedServer {
    /// Decode one `dump.servers` row.
    ///
    /// Column order is fixed: uuid, group_id, host, port, mode,
    /// status, weight. Numeric fields use permissive conversion; a
    /// malformed or out-of-range value decodes to zero rather than
    /// failing the row. Missing trailing columns decode as empty.
    pub fn from_row(row: &[String]) -> Self {
        let field = |index: usize| row.get(index).map(String::as_str).unwrap_or("");
        ManagedServer {
            server_uuid: field(0).to_string(),
            group_id: field(1).to_string(),
            host: field(2).to_string(),
            port: u16::try_from(lenient_i64(field(3))).unwrap_or(0),
            mode: ServerMode::from_code(lenient_i64(field(4))),
            status: ServerStatus::from_code(lenient_i64(field(5))),
            weight: lenient_f32(field(6)),
        }
    }
}

impl fmt::Display for ManagedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}, {}, {})",
            self.server_uuid, self.host, self.port, self.mode, self.status
        )
    }
}

/// A shard definition reported by `dump.sharding_information`
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedShard {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub lower_bound: String,
    pub shard_id: i64,
    pub type_name: String,
    pub group_id: String,
    pub global_group: String,
}

impl ManagedShard {
    /// Decode one `dump.sharding_information` row (fixed column order)
    pub fn from_row(row: &[String]) -> Self {
        let field = |index: usize| row.get(index).map(String::as_str).unwrap_or("");
        ManagedShard {
            schema_name: field(0).to_string(),
            table_name: field(1).to_string(),
            column_name: field(2).to_string(),
            lower_bound: field(3).to_string(),
            shard_id: lenient_i64(field(4)),
            type_name: field(5).to_string(),
            group_id: field(6).to_string(),
            global_group: field(7).to_string(),
        }
    }

    /// Fully qualified table name the shard map is keyed by
    pub fn qualified_table_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}
