//! Connection-related data models.
//!
//! This module defines the backend kinds, connection states and the snapshot
//! types reported by diagnostics.

use serde::{Deserialize, Serialize};

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
}

impl DatabaseType {
    /// Parse a backend kind as written in `DB_KIND`.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            _ => None,
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::PostgreSQL => 5432,
            Self::MySQL => 3306,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Lifecycle state of a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Closed => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Connected,
            _ => Self::Closed,
        }
    }
}

/// Per-connection entry in a stats snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub id: u64,
    pub connected: bool,
    pub connecting: bool,
}

/// Point-in-time view of the connection registry.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub open_connection_count: usize,
    /// Ordered by acquisition.
    pub connections: Vec<ConnectionSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_kind() {
        assert_eq!(
            DatabaseType::from_kind("postgres"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_kind(" PostgreSQL "),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(DatabaseType::from_kind("mysql"), Some(DatabaseType::MySQL));
        assert_eq!(DatabaseType::from_kind("MariaDB"), Some(DatabaseType::MySQL));
        assert_eq!(DatabaseType::from_kind("mssql"), None);
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(DatabaseType::PostgreSQL.default_port(), 5432);
        assert_eq!(DatabaseType::MySQL.default_port(), 3306);
    }

    #[test]
    fn test_connection_state_round_trips_through_u8() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_stats_serialize() {
        let stats = ConnectionStats {
            open_connection_count: 1,
            connections: vec![ConnectionSnapshot {
                id: 7,
                connected: true,
                connecting: false,
            }],
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["open_connection_count"], 1);
        assert_eq!(json["connections"][0]["id"], 7);
        assert_eq!(json["connections"][0]["connected"], true);
    }
}
