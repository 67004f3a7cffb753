//! Configuration handling.
//!
//! Two layers: [`ConnectionDescriptor::resolve`] turns `DB_*` variables into a
//! validated, immutable connection descriptor, and [`Config`] holds the
//! binary's own settings parsed from CLI arguments and environment variables.

use crate::db::RetryPolicy;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CANCEL_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LANGUAGE: &str = "us_english";
pub const DEFAULT_ENCRYPT: bool = false;
pub const DEFAULT_TRUST_SERVER_CERTIFICATE: bool = true;
pub const DEFAULT_USE_UTC: bool = false;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;

/// Required variables, in the order they are reported.
pub const REQUIRED_VARS: [&str; 4] = ["DB_SERVER", "DB_USER", "DB_PASSWORD", "DB_DATABASE"];

/// Day/month/year ordering used when the server parses date literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFormat {
    #[default]
    Dmy,
    Mdy,
    Ymd,
}

impl DateFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dmy" => Some(Self::Dmy),
            "mdy" => Some(Self::Mdy),
            "ymd" => Some(Self::Ymd),
            _ => None,
        }
    }

    /// Value for PostgreSQL's `DateStyle` setting.
    pub fn postgres_date_style(&self) -> &'static str {
        match self {
            Self::Dmy => "ISO,DMY",
            Self::Mdy => "ISO,MDY",
            Self::Ymd => "ISO,YMD",
        }
    }
}

/// Session locale settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleOptions {
    pub language: String,
    pub date_format: DateFormat,
    /// Pin the session time zone to UTC.
    pub use_utc: bool,
}

impl Default for LocaleOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            date_format: DateFormat::default(),
            use_utc: DEFAULT_USE_UTC,
        }
    }
}

impl LocaleOptions {
    /// MySQL `lc_messages` name for the configured language.
    pub fn mysql_lc_messages(&self) -> Option<&'static str> {
        match self.language.to_lowercase().as_str() {
            "us_english" | "english" | "en_us" => Some("en_US"),
            "british" | "en_gb" => Some("en_GB"),
            "deutsch" | "german" | "de_de" => Some("de_DE"),
            "français" | "french" | "fr_fr" => Some("fr_FR"),
            "español" | "spanish" | "es_es" => Some("es_ES"),
            _ => None,
        }
    }
}

/// Everything needed to open a connection. Built once at startup.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub db_type: DatabaseType,
    pub server: String,
    pub port: u16,
    pub user: String,
    /// Sensitive - never log
    pub password: Secret<String>,
    pub database: String,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Bound on closing a connection or abandoning an in-flight request.
    pub cancel_timeout: Duration,
    pub locale: LocaleOptions,
}

impl ConnectionDescriptor {
    /// Resolve a descriptor from an environment-like mapping.
    ///
    /// Every missing required variable and every unparseable optional one is
    /// reported in a single [`DbError::Config`].
    pub fn resolve<I, K, V>(vars: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let lookup = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<String> = REQUIRED_VARS
            .iter()
            .filter(|key| lookup(**key).is_none())
            .map(|key| key.to_string())
            .collect();
        let mut invalid: Vec<(String, String)> = Vec::new();

        let db_type = match lookup("DB_KIND") {
            None => DatabaseType::PostgreSQL,
            Some(kind) => DatabaseType::from_kind(kind).unwrap_or_else(|| {
                invalid.push((
                    "DB_KIND".to_string(),
                    format!("unknown backend '{kind}', expected postgres or mysql"),
                ));
                DatabaseType::PostgreSQL
            }),
        };

        let port = match lookup("DB_PORT") {
            None => db_type.default_port(),
            Some(raw) => raw.parse::<u16>().ok().filter(|p| *p != 0).unwrap_or_else(|| {
                invalid.push(("DB_PORT".to_string(), "not a port number".to_string()));
                db_type.default_port()
            }),
        };

        let mut flag = |key: &str, default: bool| match lookup(key) {
            None => default,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                invalid.push((key.to_string(), "expected true or false".to_string()));
                default
            }),
        };
        let encrypt = flag("DB_ENCRYPT", DEFAULT_ENCRYPT);
        let trust_server_certificate = flag("DB_TRUST_CERT", DEFAULT_TRUST_SERVER_CERTIFICATE);
        let use_utc = flag("DB_USE_UTC", DEFAULT_USE_UTC);

        let mut millis = |key: &str, default: u64| match lookup(key) {
            None => Duration::from_millis(default),
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    invalid.push((key.to_string(), "expected milliseconds > 0".to_string()));
                    Duration::from_millis(default)
                }
            },
        };
        let connect_timeout = millis("DB_CONNECTION_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_MS);
        let request_timeout = millis("DB_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_MS);
        let cancel_timeout = millis("DB_CANCEL_TIMEOUT", DEFAULT_CANCEL_TIMEOUT_MS);

        let date_format = match lookup("DB_DATE_FORMAT") {
            None => DateFormat::default(),
            Some(raw) => DateFormat::parse(raw).unwrap_or_else(|| {
                invalid.push((
                    "DB_DATE_FORMAT".to_string(),
                    "expected dmy, mdy or ymd".to_string(),
                ));
                DateFormat::default()
            }),
        };
        let language = lookup("DB_LANGUAGE")
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();

        if !missing.is_empty() || !invalid.is_empty() {
            return Err(DbError::config(missing, invalid));
        }

        let required = |key: &str| lookup(key).unwrap_or_default().to_string();
        Ok(Self {
            db_type,
            server: required("DB_SERVER"),
            port,
            user: required("DB_USER"),
            password: Secret::new(required("DB_PASSWORD")),
            database: required("DB_DATABASE"),
            encrypt,
            trust_server_certificate,
            connect_timeout,
            request_timeout,
            cancel_timeout,
            locale: LocaleOptions {
                language,
                date_format,
                use_utc,
            },
        })
    }

    /// Resolve from the process environment.
    pub fn from_env() -> DbResult<Self> {
        Self::resolve(std::env::vars())
    }

    /// Display-safe connection target (password masked).
    pub fn masked_target(&self) -> String {
        let scheme = match self.db_type {
            DatabaseType::PostgreSQL => "postgres",
            DatabaseType::MySQL => "mysql",
        };
        let password = if self.password.expose_secret().is_empty() {
            ""
        } else {
            ":****"
        };
        format!(
            "{}://{}{}@{}:{}/{}",
            scheme, self.user, password, self.server, self.port, self.database
        )
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Subcommands of the `authdb` binary.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Round-trip a trivial query and print the health report
    Health,
    /// Print a snapshot of tracked connections
    Stats,
    /// Execute a statement with named @parameters
    Query {
        sql: String,
        /// JSON object of parameters, e.g. '{"email":"a@b.c"}'
        #[arg(long)]
        params: Option<String>,
    },
    /// Call a stored procedure
    Procedure {
        name: String,
        /// JSON object of parameters, in argument order
        #[arg(long)]
        params: Option<String>,
    },
    /// Hold a connection open until SIGINT/SIGTERM, then shut down
    Run,
}

/// Settings for the `authdb` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "authdb",
    about = "Database-access core for the authentication backend",
    version
)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "AUTHDB_JSON_LOGS")]
    pub json_logs: bool,

    /// Attempts for connection acquisition
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_ATTEMPTS,
        env = "AUTHDB_CONNECT_ATTEMPTS"
    )]
    pub connect_attempts: u32,

    /// Base delay between connection attempts, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_DELAY_MS,
        env = "AUTHDB_CONNECT_RETRY_DELAY_MS"
    )]
    pub connect_retry_delay_ms: u64,

    /// Attempts for statement execution
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_ATTEMPTS,
        env = "AUTHDB_QUERY_ATTEMPTS"
    )]
    pub query_attempts: u32,

    /// Base delay between statement attempts, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_DELAY_MS,
        env = "AUTHDB_QUERY_RETRY_DELAY_MS"
    )]
    pub query_retry_delay_ms: u64,

    /// Delay between shutdown completing and process exit, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_SHUTDOWN_GRACE_MS,
        env = "AUTHDB_SHUTDOWN_GRACE_MS"
    )]
    pub shutdown_grace_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    pub fn connect_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_attempts,
            Duration::from_millis(self.connect_retry_delay_ms),
        )
    }

    pub fn query_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.query_attempts,
            Duration::from_millis(self.query_retry_delay_ms),
        )
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
