//! sqlx-backed driver.
//!
//! Each [`SqlxSession`] owns exactly one dedicated `PgConnection` or
//! `MySqlConnection`; there is no pool underneath. Transaction control is
//! issued as plain `BEGIN` / `COMMIT` / `ROLLBACK` on that connection.

use crate::config::ConnectionDescriptor;
use crate::db::driver::{BoundStatement, Dialect, Driver, Session, SessionOutput};
use crate::db::params::{bind_mysql_param, bind_postgres_param};
use crate::db::types::RowDecode;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::DatabaseType;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection as _, Either, Executor, MySqlConnection, PgConnection};
use tracing::{debug, warn};

/// A single live backend connection.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

/// Opens dedicated connections with sqlx.
#[derive(Debug, Clone, Copy)]
pub struct SqlxDriver {
    db_type: DatabaseType,
}

impl SqlxDriver {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }

    fn postgres_options(descriptor: &ConnectionDescriptor) -> PgConnectOptions {
        let ssl_mode = match (descriptor.encrypt, descriptor.trust_server_certificate) {
            (false, _) => PgSslMode::Disable,
            (true, true) => PgSslMode::Require,
            (true, false) => PgSslMode::VerifyFull,
        };
        let mut settings = vec![(
            "DateStyle",
            descriptor.locale.date_format.postgres_date_style(),
        )];
        if descriptor.locale.use_utc {
            settings.push(("TimeZone", "UTC"));
        }
        PgConnectOptions::new()
            .host(&descriptor.server)
            .port(descriptor.port)
            .username(&descriptor.user)
            .password(descriptor.password.expose_secret())
            .database(&descriptor.database)
            .ssl_mode(ssl_mode)
            .options(settings)
    }

    fn mysql_options(descriptor: &ConnectionDescriptor) -> MySqlConnectOptions {
        let ssl_mode = match (descriptor.encrypt, descriptor.trust_server_certificate) {
            (false, _) => MySqlSslMode::Disabled,
            (true, true) => MySqlSslMode::Required,
            (true, false) => MySqlSslMode::VerifyIdentity,
        };
        let options = MySqlConnectOptions::new()
            .host(&descriptor.server)
            .port(descriptor.port)
            .username(&descriptor.user)
            .password(descriptor.password.expose_secret())
            .database(&descriptor.database)
            .ssl_mode(ssl_mode)
            .charset("utf8mb4");
        if descriptor.locale.use_utc {
            options.timezone(Some("+00:00".to_string()))
        } else {
            options
        }
    }

    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<DbConnection, sqlx::Error> {
        match self.db_type {
            DatabaseType::PostgreSQL => {
                let options = Self::postgres_options(descriptor);
                Ok(DbConnection::Postgres(
                    PgConnection::connect_with(&options).await?,
                ))
            }
            DatabaseType::MySQL => {
                let options = Self::mysql_options(descriptor);
                let mut conn = MySqlConnection::connect_with(&options).await?;
                if let Some(lc) = descriptor.locale.mysql_lc_messages() {
                    let set = format!("SET lc_messages = '{lc}'");
                    if let Err(e) = (&mut conn).execute(set.as_str()).await {
                        warn!(
                            error = %e,
                            language = %descriptor.locale.language,
                            "Failed to set session language"
                        );
                    }
                }
                Ok(DbConnection::MySql(conn))
            }
        }
    }
}

#[async_trait]
impl Driver for SqlxDriver {
    fn dialect(&self) -> Dialect {
        self.db_type.into()
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> DbResult<Box<dyn Session>> {
        let conn = self.open(descriptor).await.map_err(|e| {
            DbError::connection(
                format!("Failed to connect: {}", e),
                connection_suggestion(self.db_type, &e),
            )
        })?;
        debug!(server = %descriptor.masked_target(), "Opened backend connection");
        Ok(Box::new(SqlxSession {
            conn,
            in_transaction: false,
        }))
    }
}

/// Generate a helpful suggestion for connection errors.
pub(crate) fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify DB_USER and DB_PASSWORD".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that DB_DATABASE names an existing database".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check DB_ENCRYPT / DB_TRUST_CERT or the server certificate".to_string();
    }

    format!(
        "Verify DB_SERVER and DB_PORT (default {} port is {})",
        db_type,
        db_type.default_port()
    )
}

pub struct SqlxSession {
    conn: DbConnection,
    in_transaction: bool,
}

impl SqlxSession {
    async fn run_control(&mut self, sql: &'static str) -> DbResult<()> {
        impl_db_dispatch!(&mut self.conn, {
            MySql(c) => c.execute(sql).await.map(|_| ())?,
            Postgres(c) => c.execute(sql).await.map(|_| ())?,
        });
        Ok(())
    }
}

#[async_trait]
impl Session for SqlxSession {
    async fn execute(&mut self, statement: &BoundStatement) -> DbResult<SessionOutput> {
        let mut output = SessionOutput::default();
        impl_db_dispatch!(&mut self.conn, {
            MySql(c) => {
                let mut query = sqlx::query(&statement.sql);
                for param in &statement.params {
                    query = bind_mysql_param(query, &param.value);
                }
                let mut stream = c.fetch_many(query);
                while let Some(item) = stream.try_next().await? {
                    match item {
                        Either::Left(done) => output.rows_affected += done.rows_affected(),
                        Either::Right(row) => output.rows.push(row.to_result_row()),
                    }
                }
            },
            Postgres(c) => {
                let mut query = sqlx::query(&statement.sql);
                for param in &statement.params {
                    query = bind_postgres_param(query, &param.value);
                }
                let mut stream = c.fetch_many(query);
                while let Some(item) = stream.try_next().await? {
                    match item {
                        Either::Left(done) => output.rows_affected += done.rows_affected(),
                        Either::Right(row) => output.rows.push(row.to_result_row()),
                    }
                }
            },
        });
        Ok(output)
    }

    async fn begin(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::transaction("Transaction already in progress", ""));
        }
        self.run_control("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::transaction("No transaction in progress", ""));
        }
        // The server ends the transaction even when COMMIT fails.
        self.in_transaction = false;
        self.run_control("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::transaction("No transaction in progress", ""));
        }
        self.in_transaction = false;
        self.run_control("ROLLBACK").await
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        impl_db_dispatch!(self.conn, {
            MySql(c) => c.close().await?,
            Postgres(c) => c.close().await?,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(extra: &[(&str, &str)]) -> ConnectionDescriptor {
        let mut vars = vec![
            ("DB_SERVER", "db.internal"),
            ("DB_USER", "auth"),
            ("DB_PASSWORD", "s3cret"),
            ("DB_DATABASE", "authdb"),
        ];
        vars.extend_from_slice(extra);
        ConnectionDescriptor::resolve(vars).unwrap()
    }

    #[test]
    fn test_postgres_options_follow_descriptor() {
        let options = SqlxDriver::postgres_options(&descriptor(&[("DB_PORT", "6543")]));
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "auth");
        assert_eq!(options.get_database(), Some("authdb"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Disable));
    }

    #[test]
    fn test_postgres_ssl_mode_mapping() {
        let trusted = SqlxDriver::postgres_options(&descriptor(&[("DB_ENCRYPT", "true")]));
        assert!(matches!(trusted.get_ssl_mode(), PgSslMode::Require));
        let verified = SqlxDriver::postgres_options(&descriptor(&[
            ("DB_ENCRYPT", "true"),
            ("DB_TRUST_CERT", "false"),
        ]));
        assert!(matches!(verified.get_ssl_mode(), PgSslMode::VerifyFull));
    }

    #[test]
    fn test_driver_dialect() {
        assert_eq!(
            SqlxDriver::new(DatabaseType::PostgreSQL).dialect(),
            Dialect::Postgres
        );
        assert_eq!(SqlxDriver::new(DatabaseType::MySQL).dialect(), Dialect::MySql);
    }
}
