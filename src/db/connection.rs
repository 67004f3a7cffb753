//! Connection acquisition and teardown.
//!
//! There is no pool: every [`ConnectionManager::acquire`] opens a dedicated
//! connection through the [`Driver`], bounded by the connect timeout and
//! retried with the connection policy. Open connections are tracked in a
//! [`ConnectionRegistry`] for diagnostics and shutdown.

use crate::config::ConnectionDescriptor;
use crate::db::driver::{BoundStatement, Dialect, Driver, SessionOutput};
use crate::db::registry::{ConnectionEntry, ConnectionRegistry};
use crate::db::retry::{RetryPolicy, with_retry_if};
use crate::error::{DbError, DbResult, ErrorClass};
use crate::models::ConnectionState;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Events reported for a live connection.
#[derive(Debug)]
pub enum ConnectionEvent<'a> {
    /// A transport-level failure after the connection was established.
    Error(&'a DbError),
    /// The connection was closed.
    End,
}

/// Receives post-connect errors and end events.
pub trait ConnectionObserver: Send + Sync {
    fn on_event(&self, connection_id: u64, event: ConnectionEvent<'_>);
}

/// Default observer: logs and takes no action.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn on_event(&self, connection_id: u64, event: ConnectionEvent<'_>) {
        match event {
            ConnectionEvent::Error(e) => {
                error!(connection_id = connection_id, error = %e, "Database connection error")
            }
            ConnectionEvent::End => {
                info!(connection_id = connection_id, "Database connection ended")
            }
        }
    }
}

#[derive(Clone)]
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    descriptor: Arc<ConnectionDescriptor>,
    registry: ConnectionRegistry,
    retry: RetryPolicy,
    observer: Arc<dyn ConnectionObserver>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn Driver>, descriptor: ConnectionDescriptor) -> Self {
        Self {
            driver,
            descriptor: Arc::new(descriptor),
            registry: ConnectionRegistry::new(),
            retry: RetryPolicy::default(),
            observer: Arc::new(LoggingObserver),
        }
    }

    /// Share an existing registry instead of a private one.
    pub fn with_registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Open a new connection, retrying with the connection policy.
    pub async fn acquire(&self) -> DbResult<Connection> {
        with_retry_if(&self.retry, || self.try_acquire(), DbError::is_retryable).await
    }

    /// A single acquisition attempt.
    async fn try_acquire(&self) -> DbResult<Connection> {
        let entry = self.registry.register().await;
        let id = entry.id();
        debug!(connection_id = id, server = %self.descriptor.masked_target(), "Connecting");

        let connect_timeout = self.descriptor.connect_timeout;
        let session = match timeout(connect_timeout, self.driver.connect(&self.descriptor)).await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                self.registry.remove(id).await;
                return Err(into_connection_error(e));
            }
            Err(_) => {
                self.registry.remove(id).await;
                return Err(DbError::connection(
                    format!(
                        "Connection attempt timed out after {}ms",
                        connect_timeout.as_millis()
                    ),
                    "Check that the server is reachable or raise DB_CONNECTION_TIMEOUT",
                ));
            }
        };

        if let Err(session) = self.registry.activate(&entry, session).await {
            // Shut down while the handshake was in flight.
            if let Err(e) = session.close().await {
                debug!(connection_id = id, error = %e, "Failed to close orphaned session");
            }
            self.registry.remove(id).await;
            return Err(DbError::connection(
                "Connection closed during connect",
                "The connection manager is shutting down",
            ));
        }

        info!(connection_id = id, "Connected to database");
        Ok(Connection {
            entry,
            registry: self.registry.clone(),
            observer: self.observer.clone(),
            dialect: self.driver.dialect(),
            request_timeout: self.descriptor.request_timeout,
            cancel_timeout: self.descriptor.cancel_timeout,
        })
    }

    /// Close every registered connection concurrently. Errors are logged.
    pub async fn close_all(&self) {
        let entries = self.registry.drain().await;
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "Closing all connections");
        let cancel_timeout = self.descriptor.cancel_timeout;
        let observer = self.observer.as_ref();
        join_all(entries.into_iter().map(|entry| async move {
            if let Some(Err(e)) = retire(&entry, cancel_timeout, observer).await {
                warn!(connection_id = entry.id(), error = %e, "Error closing connection");
            }
        }))
        .await;
        info!("All connections closed");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.descriptor.masked_target())
            .field("dialect", &self.driver.dialect())
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Take the session out of `entry`, mark it closed and close the session
/// within `cancel_timeout`. `None` when the session was already taken.
async fn retire(
    entry: &ConnectionEntry,
    cancel_timeout: Duration,
    observer: &dyn ConnectionObserver,
) -> Option<DbResult<()>> {
    let session = {
        let mut slot = entry.session.lock().await;
        entry.set_state(ConnectionState::Closed);
        slot.take()
    }?;
    let result = match timeout(cancel_timeout, session.close()).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout("close", cancel_timeout.as_millis() as u64)),
    };
    observer.on_event(entry.id(), ConnectionEvent::End);
    Some(result)
}

fn into_connection_error(e: DbError) -> DbError {
    match e {
        DbError::Connection { .. } | DbError::Timeout { .. } => e,
        other => DbError::connection(other.to_string(), "Check the DB_* settings"),
    }
}

/// A single live connection.
///
/// Operations on one connection run in issue order. Dropping a connection
/// without [`close`](Connection::close) closes it in the background.
pub struct Connection {
    entry: Arc<ConnectionEntry>,
    registry: ConnectionRegistry,
    observer: Arc<dyn ConnectionObserver>,
    dialect: Dialect,
    request_timeout: Duration,
    cancel_timeout: Duration,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.entry.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.entry.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn closed_error(&self) -> DbError {
        DbError::connection(
            format!("Connection {} is closed", self.id()),
            "Acquire a new connection",
        )
    }

    fn report(&self, error: &DbError) {
        if error.class() == ErrorClass::Transient {
            self.observer.on_event(self.id(), ConnectionEvent::Error(error));
        }
    }

    /// Run one statement, bounded by the request timeout.
    pub(crate) async fn execute(&self, statement: &BoundStatement) -> DbResult<SessionOutput> {
        let mut slot = self.entry.session.lock().await;
        let session = slot.as_mut().ok_or_else(|| self.closed_error())?;
        let result = match timeout(self.request_timeout, session.execute(statement)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(
                "statement",
                self.request_timeout.as_millis() as u64,
            )),
        };
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    pub(crate) async fn begin(&self) -> DbResult<()> {
        let mut slot = self.entry.session.lock().await;
        let session = slot.as_mut().ok_or_else(|| self.closed_error())?;
        let result = session.begin().await;
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    pub(crate) async fn commit(&self) -> DbResult<()> {
        let mut slot = self.entry.session.lock().await;
        let session = slot.as_mut().ok_or_else(|| self.closed_error())?;
        let result = session.commit().await;
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    pub(crate) async fn rollback(&self) -> DbResult<()> {
        let mut slot = self.entry.session.lock().await;
        let session = slot.as_mut().ok_or_else(|| self.closed_error())?;
        let result = session.rollback().await;
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    /// Close the session, bounded by the cancel timeout, and unregister.
    pub async fn close(self) -> DbResult<()> {
        let result = retire(&self.entry, self.cancel_timeout, self.observer.as_ref()).await;
        self.registry.remove(self.id()).await;
        // `None`: already closed by shutdown.
        result.unwrap_or(Ok(()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        let id = self.id();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(connection_id = id, "Connection dropped outside the runtime, left for shutdown");
            return;
        };
        let entry = self.entry.clone();
        let registry = self.registry.clone();
        let observer = self.observer.clone();
        let cancel_timeout = self.cancel_timeout;
        debug!(connection_id = id, "Closing dropped connection");
        handle.spawn(async move {
            if let Some(Err(e)) = retire(&entry, cancel_timeout, observer.as_ref()).await {
                warn!(connection_id = id, error = %e, "Error closing dropped connection");
            }
            registry.remove(id).await;
        });
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("dialect", &self.dialect)
            .finish()
    }
}
