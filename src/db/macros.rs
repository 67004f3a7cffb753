//! Backend dispatch macro.
//!
//! Generates match arms over [`DbConnection`](crate::db::backend::DbConnection)
//! so each operation reads as one linear block per backend.

/// Dispatch on a `DbConnection` variant.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(&mut self.conn, {
///     MySql(c) => run_mysql(c).await,
///     Postgres(c) => run_postgres(c).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::backend::DbConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
