use thiserror::Error;

/// Relational store operation error.
///
/// The relational store is mandatory: unlike the document store there is no
/// degraded mode, every failure is surfaced to the caller.
///
/// | SQLx error | RelationalError |
/// |------------|-----------------|
/// | Io / Tls / PoolClosed / WorkerCrashed / Configuration | `Connection` |
/// | Database (syntax, constraint violation, ...) | `Query` |
/// | PoolTimedOut (all connections busy) | `Query` |
/// | ColumnDecode / Decode / ColumnNotFound / TypeNotFound | `Decode` |
/// | anything else | `Query` |
#[derive(Debug, Error)]
pub enum RelationalError {
    #[error("relational store connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("row decode failed: {0}")]
    Decode(String),
}

impl RelationalError {
    /// Whether the pool should be dropped so the next call reconnects.
    pub fn is_connection(&self) -> bool {
        matches!(self, RelationalError::Connection(_))
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RelationalError {
    match err {
        sqlx::Error::Io(e) => RelationalError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => RelationalError::Connection(format!("tls error in {operation}: {e}")),
        sqlx::Error::PoolTimedOut => {
            RelationalError::Query(format!("timed out waiting for a pooled connection in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            RelationalError::Connection(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::WorkerCrashed => {
            RelationalError::Connection(format!("connection worker crashed in {operation}"))
        }
        sqlx::Error::Configuration(e) => {
            RelationalError::Connection(format!("invalid configuration in {operation}: {e}"))
        }
        sqlx::Error::Database(db_err) => {
            let code = db_err
                .code()
                .map(|c| format!(" (code {c})"))
                .unwrap_or_default();
            RelationalError::Query(format!(
                "database error in {operation}{code}: {}",
                db_err.message()
            ))
        }
        err @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. }) => {
            RelationalError::Decode(format!("{operation}: {err}"))
        }
        other => RelationalError::Query(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_keeps_the_pool() {
        let err = map_sqlx_error("query", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, RelationalError::Query(_)), "{err:?}");
        assert!(!err.is_connection());
    }

    #[test]
    fn transport_failures_are_connection_class() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(map_sqlx_error("query", sqlx::Error::Io(io)).is_connection());
        assert!(map_sqlx_error("query", sqlx::Error::PoolClosed).is_connection());
    }

    #[test]
    fn decode_failures_are_decode_class() {
        let err = map_sqlx_error("query", sqlx::Error::Decode("bad column".into()));
        assert!(matches!(err, RelationalError::Decode(_)), "{err:?}");
    }
}
