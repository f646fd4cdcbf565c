/// Boxed error returned by caller-supplied transaction bodies and non-SQLx drivers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for routing and transaction management
#[derive(Debug)]
pub enum Error {
    /// Database error from SQLx
    Database(sqlx::Error),

    /// Error reported by a provider that is not backed by SQLx
    Driver(BoxError),

    /// Transaction has already been closed (committed or rolled back)
    TxClosed,

    /// The transaction is still serving an open row stream
    ///
    /// Drain or drop the [`Rows`](crate::Rows) returned by an earlier query
    /// before issuing the next statement, commit or rollback.
    TxBusy,

    /// A single-row query matched nothing
    NoRows,

    /// The context deadline elapsed before the operation finished
    DeadlineExceeded,

    /// Invalid or missing configuration
    Config(String),

    Begin(Box<Error>),

    Exec(Box<Error>),

    Query(Box<Error>),

    /// The function passed to `TxPool::transaction` returned an error
    Run(BoxError),

    Commit(Box<Error>),

    Rollback(Box<Error>),

    /// A primary failure together with the rollback failure that followed it.
    ///
    /// `source()` follows `primary`; the rollback half is kept in `rollback`.
    WithRollback {
        primary: Box<Error>,
        rollback: Box<Error>,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Database(e) => write!(f, "database error: {e}"),
            Error::Driver(e) => write!(f, "driver error: {e}"),
            Error::TxClosed => f.write_str("transaction already closed"),
            Error::TxBusy => f.write_str("transaction busy with an open row stream"),
            Error::NoRows => f.write_str("no rows in result set"),
            Error::DeadlineExceeded => f.write_str("context deadline exceeded"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Begin(e) => write!(f, "begin transaction failed: {e}"),
            Error::Exec(e) => write!(f, "exec failed: {e}"),
            Error::Query(e) => write!(f, "query failed: {e}"),
            Error::Run(e) => write!(f, "run wrapped function failed: {e}"),
            Error::Commit(e) => write!(f, "commit failed: {e}"),
            Error::Rollback(e) => write!(f, "rollback failed: {e}"),
            Error::WithRollback { primary, rollback } => write!(f, "{primary}; {rollback}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Driver(e) | Error::Run(e) => Some(&**e),
            Error::Begin(e)
            | Error::Exec(e)
            | Error::Query(e)
            | Error::Commit(e)
            | Error::Rollback(e) => Some(&**e),
            Error::WithRollback { primary, .. } => Some(&**primary),
            Error::TxClosed
            | Error::TxBusy
            | Error::NoRows
            | Error::DeadlineExceeded
            | Error::Config(_) => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e)
    }
}

impl Error {
    /// Returns `true` for the provider's "transaction already closed" signal.
    pub fn is_tx_closed(&self) -> bool {
        matches!(self, Error::TxClosed)
    }

    /// Returns `true` when a statement was refused because a row stream on
    /// the same transaction is still open.
    pub fn is_tx_busy(&self) -> bool {
        matches!(self, Error::TxBusy)
    }

    /// Joins a cleanup rollback failure onto an optional primary failure.
    pub(crate) fn join_rollback(primary: Option<Error>, rollback: Error) -> Error {
        let rollback = Error::Rollback(Box::new(rollback));
        match primary {
            Some(primary) => Error::WithRollback {
                primary: Box::new(primary),
                rollback: Box::new(rollback),
            },
            None => rollback,
        }
    }

    /// Searches the source chain for an error of type `E`.
    ///
    /// Both halves of [`Error::WithRollback`] are searched, primary first.
    pub fn find_cause<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        if let Error::WithRollback { primary, rollback } = self {
            return primary
                .find_cause::<E>()
                .or_else(|| rollback.find_cause::<E>());
        }

        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            // A joined error further down still needs both halves searched.
            if let Some(inner) = err.downcast_ref::<Error>() {
                if matches!(inner, Error::WithRollback { .. }) {
                    return inner.find_cause::<E>();
                }
            }
            current = err.source();
        }
        None
    }
}

/// Result type alias for routing and transaction operations
pub type Result<T> = std::result::Result<T, Error>;
