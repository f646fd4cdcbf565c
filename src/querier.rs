use crate::context::Context;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// The value types a database provider speaks.
///
/// A pool, its transaction handles and any facade wrapped around them all
/// share one `Backend`, which is what lets them stand in for each other
/// behind [`Querier`].
pub trait Backend: Send + Sync + 'static {
    /// Bound statement arguments
    type Arguments: Send + 'static;
    /// Result of a statement that returns no rows (rows affected, insert id, ...)
    type Outcome: Send + 'static;
    /// A single result row
    type Row: Send + 'static;
}

/// Lazy, forward-only stream of result rows.
///
/// The stream is finite and cannot be restarted. Dropping it releases the
/// connection (or transaction) that produced it.
pub type Rows<B> = BoxStream<'static, Result<<B as Backend>::Row>>;

/// Result of a single-row query.
///
/// Errors are not reported when the query is issued; they surface when the
/// row is read with [`SingleRow::row`] or [`SingleRow::optional`].
pub struct SingleRow<B: Backend> {
    result: Result<Option<B::Row>>,
}

impl<B: Backend> SingleRow<B> {
    pub fn new(result: Result<Option<B::Row>>) -> Self {
        Self { result }
    }

    /// Returns the row, or [`Error::NoRows`] if the query matched nothing.
    pub fn row(self) -> Result<B::Row> {
        self.result?.ok_or(Error::NoRows)
    }

    /// Returns the row if there was one.
    pub fn optional(self) -> Result<Option<B::Row>> {
        self.result
    }
}

impl<B: Backend> From<Result<Option<B::Row>>> for SingleRow<B> {
    fn from(result: Result<Option<B::Row>>) -> Self {
        Self::new(result)
    }
}

/// Minimal capability required to run a statement.
///
/// Implemented by connection pools, by open transaction handles and by
/// [`TxPool`](crate::TxPool) itself, so code written against `Querier`
/// does not care which one it talks to.
#[async_trait]
pub trait Querier<B: Backend>: Send + Sync {
    /// Runs a statement that returns no rows.
    async fn execute(&self, ctx: &Context, sql: &str, args: B::Arguments) -> Result<B::Outcome>;

    /// Runs a statement and streams its rows.
    async fn query(&self, ctx: &Context, sql: &str, args: B::Arguments) -> Result<Rows<B>>;

    /// Runs a statement expected to return at most one row.
    async fn query_row(&self, ctx: &Context, sql: &str, args: B::Arguments) -> SingleRow<B>;
}

/// An open database transaction.
///
/// A handle is terminated exactly once. Any commit or rollback after that
/// must fail with [`Error::TxClosed`], which callers test by kind.
#[async_trait]
pub trait TxHandle<B: Backend>: Querier<B> {
    async fn commit(&self, ctx: &Context) -> Result<()>;

    async fn rollback(&self, ctx: &Context) -> Result<()>;
}

/// A connection pool that can start transactions.
///
/// The pool must also implement `Querier<Self::Backend>` to be usable with
/// [`TxPool`](crate::TxPool).
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    type Backend: Backend;
    type Tx: TxHandle<Self::Backend> + 'static;

    /// Begins a new transaction.
    async fn begin(&self, ctx: &Context) -> Result<Self::Tx>;
}
