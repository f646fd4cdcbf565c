use crate::ambient;
use crate::context::Context;
use crate::error::{BoxError, Error, Result};
use crate::querier::{Backend, Provider, Querier, Rows, SingleRow, TxHandle};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

type BackendOf<P> = <P as Provider>::Backend;
type Outcome<P> = <BackendOf<P> as Backend>::Outcome;
type Arguments<P> = <BackendOf<P> as Backend>::Arguments;

/// Transaction-aware facade over a connection pool.
///
/// Every query method takes a [`Context`]. If the context carries an
/// ambient transaction (because the call happens inside
/// [`TxPool::transaction`], or the caller used
/// [`with_transaction`](crate::with_transaction)), the statement runs on that
/// transaction. Otherwise it runs directly on the pool.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx::mysql::MySqlArguments;
/// use sqlx::{Arguments, MySqlPool};
/// use sqlx_txpool::{Context, TxPool};
///
/// # async fn example(pool: MySqlPool) -> Result<(), Box<dyn std::error::Error>> {
/// let txpool = TxPool::new(pool);
/// let ctx = Context::background();
///
/// txpool
///     .transaction(&ctx, |ctx| {
///         let txpool = txpool.clone();
///         async move {
///             let mut args = MySqlArguments::default();
///             args.add("Alice")?;
///             txpool
///                 .execute(&ctx, "INSERT INTO users (name) VALUES (?)", args)
///                 .await?;
///             Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
///         }
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TxPool<P> {
    pool: Arc<P>,
}

impl<P> Clone for TxPool<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<P> TxPool<P>
where
    P: Provider + Querier<BackendOf<P>>,
{
    pub fn new(pool: P) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Returns the ambient transaction carried by `ctx`, or the pool.
    pub fn querier(&self, ctx: &Context) -> Arc<dyn Querier<BackendOf<P>>> {
        match ambient::ambient_querier::<BackendOf<P>>(ctx) {
            Some(tx) => tx,
            None => Arc::clone(&self.pool) as Arc<dyn Querier<BackendOf<P>>>,
        }
    }

    /// Runs a statement that returns no rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exec`] wrapping the provider's error.
    pub async fn execute(
        &self,
        ctx: &Context,
        sql: &str,
        args: Arguments<P>,
    ) -> Result<Outcome<P>> {
        self.querier(ctx)
            .execute(ctx, sql, args)
            .await
            .map_err(|e| Error::Exec(Box::new(e)))
    }

    /// Runs a statement and streams its rows.
    ///
    /// The stream holds its connection until it is drained or dropped. Inside
    /// a transaction, statements, commit and rollback issued on the same
    /// context before then fail with [`Error::TxBusy`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] wrapping the provider's error.
    pub async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        args: Arguments<P>,
    ) -> Result<Rows<BackendOf<P>>> {
        self.querier(ctx)
            .query(ctx, sql, args)
            .await
            .map_err(|e| Error::Query(Box::new(e)))
    }

    /// Runs a statement expected to return at most one row.
    ///
    /// Errors are left unwrapped and surface when the row is read.
    pub async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        args: Arguments<P>,
    ) -> SingleRow<BackendOf<P>> {
        self.querier(ctx).query_row(ctx, sql, args).await
    }

    /// Returns the wrapped pool.
    ///
    /// Calls made through it bypass the ambient transaction.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Runs `f` inside a new transaction.
    ///
    /// `f` receives a child of `ctx` that carries the transaction; every
    /// facade call made with it runs on that transaction, in order. The
    /// transaction commits if `f` returns `Ok` and rolls back otherwise. A
    /// cleanup rollback is issued on every path once the transaction has
    /// begun; its "already closed" answer is expected and ignored.
    ///
    /// Calling `transaction` again from inside `f` starts a second,
    /// independent transaction. It does not join the outer one.
    ///
    /// # Errors
    ///
    /// - [`Error::Begin`] if the transaction could not be started; `f` is not called
    /// - [`Error::Run`] if `f` failed; the source is `f`'s own error
    /// - [`Error::Commit`] if the commit failed
    /// - [`Error::Rollback`] or [`Error::WithRollback`] if the cleanup rollback
    ///   failed for any other reason
    pub async fn transaction<F, Fut, T, E>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        let settled = self.settle(ctx, f).await?;

        let outcome = match settled.outcome {
            Ok(value) => Ok(value),
            Err(Failure::Run(e)) => Err(Error::Run(e.into())),
            Err(Failure::Commit(e)) => Err(Error::Commit(Box::new(e))),
        };

        match (outcome, settled.cleanup) {
            (outcome, None) => outcome,
            (Ok(_), Some(rollback)) => Err(Error::join_rollback(None, rollback)),
            (Err(primary), Some(rollback)) => Err(Error::join_rollback(Some(primary), rollback)),
        }
    }

    /// Drives one transaction through begin, `f`, commit and the cleanup
    /// rollback, leaving error shaping to the caller.
    pub(crate) async fn settle<F, Fut, T, E>(
        &self,
        ctx: &Context,
        f: F,
    ) -> Result<Settled<T, E>>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let tx = match self.pool.begin(ctx).await {
            Ok(tx) => Arc::new(tx),
            Err(e) => return Err(Error::Begin(Box::new(e))),
        };
        debug!("transaction begun");

        let tx_ctx = ambient::with_transaction::<BackendOf<P>, _>(ctx, Arc::clone(&tx));

        let outcome = match f(tx_ctx).await {
            Ok(value) => match tx.commit(ctx).await {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(e) => Err(Failure::Commit(e)),
            },
            Err(e) => Err(Failure::Run(e)),
        };

        let cleanup = match tx.rollback(ctx).await {
            Ok(()) => {
                debug!("transaction rolled back");
                None
            }
            Err(e) if e.is_tx_closed() => None,
            Err(e) => {
                warn!(error = %e, "transaction rollback failed");
                Some(e)
            }
        };

        Ok(Settled { outcome, cleanup })
    }
}

/// Outcome of a transaction that got past begin.
pub(crate) struct Settled<T, E> {
    pub(crate) outcome: std::result::Result<T, Failure<E>>,
    /// Rollback error other than "already closed"
    pub(crate) cleanup: Option<Error>,
}

pub(crate) enum Failure<E> {
    Run(E),
    Commit(Error),
}

#[async_trait]
impl<P> Querier<BackendOf<P>> for TxPool<P>
where
    P: Provider + Querier<BackendOf<P>>,
{
    async fn execute(&self, ctx: &Context, sql: &str, args: Arguments<P>) -> Result<Outcome<P>> {
        TxPool::execute(self, ctx, sql, args).await
    }

    async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        args: Arguments<P>,
    ) -> Result<Rows<BackendOf<P>>> {
        TxPool::query(self, ctx, sql, args).await
    }

    async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        args: Arguments<P>,
    ) -> SingleRow<BackendOf<P>> {
        TxPool::query_row(self, ctx, sql, args).await
    }
}
