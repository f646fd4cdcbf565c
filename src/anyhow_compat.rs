use crate::error::Error;
use crate::executor::{Failure, TxPool};
use crate::querier::{Provider, Querier};
use crate::Context;
use std::future::Future;

impl<P> TxPool<P>
where
    P: Provider + Querier<<P as Provider>::Backend>,
{
    /// Runs `f` inside a new transaction, using anyhow::Error for error handling.
    ///
    /// Same lifecycle as [`TxPool::transaction`]. The phase that failed is
    /// attached as anyhow context, so an error returned by `f` can still be
    /// recovered with `downcast_ref`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use sqlx::MySqlPool;
    /// use sqlx_txpool::{Context, TxPool};
    ///
    /// # async fn example(pool: MySqlPool) -> anyhow::Result<()> {
    /// let txpool = TxPool::new(pool);
    /// let ctx = Context::background();
    ///
    /// txpool
    ///     .transaction_anyhow(&ctx, |ctx| {
    ///         let txpool = txpool.clone();
    ///         async move {
    ///             txpool
    ///                 .execute(&ctx, "DELETE FROM sessions", Default::default())
    ///                 .await?;
    ///             anyhow::ensure!(ctx.deadline().is_none(), "unexpected deadline");
    ///             Ok::<_, anyhow::Error>(())
    ///         }
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transaction_anyhow<F, Fut, T>(&self, ctx: &Context, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let settled = self.settle(ctx, f).await?;

        let outcome = match settled.outcome {
            Ok(value) => Ok(value),
            Err(Failure::Run(e)) => Err(e.context("run wrapped function failed")),
            Err(Failure::Commit(e)) => Err(anyhow::Error::new(Error::Commit(Box::new(e)))),
        };

        match (outcome, settled.cleanup) {
            (outcome, None) => outcome,
            (Ok(_), Some(rollback)) => {
                Err(anyhow::Error::new(Error::Rollback(Box::new(rollback))))
            }
            (Err(primary), Some(rollback)) => {
                Err(primary.context(Error::Rollback(Box::new(rollback))))
            }
        }
    }
}
