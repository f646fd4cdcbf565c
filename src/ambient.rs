//! Carries an open transaction through a [`Context`].

use crate::context::Context;
use crate::querier::{Backend, Querier};
use std::sync::Arc;

/// Private key for the ambient transaction. Nothing outside this module can
/// name it, so nothing else can read, overwrite or forge the association.
struct AmbientTx;

/// Returns a child of `ctx` that carries `tx` as its ambient transaction.
///
/// [`TxPool::transaction`](crate::TxPool::transaction) does this for you.
/// Use it directly when you drive begin/commit/rollback yourself but still
/// want nested facade calls to pick up the transaction.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlx::MySqlPool;
/// use sqlx_txpool::{with_transaction, Context, Provider, TxHandle, TxPool};
/// use std::sync::Arc;
///
/// # async fn example(pool: MySqlPool) -> sqlx_txpool::Result<()> {
/// let txpool = TxPool::new(pool);
/// let ctx = Context::background();
///
/// // `MySqlPool` has an inherent `begin`, so name the trait method.
/// let tx = Arc::new(Provider::begin(txpool.pool(), &ctx).await?);
/// let tx_ctx = with_transaction(&ctx, Arc::clone(&tx));
///
/// txpool
///     .execute(&tx_ctx, "DELETE FROM sessions", Default::default())
///     .await?;
///
/// tx.commit(&ctx).await?;
/// # Ok(())
/// # }
/// ```
pub fn with_transaction<B, T>(ctx: &Context, tx: Arc<T>) -> Context
where
    B: Backend,
    T: Querier<B> + 'static,
{
    let querier: Arc<dyn Querier<B>> = tx;
    ctx.with_value::<AmbientTx, _>(querier)
}

/// Looks up the ambient transaction for backend `B`.
///
/// `None` is the normal answer outside a transaction, and also the answer
/// when the carried transaction belongs to a different backend.
pub(crate) fn ambient_querier<B: Backend>(ctx: &Context) -> Option<Arc<dyn Querier<B>>> {
    ctx.value::<AmbientTx, Arc<dyn Querier<B>>>().cloned()
}
