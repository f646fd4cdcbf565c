//! SQLx MySQL provider.
//!
//! `sqlx::MySqlPool` implements [`Provider`] and [`Querier`] directly, so it
//! can be handed to [`TxPool::new`](crate::TxPool::new) as is.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::querier::{Backend, Provider, Querier, Rows, SingleRow, TxHandle};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use sqlx::mysql::{MySqlArguments, MySqlQueryResult, MySqlRow};
use sqlx::{MySql, MySqlPool, Transaction};
use std::future::Future;
use std::ops::DerefMut;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard, OwnedMutexGuard};

/// Rows buffered ahead of the consumer of a [`Rows`] stream.
const ROW_BUFFER: usize = 64;

/// SQLx MySQL value types.
pub struct MySqlBackend;

impl Backend for MySqlBackend {
    type Arguments = MySqlArguments;
    type Outcome = MySqlQueryResult;
    type Row = MySqlRow;
}

#[async_trait]
impl Querier<MySqlBackend> for MySqlPool {
    async fn execute(
        &self,
        ctx: &Context,
        sql: &str,
        args: MySqlArguments,
    ) -> Result<MySqlQueryResult> {
        ctx.run(sqlx::query_with(sql, args).execute(self)).await
    }

    async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        args: MySqlArguments,
    ) -> Result<Rows<MySqlBackend>> {
        let pool = self.clone();
        let sql = sql.to_owned();

        stream_rows(ctx, move |sender| async move {
            let mut rows = sqlx::query_with(&sql, args).fetch(&pool);
            while let Some(row) = rows.try_next().await? {
                if sender.send(Ok(row)).await.is_err() {
                    break;
                }
            }
            Ok::<_, Error>(())
        })
        .await
    }

    async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        args: MySqlArguments,
    ) -> SingleRow<MySqlBackend> {
        SingleRow::new(ctx.run(sqlx::query_with(sql, args).fetch_optional(self)).await)
    }
}

#[async_trait]
impl Provider for MySqlPool {
    type Backend = MySqlBackend;
    type Tx = MySqlTx;

    async fn begin(&self, ctx: &Context) -> Result<MySqlTx> {
        let tx = ctx.run(sqlx::Pool::begin(self)).await?;
        Ok(MySqlTx::from(tx))
    }
}

/// An open MySQL transaction that can be shared through a [`Context`].
///
/// The SQLx transaction sits behind a mutex that is never waited on. A
/// [`Rows`] stream holds it until the stream is drained or dropped, and any
/// statement, commit or rollback issued meanwhile fails with
/// [`Error::TxBusy`] instead of blocking on a stream only its caller can
/// drain.
///
/// Once committed or rolled back, every operation fails with
/// [`Error::TxClosed`]. Dropping an open handle rolls the transaction back
/// through SQLx's own drop behaviour.
pub struct MySqlTx {
    conn: Arc<Mutex<Option<Transaction<'static, MySql>>>>,
}

impl From<Transaction<'static, MySql>> for MySqlTx {
    fn from(tx: Transaction<'static, MySql>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(tx))),
        }
    }
}

impl MySqlTx {
    /// Returns `true` once the transaction has been committed or rolled back.
    ///
    /// A transaction busy with an open row stream is still open.
    pub fn is_closed(&self) -> bool {
        self.conn.try_lock().map_or(false, |guard| guard.is_none())
    }

    fn acquire(&self) -> Result<MutexGuard<'_, Option<Transaction<'static, MySql>>>> {
        self.conn.try_lock().map_err(|_| Error::TxBusy)
    }

    fn acquire_owned(&self) -> Result<OwnedMutexGuard<Option<Transaction<'static, MySql>>>> {
        Arc::clone(&self.conn)
            .try_lock_owned()
            .map_err(|_| Error::TxBusy)
    }

    async fn fetch_optional(
        &self,
        ctx: &Context,
        sql: &str,
        args: MySqlArguments,
    ) -> Result<Option<MySqlRow>> {
        let mut guard = self.acquire()?;
        let tx = guard.as_mut().ok_or(Error::TxClosed)?;
        ctx.run(sqlx::query_with(sql, args).fetch_optional(tx.deref_mut()))
            .await
    }

    fn take(&self) -> Result<Transaction<'static, MySql>> {
        self.acquire()?.take().ok_or(Error::TxClosed)
    }
}

#[async_trait]
impl Querier<MySqlBackend> for MySqlTx {
    async fn execute(
        &self,
        ctx: &Context,
        sql: &str,
        args: MySqlArguments,
    ) -> Result<MySqlQueryResult> {
        let mut guard = self.acquire()?;
        let tx = guard.as_mut().ok_or(Error::TxClosed)?;
        ctx.run(sqlx::query_with(sql, args).execute(tx.deref_mut()))
            .await
    }

    async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        args: MySqlArguments,
    ) -> Result<Rows<MySqlBackend>> {
        let guard = self.acquire_owned()?;
        if guard.is_none() {
            return Err(Error::TxClosed);
        }
        let sql = sql.to_owned();

        stream_rows(ctx, move |sender| async move {
            let mut guard = guard;
            let tx = guard.as_mut().ok_or(Error::TxClosed)?;
            let mut rows = sqlx::query_with(&sql, args).fetch(tx.deref_mut());
            while let Some(row) = rows.try_next().await? {
                if sender.send(Ok(row)).await.is_err() {
                    break;
                }
            }
            Ok::<_, Error>(())
        })
        .await
    }

    async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        args: MySqlArguments,
    ) -> SingleRow<MySqlBackend> {
        SingleRow::new(self.fetch_optional(ctx, sql, args).await)
    }
}

#[async_trait]
impl TxHandle<MySqlBackend> for MySqlTx {
    async fn commit(&self, ctx: &Context) -> Result<()> {
        let tx = self.take()?;
        ctx.run(tx.commit()).await
    }

    async fn rollback(&self, ctx: &Context) -> Result<()> {
        let tx = self.take()?;
        ctx.run(tx.rollback()).await
    }
}

/// Runs `produce` on its own task and exposes the rows it sends as a stream.
///
/// The first item is awaited before returning, so a statement that fails
/// outright is reported by `query` itself rather than by the stream. Once
/// the stream is dropped the producer's next send fails, and it returns,
/// releasing whatever it holds.
async fn stream_rows<R, F, Fut>(
    ctx: &Context,
    produce: F,
) -> Result<BoxStream<'static, Result<R>>>
where
    R: Send + 'static,
    F: FnOnce(mpsc::Sender<Result<R>>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (sender, mut receiver) = mpsc::channel(ROW_BUFFER);
    let errors = sender.clone();
    let task_ctx = ctx.clone();
    let producer = produce(sender);

    tokio::spawn(async move {
        if let Err(e) = task_ctx.run(producer).await {
            // The receiver may already be gone; nothing is waiting for the error then.
            let _ = errors.send(Err(e)).await;
        }
    });

    let head = match receiver.recv().await {
        Some(Err(e)) => return Err(e),
        head => head,
    };
    let tail = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    });

    Ok(futures::stream::iter(head).chain(tail).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{with_transaction, TxPool};
    use std::time::Duration;

    fn closed_tx() -> Arc<MySqlTx> {
        Arc::new(MySqlTx {
            conn: Arc::new(Mutex::new(None)),
        })
    }

    #[tokio::test]
    async fn test_closed_transaction_rejects_everything() {
        let tx = closed_tx();
        let ctx = Context::background();

        assert!(tx.is_closed());
        assert!(tx.commit(&ctx).await.unwrap_err().is_tx_closed());
        assert!(tx.rollback(&ctx).await.unwrap_err().is_tx_closed());
        assert!(tx
            .execute(&ctx, "SELECT 1", MySqlArguments::default())
            .await
            .unwrap_err()
            .is_tx_closed());
        assert!(tx
            .query(&ctx, "SELECT 1", MySqlArguments::default())
            .await
            .err()
            .unwrap()
            .is_tx_closed());
        assert!(tx
            .query_row(&ctx, "SELECT 1", MySqlArguments::default())
            .await
            .row()
            .unwrap_err()
            .is_tx_closed());
    }

    #[tokio::test]
    async fn test_facade_routes_to_carried_transaction() {
        // Never connects: the statement must go to the transaction, not the pool.
        let pool = MySqlPool::connect_lazy("mysql://localhost/test").unwrap();
        let txpool = TxPool::new(pool);

        let ctx = with_transaction(&Context::background(), closed_tx());
        let err = txpool
            .execute(
                &ctx,
                "INSERT INTO users (name) VALUES ('x')",
                MySqlArguments::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(&err, Error::Exec(inner) if inner.is_tx_closed()));
    }

    #[tokio::test]
    async fn test_stream_reports_immediate_error_from_query() {
        let ctx = Context::background();
        let result =
            stream_rows::<u32, _, _>(&ctx, |_sender| async { Err::<(), _>(Error::NoRows) }).await;
        assert!(matches!(result, Err(Error::NoRows)));
    }

    #[tokio::test]
    async fn test_stream_with_zero_rows_is_empty() {
        let ctx = Context::background();
        let rows = stream_rows::<u32, _, _>(&ctx, |_sender| async { Ok::<_, Error>(()) })
            .await
            .unwrap();
        assert!(rows.collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_after_rows_arrives_as_item() {
        let ctx = Context::background();
        let rows = stream_rows(&ctx, |sender| async move {
            for n in 1..=3u32 {
                let _ = sender.send(Ok(n)).await;
            }
            Err::<(), _>(Error::DeadlineExceeded)
        })
        .await
        .unwrap();

        let items = rows.collect::<Vec<_>>().await;
        assert_eq!(items.len(), 4);
        let values: Vec<u32> = items[..3].iter().map(|item| *item.as_ref().unwrap()).collect();
        assert_eq!(values, [1, 2, 3]);
        assert!(matches!(items[3], Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_open_stream_makes_transaction_busy() {
        let tx = closed_tx();
        let ctx = Context::background();

        // Holds the transaction lock the way a live query does, with more rows
        // than the channel can buffer.
        let guard = tx.acquire_owned().unwrap();
        let mut rows = stream_rows(&ctx, move |sender| async move {
            let _guard = guard;
            for n in 0..(ROW_BUFFER as u32 * 4) {
                if sender.send(Ok(n)).await.is_err() {
                    break;
                }
            }
            Ok::<_, Error>(())
        })
        .await
        .unwrap();
        assert_eq!(rows.next().await.unwrap().unwrap(), 0);

        assert!(!tx.is_closed());
        assert!(tx
            .execute(&ctx, "SELECT 1", MySqlArguments::default())
            .await
            .unwrap_err()
            .is_tx_busy());
        assert!(tx
            .query(&ctx, "SELECT 1", MySqlArguments::default())
            .await
            .err()
            .unwrap()
            .is_tx_busy());
        assert!(tx
            .query_row(&ctx, "SELECT 1", MySqlArguments::default())
            .await
            .row()
            .unwrap_err()
            .is_tx_busy());
        assert!(tx.commit(&ctx).await.unwrap_err().is_tx_busy());
        assert!(tx.rollback(&ctx).await.unwrap_err().is_tx_busy());

        drop(rows);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !tx.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("producer released the transaction");
        assert!(tx.commit(&ctx).await.unwrap_err().is_tx_closed());
    }
}
