//! # sqlx-txpool
//!
//! A transaction-aware facade for SQLx pools: queries run on the ambient
//! transaction carried by a [`Context`] if there is one, and on the pool
//! otherwise. Callers never need to know which.
//!
//! ## Features
//!
//! - **Ambient Transactions**: `TxPool::transaction` publishes the open transaction into
//!   a child `Context`; every facade call made with it joins that transaction
//! - **Automatic Commit/Rollback**: Commits when the closure succeeds, rolls back when it fails
//! - **Guaranteed Cleanup**: A cleanup rollback runs on every exit path; its "already closed"
//!   answer is ignored and any other failure is reported next to the primary error
//! - **Inspectable Errors**: Every phase (begin, run, commit, rollback) is labelled and the
//!   original cause stays reachable through the source chain
//! - **Pluggable Providers**: Anything implementing `Provider` and `Querier` can sit under
//!   the facade; `sqlx::MySqlPool` does out of the box
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx = { version = "0.8", features = ["mysql", "runtime-tokio"] }
//! sqlx-txpool = "0.1"
//! ```
//!
//! ## Examples
//!
//! ### Repository Code That Does Not Care About Transactions
//!
//! ```rust,no_run
//! use sqlx::mysql::MySqlArguments;
//! use sqlx::{Arguments, MySqlPool};
//! use sqlx_txpool::{Context, TxPool};
//!
//! async fn create_user(
//!     db: &TxPool<MySqlPool>,
//!     ctx: &Context,
//!     name: &str,
//! ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
//!     let mut args = MySqlArguments::default();
//!     args.add(name)?;
//!     let result = db
//!         .execute(ctx, "INSERT INTO users (name) VALUES (?)", args)
//!         .await?;
//!     Ok(result.last_insert_id())
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let db = TxPool::new(MySqlPool::connect("mysql://localhost/test").await?);
//! let ctx = Context::background();
//!
//! // Runs directly on the pool
//! create_user(&db, &ctx, "Alice").await?;
//!
//! // Both inserts share one transaction
//! db.transaction(&ctx, |ctx| {
//!     let db = db.clone();
//!     async move {
//!         create_user(&db, &ctx, "Bob").await?;
//!         create_user(&db, &ctx, "Carol").await?;
//!         Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
//!     }
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading Rows
//!
//! ```rust,no_run
//! use futures::TryStreamExt;
//! use sqlx::{MySqlPool, Row};
//! use sqlx_txpool::{Context, TxPool};
//!
//! # async fn example(db: TxPool<MySqlPool>) -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = Context::background();
//!
//! let mut rows = db.query(&ctx, "SELECT name FROM users", Default::default()).await?;
//! while let Some(row) = rows.try_next().await? {
//!     let name: String = row.try_get("name")?;
//!     println!("{name}");
//! }
//!
//! let count: i64 = db
//!     .query_row(&ctx, "SELECT COUNT(*) FROM users", Default::default())
//!     .await
//!     .row()?
//!     .try_get(0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! When the closure fails, the transaction rolls back and the closure's own
//! error can be recovered from the result:
//!
//! ```rust,no_run
//! use sqlx::MySqlPool;
//! use sqlx_txpool::{Context, Error, TxPool};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("insufficient funds")]
//! struct InsufficientFunds;
//!
//! # async fn example(db: TxPool<MySqlPool>) {
//! let ctx = Context::background();
//! let result = db
//!     .transaction(&ctx, |_ctx| async { Err::<(), _>(InsufficientFunds) })
//!     .await;
//!
//! let err = result.unwrap_err();
//! assert!(matches!(err, Error::Run(_)));
//! assert!(err.find_cause::<InsufficientFunds>().is_some());
//! # }
//! ```
//!
//! ## How It Works
//!
//! 1. **Context**: An immutable, type-keyed value chain passed to every call
//! 2. **Carrier**: `with_transaction` stores the open transaction under a private key
//! 3. **Routing**: `TxPool::querier` picks the carried transaction or falls back to the pool
//! 4. **Lifecycle**: `TxPool::transaction` begins, runs the closure, commits or rolls back
//!
//! ## Limitations
//!
//! - Calling `transaction` inside another `transaction` starts a second, independent
//!   transaction; it does not join the outer one or use savepoints
//! - A transaction handle runs one statement at a time. While a `Rows` stream from it
//!   is open, other statements, commit and rollback fail with `Error::TxBusy`
//! - Only MySQL ships as a provider (other databases plug in through `Provider`)
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod ambient;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod mysql;
pub mod querier;

#[cfg(feature = "anyhow")]
pub mod anyhow_compat;

#[cfg(test)]
mod testing;

pub use ambient::with_transaction;
pub use config::Config;
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use executor::TxPool;
pub use mysql::{MySqlBackend, MySqlTx};
pub use querier::{Backend, Provider, Querier, Rows, SingleRow, TxHandle};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::ambient::with_transaction;
    pub use crate::context::Context;
    pub use crate::error::{Error, Result};
    pub use crate::executor::TxPool;
    pub use crate::querier::{Provider, Querier, TxHandle};
}
