use sqlx::mysql::MySqlArguments;
use sqlx::{Arguments, MySqlPool};
use sqlx_txpool::{with_transaction, Config, Context, Provider, TxHandle, TxPool};
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Db = TxPool<MySqlPool>;

// Repository functions only take a context. They do not know whether they
// run inside a transaction.

async fn insert_user(db: &Db, ctx: &Context, name: &str, email: &str) -> Result<i64, BoxError> {
    let mut args = MySqlArguments::default();
    args.add(name)?;
    args.add(email)?;
    let result = db
        .execute(ctx, "INSERT INTO users (name, email) VALUES (?, ?)", args)
        .await?;
    Ok(result.last_insert_id() as i64)
}

async fn insert_audit(db: &Db, ctx: &Context, user_id: i64, action: &str) -> Result<(), BoxError> {
    let mut args = MySqlArguments::default();
    args.add(user_id)?;
    args.add(action)?;
    db.execute(ctx, "INSERT INTO audit_log (user_id, action) VALUES (?, ?)", args)
        .await?;
    Ok(())
}

// A service function composed from repository calls
async fn register(db: &Db, ctx: &Context, name: &str, email: &str) -> Result<i64, BoxError> {
    let user_id = insert_user(db, ctx, name, email).await?;
    insert_audit(db, ctx, user_id, "User created").await?;
    Ok(user_id)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|_| Config::new("mysql://localhost/test"));
    let db = config.connect().await?;
    let ctx = Context::background();

    println!("=== Ambient Transaction Example ===\n");

    // Example 1: Deep call chains share one transaction
    println!("1. Registering a user through a service call...");
    let user_id = db
        .transaction(&ctx, |ctx| {
            let db = db.clone();
            async move { register(&db, &ctx, "David", "david@example.com").await }
        })
        .await?;
    println!("   ✓ User {} and audit row committed together\n", user_id);

    // Example 2: A failure deep in the chain rolls back everything
    println!("2. Failing audit rolls back the user as well...");
    let result = db
        .transaction(&ctx, |ctx| {
            let db = db.clone();
            async move {
                let user_id = insert_user(&db, &ctx, "Eve", "eve@example.com").await?;
                insert_audit(&db, &ctx, user_id, "User created").await?;
                db.execute(
                    &ctx,
                    "INSERT INTO non_existent_table VALUES (1)",
                    MySqlArguments::default(),
                )
                .await?;
                Ok::<_, BoxError>(())
            }
        })
        .await;
    match result {
        Ok(_) => println!("   ✗ Transaction should have failed!"),
        Err(e) => println!("   ✓ Rolled back: {}\n", e),
    }

    // Example 3: Driving the transaction by hand
    println!("3. Managing begin/commit manually...");
    let tx = Arc::new(Provider::begin(db.pool(), &ctx).await?);
    let tx_ctx = with_transaction(&ctx, Arc::clone(&tx));
    let user_id = register(&db, &tx_ctx, "Frank", "frank@example.com").await?;
    tx.commit(&ctx).await?;
    println!("   ✓ User {} committed manually\n", user_id);

    // Example 4: Nested `transaction` calls are independent
    println!("4. Nested transaction calls do not join the outer one...");
    let result = db
        .transaction(&ctx, |ctx| {
            let db = db.clone();
            async move {
                insert_user(&db, &ctx, "Grace", "grace@example.com").await?;

                // Commits on its own, even though the outer transaction fails below
                db.transaction(&ctx, |inner| {
                    let db = db.clone();
                    async move { insert_user(&db, &inner, "Heidi", "heidi@example.com").await }
                })
                .await?;

                Err::<(), BoxError>("outer transaction aborted".into())
            }
        })
        .await;
    if let Err(e) = result {
        println!("   Outer: {}", e);
    }
    println!("   ✓ Heidi was committed, Grace was rolled back\n");

    println!("=== All ambient transaction examples completed ===");

    db.pool().close().await;
    Ok(())
}
