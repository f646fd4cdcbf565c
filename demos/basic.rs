use sqlx::mysql::MySqlArguments;
use sqlx::{Arguments, Row};
use sqlx_txpool::{Config, Context};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn args(values: &[&str]) -> Result<MySqlArguments, BoxError> {
    let mut args = MySqlArguments::default();
    for value in values {
        args.add(*value)?;
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let config = Config::from_env().unwrap_or_else(|_| Config::new("mysql://localhost/test"));
    let db = config.connect().await?;
    let ctx = Context::background();

    println!("=== Basic Transaction Example ===\n");

    // Example 1: Outside a transaction, statements go straight to the pool
    println!("1. Creating a user without a transaction...");
    db.execute(
        &ctx,
        "INSERT INTO users (name, email) VALUES (?, ?)",
        args(&["Alice", "alice@example.com"])?,
    )
    .await?;
    println!("   ✓ User created successfully\n");

    // Example 2: Multiple operations in one transaction
    println!("2. Creating user with profile...");
    let user_id = db
        .transaction(&ctx, |ctx| {
            let db = db.clone();
            async move {
                let result = db
                    .execute(
                        &ctx,
                        "INSERT INTO users (name, email) VALUES (?, ?)",
                        args(&["Bob", "bob@example.com"])?,
                    )
                    .await?;
                let user_id = result.last_insert_id() as i64;

                // Same context, so same transaction
                let mut profile = MySqlArguments::default();
                profile.add(user_id)?;
                profile.add("Software Developer")?;
                db.execute(&ctx, "INSERT INTO profiles (user_id, bio) VALUES (?, ?)", profile)
                    .await?;

                Ok::<_, BoxError>(user_id)
            }
        })
        .await?;
    println!("   ✓ User and profile created with ID: {}\n", user_id);

    // Example 3: A failing closure rolls everything back
    println!("3. Demonstrating rollback on error...");
    let result = db
        .transaction(&ctx, |ctx| {
            let db = db.clone();
            async move {
                db.execute(
                    &ctx,
                    "INSERT INTO users (name, email) VALUES (?, ?)",
                    args(&["Charlie", "charlie@example.com"])?,
                )
                .await?;

                // This will cause a rollback
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
        Err(e) => println!("   ✓ Transaction rolled back: {}\n", e),
    }

    // Example 4: Reading back through the pool
    println!("4. Counting users...");
    let count: i64 = db
        .query_row(&ctx, "SELECT COUNT(*) FROM users", MySqlArguments::default())
        .await
        .row()?
        .try_get(0)?;
    println!("   ✓ {} users in the table\n", count);

    println!("=== All examples completed ===");

    db.pool().close().await;
    Ok(())
}
