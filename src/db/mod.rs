pub mod models;
pub mod store;

pub use store::GameStore;

/// Fresh single-connection in-memory database with the full schema applied.
/// SQLite gives every connection its own `:memory:` database, so the pool is
/// capped at one connection.
#[cfg(test)]
pub async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}
