use crate::audit::testing::MemoryAudit;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Fresh in-memory database with the embedded migrations applied. A single
/// connection keeps every query on the same in-memory store.
pub async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to run migrations");
    pool
}

pub async fn context() -> (SqlitePool, Arc<MemoryAudit>) {
    (pool().await, Arc::new(MemoryAudit::default()))
}

/// Builds the service under test with the same wiring `main` uses, but a
/// capturing audit sink and a fresh rate limiter.
#[macro_export]
macro_rules! test_app {
    ($pool:expr, $audit:expr) => {{
        let audit_sink: std::sync::Arc<dyn $crate::audit::AuditSink> = $audit.clone();
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($pool.clone()))
                .app_data(actix_web::web::Data::new($crate::rate_limit::RateLimiter::new()))
                .app_data(actix_web::web::Data::from(audit_sink))
                .configure($crate::routes::routes::auth_configure)
                .configure($crate::routes::routes::tasks_configure)
                .configure($crate::routes::routes::categories_configure),
        )
        .await
    }};
}

// Spaces creation timestamps apart so created_at ordering is deterministic
// even when fixtures are inserted within the same second.
static CLOCK_SKEW: AtomicI64 = AtomicI64::new(0);

fn next_timestamp() -> chrono::NaiveDateTime {
    let offset = CLOCK_SKEW.fetch_add(1, Ordering::Relaxed);
    Utc::now().naive_utc() + Duration::seconds(offset)
}

pub async fn create_user(pool: &SqlitePool, name: &str, email: &str) -> i64 {
    let now = next_timestamp();
    let result = sqlx::query(
        "INSERT INTO users (name, email, password_hash, created_at, updated_at)
         VALUES (?, ?, 'not-a-real-hash', ?, ?)",
    )
    .bind(name)
    .bind(email)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("failed to insert user");
    result.last_insert_rowid()
}

pub async fn create_task(
    pool: &SqlitePool,
    user_id: i64,
    title: &str,
    status: &str,
    priority: &str,
    due_date: Option<&str>,
) -> i64 {
    let now = next_timestamp();
    let result = sqlx::query(
        "INSERT INTO tasks (user_id, title, priority, status, due_date, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(title)
    .bind(priority)
    .bind(status)
    .bind(due_date)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("failed to insert task");
    result.last_insert_rowid()
}

pub async fn create_category(pool: &SqlitePool, name: &str, color: &str) -> i64 {
    let result = sqlx::query("INSERT INTO categories (name, color, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(color)
        .bind(next_timestamp())
        .execute(pool)
        .await
        .expect("failed to insert category");
    result.last_insert_rowid()
}

pub async fn attach_category(pool: &SqlitePool, task_id: i64, category_id: i64) {
    sqlx::query("INSERT OR IGNORE INTO category_task (task_id, category_id) VALUES (?, ?)")
        .bind(task_id)
        .bind(category_id)
        .execute(pool)
        .await
        .expect("failed to attach category");
}

/// Bearer token minted directly against the store, skipping the bcrypt
/// work of a full register round trip.
pub async fn token_for(pool: &SqlitePool, user_id: i64) -> String {
    crate::auth::issue_token(pool, user_id)
        .await
        .expect("failed to issue token")
}
