use actix_web::{web, App, HttpResponse, HttpServer};
use dotenv::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;
use std::sync::Arc;

mod audit;
mod auth;
mod models;
mod query;
mod rate_limit;
mod routes;
mod validation;

#[cfg(test)]
mod test_util;

use audit::{AuditSink, LogAudit};
use rate_limit::RateLimiter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:taskflow.db?mode=rwc".to_string());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to create pool");
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let limiter = web::Data::new(RateLimiter::new());
    let audit_sink: Arc<dyn AuditSink> = Arc::new(LogAudit);
    let audit_sink = web::Data::from(audit_sink);

    let server_address = "0.0.0.0:8080";
    println!("Server running at http://{}", server_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(limiter.clone())
            .app_data(audit_sink.clone())
            .route(
                "/",
                web::get().to(|| async { HttpResponse::Ok().body("TaskFlow API") }),
            )
            .configure(routes::routes::auth_configure)
            .configure(routes::routes::tasks_configure)
            .configure(routes::routes::categories_configure)
    })
    .bind(server_address)?
    .run()
    .await
}
