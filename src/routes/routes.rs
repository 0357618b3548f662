use actix_web::web;

use super::auth::auth_handlers;
use super::categories::category_handlers;
use super::tasks::task_handlers;

pub fn auth_configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/register", web::post().to(auth_handlers::register))
        .route("/login", web::post().to(auth_handlers::login))
        .route("/logout", web::post().to(auth_handlers::logout))
        .route("/user", web::get().to(auth_handlers::current_user));
}

pub fn tasks_configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tasks")
            // Registered before /{id} so "statistics" is never read as an id.
            .route("/statistics", web::get().to(task_handlers::statistics))
            .route("", web::get().to(task_handlers::index))
            .route("", web::post().to(task_handlers::store))
            .route("/{id}", web::get().to(task_handlers::show))
            .route("/{id}", web::put().to(task_handlers::update))
            .route("/{id}", web::delete().to(task_handlers::destroy))
            .route("/{id}/restore", web::post().to(task_handlers::restore)),
    );
}

pub fn categories_configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/categories")
            .route("", web::get().to(category_handlers::index))
            .route("", web::post().to(category_handlers::store))
            .route("/{id}", web::get().to(category_handlers::show)),
    );
}
