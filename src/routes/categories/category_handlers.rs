use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use log::{error, info};
use sqlx::SqlitePool;

use super::category_models::{
    CategoryEnvelope, CategoryListResponse, CategoryResource, CategoryWithCount,
    StoreCategoryRequest,
};
use crate::auth;
use crate::models::category::Category;
use crate::rate_limit::{self, RateLimiter, API_LIMIT, WINDOW};
use crate::validation::ValidationErrors;

fn server_error() -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(serde_json::json!({ "message": "Internal server error" }))
}

fn category_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "message": "Category not found" }))
}

async fn guard(
    pool: &SqlitePool,
    limiter: &RateLimiter,
    req: &HttpRequest,
) -> Result<(), HttpResponse> {
    let user = auth::require_user(pool, req).await?;
    limiter
        .check("api", &auth::client_key(req, Some(&user)), API_LIMIT, WINDOW)
        .map_err(|retry| {
            rate_limit::too_many_requests("Too many requests. Please slow down.", retry)
        })
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Categories are shared across users, so the index is not scoped.
/// Counts ignore soft-deleted tasks.
pub async fn index(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
) -> impl Responder {
    if let Err(response) = guard(pool.get_ref(), &limiter, &req).await {
        return response;
    }

    let categories = sqlx::query_as::<_, CategoryWithCount>(
        "SELECT c.id, c.name, c.color, c.created_at,
                (SELECT COUNT(*) FROM category_task ct
                 JOIN tasks t ON t.id = ct.task_id
                 WHERE ct.category_id = c.id AND t.deleted_at IS NULL) AS tasks_count
         FROM categories c
         ORDER BY c.id",
    )
    .fetch_all(pool.get_ref())
    .await;

    match categories {
        Ok(categories) => HttpResponse::Ok().json(CategoryListResponse {
            data: categories.iter().map(CategoryResource::from_counted).collect(),
        }),
        Err(e) => {
            error!("Failed to list categories: {}", e);
            server_error()
        }
    }
}

pub async fn store(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
    body: web::Json<StoreCategoryRequest>,
) -> impl Responder {
    if let Err(response) = guard(pool.get_ref(), &limiter, &req).await {
        return response;
    }

    let mut errors = ValidationErrors::new();

    let name = body.name.as_deref().unwrap_or("").trim().to_string();
    if name.is_empty() {
        errors.add("name", "The name field is required.");
    } else if name.len() > 255 {
        errors.add("name", "The name may not be greater than 255 characters.");
    } else {
        let taken: Result<i64, _> =
            sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE name = ?")
                .bind(&name)
                .fetch_one(pool.get_ref())
                .await;
        match taken {
            Ok(0) => {}
            Ok(_) => errors.add("name", "The name has already been taken."),
            Err(e) => {
                error!("Failed to check category name uniqueness: {}", e);
                return server_error();
            }
        }
    }

    let color = body.color.as_deref().unwrap_or("").trim().to_string();
    if color.is_empty() {
        errors.add("color", "The color field is required.");
    } else if !is_hex_color(&color) {
        errors.add("color", "The color field must be a valid hex color code.");
    }

    if !errors.is_empty() {
        return errors.into_response();
    }

    let now = Utc::now().naive_utc();
    let inserted = sqlx::query("INSERT INTO categories (name, color, created_at) VALUES (?, ?, ?)")
        .bind(&name)
        .bind(&color)
        .bind(now)
        .execute(pool.get_ref())
        .await;

    match inserted {
        Ok(result) => {
            info!("Category {} created", name);
            HttpResponse::Created().json(CategoryEnvelope {
                data: CategoryResource {
                    id: result.last_insert_rowid(),
                    name,
                    color,
                    tasks_count: None,
                    created_at: now.format("%Y-%m-%d %H:%M:%S").to_string(),
                },
            })
        }
        Err(e) => {
            error!("Failed to create category {}: {}", name, e);
            server_error()
        }
    }
}

pub async fn show(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> impl Responder {
    if let Err(response) = guard(pool.get_ref(), &limiter, &req).await {
        return response;
    }

    let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?")
        .bind(*path)
        .fetch_optional(pool.get_ref())
        .await;

    match category {
        Ok(Some(category)) => HttpResponse::Ok().json(CategoryEnvelope {
            data: CategoryResource::from_category(&category),
        }),
        Ok(None) => category_not_found(),
        Err(e) => {
            error!("Failed to fetch category {}: {}", *path, e);
            server_error()
        }
    }
}
