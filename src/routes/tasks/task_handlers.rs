use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{NaiveDate, Utc};
use log::{error, info};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;

use super::task_models::{
    ListTasksQuery, MessageResponse, PageMeta, StatisticsResponse, StoreTaskRequest, TaskEnvelope,
    TaskListResponse, TaskResource, UpdateTaskRequest,
};
use crate::audit::AuditSink;
use crate::auth;
use crate::models::task::{Task, TaskPriority, TaskStatus};
use crate::query::{self, SortKey, SortOrder, TaskQuery, Trashed, DEFAULT_PER_PAGE};
use crate::rate_limit::{self, RateLimiter, API_LIMIT, HEAVY_LIMIT, WINDOW};
use crate::validation::ValidationErrors;

fn server_error() -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(serde_json::json!({ "message": "Internal server error" }))
}

/// Tasks owned by someone else get the same response as tasks that do
/// not exist.
fn task_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "message": "Task not found" }))
}

fn check_api_limit(
    limiter: &RateLimiter,
    req: &HttpRequest,
    user: &crate::models::user::User,
) -> Result<(), HttpResponse> {
    limiter
        .check("api", &auth::client_key(req, Some(user)), API_LIMIT, WINDOW)
        .map_err(|retry| {
            rate_limit::too_many_requests("Too many requests. Please slow down.", retry)
        })
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn validate_title(title: &str, errors: &mut ValidationErrors) {
    if title.trim().is_empty() {
        errors.add("title", "The title field is required.");
    } else if title.len() > 255 {
        errors.add("title", "The title may not be greater than 255 characters.");
    }
}

fn parse_due_date(value: &str, errors: &mut ValidationErrors) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => {
            if date <= Utc::now().date_naive() {
                errors.add("due_date", "The due date field must be a date after today.");
                None
            } else {
                Some(date)
            }
        }
        Err(_) => {
            errors.add("due_date", "The due date field must be a valid date.");
            None
        }
    }
}

/// Assigned category ids must exist at write time. Filter values are
/// deliberately not checked this way.
async fn validate_category_ids(
    pool: &SqlitePool,
    ids: &[i64],
    errors: &mut ValidationErrors,
) -> sqlx::Result<()> {
    for (index, id) in ids.iter().enumerate() {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if count == 0 {
            errors.add(
                format!("categories.{}", index),
                format!("The selected categories.{} is invalid.", index),
            );
        }
    }
    Ok(())
}

/// Replaces a task's category set. `INSERT OR IGNORE` keeps duplicate
/// ids in the request a no-op.
async fn sync_categories(pool: &SqlitePool, task_id: i64, ids: &[i64]) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM category_task WHERE task_id = ?")
        .bind(task_id)
        .execute(pool)
        .await?;
    for id in ids {
        sqlx::query("INSERT OR IGNORE INTO category_task (task_id, category_id) VALUES (?, ?)")
            .bind(task_id)
            .bind(id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn task_resource(pool: &SqlitePool, task: &Task) -> sqlx::Result<TaskResource> {
    let categories = query::task_categories(pool, task.id).await?;
    Ok(TaskResource::from_task(task, &categories, Utc::now().date_naive()))
}

async fn fetch_task_row(pool: &SqlitePool, task_id: i64) -> sqlx::Result<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_one(pool)
        .await
}

pub async fn index(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
    params: web::Query<ListTasksQuery>,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(response) = check_api_limit(&limiter, &req, &user) {
        return response;
    }

    let mut errors = ValidationErrors::new();

    let status = match filled(&params.status) {
        Some(value) => match TaskStatus::parse(value) {
            Some(status) => Some(status),
            None => {
                errors.add("status", "The selected status is invalid.");
                None
            }
        },
        None => None,
    };
    let priority = match filled(&params.priority) {
        Some(value) => match TaskPriority::parse(value) {
            Some(priority) => Some(priority),
            None => {
                errors.add("priority", "The selected priority is invalid.");
                None
            }
        },
        None => None,
    };
    let category_id = match filled(&params.category) {
        Some(value) => match value.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add("category", "The category field must be an integer.");
                None
            }
        },
        None => None,
    };

    if !errors.is_empty() {
        return errors.into_response();
    }

    let task_query = TaskQuery {
        status,
        priority,
        category_id,
        search: filled(&params.search).map(|s| s.to_string()),
        sort_by: filled(&params.sort_by).map(SortKey::parse).unwrap_or(SortKey::CreatedAt),
        sort_order: filled(&params.sort_order)
            .map(SortOrder::parse)
            .unwrap_or(SortOrder::Desc),
        page: filled(&params.page).and_then(|v| v.parse().ok()).unwrap_or(1),
        per_page: filled(&params.per_page)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PER_PAGE),
    };

    let page = match query::list_tasks(pool.get_ref(), user.id, &task_query).await {
        Ok(page) => page,
        Err(e) => {
            error!("Failed to list tasks for user {}: {}", user.id, e);
            return server_error();
        }
    };

    let mut data = Vec::with_capacity(page.tasks.len());
    for task in &page.tasks {
        match task_resource(pool.get_ref(), task).await {
            Ok(resource) => data.push(resource),
            Err(e) => {
                error!("Failed to load categories for task {}: {}", task.id, e);
                return server_error();
            }
        }
    }

    HttpResponse::Ok().json(TaskListResponse {
        data,
        meta: PageMeta::from_page(&page),
    })
}

pub async fn store(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    audit: web::Data<dyn AuditSink>,
    req: HttpRequest,
    body: web::Json<StoreTaskRequest>,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(response) = check_api_limit(&limiter, &req, &user) {
        return response;
    }

    let mut errors = ValidationErrors::new();

    let title = body.title.as_deref().unwrap_or("").trim();
    validate_title(title, &mut errors);

    let priority = match body.priority.as_deref() {
        Some(value) => match TaskPriority::parse(value) {
            Some(priority) => Some(priority),
            None => {
                errors.add("priority", "The selected priority is invalid.");
                None
            }
        },
        None => {
            errors.add("priority", "The priority field is required.");
            None
        }
    };
    let status = match body.status.as_deref() {
        Some(value) => match TaskStatus::parse(value) {
            Some(status) => Some(status),
            None => {
                errors.add("status", "The selected status is invalid.");
                None
            }
        },
        None => {
            errors.add("status", "The status field is required.");
            None
        }
    };

    let due_date = match body.due_date.as_deref() {
        Some(value) => parse_due_date(value, &mut errors),
        None => None,
    };

    let category_ids = body.categories.clone().unwrap_or_default();
    if let Err(e) = validate_category_ids(pool.get_ref(), &category_ids, &mut errors).await {
        error!("Failed to validate categories: {}", e);
        return server_error();
    }

    let (priority, status) = match (priority, status) {
        (Some(priority), Some(status)) if errors.is_empty() => (priority, status),
        _ => return errors.into_response(),
    };

    let now = Utc::now().naive_utc();
    let inserted = sqlx::query(
        "INSERT INTO tasks (user_id, title, description, priority, status, due_date, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user.id)
    .bind(title)
    .bind(body.description.as_deref())
    .bind(priority)
    .bind(status)
    .bind(due_date)
    .bind(now)
    .bind(now)
    .execute(pool.get_ref())
    .await;

    let task_id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        Err(e) => {
            error!("Failed to create task for user {}: {}", user.id, e);
            return server_error();
        }
    };

    // The task row and its pivot rows are separate statements, not one
    // transaction.
    if !category_ids.is_empty() {
        if let Err(e) = sync_categories(pool.get_ref(), task_id, &category_ids).await {
            error!("Failed to attach categories to task {}: {}", task_id, e);
            return server_error();
        }
    }

    let task = match fetch_task_row(pool.get_ref(), task_id).await {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to reload task {}: {}", task_id, e);
            return server_error();
        }
    };

    audit.task_created(&task);
    info!("User {} created task {}", user.id, task.id);

    match task_resource(pool.get_ref(), &task).await {
        Ok(resource) => HttpResponse::Created().json(TaskEnvelope {
            data: resource,
            message: None,
        }),
        Err(e) => {
            error!("Failed to load categories for task {}: {}", task.id, e);
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
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(response) = check_api_limit(&limiter, &req, &user) {
        return response;
    }

    let task = match query::find_task(pool.get_ref(), user.id, *path, Trashed::Exclude).await {
        Ok(Some(task)) => task,
        Ok(None) => return task_not_found(),
        Err(e) => {
            error!("Failed to fetch task {}: {}", *path, e);
            return server_error();
        }
    };

    match task_resource(pool.get_ref(), &task).await {
        Ok(resource) => HttpResponse::Ok().json(TaskEnvelope {
            data: resource,
            message: None,
        }),
        Err(e) => {
            error!("Failed to load categories for task {}: {}", task.id, e);
            server_error()
        }
    }
}

pub async fn update(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    audit: web::Data<dyn AuditSink>,
    req: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<UpdateTaskRequest>,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(response) = check_api_limit(&limiter, &req, &user) {
        return response;
    }

    let mut errors = ValidationErrors::new();

    let title = body.title.as_deref().map(str::trim);
    if let Some(title) = title {
        validate_title(title, &mut errors);
    }
    let priority = match body.priority.as_deref() {
        Some(value) => match TaskPriority::parse(value) {
            Some(priority) => Some(priority),
            None => {
                errors.add("priority", "The selected priority is invalid.");
                None
            }
        },
        None => None,
    };
    let status = match body.status.as_deref() {
        Some(value) => match TaskStatus::parse(value) {
            Some(status) => Some(status),
            None => {
                errors.add("status", "The selected status is invalid.");
                None
            }
        },
        None => None,
    };
    let due_date = match &body.due_date {
        Some(Some(value)) => parse_due_date(value, &mut errors).map(Some),
        Some(None) => Some(None),
        None => None,
    };
    let category_ids = match &body.categories {
        Some(ids) => Some(ids.clone().unwrap_or_default()),
        None => None,
    };
    if let Some(ids) = &category_ids {
        if let Err(e) = validate_category_ids(pool.get_ref(), ids, &mut errors).await {
            error!("Failed to validate categories: {}", e);
            return server_error();
        }
    }

    if !errors.is_empty() {
        return errors.into_response();
    }

    let task = match query::find_task(pool.get_ref(), user.id, *path, Trashed::Exclude).await {
        Ok(Some(task)) => task,
        Ok(None) => return task_not_found(),
        Err(e) => {
            error!("Failed to fetch task {}: {}", *path, e);
            return server_error();
        }
    };

    // Diff of row fields only; category changes are synced but not part
    // of the audit diff.
    let mut changes: Map<String, Value> = Map::new();

    let mut new_title = task.title.clone();
    if let Some(title) = title {
        if title != task.title {
            changes.insert("title".to_string(), json!(title));
            new_title = title.to_string();
        }
    }
    let mut new_description = task.description.clone();
    if let Some(description) = &body.description {
        if *description != task.description {
            changes.insert("description".to_string(), json!(description));
            new_description = description.clone();
        }
    }
    let mut new_priority = task.priority;
    if let Some(priority) = priority {
        if priority != task.priority {
            changes.insert("priority".to_string(), json!(priority.as_str()));
            new_priority = priority;
        }
    }
    let mut new_status = task.status;
    if let Some(status) = status {
        if status != task.status {
            changes.insert("status".to_string(), json!(status.as_str()));
            new_status = status;
        }
    }
    let mut new_due_date = task.due_date;
    if let Some(due_date) = due_date {
        if due_date != task.due_date {
            changes.insert(
                "due_date".to_string(),
                json!(due_date.map(|d| d.format("%Y-%m-%d").to_string())),
            );
            new_due_date = due_date;
        }
    }

    if !changes.is_empty() {
        let updated = sqlx::query(
            "UPDATE tasks
             SET title = ?, description = ?, priority = ?, status = ?, due_date = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&new_title)
        .bind(new_description.as_deref())
        .bind(new_priority)
        .bind(new_status)
        .bind(new_due_date)
        .bind(Utc::now().naive_utc())
        .bind(task.id)
        .execute(pool.get_ref())
        .await;
        if let Err(e) = updated {
            error!("Failed to update task {}: {}", task.id, e);
            return server_error();
        }
    }

    if let Some(ids) = &category_ids {
        if let Err(e) = sync_categories(pool.get_ref(), task.id, ids).await {
            error!("Failed to sync categories for task {}: {}", task.id, e);
            return server_error();
        }
    }

    let task = match fetch_task_row(pool.get_ref(), task.id).await {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to reload task {}: {}", task.id, e);
            return server_error();
        }
    };

    if !changes.is_empty() {
        audit.task_updated(&task, &changes);
    }

    match task_resource(pool.get_ref(), &task).await {
        Ok(resource) => HttpResponse::Ok().json(TaskEnvelope {
            data: resource,
            message: None,
        }),
        Err(e) => {
            error!("Failed to load categories for task {}: {}", task.id, e);
            server_error()
        }
    }
}

pub async fn destroy(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    audit: web::Data<dyn AuditSink>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(response) = check_api_limit(&limiter, &req, &user) {
        return response;
    }

    let task = match query::find_task(pool.get_ref(), user.id, *path, Trashed::Exclude).await {
        Ok(Some(task)) => task,
        Ok(None) => return task_not_found(),
        Err(e) => {
            error!("Failed to fetch task {}: {}", *path, e);
            return server_error();
        }
    };

    let now = Utc::now().naive_utc();
    let deleted = sqlx::query("UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(task.id)
        .execute(pool.get_ref())
        .await;
    if let Err(e) = deleted {
        error!("Failed to delete task {}: {}", task.id, e);
        return server_error();
    }

    audit.task_deleted(&task);
    info!("User {} deleted task {}", user.id, task.id);

    HttpResponse::Ok().json(MessageResponse {
        message: "Task deleted successfully".to_string(),
    })
}

pub async fn restore(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    audit: web::Data<dyn AuditSink>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(response) = check_api_limit(&limiter, &req, &user) {
        return response;
    }

    // The only path that looks through the soft-delete marker.
    let task = match query::find_task(pool.get_ref(), user.id, *path, Trashed::Include).await {
        Ok(Some(task)) => task,
        Ok(None) => return task_not_found(),
        Err(e) => {
            error!("Failed to fetch task {}: {}", *path, e);
            return server_error();
        }
    };

    let restored = sqlx::query("UPDATE tasks SET deleted_at = NULL, updated_at = ? WHERE id = ?")
        .bind(Utc::now().naive_utc())
        .bind(task.id)
        .execute(pool.get_ref())
        .await;
    if let Err(e) = restored {
        error!("Failed to restore task {}: {}", task.id, e);
        return server_error();
    }

    let task = match fetch_task_row(pool.get_ref(), task.id).await {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to reload task {}: {}", task.id, e);
            return server_error();
        }
    };

    audit.task_restored(&task);
    info!("User {} restored task {}", user.id, task.id);

    match task_resource(pool.get_ref(), &task).await {
        Ok(resource) => HttpResponse::Ok().json(TaskEnvelope {
            data: resource,
            message: Some("Task restored successfully".to_string()),
        }),
        Err(e) => {
            error!("Failed to load categories for task {}: {}", task.id, e);
            server_error()
        }
    }
}

pub async fn statistics(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    // The most expensive query path gets the tightest window.
    if let Err(retry) =
        limiter.check("heavy", &auth::client_key(&req, Some(&user)), HEAVY_LIMIT, WINDOW)
    {
        return rate_limit::too_many_requests(
            "Too many heavy requests. This endpoint is rate-limited to 10 requests per minute.",
            retry,
        );
    }

    match query::task_statistics(pool.get_ref(), user.id, Utc::now().date_naive()).await {
        Ok(stats) => HttpResponse::Ok().json(StatisticsResponse::from_statistics(&stats)),
        Err(e) => {
            error!("Failed to compute statistics for user {}: {}", user.id, e);
            server_error()
        }
    }
}
