use actix_web::{web, HttpRequest, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use log::{error, info};
use sqlx::SqlitePool;

use super::auth_models::{
    AuthResponse, LoginRequest, MessageResponse, RegisterRequest, UserEnvelope, UserResource,
};
use crate::auth;
use crate::models::user::User;
use crate::rate_limit::{self, RateLimiter, API_LIMIT, AUTH_LIMIT, WINDOW};
use crate::validation::ValidationErrors;

fn server_error() -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(serde_json::json!({ "message": "Internal server error" }))
}

/// Generic 422 for any login failure so the response never reveals
/// whether the email exists.
fn invalid_credentials() -> HttpResponse {
    HttpResponse::UnprocessableEntity().json(serde_json::json!({
        "message": "The provided credentials are incorrect.",
        "errors": { "email": ["The provided credentials are incorrect."] },
    }))
}

fn check_auth_limit(limiter: &RateLimiter, req: &HttpRequest) -> Result<(), HttpResponse> {
    let ip = auth::client_ip(req);
    limiter.check("auth", &ip, AUTH_LIMIT, WINDOW).map_err(|retry| {
        rate_limit::too_many_requests(
            "Too many authentication attempts. Please try again later.",
            retry,
        )
    })
}

pub async fn register(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    if let Err(response) = check_auth_limit(&limiter, &req) {
        return response;
    }

    let mut errors = ValidationErrors::new();

    let name = body.name.as_deref().unwrap_or("").trim().to_string();
    if name.is_empty() {
        errors.add("name", "The name field is required.");
    } else if name.len() > 255 {
        errors.add("name", "The name may not be greater than 255 characters.");
    }

    let email = body.email.as_deref().unwrap_or("").trim().to_lowercase();
    if email.is_empty() {
        errors.add("email", "The email field is required.");
    } else if email.len() > 255 {
        errors.add("email", "The email may not be greater than 255 characters.");
    } else if !email.contains('@') {
        errors.add("email", "The email field must be a valid email address.");
    } else {
        let taken: Result<i64, _> =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
                .bind(&email)
                .fetch_one(pool.get_ref())
                .await;
        match taken {
            Ok(0) => {}
            Ok(_) => errors.add("email", "The email has already been taken."),
            Err(e) => {
                error!("Failed to check email uniqueness: {}", e);
                return server_error();
            }
        }
    }

    let password = body.password.as_deref().unwrap_or("");
    if password.is_empty() {
        errors.add("password", "The password field is required.");
    } else if password.len() < 8 {
        errors.add("password", "The password field must be at least 8 characters.");
    } else if Some(password) != body.password_confirmation.as_deref() {
        errors.add("password", "The password field confirmation does not match.");
    }

    if !errors.is_empty() {
        return errors.into_response();
    }

    let password_hash = match hash(password, DEFAULT_COST) {
        Ok(hashed) => hashed,
        Err(e) => {
            error!("Failed to hash password: {}", e);
            return server_error();
        }
    };

    let now = Utc::now().naive_utc();
    let inserted = sqlx::query(
        "INSERT INTO users (name, email, password_hash, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&name)
    .bind(&email)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(pool.get_ref())
    .await;

    let user_id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        Err(e) => {
            error!("Failed to register user {}: {}", email, e);
            return server_error();
        }
    };

    let token = match auth::issue_token(pool.get_ref(), user_id).await {
        Ok(token) => token,
        Err(e) => {
            error!("Failed to issue token for user {}: {}", user_id, e);
            return server_error();
        }
    };

    info!("User {} registered successfully", email);
    HttpResponse::Created().json(AuthResponse {
        message: "User registered successfully".to_string(),
        user: UserResource {
            id: user_id,
            name,
            email,
            created_at: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        },
        access_token: token,
        token_type: "Bearer",
    })
}

pub async fn login(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
    body: web::Json<LoginRequest>,
) -> impl Responder {
    if let Err(response) = check_auth_limit(&limiter, &req) {
        return response;
    }

    let mut errors = ValidationErrors::new();
    let email = body.email.as_deref().unwrap_or("").trim().to_lowercase();
    if email.is_empty() {
        errors.add("email", "The email field is required.");
    }
    let password = body.password.as_deref().unwrap_or("");
    if password.is_empty() {
        errors.add("password", "The password field is required.");
    }
    if !errors.is_empty() {
        return errors.into_response();
    }

    let user = match sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool.get_ref())
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!("Login attempt for unknown email");
            return invalid_credentials();
        }
        Err(e) => {
            error!("Failed to fetch user for login: {}", e);
            return server_error();
        }
    };

    match verify(password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            info!("Invalid password for user {}", user.id);
            return invalid_credentials();
        }
        Err(e) => {
            error!("Failed to verify password for user {}: {}", user.id, e);
            return server_error();
        }
    }

    // A fresh login invalidates every previously issued token.
    if let Err(e) = auth::revoke_all_tokens(pool.get_ref(), user.id).await {
        error!("Failed to revoke tokens for user {}: {}", user.id, e);
        return server_error();
    }
    let token = match auth::issue_token(pool.get_ref(), user.id).await {
        Ok(token) => token,
        Err(e) => {
            error!("Failed to issue token for user {}: {}", user.id, e);
            return server_error();
        }
    };

    info!("User {} logged in successfully", user.id);
    HttpResponse::Ok().json(AuthResponse {
        message: "Login successful".to_string(),
        user: UserResource::from_user(&user),
        access_token: token,
        token_type: "Bearer",
    })
}

pub async fn logout(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(retry) =
        limiter.check("api", &auth::client_key(&req, Some(&user)), API_LIMIT, WINDOW)
    {
        return rate_limit::too_many_requests("Too many requests. Please slow down.", retry);
    }

    // Only the presented token is revoked; other sessions stay valid.
    let token = match auth::bearer_token(&req) {
        Some(token) => token,
        None => return auth::unauthenticated(),
    };
    if let Err(e) = auth::revoke_token(pool.get_ref(), &token).await {
        error!("Failed to revoke token for user {}: {}", user.id, e);
        return server_error();
    }

    info!("User {} logged out", user.id);
    HttpResponse::Ok().json(MessageResponse {
        message: "Logged out successfully".to_string(),
    })
}

pub async fn current_user(
    pool: web::Data<SqlitePool>,
    limiter: web::Data<RateLimiter>,
    req: HttpRequest,
) -> impl Responder {
    let user = match auth::require_user(pool.get_ref(), &req).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(retry) =
        limiter.check("api", &auth::client_key(&req, Some(&user)), API_LIMIT, WINDOW)
    {
        return rate_limit::too_many_requests("Too many requests. Please slow down.", retry);
    }

    HttpResponse::Ok().json(UserEnvelope {
        user: UserResource::from_user(&user),
    })
}
