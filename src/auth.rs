use crate::models::user::User;
use actix_web::{HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Extracts the opaque token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolves the acting user from the presented bearer token.
/// `Ok(None)` means the request carries no valid token.
pub async fn authenticate(pool: &SqlitePool, req: &HttpRequest) -> sqlx::Result<Option<User>> {
    let token = match bearer_token(req) {
        Some(token) => token,
        None => return Ok(None),
    };

    sqlx::query_as::<_, User>(
        "SELECT u.id, u.name, u.email, u.password_hash, u.created_at, u.updated_at
         FROM users u
         JOIN access_tokens t ON t.user_id = u.id
         WHERE t.token = ?",
    )
    .bind(&token)
    .fetch_optional(pool)
    .await
}

/// Issues a fresh token for the user and returns its plain-text form.
pub async fn issue_token(pool: &SqlitePool, user_id: i64) -> sqlx::Result<String> {
    let token = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO access_tokens (user_id, token, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(&token)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await?;
    Ok(token)
}

/// Drops every token the user holds. Login calls this so a successful
/// login invalidates all previously issued credentials.
pub async fn revoke_all_tokens(pool: &SqlitePool, user_id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM access_tokens WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drops only the presented token, leaving other sessions intact.
pub async fn revoke_token(pool: &SqlitePool, token: &str) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM access_tokens WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Authenticates the request or produces the response that ends it:
/// 401 for a missing/unknown token, 500 when the store fails.
pub async fn require_user(pool: &SqlitePool, req: &HttpRequest) -> Result<User, HttpResponse> {
    match authenticate(pool, req).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthenticated()),
        Err(e) => {
            log::error!("Failed to resolve bearer token: {}", e);
            Err(HttpResponse::InternalServerError()
                .json(serde_json::json!({ "message": "Internal server error" })))
        }
    }
}

pub fn unauthenticated() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({ "message": "Unauthenticated." }))
}

/// Rate-limit key for authenticated routes: the user id when known,
/// otherwise the client address.
pub fn client_key(req: &HttpRequest, user: Option<&User>) -> String {
    match user {
        Some(user) => format!("user:{}", user.id),
        None => client_ip(req),
    }
}

pub fn client_ip(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .map(strip_port)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Peer addresses arrive as `ip:port` / `[ipv6]:port`, forwarded ones as a
/// bare ip. Only a full socket address gets its port removed; anything else
/// is kept verbatim so IPv6 clients are not collapsed into one key.
fn strip_port(addr: &str) -> String {
    match addr.parse::<std::net::SocketAddr>() {
        Ok(socket) => socket.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_port_keeps_distinct_ipv6_clients_apart() {
        assert_eq!(strip_port("203.0.113.9:443"), "203.0.113.9");
        assert_eq!(strip_port("[::1]:443"), "::1");
        assert_eq!(strip_port("[2001:db8::7]:8080"), "2001:db8::7");
        // Forwarded addresses come without a port and pass through as-is.
        assert_eq!(strip_port("203.0.113.9"), "203.0.113.9");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("2001:db8::7"), "2001:db8::7");
    }

    #[test]
    fn client_ip_uses_the_peer_address() {
        let req = actix_web::test::TestRequest::default()
            .peer_addr("[2001:db8::7]:443".parse().unwrap())
            .to_http_request();
        assert_eq!(client_ip(&req), "2001:db8::7");
    }
}
