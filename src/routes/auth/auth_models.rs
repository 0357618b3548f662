use crate::models::user::User;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_confirmation: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct UserResource {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

impl UserResource {
    pub fn from_user(user: &User) -> Self {
        UserResource {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: user.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: UserResource,
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Serialize)]
pub struct UserEnvelope {
    pub user: UserResource,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}
