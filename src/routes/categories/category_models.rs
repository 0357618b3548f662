use crate::models::category::Category;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize)]
pub struct StoreCategoryRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Category row joined with its live-task count for the index view.
#[derive(FromRow)]
pub struct CategoryWithCount {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub created_at: chrono::NaiveDateTime,
    pub tasks_count: i64,
}

#[derive(Serialize)]
pub struct CategoryResource {
    pub id: i64,
    pub name: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_count: Option<i64>,
    pub created_at: String,
}

impl CategoryResource {
    pub fn from_category(category: &Category) -> Self {
        CategoryResource {
            id: category.id,
            name: category.name.clone(),
            color: category.color.clone(),
            tasks_count: None,
            created_at: category.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn from_counted(counted: &CategoryWithCount) -> Self {
        CategoryResource {
            id: counted.id,
            name: counted.name.clone(),
            color: counted.color.clone(),
            tasks_count: Some(counted.tasks_count),
            created_at: counted.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct CategoryEnvelope {
    pub data: CategoryResource,
}

#[derive(Serialize)]
pub struct CategoryListResponse {
    pub data: Vec<CategoryResource>,
}
