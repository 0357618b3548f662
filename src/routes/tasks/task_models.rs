use crate::models::category::Category;
use crate::models::task::Task;
use crate::query::{TaskPage, TaskStatistics};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Distinguishes an absent field from an explicit `null` in partial
/// updates: missing stays `None`, `null` becomes `Some(None)`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Raw query string of GET /tasks. Everything arrives as text and is
/// validated in the handler so bad enum values give field errors, not a
/// deserialization failure.
#[derive(Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub per_page: Option<String>,
}

#[derive(Deserialize)]
pub struct StoreTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<i64>>,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub categories: Option<Option<Vec<i64>>>,
}

#[derive(Serialize)]
pub struct CategoryResource {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub created_at: String,
}

impl CategoryResource {
    pub fn from_category(category: &Category) -> Self {
        CategoryResource {
            id: category.id,
            name: category.name.clone(),
            color: category.color.clone(),
            created_at: category.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct TaskResource {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub priority: &'static str,
    pub status: &'static str,
    pub due_date: Option<String>,
    pub is_overdue: bool,
    pub categories: Vec<CategoryResource>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskResource {
    pub fn from_task(task: &Task, categories: &[Category], today: NaiveDate) -> Self {
        TaskResource {
            id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority.as_str(),
            status: task.status.as_str(),
            due_date: task.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
            is_overdue: task.is_overdue(today),
            categories: categories.iter().map(CategoryResource::from_category).collect(),
            created_at: task.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            updated_at: task.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct TaskEnvelope {
    pub data: TaskResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub last_page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[derive(Serialize)]
pub struct TaskListResponse {
    pub data: Vec<TaskResource>,
    pub meta: PageMeta,
}

impl PageMeta {
    pub fn from_page(page: &TaskPage) -> Self {
        PageMeta {
            current_page: page.page,
            last_page: page.last_page(),
            per_page: page.per_page,
            total: page.total,
        }
    }
}

#[derive(Serialize)]
pub struct ByStatus {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
}

#[derive(Serialize)]
pub struct StatisticsResponse {
    pub total_tasks: i64,
    pub by_status: ByStatus,
    pub overdue_tasks: i64,
    pub due_this_week: i64,
}

impl StatisticsResponse {
    pub fn from_statistics(stats: &TaskStatistics) -> Self {
        StatisticsResponse {
            total_tasks: stats.total_tasks,
            by_status: ByStatus {
                pending: stats.pending,
                in_progress: stats.in_progress,
                completed: stats.completed,
            },
            overdue_tasks: stats.overdue_tasks,
            due_this_week: stats.due_this_week,
        }
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}
