use crate::models::category::Category;
use crate::models::task::{Task, TaskPriority, TaskStatus};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

pub const DEFAULT_PER_PAGE: u32 = 15;

/// Sort columns a caller is allowed to pick. Anything outside this
/// whitelist falls back to creation time, so user input can never name
/// an arbitrary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAt,
    DueDate,
    Priority,
    Status,
}

impl SortKey {
    pub fn parse(value: &str) -> SortKey {
        match value {
            "created_at" => SortKey::CreatedAt,
            "due_date" => SortKey::DueDate,
            "priority" => SortKey::Priority,
            "status" => SortKey::Status,
            _ => SortKey::CreatedAt,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::DueDate => "due_date",
            SortKey::Priority => "priority",
            SortKey::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> SortOrder {
        match value {
            "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Everything one task listing needs. Omitted filters impose no
/// constraint; supplied filters narrow the result by logical AND.
#[derive(Debug, Clone)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub category_id: Option<i64>,
    pub search: Option<String>,
    pub sort_by: SortKey,
    pub sort_order: SortOrder,
    pub page: u32,
    pub per_page: u32,
}

impl Default for TaskQuery {
    fn default() -> Self {
        TaskQuery {
            status: None,
            priority: None,
            category_id: None,
            search: None,
            sort_by: SortKey::CreatedAt,
            sort_order: SortOrder::Desc,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

#[derive(Debug)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl TaskPage {
    pub fn last_page(&self) -> u32 {
        let per_page = i64::from(self.per_page.max(1));
        let pages = (self.total + per_page - 1) / per_page;
        pages.max(1) as u32
    }
}

/// Whether soft-deleted rows are visible to a lookup. Only the restore
/// path includes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trashed {
    Exclude,
    Include,
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, user_id: i64, query: &'a TaskQuery) {
    builder.push(" WHERE user_id = ");
    builder.push_bind(user_id);
    builder.push(" AND deleted_at IS NULL");

    if let Some(status) = query.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    if let Some(priority) = query.priority {
        builder.push(" AND priority = ");
        builder.push_bind(priority);
    }
    if let Some(category_id) = query.category_id {
        builder.push(
            " AND EXISTS (SELECT 1 FROM category_task ct \
             WHERE ct.task_id = tasks.id AND ct.category_id = ",
        );
        builder.push_bind(category_id);
        builder.push(")");
    }
    if let Some(search) = &query.search {
        let pattern = format!("%{}%", search);
        builder.push(" AND (title LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR description LIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

/// Runs the filtered, sorted, paginated listing for one user.
///
/// Ties on the sort key keep whatever order the store returns them in;
/// there is deliberately no secondary sort key.
pub async fn list_tasks(
    pool: &SqlitePool,
    user_id: i64,
    query: &TaskQuery,
) -> sqlx::Result<TaskPage> {
    let mut count_builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) FROM tasks");
    push_filters(&mut count_builder, user_id, query);
    let total: i64 = count_builder
        .build_query_scalar()
        .fetch_one(pool)
        .await?;

    let page = query.page.max(1);
    let per_page = query.per_page.max(1);

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM tasks");
    push_filters(&mut builder, user_id, query);
    builder.push(format!(
        " ORDER BY {} {}",
        query.sort_by.column(),
        query.sort_order.keyword()
    ));
    builder.push(" LIMIT ");
    builder.push_bind(i64::from(per_page));
    builder.push(" OFFSET ");
    // Widened before multiplying; both values come from the query string.
    builder.push_bind(i64::from(page - 1) * i64::from(per_page));

    let tasks: Vec<Task> = builder.build_query_as().fetch_all(pool).await?;

    Ok(TaskPage {
        tasks,
        total,
        page,
        per_page,
    })
}

/// Ownership-scoped lookup of one task.
pub async fn find_task(
    pool: &SqlitePool,
    user_id: i64,
    task_id: i64,
    trashed: Trashed,
) -> sqlx::Result<Option<Task>> {
    let sql = match trashed {
        Trashed::Exclude => {
            "SELECT * FROM tasks WHERE id = ? AND user_id = ? AND deleted_at IS NULL"
        }
        Trashed::Include => "SELECT * FROM tasks WHERE id = ? AND user_id = ?",
    };
    sqlx::query_as::<_, Task>(sql)
        .bind(task_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Categories attached to a task, ordered by id.
pub async fn task_categories(pool: &SqlitePool, task_id: i64) -> sqlx::Result<Vec<Category>> {
    sqlx::query_as::<_, Category>(
        "SELECT c.id, c.name, c.color, c.created_at
         FROM categories c
         JOIN category_task ct ON ct.category_id = c.id
         WHERE ct.task_id = ?
         ORDER BY c.id",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TaskStatistics {
    pub total_tasks: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub overdue_tasks: i64,
    pub due_this_week: i64,
}

async fn count_tasks(
    pool: &SqlitePool,
    user_id: i64,
    status: Option<TaskStatus>,
) -> sqlx::Result<i64> {
    match status {
        Some(status) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM tasks
                 WHERE user_id = ? AND deleted_at IS NULL AND status = ?",
            )
            .bind(user_id)
            .bind(status)
            .fetch_one(pool)
            .await
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE user_id = ? AND deleted_at IS NULL")
                .bind(user_id)
                .fetch_one(pool)
                .await
        }
    }
}

/// End of the current calendar week (Sunday) relative to `today`.
fn end_of_week(today: NaiveDate) -> NaiveDate {
    let days_left = 7 - i64::from(today.weekday().number_from_monday());
    today + Duration::days(days_left)
}

/// Fresh aggregate counts over a user's live tasks, computed as of
/// `today`. No caching; callers are expected to rate-limit this path.
pub async fn task_statistics(
    pool: &SqlitePool,
    user_id: i64,
    today: NaiveDate,
) -> sqlx::Result<TaskStatistics> {
    let total_tasks = count_tasks(pool, user_id, None).await?;
    let pending = count_tasks(pool, user_id, Some(TaskStatus::Pending)).await?;
    let in_progress = count_tasks(pool, user_id, Some(TaskStatus::InProgress)).await?;
    let completed = count_tasks(pool, user_id, Some(TaskStatus::Completed)).await?;

    let overdue_tasks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks
         WHERE user_id = ? AND deleted_at IS NULL
           AND due_date IS NOT NULL AND due_date < ?
           AND status != 'completed'",
    )
    .bind(user_id)
    .bind(today)
    .fetch_one(pool)
    .await?;

    let due_this_week: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks
         WHERE user_id = ? AND deleted_at IS NULL
           AND due_date IS NOT NULL AND due_date >= ? AND due_date <= ?
           AND status != 'completed'",
    )
    .bind(user_id)
    .bind(today)
    .bind(end_of_week(today))
    .fetch_one(pool)
    .await?;

    Ok(TaskStatistics {
        total_tasks,
        pending,
        in_progress,
        completed,
        overdue_tasks,
        due_this_week,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;

    #[test]
    fn sort_key_whitelist_falls_back_to_created_at() {
        assert_eq!(SortKey::parse("due_date"), SortKey::DueDate);
        assert_eq!(SortKey::parse("priority"), SortKey::Priority);
        assert_eq!(SortKey::parse("password_hash"), SortKey::CreatedAt);
        assert_eq!(SortKey::parse("id; DROP TABLE tasks"), SortKey::CreatedAt);
        assert_eq!(SortOrder::parse("asc"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::Desc);
    }

    #[test]
    fn end_of_week_is_the_coming_sunday() {
        // 2025-06-11 is a Wednesday, 2025-06-15 the following Sunday.
        let wednesday = NaiveDate::from_ymd_opt(2025, 6, 11).unwrap();
        assert_eq!(end_of_week(wednesday), NaiveDate::from_ymd_opt(2025, 6, 15).unwrap());
        let sunday = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        assert_eq!(end_of_week(sunday), sunday);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_owning_user() {
        let pool = test_util::pool().await;
        let alice = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        let bob = test_util::create_user(&pool, "Bob", "bob@example.com").await;
        test_util::create_task(&pool, alice, "Alice's task", "pending", "medium", None).await;
        test_util::create_task(&pool, bob, "Bob's task", "pending", "medium", None).await;

        let page = list_tasks(&pool, alice, &TaskQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].title, "Alice's task");
    }

    #[tokio::test]
    async fn filters_compose_by_logical_and() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        test_util::create_task(&pool, user, "Write report", "pending", "high", None).await;
        test_util::create_task(&pool, user, "Write tests", "completed", "high", None).await;
        test_util::create_task(&pool, user, "Buy groceries", "pending", "low", None).await;

        let query = TaskQuery {
            status: Some(TaskStatus::Pending),
            priority: Some(TaskPriority::High),
            search: Some("Write".to_string()),
            ..TaskQuery::default()
        };
        let page = list_tasks(&pool, user, &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].title, "Write report");
    }

    #[tokio::test]
    async fn search_matches_title_or_description() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        test_util::create_task(&pool, user, "Groceries", "pending", "low", None).await;
        let described =
            test_util::create_task(&pool, user, "Errand", "pending", "low", None).await;
        sqlx::query("UPDATE tasks SET description = 'pick up the invoice' WHERE id = ?")
            .bind(described)
            .execute(&pool)
            .await
            .unwrap();

        let query = TaskQuery {
            search: Some("invoice".to_string()),
            ..TaskQuery::default()
        };
        let page = list_tasks(&pool, user, &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].title, "Errand");
    }

    #[tokio::test]
    async fn category_filter_uses_the_pivot_relation() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        let work = test_util::create_category(&pool, "Work", "#ff0000").await;
        let tagged = test_util::create_task(&pool, user, "Tagged", "pending", "low", None).await;
        test_util::create_task(&pool, user, "Untagged", "pending", "low", None).await;
        test_util::attach_category(&pool, tagged, work).await;

        let query = TaskQuery {
            category_id: Some(work),
            ..TaskQuery::default()
        };
        let page = list_tasks(&pool, user, &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].title, "Tagged");

        // A filter on a category id that does not exist is an empty page,
        // not an error.
        let query = TaskQuery {
            category_id: Some(9999),
            ..TaskQuery::default()
        };
        let page = list_tasks(&pool, user, &query).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.tasks.is_empty());
    }

    #[tokio::test]
    async fn soft_deleted_tasks_are_invisible_by_default() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        let task = test_util::create_task(&pool, user, "Gone", "pending", "low", None).await;
        sqlx::query("UPDATE tasks SET deleted_at = datetime('now') WHERE id = ?")
            .bind(task)
            .execute(&pool)
            .await
            .unwrap();

        let page = list_tasks(&pool, user, &TaskQuery::default()).await.unwrap();
        assert_eq!(page.total, 0);

        assert!(find_task(&pool, user, task, Trashed::Exclude).await.unwrap().is_none());
        assert!(find_task(&pool, user, task, Trashed::Include).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sorting_by_due_date_ascending() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        test_util::create_task(&pool, user, "Later", "pending", "low", Some("2025-07-01")).await;
        test_util::create_task(&pool, user, "Sooner", "pending", "low", Some("2025-06-01")).await;

        let query = TaskQuery {
            sort_by: SortKey::parse("due_date"),
            sort_order: SortOrder::parse("asc"),
            ..TaskQuery::default()
        };
        let page = list_tasks(&pool, user, &query).await.unwrap();
        let titles: Vec<&str> = page.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Sooner", "Later"]);
    }

    #[tokio::test]
    async fn pagination_reports_totals_and_splits_pages() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        for i in 0..7 {
            test_util::create_task(&pool, user, &format!("Task {}", i), "pending", "low", None)
                .await;
        }

        let query = TaskQuery {
            per_page: 3,
            ..TaskQuery::default()
        };
        let first = list_tasks(&pool, user, &query).await.unwrap();
        assert_eq!(first.total, 7);
        assert_eq!(first.tasks.len(), 3);
        assert_eq!(first.last_page(), 3);

        let query = TaskQuery {
            per_page: 3,
            page: 3,
            ..TaskQuery::default()
        };
        let last = list_tasks(&pool, user, &query).await.unwrap();
        assert_eq!(last.tasks.len(), 1);
    }

    #[tokio::test]
    async fn huge_client_supplied_page_values_do_not_overflow() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        test_util::create_task(&pool, user, "Only one", "pending", "low", None).await;

        let query = TaskQuery {
            page: 3,
            per_page: 3_000_000_000,
            ..TaskQuery::default()
        };
        let page = list_tasks(&pool, user, &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(page.tasks.is_empty());
    }

    #[tokio::test]
    async fn statistics_count_statuses_and_due_windows() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        // 2025-06-11 is a Wednesday; the week ends Sunday 2025-06-15.
        let today = NaiveDate::from_ymd_opt(2025, 6, 11).unwrap();

        test_util::create_task(&pool, user, "Overdue", "pending", "high", Some("2025-06-10")).await;
        test_util::create_task(&pool, user, "Due in 3 days", "pending", "low", Some("2025-06-14"))
            .await;
        test_util::create_task(&pool, user, "Next week", "in_progress", "low", Some("2025-06-20"))
            .await;
        test_util::create_task(&pool, user, "Done late", "completed", "low", Some("2025-06-01"))
            .await;

        let stats = task_statistics(&pool, user, today).await.unwrap();
        assert_eq!(stats.total_tasks, 4);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending + stats.in_progress + stats.completed, stats.total_tasks);
        // Completed tasks are never overdue; the 3-day task is not overdue.
        assert_eq!(stats.overdue_tasks, 1);
        // Overdue counts toward neither window ahead; only 2025-06-14 falls
        // inside [today, Sunday].
        assert_eq!(stats.due_this_week, 1);
    }

    #[tokio::test]
    async fn statistics_ignore_soft_deleted_tasks() {
        let pool = test_util::pool().await;
        let user = test_util::create_user(&pool, "Alice", "alice@example.com").await;
        let task = test_util::create_task(&pool, user, "Gone", "pending", "low", None).await;
        sqlx::query("UPDATE tasks SET deleted_at = datetime('now') WHERE id = ?")
            .bind(task)
            .execute(&pool)
            .await
            .unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 6, 11).unwrap();
        let stats = task_statistics(&pool, user, today).await.unwrap();
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.pending, 0);
    }
}
