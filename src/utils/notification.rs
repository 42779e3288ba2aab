use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::workflow::state_machine::{ExpenseStatus, ReviewerRole};

/// Result type for notification operations
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in notification operations
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid target provided: {0}")]
    InvalidTarget(String),

    #[error("Failed to serialize notification data: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Notification builder for creating system notifications
pub struct NotificationBuilder {
    title: String,
    body: Option<String>,
    notification_type: String,
    target_user_ids: Vec<i32>,
    action_type: Option<String>,
    action_data: Option<Value>,
    dismissible: bool,
    expires_in_days: Option<i64>,
}

impl NotificationBuilder {
    /// Create a new notification builder with required fields
    pub fn new(title: impl Into<String>, notification_type: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: None,
            notification_type: notification_type.into(),
            target_user_ids: Vec::new(),
            action_type: None,
            action_data: None,
            dismissible: true,
            expires_in_days: Some(14),
        }
    }

    /// Set notification body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a target user to the notification
    pub fn target_user(mut self, user_id: i32) -> Self {
        self.target_user_ids.push(user_id);
        self
    }

    /// Add multiple target users to the notification
    pub fn target_users(mut self, user_ids: Vec<i32>) -> Self {
        self.target_user_ids.extend(user_ids);
        self
    }

    /// Set the action type and data for when notification is clicked
    pub fn action(mut self, action_type: impl Into<String>, action_data: Value) -> Self {
        self.action_type = Some(action_type.into());
        self.action_data = Some(action_data);
        self
    }

    /// Set whether the notification can be dismissed
    pub fn dismissible(mut self, dismissible: bool) -> Self {
        self.dismissible = dismissible;
        self
    }

    /// Set expiration time in days (None means no expiration)
    pub fn expires_in_days(mut self, days: Option<i64>) -> Self {
        self.expires_in_days = days;
        self
    }

    /// Build and send the notification
    pub async fn send(self, pool: &PgPool) -> NotificationResult<i32> {
        if self.target_user_ids.is_empty() {
            return Err(NotificationError::InvalidTarget(
                "At least one target user is required".to_string(),
            ));
        }

        let expires_at = self
            .expires_in_days
            .map(|days| (Utc::now() + chrono::Duration::days(days)).naive_utc());

        let mut tx = pool.begin().await?;

        let notification_id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO notifications (
                title, body, type, action_type, action_data, dismissible, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&self.title)
        .bind(&self.body)
        .bind(&self.notification_type)
        .bind(&self.action_type)
        .bind(&self.action_data)
        .bind(self.dismissible)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        for user_id in &self.target_user_ids {
            sqlx::query(
                "INSERT INTO notification_targets (notification_id, user_id) VALUES ($1, $2)",
            )
            .bind(notification_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(notification_id)
    }
}

/// Common notification types for system usage
pub mod notification_types {
    pub const EXPENSE_SUBMITTED: &str = "expense_submitted";
    pub const EXPENSE_STATUS_CHANGE: &str = "expense_status_change";
}

/// Notifies every manager assigned to the employee that a new expense
/// request is waiting in their queue.
pub async fn notify_expense_submitted(
    pool: &PgPool,
    request_id: i32,
    request_code: &str,
    employee_id: i32,
    employee_name: &str,
) -> NotificationResult<i32> {
    let manager_ids: Vec<i32> =
        sqlx::query_scalar("SELECT manager_id FROM employee_managers WHERE employee_id = $1")
            .bind(employee_id)
            .fetch_all(pool)
            .await?;

    if manager_ids.is_empty() {
        return Err(NotificationError::InvalidTarget(format!(
            "No managers assigned for employee {employee_id}"
        )));
    }

    NotificationBuilder::new(
        format!("Expense Submitted: {request_code}"),
        notification_types::EXPENSE_SUBMITTED,
    )
    .body(format!(
        "{employee_name} submitted expense request {request_code} for your review"
    ))
    .target_users(manager_ids)
    .action(
        "view_expense",
        json!({
            "request_id": request_id,
            "employee_id": employee_id,
        }),
    )
    .send(pool)
    .await
}

/// Tells the submitting employee that a reviewer acted on their request.
pub async fn notify_expense_status_change(
    pool: &PgPool,
    request_id: i32,
    request_code: &str,
    employee_id: i32,
    acting_role: ReviewerRole,
    new_status: ExpenseStatus,
    reason: Option<&str>,
) -> NotificationResult<i32> {
    let body = match reason {
        Some(r) => format!(
            "{} moved request {} to '{}': {}",
            acting_role.as_str(),
            request_code,
            new_status,
            r
        ),
        None => format!(
            "{} moved request {} to '{}'",
            acting_role.as_str(),
            request_code,
            new_status
        ),
    };

    NotificationBuilder::new(
        format!("Expense Update: {request_code}"),
        notification_types::EXPENSE_STATUS_CHANGE,
    )
    .body(body)
    .target_user(employee_id)
    .action(
        "view_expense",
        json!({
            "request_id": request_id,
            "new_status": new_status.as_str(),
        }),
    )
    .send(pool)
    .await
}
