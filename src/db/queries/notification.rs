// src/db/queries/notification.rs
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
};
use serde_json::json;
use sqlx::PgPool;

use crate::api::auth::Claims;
use crate::db::models::notification::NotificationFeedItem;
use crate::utils::api_response::ApiResponse;

/// Retrieve the caller's notification feed.
///
/// Returns every user-targeted, undismissed, unexpired notification, newest
/// first.
#[utoipa::path(
    get,
    path = "/notifications",
    responses(
        (status = 200, description = "Notifications retrieved successfully", body = Vec<NotificationFeedItem>),
        (status = 500, description = "Failed to retrieve notifications")
    ),
    tag = "Notifications",
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn get_notifications(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<ApiResponse<Vec<NotificationFeedItem>>, ApiResponse<()>> {
    let user_id = claims.user_id()?;

    let notifications = sqlx::query_as::<_, NotificationFeedItem>(
        r#"
        SELECT n.id, n.title, n.body, n.type AS type_field, n.action_type,
               n.action_data, n.dismissible, n.created_at, n.expires_at,
               (nd.notification_id IS NOT NULL) AS dismissed
          FROM notifications n
          JOIN notification_targets nt ON nt.notification_id = n.id
          LEFT JOIN notification_dismissals nd
            ON nd.notification_id = n.id AND nd.user_id = $1
         WHERE nt.user_id = $1
           AND nd.notification_id IS NULL
           AND (n.expires_at IS NULL OR n.expires_at > NOW())
         ORDER BY n.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        ApiResponse::<()>::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to retrieve notifications",
            Some(json!({ "error": e.to_string() })),
        )
    })?;

    Ok(ApiResponse::success(
        StatusCode::OK,
        "Notifications retrieved successfully",
        notifications,
    ))
}

/// Dismiss a notification for the current user
#[utoipa::path(
    post,
    path = "/notifications/{notification_id}/dismiss",
    params(
        ("notification_id" = i32, Path, description = "ID of the notification to dismiss")
    ),
    responses(
        (status = 200, description = "Notification dismissed successfully"),
        (status = 403, description = "Notification is not dismissible"),
        (status = 404, description = "Notification not found"),
        (status = 500, description = "Failed to dismiss notification")
    ),
    tag = "Notifications",
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn dismiss_notification(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<i32>,
) -> Result<ApiResponse<()>, ApiResponse<()>> {
    let user_id = claims.user_id()?;

    let dismissible: Option<bool> =
        sqlx::query_scalar("SELECT dismissible FROM notifications WHERE id = $1")
            .bind(notification_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| {
                ApiResponse::<()>::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to retrieve notification",
                    Some(json!({ "error": e.to_string() })),
                )
            })?;

    let dismissible = match dismissible {
        Some(d) => d,
        None => {
            return Err(ApiResponse::<()>::error(
                StatusCode::NOT_FOUND,
                "Notification not found",
                None,
            ))
        }
    };

    if !dismissible {
        return Err(ApiResponse::<()>::error(
            StatusCode::FORBIDDEN,
            "This notification cannot be dismissed",
            None,
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO notification_dismissals (notification_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (notification_id, user_id) DO NOTHING
        "#,
    )
    .bind(notification_id)
    .bind(user_id)
    .execute(&pool)
    .await
    .map_err(|e| {
        ApiResponse::<()>::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to dismiss notification",
            Some(json!({ "error": e.to_string() })),
        )
    })?;

    Ok(ApiResponse::success(
        StatusCode::OK,
        "Notification dismissed successfully",
        (),
    ))
}

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(get_notifications, dismiss_notification),
    components(
        schemas(NotificationFeedItem)
    ),
    tags(
        (name = "Notifications", description = "Notification Feed Endpoints")
    )
)]
pub struct NotificationDoc;
