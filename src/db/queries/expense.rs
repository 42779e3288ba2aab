// src/db/queries/expense.rs
//
// Expense submission, the approval transition, and the role-scoped read
// views. One transition = one transaction: the row is locked, the move is
// re-validated against the locked status, and the history entry commits
// atomically with the status change. Notifications go out after commit and
// never affect the outcome.

use axum::{
    extract::{Extension, Multipart, Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::path::Path;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::api::auth::Claims;
use crate::config::Config;
use crate::db::models::expense::{
    ExpenseAttachment, ExpenseDetail, ExpenseHistory, ExpenseRequest, HistoryEntryView, NewExpense,
    QueueItem, TransitionForm, TransitionResponse,
};
use crate::db::queries::directory::{self, SubordinateCache};
use crate::utils::api_response::ApiResponse;
use crate::utils::code::generate_request_code;
use crate::utils::notification::{notify_expense_status_change, notify_expense_submitted};
use crate::workflow::error::WorkflowError;
use crate::workflow::state_machine::{
    latest_reason_for_role, transition, ExpenseStatus, ReviewAction, ReviewerRole,
};
use crate::workflow::validate::{validate_submission, ExpenseForm};

fn db_err(e: sqlx::Error) -> ApiResponse<()> {
    WorkflowError::Database(e).into()
}

/// One uploaded receipt, buffered before the request row exists.
struct PendingUpload {
    file_name: String,
    file_type: Option<String>,
    bytes: axum::body::Bytes,
}

async fn persist_uploads(dir: &Path, uploads: &[PendingUpload]) -> std::io::Result<()> {
    if uploads.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).await?;
    for upload in uploads {
        fs::write(dir.join(&upload.file_name), &upload.bytes).await?;
    }
    Ok(())
}

/// Inserts the request row and its attachment rows in one transaction.
async fn record_submission(
    pool: &PgPool,
    request_code: &str,
    expense: &NewExpense,
    upload_dir: &Path,
    uploads: &[PendingUpload],
) -> Result<ExpenseRequest, WorkflowError> {
    let mut tx = pool.begin().await?;

    let request = sqlx::query_as::<_, ExpenseRequest>(
        r#"
        INSERT INTO expense_requests (
            request_code, employee_id, category, amount, currency,
            description, expense_date, tax_included, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(request_code)
    .bind(expense.employee_id)
    .bind(&expense.category)
    .bind(expense.amount)
    .bind(&expense.currency)
    .bind(&expense.description)
    .bind(expense.expense_date)
    .bind(expense.tax_included)
    .bind(ExpenseStatus::PendingManagerApproval)
    .fetch_one(&mut *tx)
    .await?;

    for upload in uploads {
        let file_path = upload_dir.join(&upload.file_name);
        sqlx::query(
            r#"
            INSERT INTO expense_attachments (request_id, file_name, file_path, file_type, file_size)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(request.request_id)
        .bind(&upload.file_name)
        .bind(file_path.to_string_lossy().to_string())
        .bind(&upload.file_type)
        .bind(upload.bytes.len() as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(request)
}

#[axum::debug_handler]
#[utoipa::path(
    post,
    path = "/expenses",
    tag = "Expenses",
    request_body(content = String, content_type = "multipart/form-data", description = "Expense fields plus optional receipt files"),
    responses(
        (status = 201, description = "Expense request created", body = ExpenseRequest),
        (status = 400, description = "Invalid submission"),
        (status = 500, description = "Internal Server Error")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn submit_expense(
    State(db_pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<ApiResponse<ExpenseRequest>, ApiResponse<()>> {
    let employee_id = claims.user_id()?;

    // Multipart fields arrive in caller order; buffer everything first so
    // validation happens before any row or file exists.
    let mut form = ExpenseForm::default();
    let mut uploads: Vec<PendingUpload> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiResponse::<()>::error(
            StatusCode::BAD_REQUEST,
            "Failed to process multipart data",
            Some(json!({ "message": e.to_string() })),
        )
    })? {
        if let Some(file_name) = field.file_name().map(|s| s.to_string()) {
            let file_type = field.content_type().map(|s| s.to_string());
            let bytes = field.bytes().await.map_err(|e| {
                ApiResponse::<()>::error(
                    StatusCode::BAD_REQUEST,
                    "Failed to read uploaded file",
                    Some(json!({ "message": e.to_string() })),
                )
            })?;
            uploads.push(PendingUpload {
                file_name,
                file_type,
                bytes,
            });
            continue;
        }

        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(|e| {
            ApiResponse::<()>::error(
                StatusCode::BAD_REQUEST,
                "Failed to read form field",
                Some(json!({ "message": e.to_string() })),
            )
        })?;
        match name.as_str() {
            "category" => form.category = Some(value),
            "amount" => form.amount = Some(value),
            "currency" => form.currency = Some(value),
            "description" => form.description = Some(value),
            "expense_date" => form.expense_date = Some(value),
            "tax_included" => form.tax_included = Some(value),
            _ => {}
        }
    }

    let expense = validate_submission(employee_id, form)?;
    let request_code = generate_request_code();

    // Receipts land on disk before the transaction opens: a failed insert
    // or commit then only has files to clean up, never committed rows
    // pointing at files that were never written.
    let upload_dir = Config::get().upload_storage_path.join(&request_code);
    persist_uploads(&upload_dir, &uploads).await.map_err(|e| {
        ApiResponse::<()>::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to store uploaded files",
            Some(json!({ "message": e.to_string() })),
        )
    })?;

    let request =
        match record_submission(&db_pool, &request_code, &expense, &upload_dir, &uploads).await {
            Ok(request) => request,
            Err(e) => {
                if !uploads.is_empty() {
                    fs::remove_dir_all(&upload_dir).await.ok();
                }
                return Err(e.into());
            }
        };

    info!(
        "Expense {} submitted by employee {}",
        request.request_code, employee_id
    );

    // Notify the employee's managers after commit. A delivery failure must
    // not fail the submission.
    {
        let pool = db_pool.clone();
        let request_id = request.request_id;
        let code = request.request_code.clone();
        let employee_name = claims.username.clone();
        tokio::spawn(async move {
            if let Err(e) =
                notify_expense_submitted(&pool, request_id, &code, employee_id, &employee_name)
                    .await
            {
                warn!("Failed to notify managers for {}: {}", code, e);
            }
        });
    }

    Ok(ApiResponse::success(
        StatusCode::CREATED,
        "Expense request submitted",
        request,
    ))
}

#[axum::debug_handler]
#[utoipa::path(
    put,
    path = "/expenses/{request_id}/status",
    tag = "Expenses",
    params(
        ("request_id" = i32, Path, description = "ID of the expense request"),
    ),
    request_body = TransitionForm,
    responses(
        (status = 200, description = "Transition applied", body = TransitionResponse),
        (status = 400, description = "Unknown action"),
        (status = 403, description = "Reviewer not assigned to this employee"),
        (status = 404, description = "Expense request not found"),
        (status = 409, description = "Request is not at this reviewer's stage"),
        (status = 500, description = "Internal Server Error")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn update_expense_status(
    State(db_pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(cache): Extension<SubordinateCache>,
    AxumPath(request_id): AxumPath<i32>,
    Json(payload): Json<TransitionForm>,
) -> Result<ApiResponse<TransitionResponse>, ApiResponse<()>> {
    let reviewer_id = claims.user_id()?;
    let role = directory::resolve_role(&db_pool, reviewer_id).await?;
    let action = ReviewAction::parse(&payload.action)?;

    let reason = payload
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    let mut tx = db_pool.begin().await.map_err(db_err)?;

    // Lock the row so concurrent reviewers serialize on this request.
    let request = sqlx::query_as::<_, ExpenseRequest>(
        "SELECT * FROM expense_requests WHERE request_id = $1 FOR UPDATE",
    )
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_err)?
    .ok_or(WorkflowError::NotFound)?;

    let scope = directory::subordinates_of(&db_pool, &cache, reviewer_id, role).await?;
    if !scope.contains(&request.employee_id) {
        return Err(ApiResponse::<()>::error(
            StatusCode::FORBIDDEN,
            "Not authorized to review this employee's requests",
            None,
        ));
    }

    let new_status = transition(request.status, role, action)?;

    // The status guard re-checks the precondition inside the same UPDATE, so
    // a move that raced us leaves zero rows affected instead of overwriting.
    let updated = if role == ReviewerRole::AccountManager && action == ReviewAction::Rejected {
        sqlx::query(
            r#"
            UPDATE expense_requests
               SET status = $1, account_mgr_rejection_reason = $2, updated_at = NOW()
             WHERE request_id = $3 AND status = $4
            "#,
        )
        .bind(new_status)
        .bind(&reason)
        .bind(request_id)
        .bind(request.status)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
    } else {
        sqlx::query(
            r#"
            UPDATE expense_requests
               SET status = $1, updated_at = NOW()
             WHERE request_id = $2 AND status = $3
            "#,
        )
        .bind(new_status)
        .bind(request_id)
        .bind(request.status)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
    };

    if updated.rows_affected() == 0 {
        return Err(WorkflowError::WrongStage {
            role,
            status: request.status,
        }
        .into());
    }

    sqlx::query(
        r#"
        INSERT INTO expense_history (request_id, action_by, action_role, action, reason)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(request_id)
    .bind(reviewer_id)
    .bind(role.as_str())
    .bind(action.as_str())
    .bind(&reason)
    .execute(&mut *tx)
    .await
    .map_err(db_err)?;

    tx.commit().await.map_err(db_err)?;

    info!(
        "Expense {} moved to '{}' by {} {}",
        request.request_code, new_status, role, reviewer_id
    );

    {
        let pool = db_pool.clone();
        let code = request.request_code.clone();
        let employee_id = request.employee_id;
        let reason = reason.clone();
        tokio::spawn(async move {
            if let Err(e) = notify_expense_status_change(
                &pool,
                request_id,
                &code,
                employee_id,
                role,
                new_status,
                reason.as_deref(),
            )
            .await
            {
                warn!("Failed to notify employee for {}: {}", code, e);
            }
        });
    }

    Ok(ApiResponse::success(
        StatusCode::OK,
        "Transition applied",
        TransitionResponse {
            request_id,
            new_status,
        },
    ))
}

async fn history_for(pool: &PgPool, request_id: i32) -> Result<Vec<ExpenseHistory>, sqlx::Error> {
    sqlx::query_as::<_, ExpenseHistory>(
        "SELECT * FROM expense_history WHERE request_id = $1 ORDER BY history_id",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await
}

/// The rejection reason a queue row displays for this reviewer's role.
///
/// Always derived from the ledger. The denormalized column on the request
/// row is a write-through cache for external consumers and is never read
/// back here. "-" means none.
fn queue_reason(role: ReviewerRole, history: &[ExpenseHistory]) -> String {
    latest_reason_for_role(history, role)
        .unwrap_or("-")
        .to_string()
}

#[axum::debug_handler]
#[utoipa::path(
    get,
    path = "/expenses/queue",
    tag = "Expenses",
    responses(
        (status = 200, description = "Reviewer queue retrieved", body = Vec<QueueItem>),
        (status = 400, description = "Caller's role does not review expenses"),
        (status = 500, description = "Internal Server Error")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn list_reviewer_queue(
    State(db_pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Extension(cache): Extension<SubordinateCache>,
) -> Result<ApiResponse<Vec<QueueItem>>, ApiResponse<()>> {
    let reviewer_id = claims.user_id()?;
    let role = directory::resolve_role(&db_pool, reviewer_id).await?;
    let scope = directory::subordinates_of(&db_pool, &cache, reviewer_id, role).await?;

    if scope.is_empty() {
        return Ok(ApiResponse::success(
            StatusCode::OK,
            "Queue retrieved",
            Vec::new(),
        ));
    }

    let visible: Vec<ExpenseStatus> = role.visible_statuses().to_vec();
    let requests = sqlx::query_as::<_, ExpenseRequest>(
        r#"
        SELECT * FROM expense_requests
         WHERE employee_id = ANY($1) AND status = ANY($2)
         ORDER BY created_at DESC
        "#,
    )
    .bind(scope.as_ref())
    .bind(&visible)
    .fetch_all(&db_pool)
    .await
    .map_err(db_err)?;

    let mut items = Vec::with_capacity(requests.len());
    for request in requests {
        let employee = directory::display(&db_pool, request.employee_id).await?;
        let history = history_for(&db_pool, request.request_id)
            .await
            .map_err(db_err)?;
        let attachment_id: Option<i32> = sqlx::query_scalar(
            "SELECT attachment_id FROM expense_attachments WHERE request_id = $1 ORDER BY attachment_id LIMIT 1",
        )
        .bind(request.request_id)
        .fetch_optional(&db_pool)
        .await
        .map_err(db_err)?;

        let rejection_reason = queue_reason(role, &history);
        items.push(QueueItem {
            request_id: request.request_id,
            request_code: request.request_code,
            employee_name: employee.name,
            employee_email: employee.email.unwrap_or_else(|| "-".to_string()),
            category: request.category,
            amount: request.amount,
            currency: request.currency,
            status: request.status,
            description: request.description,
            expense_date: request.expense_date,
            tax_included: request.tax_included,
            attachment_id,
            rejection_reason,
        });
    }

    Ok(ApiResponse::success(
        StatusCode::OK,
        "Queue retrieved",
        items,
    ))
}

#[axum::debug_handler]
#[utoipa::path(
    get,
    path = "/expenses/employee/{employee_id}",
    tag = "Expenses",
    params(
        ("employee_id" = i32, Path, description = "ID of the employee whose requests are listed"),
    ),
    responses(
        (status = 200, description = "Expense requests retrieved", body = Vec<ExpenseDetail>),
        (status = 403, description = "Employees may only list their own requests"),
        (status = 500, description = "Internal Server Error")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn list_employee_expenses(
    State(db_pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    AxumPath(employee_id): AxumPath<i32>,
) -> Result<ApiResponse<Vec<ExpenseDetail>>, ApiResponse<()>> {
    if claims.user_id()? != employee_id {
        return Err(ApiResponse::<()>::error(
            StatusCode::FORBIDDEN,
            "Employees may only list their own requests",
            None,
        ));
    }

    let requests = sqlx::query_as::<_, ExpenseRequest>(
        "SELECT * FROM expense_requests WHERE employee_id = $1 ORDER BY created_at DESC",
    )
    .bind(employee_id)
    .fetch_all(&db_pool)
    .await
    .map_err(db_err)?;

    let mut details = Vec::with_capacity(requests.len());
    for request in requests {
        let attachments = sqlx::query_as::<_, ExpenseAttachment>(
            "SELECT * FROM expense_attachments WHERE request_id = $1 ORDER BY attachment_id",
        )
        .bind(request.request_id)
        .fetch_all(&db_pool)
        .await
        .map_err(db_err)?;

        // Reviewers may leave the directory; fall back to their raw id.
        let history = sqlx::query_as::<_, HistoryEntryView>(
            r#"
            SELECT h.action_by,
                   COALESCE(u.name, h.action_by::text) AS action_by_name,
                   h.action_role, h.action, h.reason, h.created_at
              FROM expense_history h
              LEFT JOIN users u ON u.id = h.action_by
             WHERE h.request_id = $1
             ORDER BY h.history_id
            "#,
        )
        .bind(request.request_id)
        .fetch_all(&db_pool)
        .await
        .map_err(db_err)?;

        details.push(ExpenseDetail {
            request,
            attachments,
            history,
        });
    }

    Ok(ApiResponse::success(
        StatusCode::OK,
        "Expense requests retrieved",
        details,
    ))
}

#[axum::debug_handler]
#[utoipa::path(
    get,
    path = "/expenses/attachments/{attachment_id}",
    tag = "Expenses",
    params(
        ("attachment_id" = i32, Path, description = "ID of the attachment to download"),
    ),
    responses(
        (status = 200, description = "Attachment retrieved successfully"),
        (status = 404, description = "Attachment not found"),
        (status = 500, description = "Internal Server Error")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn download_attachment(
    State(db_pool): State<PgPool>,
    Extension(_claims): Extension<Claims>,
    AxumPath(attachment_id): AxumPath<i32>,
) -> Result<impl IntoResponse, StatusCode> {
    let attachment = sqlx::query_as::<_, ExpenseAttachment>(
        "SELECT * FROM expense_attachments WHERE attachment_id = $1",
    )
    .bind(attachment_id)
    .fetch_optional(&db_pool)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    if fs::metadata(&attachment.file_path).await.is_err() {
        return Err(StatusCode::NOT_FOUND);
    }
    let file = fs::File::open(&attachment.file_path)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let stream = ReaderStream::new(file);

    let content_type = attachment
        .file_type
        .unwrap_or_else(|| "application/octet-stream".to_string());

    axum::response::Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", attachment.file_name),
        )
        .body(axum::body::Body::from_stream(stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_expense,
        update_expense_status,
        list_reviewer_queue,
        list_employee_expenses,
        download_attachment
    ),
    components(
        schemas(
            ExpenseRequest, ExpenseAttachment, HistoryEntryView, ExpenseDetail,
            QueueItem, TransitionForm, TransitionResponse, ExpenseStatus
        )
    ),
    tags(
        (name = "Expenses", description = "Expense Workflow Endpoints")
    )
)]
pub struct ExpenseDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state_machine::ReviewAction;
    use chrono::Utc;

    fn entry(role: ReviewerRole, action: ReviewAction, reason: Option<&str>) -> ExpenseHistory {
        ExpenseHistory {
            history_id: 0,
            request_id: 1,
            action_by: 9,
            action_role: role.as_str().to_string(),
            action: action.as_str().to_string(),
            reason: reason.map(str::to_string),
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn queue_reason_is_derived_from_the_ledger_for_every_role() {
        let history = vec![
            entry(ReviewerRole::Manager, ReviewAction::Pending, Some("need receipt")),
            entry(ReviewerRole::Manager, ReviewAction::Approved, None),
            entry(ReviewerRole::Hr, ReviewAction::Rejected, Some("missing receipt")),
        ];
        assert_eq!(queue_reason(ReviewerRole::Manager, &history), "need receipt");
        assert_eq!(queue_reason(ReviewerRole::Hr, &history), "missing receipt");
        assert_eq!(queue_reason(ReviewerRole::AccountManager, &history), "-");
    }

    #[test]
    fn account_mgr_hold_reason_surfaces_without_touching_the_cached_column() {
        // A Pending hold writes its reason to the ledger only; the
        // denormalized column on the request row stays NULL. The queue must
        // still show the reason, so it can never read the column.
        let history = vec![
            entry(ReviewerRole::Manager, ReviewAction::Approved, None),
            entry(ReviewerRole::Hr, ReviewAction::Approved, None),
            entry(
                ReviewerRole::AccountManager,
                ReviewAction::Pending,
                Some("need itemized invoice"),
            ),
        ];
        assert_eq!(
            queue_reason(ReviewerRole::AccountManager, &history),
            "need itemized invoice"
        );
    }

    #[test]
    fn latest_account_mgr_ledger_entry_wins_over_older_ones() {
        let history = vec![
            entry(
                ReviewerRole::AccountManager,
                ReviewAction::Pending,
                Some("need itemized invoice"),
            ),
            entry(
                ReviewerRole::AccountManager,
                ReviewAction::Rejected,
                Some("duplicate claim"),
            ),
        ];
        assert_eq!(
            queue_reason(ReviewerRole::AccountManager, &history),
            "duplicate claim"
        );
    }

    #[test]
    fn queue_reason_falls_back_to_a_placeholder() {
        assert_eq!(queue_reason(ReviewerRole::Manager, &[]), "-");
    }

    #[tokio::test]
    async fn discarding_a_failed_submission_removes_its_stored_uploads() {
        let dir = std::env::temp_dir().join(format!("expense-uploads-{}", uuid::Uuid::new_v4()));
        let uploads = vec![
            PendingUpload {
                file_name: "receipt.pdf".to_string(),
                file_type: Some("application/pdf".to_string()),
                bytes: axum::body::Bytes::from_static(b"%PDF-"),
            },
            PendingUpload {
                file_name: "taxi.jpg".to_string(),
                file_type: Some("image/jpeg".to_string()),
                bytes: axum::body::Bytes::from_static(b"\xff\xd8\xff"),
            },
        ];

        persist_uploads(&dir, &uploads).await.unwrap();
        assert!(dir.join("receipt.pdf").exists());
        assert!(dir.join("taxi.jpg").exists());

        // The handler's error path after a failed insert or commit.
        fs::remove_dir_all(&dir).await.unwrap();
        assert!(!dir.exists());
    }
}
