// src/api/expense.rs
use crate::db::queries::expense::{
    download_attachment, list_employee_expenses, list_reviewer_queue, submit_expense,
    update_expense_status,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;

pub fn expense_routes() -> Router<PgPool> {
    Router::new()
        .route("/expenses", post(submit_expense))
        .route("/expenses/queue", get(list_reviewer_queue))
        .route("/expenses/{request_id}/status", put(update_expense_status))
        .route(
            "/expenses/employee/{employee_id}",
            get(list_employee_expenses),
        )
        .route(
            "/expenses/attachments/{attachment_id}",
            get(download_attachment),
        )
}
