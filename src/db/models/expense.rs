// src/db/models/expense.rs
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::workflow::state_machine::ExpenseStatus;

/// One expense reimbursement request. `request_code` is generated at
/// submission and never changes; `employee_id` is immutable after creation.
#[derive(Debug, Serialize, Deserialize, Clone, FromRow, ToSchema)]
pub struct ExpenseRequest {
    pub request_id: i32,
    pub request_code: String,
    pub employee_id: i32,
    pub category: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
    pub tax_included: bool,
    pub status: ExpenseStatus,
    /// Cache of the Account-Manager stage's rejection reason. History is the
    /// source of truth; this column is only ever written alongside it.
    pub account_mgr_rejection_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A stored receipt or supporting document. Created once at submission,
/// never mutated afterwards.
#[derive(Debug, Serialize, Deserialize, Clone, FromRow, ToSchema)]
pub struct ExpenseAttachment {
    pub attachment_id: i32,
    pub request_id: i32,
    pub file_name: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub file_size: i64,
}

/// One immutable audit record of a transition. Rows are append-only; the
/// ordered sequence per request is the sole record of who acted, when, and
/// why.
#[derive(Debug, Serialize, Deserialize, Clone, FromRow, ToSchema)]
pub struct ExpenseHistory {
    pub history_id: i32,
    pub request_id: i32,
    pub action_by: i32,
    pub action_role: String,
    pub action: String,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

/// History entry enriched with the acting user's display name for the
/// employee self-view.
#[derive(Debug, Serialize, Deserialize, FromRow, ToSchema)]
pub struct HistoryEntryView {
    pub action_by: i32,
    pub action_by_name: String,
    pub action_role: String,
    pub action: String,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Validated submission payload, produced by `workflow::validate`.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub employee_id: i32,
    pub category: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
    pub tax_included: bool,
}

/// Full composed view of one request: the record, its attachments, and its
/// complete ordered history.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExpenseDetail {
    pub request: ExpenseRequest,
    pub attachments: Vec<ExpenseAttachment>,
    pub history: Vec<HistoryEntryView>,
}

/// One row of a reviewer's queue, enriched with the employee's display data
/// and the latest same-role rejection reason.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueItem {
    pub request_id: i32,
    pub request_code: String,
    pub employee_name: String,
    pub employee_email: String,
    pub category: String,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub currency: String,
    pub status: ExpenseStatus,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
    pub tax_included: bool,
    pub attachment_id: Option<i32>,
    pub rejection_reason: String,
}

/// Body of `PUT /expenses/{request_id}/status`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionForm {
    pub action: String,
    pub reason: Option<String>,
}

/// Response of a successful transition.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransitionResponse {
    pub request_id: i32,
    pub new_status: ExpenseStatus,
}
