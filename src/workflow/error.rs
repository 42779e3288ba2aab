// src/workflow/error.rs
use axum::http::StatusCode;
use serde_json::json;

use crate::utils::api_response::ApiResponse;
use crate::workflow::state_machine::{ExpenseStatus, ReviewerRole};

/// Failure taxonomy of the approval workflow.
///
/// `WrongStage` is not a bug: it is the normal outcome of a stale client
/// (the request advanced or was rejected under them) and callers should
/// refresh rather than retry. `Database` means the transition did not commit
/// and a retry is safe.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Expense request not found")]
    NotFound,

    #[error("Invalid action '{0}': expected Pending, Approved, or Rejected")]
    InvalidAction(String),

    #[error("{role} cannot act on a request in status '{status}'")]
    WrongStage {
        role: ReviewerRole,
        status: ExpenseStatus,
    },

    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Database operation failed")]
    Database(#[from] sqlx::Error),
}

impl WorkflowError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::NotFound => StatusCode::NOT_FOUND,
            WorkflowError::InvalidAction(_) | WorkflowError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            WorkflowError::WrongStage { .. } => StatusCode::CONFLICT,
            WorkflowError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<WorkflowError> for ApiResponse<()> {
    fn from(err: WorkflowError) -> Self {
        let details = match &err {
            WorkflowError::Database(e) => Some(json!({ "error": e.to_string() })),
            WorkflowError::WrongStage { role, status } => Some(json!({
                "acting_role": role.as_str(),
                "current_status": status.as_str(),
            })),
            _ => None,
        };
        ApiResponse::error(err.status_code(), err.to_string(), details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_separate_client_mistakes_from_stale_clients() {
        assert_eq!(WorkflowError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            WorkflowError::InvalidAction("escalated".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WorkflowError::WrongStage {
                role: ReviewerRole::Hr,
                status: ExpenseStatus::PendingManagerApproval,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            WorkflowError::Validation("amount must be positive".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
