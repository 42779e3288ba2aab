// src/workflow/state_machine.rs
//
// The approval chain is a fixed linear sequence:
//   pending_manager_approval -> pending_hr_approval -> pending_account_mgr_approval -> approved
// with one terminal rejected state per reviewing role. Every legal move is
// derived here from (current status, acting role, action); handlers never
// compare status strings themselves.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::expense::ExpenseHistory;
use crate::workflow::error::WorkflowError;

/// Lifecycle status of an expense request.
///
/// Stored as the `expense_status` Postgres enum. A submission starts at
/// `PendingManagerApproval`; `Approved` and the three `*Rejected` values are
/// terminal.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, ToSchema)]
#[sqlx(type_name = "expense_status", rename_all = "snake_case", no_pg_array)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    PendingManagerApproval,
    PendingHrApproval,
    PendingAccountMgrApproval,
    MgrRejected,
    HrRejected,
    AccMgrRejected,
    Approved,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseStatus::PendingManagerApproval => "pending_manager_approval",
            ExpenseStatus::PendingHrApproval => "pending_hr_approval",
            ExpenseStatus::PendingAccountMgrApproval => "pending_account_mgr_approval",
            ExpenseStatus::MgrRejected => "mgr_rejected",
            ExpenseStatus::HrRejected => "hr_rejected",
            ExpenseStatus::AccMgrRejected => "acc_mgr_rejected",
            ExpenseStatus::Approved => "approved",
        }
    }

    /// The role that may act while the request sits at this status, if any.
    pub fn owning_role(&self) -> Option<ReviewerRole> {
        match self {
            ExpenseStatus::PendingManagerApproval => Some(ReviewerRole::Manager),
            ExpenseStatus::PendingHrApproval => Some(ReviewerRole::Hr),
            ExpenseStatus::PendingAccountMgrApproval => Some(ReviewerRole::AccountManager),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.owning_role().is_none()
    }
}

impl std::fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Lets a Vec<ExpenseStatus> bind into `status = ANY($n)` queue filters.
impl sqlx::postgres::PgHasArrayType for ExpenseStatus {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_expense_status")
    }
}

/// The three reviewing roles of the approval chain, in stage order.
///
/// Employees submit but never review; they are deliberately absent here so a
/// submission role can never be routed into the state machine.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
pub enum ReviewerRole {
    Manager,
    #[serde(rename = "HR")]
    Hr,
    #[serde(rename = "Account Manager")]
    AccountManager,
}

impl ReviewerRole {
    /// Parses the role string carried in the users table / JWT claims.
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim() {
            "Manager" => Some(ReviewerRole::Manager),
            "HR" => Some(ReviewerRole::Hr),
            "Account Manager" => Some(ReviewerRole::AccountManager),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewerRole::Manager => "Manager",
            ReviewerRole::Hr => "HR",
            ReviewerRole::AccountManager => "Account Manager",
        }
    }

    /// The single pending status this role owns.
    pub fn pending_status(&self) -> ExpenseStatus {
        match self {
            ReviewerRole::Manager => ExpenseStatus::PendingManagerApproval,
            ReviewerRole::Hr => ExpenseStatus::PendingHrApproval,
            ReviewerRole::AccountManager => ExpenseStatus::PendingAccountMgrApproval,
        }
    }

    /// This role's terminal rejected status.
    pub fn rejected_status(&self) -> ExpenseStatus {
        match self {
            ReviewerRole::Manager => ExpenseStatus::MgrRejected,
            ReviewerRole::Hr => ExpenseStatus::HrRejected,
            ReviewerRole::AccountManager => ExpenseStatus::AccMgrRejected,
        }
    }

    /// Where an approval at this stage sends the request.
    pub fn next_on_approval(&self) -> ExpenseStatus {
        match self {
            ReviewerRole::Manager => ExpenseStatus::PendingHrApproval,
            ReviewerRole::Hr => ExpenseStatus::PendingAccountMgrApproval,
            ReviewerRole::AccountManager => ExpenseStatus::Approved,
        }
    }

    /// The statuses a reviewer's queue surfaces: their own stage, the stage
    /// directly downstream, their own rejections, and fully approved
    /// requests. Requests a reviewer has passed along remain visible.
    pub fn visible_statuses(&self) -> &'static [ExpenseStatus] {
        match self {
            ReviewerRole::Manager => &[
                ExpenseStatus::PendingManagerApproval,
                ExpenseStatus::PendingHrApproval,
                ExpenseStatus::MgrRejected,
                ExpenseStatus::Approved,
            ],
            ReviewerRole::Hr => &[
                ExpenseStatus::PendingHrApproval,
                ExpenseStatus::PendingAccountMgrApproval,
                ExpenseStatus::HrRejected,
                ExpenseStatus::Approved,
            ],
            ReviewerRole::AccountManager => &[
                ExpenseStatus::PendingAccountMgrApproval,
                ExpenseStatus::AccMgrRejected,
                ExpenseStatus::Approved,
            ],
        }
    }
}

impl std::fmt::Display for ReviewerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The action a reviewer takes at their stage.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
pub enum ReviewAction {
    Pending,
    Approved,
    Rejected,
}

impl ReviewAction {
    /// Normalizes caller input; anything outside the three-word set is an
    /// `InvalidAction`.
    pub fn parse(input: &str) -> Result<Self, WorkflowError> {
        match input.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReviewAction::Pending),
            "approved" => Ok(ReviewAction::Approved),
            "rejected" => Ok(ReviewAction::Rejected),
            _ => Err(WorkflowError::InvalidAction(input.to_string())),
        }
    }

    /// The raw action value recorded in the history ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Pending => "Pending",
            ReviewAction::Approved => "Approved",
            ReviewAction::Rejected => "Rejected",
        }
    }
}

/// The transition table: (current status, acting role, action) -> next status.
///
/// A role may only act while the request sits at its own pending status;
/// everything else is `WrongStage`, including any attempt to move a request
/// out of a terminal status. Actor-level scoping (is this reviewer actually
/// assigned to this employee?) is enforced by the query layer, not here.
pub fn transition(
    current: ExpenseStatus,
    role: ReviewerRole,
    action: ReviewAction,
) -> Result<ExpenseStatus, WorkflowError> {
    if current != role.pending_status() {
        return Err(WorkflowError::WrongStage {
            role,
            status: current,
        });
    }

    Ok(match action {
        ReviewAction::Pending => role.pending_status(),
        ReviewAction::Approved => role.next_on_approval(),
        ReviewAction::Rejected => role.rejected_status(),
    })
}

/// The rejection reason shown to downstream reviewers: the latest entry for
/// the given role that carries a reason. History keeps every entry; only the
/// newest one is authoritative for display.
pub fn latest_reason_for_role<'a>(
    history: &'a [ExpenseHistory],
    role: ReviewerRole,
) -> Option<&'a str> {
    history
        .iter()
        .filter(|h| h.action_role == role.as_str())
        .filter_map(|h| h.reason.as_deref())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(role: ReviewerRole, action: ReviewAction, reason: Option<&str>) -> ExpenseHistory {
        ExpenseHistory {
            history_id: 0,
            request_id: 1,
            action_by: 42,
            action_role: role.as_str().to_string(),
            action: action.as_str().to_string(),
            reason: reason.map(str::to_string),
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn approvals_advance_through_every_stage_in_order() {
        let mut status = ExpenseStatus::PendingManagerApproval;
        let chain = [
            (ReviewerRole::Manager, ExpenseStatus::PendingHrApproval),
            (ReviewerRole::Hr, ExpenseStatus::PendingAccountMgrApproval),
            (ReviewerRole::AccountManager, ExpenseStatus::Approved),
        ];
        for (role, expected) in chain {
            status = transition(status, role, ReviewAction::Approved).unwrap();
            assert_eq!(status, expected);
        }
        assert!(status.is_terminal());
    }

    #[test]
    fn no_stage_can_be_skipped() {
        // HR and Account Manager cannot touch a freshly submitted request.
        for role in [ReviewerRole::Hr, ReviewerRole::AccountManager] {
            for action in [
                ReviewAction::Pending,
                ReviewAction::Approved,
                ReviewAction::Rejected,
            ] {
                let err =
                    transition(ExpenseStatus::PendingManagerApproval, role, action).unwrap_err();
                assert!(matches!(err, WorkflowError::WrongStage { .. }));
            }
        }
    }

    #[test]
    fn rejected_statuses_are_terminal_for_everyone() {
        for terminal in [
            ExpenseStatus::MgrRejected,
            ExpenseStatus::HrRejected,
            ExpenseStatus::AccMgrRejected,
            ExpenseStatus::Approved,
        ] {
            for role in [
                ReviewerRole::Manager,
                ReviewerRole::Hr,
                ReviewerRole::AccountManager,
            ] {
                let err = transition(terminal, role, ReviewAction::Approved).unwrap_err();
                assert!(matches!(err, WorkflowError::WrongStage { .. }));
            }
        }
    }

    #[test]
    fn pending_re_flags_the_roles_own_stage() {
        let status = transition(
            ExpenseStatus::PendingHrApproval,
            ReviewerRole::Hr,
            ReviewAction::Pending,
        )
        .unwrap();
        assert_eq!(status, ExpenseStatus::PendingHrApproval);
    }

    #[test]
    fn rejection_lands_in_the_roles_own_terminal_state() {
        assert_eq!(
            transition(
                ExpenseStatus::PendingManagerApproval,
                ReviewerRole::Manager,
                ReviewAction::Rejected,
            )
            .unwrap(),
            ExpenseStatus::MgrRejected
        );
        assert_eq!(
            transition(
                ExpenseStatus::PendingAccountMgrApproval,
                ReviewerRole::AccountManager,
                ReviewAction::Rejected,
            )
            .unwrap(),
            ExpenseStatus::AccMgrRejected
        );
    }

    #[test]
    fn stale_precondition_is_wrong_stage_not_double_apply() {
        // Two clients both observed pending_manager_approval; the first
        // approval advances the request, the second must fail.
        let after_first = transition(
            ExpenseStatus::PendingManagerApproval,
            ReviewerRole::Manager,
            ReviewAction::Approved,
        )
        .unwrap();
        let second = transition(after_first, ReviewerRole::Manager, ReviewAction::Approved);
        assert!(matches!(second, Err(WorkflowError::WrongStage { .. })));
    }

    #[test]
    fn action_parsing_is_case_insensitive_and_closed() {
        assert_eq!(ReviewAction::parse("approved").unwrap(), ReviewAction::Approved);
        assert_eq!(ReviewAction::parse("APPROVED").unwrap(), ReviewAction::Approved);
        assert_eq!(ReviewAction::parse(" Pending ").unwrap(), ReviewAction::Pending);
        assert!(matches!(
            ReviewAction::parse("escalated"),
            Err(WorkflowError::InvalidAction(_))
        ));
    }

    #[test]
    fn reviewer_role_parsing_rejects_unknown_roles() {
        assert_eq!(ReviewerRole::parse("HR"), Some(ReviewerRole::Hr));
        assert_eq!(
            ReviewerRole::parse("Account Manager"),
            Some(ReviewerRole::AccountManager)
        );
        assert_eq!(ReviewerRole::parse("Employee"), None);
        assert_eq!(ReviewerRole::parse("admin"), None);
    }

    #[test]
    fn queue_visibility_excludes_other_roles_stages() {
        let manager_view = ReviewerRole::Manager.visible_statuses();
        assert!(!manager_view.contains(&ExpenseStatus::PendingAccountMgrApproval));
        assert!(!manager_view.contains(&ExpenseStatus::HrRejected));

        let hr_view = ReviewerRole::Hr.visible_statuses();
        assert!(!hr_view.contains(&ExpenseStatus::PendingManagerApproval));
        assert!(!hr_view.contains(&ExpenseStatus::MgrRejected));
    }

    #[test]
    fn latest_same_role_reason_wins() {
        let history = vec![
            entry(ReviewerRole::Manager, ReviewAction::Pending, Some("need receipt")),
            entry(ReviewerRole::Manager, ReviewAction::Approved, None),
            entry(ReviewerRole::Hr, ReviewAction::Rejected, Some("missing receipt")),
        ];
        assert_eq!(
            latest_reason_for_role(&history, ReviewerRole::Manager),
            Some("need receipt")
        );
        assert_eq!(
            latest_reason_for_role(&history, ReviewerRole::Hr),
            Some("missing receipt")
        );
        assert_eq!(
            latest_reason_for_role(&history, ReviewerRole::AccountManager),
            None
        );
    }

    #[test]
    fn gbp_scenario_runs_the_documented_path() {
        // submit -> manager approves -> HR rejects with a reason -> frozen.
        let mut history: Vec<ExpenseHistory> = Vec::new();
        let mut status = ExpenseStatus::PendingManagerApproval;

        status = transition(status, ReviewerRole::Manager, ReviewAction::Approved).unwrap();
        history.push(entry(ReviewerRole::Manager, ReviewAction::Approved, None));
        assert_eq!(status, ExpenseStatus::PendingHrApproval);
        assert_eq!(history.len(), 1);

        status = transition(status, ReviewerRole::Hr, ReviewAction::Rejected).unwrap();
        history.push(entry(
            ReviewerRole::Hr,
            ReviewAction::Rejected,
            Some("missing receipt"),
        ));
        assert_eq!(status, ExpenseStatus::HrRejected);
        assert_eq!(history.len(), 2);
        assert_eq!(
            latest_reason_for_role(&history, ReviewerRole::Hr),
            Some("missing receipt")
        );

        for role in [
            ReviewerRole::Manager,
            ReviewerRole::Hr,
            ReviewerRole::AccountManager,
        ] {
            assert!(transition(status, role, ReviewAction::Approved).is_err());
        }
        // History only grows on applied transitions.
        assert_eq!(history.len(), 2);
    }
}
