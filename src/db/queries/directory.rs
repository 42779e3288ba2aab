// src/db/queries/directory.rs
//
// Who reports to whom. Reviewer scope comes from the assignment tables
// (employee_managers, employee_hr); Account Managers see every employee.
// Role checks always re-read the users table so a revoked role takes
// effect on the next request, not at the next login.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use sqlx::PgPool;

use crate::db::models::user::EmployeeDisplay;
use crate::workflow::error::WorkflowError;
use crate::workflow::state_machine::ReviewerRole;

/// ✅ **Subordinate-scope Cache Using `moka`**
pub type SubordinateCache = Arc<Cache<(i32, ReviewerRole), Arc<Vec<i32>>>>;

/// ✅ **Initialize the `moka` Cache**
pub fn create_subordinate_cache() -> SubordinateCache {
    Arc::new(
        Cache::builder()
            .time_to_live(Duration::from_secs(600)) // ✅ TTL = 10 minutes
            .build(),
    )
}

/// Re-reads the acting user's role from the database.
///
/// The JWT also carries a role claim, but tokens outlive role changes;
/// the database row is authoritative for review decisions.
pub async fn resolve_role(pool: &PgPool, user_id: i32) -> Result<ReviewerRole, WorkflowError> {
    let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    match role {
        Some(r) => ReviewerRole::parse(&r).ok_or_else(|| {
            WorkflowError::Validation(format!("Role '{r}' cannot review expense requests"))
        }),
        None => Err(WorkflowError::NotFound),
    }
}

/// The employee ids a reviewer is responsible for, cached for ten minutes.
///
/// Managers and HR are scoped by their assignment tables; Account Managers
/// review company-wide and get every employee.
pub async fn subordinates_of(
    pool: &PgPool,
    cache: &SubordinateCache,
    reviewer_id: i32,
    role: ReviewerRole,
) -> Result<Arc<Vec<i32>>, WorkflowError> {
    if let Some(cached) = cache.get(&(reviewer_id, role)) {
        return Ok(cached);
    }

    let ids: Vec<i32> = match role {
        ReviewerRole::Manager => {
            sqlx::query_scalar("SELECT employee_id FROM employee_managers WHERE manager_id = $1")
                .bind(reviewer_id)
                .fetch_all(pool)
                .await?
        }
        ReviewerRole::Hr => {
            sqlx::query_scalar("SELECT employee_id FROM employee_hr WHERE hr_id = $1")
                .bind(reviewer_id)
                .fetch_all(pool)
                .await?
        }
        ReviewerRole::AccountManager => {
            sqlx::query_scalar("SELECT id FROM users WHERE role = 'Employee'")
                .fetch_all(pool)
                .await?
        }
    };

    let ids = Arc::new(ids);
    cache.insert((reviewer_id, role), ids.clone());
    Ok(ids)
}

/// Display name and email for one employee, for queue rows.
pub async fn display(pool: &PgPool, employee_id: i32) -> Result<EmployeeDisplay, WorkflowError> {
    sqlx::query_as::<_, EmployeeDisplay>("SELECT name, email FROM users WHERE id = $1")
        .bind(employee_id)
        .fetch_optional(pool)
        .await?
        .ok_or(WorkflowError::NotFound)
}
