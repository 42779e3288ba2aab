use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, Debug, FromRow, ToSchema)]
pub struct User {
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub email: Option<String>,
    pub role: String,
    pub account_locked: bool,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

/// Display data the directory resolves for an employee.
#[derive(Serialize, Deserialize, Debug, Clone, FromRow, ToSchema)]
pub struct EmployeeDisplay {
    pub name: String,
    pub email: Option<String>,
}
