pub mod auth;
pub mod expense;
pub mod health;
pub mod notification;
