pub mod expense;
pub mod notification;
pub mod user;
