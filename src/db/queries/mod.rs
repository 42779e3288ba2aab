pub mod directory;
pub mod expense;
pub mod notification;
