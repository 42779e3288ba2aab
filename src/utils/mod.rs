pub mod api_response;
pub mod code;
pub mod notification;
