// Presentation layer - HTTP and WebSocket entry points
pub mod app_state;
pub mod handlers;
