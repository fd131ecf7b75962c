// Application layer - Session handling, mode transitions and fan-out
pub mod broadcast;
pub mod demo_generator;
pub mod error;
pub mod relay_service;
pub mod session_registry;
pub mod system_state;
