pub mod roles;
pub mod session_registry;
