pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the entry points the binary builds the router from.
pub use middleware::require_user;
pub use rest::ApiDoc;
pub use ws_handler::ws_handler;
