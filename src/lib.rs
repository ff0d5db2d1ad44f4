// Public API for integration tests and client-side embedding

pub mod api;
pub mod client;
pub mod config;
pub mod history;
pub mod hub;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod ticker;
pub mod transport;
pub mod types;
