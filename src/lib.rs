pub mod api;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod server;
pub mod shutdown;
pub mod store;
