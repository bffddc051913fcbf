pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod stream;
pub mod sync;
pub mod version;
pub mod websocket_models; // Live stream envelope

pub use error::DashboardError;
