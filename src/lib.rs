pub mod config;
pub mod errors;
pub mod gateway;
pub mod http;
pub mod proxy;
pub mod retry;
pub mod store;

pub use config::Config;
pub use errors::{GatewayError, GatewayResult};
