//! Configuration management for the proxy

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{ProxyConfig, TlsConfig};
pub use validator::ConfigValidator;
