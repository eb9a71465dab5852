//! Docker API proxy that attaches containers to the weave network

pub mod cidr;
pub mod config;
pub mod docker;
pub mod error;
pub mod intercept;
pub mod json;
pub mod proxy;
pub mod weave;

// Re-export commonly used types
pub use cidr::{weave_cidrs, CidrDecision, SkipReason};
pub use config::{ConfigLoader, ConfigValidator, ProxyConfig, TlsConfig};
pub use docker::DockerClient;
pub use error::{ProxyError, Result, UnmarshalWrongTypeError, ValidationError};
pub use json::{JsonObject, JsonObjectExt};
pub use proxy::Proxy;
pub use weave::{WeaveCommand, WeaveOutput, WeaveRunner};
