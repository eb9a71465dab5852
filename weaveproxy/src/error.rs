//! Error types for proxy operations

use hyper::StatusCode;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    WrongType(#[from] UnmarshalWrongTypeError),

    #[error("Malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No such container: {id}")]
    NoSuchContainer { id: String },

    #[error("No such image: {name}")]
    NoSuchImage { name: String },

    #[error("No such exec instance: {id}")]
    NoSuchExec { id: String },

    #[error("No container ID in path {path}")]
    NoContainerInPath { path: String },

    #[error("Docker engine returned {status}: {message}")]
    Engine { status: StatusCode, message: String },

    #[error("Cannot connect to the Docker engine at {path}: {source}")]
    EngineConnect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid HTTP message: {0}")]
    HttpMessage(#[from] hyper::http::Error),

    #[error("{stderr}")]
    Weave { stderr: String },

    #[error("Failed to run weave: {0}")]
    WeaveExec(#[source] std::io::Error),

    #[error("Invalid address {cidr:?} reported by weave: {source}")]
    InvalidCidr {
        cidr: String,
        source: ipnet::AddrParseError,
    },

    #[error("Could not find the weavewait volume: {0}")]
    WaitVolume(String),

    #[error("Incorrect hostname match '{pattern}': {source}")]
    HostnameMatch {
        pattern: String,
        source: regex::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Failed to load {what} from {path}: {source}")]
    FileLoad {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Cannot listen on {addr}: {source}")]
    Listen {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status returned to the client when a request is answered locally
    /// instead of being forwarded to the engine.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::WrongType(_) | ProxyError::Json(_) => StatusCode::BAD_REQUEST,
            ProxyError::NoSuchContainer { .. }
            | ProxyError::NoSuchImage { .. }
            | ProxyError::NoSuchExec { .. } => StatusCode::NOT_FOUND,
            ProxyError::EngineConnect { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A JSON field held a value of a different type than the caller expected.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Wrong type for {field} field, expected {expected}, but got {}", json_type_name(.got))]
pub struct UnmarshalWrongTypeError {
    pub field: String,
    pub expected: &'static str,
    pub got: Value,
}

impl UnmarshalWrongTypeError {
    pub fn new(field: &str, expected: &'static str, got: &Value) -> Self {
        Self {
            field: field.to_string(),
            expected,
            got: got.clone(),
        }
    }
}

/// Name of the JSON type of a decoded value, for diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No listen addresses configured")]
    NoListenAddrs,

    #[error("Invalid protocol format: {proto:?}")]
    InvalidProtocol { proto: String },

    #[error("Invalid hostname match pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("--with-dns and --without-dns are mutually exclusive")]
    ConflictingDns,

    #[error("TLS requested but {what} is missing: {path}")]
    MissingTlsFile { what: &'static str, path: PathBuf },
}
