//! Serving the Docker API: listeners, TLS and request dispatch

pub mod listener;
mod server;
pub mod tls;

pub use listener::{BoundListener, Listener};
pub use server::Proxy;

#[cfg(test)]
pub(crate) use server::testing;
