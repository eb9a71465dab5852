//! Decide whether and how a container joins the weave network

use thiserror::Error;

const WEAVE_CIDR: &str = "WEAVE_CIDR=";

/// Outcome of evaluating a container against the attachment policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidrDecision {
    /// Attach with these addresses; an empty list asks weave to allocate one.
    Attach(Vec<String>),
    /// Leave the container alone.
    Skip(SkipReason),
}

/// Why a container is left off the weave network
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("the container was created with the '--net=host' option")]
    HostNetwork,

    #[error("the container was created with the '--net={0}' option")]
    SharedNetwork(String),

    #[error("the container was created with the '-e WEAVE_CIDR=none' option")]
    ExplicitOptOut,

    #[error("the container was created without specifying an IP address with '-e WEAVE_CIDR=...' and the proxy was started with the '--no-default-ipalloc' option")]
    NoDefaultAllocation,
}

/// Map a container's network mode and environment to its weave addresses.
pub fn weave_cidrs(network_mode: &str, env: &[String], no_default_ipam: bool) -> CidrDecision {
    if network_mode == "host" {
        return CidrDecision::Skip(SkipReason::HostNetwork);
    }
    if network_mode.starts_with("container:") {
        return CidrDecision::Skip(SkipReason::SharedNetwork(network_mode.to_string()));
    }

    if let Some(value) = env.iter().find_map(|e| e.strip_prefix(WEAVE_CIDR)) {
        if value == "none" {
            return CidrDecision::Skip(SkipReason::ExplicitOptOut);
        }
        return CidrDecision::Attach(value.split_whitespace().map(str::to_string).collect());
    }

    if no_default_ipam {
        CidrDecision::Skip(SkipReason::NoDefaultAllocation)
    } else {
        CidrDecision::Attach(Vec::new())
    }
}
