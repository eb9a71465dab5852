//! Map Docker API paths to interceptors

use super::{
    CreateContainerInterceptor, CreateExecInterceptor, InspectContainerInterceptor,
    InspectExecInterceptor, Interceptor, NullInterceptor, StartContainerInterceptor,
};
use crate::proxy::Proxy;
use regex::Regex;

/// Endpoints the proxy rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    CreateContainer,
    StartContainer,
    InspectContainer,
    CreateExec,
    InspectExec,
    /// Anything else is proxied untouched.
    Null,
}

impl Route {
    /// Build the interceptor for this route.
    pub fn interceptor<'p>(self, proxy: &'p Proxy) -> Box<dyn Interceptor + 'p> {
        match self {
            Route::CreateContainer => Box::new(CreateContainerInterceptor::new(proxy)),
            Route::StartContainer => Box::new(StartContainerInterceptor::new(proxy)),
            Route::InspectContainer => Box::new(InspectContainerInterceptor::new(proxy)),
            Route::CreateExec => Box::new(CreateExecInterceptor::new(proxy)),
            Route::InspectExec => Box::new(InspectExecInterceptor::new(proxy)),
            Route::Null => Box::new(NullInterceptor),
        }
    }
}

/// Ordered endpoint table, compiled once; the first matching pattern wins.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<(Regex, Route)>,
    container_in_path: Regex,
}

fn docker_api_endpoint(endpoint: &str) -> Regex {
    Regex::new(&format!(r"^(/v[0-9\.]*)?/{endpoint}$")).expect("endpoint patterns are valid")
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: vec![
                (docker_api_endpoint("containers/create"), Route::CreateContainer),
                (docker_api_endpoint("containers/[^/]*/(re)?start"), Route::StartContainer),
                (docker_api_endpoint("containers/[^/]*/json"), Route::InspectContainer),
                (docker_api_endpoint("containers/[^/]*/exec"), Route::CreateExec),
                (docker_api_endpoint("exec/[^/]*/json"), Route::InspectExec),
            ],
            container_in_path: Regex::new(r"^(/v[0-9\.]*)?/containers/([^/]*)/.*")
                .expect("container path pattern is valid"),
        }
    }

    /// Select the route for a request path. Method, headers and body are not consulted.
    pub fn route(&self, path: &str) -> Route {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.is_match(path))
            .map_or(Route::Null, |(_, route)| *route)
    }

    /// Container ID or name from a `/containers/{id}/...` path.
    pub fn container_id<'a>(&self, path: &'a str) -> Option<&'a str> {
        self.container_in_path
            .captures(path)
            .and_then(|caps| caps.get(2))
            .map(|m| m.as_str())
            .filter(|id| !id.is_empty())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
