//! Fedgate server library: configuration, application state and the
//! federation-aware HTTP surface.
//!
//! Requests under the API prefix are classified by [`router::classify`] and
//! either forwarded untouched to the local backend ([`proxy`]), answered with
//! a merged view ([`merge`]) or dispatched to a remote node's data plane
//! ([`federation`]).

pub mod api;
pub mod config;
pub mod federation;
pub mod merge;
pub mod proxy;
pub mod router;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::{Extension, Router};
use config::Config;
use fedgate_negotiation::{ManagementClient, NegotiationClient};
use fedgate_types::RegistryError;
use federation::Federation;
use proxy::Backend;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum accepted request body size.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared application state.
pub struct AppState {
    /// Client-facing path prefix, without a trailing slash.
    pub api_prefix: String,
    pub backend: Backend,
    pub federation: Federation,
}

impl AppState {
    pub fn new(api_prefix: &str, backend: Backend, federation: Federation) -> Self {
        Self {
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
            backend,
            federation,
        }
    }

    /// Wires the backend, control-plane client and node registry from
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the configured nodes are invalid.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let registry = config.node_registry()?;
        let control_plane = &config.control_plane;
        let timeout = Duration::from_secs(control_plane.timeout_secs);

        let management = ManagementClient::new(
            control_plane.management_url.as_str(),
            control_plane.api_key.as_str(),
            timeout,
        );
        let negotiator =
            NegotiationClient::new(Arc::new(management), control_plane.negotiation_settings());
        let backend = Backend::new(
            config.backend.base_url.as_str(),
            Duration::from_secs(config.backend.timeout_secs),
        );

        Ok(Self::new(
            &config.server.api_prefix,
            backend,
            Federation::new(registry, negotiator, timeout),
        ))
    }

    /// Resource path of a client path, or `None` outside the API prefix.
    pub fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.api_prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/federation/nodes", get(api::list_nodes_handler))
        .fallback(api::gateway_handler)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedgate_negotiation::NegotiationSettings;
    use fedgate_types::NodeRegistry;

    fn state(prefix: &str) -> AppState {
        let management = ManagementClient::new("http://127.0.0.1:9", "", Duration::from_secs(1));
        let negotiator = NegotiationClient::new(Arc::new(management), NegotiationSettings::default());
        AppState::new(
            prefix,
            Backend::new("http://127.0.0.1:9", Duration::from_secs(1)),
            Federation::new(NodeRegistry::default(), negotiator, Duration::from_secs(1)),
        )
    }

    #[test]
    fn prefix_is_stripped_on_segment_boundaries() {
        let state = state("/WebAPI/");
        assert_eq!(state.strip_prefix("/WebAPI/source/sources"), Some("/source/sources"));
        assert_eq!(state.strip_prefix("/WebAPI"), Some(""));
        assert_eq!(state.strip_prefix("/WebAPIx/info"), None);
        assert_eq!(state.strip_prefix("/other"), None);
    }

    #[test]
    fn empty_prefix_claims_every_path() {
        assert_eq!(state("").strip_prefix("/info"), Some("/info"));
    }
}
