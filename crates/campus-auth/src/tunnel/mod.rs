//! Route selection between direct access and the WebVPN gateway.

mod webvpn;

pub use webvpn::{decrypt_host, encrypt_host, WebVpnCodec, WebVpnError};

use async_trait::async_trait;
use campus_config_and_utils::RoutePreference;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long a reachability probe result is reused.
const PROBE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Concrete route for one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Direct,
    /// Every request is rewritten through the WebVPN gateway.
    WebVpn,
}

impl Route {
    pub fn is_tunneled(self) -> bool {
        matches!(self, Route::WebVpn)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => f.write_str("direct"),
            Route::WebVpn => f.write_str("webvpn"),
        }
    }
}

/// Answers whether campus hosts are reachable without the gateway.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn direct_reachable(&self) -> bool;
}

/// Probes with a short HTTP GET against a campus-only host.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn direct_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                debug!(status = response.status().as_u16(), url = %self.url, "Direct probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, url = %self.url, "Direct probe failed");
                false
            }
        }
    }
}

/// A probe with a fixed answer.
pub struct StaticProbe(pub bool);

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn direct_reachable(&self) -> bool {
        self.0
    }
}

/// Picks the route for a login attempt.
///
/// Explicit preferences win. `Auto` falls back to the configured default
/// and, if that is `Auto` too, to a cached reachability probe.
pub struct TunnelResolver {
    default: RoutePreference,
    probe: Arc<dyn ReachabilityProbe>,
    cached: Mutex<Option<(Route, Instant)>>,
}

impl TunnelResolver {
    pub fn new(default: RoutePreference, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self {
            default,
            probe,
            cached: Mutex::new(None),
        }
    }

    pub async fn resolve(&self, preference: RoutePreference) -> Route {
        let effective = match preference {
            RoutePreference::Auto => self.default,
            explicit => explicit,
        };
        match effective {
            RoutePreference::Direct => Route::Direct,
            RoutePreference::WebVpn => Route::WebVpn,
            RoutePreference::Auto => self.probe_route().await,
        }
    }

    /// Drop the cached probe result, e.g. after the network changed.
    pub fn forget_probe(&self) {
        *self.cached.lock() = None;
    }

    async fn probe_route(&self) -> Route {
        if let Some((route, at)) = *self.cached.lock() {
            if at.elapsed() < PROBE_CACHE_TTL {
                return route;
            }
        }

        let route = if self.probe.direct_reachable().await {
            Route::Direct
        } else {
            Route::WebVpn
        };
        info!(route = %route, "Selected login route by probe");
        *self.cached.lock() = Some((route, Instant::now()));
        route
    }
}
