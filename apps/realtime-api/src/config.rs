/// Realtime API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared Redis instance backing the presence store. When unset, the
    /// service falls back to an in-process store (single-node deployments
    /// and tests).
    pub redis_url: Option<String>,
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4003),
        }
    }
}
