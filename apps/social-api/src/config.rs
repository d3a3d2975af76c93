use std::time::Duration;

/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Public origin used to turn relative avatar paths into absolute URLs.
    pub public_url: String,
    /// Browser origins allowed to make credentialed requests.
    pub cors_origins: Vec<String>,
    pub relay: RelayConfig,
}

/// Tuning knobs for the realtime relay and notification bridge.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// How long a delivery waits for room in a full outbound queue before dropping.
    pub enqueue_timeout: Duration,
    /// Minimum spacing between a typing indicator and the previous frame on the wire.
    pub typing_throttle: Duration,
    /// Capacity of the notification bus.
    pub notification_bus_capacity: usize,
    /// Maximum characters of message content copied into a notification preview.
    pub preview_max_chars: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            enqueue_timeout: Duration::from_millis(600),
            typing_throttle: Duration::from_millis(500),
            notification_bus_capacity: 256,
            preview_max_chars: 140,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let defaults = RelayConfig::default();
        Self {
            database_url: required_var("DATABASE_URL"),
            port: parsed_var("PORT").unwrap_or(8080),
            public_url: std::env::var("PUBLIC_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            relay: RelayConfig {
                outbound_queue_capacity: parsed_var("OUTBOUND_QUEUE_CAPACITY")
                    .unwrap_or(defaults.outbound_queue_capacity),
                enqueue_timeout: parsed_var("ENQUEUE_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.enqueue_timeout),
                typing_throttle: parsed_var("TYPING_THROTTLE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.typing_throttle),
                notification_bus_capacity: parsed_var("NOTIFICATION_BUS_CAPACITY")
                    .unwrap_or(defaults.notification_bus_capacity),
                preview_max_chars: parsed_var("PREVIEW_MAX_CHARS")
                    .unwrap_or(defaults.preview_max_chars),
            },
        }
    }

    /// Configuration that needs no environment: default relay tuning, no database.
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            port: 0,
            public_url: "http://localhost:8080".to_string(),
            cors_origins: Vec::new(),
            relay: RelayConfig::default(),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
