use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

/// Which registry implementation backs the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    /// Single dispatcher task owning the room map (default).
    Dispatcher,
    /// Room map behind a read/write lock, mutated in the caller's task.
    Locked,
}

impl FromStr for HubMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dispatcher" => Ok(Self::Dispatcher),
            "locked" | "rwlock" => Ok(Self::Locked),
            other => Err(format!("unknown hub mode `{other}`")),
        }
    }
}

/// Settings consumed by the hub and the per-connection pumps.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub mode: HubMode,
    /// Slots in each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Slots in the dispatcher's command queue.
    pub command_capacity: usize,
    /// Event types never echoed back to connections of the originating user.
    pub no_echo_types: HashSet<String>,
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// Window in which the peer must show a sign of life.
    pub pong_wait: Duration,
    /// Keepalive ping period. Always shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound frame accepted from a client.
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            mode: HubMode::Dispatcher,
            outbound_capacity: 256,
            command_capacity: 1024,
            no_echo_types: HashSet::from(["TYPING".to_string()]),
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 8192,
        }
    }
}

/// Realtime API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HS256 secret used to verify access tokens.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Optional cap on concurrently open WebSocket connections.
    pub max_connections: Option<usize>,
    pub hub: HubConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = HubConfig::default();

        let pong_wait = secs(&var, "WS_PONG_WAIT_SECS").unwrap_or(defaults.pong_wait);
        let mut ping_period = secs(&var, "WS_PING_PERIOD_SECS").unwrap_or(pong_wait * 9 / 10);
        if ping_period >= pong_wait {
            tracing::warn!(
                ?ping_period,
                ?pong_wait,
                "ping period must be shorter than pong wait; using 9/10 of pong wait"
            );
            ping_period = pong_wait * 9 / 10;
        }

        let mode = match var("HUB_MODE") {
            Some(raw) => raw
                .parse::<HubMode>()
                .unwrap_or_else(|err| panic!("HUB_MODE: {err}")),
            None => defaults.mode,
        };

        // Set but empty means "echo everything", so this skips `var`.
        let no_echo_types = match lookup("HUB_NO_ECHO_TYPES") {
            Some(raw) => raw
                .split(',')
                .map(|t| t.trim().to_ascii_uppercase())
                .filter(|t| !t.is_empty())
                .collect(),
            None => defaults.no_echo_types,
        };

        Self {
            jwt_secret: var("JWT_SECRET").unwrap_or_else(|| panic!("JWT_SECRET env var is required")),
            port: parsed(&var, "PORT").unwrap_or(8080),
            max_connections: parsed(&var, "MAX_CONNECTIONS").filter(|n: &usize| *n > 0),
            hub: HubConfig {
                mode,
                outbound_capacity: parsed(&var, "HUB_OUTBOUND_CAPACITY")
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(defaults.outbound_capacity),
                command_capacity: parsed(&var, "HUB_COMMAND_CAPACITY")
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(defaults.command_capacity),
                no_echo_types,
                write_wait: secs(&var, "WS_WRITE_WAIT_SECS").unwrap_or(defaults.write_wait),
                pong_wait,
                ping_period,
                max_message_size: parsed(&var, "WS_MAX_MESSAGE_SIZE")
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(defaults.max_message_size),
            },
        }
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%name, %raw, "ignoring unparseable env var");
            None
        }
    }
}

fn secs(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<Duration> {
    parsed::<u64>(var, name)
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}
