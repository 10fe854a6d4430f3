use crate::transport::{TransportConfig, DEFAULT_FETCH_TIMEOUT, RECONNECT_DELAY};
use clap::Parser;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8080/";
pub const DEFAULT_DATABASES: &str = "local,old,newdb";
const DEFAULT_LOG_DIR: &str = ".hitter/logs";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "hitter-dash", about = "Live dashboard for a fleet of load-generating workers")]
pub struct Args {
    /// Service base URL; the websocket and state endpoints are derived from it.
    #[arg(long, default_value = "")]
    pub url: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    /// Log connection and fleet events instead of drawing the terminal dashboard.
    #[arg(long)]
    pub headless: bool,
    /// Seconds to wait for the full-state fetch during a resync.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
    pub fetch_timeout: u64,
    /// Databases the `b` key cycles through.
    #[arg(long, default_value = DEFAULT_DATABASES)]
    pub databases: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid service url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported url scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
    #[error("fetch timeout must be at least one second")]
    ZeroTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub ws: Url,
    pub state: Url,
}

impl Endpoints {
    /// Secure bases get a secure socket and fetch; plain ones stay plain.
    pub fn derive(base: &Url) -> Result<Self, ConfigError> {
        let (ws_scheme, http_scheme) = match base.scheme() {
            "https" | "wss" => ("wss", "https"),
            "http" | "ws" => ("ws", "http"),
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        let host = base.host_str().ok_or_else(|| ConfigError::InvalidUrl {
            url: base.to_string(),
            reason: "missing host".to_string(),
        })?;
        let authority = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let prefix = base.path().trim_end_matches('/');
        let build = |scheme: &str, path: &str| {
            Url::parse(&format!("{scheme}://{authority}{prefix}{path}")).map_err(|err| {
                ConfigError::InvalidUrl {
                    url: base.to_string(),
                    reason: err.to_string(),
                }
            })
        };
        Ok(Self {
            ws: build(ws_scheme, "/ws")?,
            state: build(http_scheme, "/state/")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub endpoints: Endpoints,
    pub log_dir: String,
    pub log_stdout: bool,
    pub headless: bool,
    pub fetch_timeout: Duration,
    pub databases: Vec<String>,
}

impl RuntimeConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            ws_url: self.endpoints.ws.clone(),
            state_url: self.endpoints.state.clone(),
            reconnect_delay: RECONNECT_DELAY,
            fetch_timeout: self.fetch_timeout,
        }
    }
}

pub fn load_config(args: Args) -> Result<RuntimeConfig, ConfigError> {
    let base = resolve_url(&args.url)?;
    if args.fetch_timeout == 0 {
        return Err(ConfigError::ZeroTimeout);
    }
    Ok(RuntimeConfig {
        endpoints: Endpoints::derive(&base)?,
        log_dir: resolve_log_dir(&args.log_dir),
        log_stdout: resolve_log_stdout(),
        headless: args.headless,
        fetch_timeout: Duration::from_secs(args.fetch_timeout),
        databases: parse_databases(&args.databases),
    })
}

fn resolve_url(flag: &str) -> Result<Url, ConfigError> {
    let raw = if !flag.trim().is_empty() {
        flag.trim().to_string()
    } else {
        match env::var("HITTER_URL") {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => DEFAULT_URL.to_string(),
        }
    };
    Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl {
        url: raw.clone(),
        reason: err.to_string(),
    })
}

fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("HITTER_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_LOG_DIR.to_string()
}

fn resolve_log_stdout() -> bool {
    if let Ok(value) = env::var("HITTER_LOG_STDOUT") {
        match value.trim() {
            "1" | "true" | "TRUE" | "yes" | "YES" => return true,
            "0" | "false" | "FALSE" | "no" | "NO" => return false,
            _ => {}
        }
    }
    false
}

fn parse_databases(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|db| !db.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(base: &str) -> Endpoints {
        Endpoints::derive(&Url::parse(base).expect("base url")).expect("endpoints")
    }

    #[test]
    fn plain_base_uses_plain_transports() {
        let derived = endpoints("http://dash.local:8080/");
        assert_eq!(derived.ws.as_str(), "ws://dash.local:8080/ws");
        assert_eq!(derived.state.as_str(), "http://dash.local:8080/state/");
    }

    #[test]
    fn secure_base_uses_secure_transports() {
        let derived = endpoints("https://dash.example.com");
        assert_eq!(derived.ws.as_str(), "wss://dash.example.com/ws");
        assert_eq!(derived.state.as_str(), "https://dash.example.com/state/");

        let derived = endpoints("wss://dash.example.com:9443");
        assert_eq!(derived.state.as_str(), "https://dash.example.com:9443/state/");
    }

    #[test]
    fn path_prefix_is_kept() {
        let derived = endpoints("http://10.0.0.5:8080/hitter/");
        assert_eq!(derived.ws.as_str(), "ws://10.0.0.5:8080/hitter/ws");
        assert_eq!(derived.state.as_str(), "http://10.0.0.5:8080/hitter/state/");
    }

    #[test]
    fn rejects_unknown_scheme() {
        let base = Url::parse("ftp://dash.local/").expect("url");
        assert_eq!(
            Endpoints::derive(&base),
            Err(ConfigError::UnsupportedScheme("ftp".to_string()))
        );
    }

    #[test]
    fn flag_values_win_and_are_validated() {
        let config = load_config(Args {
            url: "https://fleet.example.com/".to_string(),
            log_dir: "/tmp/hitter-logs".to_string(),
            fetch_timeout: 3,
            databases: " local, newdb ,,".to_string(),
            ..Args::default()
        })
        .expect("config");
        assert_eq!(config.endpoints.ws.as_str(), "wss://fleet.example.com/ws");
        assert_eq!(config.log_dir, "/tmp/hitter-logs");
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.databases, vec!["local", "newdb"]);

        let err = load_config(Args {
            url: "not a url".to_string(),
            fetch_timeout: 3,
            ..Args::default()
        })
        .expect_err("bad url");
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));

        let err = load_config(Args {
            url: "http://a/".to_string(),
            ..Args::default()
        })
        .expect_err("zero timeout");
        assert_eq!(err, ConfigError::ZeroTimeout);
    }

    #[test]
    fn parses_cli_flags() {
        let args = Args::try_parse_from([
            "hitter-dash",
            "--url",
            "http://h:1/",
            "--headless",
            "--fetch-timeout",
            "9",
        ])
        .expect("args");
        assert!(args.headless);
        assert_eq!(args.fetch_timeout, 9);
        assert_eq!(args.databases, DEFAULT_DATABASES);
    }
}
