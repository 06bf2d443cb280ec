// crates/server/src/config.rs
//! Server configuration: command-line flags over environment variables over
//! built-in defaults.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use autofollow_core::{SiteError, SiteProfile};
use autofollow_observability::{LogConfig, LogFormat, DEFAULT_FILTER};
use clap::Parser;
use thiserror::Error;

use crate::state::DEFAULT_KEEPALIVE;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

pub const HOST_ENV: &str = "AUTOFOLLOW_HOST";
pub const PORT_ENV: &str = "AUTOFOLLOW_PORT";
/// Generic fallback honoured by most hosting platforms.
pub const FALLBACK_PORT_ENV: &str = "PORT";
pub const WEBDRIVER_URL_ENV: &str = "AUTOFOLLOW_WEBDRIVER_URL";
pub const HEADLESS_ENV: &str = "AUTOFOLLOW_HEADLESS";
pub const SITE_ENV: &str = "AUTOFOLLOW_SITE";
pub const KEEPALIVE_ENV: &str = "AUTOFOLLOW_KEEPALIVE_SECS";
pub const LOG_FORMAT_ENV: &str = "AUTOFOLLOW_LOG_FORMAT";
pub const LOG_DIR_ENV: &str = "AUTOFOLLOW_LOG_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Site(#[from] SiteError),
}

impl ConfigError {
    fn invalid(name: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::Invalid {
            name,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// Drive a browser through a site's list pages and follow qualifying users.
#[derive(Debug, Default, Parser)]
#[command(name = "autofollow", version, about)]
pub struct Cli {
    /// Address to bind [env: AUTOFOLLOW_HOST]
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind [env: AUTOFOLLOW_PORT, PORT]
    #[arg(long, short)]
    pub port: Option<u16>,

    /// WebDriver endpoint [env: AUTOFOLLOW_WEBDRIVER_URL]
    #[arg(long)]
    pub webdriver_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Site profile YAML [env: AUTOFOLLOW_SITE]
    #[arg(long)]
    pub site: Option<PathBuf>,

    /// Seconds of client silence before a keepalive [env: AUTOFOLLOW_KEEPALIVE_SECS]
    #[arg(long)]
    pub keepalive_secs: Option<u64>,

    /// compact or json [env: AUTOFOLLOW_LOG_FORMAT]
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Also write a daily-rolling log file here [env: AUTOFOLLOW_LOG_DIR]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub webdriver_url: String,
    pub headless: bool,
    pub site_path: Option<PathBuf>,
    pub keepalive: Duration,
    pub log: LogConfig,
}

impl ServerConfig {
    /// Parse the process arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(Cli::parse(), |name| std::env::var(name).ok())
    }

    /// Merge `cli` over the variables returned by `env`.
    pub fn resolve(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host_raw = cli
            .host
            .or_else(|| env(HOST_ENV))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host = host_raw
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::invalid(HOST_ENV, &host_raw, e))?;

        let port_var = env(PORT_ENV)
            .map(|raw| (PORT_ENV, raw))
            .or_else(|| env(FALLBACK_PORT_ENV).map(|raw| (FALLBACK_PORT_ENV, raw)));
        let port = match cli.port {
            Some(port) => port,
            None => match port_var {
                Some((name, raw)) => raw
                    .trim()
                    .parse()
                    .map_err(|e| ConfigError::invalid(name, &raw, e))?,
                None => DEFAULT_PORT,
            },
        };

        let webdriver_url = cli
            .webdriver_url
            .or_else(|| env(WEBDRIVER_URL_ENV))
            .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string());

        let headless = if cli.headed {
            false
        } else {
            match env(HEADLESS_ENV) {
                Some(raw) => parse_bool(&raw).ok_or_else(|| {
                    ConfigError::invalid(HEADLESS_ENV, &raw, "expected true/false")
                })?,
                None => true,
            }
        };

        let site_path = cli.site.or_else(|| env(SITE_ENV).map(PathBuf::from));

        let keepalive = match cli.keepalive_secs {
            Some(secs) => Duration::from_secs(secs),
            None => match env(KEEPALIVE_ENV) {
                Some(raw) => Duration::from_secs(
                    raw.trim()
                        .parse()
                        .map_err(|e| ConfigError::invalid(KEEPALIVE_ENV, &raw, e))?,
                ),
                None => DEFAULT_KEEPALIVE,
            },
        };
        if keepalive.is_zero() {
            return Err(ConfigError::invalid(KEEPALIVE_ENV, "0", "must be positive"));
        }

        let format = match cli.log_format {
            Some(format) => format,
            None => match env(LOG_FORMAT_ENV) {
                Some(raw) => raw
                    .parse()
                    .map_err(|e| ConfigError::invalid(LOG_FORMAT_ENV, &raw, e))?,
                None => LogFormat::default(),
            },
        };
        let directory = cli.log_dir.or_else(|| env(LOG_DIR_ENV).map(PathBuf::from));

        Ok(Self {
            host,
            port,
            webdriver_url,
            headless,
            site_path,
            keepalive,
            log: LogConfig {
                format,
                directory,
                default_filter: DEFAULT_FILTER.to_string(),
            },
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// The configured site profile, or the built-in one.
    pub fn site_profile(&self) -> Result<SiteProfile, ConfigError> {
        match &self.site_path {
            Some(path) => Ok(SiteProfile::load(path)?),
            None => Ok(SiteProfile::default()),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_flags_or_env() {
        let config = ServerConfig::resolve(Cli::default(), env_of(&[])).unwrap();
        assert_eq!(config.addr().to_string(), "0.0.0.0:8000");
        assert_eq!(config.webdriver_url, DEFAULT_WEBDRIVER_URL);
        assert!(config.headless);
        assert_eq!(config.keepalive, Duration::from_secs(30));
        assert_eq!(config.log.format, LogFormat::Compact);
        assert!(config.site_path.is_none());
    }

    #[test]
    fn env_overrides_defaults() {
        let env = env_of(&[
            (HOST_ENV, "127.0.0.1"),
            (FALLBACK_PORT_ENV, "9001"),
            (HEADLESS_ENV, "false"),
            (KEEPALIVE_ENV, "5"),
            (LOG_FORMAT_ENV, "json"),
            (SITE_ENV, "/etc/autofollow/site.yaml"),
        ]);
        let config = ServerConfig::resolve(Cli::default(), env).unwrap();
        assert_eq!(config.addr().to_string(), "127.0.0.1:9001");
        assert!(!config.headless);
        assert_eq!(config.keepalive, Duration::from_secs(5));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(
            config.site_path.as_deref(),
            Some(std::path::Path::new("/etc/autofollow/site.yaml"))
        );
    }

    #[test]
    fn specific_port_var_beats_generic_one() {
        let env = env_of(&[(PORT_ENV, "7000"), (FALLBACK_PORT_ENV, "9001")]);
        let config = ServerConfig::resolve(Cli::default(), env).unwrap();
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn flags_override_env() {
        let cli = Cli::parse_from(["autofollow", "--port", "1234", "--headed", "--log-format", "json"]);
        let env = env_of(&[(PORT_ENV, "7000"), (LOG_FORMAT_ENV, "compact")]);
        let config = ServerConfig::resolve(cli, env).unwrap();
        assert_eq!(config.port, 1234);
        assert!(!config.headless);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn bad_values_name_their_source() {
        let err = ServerConfig::resolve(Cli::default(), env_of(&[(PORT_ENV, "eighty")])).unwrap_err();
        assert!(err.to_string().contains(PORT_ENV));

        let err = ServerConfig::resolve(Cli::default(), env_of(&[(HEADLESS_ENV, "maybe")])).unwrap_err();
        assert!(err.to_string().contains(HEADLESS_ENV));

        let err = ServerConfig::resolve(Cli::default(), env_of(&[(KEEPALIVE_ENV, "0")])).unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn missing_site_file_is_reported() {
        let cli = Cli {
            site: Some(PathBuf::from("/nonexistent/site.yaml")),
            ..Cli::default()
        };
        let config = ServerConfig::resolve(cli, env_of(&[])).unwrap();
        assert!(matches!(config.site_profile(), Err(ConfigError::Site(_))));
    }
}
