// src/config.rs
use crate::error::StartupError;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_INTERVAL_MS: u64 = 400;
pub const DEFAULT_CONFIG_FILE: &str = "livesite.toml";

/// Names pruned from every scan unless overridden.
pub fn default_ignore() -> Vec<String> {
    vec![".git".to_string(), ".DS_Store".to_string()]
}

/// How the change notifier learns about filesystem changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WatchMode {
    /// Rescan the root on a fixed interval.
    #[default]
    Poll,
    /// Rescan early when the OS reports filesystem events; the interval stays as a fallback.
    Events,
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMode::Poll => f.write_str("poll"),
            WatchMode::Events => f.write_str("events"),
        }
    }
}

impl FromStr for WatchMode {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Ok(WatchMode::Poll),
            "events" => Ok(WatchMode::Events),
            other => Err(StartupError::InvalidWatchMode(other.to_string())),
        }
    }
}

/// Command-line arguments for the application.
#[derive(Parser, Debug, Default)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Address to listen on (IPv4/IPv6 literal or hostname)
    #[clap(long, value_parser, help = "Address to listen on (default 127.0.0.1)")]
    pub bind: Option<String>,

    /// Port to listen on
    #[clap(
        long,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Port to listen on, 1-65535 (default 8080)"
    )]
    pub port: Option<u16>,

    /// Folder to serve
    #[clap(long, value_parser, help = "Folder to serve (default: current directory)")]
    pub root: Option<PathBuf>,

    /// Watch interval in milliseconds
    #[clap(long, value_parser, help = "Watch interval in milliseconds (default 400)")]
    pub interval: Option<u64>,

    /// Change detection strategy
    #[clap(long, value_enum, help = "Change detection strategy")]
    pub watch: Option<WatchMode>,

    /// Serve files only, without live reload
    #[clap(long, help = "Serve files only, without live reload")]
    pub no_reload: bool,

    /// File or directory name to skip while watching (repeatable)
    #[clap(long = "ignore", value_parser, help = "File or directory name to skip while watching (repeatable)")]
    pub ignore: Vec<String>,

    /// Path to a configuration file (e.g., livesite.toml)
    #[clap(
        short,
        long,
        value_parser,
        help = "Path to a configuration file (e.g., livesite.toml)"
    )]
    pub config: Option<PathBuf>,

    /// Log level (e.g., trace, debug, info, warn, error)
    #[clap(
        long,
        value_parser,
        help = "Log level (e.g., trace, debug, info, warn, error)"
    )]
    pub log_level: Option<String>,
}

/// Configuration loaded from file, environment, or defaults.
#[derive(Deserialize, Serialize, Debug, Default, Clone)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    /// Wider than `u16` so out-of-range values get a clear error instead of a parse failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_reload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl FileConfig {
    fn defaults() -> Self {
        FileConfig {
            bind: Some(DEFAULT_BIND.to_string()),
            port: Some(u64::from(DEFAULT_PORT)),
            root: None,
            interval: Some(DEFAULT_INTERVAL_MS),
            watch: Some(WatchMode::Poll.to_string()),
            live_reload: Some(true),
            ignore: Some(default_ignore()),
            log_level: Some("info".to_string()),
        }
    }

    /// CLI values that were actually given, as a config layer.
    fn from_cli(cli: &CliArgs) -> Self {
        FileConfig {
            bind: cli.bind.clone(),
            port: cli.port.map(u64::from),
            root: cli.root.clone(),
            interval: cli.interval,
            watch: cli.watch.map(|w| w.to_string()),
            live_reload: if cli.no_reload { Some(false) } else { None },
            ignore: if cli.ignore.is_empty() {
                None
            } else {
                Some(cli.ignore.clone())
            },
            log_level: cli.log_level.clone(),
        }
    }
}

/// Final server configuration. Immutable once the server starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address as given by the user
    pub bind_address: String,
    pub port: u16,
    /// `bind_address:port` after resolution
    pub socket_addr: SocketAddr,
    /// Canonical path of the served folder
    pub root_directory: PathBuf,
    pub poll_interval: Duration,
    pub watch_mode: WatchMode,
    /// `false` runs the plain server: no watcher, no reload endpoints, no injection
    pub live_reload: bool,
    pub ignore: Vec<String>,
    pub log_level: String,
}

impl ServerConfig {
    /// Loads the server configuration by merging CLI, file, environment, and defaults.
    pub fn load() -> Result<Self, StartupError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merges defaults, the config file, `LIVESITE_*` environment variables and
    /// the given CLI arguments, in increasing precedence.
    pub fn from_cli(cli_args: CliArgs) -> Result<Self, StartupError> {
        let config_file_path = cli_args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let merged: FileConfig = Figment::new()
            .merge(Serialized::defaults(FileConfig::defaults()))
            .merge(Toml::file(config_file_path).nested())
            .merge(
                Env::prefixed("LIVESITE_")
                    .map(|key| key.as_str().replace("__", ".").into())
                    .global(),
            )
            .merge(Serialized::globals(FileConfig::from_cli(&cli_args)))
            .select("livesite")
            .extract()?;

        Self::from_file_config(merged)
    }

    /// Validates a merged configuration and resolves the bind address and root folder.
    pub fn from_file_config(merged: FileConfig) -> Result<Self, StartupError> {
        let port_value = merged.port.unwrap_or(u64::from(DEFAULT_PORT));
        let port = match u16::try_from(port_value) {
            Ok(p) if p != 0 => p,
            _ => return Err(StartupError::InvalidPort(port_value)),
        };

        let bind_address = merged.bind.unwrap_or_else(|| DEFAULT_BIND.to_string());
        let socket_addr = resolve_bind(&bind_address, port)?;

        let interval_ms = merged.interval.unwrap_or(DEFAULT_INTERVAL_MS);
        if interval_ms == 0 {
            return Err(StartupError::InvalidInterval(interval_ms));
        }

        let watch_mode = match merged.watch {
            Some(w) => w.parse()?,
            None => WatchMode::default(),
        };

        let root = match merged.root {
            Some(r) => r,
            None => std::env::current_dir().map_err(|source| StartupError::RootUnresolvable {
                path: PathBuf::from("."),
                source,
            })?,
        };
        let root_directory = canonical_root(&root)?;

        Ok(ServerConfig {
            bind_address,
            port,
            socket_addr,
            root_directory,
            poll_interval: Duration::from_millis(interval_ms),
            watch_mode,
            live_reload: merged.live_reload.unwrap_or(true),
            ignore: merged.ignore.unwrap_or_else(default_ignore),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf, StartupError> {
    if !root.is_dir() {
        return Err(StartupError::RootNotDirectory(root.to_path_buf()));
    }
    root.canonicalize()
        .map_err(|source| StartupError::RootUnresolvable {
            path: root.to_path_buf(),
            source,
        })
}

/// Resolves `bind` to a socket address. IP literals are used as is, hostnames
/// go through the system resolver and the first result wins.
pub fn resolve_bind(bind: &str, port: u16) -> Result<SocketAddr, StartupError> {
    let trimmed = bind.trim();
    let literal = trimmed.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    if !is_hostname(trimmed) {
        return Err(StartupError::InvalidBindAddress(bind.to_string()));
    }
    (trimmed, port)
        .to_socket_addrs()
        .map_err(|_| StartupError::InvalidBindAddress(bind.to_string()))?
        .next()
        .ok_or_else(|| StartupError::InvalidBindAddress(bind.to_string()))
}

fn is_hostname(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.trim_end_matches('.').split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
