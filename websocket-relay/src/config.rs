/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Relay configuration.
//!
//! Loaded once at startup, either from a YAML file named by
//! `RELAY_CONFIG_PATH` or from individual environment variables, then
//! validated and never mutated again.

use crate::constants::{
    DEFAULT_CLIENT_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_SECS,
    DEFAULT_LISTEN_PORT, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_REDIRECT_URL, DEFAULT_ROUTE_PATH,
    DEFAULT_UPSTREAM_HOST, DEFAULT_UPSTREAM_PORT,
};
use crate::upstream::UpstreamTarget;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid route {0:?}, expected path=host:port")]
    InvalidRoute(String),
    #[error("route path {0:?} must start with '/'")]
    InvalidPath(String),
    #[error("route path {0:?} is configured more than once")]
    DuplicateRoute(String),
    #[error("route {0:?} has upstream port 0")]
    ZeroPort(String),
    #[error("at least one listen address is required")]
    NoListenAddrs,
    #[error("at least one relay route is required")]
    NoRoutes,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// A URL path mapped to the upstream its sessions are relayed to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    pub path: String,
    #[serde(flatten)]
    pub upstream: UpstreamTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub listen: Vec<SocketAddr>,
    pub routes: Vec<RouteConfig>,
    pub redirect_url: String,
    pub connect_timeout_ms: u64,
    pub max_message_size: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub workers: Option<usize>,
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: vec![
                SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_LISTEN_PORT)),
                SocketAddr::from((Ipv6Addr::LOCALHOST, DEFAULT_LISTEN_PORT)),
            ],
            routes: vec![RouteConfig {
                path: DEFAULT_ROUTE_PATH.to_string(),
                upstream: UpstreamTarget::new(DEFAULT_UPSTREAM_HOST, DEFAULT_UPSTREAM_PORT),
            }],
            redirect_url: DEFAULT_REDIRECT_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            client_timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
            workers: None,
            metrics_listen: None,
        }
    }
}

impl RelayConfig {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `RELAY_CONFIG_PATH` if set, otherwise from the environment.
    pub fn from_env_or_default() -> Result<Self, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(config_path);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from a variable lookup, defaulting every unset variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RelayConfig::default();

        if let Some(value) = lookup("LISTEN_ADDRS") {
            config.listen = split_list(&value)
                .map(|addr| parse_value("LISTEN_ADDRS", addr))
                .collect::<Result<_, _>>()?;
        }
        if let Some(value) = lookup("RELAY_ROUTES") {
            config.routes = split_list(&value)
                .map(parse_route)
                .collect::<Result<_, _>>()?;
        }
        if let Some(value) = lookup("REDIRECT_URL") {
            config.redirect_url = value;
        }
        if let Some(value) = lookup("CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = parse_value("CONNECT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("MAX_MESSAGE_SIZE") {
            config.max_message_size = parse_value("MAX_MESSAGE_SIZE", &value)?;
        }
        if let Some(value) = lookup("HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval_secs = parse_value("HEARTBEAT_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("CLIENT_TIMEOUT_SECS") {
            config.client_timeout_secs = parse_value("CLIENT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("WORKERS") {
            config.workers = Some(parse_value("WORKERS", &value)?);
        }
        if let Some(value) = lookup("METRICS_LISTEN") {
            config.metrics_listen = Some(parse_value("METRICS_LISTEN", &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::NoListenAddrs);
        }
        if self.routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        let mut seen = HashSet::new();
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(ConfigError::InvalidPath(route.path.clone()));
            }
            if !seen.insert(route.path.as_str()) {
                return Err(ConfigError::DuplicateRoute(route.path.clone()));
            }
            if route.upstream.port == 0 {
                return Err(ConfigError::ZeroPort(route.path.clone()));
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Zero("connect_timeout_ms"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Zero("max_message_size"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Zero("heartbeat_interval_secs"));
        }
        if self.client_timeout_secs == 0 {
            return Err(ConfigError::Zero("client_timeout_secs"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Zero("workers"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Parse `path=host:port`; IPv6 hosts are written in brackets.
fn parse_route(entry: &str) -> Result<RouteConfig, ConfigError> {
    let invalid = || ConfigError::InvalidRoute(entry.to_string());

    let (path, target) = entry.split_once('=').ok_or_else(invalid)?;
    let (host, port) = target.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;

    Ok(RouteConfig {
        path: path.trim().to_string(),
        upstream: UpstreamTarget::new(host, port),
    })
}
