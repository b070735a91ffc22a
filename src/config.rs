//! Configuration loader for the `codemetal-fieldstate` service.
//!
//! All runtime settings and their defaults live here, loaded from environment
//! variables (with optional `.env` file support provided by the caller), so
//! no other module reads `env::var` directly.
//!
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::models::Position;
use crate::registry::AnomalyBindings;

/// Parse an optional integer variable with a default value.
macro_rules! parse_env_u32 {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string variable, treating blank values as unset.
macro_rules! optional_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
}

pub const DEFAULT_BINDINGS: &str = "soilmoist1=soil_moisture,temp1=temperature";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string. Unset selects the in-memory store.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// HTTP listen address.
    pub bind_addr: SocketAddr,

    pub roster_poll: Duration,
    pub reading_poll: Duration,
    pub resubscribe_delay: Duration,

    /// `(sensor id, tracked metric)` pairs.
    pub anomaly_bindings: Vec<(String, String)>,

    /// Centre used to lay out placeholder positions.
    pub field_center: Option<Position>,

    pub health_tally_url: Option<String>,
    pub narrative_url: Option<String>,
    pub narrative_api_key: Option<String>,

    /// Timeout for calls to the tally and narrative endpoints.
    pub upstream_timeout: Duration,
}

/// Load configuration from process environment variables.
///
/// Nothing is required; see [`load_from`] for the variables and defaults.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Load configuration through `lookup`.
///
/// Optional:
/// - `DATABASE_URL` – PostgreSQL connection string (default: in-memory store)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – listen address (default: 0.0.0.0:8080)
/// - `ROSTER_POLL_SECS` / `READING_POLL_SECS` – poll intervals (default: 30 / 10)
/// - `RESUBSCRIBE_SECS` – delay before re-subscribing a dropped feed (default: 5)
/// - `ANOMALY_BINDINGS` – `sensor=metric` pairs, comma separated
/// - `FIELD_CENTER` – `lat,lng`
/// - `HEALTH_TALLY_URL`, `NARRATIVE_URL`, `NARRATIVE_API_KEY`
/// - `UPSTREAM_TIMEOUT_SECS` – collaborator timeout (default: 30)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // ---
    let db_url = optional_env!(lookup, "DATABASE_URL");
    let db_pool_max = parse_env_u32!(lookup, "DB_POOL_MAX", 5);

    let bind_addr = match optional_env!(lookup, "BIND_ADDR") {
        Some(addr) => addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("Invalid BIND_ADDR: {}", e))?,
        None => SocketAddr::from(([0, 0, 0, 0], 8080)),
    };

    let roster_poll = seconds("ROSTER_POLL_SECS", parse_env_u32!(lookup, "ROSTER_POLL_SECS", 30))?;
    let reading_poll =
        seconds("READING_POLL_SECS", parse_env_u32!(lookup, "READING_POLL_SECS", 10))?;
    let resubscribe_delay =
        seconds("RESUBSCRIBE_SECS", parse_env_u32!(lookup, "RESUBSCRIBE_SECS", 5))?;
    let upstream_timeout = seconds(
        "UPSTREAM_TIMEOUT_SECS",
        parse_env_u32!(lookup, "UPSTREAM_TIMEOUT_SECS", 30),
    )?;

    let anomaly_bindings = parse_bindings(
        lookup("ANOMALY_BINDINGS")
            .as_deref()
            .unwrap_or(DEFAULT_BINDINGS),
    )?;

    let field_center = optional_env!(lookup, "FIELD_CENTER")
        .map(|v| parse_position(&v))
        .transpose()?;

    Ok(Config {
        db_url,
        db_pool_max,
        bind_addr,
        roster_poll,
        reading_poll,
        resubscribe_delay,
        anomaly_bindings,
        field_center,
        health_tally_url: optional_env!(lookup, "HEALTH_TALLY_URL"),
        narrative_url: optional_env!(lookup, "NARRATIVE_URL"),
        narrative_api_key: optional_env!(lookup, "NARRATIVE_API_KEY"),
        upstream_timeout,
    })
}

fn seconds(var_name: &str, secs: u32) -> Result<Duration> {
    if secs == 0 {
        bail!("Invalid {}: must be at least 1", var_name);
    }
    Ok(Duration::from_secs(u64::from(secs)))
}

/// Parse `sensor=metric` pairs separated by commas. Blank input binds nothing.
pub fn parse_bindings(raw: &str) -> Result<Vec<(String, String)>> {
    // ---
    let mut pairs = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((sensor, metric)) = entry.split_once('=') else {
            bail!("Invalid ANOMALY_BINDINGS entry '{}': expected sensor=metric", entry);
        };
        let (sensor, metric) = (sensor.trim(), metric.trim());
        if sensor.is_empty() || metric.is_empty() {
            bail!("Invalid ANOMALY_BINDINGS entry '{}': empty sensor or metric", entry);
        }
        if pairs.iter().any(|(s, _): &(String, String)| s == sensor) {
            bail!("Invalid ANOMALY_BINDINGS: sensor '{}' bound twice", sensor);
        }
        pairs.push((sensor.to_string(), metric.to_string()));
    }
    Ok(pairs)
}

/// Parse `lat,lng` in degrees.
pub fn parse_position(raw: &str) -> Result<Position> {
    // ---
    let (lat, lng) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("Invalid FIELD_CENTER '{}': expected lat,lng", raw))?;
    let position = Position {
        lat: lat
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid FIELD_CENTER latitude: {}", e))?,
        lng: lng
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid FIELD_CENTER longitude: {}", e))?,
    };
    position.validate()?;
    Ok(position)
}

/// Replace the password in a connection string with `****`.
fn mask_db_url(db_url: &str) -> String {
    // ---
    let Some(at_pos) = db_url.rfind('@') else {
        return db_url.to_string();
    };
    let user_start = db_url.find("://").map(|p| p + 3).unwrap_or(0);
    let colon = db_url
        .get(user_start..at_pos)
        .and_then(|userinfo| userinfo.find(':'))
        .map(|p| user_start + p);

    match colon {
        Some(colon_pos) => format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]),
        None => db_url.to_string(),
    }
}

impl Config {
    pub fn bindings(&self) -> AnomalyBindings {
        AnomalyBindings::new(self.anomaly_bindings.iter().cloned())
    }

    /// Log the loaded configuration, masking secrets.
    pub fn log_config(&self) {
        // ---
        let unset = || "(unset)".to_string();
        let db_url = self.db_url.as_deref().map(mask_db_url);
        let bindings: Vec<String> = self
            .anomaly_bindings
            .iter()
            .map(|(s, m)| format!("{s}={m}"))
            .collect();

        tracing::info!("Configuration loaded:");
        tracing::info!(
            "  DATABASE_URL          : {}",
            db_url.unwrap_or_else(|| "(unset, in-memory store)".to_string())
        );
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR             : {}", self.bind_addr);
        tracing::info!("  ROSTER_POLL_SECS      : {}", self.roster_poll.as_secs());
        tracing::info!("  READING_POLL_SECS     : {}", self.reading_poll.as_secs());
        tracing::info!("  RESUBSCRIBE_SECS      : {}", self.resubscribe_delay.as_secs());
        tracing::info!("  ANOMALY_BINDINGS      : {}", bindings.join(","));
        tracing::info!(
            "  FIELD_CENTER          : {}",
            self.field_center
                .map(|p| format!("{},{}", p.lat, p.lng))
                .unwrap_or_else(unset)
        );
        tracing::info!(
            "  HEALTH_TALLY_URL      : {}",
            self.health_tally_url.clone().unwrap_or_else(unset)
        );
        tracing::info!(
            "  NARRATIVE_URL         : {}",
            self.narrative_url.clone().unwrap_or_else(unset)
        );
        tracing::info!(
            "  NARRATIVE_API_KEY     : {}",
            self.narrative_api_key
                .as_ref()
                .map(|_| "****".to_string())
                .unwrap_or_else(unset)
        );
        tracing::info!("  UPSTREAM_TIMEOUT_SECS : {}", self.upstream_timeout.as_secs());
    }
}
