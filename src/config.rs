use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Weekday;
use thiserror::Error;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;
pub const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 3;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 3600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },
    #[error("invalid slot grid: {0}")]
    InvalidGrid(&'static str),
}

/// Template of a business day. Process-wide and immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGridConfig {
    pub start_hour: u32,
    pub end_hour: u32,
    /// `break_start_hour == break_end_hour` disables the break.
    pub break_start_hour: u32,
    pub break_end_hour: u32,
    pub slot_duration_minutes: u32,
    pub work_days: Vec<Weekday>,
}

impl Default for SlotGridConfig {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
            break_start_hour: 13,
            break_end_hour: 14,
            slot_duration_minutes: 30,
            work_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
        }
    }
}

impl SlotGridConfig {
    pub fn has_break(&self) -> bool {
        self.break_start_hour < self.break_end_hour
    }

    /// Startup check. The generator never fails, so bad values are caught here instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_hour >= self.end_hour {
            return Err(ConfigError::InvalidGrid("start hour must be before end hour"));
        }
        if self.end_hour > 24 {
            return Err(ConfigError::InvalidGrid("end hour past midnight"));
        }
        if self.slot_duration_minutes == 0 {
            return Err(ConfigError::InvalidGrid("slot duration must be positive"));
        }
        if self.slot_duration_minutes > (self.end_hour - self.start_hour) * 60 {
            return Err(ConfigError::InvalidGrid("slot duration longer than the business day"));
        }
        if self.break_start_hour > self.break_end_hour {
            return Err(ConfigError::InvalidGrid("break ends before it starts"));
        }
        if self.has_break()
            && (self.break_start_hour < self.start_hour || self.break_end_hour > self.end_hour)
        {
            return Err(ConfigError::InvalidGrid("break window outside business hours"));
        }
        if self.work_days.is_empty() {
            return Err(ConfigError::InvalidGrid("no work days configured"));
        }
        Ok(())
    }
}

/// Fixed-window quota for one action namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub capacity: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub grid: SlotGridConfig,
    pub rate_limit: RateLimitPolicy,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source so tests don't touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_ip = lookup("VISITSLOT_BIND").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_var(&lookup, "VISITSLOT_PORT", 8080)?;
        let bind = format!("{bind_ip}:{port}")
            .parse()
            .map_err(|_| ConfigError::InvalidVar {
                var: "VISITSLOT_BIND",
                value: bind_ip.clone(),
            })?;

        let defaults = SlotGridConfig::default();
        let work_days = match lookup("VISITSLOT_WORK_DAYS") {
            Some(raw) => parse_work_days(&raw).ok_or(ConfigError::InvalidVar {
                var: "VISITSLOT_WORK_DAYS",
                value: raw,
            })?,
            None => defaults.work_days.clone(),
        };
        let grid = SlotGridConfig {
            start_hour: parse_var(&lookup, "VISITSLOT_SLOT_START_HOUR", defaults.start_hour)?,
            end_hour: parse_var(&lookup, "VISITSLOT_SLOT_END_HOUR", defaults.end_hour)?,
            break_start_hour: parse_var(
                &lookup,
                "VISITSLOT_BREAK_START_HOUR",
                defaults.break_start_hour,
            )?,
            break_end_hour: parse_var(
                &lookup,
                "VISITSLOT_BREAK_END_HOUR",
                defaults.break_end_hour,
            )?,
            slot_duration_minutes: parse_var(
                &lookup,
                "VISITSLOT_SLOT_MINUTES",
                defaults.slot_duration_minutes,
            )?,
            work_days,
        };
        grid.validate()?;

        let metrics_port = match lookup("VISITSLOT_METRICS_PORT") {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::InvalidVar {
                var: "VISITSLOT_METRICS_PORT",
                value: raw,
            })?),
            None => None,
        };

        Ok(Self {
            bind,
            data_dir: PathBuf::from(
                lookup("VISITSLOT_DATA_DIR").unwrap_or_else(|| "./data".into()),
            ),
            compact_threshold: parse_var(&lookup, "VISITSLOT_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            redis_url: lookup("VISITSLOT_REDIS_URL").filter(|s| !s.is_empty()),
            cache_ttl: Duration::from_secs(parse_var(
                &lookup,
                "VISITSLOT_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            )?),
            grid,
            rate_limit: RateLimitPolicy {
                capacity: parse_var(
                    &lookup,
                    "VISITSLOT_RATE_LIMIT_CAPACITY",
                    DEFAULT_RATE_LIMIT_CAPACITY,
                )?,
                window: Duration::from_secs(parse_var(
                    &lookup,
                    "VISITSLOT_RATE_LIMIT_WINDOW_SECS",
                    DEFAULT_RATE_LIMIT_WINDOW_SECS,
                )?),
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { var, value: raw }),
        None => Ok(default),
    }
}

/// Comma-separated day indices, 0 = Sunday.
fn parse_work_days(raw: &str) -> Option<Vec<Weekday>> {
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let idx: u8 = part.parse().ok()?;
        let day = match idx {
            0 => Weekday::Sun,
            1 => Weekday::Mon,
            2 => Weekday::Tue,
            3 => Weekday::Wed,
            4 => Weekday::Thu,
            5 => Weekday::Fri,
            6 => Weekday::Sat,
            _ => return None,
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Some(days)
}
