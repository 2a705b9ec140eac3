use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path};

pub const DEFAULT_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name the service registers under on the host platform.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_developer_id")]
    pub developer_id: String,
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
    /// Host platform broker.
    pub mqtt: MqttConfig,
    /// Optional broker the metering device talks to directly.
    #[serde(default)]
    pub remote: Option<MqttConfig>,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

fn default_app_name() -> String {
    "ConnectPowerboxApp".into()
}
fn default_developer_id() -> String {
    "Dev-Connect-01".into()
}
fn default_owner_id() -> String {
    "Owner-01".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to a PEM CA bundle; the webpki roots are used when absent.
    #[serde(default)]
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Device topic prefix, e.g. "connect/58:BF:25:DA:00:01". Empty disables processing.
    #[serde(default)]
    pub target_device_id: String,
    #[serde(default = "default_interval_secs")]
    pub calculation_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            target_device_id: String::new(),
            calculation_interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl ResolverConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.calculation_interval_secs)
    }
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Afterwards TARGET_DEVICE_ID and CALCULATION_INTERVAL_SECS, when set,
    /// override the resolver section.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;

        if let Ok(target) = std::env::var("TARGET_DEVICE_ID") {
            cfg.resolver.target_device_id = target;
        }
        if let Ok(secs) = std::env::var("CALCULATION_INTERVAL_SECS") {
            cfg.resolver.calculation_interval_secs = secs.trim().parse().map_err(|_| {
                AppError::Config(format!("CALCULATION_INTERVAL_SECS is not a number: {secs}"))
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(AppError::Config("app_name cannot be empty".into()));
        }
        if self.resolver.calculation_interval_secs == 0 {
            return Err(AppError::Config(
                "resolver.calculation_interval_secs must be greater than 0".into(),
            ));
        }
        for (name, broker) in [("mqtt", Some(&self.mqtt)), ("remote", self.remote.as_ref())] {
            if let Some(b) = broker {
                if b.host.is_empty() {
                    return Err(AppError::Config(format!("{name}.host cannot be empty")));
                }
            }
        }
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> std::result::Result<String, anyhow::Error> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{close}'"))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Collect characters up to and including `end`, returning those before it.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
