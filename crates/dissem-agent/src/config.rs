//! Agent configuration.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dissem_core::{Key, TrickleParams};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Local UDP address
    pub bind: SocketAddr,

    /// Addresses every announcement is sent to
    pub peers: Vec<SocketAddr>,

    /// Enable `SO_BROADCAST` so peers may be broadcast addresses
    pub broadcast: bool,

    /// Largest datagram the medium carries
    pub mtu: usize,

    /// Image GUID stamped on and checked against every frame
    pub image_guid: Option<Uuid>,

    /// Seed for the trickle RNG; random when absent
    pub seed: Option<u64>,

    /// Keys to register at startup
    pub keys: Vec<KeyConfig>,
}

/// One key to register.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyConfig {
    /// Assigned key; the next generated key when absent
    #[serde(default)]
    pub key: Option<u16>,

    /// Value size in bytes
    pub size: usize,

    /// Redundancy constant `k`
    #[serde(default = "default_redundancy")]
    pub redundancy: u32,

    /// Minimum interval in milliseconds
    #[serde(default = "default_imin_ms")]
    pub imin_ms: u64,

    /// Maximum interval in milliseconds
    #[serde(default = "default_imax_ms")]
    pub imax_ms: u64,

    /// Base64 value applied with `set` before the first announcement
    #[serde(default)]
    pub initial: Option<String>,
}

fn default_redundancy() -> u32 {
    TrickleParams::default().redundancy
}

fn default_imin_ms() -> u64 {
    duration_ms(TrickleParams::default().imin)
}

fn default_imax_ms() -> u64 {
    duration_ms(TrickleParams::default().imax)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl KeyConfig {
    /// The assigned key, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the key lies in the generated half.
    pub fn assigned_key(&self) -> Result<Option<Key>> {
        self.key
            .map(|raw| Key::assigned(raw).with_context(|| format!("Invalid key {raw}")))
            .transpose()
    }

    /// Trickle parameters for this key.
    #[must_use]
    pub fn params(&self) -> TrickleParams {
        TrickleParams::new(
            Duration::from_millis(self.imin_ms),
            Duration::from_millis(self.imax_ms),
            self.redundancy,
        )
    }

    /// Decoded initial value.
    ///
    /// # Errors
    ///
    /// Returns error if `initial` is not valid base64.
    pub fn initial_value(&self) -> Result<Option<Vec<u8>>> {
        self.initial
            .as_deref()
            .map(|encoded| STANDARD.decode(encoded).context("Invalid base64 initial value"))
            .transpose()
    }
}

/// Configuration file contents. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind: Option<SocketAddr>,
    peers: Option<Vec<SocketAddr>>,
    broadcast: Option<bool>,
    mtu: Option<usize>,
    image_guid: Option<Uuid>,
    seed: Option<u64>,
    keys: Option<Vec<KeyConfig>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7400)),
            peers: Vec::new(),
            broadcast: false,
            mtu: 512,
            image_guid: None,
            seed: None,
            keys: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DISSEM_CONFIG`: JSON configuration file, loaded first
    /// - `DISSEM_BIND`: Local UDP address
    /// - `DISSEM_PEERS`: Comma-separated peer addresses
    /// - `DISSEM_BROADCAST`: `1`/`true` to enable `SO_BROADCAST`
    /// - `DISSEM_MTU`: Largest datagram size
    /// - `DISSEM_IMAGE_GUID`: Image UUID
    /// - `DISSEM_SEED`: Trickle RNG seed
    /// - `DISSEM_KEYS`: JSON array of key specifications
    ///
    /// # Errors
    ///
    /// Returns error if a variable or the configuration file is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// As [`from_env`](Self::from_env).
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match var("DISSEM_CONFIG") {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(bind) = var("DISSEM_BIND") {
            config.bind = bind.parse().context("Invalid DISSEM_BIND")?;
        }

        if let Some(peers) = var("DISSEM_PEERS") {
            config.peers = parse_peers(&peers).context("Invalid DISSEM_PEERS")?;
        }

        if let Some(flag) = var("DISSEM_BROADCAST") {
            config.broadcast = parse_flag(&flag).context("Invalid DISSEM_BROADCAST")?;
        }

        if let Some(mtu) = var("DISSEM_MTU") {
            config.mtu = mtu.parse().context("Invalid DISSEM_MTU")?;
        }

        if let Some(guid) = var("DISSEM_IMAGE_GUID") {
            config.image_guid = Some(Uuid::parse_str(&guid).context("Invalid DISSEM_IMAGE_GUID")?);
        }

        if let Some(seed) = var("DISSEM_SEED") {
            config.seed = Some(seed.parse().context("Invalid DISSEM_SEED")?);
        }

        // Parse keys from JSON env var
        if let Some(keys_json) = var("DISSEM_KEYS") {
            config.keys = serde_json::from_str(&keys_json).context("Invalid DISSEM_KEYS JSON")?;
        }

        Ok(config)
    }

    /// Load configuration from a JSON file, filling gaps with defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file: FileConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        let defaults = Self::default();
        Ok(Self {
            bind: file.bind.unwrap_or(defaults.bind),
            peers: file.peers.unwrap_or(defaults.peers),
            broadcast: file.broadcast.unwrap_or(defaults.broadcast),
            mtu: file.mtu.unwrap_or(defaults.mtu),
            image_guid: file.image_guid.or(defaults.image_guid),
            seed: file.seed.or(defaults.seed),
            keys: file.keys.unwrap_or(defaults.keys),
        })
    }
}

fn parse_peers(input: &str) -> Result<Vec<SocketAddr>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(|peer| {
            peer.parse::<SocketAddr>()
                .with_context(|| format!("Invalid peer address '{peer}'"))
        })
        .collect()
}

fn parse_flag(input: &str) -> Result<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = AgentConfig::from_vars(lookup(&[])).unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.bind.port(), 7400);
        assert_eq!(config.mtu, 512);
    }

    #[test]
    fn variables_override_defaults() {
        let config = AgentConfig::from_vars(lookup(&[
            ("DISSEM_BIND", "127.0.0.1:9000"),
            ("DISSEM_PEERS", "10.0.0.1:7400, 10.0.0.2:7400"),
            ("DISSEM_BROADCAST", "true"),
            ("DISSEM_MTU", "128"),
            ("DISSEM_IMAGE_GUID", "6f1c2a3e-0000-4000-8000-000000000001"),
            ("DISSEM_SEED", "17"),
            (
                "DISSEM_KEYS",
                r#"[{"key": 5, "size": 1, "imin_ms": 50, "imax_ms": 800, "initial": "Bw=="}]"#,
            ),
        ]))
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.peers.len(), 2);
        assert!(config.broadcast);
        assert_eq!(config.mtu, 128);
        assert!(config.image_guid.is_some());
        assert_eq!(config.seed, Some(17));

        let key = &config.keys[0];
        assert_eq!(key.assigned_key().unwrap(), Some(Key::from_raw(5)));
        assert_eq!(key.redundancy, 1);
        assert_eq!(key.params().imin, Duration::from_millis(50));
        assert_eq!(key.params().imax, Duration::from_millis(800));
        assert_eq!(key.initial_value().unwrap(), Some(vec![7]));
    }

    #[test]
    fn invalid_variables_are_reported() {
        assert!(AgentConfig::from_vars(lookup(&[("DISSEM_MTU", "big")])).is_err());
        assert!(AgentConfig::from_vars(lookup(&[("DISSEM_PEERS", "nowhere")])).is_err());
        assert!(AgentConfig::from_vars(lookup(&[("DISSEM_BROADCAST", "maybe")])).is_err());
        assert!(AgentConfig::from_vars(lookup(&[("DISSEM_KEYS", "{")])).is_err());
    }

    #[test]
    fn generated_half_keys_are_rejected() {
        let keys: Vec<KeyConfig> = serde_json::from_str(r#"[{"key": 32768, "size": 1}]"#).unwrap();
        assert!(keys[0].assigned_key().is_err());
    }

    #[test]
    fn missing_key_means_generated() {
        let keys: Vec<KeyConfig> = serde_json::from_str(r#"[{"size": 2}]"#).unwrap();
        assert_eq!(keys[0].assigned_key().unwrap(), None);
        assert_eq!(keys[0].params(), TrickleParams::default());
        assert_eq!(keys[0].initial_value().unwrap(), None);
    }

    #[test]
    fn file_then_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bind": "127.0.0.1:7500", "mtu": 256, "keys": [{{"key": 1, "size": 4}}]}}"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let from_file = AgentConfig::from_file(&path).unwrap();
        assert_eq!(from_file.bind.port(), 7500);
        assert_eq!(from_file.mtu, 256);
        assert_eq!(from_file.keys.len(), 1);

        let layered = AgentConfig::from_vars(lookup(&[
            ("DISSEM_CONFIG", path.as_str()),
            ("DISSEM_MTU", "300"),
        ]))
        .unwrap();
        assert_eq!(layered.bind.port(), 7500);
        assert_eq!(layered.mtu, 300);
    }

    #[test]
    fn unknown_file_fields_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mtus": 256}}"#).unwrap();
        assert!(AgentConfig::from_file(file.path()).is_err());
    }
}
