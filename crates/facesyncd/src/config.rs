use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Some(Self::Session),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Daemon configuration: an optional TOML file overridden by `FACESYNC_*`
/// environment variables. Credentials and the match threshold are not part
/// of it; they live in the settings store and can change at runtime.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding settings.json, logs.json and userdata/.
    pub data_dir: PathBuf,
    /// Face++ API base URL.
    pub api_url: String,
    /// Bound on one provider request.
    pub request_timeout: Duration,
    /// Lifetime of a recognition snapshot handle.
    pub snapshot_ttl: Duration,
    /// Number of log lines kept for GetLogs.
    pub log_capacity: usize,
    /// Remote set id used by earlier single-tenant releases; cleared once per process.
    pub legacy_set_id: Option<String>,
    pub bus: BusKind,
}

/// On-disk shape of the config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    api_url: Option<String>,
    request_timeout_secs: Option<u64>,
    snapshot_ttl_secs: Option<u64>,
    log_capacity: Option<usize>,
    legacy_set_id: Option<String>,
    bus: Option<BusKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: facesync_cloud::DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(180),
            log_capacity: 200,
            legacy_set_id: Some("homey".to_string()),
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load `$FACESYNC_CONFIG` (if set) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACESYNC_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    fn from_toml(raw: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw)?;
        let mut config = Self::default();
        if let Some(v) = file.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = file.api_url {
            config.api_url = v;
        }
        if let Some(v) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.snapshot_ttl_secs {
            config.snapshot_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.log_capacity {
            config.log_capacity = v;
        }
        if let Some(v) = file.legacy_set_id {
            config.legacy_set_id = non_empty(v);
        }
        if let Some(v) = file.bus {
            config.bus = v;
        }
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FACESYNC_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACESYNC_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = env_u64("FACESYNC_REQUEST_TIMEOUT_SECS") {
            self.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("FACESYNC_SNAPSHOT_TTL_SECS") {
            self.snapshot_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("FACESYNC_LOG_CAPACITY") {
            self.log_capacity = v as usize;
        }
        if let Ok(v) = std::env::var("FACESYNC_LEGACY_SET_ID") {
            self.legacy_set_id = non_empty(v);
        }
        if let Some(bus) = std::env::var("FACESYNC_BUS").ok().and_then(|v| BusKind::parse(&v)) {
            self.bus = bus;
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn logs_path(&self) -> PathBuf {
        self.data_dir.join("logs.json")
    }

    /// Directory of per-identity reference images.
    pub fn userdata_dir(&self) -> PathBuf {
        self.data_dir.join("userdata")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facesync")
}

fn non_empty(v: String) -> Option<String> {
    let v = v.trim().to_string();
    (!v.is_empty()).then_some(v)
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
