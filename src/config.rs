use crate::error::{ReportError, Result};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "EV_REPORT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "ev-report.toml";

/// IANA zones for Australian states and territories.
static DEFAULT_STATE_ZONES: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    [
        ("ACT", "Australia/Sydney"),
        ("NSW", "Australia/Sydney"),
        ("NT", "Australia/Darwin"),
        ("QLD", "Australia/Brisbane"),
        ("SA", "Australia/Adelaide"),
        ("TAS", "Australia/Hobart"),
        ("VIC", "Australia/Melbourne"),
        ("WA", "Australia/Perth"),
    ]
    .into_iter()
    .map(|(state, zone)| (state.to_string(), zone.to_string()))
    .collect()
});

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub usage_csv: PathBuf,
    pub lga_centroids_csv: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            usage_csv: PathBuf::from("final_processed_data.csv"),
            lga_centroids_csv: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub preview_rows: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
            preview_rows: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub output: OutputConfig,
    /// State code to IANA zone name.
    pub timezones: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            output: OutputConfig::default(),
            timezones: DEFAULT_STATE_ZONES.clone(),
        }
    }
}

impl AppConfig {
    /// Resolve and load the config: an explicit path, then `EV_REPORT_CONFIG`,
    /// then `ev-report.toml` if present, else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            return Self::from_file(fallback);
        }
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
        let mut cfg: AppConfig = toml::from_str(&contents).map_err(|e| ReportError::Config {
            path: path.to_path_buf(),
            source: e,
        })?;
        // Configured states override the defaults; unlisted states keep them.
        for (state, zone) in DEFAULT_STATE_ZONES.iter() {
            cfg.timezones
                .entry(state.clone())
                .or_insert_with(|| zone.clone());
        }
        tracing::info!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Resolved zone per state. Unknown zone names are an error.
    pub fn state_zones(&self) -> Result<BTreeMap<String, Tz>> {
        self.timezones
            .iter()
            .map(|(state, zone)| {
                zone.parse::<Tz>()
                    .map(|tz| (state.clone(), tz))
                    .map_err(|_| ReportError::invalid("timezone", format!("{state}={zone}")))
            })
            .collect()
    }
}
