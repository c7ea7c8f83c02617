use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::navigation::TravelMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the parking record is persisted
    pub data_file: String,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocoderProvider {
    Mock,
    Nominatim,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub provider: GeocoderProvider,
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            provider: GeocoderProvider::Nominatim,
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("where-did-i-park/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub travel_mode: TravelMode,
    pub web_base_url: String,
    /// Take a fresh fix and route from it instead of leaving the origin to the maps app
    pub route_from_current_location: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            travel_mode: TravelMode::Walking,
            web_base_url: "https://www.google.com/maps/dir/".to_string(),
            route_from_current_location: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: "data/parking.yaml".to_string(),
            geocoder: GeocoderConfig::default(),
            navigation: NavigationConfig::default(),
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("parked.yaml"))
    }
}
