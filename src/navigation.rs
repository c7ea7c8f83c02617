//! Handing the destination off to a turn-by-turn navigation app.
//!
//! `MapsLauncher` probes whether the host can open the maps app's custom URI
//! scheme and, if so, opens the app's directions URL. Otherwise it falls back
//! to the equivalent web URL. The host side (probing and opening) sits behind
//! `UrlOpener` so it can be swapped for a printing or recording opener.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};
use thiserror::Error;
use url::Url;

use crate::config::NavigationConfig;
use crate::location::Coordinate;

/// Scheme probed to detect the installed maps app
pub const APP_PROBE_URL: &str = "comgooglemaps://";
/// Scheme used to open directions in the installed maps app
pub const APP_DIRECTIONS_URL: &str = "comgooglemaps-x-callback://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Walking,
    Driving,
    Transit,
    Bicycling,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Driving => "driving",
            TravelMode::Transit => "transit",
            TravelMode::Bicycling => "bicycling",
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("invalid navigation url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to open {url}: {reason}")]
    Open { url: Url, reason: String },
}

/// Where the destination was handed off to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffTarget {
    App,
    Web,
}

/// A handoff that was made; nothing is awaited from the other side
#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    pub target: HandoffTarget,
    pub url: Url,
}

/// The host's ability to open URLs
pub trait UrlOpener: Send + Sync {
    /// Whether something on the host handles `url`'s scheme
    fn can_open(&self, url: &Url) -> bool;

    fn open(&self, url: &Url) -> Result<(), NavigationError>;
}

/// Interface for starting navigation to the parked car
#[async_trait]
pub trait NavigationLauncher: Send + Sync {
    /// Start directions to `destination`, from `origin` or the user's current
    /// position when `origin` is `None`
    async fn launch(
        &self,
        destination: Coordinate,
        origin: Option<Coordinate>,
    ) -> Result<Handoff, NavigationError>;
}

/// Launches Google Maps, as an app when installed and in a browser otherwise
pub struct MapsLauncher<O> {
    opener: O,
    travel_mode: TravelMode,
    web_base_url: String,
}

impl<O: UrlOpener> MapsLauncher<O> {
    pub fn new(opener: O, config: &NavigationConfig) -> Self {
        Self {
            opener,
            travel_mode: config.travel_mode,
            web_base_url: config.web_base_url.clone(),
        }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    fn directions_query(&self, destination: Coordinate, origin: Option<Coordinate>) -> String {
        let saddr = origin
            .map(|c| format!("{},{}", c.latitude, c.longitude))
            .unwrap_or_default();
        format!(
            "saddr={}&daddr={},{}&directionsmode={}",
            saddr, destination.latitude, destination.longitude, self.travel_mode
        )
    }

    pub fn app_url(
        &self,
        destination: Coordinate,
        origin: Option<Coordinate>,
    ) -> Result<Url, NavigationError> {
        let url = format!(
            "{}?{}",
            APP_DIRECTIONS_URL,
            self.directions_query(destination, origin)
        );
        Ok(Url::parse(&url)?)
    }

    pub fn web_url(
        &self,
        destination: Coordinate,
        origin: Option<Coordinate>,
    ) -> Result<Url, NavigationError> {
        let url = format!(
            "{}?{}",
            self.web_base_url,
            self.directions_query(destination, origin)
        );
        Ok(Url::parse(&url)?)
    }
}

#[async_trait]
impl<O: UrlOpener> NavigationLauncher for MapsLauncher<O> {
    async fn launch(
        &self,
        destination: Coordinate,
        origin: Option<Coordinate>,
    ) -> Result<Handoff, NavigationError> {
        let probe = Url::parse(APP_PROBE_URL)?;

        let handoff = if self.opener.can_open(&probe) {
            Handoff {
                target: HandoffTarget::App,
                url: self.app_url(destination, origin)?,
            }
        } else {
            debug!("No maps app registered for {APP_PROBE_URL}, using the web");
            Handoff {
                target: HandoffTarget::Web,
                url: self.web_url(destination, origin)?,
            }
        };

        // The handoff counts as made even if the other side fails to open
        if let Err(e) = self.opener.open(&handoff.url) {
            warn!("{e}");
        }

        info!("Handed off navigation to {}", handoff.url);
        Ok(handoff)
    }
}

fn is_web(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Opens URLs with the desktop's own opener
pub struct SystemOpener;

impl SystemOpener {
    fn open_command(url: &Url) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(url.as_str());
            cmd
        } else if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", url.as_str()]);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url.as_str());
            cmd
        }
    }
}

impl UrlOpener for SystemOpener {
    fn can_open(&self, url: &Url) -> bool {
        if is_web(url) {
            return true;
        }

        if !cfg!(target_os = "linux") {
            return false;
        }

        // Ask xdg for a registered scheme handler
        let output = Command::new("xdg-mime")
            .args(["query", "default", &format!("x-scheme-handler/{}", url.scheme())])
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(output) => output.status.success() && !output.stdout.trim_ascii().is_empty(),
            Err(e) => {
                debug!("Could not probe scheme {}: {}", url.scheme(), e);
                false
            }
        }
    }

    fn open(&self, url: &Url) -> Result<(), NavigationError> {
        Self::open_command(url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|e| NavigationError::Open {
                url: url.clone(),
                reason: e.to_string(),
            })
    }
}

/// Prints URLs instead of opening them. Only web URLs are accepted.
pub struct PrintOpener;

impl UrlOpener for PrintOpener {
    fn can_open(&self, url: &Url) -> bool {
        is_web(url)
    }

    fn open(&self, url: &Url) -> Result<(), NavigationError> {
        println!("{url}");
        Ok(())
    }
}
