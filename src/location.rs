//! Coordinates and the location source collaborator.
//!
//! A `LocationSource` follows the usual platform sequence: request permission,
//! start updates, deliver one or more fixes, stop updates. The workflow only
//! ever wants the first fix, so `acquire_fix` wraps that sequence into a single
//! awaited result and always stops the source once it has a fix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and inside their valid ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// A single reading from a location source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateFix {
    pub coordinate: Coordinate,
    /// Altitude in meters, when the source reports one
    pub altitude: Option<f64>,
    /// Radius of uncertainty in meters
    pub horizontal_accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl CoordinateFix {
    /// A fix with no metadata, stamped now
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            altitude: None,
            horizontal_accuracy: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location source stopped before delivering a fix")]
    NoFix,
    #[error("invalid coordinate {0}")]
    InvalidCoordinate(Coordinate),
}

/// A provider of coordinate fixes
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Ask the host for permission to read the location
    async fn request_authorization(&self) -> Result<(), LocationError>;

    /// Begin delivering fixes. The stream may yield any number of them.
    async fn start_updates(&self) -> Result<BoxStream<'static, CoordinateFix>, LocationError>;

    /// Stop delivering fixes
    async fn stop_updates(&self);
}

/// Runs the permission/start/stop sequence and returns the first fix
pub async fn acquire_fix(source: &dyn LocationSource) -> Result<CoordinateFix, LocationError> {
    source.request_authorization().await?;

    let mut updates = source.start_updates().await?;
    let first = updates.next().await;
    source.stop_updates().await;
    drop(updates);

    let fix = first.ok_or(LocationError::NoFix)?;
    if !fix.coordinate.is_valid() {
        return Err(LocationError::InvalidCoordinate(fix.coordinate));
    }

    debug!("Acquired fix at {}", fix.coordinate);
    Ok(fix)
}

/// A source that always reports the same fix, e.g. one given on the command line
pub struct FixedLocationSource {
    fix: CoordinateFix,
    updating: Mutex<bool>,
}

impl FixedLocationSource {
    pub fn new(fix: CoordinateFix) -> Self {
        Self {
            fix,
            updating: Mutex::new(false),
        }
    }

    /// Whether updates were started and not yet stopped
    pub fn is_updating(&self) -> bool {
        self.updating.lock().map(|guard| *guard).unwrap_or(false)
    }

    fn set_updating(&self, value: bool) {
        if let Ok(mut guard) = self.updating.lock() {
            *guard = value;
        }
    }
}

#[async_trait]
impl LocationSource for FixedLocationSource {
    async fn request_authorization(&self) -> Result<(), LocationError> {
        Ok(())
    }

    async fn start_updates(&self) -> Result<BoxStream<'static, CoordinateFix>, LocationError> {
        self.set_updating(true);
        Ok(stream::once(futures::future::ready(self.fix.clone())).boxed())
    }

    async fn stop_updates(&self) {
        self.set_updating(false);
    }
}
