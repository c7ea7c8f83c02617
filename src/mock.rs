//! Test doubles for the workflow's collaborators.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;
use url::Url;

use crate::geocode::{AddressResolver, GeocodeError, Placemark};
use crate::location::{Coordinate, CoordinateFix, LocationError, LocationSource};
use crate::navigation::{Handoff, HandoffTarget, NavigationError, NavigationLauncher, UrlOpener};
use crate::store::{KeyValueStore, MemoryKeyValueStore, StoreError, StoredValue};

/// A location source that hands out a scripted batch of fixes per start
pub struct ScriptedLocationSource {
    batches: Mutex<Vec<Vec<CoordinateFix>>>,
    /// Starts that wait for a release, keyed by start index
    gates: Mutex<HashMap<usize, oneshot::Receiver<()>>>,
    denied: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ScriptedLocationSource {
    /// Each call to `start_updates` delivers the next batch
    pub fn new(batches: Vec<Vec<CoordinateFix>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().rev().collect()),
            gates: Mutex::new(HashMap::new()),
            denied: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// One single-fix batch per coordinate
    pub fn from_coordinates(coordinates: &[Coordinate]) -> Self {
        Self::new(
            coordinates
                .iter()
                .map(|c| vec![CoordinateFix::new(*c)])
                .collect(),
        )
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::new(Vec::new())
        }
    }

    /// Holds the `index`th start (counting from zero) until the returned
    /// sender fires. The batch is claimed before waiting, so later starts get
    /// the batches after it.
    pub fn gate_start(&self, index: usize) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut gates) = self.gates.lock() {
            gates.insert(index, rx);
        }
        tx
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationSource for ScriptedLocationSource {
    async fn request_authorization(&self) -> Result<(), LocationError> {
        if self.denied {
            Err(LocationError::PermissionDenied)
        } else {
            Ok(())
        }
    }

    async fn start_updates(&self) -> Result<BoxStream<'static, CoordinateFix>, LocationError> {
        let batch = self
            .batches
            .lock()
            .ok()
            .and_then(|mut batches| batches.pop())
            .unwrap_or_default();
        let index = self.starts.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .gates
            .lock()
            .ok()
            .and_then(|mut gates| gates.remove(&index));
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(stream::iter(batch).boxed())
    }

    async fn stop_updates(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A resolver that always answers with the same candidates
pub struct StaticResolver {
    candidates: Vec<Placemark>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(candidates: Vec<Placemark>) -> Self {
        Self {
            candidates,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// A resolver whose every lookup fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn reverse_geocode(
        &self,
        _coordinate: Coordinate,
    ) -> Result<Vec<Placemark>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GeocodeError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ));
        }
        Ok(self.candidates.clone())
    }
}

/// A resolver whose first lookup waits until released, for overlap tests
pub struct GatedResolver {
    inner: StaticResolver,
    gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
}

impl GatedResolver {
    /// Returns the resolver and the sender that releases its first lookup
    pub fn new(candidates: Vec<Placemark>) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let resolver = Self {
            inner: StaticResolver::new(candidates),
            gate: tokio::sync::Mutex::new(Some(rx)),
        };
        (resolver, tx)
    }
}

#[async_trait]
impl AddressResolver for GatedResolver {
    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Vec<Placemark>, GeocodeError> {
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.reverse_geocode(coordinate).await
    }
}

/// An in-memory store whose writes to one key always fail
pub struct FailingKeyValueStore {
    inner: MemoryKeyValueStore,
    failing_key: String,
}

impl FailingKeyValueStore {
    pub fn new(failing_key: &str) -> Self {
        Self {
            inner: MemoryKeyValueStore::new(),
            failing_key: failing_key.to_string(),
        }
    }
}

impl KeyValueStore for FailingKeyValueStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        if key == self.failing_key {
            return Err(StoreError::Io {
                path: format!("memory:{key}").into(),
                source: io::Error::other("disk full"),
            });
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}

/// A launcher that records destinations instead of opening anything
#[derive(Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<(Coordinate, Option<Coordinate>)>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launches(&self) -> Vec<(Coordinate, Option<Coordinate>)> {
        self.launches
            .lock()
            .map(|launches| launches.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NavigationLauncher for RecordingLauncher {
    async fn launch(
        &self,
        destination: Coordinate,
        origin: Option<Coordinate>,
    ) -> Result<Handoff, NavigationError> {
        if let Ok(mut launches) = self.launches.lock() {
            launches.push((destination, origin));
        }
        let url = Url::parse(&format!(
            "https://maps.example.com/?daddr={},{}",
            destination.latitude, destination.longitude
        ))?;
        Ok(Handoff {
            target: HandoffTarget::Web,
            url,
        })
    }
}

/// A URL opener that records what it was asked to open
pub struct RecordingOpener {
    app_installed: bool,
    fail: bool,
    opened: Mutex<Vec<Url>>,
}

impl RecordingOpener {
    pub fn new(app_installed: bool) -> Self {
        Self {
            app_installed,
            fail: false,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// An opener with no maps app whose every open fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(false)
        }
    }

    pub fn opened(&self) -> Vec<Url> {
        self.opened
            .lock()
            .map(|opened| opened.clone())
            .unwrap_or_default()
    }
}

impl UrlOpener for RecordingOpener {
    fn can_open(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") || self.app_installed
    }

    fn open(&self, url: &Url) -> Result<(), NavigationError> {
        if self.fail {
            return Err(NavigationError::Open {
                url: url.clone(),
                reason: "no handler".to_string(),
            });
        }
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(url.clone());
        }
        Ok(())
    }
}
