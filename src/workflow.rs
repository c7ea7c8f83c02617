//! The mark-parked / find-car workflow.
//!
//! `ParkingWorkflow` owns no platform handles of its own: the store, location
//! source, address resolver and navigation launcher are all injected. Its state
//! moves through `WorkflowState`:
//!
//! - `Idle` or `Ready` → `AcquiringLocation` when a fix is requested
//! - `AcquiringLocation` → `ResolvingAddress` once the first fix arrives and the
//!   coordinate has been persisted
//! - `ResolvingAddress` → `Ready` when the resolver answers, whatever it says
//!
//! The workflow starts directly in `Ready` when a record was persisted earlier.
//! Every state change is published on a watch channel; presentation code
//! subscribes to it instead of being called back from the workflow's tasks.
//!
//! The published state is derived from the work in flight rather than saved
//! and restored by each call: any pending fix means `AcquiringLocation`, else a
//! pending lookup means `ResolvingAddress`, else the last committed record.
//!
//! Overlapping mark-parked calls are last-request-wins. Each call takes a
//! ticket when it starts. Once a newer call has persisted its fix, an older
//! call neither persists its late fix or address nor publishes state, and
//! reports `MarkOutcome::Superseded`. A newer call that fails before it has a
//! fix supersedes nothing.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;

use crate::geocode::{AddressResolver, format_address};
use crate::location::{Coordinate, CoordinateFix, LocationError, LocationSource, acquire_fix};
use crate::navigation::{Handoff, NavigationError, NavigationLauncher};
use crate::store::{LocationStore, ParkingRecord, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    AcquiringLocation,
    /// The fix is persisted; its address is being looked up
    ResolvingAddress(CoordinateFix),
    Ready(ParkingRecord),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("could not get the current location: {0}")]
    Location(#[from] LocationError),
    #[error("could not save the parking spot: {0}")]
    Store(#[from] StoreError),
    #[error("could not start navigation: {0}")]
    Navigation(#[from] NavigationError),
}

/// What became of the address lookup for a new parking spot
#[derive(Debug, Clone, PartialEq)]
pub enum AddressOutcome {
    Resolved(String),
    /// The resolver answered with no candidates
    NoCandidates,
    /// The resolver failed; the spot is kept without an address
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Parked {
        record: ParkingRecord,
        address: AddressOutcome,
    },
    /// A newer mark-parked call took over before this one finished
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FindOutcome {
    /// Nothing was ever parked; nothing happened
    NoRecord,
    Launched(Handoff),
}

/// Work in flight, from which the published state is derived
#[derive(Debug, Default)]
struct Progress {
    /// Ticket handed to the most recent mark-parked call
    last_ticket: u64,
    /// Ticket of the call whose fix was persisted last
    committed: u64,
    /// Fix requests not yet answered, from either operation
    acquiring: usize,
    /// Fix of the committed call while its address is looked up
    resolving: Option<CoordinateFix>,
    record: Option<ParkingRecord>,
}

impl Progress {
    fn state(&self) -> WorkflowState {
        if self.acquiring > 0 {
            WorkflowState::AcquiringLocation
        } else if let Some(fix) = &self.resolving {
            WorkflowState::ResolvingAddress(fix.clone())
        } else if let Some(record) = &self.record {
            WorkflowState::Ready(record.clone())
        } else {
            WorkflowState::Idle
        }
    }
}

pub struct ParkingWorkflow {
    store: Arc<dyn LocationStore>,
    location: Arc<dyn LocationSource>,
    resolver: Arc<dyn AddressResolver>,
    launcher: Arc<dyn NavigationLauncher>,
    route_from_current_location: bool,
    /// Held while checking tickets and writing the store
    progress: Mutex<Progress>,
    state: watch::Sender<WorkflowState>,
}

impl ParkingWorkflow {
    /// Creates the workflow, restoring any previously saved spot as `Ready`
    pub fn new(
        store: Arc<dyn LocationStore>,
        location: Arc<dyn LocationSource>,
        resolver: Arc<dyn AddressResolver>,
        launcher: Arc<dyn NavigationLauncher>,
    ) -> Self {
        let record = store.load();
        if let Some(record) = &record {
            info!("Restored parking spot {}", record.label());
        }
        let progress = Progress {
            record,
            ..Progress::default()
        };
        let (state, _) = watch::channel(progress.state());

        Self {
            store,
            location,
            resolver,
            launcher,
            route_from_current_location: false,
            progress: Mutex::new(progress),
            state,
        }
    }

    /// Route from a fresh fix when finding the car
    pub fn with_route_from_current_location(mut self, enabled: bool) -> Self {
        self.route_from_current_location = enabled;
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state.subscribe()
    }

    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        match self.progress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Applies `change` and publishes the resulting state if it differs
    fn update<R>(&self, change: impl FnOnce(&mut Progress) -> R) -> R {
        let mut progress = self.lock_progress();
        let result = change(&mut progress);
        let next = progress.state();
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("Workflow state -> {next:?}");
            *current = next;
            true
        });
        result
    }

    /// Marks the current location as the parking spot.
    ///
    /// The coordinate is persisted before the address is looked up, so a
    /// failed or slow lookup never loses the spot.
    pub async fn mark_parked(&self) -> Result<MarkOutcome, WorkflowError> {
        let ticket = self.update(|progress| {
            progress.last_ticket += 1;
            progress.acquiring += 1;
            progress.last_ticket
        });

        let fix = match acquire_fix(self.location.as_ref()).await {
            Ok(fix) => fix,
            Err(e) => {
                warn!("Mark parked failed: {e}");
                self.update(|progress| progress.acquiring -= 1);
                return Err(e.into());
            }
        };

        let saved = self.update(|progress| {
            progress.acquiring -= 1;
            if progress.committed > ticket {
                return None;
            }
            if let Err(e) = self.store.save_fix(&fix) {
                return Some(Err(e));
            }
            progress.committed = ticket;
            progress.resolving = Some(fix.clone());
            Some(Ok(()))
        });

        match saved {
            None => {
                debug!("Dropping fix at {} from a superseded request", fix.coordinate);
                return Ok(MarkOutcome::Superseded);
            }
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(())) => {}
        }

        let address = match self.resolver.reverse_geocode(fix.coordinate).await {
            Ok(candidates) => match candidates.first() {
                Some(placemark) => AddressOutcome::Resolved(format_address(placemark)),
                None => AddressOutcome::NoCandidates,
            },
            Err(e) => {
                warn!("Address lookup for {} failed: {}", fix.coordinate, e);
                AddressOutcome::Failed(e.to_string())
            }
        };

        let mut record = ParkingRecord::new(fix);
        let committed = self.update(|progress| {
            if progress.committed != ticket {
                return None;
            }
            let saved = match &address {
                AddressOutcome::Resolved(text) => self
                    .store
                    .save_address(text)
                    .map(|()| record.address = Some(text.clone())),
                _ => Ok(()),
            };
            // The coordinate is already durable, so the spot is ready either way
            progress.resolving = None;
            progress.record = Some(record.clone());
            Some(saved)
        });

        match committed {
            None => {
                debug!(
                    "Dropping address for {} from a superseded request",
                    record.coordinate()
                );
                Ok(MarkOutcome::Superseded)
            }
            Some(Err(e)) => Err(e.into()),
            Some(Ok(())) => {
                info!("Parked at {}", record.label());
                Ok(MarkOutcome::Parked { record, address })
            }
        }
    }

    /// Starts navigation back to the saved spot. Does nothing when no spot
    /// has been saved.
    pub async fn find_car(&self) -> Result<FindOutcome, WorkflowError> {
        let Some(record) = self.store.load() else {
            debug!("Find car requested with no saved spot");
            return Ok(FindOutcome::NoRecord);
        };

        let origin = if self.route_from_current_location {
            Some(self.acquire_origin().await?)
        } else {
            None
        };

        let handoff = self.launcher.launch(record.coordinate(), origin).await?;
        Ok(FindOutcome::Launched(handoff))
    }

    /// Takes a fix for the route origin without touching the parking record
    async fn acquire_origin(&self) -> Result<Coordinate, LocationError> {
        self.update(|progress| progress.acquiring += 1);
        let result = acquire_fix(self.location.as_ref()).await;
        self.update(|progress| progress.acquiring -= 1);
        result.map(|fix| fix.coordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::Placemark;
    use crate::mock::{RecordingLauncher, ScriptedLocationSource, StaticResolver};
    use crate::store::{MemoryKeyValueStore, ParkingStore};

    fn springfield() -> Placemark {
        Placemark {
            thoroughfare: Some("Main St".to_string()),
            sub_thoroughfare: Some("12".to_string()),
            locality: Some("Springfield".to_string()),
            postal_code: Some("12345".to_string()),
            country: Some("USA".to_string()),
        }
    }

    struct Harness {
        store: Arc<ParkingStore<MemoryKeyValueStore>>,
        location: Arc<ScriptedLocationSource>,
        resolver: Arc<StaticResolver>,
        launcher: Arc<RecordingLauncher>,
    }

    impl Harness {
        fn new(location: ScriptedLocationSource, resolver: StaticResolver) -> Self {
            Self {
                store: Arc::new(ParkingStore::new(MemoryKeyValueStore::new())),
                location: Arc::new(location),
                resolver: Arc::new(resolver),
                launcher: Arc::new(RecordingLauncher::new()),
            }
        }

        fn workflow(&self) -> ParkingWorkflow {
            ParkingWorkflow::new(
                self.store.clone(),
                self.location.clone(),
                self.resolver.clone(),
                self.launcher.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_mark_parked_saves_coordinate_and_address() {
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[Coordinate::new(39.78, -89.65)]),
            StaticResolver::new(vec![springfield()]),
        );
        let workflow = harness.workflow();
        assert_eq!(workflow.state(), WorkflowState::Idle);

        let outcome = workflow.mark_parked().await.unwrap();

        let MarkOutcome::Parked { record, address } = outcome else {
            panic!("expected a parked outcome");
        };
        assert_eq!(
            address,
            AddressOutcome::Resolved("Main St 12 Springfield 12345 USA".to_string())
        );
        assert_eq!(record.coordinate(), Coordinate::new(39.78, -89.65));
        assert_eq!(harness.store.load(), Some(record.clone()));
        assert_eq!(workflow.state(), WorkflowState::Ready(record));
        assert_eq!(harness.location.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_only_first_fix_is_used() {
        let first = CoordinateFix::new(Coordinate::new(10.0, 10.0));
        let second = CoordinateFix::new(Coordinate::new(20.0, 20.0));
        let harness = Harness::new(
            ScriptedLocationSource::new(vec![vec![first, second]]),
            StaticResolver::empty(),
        );

        harness.workflow().mark_parked().await.unwrap();

        let saved = harness.store.load().unwrap();
        assert_eq!(saved.coordinate(), Coordinate::new(10.0, 10.0));
        assert_eq!(harness.location.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let mut other = springfield();
        other.thoroughfare = Some("Elm St".to_string());
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[Coordinate::new(1.0, 1.0)]),
            StaticResolver::new(vec![other, springfield()]),
        );

        harness.workflow().mark_parked().await.unwrap();

        assert_eq!(
            harness.store.load().unwrap().address.as_deref(),
            Some("Elm St 12 Springfield 12345 USA")
        );
    }

    #[tokio::test]
    async fn test_no_candidates_keeps_coordinate_only() {
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[Coordinate::new(0.0, 0.0)]),
            StaticResolver::empty(),
        );
        let workflow = harness.workflow();

        let outcome = workflow.mark_parked().await.unwrap();

        assert!(matches!(
            outcome,
            MarkOutcome::Parked {
                address: AddressOutcome::NoCandidates,
                ..
            }
        ));
        let saved = harness.store.load().unwrap();
        assert_eq!(saved.address, None);
        assert_eq!(saved.label(), "0.000000, 0.000000");
    }

    #[tokio::test]
    async fn test_resolver_failure_keeps_coordinate() {
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[Coordinate::new(5.0, 6.0)]),
            StaticResolver::failing(),
        );
        let workflow = harness.workflow();

        let outcome = workflow.mark_parked().await.unwrap();

        assert!(matches!(
            outcome,
            MarkOutcome::Parked {
                address: AddressOutcome::Failed(_),
                ..
            }
        ));
        assert_eq!(
            harness.store.load().map(|r| r.coordinate()),
            Some(Coordinate::new(5.0, 6.0))
        );
        assert!(matches!(workflow.state(), WorkflowState::Ready(_)));
    }

    #[tokio::test]
    async fn test_permission_denied_is_distinguishable() {
        let harness = Harness::new(ScriptedLocationSource::denied(), StaticResolver::empty());
        let workflow = harness.workflow();

        let result = workflow.mark_parked().await;

        assert!(matches!(
            result,
            Err(WorkflowError::Location(LocationError::PermissionDenied))
        ));
        assert_eq!(workflow.state(), WorkflowState::Idle);
        assert!(harness.store.load().is_none());
        assert_eq!(harness.resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_fix_restores_previous_state() {
        let harness = Harness::new(
            ScriptedLocationSource::new(vec![vec![CoordinateFix::new(Coordinate::new(1.0, 2.0))], vec![]]),
            StaticResolver::empty(),
        );
        let workflow = harness.workflow();
        workflow.mark_parked().await.unwrap();
        let ready = workflow.state();

        let result = workflow.mark_parked().await;

        assert!(matches!(
            result,
            Err(WorkflowError::Location(LocationError::NoFix))
        ));
        assert_eq!(workflow.state(), ready);
    }

    #[tokio::test]
    async fn test_second_mark_replaces_first() {
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[
                Coordinate::new(41.8781, -87.6298),
                Coordinate::new(40.7128, -74.0060),
            ]),
            StaticResolver::empty(),
        );
        let workflow = harness.workflow();

        workflow.mark_parked().await.unwrap();
        workflow.mark_parked().await.unwrap();

        let saved = harness.store.load().unwrap();
        assert_eq!(saved.coordinate(), Coordinate::new(40.7128, -74.0060));
        assert_eq!(saved.address, None);
    }

    #[tokio::test]
    async fn test_find_car_without_record_is_noop() {
        let harness = Harness::new(ScriptedLocationSource::new(vec![]), StaticResolver::empty());
        let workflow = harness.workflow();

        let outcome = workflow.find_car().await.unwrap();

        assert_eq!(outcome, FindOutcome::NoRecord);
        assert!(harness.launcher.launches().is_empty());
        assert_eq!(workflow.state(), WorkflowState::Idle);
    }

    #[tokio::test]
    async fn test_find_car_launches_to_saved_spot() {
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[Coordinate::new(40.64, 22.94)]),
            StaticResolver::empty(),
        );
        let workflow = harness.workflow();
        workflow.mark_parked().await.unwrap();
        let before = workflow.state();

        let outcome = workflow.find_car().await.unwrap();

        assert!(matches!(outcome, FindOutcome::Launched(_)));
        assert_eq!(
            harness.launcher.launches(),
            vec![(Coordinate::new(40.64, 22.94), None)]
        );
        assert_eq!(workflow.state(), before);
    }

    #[tokio::test]
    async fn test_find_car_routes_from_fresh_fix() {
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[
                Coordinate::new(40.64, 22.94),
                Coordinate::new(40.60, 22.96),
            ]),
            StaticResolver::empty(),
        );
        let workflow = harness.workflow().with_route_from_current_location(true);
        workflow.mark_parked().await.unwrap();
        let before = workflow.state();

        workflow.find_car().await.unwrap();

        assert_eq!(
            harness.launcher.launches(),
            vec![(
                Coordinate::new(40.64, 22.94),
                Some(Coordinate::new(40.60, 22.96))
            )]
        );
        assert_eq!(workflow.state(), before);
        assert_eq!(
            harness.store.load().map(|r| r.coordinate()),
            Some(Coordinate::new(40.64, 22.94))
        );
    }

    #[tokio::test]
    async fn test_restores_ready_state_on_startup() {
        let harness = Harness::new(ScriptedLocationSource::new(vec![]), StaticResolver::empty());
        let record = ParkingRecord::new(CoordinateFix::new(Coordinate::new(3.0, 4.0)))
            .with_address("Old Address");
        harness.store.save(&record).unwrap();

        let workflow = harness.workflow();

        assert_eq!(workflow.state(), WorkflowState::Ready(record));
        assert_eq!(harness.resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_final_state() {
        let harness = Harness::new(
            ScriptedLocationSource::from_coordinates(&[Coordinate::new(7.0, 8.0)]),
            StaticResolver::new(vec![springfield()]),
        );
        let workflow = harness.workflow();
        let mut updates = workflow.subscribe();

        workflow.mark_parked().await.unwrap();

        assert!(updates.has_changed().unwrap());
        let WorkflowState::Ready(record) = updates.borrow_and_update().clone() else {
            panic!("expected ready state");
        };
        assert_eq!(record.label(), "Main St 12 Springfield 12345 USA");
    }
}
