//! # where-did-i-park
//!
//! Remember where you parked and navigate back to it.
//!
//! Marking a spot takes one fix from a location source, persists it at once,
//! then reverse geocodes it into a one-line street address and persists that
//! too. Finding the car loads the saved spot and hands it off to a maps app,
//! or to the maps website when no app is available.
//!
//! ## Modules
//!
//! - `location`: coordinates, fixes and the location source contract
//! - `store`: the key-value store and the single persisted parking record
//! - `geocode`: address resolvers and address formatting
//! - `navigation`: maps app / web handoff
//! - `workflow`: the mark-parked and find-car state machine
//! - `config`: YAML configuration for the `parked` binary
//! - `mock`: test doubles for every collaborator

pub mod config;
pub mod geocode;
pub mod location;
pub mod mock;
pub mod navigation;
pub mod store;
pub mod workflow;
