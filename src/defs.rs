//! Read-only view of the global trace definitions.
//!
//! Events transferred between ranks only carry definition ids; the receiving
//! side resolves them against its own definitions before handing the event to
//! analysis code.

use crate::error::{Error, Result};
use crate::event::{DefId, Event, LocationId};

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: DefId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: LocationId,
    pub rank: u32,
    pub name: String,
}

/// A communicator as recorded in the trace (not the live transport handle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommDef {
    pub id: DefId,
    pub name: String,
    pub size: u32,
}

/// Lookup interface of the definitions context.
pub trait Definitions {
    fn region(&self, id: DefId) -> Option<&Region>;
    fn location(&self, id: LocationId) -> Option<&Location>;
    fn communicator(&self, id: DefId) -> Option<&CommDef>;

    /// Checks that every definition referenced by `event` is known.
    fn check_event(&self, event: &Event) -> Result<()> {
        if self.location(event.location).is_none() {
            return Err(Error::UnknownDefinition {
                kind: "location",
                id: event.location,
            });
        }
        if let Some(region) = event.record.region() {
            if self.region(region).is_none() {
                return Err(Error::UnknownDefinition {
                    kind: "region",
                    id: region as u64,
                });
            }
        }
        if let Some(comm) = event.record.comm() {
            if self.communicator(comm).is_none() {
                return Err(Error::UnknownDefinition {
                    kind: "communicator",
                    id: comm as u64,
                });
            }
        }
        Ok(())
    }
}

/// Simple in-memory definitions container.
#[derive(Debug, Default, Clone)]
pub struct GlobalDefs {
    regions: HashMap<DefId, Region>,
    locations: HashMap<LocationId, Location>,
    comms: HashMap<DefId, CommDef>,
}

impl GlobalDefs {
    pub fn new() -> GlobalDefs {
        Default::default()
    }

    pub fn add_region(&mut self, id: DefId, name: impl Into<String>) -> &mut Self {
        self.regions.insert(
            id,
            Region {
                id,
                name: name.into(),
            },
        );
        self
    }

    pub fn add_location(&mut self, id: LocationId, rank: u32, name: impl Into<String>) -> &mut Self {
        self.locations.insert(
            id,
            Location {
                id,
                rank,
                name: name.into(),
            },
        );
        self
    }

    pub fn add_communicator(&mut self, id: DefId, name: impl Into<String>, size: u32) -> &mut Self {
        self.comms.insert(
            id,
            CommDef {
                id,
                name: name.into(),
                size,
            },
        );
        self
    }
}

impl Definitions for GlobalDefs {
    fn region(&self, id: DefId) -> Option<&Region> {
        self.regions.get(&id)
    }
    fn location(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }
    fn communicator(&self, id: DefId) -> Option<&CommDef> {
        self.comms.get(&id)
    }
}
