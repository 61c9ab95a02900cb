//! amreplay is the messaging and orchestration substrate of a parallel trace
//! analysis: one analysis process per rank of the traced program, coordinating
//! through active messages while replaying the local trace.
//!
//! The crate provides four building blocks:
//!
//! * an [active message runtime][AmRuntime] to inject work onto remote ranks and
//!   to [fence][AmRuntime::fence] until it has been executed,
//! * a [callback manager][CallbackManager] dispatching trace events to analysis
//!   callbacks by event type, event group or user event id,
//! * [compound tasks][CompoundTask] sequencing the phases of an analysis,
//! * a [remote event set][RemoteEventSet] caching events transferred from peers
//!   under application defined keys.
//!
//! Ranks communicate over a [Fabric][fabric::Fabric]. The `Local` backend runs a
//! single rank, the `Threads` backend runs every rank as a thread of the
//! current process.
//!
//! EXAMPLES
//! --------
//!
//! # Building a runtime per rank and fencing active messages
//! ```ignore
//! use amreplay::active_messaging::prelude::*;
//!
//! let handles: Vec<_> = ThreadFabric::build(4)
//!     .into_iter()
//!     .map(|endpoint| {
//!         std::thread::spawn(move || {
//!             let mut rt = AmRuntimeBuilder::new().with_fabric(endpoint).build();
//!             let world = rt.world();
//!             rt.start_listen(&world);
//!             // attach handlers, enqueue requests ...
//!             rt.fence(&world).unwrap();
//!             rt.barrier(&world).unwrap();
//!         })
//!     })
//!     .collect();
//! ```
//!
//! # Configuration
//! Defaults are read once from `AMREPLAY_*` environment variables, see [Config].

#[macro_use]
extern crate lazy_static;

#[doc(hidden)]
pub extern crate tracing;

pub mod active_messaging;
pub use active_messaging::{
    AmContext, AmHandler, AmListener, AmRequest, AmRuntime, AmRuntimeBuilder, AmSummary, Buffer,
    HandlerId,
};

pub mod defs;
pub use defs::{Definitions, GlobalDefs};

mod env_var;
pub use env_var::{config, Config, FatalPolicy};

pub mod error;
pub use error::{Error, ErrorClass, Result, TransportError};

pub mod event;
pub use event::{Event, EventGroup, EventRecord, EventType};

pub mod fabric;
pub use fabric::{Backend, CommId, Communicator};

pub mod remote_event_set;
pub use remote_event_set::RemoteEventSet;

pub mod replay;
pub use replay::{CallbackManager, CompoundTask, Task, TaskHandle};

mod warnings;

#[doc(hidden)]
pub fn serialize<T: ?Sized>(obj: &T) -> Result<Vec<u8>>
where
    T: serde::Serialize,
{
    Ok(bincode::serialize(obj)?)
}

#[doc(hidden)]
pub fn deserialize<'a, T>(bytes: &'a [u8]) -> Result<T>
where
    T: serde::Deserialize<'a>,
{
    Ok(bincode::deserialize(bytes)?)
}
