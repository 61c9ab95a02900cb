use crate::config;
use crate::error::TransportError;

use enum_dispatch::enum_dispatch;

pub(crate) mod comm;
pub use comm::{CommId, Communicator};

pub(crate) mod local_fabric;
pub use local_fabric::LocalFabric;

pub(crate) mod thread_fabric;
pub use thread_fabric::ThreadFabric;

/// The list of available fabric backends, used to specify how data is transfered between ranks
#[derive(
    serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy,
)]
pub enum Backend {
    /// The Local backend -- intended for single rank environments
    Local,
    /// The Threads backend -- every rank is a thread of the current process, intended for
    /// simulating distributed executions
    Threads,
}

impl Default for Backend {
    fn default() -> Self {
        match config().backend.as_str() {
            "threads" => Backend::Threads,
            "local" => Backend::Local,
            other => {
                tracing::warn!("unknown AMREPLAY_BACKEND {other:?}, falling back to local");
                Backend::Local
            }
        }
    }
}

/// Message classes carried by the fabric. Internal traffic never matches user
/// receives because only [Tag::User] is reachable from the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Tag {
    User(u32),
    ActiveMessage,
    Barrier { epoch: u64, round: u32 },
    Bcast { epoch: u64 },
}

/// One point-to-point message in flight.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub(crate) comm: CommId,
    pub(crate) src: usize, // world rank of the sender
    pub(crate) tag: Tag,
    pub(crate) payload: Vec<u8>,
}

impl Envelope {
    pub(crate) fn matches(&self, comm: CommId, src: Option<usize>, tag: Tag) -> bool {
        self.comm == comm && self.tag == tag && src.map_or(true, |src| src == self.src)
    }
}

#[enum_dispatch(FabricComm)]
#[derive(Debug)]
pub enum Fabric {
    LocalFabric,
    ThreadFabric,
}

/// Point-to-point operations every backend provides; collectives are layered
/// on top of these by [Communicator].
///
/// Messages between one pair of ranks are delivered in the order they were sent.
#[enum_dispatch]
pub(crate) trait FabricComm {
    fn my_rank(&self) -> usize;
    fn num_ranks(&self) -> usize;
    fn backend(&self) -> Backend;
    fn send(&self, dst: usize, env: Envelope) -> Result<(), TransportError>;
    /// return the oldest message matching `filter`, if one has arrived
    fn try_recv(
        &self,
        filter: &dyn Fn(&Envelope) -> bool,
    ) -> Result<Option<Envelope>, TransportError>;
    /// block until a message matching `filter` arrives
    fn recv(&self, filter: &dyn Fn(&Envelope) -> bool) -> Result<Envelope, TransportError>;
}

impl Fabric {
    pub fn rank(&self) -> usize {
        self.my_rank()
    }
    pub fn size(&self) -> usize {
        self.num_ranks()
    }
    pub fn kind(&self) -> Backend {
        self.backend()
    }
}

pub(crate) fn create_fabric(backend: Backend) -> Fabric {
    match backend {
        Backend::Local => Fabric::LocalFabric(LocalFabric::new()),
        Backend::Threads => {
            tracing::debug!("building a single rank threads fabric, use ThreadFabric::build for more ranks");
            ThreadFabric::build(1)
                .pop()
                .map(Fabric::ThreadFabric)
                .unwrap_or_else(|| Fabric::LocalFabric(LocalFabric::new()))
        }
    }
}
