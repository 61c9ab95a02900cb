//! Trace events as seen by the replay substrate.
//!
//! Events are produced by the trace layer (decoding trace files is not part of
//! this crate) and consumed here by the [CallbackManager][crate::CallbackManager]
//! and the [RemoteEventSet][crate::RemoteEventSet]. Every event carries its
//! concrete kind as a variant of [EventRecord], so dispatching on the kind is an
//! exhaustive `match` rather than a runtime cast.

use serde::{Deserialize, Serialize};

/// Identifier of a region, communicator, window or callsite definition.
pub type DefId = u32;
/// Identifier of a location (rank/thread) definition.
pub type LocationId = u64;
/// Application defined "user event" id used by synthetic notifications.
pub type UserEventId = i32;
/// Trace timestamp in seconds.
pub type Timestamp = f64;

/// The concrete kinds of trace events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    // generic
    Enter,
    EnterCs,
    EnterProgram,
    Leave,
    LeaveProgram,

    // MPI point-to-point and collectives
    MpiCollectiveBegin,
    MpiCollectiveEnd,
    MpiSend,
    MpiSendRequest,  // nonblocking send request
    MpiSendComplete, // nonblocking send completion
    MpiRecv,
    MpiRecvRequest,   // nonblocking receive request
    MpiRecvComplete,  // nonblocking receive completion
    MpiRequestTested, // unsuccessful test of request
    MpiCancelled,

    // threading, model independent
    ThreadAcquireLock,
    ThreadReleaseLock,
    ThreadTaskCreate,
    ThreadTaskComplete,
    ThreadTaskSwitch,

    // threading, create/wait
    ThreadBegin,
    ThreadEnd,
    ThreadCreate,
    ThreadWait,

    // threading, fork/join
    ThreadFork,
    ThreadJoin,
    ThreadTeamBegin,
    ThreadTeamEnd,

    // generic RMA
    RmaPutStart,
    RmaPutEnd,
    RmaGetStart,
    RmaGetEnd,

    // MPI RMA
    MpiRmaPutStart,
    MpiRmaPutEnd,
    MpiRmaGetStart,
    MpiRmaGetEnd,
    MpiRmaGats,
    MpiRmaCollectiveBegin,
    MpiRmaCollectiveEnd,
    MpiRmaLock,
    MpiRmaUnlock,
}

impl EventType {
    /// Every concrete event type, in declaration order.
    pub const ALL: [EventType; 41] = [
        EventType::Enter,
        EventType::EnterCs,
        EventType::EnterProgram,
        EventType::Leave,
        EventType::LeaveProgram,
        EventType::MpiCollectiveBegin,
        EventType::MpiCollectiveEnd,
        EventType::MpiSend,
        EventType::MpiSendRequest,
        EventType::MpiSendComplete,
        EventType::MpiRecv,
        EventType::MpiRecvRequest,
        EventType::MpiRecvComplete,
        EventType::MpiRequestTested,
        EventType::MpiCancelled,
        EventType::ThreadAcquireLock,
        EventType::ThreadReleaseLock,
        EventType::ThreadTaskCreate,
        EventType::ThreadTaskComplete,
        EventType::ThreadTaskSwitch,
        EventType::ThreadBegin,
        EventType::ThreadEnd,
        EventType::ThreadCreate,
        EventType::ThreadWait,
        EventType::ThreadFork,
        EventType::ThreadJoin,
        EventType::ThreadTeamBegin,
        EventType::ThreadTeamEnd,
        EventType::RmaPutStart,
        EventType::RmaPutEnd,
        EventType::RmaGetStart,
        EventType::RmaGetEnd,
        EventType::MpiRmaPutStart,
        EventType::MpiRmaPutEnd,
        EventType::MpiRmaGetStart,
        EventType::MpiRmaGetEnd,
        EventType::MpiRmaGats,
        EventType::MpiRmaCollectiveBegin,
        EventType::MpiRmaCollectiveEnd,
        EventType::MpiRmaLock,
        EventType::MpiRmaUnlock,
    ];
}

/// Symbolic categories that expand to a fixed set of concrete [EventType]s
/// when a callback is registered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventGroup {
    /// any event
    All,
    /// nonblocking point-to-point events (requests, completions, tests, cancels)
    Nonblock,
    /// Enter, EnterCs, EnterProgram
    Enter,
    /// Leave, LeaveProgram
    Leave,
    /// MpiSend, MpiSendRequest
    Send,
    /// MpiRecv, MpiRecvComplete
    Recv,
    /// collective begin events
    Begin,
    /// collective end events
    End,
}

impl EventGroup {
    pub const ALL: [EventGroup; 8] = [
        EventGroup::All,
        EventGroup::Nonblock,
        EventGroup::Enter,
        EventGroup::Leave,
        EventGroup::Send,
        EventGroup::Recv,
        EventGroup::Begin,
        EventGroup::End,
    ];
}

/// The kind-specific payload of an event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EventRecord {
    Enter { region: DefId },
    EnterCs { region: DefId, callsite: DefId },
    EnterProgram { region: DefId },
    Leave { region: DefId },
    LeaveProgram { region: DefId },

    MpiCollectiveBegin,
    MpiCollectiveEnd {
        comm: DefId,
        root: Option<u32>,
        bytes_sent: u64,
        bytes_received: u64,
    },
    MpiSend { comm: DefId, dest: u32, tag: u32, bytes: u64 },
    MpiSendRequest { comm: DefId, dest: u32, tag: u32, bytes: u64, request: u64 },
    MpiSendComplete { request: u64 },
    MpiRecv { comm: DefId, source: u32, tag: u32, bytes: u64 },
    MpiRecvRequest { request: u64 },
    MpiRecvComplete { comm: DefId, source: u32, tag: u32, bytes: u64, request: u64 },
    MpiRequestTested { request: u64 },
    MpiCancelled { request: u64 },

    ThreadAcquireLock { lock: u32 },
    ThreadReleaseLock { lock: u32 },
    ThreadTaskCreate { task: u64 },
    ThreadTaskComplete { task: u64 },
    ThreadTaskSwitch { task: u64 },
    ThreadBegin { team: DefId },
    ThreadEnd { team: DefId },
    ThreadCreate { team: DefId },
    ThreadWait { team: DefId },
    ThreadFork { team_size: u32 },
    ThreadJoin,
    ThreadTeamBegin { team: DefId },
    ThreadTeamEnd { team: DefId },

    RmaPutStart { rma_id: u32, remote: u32, bytes: u64 },
    RmaPutEnd { rma_id: u32 },
    RmaGetStart { rma_id: u32, remote: u32, bytes: u64 },
    RmaGetEnd { rma_id: u32 },

    MpiRmaPutStart { window: DefId, rma_id: u32, remote: u32, bytes: u64 },
    MpiRmaPutEnd { rma_id: u32 },
    MpiRmaGetStart { window: DefId, rma_id: u32, remote: u32, bytes: u64 },
    MpiRmaGetEnd { rma_id: u32 },
    MpiRmaGats { window: DefId, group: DefId, sync: bool },
    MpiRmaCollectiveBegin,
    MpiRmaCollectiveEnd { window: DefId, comm: DefId, root: Option<u32> },
    MpiRmaLock { window: DefId, remote: u32, exclusive: bool },
    MpiRmaUnlock { window: DefId, remote: u32 },
}

impl EventRecord {
    pub fn event_type(&self) -> EventType {
        match self {
            EventRecord::Enter { .. } => EventType::Enter,
            EventRecord::EnterCs { .. } => EventType::EnterCs,
            EventRecord::EnterProgram { .. } => EventType::EnterProgram,
            EventRecord::Leave { .. } => EventType::Leave,
            EventRecord::LeaveProgram { .. } => EventType::LeaveProgram,
            EventRecord::MpiCollectiveBegin => EventType::MpiCollectiveBegin,
            EventRecord::MpiCollectiveEnd { .. } => EventType::MpiCollectiveEnd,
            EventRecord::MpiSend { .. } => EventType::MpiSend,
            EventRecord::MpiSendRequest { .. } => EventType::MpiSendRequest,
            EventRecord::MpiSendComplete { .. } => EventType::MpiSendComplete,
            EventRecord::MpiRecv { .. } => EventType::MpiRecv,
            EventRecord::MpiRecvRequest { .. } => EventType::MpiRecvRequest,
            EventRecord::MpiRecvComplete { .. } => EventType::MpiRecvComplete,
            EventRecord::MpiRequestTested { .. } => EventType::MpiRequestTested,
            EventRecord::MpiCancelled { .. } => EventType::MpiCancelled,
            EventRecord::ThreadAcquireLock { .. } => EventType::ThreadAcquireLock,
            EventRecord::ThreadReleaseLock { .. } => EventType::ThreadReleaseLock,
            EventRecord::ThreadTaskCreate { .. } => EventType::ThreadTaskCreate,
            EventRecord::ThreadTaskComplete { .. } => EventType::ThreadTaskComplete,
            EventRecord::ThreadTaskSwitch { .. } => EventType::ThreadTaskSwitch,
            EventRecord::ThreadBegin { .. } => EventType::ThreadBegin,
            EventRecord::ThreadEnd { .. } => EventType::ThreadEnd,
            EventRecord::ThreadCreate { .. } => EventType::ThreadCreate,
            EventRecord::ThreadWait { .. } => EventType::ThreadWait,
            EventRecord::ThreadFork { .. } => EventType::ThreadFork,
            EventRecord::ThreadJoin => EventType::ThreadJoin,
            EventRecord::ThreadTeamBegin { .. } => EventType::ThreadTeamBegin,
            EventRecord::ThreadTeamEnd { .. } => EventType::ThreadTeamEnd,
            EventRecord::RmaPutStart { .. } => EventType::RmaPutStart,
            EventRecord::RmaPutEnd { .. } => EventType::RmaPutEnd,
            EventRecord::RmaGetStart { .. } => EventType::RmaGetStart,
            EventRecord::RmaGetEnd { .. } => EventType::RmaGetEnd,
            EventRecord::MpiRmaPutStart { .. } => EventType::MpiRmaPutStart,
            EventRecord::MpiRmaPutEnd { .. } => EventType::MpiRmaPutEnd,
            EventRecord::MpiRmaGetStart { .. } => EventType::MpiRmaGetStart,
            EventRecord::MpiRmaGetEnd { .. } => EventType::MpiRmaGetEnd,
            EventRecord::MpiRmaGats { .. } => EventType::MpiRmaGats,
            EventRecord::MpiRmaCollectiveBegin => EventType::MpiRmaCollectiveBegin,
            EventRecord::MpiRmaCollectiveEnd { .. } => EventType::MpiRmaCollectiveEnd,
            EventRecord::MpiRmaLock { .. } => EventType::MpiRmaLock,
            EventRecord::MpiRmaUnlock { .. } => EventType::MpiRmaUnlock,
        }
    }

    /// The region definition referenced by enter/leave records.
    pub fn region(&self) -> Option<DefId> {
        match self {
            EventRecord::Enter { region }
            | EventRecord::EnterCs { region, .. }
            | EventRecord::EnterProgram { region }
            | EventRecord::Leave { region }
            | EventRecord::LeaveProgram { region } => Some(*region),
            _ => None,
        }
    }

    /// The communicator definition referenced by message passing records.
    pub fn comm(&self) -> Option<DefId> {
        match self {
            EventRecord::MpiCollectiveEnd { comm, .. }
            | EventRecord::MpiSend { comm, .. }
            | EventRecord::MpiSendRequest { comm, .. }
            | EventRecord::MpiRecv { comm, .. }
            | EventRecord::MpiRecvComplete { comm, .. }
            | EventRecord::MpiRmaCollectiveEnd { comm, .. } => Some(*comm),
            _ => None,
        }
    }

    /// The request id carried by nonblocking records.
    pub fn request(&self) -> Option<u64> {
        match self {
            EventRecord::MpiSendRequest { request, .. }
            | EventRecord::MpiSendComplete { request }
            | EventRecord::MpiRecvRequest { request }
            | EventRecord::MpiRecvComplete { request, .. }
            | EventRecord::MpiRequestTested { request }
            | EventRecord::MpiCancelled { request } => Some(*request),
            _ => None,
        }
    }
}

/// A single trace event: position in the local trace, time, owning location,
/// and the kind-specific record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub index: u64,
    pub timestamp: Timestamp,
    pub location: LocationId,
    pub record: EventRecord,
}

impl Event {
    pub fn new(index: u64, timestamp: Timestamp, location: LocationId, record: EventRecord) -> Event {
        Event {
            index,
            timestamp,
            location,
            record,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.record.event_type()
    }

    pub fn is_of_type(&self, event_type: EventType) -> bool {
        self.event_type() == event_type
    }
}
