use crate::active_messaging::HandlerId;
use crate::fabric::CommId;
use crate::replay::TaskId;

/// Whether an error leaves the distributed run in a usable state.
///
/// `Fatal` errors come from the transport layer: once a send, receive or
/// broadcast failed, ranks may disagree about what has been delivered, so the
/// whole run is expected to terminate (see [FatalPolicy][crate::FatalPolicy]).
/// `Logical` errors are ordinary programming or data errors the caller may
/// catch, log, and use to abort the current analysis step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    Logical,
}

/// Failures of the underlying point-to-point and collective transport.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint of the given world rank is gone.
    #[error("rank {0} is unreachable")]
    Disconnected(usize),

    /// The local receive endpoint was closed while waiting for data.
    #[error("receive endpoint of rank {0} closed")]
    Closed(usize),
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Lookup of an event key that was never added to a remote event set.
    #[error("RemoteEventSet::get_event -- unknown key: {0}")]
    UnknownEventKey(u32),

    /// Lookup of a buffer key that was never added to a remote event set.
    #[error("RemoteEventSet::get_buffer -- unknown key: {0}")]
    UnknownBufferKey(u32),

    /// fence/wait on a communicator nobody listens on.
    #[error("no active listener on communicator {0}")]
    NoListener(CommId),

    /// An inbound record named a handler id that was never attached.
    #[error("inbound active message for unknown handler {0}")]
    UnknownHandler(HandlerId),

    /// A decoded event references a definition the context does not know.
    #[error("unknown {kind} definition {id}")]
    UnknownDefinition { kind: &'static str, id: u64 },

    /// A rank outside `[0, size)` of the communicator.
    #[error("rank {rank} is not a member of communicator {comm}")]
    InvalidRank { rank: usize, comm: CommId },

    /// A task already owned by a different compound task.
    #[error("task {task} already belongs to compound task {parent}, cannot add it to {target}")]
    ForeignParent {
        task: TaskId,
        parent: TaskId,
        target: TaskId,
    },

    /// Malformed wire data.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// The body of an active message handler failed.
    #[error("active message handler {name} failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Transport(_) => ErrorClass::Fatal,
            _ => ErrorClass::Logical,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_fatal() {
        let err: Error = TransportError::Disconnected(3).into();
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "rank 3 is unreachable");
    }

    #[test]
    fn lookup_errors_are_logical_and_name_the_key() {
        let err = Error::UnknownEventKey(42);
        assert_eq!(err.class(), ErrorClass::Logical);
        assert!(err.to_string().contains("42"));
    }
}
