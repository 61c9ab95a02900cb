use super::{Buffer, HandlerId};
use crate::error::Result;
use crate::fabric::Communicator;

use serde::Serialize;
use serde_bytes::{ByteBuf, Bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// enqueued, not yet handed to the transport
    Pending,
    /// posted to the transport
    Started,
    Completed,
    Cancelled,
}

/// One in-flight active message from this rank to `remote` on `comm`.
#[derive(Debug)]
pub struct AmRequest {
    remote: usize,
    comm: Communicator,
    buffer: Buffer,
    handlers: Vec<HandlerId>,
    state: RequestState,
    pub(crate) internal: bool,
}

impl AmRequest {
    pub fn new(remote: usize, comm: Communicator) -> AmRequest {
        AmRequest {
            remote,
            comm,
            buffer: Buffer::new(),
            handlers: Vec::new(),
            state: RequestState::Pending,
            internal: false,
        }
    }

    /// Append a record for `handler` carrying `payload`.
    pub fn pack<T: Serialize + ?Sized>(&mut self, handler: HandlerId, payload: &T) -> Result<()> {
        self.pack_with(handler, |buf| buf.put(payload))
    }

    /// Append a record for `handler` whose payload is written by `f`, for
    /// handlers that read several values.
    pub fn pack_with<F>(&mut self, handler: HandlerId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Buffer) -> Result<()>,
    {
        let mut payload = Buffer::new();
        f(&mut payload)?;
        self.buffer.put(&handler.0)?;
        self.buffer.put(Bytes::new(payload.as_bytes()))?;
        self.handlers.push(handler);
        Ok(())
    }

    pub fn remote(&self) -> usize {
        self.remote
    }

    pub fn comm(&self) -> &Communicator {
        &self.comm
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// handler ids of the packed records, in packing order
    pub fn handlers(&self) -> &[HandlerId] {
        &self.handlers
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RequestState::Completed | RequestState::Cancelled)
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.state == RequestState::Pending {
            self.comm
                .post_am(self.remote, self.buffer.as_bytes().to_vec())?;
            self.state = RequestState::Started;
        }
        Ok(())
    }

    /// Progress the request, returns true when it completed during this call.
    /// Sends are buffered by the fabric, so a posted request is complete.
    pub(crate) fn test(&mut self) -> Result<bool> {
        match self.state {
            RequestState::Pending => {
                self.start()?;
                self.test()
            }
            RequestState::Started => {
                self.state = RequestState::Completed;
                Ok(true)
            }
            RequestState::Completed | RequestState::Cancelled => Ok(false),
        }
    }

    pub(crate) fn cancel(&mut self) {
        if !self.is_finished() {
            tracing::debug!(remote = self.remote, comm = %self.comm.id(), "cancel active message request");
            self.state = RequestState::Cancelled;
        }
    }
}

/// Read the next record of an inbound message: the handler id and a buffer
/// over its payload.
pub(crate) fn unpack_record(buffer: &mut Buffer) -> Result<(HandlerId, Buffer)> {
    let id = HandlerId(buffer.get::<u32>()?);
    let payload: ByteBuf = buffer.get()?;
    Ok((id, Buffer::from_bytes(payload.into_vec())))
}
