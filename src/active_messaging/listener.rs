use super::Buffer;
use crate::error::Result;
use crate::fabric::Communicator;

/// Receive endpoint for active messages on one communicator, shared by every
/// component that called `start_listen` for it.
#[derive(Debug)]
pub struct AmListener {
    comm: Communicator,
    references: usize,
}

impl AmListener {
    pub(crate) fn new(comm: Communicator) -> AmListener {
        AmListener {
            comm,
            references: 1,
        }
    }

    pub fn comm(&self) -> &Communicator {
        &self.comm
    }

    pub fn num_references(&self) -> usize {
        self.references
    }

    pub(crate) fn add_reference(&mut self) {
        self.references += 1;
    }

    /// returns the remaining number of references
    pub(crate) fn remove_reference(&mut self) -> usize {
        self.references = self.references.saturating_sub(1);
        self.references
    }

    /// The oldest arrived message, with the rank that sent it.
    pub(crate) fn probe(&self) -> Result<Option<(usize, Buffer)>> {
        Ok(self
            .comm
            .probe_am()?
            .map(|(source, bytes)| (source, Buffer::from_bytes(bytes))))
    }
}
