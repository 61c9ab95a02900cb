//! Keyed cache of events (and opaque buffers) transferred from other ranks.
//!
//! An analysis that has to correlate, say, a receive observed locally with the
//! matching send recorded on the peer ships the peer's event over under an
//! application chosen key and looks it up here.

use crate::active_messaging::Buffer;
use crate::defs::Definitions;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::fabric::Communicator;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use std::collections::HashMap;

/// Encoded form of a set. Indices in the key tables refer to positions in the
/// event (buffer) list of the same message.
#[derive(Serialize, Deserialize)]
struct WireSet {
    event_keys: Vec<(u32, u32)>,
    events: Vec<Event>,
    buffer_keys: Vec<(u32, u32)>,
    buffers: Vec<ByteBuf>,
}

#[derive(Debug, Default, Clone)]
pub struct RemoteEventSet {
    event_keys: HashMap<u32, usize>,
    events: Vec<Event>,
    buffer_keys: HashMap<u32, usize>,
    buffers: Vec<Buffer>,
}

impl RemoteEventSet {
    pub fn new() -> RemoteEventSet {
        Default::default()
    }

    /// Store `event` under `key`. Adding to a key that is already present
    /// makes the key refer to the new event.
    pub fn add_event(&mut self, event: Event, key: u32) {
        self.event_keys.insert(key, self.events.len());
        self.events.push(event);
    }

    pub fn get_event(&self, key: u32) -> Result<&Event> {
        self.event_keys
            .get(&key)
            .map(|&index| &self.events[index])
            .ok_or(Error::UnknownEventKey(key))
    }

    /// Store an opaque buffer under `key`, last writer wins as for events.
    pub fn add_buffer(&mut self, buffer: Buffer, key: u32) {
        self.buffer_keys.insert(key, self.buffers.len());
        self.buffers.push(buffer);
    }

    pub fn get_buffer(&self, key: u32) -> Result<&Buffer> {
        self.buffer_keys
            .get(&key)
            .map(|&index| &self.buffers[index])
            .ok_or(Error::UnknownBufferKey(key))
    }

    pub fn clear(&mut self) {
        self.event_keys.clear();
        self.events.clear();
        self.buffer_keys.clear();
        self.buffers.clear();
    }

    /// number of distinct event keys
    pub fn len(&self) -> usize {
        self.event_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_keys.is_empty() && self.buffer_keys.is_empty()
    }

    /// event keys in ascending order
    pub fn keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.event_keys.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Send the set to `dest` of `comm`, to be picked up with [recv][RemoteEventSet::recv].
    pub fn send(&self, comm: &Communicator, dest: usize, tag: u32) -> Result<()> {
        comm.send(dest, tag, self.encode()?)
    }

    /// Receive a set sent from `source` with `tag` and merge it into this one.
    /// Every event is checked against `defs` before anything is merged.
    #[tracing::instrument(skip_all, fields(comm = %comm.id(), source = source, tag = tag))]
    pub fn recv(
        &mut self,
        defs: &dyn Definitions,
        comm: &Communicator,
        source: usize,
        tag: u32,
    ) -> Result<()> {
        let (_, data) = comm.recv(Some(source), tag)?;
        self.merge(defs, &data)
    }

    /// Broadcast the set of `root` to every member of `comm`; the other
    /// members merge it into their own set.
    #[tracing::instrument(skip_all, fields(comm = %comm.id(), root = root))]
    pub fn bcast(&mut self, defs: &dyn Definitions, comm: &Communicator, root: usize) -> Result<()> {
        if comm.rank() == root {
            comm.bcast(root, self.encode()?)?;
            Ok(())
        } else {
            let data = comm.bcast(root, Vec::new())?;
            self.merge(defs, &data)
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut event_keys: Vec<(u32, u32)> = self
            .event_keys
            .iter()
            .map(|(&key, &index)| (key, index as u32))
            .collect();
        event_keys.sort_unstable();
        let mut buffer_keys: Vec<(u32, u32)> = self
            .buffer_keys
            .iter()
            .map(|(&key, &index)| (key, index as u32))
            .collect();
        buffer_keys.sort_unstable();
        let wire = WireSet {
            event_keys,
            events: self.events.clone(),
            buffer_keys,
            buffers: self
                .buffers
                .iter()
                .map(|b| ByteBuf::from(b.as_bytes().to_vec()))
                .collect(),
        };
        crate::serialize(&wire)
    }

    fn merge(&mut self, defs: &dyn Definitions, data: &[u8]) -> Result<()> {
        let wire: WireSet = crate::deserialize(data)?;
        for event in &wire.events {
            defs.check_event(event)?;
        }
        check_key_table(&wire.event_keys, wire.events.len())?;
        check_key_table(&wire.buffer_keys, wire.buffers.len())?;
        tracing::debug!(
            events = wire.events.len(),
            buffers = wire.buffers.len(),
            "merge remote event set"
        );

        let event_offset = self.events.len();
        for (key, index) in wire.event_keys {
            self.event_keys.insert(key, event_offset + index as usize);
        }
        self.events.extend(wire.events);

        let buffer_offset = self.buffers.len();
        for (key, index) in wire.buffer_keys {
            self.buffer_keys.insert(key, buffer_offset + index as usize);
        }
        self.buffers.extend(
            wire.buffers
                .into_iter()
                .map(|bytes| Buffer::from_bytes(bytes.into_vec())),
        );
        Ok(())
    }
}

fn check_key_table(keys: &[(u32, u32)], len: usize) -> Result<()> {
    match keys.iter().find(|(_, index)| *index as usize >= len) {
        Some((key, index)) => Err(Error::Codec(Box::new(bincode::ErrorKind::Custom(format!(
            "key {key} refers to entry {index} of {len}"
        ))))),
        None => Ok(()),
    }
}
