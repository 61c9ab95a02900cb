use super::{Backend, Envelope, FabricComm};
use crate::error::TransportError;

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Single rank loopback fabric, messages sent to rank 0 are queued locally.
pub struct LocalFabric {
    queue: Mutex<VecDeque<Envelope>>,
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalFabric {{ queued: {} }}", self.queue.lock().len())
    }
}

impl LocalFabric {
    pub fn new() -> LocalFabric {
        LocalFabric {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for LocalFabric {
    fn default() -> Self {
        LocalFabric::new()
    }
}

impl FabricComm for LocalFabric {
    fn my_rank(&self) -> usize {
        0
    }
    fn num_ranks(&self) -> usize {
        1
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn send(&self, dst: usize, env: Envelope) -> Result<(), TransportError> {
        if dst != 0 {
            return Err(TransportError::Disconnected(dst));
        }
        self.queue.lock().push_back(env);
        Ok(())
    }
    fn try_recv(
        &self,
        filter: &dyn Fn(&Envelope) -> bool,
    ) -> Result<Option<Envelope>, TransportError> {
        let mut queue = self.queue.lock();
        let pos = queue.iter().position(|env| filter(env));
        Ok(pos.and_then(|i| queue.remove(i)))
    }
    fn recv(&self, filter: &dyn Fn(&Envelope) -> bool) -> Result<Envelope, TransportError> {
        // nobody else can ever send to a local fabric, an unmatched receive would hang forever
        self.try_recv(filter)?.ok_or(TransportError::Closed(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{CommId, Tag};

    fn env(tag: u32) -> Envelope {
        Envelope {
            comm: CommId(0),
            src: 0,
            tag: Tag::User(tag),
            payload: vec![tag as u8],
        }
    }

    #[test]
    fn loopback_preserves_order_per_match() {
        let fabric = LocalFabric::new();
        fabric.send(0, env(1)).unwrap();
        fabric.send(0, env(2)).unwrap();
        fabric.send(0, env(1)).unwrap();
        let two = fabric
            .recv(&|e: &Envelope| e.tag == Tag::User(2))
            .unwrap();
        assert_eq!(two.payload, vec![2]);
        assert_eq!(fabric.try_recv(&|_: &Envelope| true).unwrap().unwrap().tag, Tag::User(1));
        assert_eq!(fabric.try_recv(&|_: &Envelope| true).unwrap().unwrap().tag, Tag::User(1));
        assert!(fabric.try_recv(&|_: &Envelope| true).unwrap().is_none());
    }

    #[test]
    fn remote_ranks_are_unreachable() {
        let fabric = LocalFabric::new();
        assert_eq!(fabric.send(1, env(0)), Err(TransportError::Disconnected(1)));
        assert_eq!(
            fabric.recv(&|_: &Envelope| true).unwrap_err(),
            TransportError::Closed(0)
        );
    }
}
