use super::{Backend, Envelope, FabricComm};
use crate::error::TransportError;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One rank's endpoint of an in-process fabric where every rank is a thread.
///
/// Each rank owns the receiving side of an unbounded channel; every endpoint
/// holds a sender to every rank. Messages that arrive but do not match the
/// current receive are parked in an unexpected queue and searched first on the
/// next receive, so per-pair ordering is preserved.
pub struct ThreadFabric {
    my_rank: usize,
    senders: Vec<Sender<Envelope>>,
    receiver: Receiver<Envelope>,
    unexpected: Mutex<VecDeque<Envelope>>,
}

impl std::fmt::Debug for ThreadFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ThreadFabric {{ my_rank: {}, num_ranks: {}, unexpected: {} }}",
            self.my_rank,
            self.senders.len(),
            self.unexpected.lock().len()
        )
    }
}

impl ThreadFabric {
    /// Build the endpoints of a `num_ranks` fabric, index `i` belongs to rank `i`.
    /// Move each endpoint into the thread that plays that rank.
    pub fn build(num_ranks: usize) -> Vec<ThreadFabric> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..num_ranks).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(my_rank, receiver)| ThreadFabric {
                my_rank,
                senders: senders.clone(),
                receiver,
                unexpected: Mutex::new(VecDeque::new()),
            })
            .collect()
    }

    fn take_unexpected(&self, filter: &dyn Fn(&Envelope) -> bool) -> Option<Envelope> {
        let mut unexpected = self.unexpected.lock();
        let pos = unexpected.iter().position(|env| filter(env));
        pos.and_then(|i| unexpected.remove(i))
    }
}

impl FabricComm for ThreadFabric {
    fn my_rank(&self) -> usize {
        self.my_rank
    }
    fn num_ranks(&self) -> usize {
        self.senders.len()
    }
    fn backend(&self) -> Backend {
        Backend::Threads
    }
    fn send(&self, dst: usize, env: Envelope) -> Result<(), TransportError> {
        self.senders
            .get(dst)
            .ok_or(TransportError::Disconnected(dst))?
            .send(env)
            .map_err(|_| TransportError::Disconnected(dst))
    }
    fn try_recv(
        &self,
        filter: &dyn Fn(&Envelope) -> bool,
    ) -> Result<Option<Envelope>, TransportError> {
        if let Some(env) = self.take_unexpected(filter) {
            return Ok(Some(env));
        }
        loop {
            match self.receiver.try_recv() {
                Ok(env) => {
                    if filter(&env) {
                        return Ok(Some(env));
                    }
                    self.unexpected.lock().push_back(env);
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(TransportError::Closed(self.my_rank))
                }
            }
        }
    }
    fn recv(&self, filter: &dyn Fn(&Envelope) -> bool) -> Result<Envelope, TransportError> {
        if let Some(env) = self.take_unexpected(filter) {
            return Ok(env);
        }
        loop {
            let env = self
                .receiver
                .recv()
                .map_err(|_| TransportError::Closed(self.my_rank))?;
            if filter(&env) {
                return Ok(env);
            }
            self.unexpected.lock().push_back(env);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::{CommId, Tag};

    fn env(src: usize, tag: u32) -> Envelope {
        Envelope {
            comm: CommId(0),
            src,
            tag: Tag::User(tag),
            payload: vec![],
        }
    }

    #[test]
    fn unmatched_messages_are_kept_in_order() {
        let mut eps = ThreadFabric::build(2);
        let one = eps.pop().unwrap();
        let zero = eps.pop().unwrap();
        zero.send(1, env(0, 5)).unwrap();
        zero.send(1, env(0, 6)).unwrap();
        zero.send(1, env(0, 5)).unwrap();

        let six = one.recv(&|e: &Envelope| e.tag == Tag::User(6)).unwrap();
        assert_eq!(six.tag, Tag::User(6));
        let first = one.try_recv(&|_: &Envelope| true).unwrap().unwrap();
        let second = one.try_recv(&|_: &Envelope| true).unwrap().unwrap();
        assert_eq!(first.tag, Tag::User(5));
        assert_eq!(second.tag, Tag::User(5));
        assert!(one.try_recv(&|_: &Envelope| true).unwrap().is_none());
    }

    #[test]
    fn dropped_peer_is_a_transport_error() {
        let mut eps = ThreadFabric::build(2);
        let one = eps.pop().unwrap();
        let zero = eps.pop().unwrap();
        drop(one);
        assert_eq!(zero.send(1, env(0, 0)), Err(TransportError::Disconnected(1)));
        assert_eq!(zero.send(7, env(0, 0)), Err(TransportError::Disconnected(7)));
    }
}
