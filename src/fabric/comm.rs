use super::{Envelope, Fabric, FabricComm, Tag};
use crate::env_var::FatalPolicy;
use crate::error::{Error, Result, TransportError};
use crate::warnings::DeadlockWatch;
use crate::config;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a communicator. Every rank must use the same id for the same
/// communicator, ids are chosen by the caller of [Communicator::dup] and
/// [Communicator::create_group].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommId(pub u32);

impl CommId {
    pub const WORLD: CommId = CommId(0);
}

impl std::fmt::Display for CommId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "comm#{}", self.0)
    }
}

struct CommInner {
    id: CommId,
    ranks: Vec<usize>, // world rank of each member, indexed by communicator rank
    my_rank: usize,
    fabric: Arc<Fabric>,
    policy: FatalPolicy,
    epoch: AtomicU64,
}

/// A group of ranks able to exchange messages, the rank-local handle of a
/// communicator. Cloning is cheap and clones refer to the same communicator.
///
/// Collective operations ([bcast][Communicator::bcast],
/// [barrier][Communicator::barrier]) must be entered by every member in the
/// same order.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<CommInner>,
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Communicator {{ id: {}, rank: {}, size: {} }}",
            self.inner.id,
            self.inner.my_rank,
            self.inner.ranks.len()
        )
    }
}

impl Communicator {
    /// The communicator spanning every rank of `fabric`.
    pub fn world(fabric: Arc<Fabric>, policy: FatalPolicy) -> Communicator {
        let my_rank = fabric.my_rank();
        let ranks = (0..fabric.num_ranks()).collect();
        Communicator {
            inner: Arc::new(CommInner {
                id: CommId::WORLD,
                ranks,
                my_rank,
                fabric,
                policy,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> CommId {
        self.inner.id
    }

    /// rank of the calling process within this communicator
    pub fn rank(&self) -> usize {
        self.inner.my_rank
    }

    pub fn size(&self) -> usize {
        self.inner.ranks.len()
    }

    /// translate a rank of this communicator into a world rank
    pub fn world_rank(&self, rank: usize) -> Result<usize> {
        self.inner
            .ranks
            .get(rank)
            .copied()
            .ok_or(Error::InvalidRank {
                rank,
                comm: self.inner.id,
            })
    }

    pub fn fatal_policy(&self) -> FatalPolicy {
        self.inner.policy
    }

    /// A communicator with the same members and a separate message space.
    pub fn dup(&self, id: CommId) -> Communicator {
        tracing::debug!(from = %self.inner.id, to = %id, "dup communicator");
        Communicator {
            inner: Arc::new(CommInner {
                id,
                ranks: self.inner.ranks.clone(),
                my_rank: self.inner.my_rank,
                fabric: self.inner.fabric.clone(),
                policy: self.inner.policy,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// A sub communicator made of `members` (ranks of `self`, in the order
    /// they will be ranked in the new communicator). Returns `None` on ranks
    /// that are not members.
    pub fn create_group(&self, id: CommId, members: &[usize]) -> Result<Option<Communicator>> {
        let ranks = members
            .iter()
            .map(|&rank| self.world_rank(rank))
            .collect::<Result<Vec<_>>>()?;
        let Some(my_rank) = members.iter().position(|&r| r == self.inner.my_rank) else {
            return Ok(None);
        };
        Ok(Some(Communicator {
            inner: Arc::new(CommInner {
                id,
                ranks,
                my_rank,
                fabric: self.inner.fabric.clone(),
                policy: self.inner.policy,
                epoch: AtomicU64::new(0),
            }),
        }))
    }

    /// Send `data` to `dest` under a user tag. Never blocks.
    pub fn send(&self, dest: usize, tag: u32, data: Vec<u8>) -> Result<()> {
        self.send_tagged(dest, Tag::User(tag), data)
    }

    /// Block until a message with `tag` arrives from `source` (any member if
    /// `None`). Returns the sender's rank and the payload.
    pub fn recv(&self, source: Option<usize>, tag: u32) -> Result<(usize, Vec<u8>)> {
        self.recv_tagged(source, Tag::User(tag))
    }

    /// Non-blocking variant of [recv][Communicator::recv].
    pub fn probe(&self, source: Option<usize>, tag: u32) -> Result<Option<(usize, Vec<u8>)>> {
        self.try_recv_tagged(source, Tag::User(tag))
    }

    /// Broadcast `data` from `root`. Non-root members pass anything (usually an
    /// empty vector) and get the root's data back.
    #[tracing::instrument(skip_all, fields(comm = %self.inner.id))]
    pub fn bcast(&self, root: usize, data: Vec<u8>) -> Result<Vec<u8>> {
        self.world_rank(root)?;
        let tag = Tag::Bcast {
            epoch: self.next_epoch(),
        };
        if self.rank() == root {
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.send_tagged(dest, tag, data.clone())?;
            }
            Ok(data)
        } else {
            let (_, data) = self.recv_tagged(Some(root), tag)?;
            Ok(data)
        }
    }

    /// Block until every member entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        self.barrier_with(|| {
            std::thread::yield_now();
            Ok(())
        })
    }

    /// Barrier that calls `idle` while it waits for peers, used by the active
    /// message runtime to keep executing inbound messages.
    #[tracing::instrument(skip_all, fields(comm = %self.inner.id))]
    pub fn barrier_with(&self, mut idle: impl FnMut() -> Result<()>) -> Result<()> {
        let mut op = BarrierOp::new(self);
        let mut watch = DeadlockWatch::new("barrier");
        while !op.progress(self)? {
            idle()?;
            watch.check();
        }
        Ok(())
    }

    pub(crate) fn post_am(&self, dest: usize, payload: Vec<u8>) -> Result<()> {
        self.send_tagged(dest, Tag::ActiveMessage, payload)
    }

    pub(crate) fn probe_am(&self) -> Result<Option<(usize, Vec<u8>)>> {
        self.try_recv_tagged(None, Tag::ActiveMessage)
    }

    fn next_epoch(&self) -> u64 {
        self.inner.epoch.fetch_add(1, Ordering::Relaxed)
    }

    // envelopes are matched on the communicator id, so the sender is always a member
    fn comm_rank_of(&self, world_rank: usize) -> usize {
        self.inner
            .ranks
            .iter()
            .position(|&r| r == world_rank)
            .unwrap_or(world_rank)
    }

    fn send_tagged(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let dst = self.world_rank(dest)?;
        let env = Envelope {
            comm: self.inner.id,
            src: self.inner.ranks[self.inner.my_rank],
            tag,
            payload,
        };
        tracing::trace!(comm = %self.inner.id, dest, ?tag, "send");
        let res = self.inner.fabric.send(dst, env);
        self.transport(res)
    }

    fn source_filter(&self, source: Option<usize>) -> Result<Option<usize>> {
        source.map(|s| self.world_rank(s)).transpose()
    }

    fn recv_tagged(&self, source: Option<usize>, tag: Tag) -> Result<(usize, Vec<u8>)> {
        let src = self.source_filter(source)?;
        let comm = self.inner.id;
        let res = self.inner.fabric.recv(&|env: &Envelope| env.matches(comm, src, tag));
        let env = self.transport(res)?;
        Ok((self.comm_rank_of(env.src), env.payload))
    }

    fn try_recv_tagged(&self, source: Option<usize>, tag: Tag) -> Result<Option<(usize, Vec<u8>)>> {
        let src = self.source_filter(source)?;
        let comm = self.inner.id;
        let res = self
            .inner
            .fabric
            .try_recv(&|env: &Envelope| env.matches(comm, src, tag));
        Ok(self
            .transport(res)?
            .map(|env| (self.comm_rank_of(env.src), env.payload)))
    }

    fn transport<T>(&self, res: std::result::Result<T, TransportError>) -> Result<T> {
        res.map_err(|err| match self.inner.policy {
            FatalPolicy::Abort => {
                tracing::error!(comm = %self.inner.id, rank = self.inner.my_rank, "fatal transport error: {err}");
                std::process::abort()
            }
            FatalPolicy::Propagate => Error::Transport(err),
        })
    }
}

/// Non-blocking n-way dissemination barrier.
///
/// In round `r` every rank signals the `factor - 1` ranks at distance
/// `j * factor^r` ahead of it and waits for the ranks at the same distances
/// behind it, until the distance covers the communicator.
struct BarrierOp {
    epoch: u64,
    factor: usize,
    round: u32,
    distance: usize,
    sent: bool,
    waiting: Vec<usize>,
}

impl BarrierOp {
    fn new(comm: &Communicator) -> BarrierOp {
        BarrierOp {
            epoch: comm.next_epoch(),
            factor: config().barrier_dissemination_factor.max(2),
            round: 0,
            distance: 1,
            sent: false,
            waiting: Vec::new(),
        }
    }

    fn progress(&mut self, comm: &Communicator) -> Result<bool> {
        let size = comm.size();
        let me = comm.rank();
        while self.distance < size {
            let tag = Tag::Barrier {
                epoch: self.epoch,
                round: self.round,
            };
            if !self.sent {
                self.waiting.clear();
                for j in 1..self.factor {
                    let offset = j * self.distance;
                    if offset >= size {
                        break;
                    }
                    comm.send_tagged((me + offset) % size, tag, Vec::new())?;
                    self.waiting.push((me + size - offset) % size);
                }
                self.sent = true;
            }
            let mut still_waiting = Vec::with_capacity(self.waiting.len());
            for &src in &self.waiting {
                if comm.try_recv_tagged(Some(src), tag)?.is_none() {
                    still_waiting.push(src);
                }
            }
            self.waiting = still_waiting;
            if !self.waiting.is_empty() {
                return Ok(false);
            }
            self.round += 1;
            self.distance *= self.factor;
            self.sent = false;
        }
        Ok(true)
    }
}
