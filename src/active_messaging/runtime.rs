use super::fence::{FenceAck, FenceMarker, PendingAcks, FENCE_ACK, FENCE_MARKER};
use super::request::unpack_record;
use super::{AmContext, AmHandler, AmListener, AmRequest, CallbackData, HandlerId};
use crate::config;
use crate::env_var::FatalPolicy;
use crate::error::{Error, Result};
use crate::fabric::{create_fabric, Backend, CommId, Communicator, Fabric};
use crate::replay::CallbackManager;
use crate::warnings::{DeadlockWatch, RuntimeWarning};

use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Number of active message records sent and executed for one handler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandlerStats {
    pub sent: u64,
    pub executed: u64,
    /// records whose handler returned an error
    pub failed: u64,
}

/// Per handler statistics of one rank, in attach order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmSummary {
    pub rank: usize,
    pub handlers: Vec<(String, HandlerStats)>,
}

impl AmSummary {
    pub fn get(&self, name: &str) -> Option<HandlerStats> {
        self.handlers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, stats)| *stats)
    }

    pub fn total_sent(&self) -> u64 {
        self.handlers.iter().map(|(_, s)| s.sent).sum()
    }

    pub fn total_executed(&self) -> u64 {
        self.handlers.iter().map(|(_, s)| s.executed).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.handlers.iter().map(|(_, s)| s.failed).sum()
    }
}

#[derive(Debug)]
struct TargetSet {
    comm: Communicator,
    ranks: BTreeSet<usize>,
}

/// The active message runtime of one rank.
///
/// All progress is made by the calling thread inside [advance][AmRuntime::advance],
/// [wait][AmRuntime::wait], [fence][AmRuntime::fence],
/// [allfence][AmRuntime::allfence] and [barrier][AmRuntime::barrier]. Every rank
/// must attach the same handlers in the same order, since handler ids are
/// assigned in attach order.
pub struct AmRuntime {
    world: Communicator,
    handlers: Vec<Arc<dyn AmHandler>>,
    handler_ids: HashMap<String, HandlerId>,
    requests: Vec<AmRequest>,
    listeners: IndexMap<CommId, AmListener>,
    target_sets: IndexMap<CommId, TargetSet>,
    statistics: IndexMap<HandlerId, HandlerStats>,
    pending_acks: PendingAcks,
    cbdata: Option<CallbackData>,
    cbmanager: Option<Arc<CallbackManager>>,
    dropped: u64,
    shut_down: bool,
}

impl std::fmt::Debug for AmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmRuntime")
            .field("world", &self.world)
            .field("handlers", &self.handlers.len())
            .field("requests", &self.requests.len())
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AmRuntime {
    fn new(world: Communicator) -> AmRuntime {
        let pending_acks = PendingAcks::default();
        let mut rt = AmRuntime {
            world,
            handlers: Vec::new(),
            handler_ids: HashMap::new(),
            requests: Vec::new(),
            listeners: IndexMap::new(),
            target_sets: IndexMap::new(),
            statistics: IndexMap::new(),
            pending_acks: pending_acks.clone(),
            cbdata: None,
            cbmanager: None,
            dropped: 0,
            shut_down: false,
        };
        let marker = rt.attach(Arc::new(FenceMarker));
        let ack = rt.attach(Arc::new(FenceAck::new(pending_acks)));
        debug_assert_eq!((marker, ack), (FENCE_MARKER, FENCE_ACK));
        rt
    }

    pub fn my_rank(&self) -> usize {
        self.world.rank()
    }

    pub fn num_ranks(&self) -> usize {
        self.world.size()
    }

    /// the communicator spanning every rank of the fabric
    pub fn world(&self) -> Communicator {
        self.world.clone()
    }

    /// Register `handler` and return its id. A handler whose name is already
    /// attached is not registered again, the existing id is returned.
    #[tracing::instrument(skip_all)]
    pub fn attach(&mut self, handler: Arc<dyn AmHandler>) -> HandlerId {
        if let Some(id) = self.handler_ids.get(handler.name()) {
            return *id;
        }
        let id = HandlerId(self.handlers.len() as u32);
        tracing::debug!(name = handler.name(), %id, "attach active message handler");
        self.handler_ids.insert(handler.name().to_owned(), id);
        self.statistics.insert(id, HandlerStats::default());
        self.handlers.push(handler);
        id
    }

    pub fn handler_id(&self, name: &str) -> Option<HandlerId> {
        self.handler_ids.get(name).copied()
    }

    /// Take ownership of `request`. The request is transferred by a later
    /// progress call, its target joins the target set of its communicator.
    pub fn enqueue(&mut self, request: AmRequest) {
        for id in request.handlers() {
            if let Some(stats) = self.statistics.get_mut(id) {
                stats.sent += 1;
            }
        }
        if !request.internal {
            self.target_sets
                .entry(request.comm().id())
                .or_insert_with(|| TargetSet {
                    comm: request.comm().clone(),
                    ranks: BTreeSet::new(),
                })
                .ranks
                .insert(request.remote());
        }
        tracing::trace!(remote = request.remote(), comm = %request.comm().id(), "enqueue");
        self.requests.push(request);
    }

    /// One non-blocking progress step: execute every arrived message, then
    /// post and test the queued requests. Returns the number of executed
    /// records plus completed requests.
    ///
    /// A failing record is skipped and the step carries on with the rest, so
    /// an error never leaves arrived records or handler replies behind. The
    /// first error of the step is returned once the step is complete.
    pub fn advance(&mut self) -> Result<usize> {
        let mut progressed = 0;
        let mut replies = Vec::new();
        let mut first_error = None;
        for listener in self.listeners.values() {
            loop {
                let (source, mut buffer) = match listener.probe() {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(err) => {
                        first_error.get_or_insert(err);
                        break;
                    }
                };
                while !buffer.is_exhausted() {
                    let (id, mut record) = match unpack_record(&mut buffer) {
                        Ok(record) => record,
                        Err(err) => {
                            // no framing left to resync on
                            tracing::warn!(
                                source,
                                comm = %listener.comm().id(),
                                bytes = buffer.remaining(),
                                "dropping undecodable active message tail: {err}"
                            );
                            self.dropped += 1;
                            first_error.get_or_insert(err);
                            break;
                        }
                    };
                    progressed += 1;
                    let result = match self.handlers.get(id.index()) {
                        Some(handler) => {
                            let mut ctx = AmContext::new(
                                source,
                                listener.comm(),
                                self.cbdata.as_ref(),
                                self.cbmanager.as_ref(),
                            );
                            let result = handler.execute(&mut ctx, &mut record).map_err(|err| {
                                Error::Handler {
                                    name: handler.name().to_owned(),
                                    source: err,
                                }
                            });
                            replies.append(&mut ctx.replies);
                            result
                        }
                        None => Err(Error::UnknownHandler(id)),
                    };
                    match result {
                        Ok(()) => {
                            if let Some(stats) = self.statistics.get_mut(&id) {
                                stats.executed += 1;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(source, comm = %listener.comm().id(), %id, "dropping active message record: {err}");
                            self.dropped += 1;
                            if let Some(stats) = self.statistics.get_mut(&id) {
                                stats.failed += 1;
                            }
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
        }

        for request in self.requests.iter_mut() {
            match request.test() {
                Ok(true) => progressed += 1,
                Ok(false) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        self.requests.retain(|request| !request.is_finished());

        for reply in replies {
            self.enqueue(reply);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(progressed),
        }
    }

    /// number of inbound records that could not be executed, because their
    /// handler failed or was unknown or the message was malformed
    pub fn dropped_records(&self) -> u64 {
        self.dropped
    }

    /// Progress until no request is pending.
    #[tracing::instrument(skip_all)]
    pub fn wait(&mut self) -> Result<()> {
        let mut watch = DeadlockWatch::new("wait");
        while !self.requests.is_empty() {
            self.idle_advance()?;
            watch.check();
        }
        Ok(())
    }

    /// Progress until no request on `comm` is pending.
    #[tracing::instrument(skip_all)]
    pub fn wait_comm(&mut self, comm: &Communicator) -> Result<()> {
        self.check_listener(comm)?;
        let id = comm.id();
        let mut watch = DeadlockWatch::new("wait_comm");
        while self.requests.iter().any(|r| r.comm().id() == id) {
            self.idle_advance()?;
            watch.check();
        }
        Ok(())
    }

    /// Return once every message sent on `comm` since the last fence has been
    /// executed by its target, then clear the target set of `comm`.
    ///
    /// Only the targets have to keep progressing their runtime, fence is not a
    /// collective. An error raised while progressing interrupts the fence and
    /// leaves the target set in place, calling `fence` again resumes it.
    #[tracing::instrument(skip_all, fields(comm = %comm.id()))]
    pub fn fence(&mut self, comm: &Communicator) -> Result<()> {
        self.check_listener(comm)?;
        self.post_markers(comm)?;
        self.await_acks(&[comm.id()], "fence")
    }

    /// [fence][AmRuntime::fence] every communicator with a non-empty target set.
    #[tracing::instrument(skip_all)]
    pub fn allfence(&mut self) -> Result<()> {
        let comms: Vec<Communicator> = self
            .target_sets
            .values()
            .filter(|t| !t.ranks.is_empty())
            .map(|t| t.comm.clone())
            .collect();
        for comm in &comms {
            self.check_listener(comm)?;
        }
        for comm in &comms {
            self.post_markers(comm)?;
        }
        let ids: Vec<CommId> = comms.iter().map(|c| c.id()).collect();
        self.await_acks(&ids, "allfence")
    }

    /// Collective barrier on `comm` that keeps executing inbound messages while
    /// waiting for the other members.
    #[tracing::instrument(skip_all, fields(comm = %comm.id()))]
    pub fn barrier(&mut self, comm: &Communicator) -> Result<()> {
        comm.barrier_with(|| self.idle_advance().map(|_| ()))
    }

    /// Start receiving active messages on `comm`, or add a reference to the
    /// existing listener.
    pub fn start_listen(&mut self, comm: &Communicator) {
        match self.listeners.get_mut(&comm.id()) {
            Some(listener) => listener.add_reference(),
            None => {
                tracing::debug!(comm = %comm.id(), "start listening");
                self.listeners
                    .insert(comm.id(), AmListener::new(comm.clone()));
            }
        }
    }

    /// Drop one reference to the listener of `comm`, the listener is removed
    /// with its last reference.
    pub fn stop_listen(&mut self, comm: &Communicator) {
        if let Some(listener) = self.listeners.get_mut(&comm.id()) {
            if listener.remove_reference() == 0 {
                tracing::debug!(comm = %comm.id(), "stop listening");
                self.listeners.shift_remove(&comm.id());
            }
        }
    }

    pub fn listener(&self, comm: &Communicator) -> Option<&AmListener> {
        self.listeners.get(&comm.id())
    }

    pub fn set_cbdata(&mut self, data: CallbackData) {
        self.cbdata = Some(data);
    }

    pub fn cbdata(&self) -> Option<CallbackData> {
        self.cbdata.clone()
    }

    pub fn set_cbmanager(&mut self, cbmanager: Arc<CallbackManager>) {
        self.cbmanager = Some(cbmanager);
    }

    pub fn cbmanager(&self) -> Option<Arc<CallbackManager>> {
        self.cbmanager.clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// ranks messaged on `comm` since its last fence, ascending
    pub fn target_set(&self, comm: &Communicator) -> Vec<usize> {
        self.target_sets
            .get(&comm.id())
            .map(|t| t.ranks.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn statistics(&self, id: HandlerId) -> Option<HandlerStats> {
        self.statistics.get(&id).copied()
    }

    /// Log the per handler statistics and return them.
    pub fn print_summary(&self) -> AmSummary {
        let rank = self.my_rank();
        let handlers: Vec<(String, HandlerStats)> = self
            .statistics
            .iter()
            .filter_map(|(id, stats)| {
                self.handlers
                    .get(id.index())
                    .map(|h| (h.name().to_owned(), *stats))
            })
            .collect();
        for (name, stats) in &handlers {
            tracing::info!(
                rank,
                handler = name.as_str(),
                sent = stats.sent,
                executed = stats.executed,
                failed = stats.failed,
                "active message summary"
            );
        }
        AmSummary { rank, handlers }
    }

    /// Cancel every pending request and drop all listeners and target sets.
    /// Returns the number of cancelled requests.
    #[tracing::instrument(skip_all)]
    pub fn shutdown(&mut self) -> usize {
        let pending = self.requests.len();
        RuntimeWarning::PrematureShutdown(pending).print();
        for request in self.requests.iter_mut() {
            request.cancel();
        }
        self.requests.clear();
        self.listeners.clear();
        self.target_sets.clear();
        self.pending_acks.lock().clear();
        self.print_summary();
        self.shut_down = true;
        pending
    }

    fn check_listener(&self, comm: &Communicator) -> Result<()> {
        if self.listeners.contains_key(&comm.id()) {
            Ok(())
        } else {
            Err(Error::NoListener(comm.id()))
        }
    }

    fn idle_advance(&mut self) -> Result<usize> {
        let progressed = self.advance()?;
        if progressed == 0 {
            std::thread::yield_now();
        }
        Ok(progressed)
    }

    fn post_markers(&mut self, comm: &Communicator) -> Result<()> {
        let targets = self.target_set(comm);
        if targets.is_empty() {
            return Ok(());
        }
        // a rank still awaited by an interrupted fence already has its marker
        let fresh: Vec<usize> = {
            let mut pending = self.pending_acks.lock();
            let awaited = pending.entry(comm.id()).or_default();
            targets
                .into_iter()
                .filter(|target| awaited.insert(*target))
                .collect()
        };
        for target in fresh {
            let mut marker = AmRequest::new(target, comm.clone());
            marker.pack(FENCE_MARKER, &())?;
            marker.internal = true;
            self.enqueue(marker);
        }
        Ok(())
    }

    fn awaiting_acks(&self, ids: &[CommId]) -> bool {
        let pending = self.pending_acks.lock();
        ids.iter()
            .any(|id| pending.get(id).map_or(false, |ranks| !ranks.is_empty()))
    }

    fn await_acks(&mut self, ids: &[CommId], op: &'static str) -> Result<()> {
        let mut watch = DeadlockWatch::new(op);
        while self.awaiting_acks(ids) {
            self.idle_advance()?;
            watch.check();
        }
        for id in ids {
            if let Some(targets) = self.target_sets.get_mut(id) {
                targets.ranks.clear();
            }
        }
        Ok(())
    }
}

impl Drop for AmRuntime {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}

/// An implementation of the Builder design pattern, used to construct an
/// instance of an [AmRuntime].
///
/// Allows for customizing the way the runtime is built: the fabric backend (or
/// an already built fabric endpoint) and the policy applied to transport errors.
///
/// # Examples
///
///```ignore
/// use amreplay::{AmRuntimeBuilder, Backend, FatalPolicy};
///
/// let rt = AmRuntimeBuilder::new()
///     .with_backend(Backend::Local)
///     .with_fatal_policy(FatalPolicy::Propagate)
///     .build();
///```
#[derive(Debug)]
pub struct AmRuntimeBuilder {
    backend: Backend,
    fabric: Option<Fabric>,
    fatal_policy: FatalPolicy,
}

impl AmRuntimeBuilder {
    /// Construct a new builder, defaults come from the `AMREPLAY_*` environment.
    #[tracing::instrument(skip_all)]
    pub fn new() -> AmRuntimeBuilder {
        AmRuntimeBuilder {
            backend: Default::default(),
            fabric: None,
            fatal_policy: config().fatal_policy,
        }
    }

    /// Create a fabric of kind `backend` at build time. The threads backend
    /// built this way has a single rank, use [with_fabric][AmRuntimeBuilder::with_fabric]
    /// with an endpoint of [ThreadFabric::build][crate::fabric::ThreadFabric::build] for more.
    #[tracing::instrument(skip_all)]
    pub fn with_backend(mut self, backend: Backend) -> AmRuntimeBuilder {
        self.backend = backend;
        self
    }

    /// Use an already built fabric endpoint.
    #[tracing::instrument(skip_all)]
    pub fn with_fabric(mut self, fabric: impl Into<Fabric>) -> AmRuntimeBuilder {
        self.fabric = Some(fabric.into());
        self
    }

    #[tracing::instrument(skip_all)]
    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> AmRuntimeBuilder {
        self.fatal_policy = policy;
        self
    }

    #[tracing::instrument(skip_all)]
    pub fn build(self) -> AmRuntime {
        let fabric = match self.fabric {
            Some(fabric) => fabric,
            None => create_fabric(self.backend),
        };
        tracing::info!(
            backend = ?fabric.kind(),
            rank = fabric.rank(),
            num_ranks = fabric.size(),
            policy = ?self.fatal_policy,
            "building active message runtime"
        );
        AmRuntime::new(Communicator::world(Arc::new(fabric), self.fatal_policy))
    }
}

impl Default for AmRuntimeBuilder {
    fn default() -> Self {
        AmRuntimeBuilder::new()
    }
}
