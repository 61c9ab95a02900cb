//! Two ranks replay a tiny synthetic trace and detect "late sender" waiting
//! time: the receiver entered its receive before the matching send started.

use amreplay::event::{Event, EventGroup, EventRecord, EventType, UserEventId};
use amreplay::fabric::{Fabric, ThreadFabric};
use amreplay::replay::{callback, CompoundTask, FnTask, Task, TaskHandle, TaskPhases};
use amreplay::{CallbackManager, Communicator, FatalPolicy, GlobalDefs, RemoteEventSet};

use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

const LATE_SENDER: UserEventId = 1;
const EXCHANGE_TAG: u32 = 17;

#[derive(Default)]
struct Replay {
    sends: Vec<Event>,
    recvs: Vec<Event>,
    regions: usize,
    late_sender_time: f64,
}

fn trace(rank: usize) -> Vec<Event> {
    let loc = rank as u64;
    let p2p = |index: u64, timestamp: f64, record: EventRecord| Event::new(index, timestamp, loc, record);
    if rank == 0 {
        vec![
            p2p(0, 0.0, EventRecord::Enter { region: 1 }),
            p2p(1, 1.0, EventRecord::MpiSend { comm: 0, dest: 1, tag: 0, bytes: 8 }),
            p2p(2, 1.1, EventRecord::Leave { region: 1 }),
            p2p(3, 2.0, EventRecord::Enter { region: 1 }),
            p2p(4, 2.2, EventRecord::MpiSend { comm: 0, dest: 1, tag: 0, bytes: 8 }),
            p2p(5, 2.3, EventRecord::Leave { region: 1 }),
        ]
    } else {
        vec![
            p2p(0, 0.2, EventRecord::Enter { region: 2 }),
            p2p(1, 1.2, EventRecord::MpiRecv { comm: 0, source: 0, tag: 0, bytes: 8 }),
            p2p(2, 1.2, EventRecord::Leave { region: 2 }),
            p2p(3, 2.5, EventRecord::Enter { region: 2 }),
            p2p(4, 2.6, EventRecord::MpiRecv { comm: 0, source: 0, tag: 0, bytes: 8 }),
            p2p(5, 2.6, EventRecord::Leave { region: 2 }),
        ]
    }
}

fn defs() -> GlobalDefs {
    let mut defs = GlobalDefs::new();
    defs.add_region(1, "MPI_Send")
        .add_region(2, "MPI_Recv")
        .add_location(0, 0, "rank 0")
        .add_location(1, 1, "rank 1")
        .add_communicator(0, "MPI_COMM_WORLD", 2);
    defs
}

fn callbacks() -> CallbackManager {
    let mut cbm = CallbackManager::new();
    cbm.register_callback(
        EventGroup::Enter,
        callback(|_: &CallbackManager, _: UserEventId, _: &Event, data: &mut dyn Any| {
            if let Some(replay) = data.downcast_mut::<Replay>() {
                replay.regions += 1;
            }
        }),
    );
    cbm.register_callback(
        EventType::MpiSend,
        callback(|_: &CallbackManager, _: UserEventId, event: &Event, data: &mut dyn Any| {
            if let Some(replay) = data.downcast_mut::<Replay>() {
                replay.sends.push(event.clone());
            }
        }),
    );
    cbm.register_callback(
        EventGroup::Recv,
        callback(|_: &CallbackManager, _: UserEventId, event: &Event, data: &mut dyn Any| {
            if let Some(replay) = data.downcast_mut::<Replay>() {
                replay.recvs.push(event.clone());
            }
        }),
    );
    cbm.register_user_callback(
        LATE_SENDER,
        callback(|_: &CallbackManager, _: UserEventId, event: &Event, _: &mut dyn Any| {
            println!("late sender detected at receive #{}", event.index);
        }),
    );
    cbm
}

struct Report {
    rank: usize,
    replay: Arc<Mutex<Replay>>,
}

impl TaskPhases for Report {
    fn finish(&mut self) -> bool {
        let replay = self.replay.lock();
        println!(
            "rank {}: {} regions, {} sends, {} receives, late sender time {:.2}s",
            self.rank,
            replay.regions,
            replay.sends.len(),
            replay.recvs.len(),
            replay.late_sender_time
        );
        true
    }
}

fn analysis(comm: Communicator) -> bool {
    let rank = comm.rank();
    let cbm = Arc::new(callbacks());
    let replay = Arc::new(Mutex::new(Replay::default()));

    let replay_task = {
        let cbm = cbm.clone();
        let replay = replay.clone();
        FnTask::new("replay", move || {
            let mut state = replay.lock();
            for event in trace(rank) {
                cbm.notify(&event, &mut *state);
            }
            true
        })
    };

    let exchange_task = {
        let replay = replay.clone();
        FnTask::new("exchange", move || {
            let defs = defs();
            let mut remote = RemoteEventSet::new();
            let mut state = replay.lock();
            let result = if rank == 0 {
                for (i, send) in state.sends.iter().enumerate() {
                    remote.add_event(send.clone(), i as u32);
                }
                remote.send(&comm, 1, EXCHANGE_TAG)
            } else {
                remote.recv(&defs, &comm, 0, EXCHANGE_TAG).map(|_| {
                    let mut late = 0.0;
                    for (i, recv) in state.recvs.iter().enumerate() {
                        if let Ok(send) = remote.get_event(i as u32) {
                            if send.timestamp > recv.timestamp {
                                late += send.timestamp - recv.timestamp;
                                cbm.notify_user(LATE_SENDER, recv, &mut ());
                            }
                        }
                    }
                    state.late_sender_time = late;
                })
            };
            match result {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!("exchange failed: {err}");
                    false
                }
            }
        })
    };

    let mut pipeline = CompoundTask::with_phases(
        "late sender analysis",
        Report {
            rank,
            replay: replay.clone(),
        },
    );
    for task in [TaskHandle::new(replay_task), TaskHandle::new(exchange_task)] {
        if pipeline.add_task(task).is_err() {
            return false;
        }
    }
    let ok = pipeline.execute();
    if !ok {
        println!("rank {rank}: analysis stopped at step {}", pipeline.current_step());
    }
    ok
}

fn main() {
    tracing_subscriber::fmt::init();
    let handles: Vec<_> = ThreadFabric::build(2)
        .into_iter()
        .map(|endpoint| {
            std::thread::spawn(move || {
                analysis(Communicator::world(
                    Arc::new(Fabric::from(endpoint)),
                    FatalPolicy::Abort,
                ))
            })
        })
        .collect();
    let ok = handles.into_iter().all(|h| h.join().unwrap_or(false));
    std::process::exit(if ok { 0 } else { 1 });
}
