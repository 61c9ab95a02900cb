mod common;

use amreplay::active_messaging::prelude::*;
use amreplay::event::{Event, EventRecord, UserEventId};
use amreplay::{CallbackManager, Error, ErrorClass};

use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

/// Adds the received values up and counts the records it executed.
struct Accumulate {
    total: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Accumulate {
    fn attach(rt: &mut AmRuntime) -> (HandlerId, Arc<AtomicU64>, Arc<AtomicU64>) {
        let total = Arc::new(AtomicU64::new(0));
        let count = Arc::new(AtomicU64::new(0));
        let id = rt.attach(Arc::new(Accumulate {
            total: total.clone(),
            count: count.clone(),
        }));
        (id, total, count)
    }
}

impl AmHandler for Accumulate {
    fn name(&self) -> &str {
        "accumulate"
    }
    fn execute(&self, _ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        let value: u64 = buffer.get()?;
        self.total.fetch_add(value, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records (source, sequence number) in arrival order.
struct Sequence {
    seen: Arc<Mutex<Vec<(usize, u32)>>>,
}

impl AmHandler for Sequence {
    fn name(&self) -> &str {
        "sequence"
    }
    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        let seq: u32 = buffer.get()?;
        self.seen.lock().push((ctx.source(), seq));
        Ok(())
    }
}

struct Ping {
    pong: HandlerId,
}

impl AmHandler for Ping {
    fn name(&self) -> &str {
        "ping"
    }
    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        let round: u32 = buffer.get()?;
        let mut pong = AmRequest::new(ctx.source(), ctx.comm().clone());
        pong.pack(self.pong, &(round + 1))?;
        ctx.reply(pong);
        Ok(())
    }
}

struct Pong {
    received: Arc<Mutex<Vec<(usize, u32)>>>,
}

impl AmHandler for Pong {
    fn name(&self) -> &str {
        "pong"
    }
    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        let round: u32 = buffer.get()?;
        self.received.lock().push((ctx.source(), round));
        Ok(())
    }
}

/// Forwards the event it carries to the user callbacks of the runtime.
struct Forward;

impl AmHandler for Forward {
    fn name(&self) -> &str {
        "forward"
    }
    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        let user_event: UserEventId = buffer.get()?;
        let event: Event = buffer.get()?;
        anyhow::ensure!(ctx.notify_user(user_event, &event), "no callback manager installed");
        Ok(())
    }
}

#[test]
fn fence_quiescence_two_ranks() {
    let results = common::run_ranks(2, |mut rt| {
        let (acc, _total, count) = Accumulate::attach(&mut rt);
        let world = rt.world();
        rt.start_listen(&world);
        if rt.my_rank() == 0 {
            for value in 0..3u64 {
                let mut req = AmRequest::new(1, world.clone());
                req.pack(acc, &value).unwrap();
                rt.enqueue(req);
            }
            assert_eq!(rt.target_set(&world), vec![1]);
            rt.fence(&world).unwrap();
            assert!(rt.target_set(&world).is_empty());
            rt.barrier(&world).unwrap();
        } else {
            rt.barrier(&world).unwrap();
            while rt.advance().unwrap() > 0 {}
        }
        let summary = rt.print_summary();
        assert_eq!(rt.shutdown(), 0);
        (count.load(Ordering::SeqCst), summary.get("accumulate"))
    });
    assert_eq!(results[1].0, 3);
    assert_eq!(results[0].0, 0);
    assert_eq!(results[0].1, Some(HandlerStats { sent: 3, executed: 0, failed: 0 }));
    assert_eq!(results[1].1, Some(HandlerStats { sent: 0, executed: 3, failed: 0 }));
}

macro_rules! all_to_all_test {
    ($num_ranks:expr) => {
        paste::paste! {
            #[test]
            fn [<fence_all_to_all_ $num_ranks _ranks>]() {
                let n: usize = $num_ranks;
                let totals = common::run_ranks(n, move |mut rt| {
                    let (acc, total, count) = Accumulate::attach(&mut rt);
                    let world = rt.world();
                    rt.start_listen(&world);
                    let value = rt.my_rank() as u64 + 1;
                    for dest in 0..rt.num_ranks() {
                        let mut req = AmRequest::new(dest, world.clone());
                        for _ in 0..3 {
                            req.pack(acc, &value).unwrap();
                        }
                        rt.enqueue(req);
                    }
                    rt.fence(&world).unwrap();
                    rt.barrier(&world).unwrap();
                    (total.load(Ordering::SeqCst), count.load(Ordering::SeqCst))
                });
                let expected = 3 * (n as u64) * (n as u64 + 1) / 2;
                for (total, count) in totals {
                    assert_eq!(total, expected);
                    assert_eq!(count, 3 * n as u64);
                }
            }
        }
    };
}

macro_rules! iter_num_ranks {
    ($($num_ranks:expr),*) => {
        $(
            all_to_all_test!($num_ranks);
        )*
    };
}

iter_num_ranks!(1, 2, 3, 5, 8);

#[test]
fn records_from_one_origin_execute_in_order() {
    let seen = common::run_ranks(3, |mut rt| {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seq = rt.attach(Arc::new(Sequence { seen: seen.clone() }));
        let world = rt.world();
        rt.start_listen(&world);
        if rt.my_rank() != 2 {
            for i in 0..40u32 {
                let mut req = AmRequest::new(2, world.clone());
                req.pack(seq, &(2 * i)).unwrap();
                req.pack(seq, &(2 * i + 1)).unwrap();
                rt.enqueue(req);
                if i % 7 == 0 {
                    rt.advance().unwrap();
                }
            }
        }
        rt.fence(&world).unwrap();
        rt.barrier(&world).unwrap();
        let seen = seen.lock().clone();
        seen
    });
    assert!(seen[0].is_empty() && seen[1].is_empty());
    for origin in 0..2 {
        let from_origin: Vec<u32> = seen[2]
            .iter()
            .filter(|(src, _)| *src == origin)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(from_origin, (0..80).collect::<Vec<u32>>());
    }
}

#[test]
fn handlers_reply_to_their_source() {
    let received = common::run_ranks(4, |mut rt| {
        let received = Arc::new(Mutex::new(Vec::new()));
        // pong is attached first so ping can carry its id
        let pong = rt.attach(Arc::new(Pong {
            received: received.clone(),
        }));
        let ping = rt.attach(Arc::new(Ping { pong }));
        let world = rt.world();
        rt.start_listen(&world);
        if rt.my_rank() == 0 {
            for dest in 1..rt.num_ranks() {
                let mut req = AmRequest::new(dest, world.clone());
                req.pack(ping, &(dest as u32 * 10)).unwrap();
                rt.enqueue(req);
            }
        }
        rt.fence(&world).unwrap();
        rt.barrier(&world).unwrap();
        // the pongs were enqueued by the targets, they fence them now
        rt.fence(&world).unwrap();
        rt.barrier(&world).unwrap();
        let mut received = received.lock().clone();
        received.sort();
        received
    });
    assert_eq!(received[0], vec![(1, 11), (2, 21), (3, 31)]);
    assert!(received[1..].iter().all(|r| r.is_empty()));
}

#[test]
fn allfence_covers_every_communicator() {
    let counts = common::run_ranks(3, |mut rt| {
        let (acc, _total, count) = Accumulate::attach(&mut rt);
        let world = rt.world();
        let analysis = world.dup(CommId(7));
        rt.start_listen(&world);
        rt.start_listen(&analysis);
        let next = (rt.my_rank() + 1) % rt.num_ranks();
        for comm in [&world, &analysis] {
            let mut req = AmRequest::new(next, comm.clone());
            req.pack(acc, &1u64).unwrap();
            rt.enqueue(req);
        }
        assert_eq!(rt.target_set(&analysis), vec![next]);
        rt.allfence().unwrap();
        assert!(rt.target_set(&world).is_empty());
        assert!(rt.target_set(&analysis).is_empty());
        rt.barrier(&world).unwrap();
        count.load(Ordering::SeqCst)
    });
    assert_eq!(counts, vec![2, 2, 2]);
}

#[test]
fn handlers_reach_callbacks_through_the_context() {
    let hits = common::run_ranks(2, |mut rt| {
        let forward = rt.attach(Arc::new(Forward));
        let mut cbm = CallbackManager::new();
        cbm.register_user_callback(
            7,
            amreplay::replay::callback(
                |_: &CallbackManager, user: UserEventId, event: &Event, data: &mut dyn Any| {
                    if let Some(hits) = data.downcast_mut::<Vec<(UserEventId, u64)>>() {
                        hits.push((user, event.index));
                    }
                },
            ),
        );
        rt.set_cbmanager(Arc::new(cbm));
        let data = callback_data(Vec::<(UserEventId, u64)>::new());
        rt.set_cbdata(data.clone());

        let world = rt.world();
        rt.start_listen(&world);
        let peer = 1 - rt.my_rank();
        let mut req = AmRequest::new(peer, world.clone());
        req.pack_with(forward, |buf| {
            buf.put(&7i32)?;
            buf.put(&Event::new(
                peer as u64 + 100,
                0.5,
                0,
                EventRecord::Enter { region: 3 },
            ))
        })
        .unwrap();
        rt.enqueue(req);
        rt.fence(&world).unwrap();
        rt.barrier(&world).unwrap();

        let guard = data.lock();
        guard
            .downcast_ref::<Vec<(UserEventId, u64)>>()
            .cloned()
            .unwrap_or_default()
    });
    assert_eq!(hits[0], vec![(7, 100)]);
    assert_eq!(hits[1], vec![(7, 101)]);
}

#[test]
fn missing_listener_is_a_logical_error() {
    let mut rt = AmRuntimeBuilder::new()
        .with_backend(Backend::Local)
        .with_fatal_policy(FatalPolicy::Propagate)
        .build();
    let world = rt.world();
    let err = rt.fence(&world).unwrap_err();
    assert!(matches!(err, Error::NoListener(id) if id == world.id()));
    assert_eq!(err.class(), ErrorClass::Logical);
    assert!(rt.allfence().is_ok());

    rt.start_listen(&world);
    assert!(rt.fence(&world).is_ok());
    rt.stop_listen(&world);
    assert!(matches!(rt.wait_comm(&world), Err(Error::NoListener(_))));
}
