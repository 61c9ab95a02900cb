#![allow(dead_code)]

use amreplay::active_messaging::prelude::*;

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Run `f` once per rank, every rank on its own thread with its own runtime,
/// and return the per rank results in rank order.
pub fn run_ranks<T, F>(num_ranks: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(AmRuntime) -> T + Send + Sync + 'static,
{
    init_tracing();
    let f = Arc::new(f);
    let handles: Vec<_> = ThreadFabric::build(num_ranks)
        .into_iter()
        .map(|endpoint| {
            let f = f.clone();
            std::thread::spawn(move || {
                let rt = AmRuntimeBuilder::new()
                    .with_fabric(endpoint)
                    .with_fatal_policy(FatalPolicy::Propagate)
                    .build();
                f(rt)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank panicked"))
        .collect()
}

/// Run `f` once per rank with the bare world communicator.
pub fn run_comms<T, F>(num_ranks: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Communicator) -> T + Send + Sync + 'static,
{
    init_tracing();
    let f = Arc::new(f);
    let handles: Vec<_> = ThreadFabric::build(num_ranks)
        .into_iter()
        .map(|endpoint| {
            let f = f.clone();
            std::thread::spawn(move || {
                f(Communicator::world(
                    Arc::new(Fabric::from(endpoint)),
                    FatalPolicy::Propagate,
                ))
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank panicked"))
        .collect()
}
