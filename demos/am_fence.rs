use amreplay::active_messaging::prelude::*;

use std::sync::atomic::{AtomicUsize, Ordering};

struct Greeting {
    received: Arc<AtomicUsize>,
}

impl AmHandler for Greeting {
    fn name(&self) -> &str {
        "greeting"
    }
    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        let text: String = buffer.get()?;
        println!("[{}] from {}: {}", ctx.comm().rank(), ctx.source(), text);
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let num_ranks = std::env::args()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(4usize);

    let handles: Vec<_> = ThreadFabric::build(num_ranks)
        .into_iter()
        .map(|endpoint| {
            std::thread::spawn(move || -> amreplay::Result<usize> {
                let mut rt = AmRuntimeBuilder::new().with_fabric(endpoint).build();
                let received = Arc::new(AtomicUsize::new(0));
                let greeting = rt.attach(Arc::new(Greeting {
                    received: received.clone(),
                }));
                let world = rt.world();
                rt.start_listen(&world);

                let my_rank = rt.my_rank();
                for dest in 0..rt.num_ranks() {
                    let mut req = AmRequest::new(dest, world.clone());
                    req.pack(greeting, &format!("hello rank {dest}, I'm rank {my_rank}"))?;
                    rt.enqueue(req);
                }
                rt.fence(&world)?;
                rt.barrier(&world)?;
                rt.print_summary();
                rt.shutdown();
                Ok(received.load(Ordering::SeqCst))
            })
        })
        .collect();

    for (rank, handle) in handles.into_iter().enumerate() {
        let received = handle
            .join()
            .map_err(|_| anyhow::anyhow!("rank {rank} panicked"))??;
        println!("rank {rank} executed {received} greetings");
    }
    Ok(())
}
