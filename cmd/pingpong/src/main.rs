//! Request/reply between two loopback endpoints
//!
//! A server endpoint answers `Ping` with `Pong` after sleeping for the
//! requested number of milliseconds, and rejects `n == 0` with an error
//! report. Several client fibers call it concurrently; replies come back
//! in order of readiness, each to the fiber that asked.
//!
//! # Usage
//!
//! ```text
//! pingpong [CALLS]
//! ```
//!
//! # Environment Variables
//!
//! - `SKEIN_POOL_CAPACITY=8` - Reuse fibers between handlers
//! - `SKEIN_STACK_SIZE=262144` - Fiber stack size in bytes

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use skein::{Loopback, Message, NetError, NetResult, Network, Runtime, RuntimeConfig, Session, Tag};

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

impl Message for Ping {
    const TAG: Tag = Tag::user(0);
}

#[derive(Debug, Serialize, Deserialize)]
struct Pong {
    n: u32,
    served_by: String,
}

impl Message for Pong {
    const TAG: Tag = Tag::user(1);
}

fn main() -> NetResult<()> {
    println!("=== skein pingpong ===\n");

    let calls: u32 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    let config = RuntimeConfig::from_env();
    println!("{}\n", config);
    let runtime = Runtime::new(config)?;
    let network = Network::new(&runtime)?;
    let hub = Loopback::new();
    let (client, _client_endpoint) = hub.open(&network)?;
    let (server, _server_endpoint) = hub.open(&network)?;

    let handler_runtime = runtime.clone();
    let served_by = server.local().to_string();
    network.register(move |ping: Ping, session: &Session| {
        if ping.n == 0 {
            return Err(NetError::handler("ping 0 is not allowed"));
        }
        handler_runtime.sleep(Duration::from_millis(u64::from(ping.n)))?;
        session.reply(&Pong {
            n: ping.n,
            served_by: served_by.clone(),
        })
    })?;

    let results = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();
    let to = server.local();

    // Largest delay first, so replies arrive in reverse call order
    for n in (0..calls).rev() {
        let (client, results) = (client.clone(), results.clone());
        runtime.spawn(move || {
            let outcome = client.call::<Ping, Pong>(to, &Ping { n });
            results.borrow_mut().push((n, outcome, start.elapsed()));
        })?;
    }

    println!("[after spawning]\n{:?}\n", runtime);

    let done = runtime.run_until(Duration::from_secs(10), || {
        results.borrow().len() == calls as usize
    })?;
    if !done {
        println!("Timeout! Only {}/{} calls completed", results.borrow().len(), calls);
    }

    println!("=== Results ===");
    for (n, outcome, at) in results.borrow().iter() {
        match outcome {
            Ok(pong) => println!("  ping {:>3} -> pong {:>3} from {} at {:?}", n, pong.n, pong.served_by, at),
            Err(err) => println!("  ping {:>3} -> error: {} at {:?}", n, err, at),
        }
    }
    println!("\nFibers pooled: {}", runtime.pooled());

    network.clean();
    runtime.teardown()?;
    Ok(())
}
