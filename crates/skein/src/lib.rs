//! # skein - cooperative fibers with correlated messaging
//!
//! Write blocking-style remote calls (`send the request, wait for its
//! reply`) on top of single-threaded, event-driven I/O.
//!
//! ## Features
//!
//! - **Stackful fibers**: each fiber runs on its own mmap'd stack and can
//!   park anywhere in its call chain
//! - **Cooperative scheduling**: one fiber runs at a time; parking points
//!   are `wait`, `wait_resource`, `sleep` and `yield_now`
//! - **Ambient state**: phase hooks swap per-fiber context on every switch
//! - **Correlated messaging**: replies find their caller by token; other
//!   traffic goes to a handler table keyed by tag
//!
//! ## Quick Start
//!
//! ```ignore
//! use skein::{Channel, Loopback, Message, Network, Runtime, RuntimeConfig, Session, Tag};
//!
//! let runtime = Runtime::new(RuntimeConfig::from_env())?;
//! let network = Network::new(&runtime)?;
//! let hub = Loopback::new();
//! let (client, _) = hub.open(&network)?;
//! let (server, _) = hub.open(&network)?;
//!
//! network.register(|ping: Ping, session: &Session| session.reply(&Pong { n: ping.n }))?;
//!
//! let to = server.local();
//! runtime.spawn(move || {
//!     let pong: Pong = client.call(to, &Ping { n: 1 }).unwrap();
//!     println!("pong {}", pong.n);
//! })?;
//! runtime.run()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │          spawn, call, reply, register, sleep                │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                            │
//!                 ▼                            ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │        skein-net          │   │       skein-runtime         │
//! │  Channel, Network, frame  │──►│  scheduler, wait registry,  │
//! │  sessions, loopback       │   │  pool, timers, host loop    │
//! └───────────────────────────┘   └─────────────────────────────┘
//!                 │                            │
//!                 └─────────────┬──────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       skein-core                            │
//! │   ids, events, states, environment, errors, seam traits     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// Core types
pub use skein_core::{
    Context,
    Environment,
    Event,
    FiberId,
    FiberRef,
    FiberState,
    Phase,
    PhaseHandler,
    ResourceKey,
    SchedError,
    SchedResult,
    Switch,
    Wait,
    WaitKind,
};

// Env utilities
pub use skein_core::{env_get, env_get_bool, env_get_opt};

// Runtime
pub use skein_runtime::{
    ConfigError,
    EventSource,
    FiberSnapshot,
    Runtime,
    RuntimeConfig,
    Snapshot,
    TimerHandle,
    TimerMode,
    TimerService,
};

// Messaging
pub use skein_net::{
    Channel,
    Locus,
    Loopback,
    LoopbackEndpoint,
    Message,
    NetError,
    NetResult,
    Network,
    Parcel,
    Report,
    Session,
    Tag,
    Transport,
};
