//! # skein-net
//!
//! Event-correlated request/reply messaging for skein fibers.
//!
//! A fiber calls [`Channel::call`], which frames the request under a fresh
//! correlation [`Event`](skein_core::Event), writes it and parks the fiber
//! on that event. When the transport reports readable bytes, the channel
//! splits them into frames and resumes whichever fiber is waiting on each
//! frame's event; frames nobody waits for go to the [`Network`] handler
//! table, each handled on its own fiber.
//!
//! ## Modules
//!
//! - `tag` - Message tags and the reserved ones
//! - `frame` - Wire header and frame codec
//! - `message` - Typed payloads and error reports
//! - `session` - Reply addressing and the ambient current session
//! - `network` - Handler table and inbound dispatch
//! - `channel` - Send, receive, call and reply over one transport
//! - `transport` - Transport boundary
//! - `loopback` - In-memory transport

pub mod channel;
pub mod error;
pub mod frame;
pub mod loopback;
pub mod message;
pub mod network;
pub mod parcel;
pub mod session;
pub mod tag;
pub mod transport;

pub use channel::{Channel, WeakChannel};
pub use error::{NetError, NetResult};
pub use frame::{Frame, Header, HEADER_SIZE};
pub use loopback::{Loopback, LoopbackEndpoint};
pub use message::{Message, Report};
pub use network::Network;
pub use parcel::Parcel;
pub use session::Session;
pub use tag::Tag;
pub use transport::{Locus, Transport};
