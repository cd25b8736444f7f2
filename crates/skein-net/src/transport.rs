//! Transport boundary
//!
//! The messaging layer owns framing; a transport only moves opaque
//! datagrams. Inbound bytes are handed to `Channel::on_readable` and loss
//! of the link to `Channel::on_disconnected`.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::NetResult;

/// Transport endpoint address
pub type Locus = SocketAddr;

pub trait Transport {
    /// Address peers reply to
    fn local(&self) -> Locus;

    /// Write one frame to `to`.
    fn write(&self, to: Locus, frame: Bytes) -> NetResult<()>;
}
