//! Inbound message bound to its session

use std::fmt;

use bytes::Bytes;
use skein_core::Event;

use crate::error::{NetError, NetResult};
use crate::frame::{Frame, Header};
use crate::message::{Message, Report};
use crate::session::Session;
use crate::tag::Tag;

/// One decoded frame together with where it came from.
pub struct Parcel {
    pub session: Session,
    pub header: Header,
    pub payload: Bytes,
}

impl Parcel {
    pub fn new(session: Session, frame: Frame) -> Self {
        Self {
            session,
            header: frame.header,
            payload: frame.payload,
        }
    }

    pub fn tag(&self) -> Tag {
        self.header.tag
    }

    pub fn event(&self) -> Event {
        self.header.event
    }

    /// Deserialize the payload as `M`, checking the tag first.
    pub fn extract<M: Message>(&self) -> NetResult<M> {
        if self.tag() != M::TAG {
            return Err(NetError::UnexpectedTag {
                expected: M::TAG,
                received: self.tag(),
            });
        }
        M::from_payload(&self.payload)
    }

    /// The diagnostic of an error-tagged parcel
    pub fn report(&self) -> Option<Report> {
        (self.tag() == Tag::ERROR).then(|| Report::from_payload(&self.payload))
    }
}

impl fmt::Debug for Parcel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parcel")
            .field("event", &self.header.event)
            .field("tag", &self.header.tag)
            .field("size", &self.header.size)
            .field("from", &self.session.locus())
            .finish()
    }
}
