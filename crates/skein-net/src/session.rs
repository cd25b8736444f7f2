//! Sessions and the ambient current session
//!
//! A [`Session`] remembers which token and which peer an inbound message
//! came with, so that whoever handles it can answer without knowing either.
//! While a handler runs, its session is also the *current session* of the
//! fiber. [`CurrentSession`] is the phase handler that keeps that ambient
//! value attached to the logical fiber across switches:
//!
//! | phase      | effect                                        |
//! |------------|-----------------------------------------------|
//! | Save       | move the slot into the fiber's environment    |
//! | Restore    | move it back out                              |
//! | Initialize | clear the slot, ahead of the first Restore    |
//! | Clean      | drop whatever the fiber still holds           |

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use skein_core::{Event, FiberRef, Phase, PhaseHandler, SchedError, SchedResult};

use crate::channel::Channel;
use crate::error::NetResult;
use crate::message::{Message, Report};
use crate::tag::Tag;
use crate::transport::Locus;

/// Prefix of the environment key the current session is parked under
pub const SESSION_KEY: &str = "skein.net.session";

static NEXT_SLOT: AtomicU64 = AtomicU64::new(0);

/// Where an inbound message came from and how to answer it.
#[derive(Clone)]
pub struct Session {
    event: Event,
    locus: Locus,
    channel: Channel,
}

impl Session {
    pub fn new(event: Event, locus: Locus, channel: Channel) -> Self {
        Self {
            event,
            locus,
            channel,
        }
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub fn locus(&self) -> Locus {
        self.locus
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Answer the message this session was created for.
    pub fn reply<M: Message>(&self, message: &M) -> NetResult<()> {
        self.channel.send(self.locus, message, self.event)
    }

    /// Answer with an error report instead of a reply.
    pub fn report(&self, report: &Report) -> NetResult<()> {
        self.channel
            .send_raw(self.locus, Tag::ERROR, report.to_payload(), self.event)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("event", &self.event)
            .field("locus", &self.locus)
            .finish()
    }
}

pub(crate) type SessionSlot = Rc<RefCell<Option<Session>>>;

/// Phase handler tying the current session to the running fiber.
///
/// Each instance parks under its own key, so several networks may share
/// a runtime.
pub(crate) struct CurrentSession {
    slot: SessionSlot,
    key: String,
}

impl CurrentSession {
    pub(crate) fn new(slot: SessionSlot) -> Self {
        let n = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
        Self {
            slot,
            key: format!("{}.{}", SESSION_KEY, n),
        }
    }
}

impl PhaseHandler for CurrentSession {
    fn on_phase(&mut self, phase: Phase, fiber: FiberRef<'_>) -> SchedResult<()> {
        let mut slot = self
            .slot
            .try_borrow_mut()
            .map_err(|_| SchedError::phase(phase, "current session is borrowed"))?;

        // Sessions are dropped after the slot borrow is released
        let stale = match phase {
            Phase::Save => {
                if let Some(session) = slot.take() {
                    fiber.environment.store(self.key.as_str(), session);
                }
                None
            }
            Phase::Restore => {
                *slot = fiber.environment.take::<Session>(&self.key);
                None
            }
            Phase::Initialize => slot.take(),
            Phase::Clean => {
                fiber.environment.remove(&self.key);
                slot.take()
            }
        };
        drop(slot);
        drop(stale);
        Ok(())
    }
}
