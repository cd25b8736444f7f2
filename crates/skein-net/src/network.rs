//! Handler table and inbound dispatch
//!
//! A [`Network`] maps tags to handlers for traffic that is not a reply to
//! one of our own calls: probes, requests from peers, stray messages.
//! Every such message is handled on a fresh fiber whose current session
//! is the message's session, so handlers may block on calls of their own.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use skein_runtime::Runtime;
use tracing::{debug, trace, warn};

use crate::error::{NetError, NetResult};
use crate::message::{Message, Report};
use crate::parcel::Parcel;
use crate::session::{CurrentSession, Session, SessionSlot};
use crate::tag::Tag;

type Handler = Rc<dyn Fn(Parcel) -> NetResult<()>>;

/// Handle to the handler table of one node.
///
/// Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct Network {
    inner: Rc<NetworkInner>,
}

struct NetworkInner {
    runtime: Runtime,
    handlers: RefCell<HashMap<Tag, Handler>>,
    current: SessionSlot,
}

impl Network {
    /// Create the table and hook the current session into `runtime`.
    pub fn new(runtime: &Runtime) -> NetResult<Self> {
        let current = SessionSlot::default();
        runtime.register_phase_handler(CurrentSession::new(current.clone()))?;

        Ok(Self {
            inner: Rc::new(NetworkInner {
                runtime: runtime.clone(),
                handlers: RefCell::new(HashMap::new()),
                current,
            }),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Handle every inbound `M` that is not a reply with `handler`.
    pub fn register<M, F>(&self, handler: F) -> NetResult<()>
    where
        M: Message,
        F: Fn(M, &Session) -> NetResult<()> + 'static,
    {
        self.register_raw(M::TAG, move |parcel: Parcel| {
            let message = parcel.extract::<M>()?;
            handler(message, &parcel.session)
        })
    }

    /// Register a handler that receives undecoded parcels.
    ///
    /// Each tag takes one handler; reserved tags take none.
    pub fn register_raw<F>(&self, tag: Tag, handler: F) -> NetResult<()>
    where
        F: Fn(Parcel) -> NetResult<()> + 'static,
    {
        if tag.is_reserved() {
            return Err(NetError::ReservedTag(tag));
        }
        match self.inner.handlers.borrow_mut().entry(tag) {
            Entry::Occupied(_) => Err(NetError::DuplicateTag(tag)),
            Entry::Vacant(slot) => {
                slot.insert(Rc::new(handler));
                debug!(%tag, "handler registered");
                Ok(())
            }
        }
    }

    pub fn unregister(&self, tag: Tag) -> bool {
        let removed = self.inner.handlers.borrow_mut().remove(&tag);
        removed.is_some()
    }

    pub fn is_registered(&self, tag: Tag) -> bool {
        self.inner.handlers.borrow().contains_key(&tag)
    }

    /// Session of the message the running fiber is handling
    pub fn current_session(&self) -> Option<Session> {
        self.inner.current.try_borrow().ok()?.clone()
    }

    /// Hand `parcel` to the handler registered for its tag.
    ///
    /// The handler runs on its own fiber. Returns false, dropping the
    /// parcel, when no handler is registered.
    pub fn dispatch(&self, parcel: Parcel) -> NetResult<bool> {
        let handler = self.inner.handlers.borrow().get(&parcel.tag()).cloned();
        let Some(handler) = handler else {
            warn!(
                tag = %parcel.tag(),
                event = %parcel.event(),
                from = %parcel.session.locus(),
                "no handler for unsolicited message, dropping"
            );
            return Ok(false);
        };

        let network = self.clone();
        self.inner
            .runtime
            .spawn(move || network.run_handler(handler, parcel))?;
        Ok(true)
    }

    fn run_handler(&self, handler: Handler, parcel: Parcel) {
        let session = parcel.session.clone();
        let tag = parcel.tag();
        if let Ok(mut current) = self.inner.current.try_borrow_mut() {
            *current = Some(session.clone());
        }
        trace!(%tag, event = %session.event(), "handling");

        if let Err(err) = handler(parcel) {
            warn!(%tag, from = %session.locus(), %err, "handler failed");
            if let Err(err) = session.report(&Report::from(&err)) {
                warn!(%tag, %err, "unable to report handler failure");
            }
        }
    }

    /// Drop every handler.
    ///
    /// Handlers usually hold channels, which hold this table; clearing it
    /// breaks that cycle on shutdown.
    pub fn clean(&self) {
        let handlers = std::mem::take(&mut *self.inner.handlers.borrow_mut());
        drop(handlers);
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<Tag> = self.inner.handlers.borrow().keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("Network").field("handlers", &tags).finish()
    }
}
