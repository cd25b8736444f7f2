//! Request/reply over one transport
//!
//! ```text
//!   fiber                      Channel                     peer
//!     │ call(to, req) ─────────► send(token k) ─────────────►│
//!     │                          wait(k)                     │
//!     │                                                      │ reply(k)
//!     │                          on_readable ◄───────────────┘
//!     │                            locate(k)? awaken(k, parcel)
//!     │ ◄── receive checks tag ──  else Network::dispatch
//! ```
//!
//! A reply resumes the fiber blocked on its token. Anything nobody waits
//! for goes to the handler table.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use skein_core::Event;
use skein_runtime::Runtime;
use tracing::{trace, warn};

use crate::error::{NetError, NetResult};
use crate::frame;
use crate::message::{Message, Report};
use crate::network::Network;
use crate::parcel::Parcel;
use crate::session::Session;
use crate::tag::Tag;
use crate::transport::{Locus, Transport};

/// Messaging endpoint bound to one transport.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<ChannelInner>,
}

struct ChannelInner {
    network: Network,
    transport: Rc<dyn Transport>,
    closed: Cell<bool>,
    /// Tokens fibers are blocked on in `receive`
    awaiting: RefCell<HashSet<Event>>,
}

/// Non-owning handle held by transports
#[derive(Clone)]
pub struct WeakChannel {
    inner: Weak<ChannelInner>,
}

impl WeakChannel {
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

impl Channel {
    pub fn new(network: Network, transport: Rc<dyn Transport>) -> Self {
        Self {
            inner: Rc::new(ChannelInner {
                network,
                transport,
                closed: Cell::new(false),
                awaiting: RefCell::new(HashSet::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn network(&self) -> &Network {
        &self.inner.network
    }

    fn runtime(&self) -> &Runtime {
        self.inner.network.runtime()
    }

    pub fn local(&self) -> Locus {
        self.inner.transport.local()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Frame `message` with `event` and write it to `to`. Does not block.
    pub fn send<M: Message>(&self, to: Locus, message: &M, event: Event) -> NetResult<()> {
        let payload = message.to_payload()?;
        self.send_raw(to, M::TAG, &payload, event)
    }

    pub fn send_raw(&self, to: Locus, tag: Tag, payload: &[u8], event: Event) -> NetResult<()> {
        if self.is_closed() {
            return Err(NetError::Disconnected);
        }
        let frame = frame::encode(event, tag, payload)?;
        trace!(%to, %tag, %event, size = payload.len(), "send");
        self.inner.transport.write(to, frame)
    }

    /// Block the current fiber until a message carrying `event` arrives.
    ///
    /// An error report fails with [`NetError::Remote`]. Any other tag than
    /// `M`'s is offered to the handler table and fails with
    /// [`NetError::UnexpectedTag`]. A local wake with no reply attached, such
    /// as a caller's own timeout, fails with [`NetError::Interrupted`].
    pub fn receive<M: Message>(&self, event: Event) -> NetResult<M> {
        self.inner.awaiting.borrow_mut().insert(event);
        let data = self.runtime().wait(event);
        self.inner.awaiting.borrow_mut().remove(&event);

        let parcel = data?
            .and_then(|d| d.downcast::<Parcel>().ok())
            .ok_or(NetError::Interrupted(event))?;

        if parcel.tag() == M::TAG {
            return M::from_payload(&parcel.payload);
        }
        if let Some(report) = parcel.report() {
            return Err(report.into());
        }

        let received = parcel.tag();
        warn!(%event, expected = %M::TAG, %received, "reply carries unexpected tag");
        if let Err(err) = self.network().dispatch(*parcel) {
            warn!(%event, %err, "unable to offer mismatched reply to handlers");
        }
        Err(NetError::UnexpectedTag {
            expected: M::TAG,
            received,
        })
    }

    /// Send `request` to `to` under a fresh token and wait for the reply.
    pub fn call<I: Message, O: Message>(&self, to: Locus, request: &I) -> NetResult<O> {
        let event = Event::generate();
        self.send(to, request, event)?;
        self.receive(event)
    }

    /// Answer through `session`, or the current session when none is given.
    pub fn reply<M: Message>(&self, message: &M, session: Option<&Session>) -> NetResult<()> {
        match session {
            Some(session) => self.send(session.locus(), message, session.event()),
            None => {
                let session = self.network().current_session().ok_or(NetError::NoSession)?;
                self.send(session.locus(), message, session.event())
            }
        }
    }

    /// Answer with an error report through the current session.
    pub fn report(&self, report: &Report) -> NetResult<()> {
        let session = self.network().current_session().ok_or(NetError::NoSession)?;
        self.send_raw(session.locus(), Tag::ERROR, report.to_payload(), session.event())
    }

    /// Transport callback: `raw` arrived from `from`.
    ///
    /// Each whole frame either wakes the fiber receiving on its token
    /// through this channel or goes to the handler table; woken fibers run
    /// before the next frame is looked at. Returns the number of frames handled.
    pub fn on_readable(&self, from: Locus, raw: Bytes) -> usize {
        let decoded = frame::decode(raw);
        if decoded.dropped_bytes > 0 {
            warn!(%from, bytes = decoded.dropped_bytes, "dropping partial trailing frame");
        }
        if decoded.rejected > 0 {
            warn!(%from, frames = decoded.rejected, "dropping frames tagged none");
        }

        let mut handled = 0;
        for frame in decoded.frames {
            let event = frame.header.event;
            let parcel = Parcel::new(Session::new(event, from, self.clone()), frame);

            let runtime = self.runtime();
            let waiter = if self.inner.awaiting.borrow().contains(&event) {
                runtime.locate(event)
            } else {
                None
            };
            let delivered = match waiter {
                Some(fiber) => {
                    trace!(%event, %fiber, "resuming waiter");
                    let data: Box<dyn Any> = Box::new(parcel);
                    runtime.awaken(event, Some(data))
                }
                None => match self.network().dispatch(parcel) {
                    Ok(dispatched) => dispatched,
                    Err(err) => {
                        warn!(%event, %err, "unable to dispatch message");
                        false
                    }
                },
            };
            if delivered {
                handled += 1;
            }

            if let Err(err) = runtime.schedule_pending() {
                warn!(%event, %err, "scheduling after delivery failed");
            }
        }
        handled
    }

    /// Transport callback: the link is gone.
    ///
    /// Sends fail from now on. Fibers waiting for replies stay parked.
    pub fn on_disconnected(&self) {
        if !self.inner.closed.replace(true) {
            warn!(local = %self.local(), "channel disconnected");
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("local", &self.local())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    use bytes::BytesMut;
    use serde::{Deserialize, Serialize};
    use skein_runtime::RuntimeConfig;

    use crate::loopback::{Loopback, LoopbackEndpoint};

    const LIMIT: Duration = Duration::from_secs(5);

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl Message for Ping {
        const TAG: Tag = Tag::user(0);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Pong {
        n: u32,
    }

    impl Message for Pong {
        const TAG: Tag = Tag::user(1);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Notice {
        text: String,
    }

    impl Message for Notice {
        const TAG: Tag = Tag::user(2);
    }

    struct Node {
        channel: Channel,
        endpoint: Rc<LoopbackEndpoint>,
    }

    /// Two endpoints of one process sharing its handler table
    struct Harness {
        runtime: Runtime,
        network: Network,
        client: Node,
        server: Node,
        _hub: Loopback,
    }

    fn harness() -> Harness {
        let runtime = Runtime::new(RuntimeConfig::new().stack_size(128 * 1024)).unwrap();
        let network = Network::new(&runtime).unwrap();
        let hub = Loopback::new();
        let node = || {
            let (channel, endpoint) = hub.open(&network).unwrap();
            Node { channel, endpoint }
        };
        let client = node();
        let server = node();
        Harness {
            runtime,
            network,
            client,
            server,
            _hub: hub,
        }
    }

    type Slot<T> = Rc<RefCell<Option<NetResult<T>>>>;

    /// Run `call` on a client fiber, parking the outcome in a slot.
    fn spawn_call<O: Message>(h: &Harness, request: Ping) -> Slot<O> {
        let slot: Slot<O> = Rc::default();
        let (channel, to, s) = (h.client.channel.clone(), h.server.channel.local(), slot.clone());
        h.runtime
            .spawn(move || {
                *s.borrow_mut() = Some(channel.call::<Ping, O>(to, &request));
            })
            .unwrap();
        slot
    }

    fn frame_bytes<M: Message>(event: Event, message: &M) -> Bytes {
        frame::encode(event, M::TAG, &message.to_payload().unwrap()).unwrap()
    }

    #[test]
    fn test_call_round_trip() {
        let h = harness();
        h.network
            .register(|ping: Ping, session: &Session| session.reply(&Pong { n: ping.n + 1 }))
            .unwrap();

        let reply = spawn_call::<Pong>(&h, Ping { n: 41 });
        assert!(h.runtime.run_until(LIMIT, || reply.borrow().is_some()).unwrap());
        let outcome = reply.borrow_mut().take().unwrap();
        assert_eq!(outcome.unwrap(), Pong { n: 42 });
        assert!(h.runtime.waiting().is_empty());
        h.runtime.verify().unwrap();
    }

    #[test]
    fn test_remote_error_carried_verbatim() {
        let h = harness();
        h.network
            .register(|_: Ping, _: &Session| Err(NetError::handler("block 7f3a not found")))
            .unwrap();

        let reply = spawn_call::<Pong>(&h, Ping { n: 0 });
        assert!(h.runtime.run_until(LIMIT, || reply.borrow().is_some()).unwrap());
        match reply.borrow_mut().take().unwrap() {
            Err(NetError::Remote(diagnostic)) => assert_eq!(diagnostic, "block 7f3a not found"),
            other => panic!("unexpected outcome {:?}", other),
        };
    }

    #[test]
    fn test_mismatched_reply_offered_to_handlers() {
        let h = harness();
        h.network
            .register(|_: Ping, session: &Session| {
                session.reply(&Notice {
                    text: "moved".into(),
                })
            })
            .unwrap();

        let noticed = Rc::new(RefCell::new(None));
        let n = noticed.clone();
        h.network
            .register(move |notice: Notice, session: &Session| {
                *n.borrow_mut() = Some((notice.text, session.event()));
                Ok(())
            })
            .unwrap();

        let reply = spawn_call::<Pong>(&h, Ping { n: 1 });
        let done = || reply.borrow().is_some() && noticed.borrow().is_some();
        assert!(h.runtime.run_until(LIMIT, done).unwrap());

        assert!(matches!(
            reply.borrow_mut().take().unwrap(),
            Err(NetError::UnexpectedTag { expected, received })
                if expected == Pong::TAG && received == Notice::TAG
        ));
        assert_eq!(noticed.borrow().as_ref().map(|(t, _)| t.as_str()), Some("moved"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let h = harness();
        h.network.register(|_: Ping, _: &Session| Ok(())).unwrap();
        assert!(matches!(
            h.network.register(|_: Ping, _: &Session| Ok(())),
            Err(NetError::DuplicateTag(tag)) if tag == Ping::TAG
        ));
        assert!(matches!(
            h.network.register_raw(Tag::ERROR, |_| Ok(())),
            Err(NetError::ReservedTag(_))
        ));
    }

    #[test]
    fn test_separate_networks_share_runtime() {
        let h = harness();
        let other = Network::new(&h.runtime).unwrap();
        let hub = Loopback::new();
        let (peer, _endpoint) = hub.open(&other).unwrap();
        let (server, _server_endpoint) = hub.open(&h.network).unwrap();

        let runtime = h.runtime.clone();
        h.network
            .register(move |ping: Ping, session: &Session| {
                runtime.sleep(Duration::from_millis(1))?;
                session.channel().reply(&Pong { n: ping.n }, None)
            })
            .unwrap();

        let reply = Rc::new(RefCell::new(None));
        let (r, to) = (reply.clone(), server.local());
        h.runtime
            .spawn(move || *r.borrow_mut() = Some(peer.call::<Ping, Pong>(to, &Ping { n: 5 })))
            .unwrap();
        assert!(h.runtime.run_until(LIMIT, || reply.borrow().is_some()).unwrap());
        assert!(matches!(reply.borrow_mut().take(), Some(Ok(Pong { n: 5 }))));
        assert!(other.current_session().is_none());
    }

    #[test]
    fn test_replies_resume_in_arrival_order() {
        for batched in [false, true] {
            let h = harness();
            let log = Rc::new(RefCell::new(Vec::new()));
            let (k1, k2) = (Event::generate(), Event::generate());

            for (name, event) in [("a", k1), ("b", k2)] {
                let (channel, l) = (h.client.channel.clone(), log.clone());
                h.runtime
                    .spawn(move || {
                        let pong = channel.receive::<Pong>(event).unwrap();
                        l.borrow_mut().push((name, pong.n));
                    })
                    .unwrap();
            }

            let from = h.server.channel.local();
            if batched {
                let mut buf = BytesMut::new();
                buf.extend_from_slice(&frame_bytes(k2, &Pong { n: 2 }));
                buf.extend_from_slice(&frame_bytes(k1, &Pong { n: 1 }));
                h.client.endpoint.inject(from, buf.freeze());
            } else {
                h.client.endpoint.inject(from, frame_bytes(k2, &Pong { n: 2 }));
                h.client.endpoint.inject(from, frame_bytes(k1, &Pong { n: 1 }));
            }
            h.runtime.run_once().unwrap();
            assert_eq!(*log.borrow(), vec![("b", 2), ("a", 1)]);
        }
    }

    #[test]
    fn test_unsolicited_without_handler_dropped() {
        let h = harness();
        let from = h.server.channel.local();
        h.client
            .endpoint
            .inject(from, frame_bytes(Event::generate(), &Notice { text: "hi".into() }));

        assert_eq!(h.runtime.run_once().unwrap(), 0);
        assert_eq!(h.runtime.fiber_count(), 1);
        assert_eq!(h.client.endpoint.pending(), 0);
    }

    #[test]
    fn test_partial_trailing_frame_dropped() {
        let h = harness();
        let event = Event::generate();
        let reply = Rc::new(RefCell::new(None));
        let (channel, r) = (h.client.channel.clone(), reply.clone());
        h.runtime
            .spawn(move || *r.borrow_mut() = Some(channel.receive::<Pong>(event)))
            .unwrap();

        let whole = frame_bytes(event, &Pong { n: 9 });
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&whole);
        buf.extend_from_slice(&whole[..whole.len() / 2]);
        h.client.endpoint.inject(h.server.channel.local(), buf.freeze());

        assert_eq!(h.runtime.run_once().unwrap(), 1);
        assert!(matches!(reply.borrow_mut().take(), Some(Ok(Pong { n: 9 }))));
    }

    #[test]
    fn test_current_session_follows_fiber() {
        let h = harness();
        let server = h.server.channel.clone();
        let runtime = h.runtime.clone();
        h.network
            .register(move |ping: Ping, _: &Session| {
                // Later requests arrive while this handler sleeps
                runtime.sleep(Duration::from_millis(5 * (4 - ping.n as u64)))?;
                server.reply(&Pong { n: ping.n * 10 }, None)
            })
            .unwrap();

        let replies: Vec<_> = (1..=3)
            .map(|n| spawn_call::<Pong>(&h, Ping { n }))
            .collect();
        let done = || replies.iter().all(|r| r.borrow().is_some());
        assert!(h.runtime.run_until(LIMIT, done).unwrap());

        for (n, reply) in (1..=3).zip(&replies) {
            let pong = reply.borrow_mut().take().unwrap().unwrap();
            assert_eq!(pong, Pong { n: n * 10 });
        }
        assert!(h.network.current_session().is_none());
    }

    #[test]
    fn test_reply_without_session() {
        let h = harness();
        assert!(matches!(
            h.client.channel.reply(&Pong { n: 0 }, None),
            Err(NetError::NoSession)
        ));
        assert!(matches!(
            h.client.channel.receive::<Pong>(Event::generate()),
            Err(NetError::Sched(skein_core::SchedError::WaitFromProgram))
        ));
    }

    #[test]
    fn test_disconnected_channel_refuses_sends() {
        let h = harness();
        h.client.endpoint.disconnect();
        assert!(h.client.channel.is_closed());

        let reply = spawn_call::<Pong>(&h, Ping { n: 0 });
        assert!(matches!(
            reply.borrow_mut().take(),
            Some(Err(NetError::Disconnected))
        ));
    }

    #[test]
    fn test_local_wake_interrupts_receive() {
        let h = harness();
        let event = Event::generate();
        let slot: Slot<Pong> = Rc::default();
        let (channel, s) = (h.client.channel.clone(), slot.clone());
        h.runtime
            .spawn(move || *s.borrow_mut() = Some(channel.receive::<Pong>(event)))
            .unwrap();

        let rt = h.runtime.clone();
        h.runtime
            .spawn(move || {
                rt.sleep(Duration::from_millis(5)).unwrap();
                rt.awaken(event, None);
            })
            .unwrap();

        assert!(h.runtime.run_until(LIMIT, || slot.borrow().is_some()).unwrap());
        let outcome = slot.borrow_mut().take().unwrap();
        assert!(matches!(outcome, Err(NetError::Interrupted(e)) if e == event));
        assert!(h.runtime.waiting().is_empty());
    }

    #[test]
    fn test_lost_request_leaves_caller_parked() {
        let h = harness();
        h.network
            .register(|ping: Ping, session: &Session| session.reply(&Pong { n: ping.n }))
            .unwrap();
        h.client.endpoint.drop_next_writes(1);

        let lost = spawn_call::<Pong>(&h, Ping { n: 1 });
        let delivered = spawn_call::<Pong>(&h, Ping { n: 2 });
        assert!(h.runtime.run_until(LIMIT, || delivered.borrow().is_some()).unwrap());
        assert!(!h
            .runtime
            .run_until(Duration::from_millis(20), || lost.borrow().is_some())
            .unwrap());
        assert_eq!(h.runtime.waiting().len(), 1);
    }
}
