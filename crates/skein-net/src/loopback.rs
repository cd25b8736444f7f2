//! In-memory transport
//!
//! A [`Loopback`] hub hands out endpoints on `127.0.0.1`, each with an
//! inbox the host loop drains on every tick. Writes land in the target's
//! inbox; nothing is delivered until the next poll, the way datagrams from
//! a socket would be.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::{Rc, Weak};

use bytes::Bytes;
use skein_runtime::EventSource;
use tracing::{debug, trace};

use crate::channel::{Channel, WeakChannel};
use crate::error::{NetError, NetResult};
use crate::network::Network;
use crate::transport::{Locus, Transport};

const FIRST_PORT: u16 = 40000;

type Hub = RefCell<HubState>;

struct HubState {
    endpoints: HashMap<Locus, Weak<LoopbackEndpoint>>,
    next_port: u16,
}

/// Hub connecting loopback endpoints.
#[derive(Clone)]
pub struct Loopback {
    hub: Rc<Hub>,
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Loopback {
    pub fn new() -> Self {
        Self {
            hub: Rc::new(RefCell::new(HubState {
                endpoints: HashMap::new(),
                next_port: FIRST_PORT,
            })),
        }
    }

    /// Open an endpoint served by `network`.
    ///
    /// The endpoint is polled by the network's runtime; the returned
    /// channel is the only strong handle to it, and dropping the channel
    /// makes the endpoint discard what it receives.
    pub fn open(&self, network: &Network) -> NetResult<(Channel, Rc<LoopbackEndpoint>)> {
        let locus = {
            let mut hub = self.hub.borrow_mut();
            let port = hub.next_port;
            hub.next_port = port
                .checked_add(1)
                .ok_or_else(|| NetError::Transport("loopback ports exhausted".into()))?;
            SocketAddr::from((Ipv4Addr::LOCALHOST, port))
        };

        let endpoint = Rc::new(LoopbackEndpoint {
            hub: Rc::downgrade(&self.hub),
            locus,
            inbox: RefCell::new(VecDeque::new()),
            channel: RefCell::new(None),
            drop_writes: Cell::new(0),
            connected: Cell::new(true),
        });
        let channel = Channel::new(network.clone(), endpoint.clone());
        endpoint.attach(&channel);

        self.hub
            .borrow_mut()
            .endpoints
            .insert(locus, Rc::downgrade(&endpoint));
        network.runtime().add_source(endpoint.clone());
        debug!(%locus, "loopback endpoint opened");
        Ok((channel, endpoint))
    }

    pub fn endpoint(&self, locus: Locus) -> Option<Rc<LoopbackEndpoint>> {
        self.hub.borrow().endpoints.get(&locus)?.upgrade()
    }

    pub fn len(&self) -> usize {
        self.hub.borrow().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One end of the loopback hub.
pub struct LoopbackEndpoint {
    hub: Weak<Hub>,
    locus: Locus,
    inbox: RefCell<VecDeque<(Locus, Bytes)>>,
    channel: RefCell<Option<WeakChannel>>,
    drop_writes: Cell<usize>,
    connected: Cell<bool>,
}

impl LoopbackEndpoint {
    fn attach(&self, channel: &Channel) {
        *self.channel.borrow_mut() = Some(channel.downgrade());
    }

    fn channel(&self) -> Option<Channel> {
        self.channel.borrow().as_ref()?.upgrade()
    }

    /// Queue raw bytes as if `from` had written them.
    pub fn inject(&self, from: Locus, bytes: Bytes) {
        self.inbox.borrow_mut().push_back((from, bytes));
    }

    /// Silently lose the next `count` outbound writes.
    pub fn drop_next_writes(&self, count: usize) {
        self.drop_writes.set(count);
    }

    /// Tear the link down and signal the channel.
    pub fn disconnect(&self) {
        if !self.connected.replace(false) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.borrow_mut().endpoints.remove(&self.locus);
        }
        self.inbox.borrow_mut().clear();
        if let Some(channel) = self.channel() {
            channel.on_disconnected();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Datagrams waiting to be polled
    pub fn pending(&self) -> usize {
        self.inbox.borrow().len()
    }
}

impl Transport for LoopbackEndpoint {
    fn local(&self) -> Locus {
        self.locus
    }

    fn write(&self, to: Locus, frame: Bytes) -> NetResult<()> {
        if !self.connected.get() {
            return Err(NetError::Disconnected);
        }
        let dropping = self.drop_writes.get();
        if dropping > 0 {
            self.drop_writes.set(dropping - 1);
            trace!(from = %self.locus, %to, len = frame.len(), "write dropped");
            return Ok(());
        }

        let hub = self.hub.upgrade().ok_or(NetError::Disconnected)?;
        let target = hub.borrow().endpoints.get(&to).and_then(Weak::upgrade);
        let target =
            target.ok_or_else(|| NetError::Transport(format!("no loopback endpoint at {}", to)))?;
        target.inject(self.locus, frame);
        Ok(())
    }
}

impl EventSource for LoopbackEndpoint {
    fn poll(&self) -> usize {
        let batch = std::mem::take(&mut *self.inbox.borrow_mut());
        if batch.is_empty() {
            return 0;
        }
        let Some(channel) = self.channel() else {
            trace!(locus = %self.locus, dropped = batch.len(), "no channel, discarding");
            return 0;
        };

        let mut handled = 0;
        for (from, bytes) in batch {
            handled += channel.on_readable(from, bytes);
        }
        handled
    }
}

impl fmt::Debug for LoopbackEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackEndpoint")
            .field("locus", &self.locus)
            .field("pending", &self.pending())
            .field("connected", &self.connected.get())
            .finish()
    }
}
