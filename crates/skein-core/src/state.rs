//! Fiber state, wait reasons and lifecycle phases

use core::fmt;

use crate::id::{Event, ResourceKey};

/// State of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FiberState {
    /// Allocated but not yet handed to the scheduler
    #[default]
    Unknown = 0,

    /// Currently executing; exactly one fiber is Active at a time
    Active = 1,

    /// Parked, waiting for an event, a resource or the scheduler
    Suspended = 2,

    /// Parked but eligible to be resumed by the next scheduling pass
    Awaken = 3,

    /// Body returned; awaiting cleanup
    Completed = 4,
}

impl FiberState {
    /// Suspended or Awaken: the states a fiber may hold while registered
    #[inline]
    pub const fn is_parked(&self) -> bool {
        matches!(self, FiberState::Suspended | FiberState::Awaken)
    }

    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, FiberState::Awaken)
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FiberState::Unknown => "unknown",
            FiberState::Active => "active",
            FiberState::Suspended => "suspended",
            FiberState::Awaken => "awaken",
            FiberState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Why a parked fiber is parked, with the key it parked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    #[default]
    None,
    Event(Event),
    Resource(ResourceKey),
    /// Parked behind another fiber; the program fiber while a pass runs
    Fiber,
}

/// Discriminant of [`Wait`] without the key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    None,
    WaitingOnEvent,
    WaitingOnResource,
    WaitingOnFiber,
}

impl Wait {
    pub const fn kind(&self) -> WaitKind {
        match self {
            Wait::None => WaitKind::None,
            Wait::Event(_) => WaitKind::WaitingOnEvent,
            Wait::Resource(_) => WaitKind::WaitingOnResource,
            Wait::Fiber => WaitKind::WaitingOnFiber,
        }
    }

    #[inline]
    pub fn is_event(&self, event: Event) -> bool {
        matches!(self, Wait::Event(e) if *e == event)
    }

    #[inline]
    pub fn is_resource(&self, key: ResourceKey) -> bool {
        matches!(self, Wait::Resource(k) if *k == key)
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wait::None => f.write_str("none"),
            Wait::Event(e) => write!(f, "event {}", e),
            Wait::Resource(k) => write!(f, "resource {:#x}", k.as_usize()),
            Wait::Fiber => f.write_str("fiber"),
        }
    }
}

/// Points in a fiber's life at which registered phase handlers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// First activation of a fiber, just before its first Restore
    Initialize,
    /// The fiber is about to be switched away from
    Save,
    /// The fiber was switched back into
    Restore,
    /// The fiber is being destroyed or the runtime torn down
    Clean,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
