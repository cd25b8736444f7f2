//! Identifier types: fibers, correlation events and resource keys

use core::fmt;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Handle to a fiber owned by a runtime.
///
/// The index addresses a slot in the runtime's fiber arena and the
/// generation is bumped every time that slot is reused, so a stale id
/// never resolves to a different fiber.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId {
    index: u32,
    generation: u32,
}

impl FiberId {
    /// Sentinel value indicating no fiber
    pub const NONE: FiberId = FiberId {
        index: u32::MAX,
        generation: 0,
    };

    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        FiberId { index, generation }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == u32::MAX
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberId(NONE)")
        } else {
            write!(f, "FiberId({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "-")
        } else {
            write!(f, "{}.{}", self.index, self.generation)
        }
    }
}

/// 64-bit correlation token.
///
/// A request carries one of these and its reply echoes it back, which is
/// how the caller's parked fiber is found again. Zero is reserved.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Event(u64);

impl Event {
    /// Reserved "no event" token
    pub const NULL: Event = Event(0);

    /// Mint a fresh token.
    ///
    /// Tokens start from a per-process random offset so two peers minting
    /// concurrently do not collide on the wire.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        static SEED: OnceLock<u64> = OnceLock::new();

        let seed = *SEED.get_or_init(|| {
            let mut hasher = RandomState::new().build_hasher();
            hasher.write_u32(std::process::id());
            hasher.finish()
        });

        loop {
            let token = seed.wrapping_add(COUNTER.fetch_add(1, Ordering::Relaxed));
            if token != 0 {
                return Event(token);
            }
        }
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Event(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({:#018x})", self.0)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Opaque identity of something a fiber can park on.
///
/// Derived from an address; only equality is meaningful.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ResourceKey(usize);

impl ResourceKey {
    /// Key identifying `resource` by address.
    #[inline]
    pub fn of<T: ?Sized>(resource: &T) -> Self {
        ResourceKey(resource as *const T as *const () as usize)
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        ResourceKey(raw)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({:#x})", self.0)
    }
}
