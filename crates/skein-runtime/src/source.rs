//! Readiness sources polled by the host loop

/// Something the host loop polls once per tick, such as a transport
/// with buffered inbound datagrams.
///
/// Sources are polled from the program fiber outside a scheduling pass,
/// so they may spawn fibers and awaken waiting ones.
pub trait EventSource {
    /// Deliver whatever is ready. Returns how many events were handled.
    fn poll(&self) -> usize;
}
