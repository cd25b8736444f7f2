//! Point-in-time dump of scheduler state

use std::fmt;

use skein_core::{FiberId, FiberState, Wait};

/// One fiber as seen by [`Snapshot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberSnapshot {
    pub id: FiberId,
    pub state: FiberState,
    pub wait: Wait,
    /// Environment keys, sorted
    pub environment: Vec<String>,
    pub sleeping: bool,
}

/// Scheduler state captured by `Runtime::snapshot`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub scheduling: bool,
    pub current: FiberId,
    pub program: FiberSnapshot,
    /// Registry contents, front first
    pub waiting: Vec<FiberSnapshot>,
    pub pooled: usize,
    pub timers: usize,
}

impl fmt::Display for FiberSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} wait={}", self.id, self.state, self.wait)?;
        if self.sleeping {
            f.write_str(" sleeping")?;
        }
        if !self.environment.is_empty() {
            write!(f, " env={:?}", self.environment)?;
        }
        Ok(())
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[Runtime] current={} scheduling={}",
            self.current, self.scheduling
        )?;
        writeln!(f, "  [Program] {}", self.program)?;
        if self.waiting.is_empty() {
            writeln!(f, "  [Waiting] none")?;
        } else {
            writeln!(f, "  [Waiting]")?;
            for fiber in &self.waiting {
                writeln!(f, "    [Fiber] {}", fiber)?;
            }
        }
        writeln!(f, "  [Pool] {}", self.pooled)?;
        write!(f, "  [Timers] {}", self.timers)
    }
}
