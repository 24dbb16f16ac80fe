//! Windowing operators
//!
//! Window instances are half-open: an event on a boundary belongs to the
//! window starting there. Two families are supported:
//!
//! - **Hopping** `(size, period)`: fixed windows `[k·period, k·period + size)`;
//!   tumbling windows are hopping windows with `period == size`.
//! - **Session** `(timeout, max_duration)`: events less than `timeout` apart
//!   merge into one session, capped at `max_duration` from its first event.
//!
//! Windowed aggregates are grouped by a [`KeySelector`](crate::expr::KeySelector)
//! and only emitted once a punctuation proves the window can no longer change.

pub mod assigner;
mod hopping;
mod session;

pub use assigner::HoppingAssigner;
pub use hopping::HoppingWindowOperator;
pub use session::SessionWindowOperator;

use crate::error::{WindowError, WindowResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Window definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowSpec {
    Hopping { size: i64, period: i64 },
    Session { timeout: i64, max_duration: Option<i64> },
}

impl WindowSpec {
    /// Non-overlapping windows of `size` ticks
    pub fn tumbling(size: i64) -> Self {
        WindowSpec::Hopping { size, period: size }
    }

    /// Windows of `size` ticks starting every `period` ticks
    pub fn hopping(size: i64, period: i64) -> Self {
        WindowSpec::Hopping { size, period }
    }

    pub fn session(timeout: i64) -> Self {
        WindowSpec::Session {
            timeout,
            max_duration: None,
        }
    }

    pub fn session_with_max(timeout: i64, max_duration: i64) -> Self {
        WindowSpec::Session {
            timeout,
            max_duration: Some(max_duration),
        }
    }

    /// Validate the window parameters
    pub fn validate(&self) -> WindowResult<()> {
        match *self {
            WindowSpec::Hopping { size, period } => {
                if size <= 0 {
                    return Err(WindowError::InvalidWindowSize { size });
                }
                if period <= 0 {
                    return Err(WindowError::InvalidPeriod { period });
                }
            }
            WindowSpec::Session {
                timeout,
                max_duration,
            } => {
                if timeout <= 0 {
                    return Err(WindowError::InvalidTimeout { timeout });
                }
                if let Some(max_duration) = max_duration {
                    if max_duration < timeout {
                        return Err(WindowError::InvalidMaxDuration {
                            max_duration,
                            timeout,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn is_session(&self) -> bool {
        matches!(self, WindowSpec::Session { .. })
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Hopping { size, period } if size == period => write!(f, "tumbling({})", size),
            WindowSpec::Hopping { size, period } => write!(f, "hopping({}, {})", size, period),
            WindowSpec::Session {
                timeout,
                max_duration: None,
            } => write!(f, "session({})", timeout),
            WindowSpec::Session {
                timeout,
                max_duration: Some(max),
            } => write!(f, "session({}, max {})", timeout, max),
        }
    }
}

/// Shape of hopping window results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowOutput {
    /// Valid from the window's close until the next window closes
    #[default]
    Interval,
    /// A point at the window's close
    Point,
}

impl fmt::Display for WindowOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowOutput::Interval => f.write_str("interval"),
            WindowOutput::Point => f.write_str("point"),
        }
    }
}
