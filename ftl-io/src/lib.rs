//! FTL I/O and Platform Abstraction
//!
//! UDP socket wrapper and timing utilities used by the media runtime.

pub mod socket;
pub mod time;

pub use socket::{bind_addr_for, MediaSocket, SocketError};
pub use time::{Clock, LeakyBucket, ManualClock, SystemClock, Timer};
