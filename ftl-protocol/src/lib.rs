//! FTL Media Protocol Core
//!
//! Wire-level building blocks of the FTL media transport: RTP sequence
//! numbers and headers, audio and H.264 packetizers, RTCP generic NACK
//! feedback, the per-stream retransmission ring and receiver loss tracking.
//! Nothing here opens sockets or spawns threads.

pub mod buffer;
pub mod feedback;
pub mod loss;
pub mod packet;
pub mod packetizer;
pub mod sequence;

pub use buffer::{BufferError, PacingPolicy, RetransmitRing, Slot, SlotGuard, SlotRef};
pub use feedback::{FeedbackError, NackEntry, NackReport};
pub use loss::{Arrival, LossRange, LossTracker};
pub use packet::{PacketError, RtpHeader, RtpPacket};
pub use packetizer::{AudioPacketizer, Fragment, Packetized, RtpStreamState, VideoPacketizer};
pub use sequence::SeqNumber;
