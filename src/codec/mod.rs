//! JBD frame codec: checksum, reassembly of notification chunks, and
//! decoding of validated frames.

mod checksum;
mod decoder;
mod frame;
mod reassembly;

pub use checksum::ChecksumCodec;
pub use decoder::FrameDecoder;
pub use frame::Frame;
pub use reassembly::{FrameOutcome, FrameReassembler};
