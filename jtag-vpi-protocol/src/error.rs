use std::io;

use crate::protocol::Dialect;

/// Reasons a frame is rejected by the decoder.
///
/// All of these are protocol violations: the frame is discarded, the
/// connection stays usable.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid opcode 0x{0:02x}")]
    InvalidOpcode(u32),
    #[error("Opcode 0x{opcode:02x} is not defined for the {dialect} dialect")]
    UnsupportedOpcode { opcode: u8, dialect: Dialect },
    #[error("Bit count {got} outside of 1..={max}")]
    BitCountOutOfRange { got: u32, max: u32 },
    #[error("Length {got} exceeds the maximum of {max}")]
    LengthOutOfRange { got: u32, max: u32 },
    #[error("Frame has {got} bytes, expected {expected}")]
    FrameSize { expected: usize, got: usize },
}

/// Errors that may occur when reading a frame from a blocking stream.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("{0}")]
    Decode(#[from] DecodeError),
}
