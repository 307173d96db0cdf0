//! # JTAG VPI Protocol Library
//!
//! Wire formats spoken between a debug host (for example OpenOCD's `jtag_vpi`
//! driver) and a simulated JTAG adapter, plus the pure IEEE 1149.7 OScan1
//! building blocks a host needs to drive a two-wire (cJTAG) target.
//!
//! ## Dialects
//!
//! Three framings share one TCP port. They all start with an 8-byte prefix
//! whose first byte is the opcode:
//!
//! | Dialect | Command | Response | Length field |
//! |---|---|---|---|
//! | [`Dialect::OpenOcdMinimal`] | 8 B header, payload packets follow | 4 B status, raw TDO | BE, LE if BE is out of range |
//! | [`Dialect::OpenOcdFull`] | 1036 B frame | 1036 B frame | LE |
//! | [`Dialect::Legacy`] | 8 B header, payload packets follow | 4 B status, raw TDO | BE |
//!
//! The 1036-byte frame is `cmd: u32`, `buffer_out: [u8; 512]`,
//! `buffer_in: [u8; 512]`, `length: u32`, `nb_bits: u32`.
//!
//! ## Opcodes
//!
//! - `0` reset, `1` TMS sequence, `2` scan
//! - `3` mode query in the header dialects, scan with TMS raised on the last bit in full frames
//! - `4` stop (not defined by the legacy dialect)
//! - `5` OScan1 edge cell (full frames only)
//!
//! ## Basic Usage
//!
//! ### Decoding a header
//!
//! ```
//! use jtag_vpi_protocol::{Command, Dialect};
//!
//! let header = [2, 0, 0, 0, 0, 0, 0, 16];
//! let command = Command::decode(Dialect::Legacy, &header).expect("Header should decode");
//! // TMS and TDI (2 bytes each) follow the header
//! assert_eq!(command.streamed_payload_len(), 4);
//! ```
//!
//! ### Encoding an OpenOCD frame
//!
//! ```
//! use jtag_vpi_protocol::{Command, Dialect, EdgeCell};
//!
//! let mut out = Vec::new();
//! Command::OScan1Edge(EdgeCell::new(true, false))
//!     .write_to(Dialect::OpenOcdFull, &mut out)
//!     .expect("Writing to vector shouldn't fail");
//! assert_eq!(out.len(), 1036);
//! assert_eq!(&out[..5], &[5, 0, 0, 0, 0b10]);
//! ```
//!
//! ### OScan1 helpers
//!
//! ```
//! use jtag_vpi_protocol::oscan1::{JScanCommand, crc8};
//!
//! assert_eq!(JScanCommand::SfSelect.packet(false), vec![true, false, true, false, false]);
//! assert_eq!(crc8(&[0xAA, 0x55, 0xFF]), 0x5A);
//! ```
//!
//! ## Error Handling
//!
//! Decoding returns [`error::DecodeError`]; the blocking reader helpers
//! return [`error::ReadError`], which also carries I/O failures.
//!
//! ## Features
//!
//! - `tokio`: `tokio_util::codec` implementations for OpenOCD frames and
//!   status responses in the `framed` module.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
#[cfg(feature = "tokio")]
pub mod framed;
pub mod oscan1;
