use std::fmt::Display;

/// Upper bound of a single scan or TMS sequence, in bits.
pub const MAX_SCAN_BITS: u32 = 4096;
/// Upper bound of the length field for commands that do not carry a bit count, in bytes.
pub const MAX_PAYLOAD_LEN: u32 = 4096;
/// Size of each payload buffer of an OpenOCD frame.
pub const VPI_BUFFER_SIZE: usize = 512;
/// Size of the 8-byte command header shared by every dialect.
pub const HEADER_SIZE: usize = 8;
/// Size of the status response of the minimal and legacy dialects.
pub const STATUS_SIZE: usize = 4;
/// Size of an OpenOCD `jtag_vpi` frame: `cmd`, `buffer_out`, `buffer_in`, `length`, `nb_bits`.
pub const FULL_FRAME_SIZE: usize = 4 + VPI_BUFFER_SIZE + VPI_BUFFER_SIZE + 4 + 4;
/// Highest opcode that is considered part of the protocol at all.
pub const MAX_OPCODE: u8 = 0x0F;

/// Command codes as they appear on the wire.
///
/// Opcode 3 is overloaded: the minimal and legacy dialects use it to query the
/// active transport mode, the OpenOCD dialect uses it for a scan that raises
/// TMS on the last bit.
pub mod opcode {
    pub const RESET: u8 = 0x00;
    pub const TMS_SEQ: u8 = 0x01;
    pub const SCAN: u8 = 0x02;
    pub const SET_PORT: u8 = 0x03;
    pub const SCAN_FLIP_LAST_TMS: u8 = 0x03;
    pub const STOP: u8 = 0x04;
    pub const OSCAN1: u8 = 0x05;
}

/// One of the three mutually incompatible framings spoken over a connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Dialect {
    /// 8-byte command, 4-byte status response; used by lightweight clients.
    OpenOcdMinimal,
    /// Fixed 1036-byte little-endian frames in both directions, as sent by
    /// OpenOCD's `jtag_vpi` driver.
    OpenOcdFull,
    /// 8-byte big-endian header followed by separate payload packets.
    Legacy,
}

impl Dialect {
    /// Number of bytes that make up one command frame.
    pub fn command_size(&self) -> usize {
        match self {
            Dialect::OpenOcdFull => FULL_FRAME_SIZE,
            Dialect::OpenOcdMinimal | Dialect::Legacy => HEADER_SIZE,
        }
    }

    /// Whether scan data travels as raw payload packets after the header
    /// instead of inside the command frame.
    pub fn streams_payload(&self) -> bool {
        !matches!(self, Dialect::OpenOcdFull)
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::OpenOcdMinimal => write!(f, "openocd-minimal"),
            Dialect::OpenOcdFull => write!(f, "openocd-full"),
            Dialect::Legacy => write!(f, "legacy"),
        }
    }
}

/// Transport the TAP is operated in.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TapMode {
    /// Four-wire IEEE 1149.1 (TCK, TMS, TDI, TDO).
    #[default]
    Jtag,
    /// Two-wire IEEE 1149.7 (TCKC, TMSC).
    Cjtag,
}

impl TapMode {
    pub fn as_u8(&self) -> u8 {
        match self {
            TapMode::Jtag => 0,
            TapMode::Cjtag => 1,
        }
    }

    /// Any non-zero value selects the two-wire transport.
    pub fn from_u8(value: u8) -> TapMode {
        if value == 0 {
            TapMode::Jtag
        } else {
            TapMode::Cjtag
        }
    }
}

impl Display for TapMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapMode::Jtag => write!(f, "JTAG"),
            TapMode::Cjtag => write!(f, "cJTAG"),
        }
    }
}

/// One Scanning Format 0 cell: TMS is driven on the rising TCKC edge,
/// TDI on the following falling edge.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EdgeCell {
    pub tms: bool,
    pub tdi: bool,
}

impl EdgeCell {
    const TDI_BIT: u8 = 0b01;
    const TMS_BIT: u8 = 0b10;

    pub fn new(tms: bool, tdi: bool) -> EdgeCell {
        EdgeCell { tms, tdi }
    }

    /// Packs the cell into the first payload byte of an OScan1 frame.
    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.tdi {
            byte |= Self::TDI_BIT;
        }
        if self.tms {
            byte |= Self::TMS_BIT;
        }
        byte
    }

    pub fn from_byte(byte: u8) -> EdgeCell {
        EdgeCell {
            tms: byte & Self::TMS_BIT != 0,
            tdi: byte & Self::TDI_BIT != 0,
        }
    }
}

#[test]
fn edge_cell_layout() {
    assert_eq!(EdgeCell::new(true, false).to_byte(), 0b10);
    assert_eq!(EdgeCell::new(false, true).to_byte(), 0b01);
    assert_eq!(EdgeCell::from_byte(0xFF), EdgeCell::new(true, true));
}

/// A command sent from the debug host to the server, independent of the dialect it arrived in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Drive the TAP into Test-Logic-Reset by clocking TMS high.
    Reset,
    /// Clock a TMS-only burst with TDI held low.
    TmsSequence {
        num_bits: u32,
        /// The TMS bits, or `None` when they follow the header as a payload packet.
        tms: Option<Box<[u8]>>,
    },
    /// Shift TMS/TDI into the scan chain and capture TDO.
    Scan {
        num_bits: u32,
        /// The TDI bits, or `None` when TMS and TDI follow the header as payload packets.
        tdi: Option<Box<[u8]>>,
        /// Raise TMS on the final bit to leave the shift state.
        flip_last_tms: bool,
    },
    /// Report the transport mode the hardware is currently operating in.
    QueryMode,
    /// Terminate the connection.
    Stop,
    /// Clock one two-wire SF0 cell and capture TDO.
    OScan1Edge(EdgeCell),
}

impl Command {
    /// Number of bytes the host sends after the header for this command in a streamed dialect.
    pub fn streamed_payload_len(&self) -> usize {
        match self {
            Command::TmsSequence {
                num_bits,
                tms: None,
            } => num_bits.div_ceil(8) as usize,
            Command::Scan {
                num_bits,
                tdi: None,
                ..
            } => 2 * num_bits.div_ceil(8) as usize,
            _ => 0,
        }
    }
}

#[test]
fn streamed_payload_sizes() {
    let scan = Command::Scan {
        num_bits: 13,
        tdi: None,
        flip_last_tms: false,
    };
    assert_eq!(scan.streamed_payload_len(), 4);
    let tms = Command::TmsSequence {
        num_bits: 9,
        tms: None,
    };
    assert_eq!(tms.streamed_payload_len(), 2);
    assert_eq!(Command::Reset.streamed_payload_len(), 0);
}

/// First byte of a status response.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseCode {
    Ok,
    Error,
}

impl ResponseCode {
    pub fn as_u8(&self) -> u8 {
        match self {
            ResponseCode::Ok => 0,
            ResponseCode::Error => 1,
        }
    }
}

/// The 4-byte response of the minimal and legacy dialects.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusResponse {
    pub code: ResponseCode,
    /// TDO level at the time the response was produced.
    pub tdo: bool,
    /// Transport mode reported by the hardware.
    pub mode: TapMode,
    pub status: u8,
}

impl StatusResponse {
    pub fn ok(tdo: bool, mode: TapMode) -> StatusResponse {
        StatusResponse {
            code: ResponseCode::Ok,
            tdo,
            mode,
            status: 0,
        }
    }

    pub fn error(tdo: bool, mode: TapMode) -> StatusResponse {
        StatusResponse {
            code: ResponseCode::Error,
            tdo,
            mode,
            status: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }
}

/// The fixed-size frame of OpenOCD's `jtag_vpi` protocol, used for both commands and responses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VpiFrame {
    pub cmd: u32,
    /// Host to server payload (TDI bits, TMS bits or an edge cell).
    pub buffer_out: Box<[u8; VPI_BUFFER_SIZE]>,
    /// Server to host payload (captured TDO).
    pub buffer_in: Box<[u8; VPI_BUFFER_SIZE]>,
    /// Payload length in bytes.
    pub length: u32,
    pub nb_bits: u32,
}

impl Default for VpiFrame {
    fn default() -> Self {
        VpiFrame {
            cmd: 0,
            buffer_out: Box::new([0; VPI_BUFFER_SIZE]),
            buffer_in: Box::new([0; VPI_BUFFER_SIZE]),
            length: 0,
            nb_bits: 0,
        }
    }
}

impl VpiFrame {
    /// A response that only echoes the command code.
    pub fn echo(cmd: u32) -> VpiFrame {
        VpiFrame {
            cmd,
            ..VpiFrame::default()
        }
    }

    /// A response carrying the TDO bits captured during a scan.
    /// `tdo` must not be longer than [`VPI_BUFFER_SIZE`].
    pub fn scan_response(cmd: u32, num_bits: u32, tdo: &[u8]) -> VpiFrame {
        let mut frame = VpiFrame {
            cmd,
            length: tdo.len() as u32,
            nb_bits: num_bits,
            ..VpiFrame::default()
        };
        frame.buffer_in[..tdo.len()].copy_from_slice(tdo);
        frame
    }

    /// The response to a two-wire edge command.
    pub fn edge_response(tdo: bool) -> VpiFrame {
        let mut frame = VpiFrame {
            cmd: opcode::OSCAN1 as u32,
            length: 1,
            nb_bits: 2,
            ..VpiFrame::default()
        };
        frame.buffer_in[0] = tdo as u8;
        frame
    }
}
