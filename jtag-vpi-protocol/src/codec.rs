/// Encode and decode implementations for the protocol frames
use std::io::{self, Read, Write};

use crate::{
    error::{DecodeError, ReadError},
    protocol::{
        Command, Dialect, EdgeCell, FULL_FRAME_SIZE, HEADER_SIZE, MAX_OPCODE, MAX_PAYLOAD_LEN,
        MAX_SCAN_BITS, ResponseCode, STATUS_SIZE, StatusResponse, TapMode, VPI_BUFFER_SIZE,
        VpiFrame, opcode,
    },
};

const CMD_OFFSET: usize = 0;
const BUFFER_OUT_OFFSET: usize = 4;
const BUFFER_IN_OFFSET: usize = BUFFER_OUT_OFFSET + VPI_BUFFER_SIZE;
const LENGTH_OFFSET: usize = BUFFER_IN_OFFSET + VPI_BUFFER_SIZE;
const NB_BITS_OFFSET: usize = LENGTH_OFFSET + 4;

fn u32_le_at(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn check_opcode(cmd: u32) -> Result<u8, DecodeError> {
    if cmd > MAX_OPCODE as u32 {
        Err(DecodeError::InvalidOpcode(cmd))
    } else {
        Ok(cmd as u8)
    }
}

fn check_bits(num_bits: u32) -> Result<u32, DecodeError> {
    if num_bits == 0 || num_bits > MAX_SCAN_BITS {
        Err(DecodeError::BitCountOutOfRange {
            got: num_bits,
            max: MAX_SCAN_BITS,
        })
    } else {
        Ok(num_bits)
    }
}

fn check_length(length: u32) -> Result<(), DecodeError> {
    if length > MAX_PAYLOAD_LEN {
        Err(DecodeError::LengthOutOfRange {
            got: length,
            max: MAX_PAYLOAD_LEN,
        })
    } else {
        Ok(())
    }
}

fn invalid_input(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

impl VpiFrame {
    pub fn from_bytes(bytes: &[u8]) -> Result<VpiFrame, DecodeError> {
        if bytes.len() != FULL_FRAME_SIZE {
            return Err(DecodeError::FrameSize {
                expected: FULL_FRAME_SIZE,
                got: bytes.len(),
            });
        }
        let mut frame = VpiFrame {
            cmd: u32_le_at(bytes, CMD_OFFSET),
            length: u32_le_at(bytes, LENGTH_OFFSET),
            nb_bits: u32_le_at(bytes, NB_BITS_OFFSET),
            ..VpiFrame::default()
        };
        frame
            .buffer_out
            .copy_from_slice(&bytes[BUFFER_OUT_OFFSET..BUFFER_IN_OFFSET]);
        frame
            .buffer_in
            .copy_from_slice(&bytes[BUFFER_IN_OFFSET..LENGTH_OFFSET]);
        Ok(frame)
    }

    pub fn to_bytes(&self) -> Box<[u8]> {
        let mut bytes = vec![0u8; FULL_FRAME_SIZE];
        bytes[CMD_OFFSET..BUFFER_OUT_OFFSET].copy_from_slice(&self.cmd.to_le_bytes());
        bytes[BUFFER_OUT_OFFSET..BUFFER_IN_OFFSET].copy_from_slice(&self.buffer_out[..]);
        bytes[BUFFER_IN_OFFSET..LENGTH_OFFSET].copy_from_slice(&self.buffer_in[..]);
        bytes[LENGTH_OFFSET..NB_BITS_OFFSET].copy_from_slice(&self.length.to_le_bytes());
        bytes[NB_BITS_OFFSET..].copy_from_slice(&self.nb_bits.to_le_bytes());
        bytes.into_boxed_slice()
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<VpiFrame, ReadError> {
        let mut buf = vec![0u8; FULL_FRAME_SIZE];
        reader.read_exact(&mut buf)?;
        Ok(VpiFrame::from_bytes(&buf)?)
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }
}

impl StatusResponse {
    pub fn to_bytes(&self) -> [u8; STATUS_SIZE] {
        [
            self.code.as_u8(),
            self.tdo as u8,
            self.mode.as_u8(),
            self.status,
        ]
    }

    pub fn from_bytes(bytes: [u8; STATUS_SIZE]) -> StatusResponse {
        StatusResponse {
            code: if bytes[0] == 0 {
                ResponseCode::Ok
            } else {
                ResponseCode::Error
            },
            tdo: bytes[1] & 1 != 0,
            mode: TapMode::from_u8(bytes[2]),
            status: bytes[3],
        }
    }

    pub fn from_reader(reader: &mut impl Read) -> io::Result<StatusResponse> {
        let mut buf = [0u8; STATUS_SIZE];
        reader.read_exact(&mut buf)?;
        Ok(StatusResponse::from_bytes(buf))
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }
}

impl Command {
    /// Decodes one complete command frame of the given dialect.
    pub fn decode(dialect: Dialect, frame: &[u8]) -> Result<Command, DecodeError> {
        if frame.len() != dialect.command_size() {
            return Err(DecodeError::FrameSize {
                expected: dialect.command_size(),
                got: frame.len(),
            });
        }
        match dialect {
            Dialect::OpenOcdFull => Command::from_vpi_frame(&VpiFrame::from_bytes(frame)?),
            Dialect::OpenOcdMinimal | Dialect::Legacy => {
                let mut header = [0u8; HEADER_SIZE];
                header.copy_from_slice(frame);
                Command::from_header(dialect, &header)
            }
        }
    }

    /// Decodes the 8-byte header of the minimal or legacy dialect.
    ///
    /// Legacy lengths are big-endian. Minimal clients are not consistent about
    /// byte order, so a big-endian value that is out of range is re-read as
    /// little-endian.
    pub fn from_header(
        dialect: Dialect,
        header: &[u8; HEADER_SIZE],
    ) -> Result<Command, DecodeError> {
        let opcode = check_opcode(header[0] as u32)?;
        let raw_length = [header[4], header[5], header[6], header[7]];
        let length = match dialect {
            Dialect::Legacy => u32::from_be_bytes(raw_length),
            _ => {
                let big_endian = u32::from_be_bytes(raw_length);
                if big_endian <= MAX_PAYLOAD_LEN {
                    big_endian
                } else {
                    u32::from_le_bytes(raw_length)
                }
            }
        };

        match opcode {
            opcode::TMS_SEQ => Ok(Command::TmsSequence {
                num_bits: check_bits(length)?,
                tms: None,
            }),
            opcode::SCAN => Ok(Command::Scan {
                num_bits: check_bits(length)?,
                tdi: None,
                flip_last_tms: false,
            }),
            _ => {
                check_length(length)?;
                match opcode {
                    opcode::RESET => Ok(Command::Reset),
                    opcode::SET_PORT => Ok(Command::QueryMode),
                    opcode::STOP if dialect == Dialect::OpenOcdMinimal => Ok(Command::Stop),
                    opcode => Err(DecodeError::UnsupportedOpcode { opcode, dialect }),
                }
            }
        }
    }

    /// Decodes an OpenOCD frame.
    pub fn from_vpi_frame(frame: &VpiFrame) -> Result<Command, DecodeError> {
        let opcode = check_opcode(frame.cmd)?;
        match opcode {
            opcode::TMS_SEQ => {
                let num_bits = check_bits(frame.nb_bits)?;
                let num_bytes = num_bits.div_ceil(8) as usize;
                Ok(Command::TmsSequence {
                    num_bits,
                    tms: Some(frame.buffer_out[..num_bytes].into()),
                })
            }
            opcode::SCAN | opcode::SCAN_FLIP_LAST_TMS => {
                let num_bits = check_bits(frame.nb_bits)?;
                let num_bytes = num_bits.div_ceil(8) as usize;
                Ok(Command::Scan {
                    num_bits,
                    tdi: Some(frame.buffer_out[..num_bytes].into()),
                    flip_last_tms: opcode == opcode::SCAN_FLIP_LAST_TMS,
                })
            }
            _ => {
                check_length(frame.length)?;
                match opcode {
                    opcode::RESET => Ok(Command::Reset),
                    opcode::STOP => Ok(Command::Stop),
                    opcode::OSCAN1 => Ok(Command::OScan1Edge(EdgeCell::from_byte(
                        frame.buffer_out[0],
                    ))),
                    opcode => Err(DecodeError::UnsupportedOpcode {
                        opcode,
                        dialect: Dialect::OpenOcdFull,
                    }),
                }
            }
        }
    }

    /// Encodes the 8-byte header of the minimal or legacy dialect. Lengths are written big-endian.
    pub fn to_header(&self) -> io::Result<[u8; HEADER_SIZE]> {
        let (code, length) = match self {
            Command::Reset => (opcode::RESET, 0),
            Command::TmsSequence { num_bits, .. } => (opcode::TMS_SEQ, *num_bits),
            Command::Scan {
                flip_last_tms: true,
                ..
            } => {
                return Err(invalid_input(
                    "Streamed dialects carry TMS explicitly and cannot flip the last bit",
                ));
            }
            Command::Scan { num_bits, .. } => (opcode::SCAN, *num_bits),
            Command::QueryMode => (opcode::SET_PORT, 0),
            Command::Stop => (opcode::STOP, 0),
            Command::OScan1Edge(_) => {
                return Err(invalid_input(
                    "Edge commands are only defined for OpenOCD frames",
                ));
            }
        };
        let mut header = [0u8; HEADER_SIZE];
        header[0] = code;
        header[4..].copy_from_slice(&length.to_be_bytes());
        Ok(header)
    }

    /// Encodes the command as an OpenOCD frame. Payloads must be inline.
    pub fn to_vpi_frame(&self) -> io::Result<VpiFrame> {
        fn with_payload(cmd: u8, num_bits: u32, payload: &[u8]) -> io::Result<VpiFrame> {
            if payload.len() > VPI_BUFFER_SIZE {
                return Err(invalid_input("Payload does not fit into an OpenOCD frame"));
            }
            let mut frame = VpiFrame {
                cmd: cmd as u32,
                length: payload.len() as u32,
                nb_bits: num_bits,
                ..VpiFrame::default()
            };
            frame.buffer_out[..payload.len()].copy_from_slice(payload);
            Ok(frame)
        }

        match self {
            Command::Reset => Ok(VpiFrame::echo(opcode::RESET as u32)),
            Command::TmsSequence {
                num_bits,
                tms: Some(tms),
            } => with_payload(opcode::TMS_SEQ, *num_bits, tms),
            Command::Scan {
                num_bits,
                tdi: Some(tdi),
                flip_last_tms,
            } => {
                let cmd = if *flip_last_tms {
                    opcode::SCAN_FLIP_LAST_TMS
                } else {
                    opcode::SCAN
                };
                with_payload(cmd, *num_bits, tdi)
            }
            Command::TmsSequence { tms: None, .. } | Command::Scan { tdi: None, .. } => Err(
                invalid_input("OpenOCD frames need the payload inside the frame"),
            ),
            Command::QueryMode => Err(invalid_input(
                "OpenOCD frames have no mode query, opcode 3 is a scan",
            )),
            Command::Stop => Ok(VpiFrame::echo(opcode::STOP as u32)),
            Command::OScan1Edge(cell) => with_payload(opcode::OSCAN1, 2, &[cell.to_byte()]),
        }
    }

    /// Writes the command in the framing of `dialect`.
    /// For streamed dialects only the header is written; payload packets are sent separately.
    pub fn write_to(&self, dialect: Dialect, writer: &mut impl Write) -> io::Result<()> {
        match dialect {
            Dialect::OpenOcdFull => self.to_vpi_frame()?.write_to(writer),
            Dialect::OpenOcdMinimal | Dialect::Legacy => writer.write_all(&self.to_header()?),
        }
    }
}
