//! # JTAG VPI Client
//!
//! A blocking Rust client for JTAG VPI servers, speaking any of the three
//! dialects the servers understand.
//!
//! ## Overview
//!
//! This crate plays the role of the debug host: it encodes commands, waits for
//! the server's responses and returns captured TDO. It is mainly used to test
//! servers and to drive simulated targets from scripts.
//!
//! ## Protocol Support
//!
//! - **Reset**: six TCK pulses with TMS high
//! - **TMS sequence**: clock a TMS-only burst
//! - **Scan**: shift TDI into the chain and capture TDO
//! - **Mode query**: ask for the transport the hardware operates in (header dialects only)
//! - **OScan1 edges**: two-wire SF0 cells, plus OAC and JScan helpers (OpenOCD frames only).
//!   SF0 payloads can be zero-stuffed and followed by a CRC-8
//!
//! OpenOCD servers drop malformed frames without answering. Use
//! [`VpiClient::with_timeout`] to turn such a silent drop into an error instead
//! of blocking forever.
//!
//! For the wire formats see the [`jtag_vpi_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use jtag_vpi_client::VpiClient;
//! use jtag_vpi_protocol::Dialect;
//!
//! let mut client = VpiClient::connect("127.0.0.1:3333", Dialect::OpenOcdMinimal)?;
//! client.reset()?;
//! // Shift 8 bits and leave Shift-DR on the last one
//! let tdo = client.scan(8, &[0xA5], true)?;
//! println!("TDO data: {:02x?}", tdo);
//! # Ok::<(), jtag_vpi_client::ClientError>(())
//! ```
//!
//! ### Two-wire targets
//!
//! ```no_run
//! use jtag_vpi_client::VpiClient;
//! use jtag_vpi_protocol::{Dialect, EdgeCell};
//!
//! let mut client = VpiClient::connect("127.0.0.1:3333", Dialect::OpenOcdFull)?;
//! client.oscan1_init()?;
//! let tdo = client.oscan1_edge(EdgeCell::new(false, true))?;
//! # Ok::<(), jtag_vpi_client::ClientError>(())
//! ```
use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use jtag_vpi_protocol::{
    Command, Dialect, EdgeCell, STATUS_SIZE, StatusResponse, TapMode, VpiFrame,
    error::{DecodeError, ReadError},
    opcode,
    oscan1::{
        INIT_SEQUENCE, JScanCommand, OAC_EDGES, ScanningFormat, StuffedBit, crc8, insert_zeros,
        msb_first_bits, pack_msb_first,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("Server rejected the command: {0:?}")]
    Rejected(StatusResponse),
    #[error("Expected a response to command {expected}, got {got}")]
    UnexpectedResponse { expected: u32, got: u32 },
}

impl From<ReadError> for ClientError {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::IoError(err) => ClientError::Io(err),
            ReadError::Decode(err) => ClientError::Decode(err),
        }
    }
}

fn last_bit_mask(num_bits: u32, msb_first: bool) -> (usize, u8) {
    let index = num_bits as usize - 1;
    let mask = if msb_first {
        0x80 >> (index % 8)
    } else {
        1 << (index % 8)
    };
    (index / 8, mask)
}

/// JTAG VPI client for remote scan operations.
///
/// All calls block until the server answers. In the OpenOCD dialect a frame
/// the server cannot decode is dropped with no reply, so without a read
/// timeout the call that sent it never returns.
pub struct VpiClient {
    tcp: TcpStream,
    dialect: Dialect,
    msb_first: bool,
    parity: bool,
    zero_insertion: bool,
    crc: bool,
    oscan_enabled: bool,
    format: ScanningFormat,
}

impl VpiClient {
    pub fn connect(addr: impl ToSocketAddrs, dialect: Dialect) -> io::Result<VpiClient> {
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        Ok(VpiClient {
            tcp,
            dialect,
            msb_first: false,
            parity: false,
            zero_insertion: false,
            crc: false,
            oscan_enabled: false,
            format: ScanningFormat::Sf0,
        })
    }

    /// Pack scan bits MSB first. Must match the server's configuration.
    pub fn with_msb_first(mut self, msb_first: bool) -> Self {
        self.msb_first = msb_first;
        self
    }

    /// Append an even parity bit to JScan commands.
    pub fn with_parity(mut self, parity: bool) -> Self {
        self.parity = parity;
        self
    }

    /// Insert a zero cell after five consecutive TDI ones in [`VpiClient::sf0_scan`].
    pub fn with_zero_insertion(mut self, zero_insertion: bool) -> Self {
        self.zero_insertion = zero_insertion;
        self
    }

    /// Follow every [`VpiClient::sf0_scan`] payload with a CRC-8 of its TDI bits.
    pub fn with_crc(mut self, crc: bool) -> Self {
        self.crc = crc;
        self
    }

    /// Give up waiting for a response after `timeout`. A call that times out
    /// fails with [`io::ErrorKind::WouldBlock`] or [`io::ErrorKind::TimedOut`],
    /// depending on the platform.
    pub fn with_timeout(self, timeout: Option<Duration>) -> io::Result<Self> {
        self.tcp.set_read_timeout(timeout)?;
        Ok(self)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn read_status(&mut self) -> Result<StatusResponse, ClientError> {
        let status = StatusResponse::from_reader(&mut self.tcp)?;
        log::trace!("Received status {:02x?}", status.to_bytes());
        if status.is_ok() {
            Ok(status)
        } else {
            Err(ClientError::Rejected(status))
        }
    }

    fn read_frame(&mut self, expected: u8) -> Result<VpiFrame, ClientError> {
        let frame = VpiFrame::from_reader(&mut self.tcp)?;
        if frame.cmd != expected as u32 {
            return Err(ClientError::UnexpectedResponse {
                expected: expected as u32,
                got: frame.cmd,
            });
        }
        Ok(frame)
    }

    /// Sends `command` and waits for its confirmation.
    fn send_acknowledged(&mut self, command: &Command, code: u8) -> Result<(), ClientError> {
        command.write_to(self.dialect, &mut self.tcp)?;
        if self.dialect.streams_payload() {
            self.read_status()?;
        } else {
            self.read_frame(code)?;
        }
        Ok(())
    }

    /// Drive the TAP into Test-Logic-Reset.
    pub fn reset(&mut self) -> Result<(), ClientError> {
        log::debug!("Sending Reset");
        self.send_acknowledged(&Command::Reset, opcode::RESET)
    }

    /// Clock `num_bits` TMS bits with TDI held low.
    pub fn tms_sequence(&mut self, num_bits: u32, tms: &[u8]) -> Result<(), ClientError> {
        log::debug!("Sending TmsSequence: num_bits={}", num_bits);
        let num_bytes = num_bits.div_ceil(8) as usize;
        let tms = tms.get(..num_bytes).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "TMS vector shorter than num_bits")
        })?;
        if self.dialect.streams_payload() {
            self.send_acknowledged(&Command::TmsSequence { num_bits, tms: None }, opcode::TMS_SEQ)?;
            self.tcp.write_all(tms)?;
            Ok(())
        } else {
            let command = Command::TmsSequence {
                num_bits,
                tms: Some(tms.into()),
            };
            self.send_acknowledged(&command, opcode::TMS_SEQ)
        }
    }

    /// Shift `num_bits` of `tdi` and return the captured TDO.
    ///
    /// TMS stays low; with `exit_shift` it is raised on the last bit.
    pub fn scan(
        &mut self,
        num_bits: u32,
        tdi: &[u8],
        exit_shift: bool,
    ) -> Result<Box<[u8]>, ClientError> {
        if self.dialect.streams_payload() {
            let mut tms = vec![0u8; num_bits.div_ceil(8) as usize];
            if exit_shift && num_bits > 0 {
                let (byte, mask) = last_bit_mask(num_bits, self.msb_first);
                tms[byte] |= mask;
            }
            return self.scan_with_tms(num_bits, &tms, tdi);
        }

        log::debug!("Sending Scan: num_bits={}, exit_shift={}", num_bits, exit_shift);
        let num_bytes = num_bits.div_ceil(8) as usize;
        let command = Command::Scan {
            num_bits,
            tdi: Some(tdi[..num_bytes.min(tdi.len())].into()),
            flip_last_tms: exit_shift,
        };
        command.write_to(self.dialect, &mut self.tcp)?;
        let expected = if exit_shift {
            opcode::SCAN_FLIP_LAST_TMS
        } else {
            opcode::SCAN
        };
        let frame = self.read_frame(expected)?;
        let len = (frame.length as usize).min(frame.buffer_in.len());
        Ok(frame.buffer_in[..len].into())
    }

    /// Shift with an explicit TMS vector. Only the header dialects carry TMS per bit.
    pub fn scan_with_tms(
        &mut self,
        num_bits: u32,
        tms: &[u8],
        tdi: &[u8],
    ) -> Result<Box<[u8]>, ClientError> {
        if !self.dialect.streams_payload() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "OpenOCD frames do not carry a TMS vector",
            )
            .into());
        }
        log::debug!("Sending Scan: num_bits={}", num_bits);
        let num_bytes = num_bits.div_ceil(8) as usize;
        if tms.len() < num_bytes || tdi.len() < num_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "TMS and TDI vectors must hold num_bits",
            )
            .into());
        }
        let command = Command::Scan {
            num_bits,
            tdi: None,
            flip_last_tms: false,
        };
        self.send_acknowledged(&command, opcode::SCAN)?;
        log::trace!("Scan TMS data: {:02x?}", &tms[..num_bytes]);
        log::trace!("Scan TDI data: {:02x?}", &tdi[..num_bytes]);
        self.tcp.write_all(&tms[..num_bytes])?;
        self.tcp.write_all(&tdi[..num_bytes])?;

        let mut tdo = vec![0u8; num_bytes];
        self.tcp.read_exact(&mut tdo)?;
        log::trace!("Scan result TDO data: {:02x?}", &tdo[..]);
        Ok(tdo.into_boxed_slice())
    }

    /// Ask which transport the hardware currently operates in.
    pub fn query_mode(&mut self) -> Result<TapMode, ClientError> {
        Command::QueryMode.write_to(self.dialect, &mut self.tcp)?;
        Ok(self.read_status()?.mode)
    }

    /// Terminate the session. The server closes the connection without responding.
    pub fn stop(mut self) -> Result<(), ClientError> {
        log::debug!("Sending Stop");
        Command::Stop.write_to(self.dialect, &mut self.tcp)?;
        self.tcp.flush()?;
        let mut buf = [0u8; STATUS_SIZE];
        // The server answers by closing; anything else is unexpected
        match self.tcp.read(&mut buf) {
            Ok(0) => Ok(()),
            Ok(_) => Err(ClientError::UnexpectedResponse {
                expected: opcode::STOP as u32,
                got: buf[0] as u32,
            }),
            Err(err) if err.kind() == io::ErrorKind::ConnectionReset => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Clock one SF0 cell and return the captured TDO.
    pub fn oscan1_edge(&mut self, cell: EdgeCell) -> Result<bool, ClientError> {
        Command::OScan1Edge(cell).write_to(self.dialect, &mut self.tcp)?;
        let frame = self.read_frame(opcode::OSCAN1)?;
        Ok(frame.buffer_in[0] & 1 != 0)
    }

    /// Send the Online Activation Code: TMSC held high for [`OAC_EDGES`] cells.
    pub fn send_oac(&mut self) -> Result<(), ClientError> {
        log::debug!("Sending OAC");
        for _ in 0..OAC_EDGES {
            self.oscan1_edge(EdgeCell::new(true, true))?;
        }
        Ok(())
    }

    pub fn send_jscan(&mut self, command: JScanCommand) -> Result<(), ClientError> {
        log::debug!("Sending JScan {}", command);
        for bit in command.packet(self.parity) {
            self.oscan1_edge(EdgeCell::new(bit, bit))?;
        }
        Ok(())
    }

    /// Bring the target into SF0 operation: OAC, then the JScan init commands.
    pub fn oscan1_init(&mut self) -> Result<(), ClientError> {
        log::info!("Initializing OScan1");
        self.send_oac()?;
        for command in INIT_SEQUENCE {
            self.send_jscan(command)?;
        }
        self.oscan_enabled = true;
        self.format = ScanningFormat::Sf0;
        Ok(())
    }

    /// Take the target out of OScan1: JScan RESET followed by OSCAN_OFF.
    ///
    /// Nothing is sent unless [`VpiClient::oscan1_init`] ran before. Either way
    /// the client falls back to SF0.
    pub fn oscan1_reset(&mut self) -> Result<(), ClientError> {
        if self.oscan_enabled {
            log::info!("Resetting OScan1");
            self.send_jscan(JScanCommand::Reset)?;
            self.send_jscan(JScanCommand::OScanOff)?;
            self.oscan_enabled = false;
        }
        self.format = ScanningFormat::Sf0;
        Ok(())
    }

    /// Switch the scanning format: SF_SELECT followed by the two-bit format code.
    pub fn set_scanning_format(&mut self, format: ScanningFormat) -> Result<(), ClientError> {
        log::debug!("Selecting scanning format {}", format);
        self.send_jscan(JScanCommand::SfSelect)?;
        for bit in format.bits() {
            self.oscan1_edge(EdgeCell::new(bit, bit))?;
        }
        self.format = format;
        Ok(())
    }

    pub fn scanning_format(&self) -> ScanningFormat {
        self.format
    }

    /// Shift TMS/TDI pairs through SF0 cells and return the TDO of every pair.
    ///
    /// With CRC enabled the payload is followed by eight cells carrying the
    /// CRC-8 of the TDI bits. With zero insertion enabled a cell with TMS and
    /// TDI low follows every five consecutive TDI ones. TDO of the added cells
    /// is discarded.
    pub fn sf0_scan(&mut self, tms: &[bool], tdi: &[bool]) -> Result<Vec<bool>, ClientError> {
        if self.format != ScanningFormat::Sf0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Cannot shift SF0 cells while {} is selected", self.format),
            )
            .into());
        }
        let len = tms.len().min(tdi.len());
        let mut payload = tdi[..len].to_vec();
        if self.crc {
            let crc = crc8(&pack_msb_first(&payload));
            log::trace!("SF0 payload CRC {:#04x}", crc);
            payload.extend(msb_first_bits(&[crc]));
        }
        let stuffed = if self.zero_insertion {
            insert_zeros(payload)
        } else {
            payload
                .into_iter()
                .map(|value| StuffedBit {
                    value,
                    inserted: false,
                })
                .collect()
        };

        let mut tdo = Vec::with_capacity(len);
        let mut index = 0;
        for bit in stuffed {
            if bit.inserted {
                self.oscan1_edge(EdgeCell::new(false, false))?;
                continue;
            }
            let cell_tms = index < len && tms[index];
            let captured = self.oscan1_edge(EdgeCell::new(cell_tms, bit.value))?;
            if index < len {
                tdo.push(captured);
            }
            index += 1;
        }
        Ok(tdo)
    }
}

#[test]
fn last_bit_positions() {
    assert_eq!(last_bit_mask(8, false), (0, 0x80));
    assert_eq!(last_bit_mask(8, true), (0, 0x01));
    assert_eq!(last_bit_mask(9, false), (1, 0x01));
    assert_eq!(last_bit_mask(10, true), (1, 0x40));
}
