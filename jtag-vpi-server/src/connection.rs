use std::{fmt::Display, io, thread};

use jtag_vpi_protocol::{
    Command, Dialect, HEADER_SIZE, StatusResponse, VpiFrame, error::DecodeError, opcode,
};

use crate::{
    buffer::{FrameBuffer, TxBuffer},
    detect::detect,
    error::ConnectionError,
    link::{Link, is_transient},
    oscan1::Sf0Edge,
    scan::{ResetSequence, ScanOperation, ScanPhase},
    server::Config,
    signals::SignalMailbox,
};

/// The single command a connection is currently executing.
#[derive(Debug)]
pub(crate) enum Operation {
    Idle,
    Reset(ResetSequence),
    TmsSequence(ScanOperation),
    Scan { scan: ScanOperation, opcode: u8 },
    OScan1(Sf0Edge),
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Idle => write!(f, "idle"),
            Operation::Reset(_) => write!(f, "reset"),
            Operation::TmsSequence(sequence) => {
                write!(f, "TMS sequence of {} bits ({:?})", sequence.num_bits(), sequence.phase())
            }
            Operation::Scan { scan, .. } => {
                write!(f, "scan of {} bits ({:?})", scan.num_bits(), scan.phase())
            }
            Operation::OScan1(edge) => write!(f, "OScan1 edge ({:?})", edge.phase()),
        }
    }
}

/// Reads whatever is available. `Ok(0)` means nothing arrived yet.
fn read_some(link: &mut impl Link, buf: &mut [u8]) -> Result<usize, ConnectionError> {
    if buf.is_empty() {
        return Ok(0);
    }
    match link.read(buf) {
        Ok(0) => Err(ConnectionError::Closed),
        Ok(n) => Ok(n),
        Err(err) if is_transient(&err) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

/// Per-client protocol state. [`Connection::poll`] is the only mutating entry point.
#[derive(Debug)]
pub(crate) struct Connection<L: Link> {
    link: L,
    dialect: Option<Dialect>,
    rx: FrameBuffer,
    tx: TxBuffer,
    operation: Operation,
    config: Config,
}

impl<L: Link> Connection<L> {
    pub fn new(link: L, config: &Config) -> Connection<L> {
        let frame_size = config
            .dialect
            .map_or(HEADER_SIZE, |dialect| dialect.command_size());
        Connection {
            link,
            dialect: config.dialect,
            rx: FrameBuffer::with_size(frame_size),
            tx: TxBuffer::default(),
            operation: Operation::Idle,
            config: config.clone(),
        }
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    #[cfg(test)]
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        matches!(self.operation, Operation::Idle) && !self.tx.is_pending()
    }

    /// Performs at most one transmit attempt, one receive attempt and one
    /// state machine step.
    pub fn poll(&mut self, mailbox: &mut SignalMailbox) -> Result<(), ConnectionError> {
        if self.tx.is_pending() {
            self.flush_once()?;
            if self.tx.is_pending() {
                return Ok(());
            }
        }
        match &mut self.operation {
            Operation::Idle => self.receive_command(mailbox),
            Operation::Reset(reset) => {
                if reset.step(mailbox) {
                    log::debug!("Reset sequence complete");
                    self.operation = Operation::Idle;
                }
                Ok(())
            }
            Operation::TmsSequence(_) | Operation::Scan { .. } => self.poll_scan(mailbox),
            Operation::OScan1(edge) => {
                if let Some(tdo) = edge.step(mailbox) {
                    log::trace!("OScan1 edge captured TDO={}", tdo as u8);
                    self.tx.queue(&VpiFrame::edge_response(tdo).to_bytes());
                    self.operation = Operation::Idle;
                }
                Ok(())
            }
        }
    }

    fn poll_scan(&mut self, mailbox: &mut SignalMailbox) -> Result<(), ConnectionError> {
        let (scan, response_cmd) = match &mut self.operation {
            Operation::TmsSequence(sequence) => (sequence, None),
            Operation::Scan { scan, opcode } => (scan, Some(*opcode)),
            _ => return Ok(()),
        };
        if let Some(unreceived) = scan.unreceived_mut() {
            let n = read_some(&mut self.link, unreceived)?;
            if n > 0 {
                scan.received(n);
            }
            return Ok(());
        }

        scan.step(mailbox);
        match scan.phase() {
            ScanPhase::SendingTdo => {
                let streams_payload = self.dialect.is_none_or(|dialect| dialect.streams_payload());
                if streams_payload {
                    self.tx.queue(scan.tdo());
                } else {
                    let cmd = response_cmd.unwrap_or(opcode::SCAN) as u32;
                    let frame = VpiFrame::scan_response(cmd, scan.num_bits(), scan.tdo());
                    self.tx.queue(&frame.to_bytes());
                }
                scan.finish();
                log::debug!("Scan complete");
                self.operation = Operation::Idle;
            }
            ScanPhase::Done => {
                log::debug!("TMS sequence complete");
                self.operation = Operation::Idle;
            }
            _ => {}
        }
        Ok(())
    }

    fn receive_command(&mut self, mailbox: &mut SignalMailbox) -> Result<(), ConnectionError> {
        let n = read_some(&mut self.link, self.rx.unfilled_mut())?;
        if n == 0 {
            return Ok(());
        }
        self.rx.advance(n);
        if !self.rx.is_complete() {
            return Ok(());
        }

        let dialect = match self.dialect {
            Some(dialect) => dialect,
            None => {
                let dialect = self.detect_dialect();
                self.dialect = Some(dialect);
                if dialect.command_size() > self.rx.filled() {
                    self.rx.resize(dialect.command_size());
                    return Ok(());
                }
                dialect
            }
        };

        let decoded = Command::decode(dialect, self.rx.frame());
        self.rx.clear();
        match decoded {
            Ok(command) => self.dispatch(dialect, command, mailbox),
            Err(err) => self.reject(dialect, err, mailbox),
        }
    }

    fn detect_dialect(&mut self) -> Dialect {
        let mut peeked = [0u8; 1];
        let more_queued = matches!(self.link.peek(&mut peeked), Ok(n) if n > 0);
        let mut prefix = [0u8; HEADER_SIZE];
        prefix.copy_from_slice(&self.rx.frame()[..HEADER_SIZE]);
        let dialect = detect(&prefix, more_queued);
        log::info!("Detected {} dialect", dialect);
        dialect
    }

    fn dispatch(
        &mut self,
        dialect: Dialect,
        command: Command,
        mailbox: &mut SignalMailbox,
    ) -> Result<(), ConnectionError> {
        let bit_order = self.config.bit_order;
        match command {
            Command::Reset => {
                log::debug!("Received Reset");
                self.acknowledge(dialect, opcode::RESET, mailbox)?;
                self.operation = Operation::Reset(ResetSequence::new());
            }
            Command::TmsSequence { num_bits, tms } => {
                log::debug!("Received TmsSequence: num_bits={}", num_bits);
                self.acknowledge(dialect, opcode::TMS_SEQ, mailbox)?;
                let sequence = match tms {
                    Some(tms) => {
                        log::trace!("TMS data: {:02x?}", &tms[..]);
                        ScanOperation::tms_inline(num_bits, &tms, bit_order)
                    }
                    None => ScanOperation::tms_streamed(num_bits, bit_order),
                };
                self.operation = Operation::TmsSequence(sequence);
            }
            Command::Scan {
                num_bits,
                tdi,
                flip_last_tms,
            } => {
                log::debug!(
                    "Received Scan: num_bits={}, flip_last_tms={}",
                    num_bits,
                    flip_last_tms
                );
                let (scan, opcode) = match tdi {
                    Some(tdi) => {
                        log::trace!("TDI data: {:02x?}", &tdi[..]);
                        let scan_opcode = if flip_last_tms {
                            opcode::SCAN_FLIP_LAST_TMS
                        } else {
                            opcode::SCAN
                        };
                        (
                            ScanOperation::inline(num_bits, &tdi, flip_last_tms, bit_order),
                            scan_opcode,
                        )
                    }
                    None => {
                        self.acknowledge(dialect, opcode::SCAN, mailbox)?;
                        (ScanOperation::streamed(num_bits, bit_order), opcode::SCAN)
                    }
                };
                self.operation = Operation::Scan { scan, opcode };
            }
            Command::QueryMode => {
                let observed = *mailbox.observed();
                log::debug!("Received QueryMode, active mode is {}", observed.active_mode);
                self.send_status(StatusResponse::ok(observed.tdo, observed.active_mode))?;
            }
            Command::Stop => {
                log::info!("Received Stop");
                return Err(ConnectionError::Stopped);
            }
            Command::OScan1Edge(cell) => {
                log::debug!("Received OScan1 edge: tms={}, tdi={}", cell.tms as u8, cell.tdi as u8);
                self.operation = Operation::OScan1(Sf0Edge::start(cell, mailbox));
            }
        }
        Ok(())
    }

    /// Confirms a command before it executes: a status response in the header
    /// dialects, an echo frame otherwise.
    fn acknowledge(
        &mut self,
        dialect: Dialect,
        opcode: u8,
        mailbox: &SignalMailbox,
    ) -> Result<(), ConnectionError> {
        if dialect.streams_payload() {
            let observed = mailbox.observed();
            self.send_status(StatusResponse::ok(observed.tdo, observed.active_mode))
        } else {
            self.tx.queue(&VpiFrame::echo(opcode as u32).to_bytes());
            Ok(())
        }
    }

    fn reject(
        &mut self,
        dialect: Dialect,
        err: DecodeError,
        mailbox: &SignalMailbox,
    ) -> Result<(), ConnectionError> {
        log::warn!("Rejecting {} frame: {}", dialect, err);
        if dialect.streams_payload() {
            let observed = mailbox.observed();
            self.send_status(StatusResponse::error(observed.tdo, observed.active_mode))
        } else {
            Ok(())
        }
    }

    /// Queues a status response and tries to get it out right away.
    ///
    /// A full socket buffer is retried a bounded number of times. Whatever is
    /// left afterwards stays queued for the following polls.
    fn send_status(&mut self, status: StatusResponse) -> Result<(), ConnectionError> {
        log::trace!("Sending status {:02x?}", status.to_bytes());
        self.tx.queue(&status.to_bytes());
        let mut retries = 0;
        while self.tx.is_pending() {
            if self.flush_once()? {
                continue;
            }
            if retries >= self.config.send_retry_limit {
                log::warn!(
                    "Status response has {} unsent bytes after {} retries",
                    self.tx.unsent().len(),
                    retries
                );
                break;
            }
            retries += 1;
            thread::sleep(self.config.send_retry_delay);
        }
        Ok(())
    }

    /// Returns whether any bytes were written.
    fn flush_once(&mut self) -> Result<bool, ConnectionError> {
        match self.link.write(self.tx.unsent()) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => {
                self.tx.advance(n);
                Ok(true)
            }
            Err(err) if is_transient(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn log_close(&self, reason: &ConnectionError) {
        let dialect = self
            .dialect
            .map_or_else(|| "unknown".to_string(), |dialect| dialect.to_string());
        log::info!(
            "Closing connection ({}): dialect={}, rx_buffered={}, tx_unsent={}, operation={}",
            reason,
            dialect,
            self.rx.filled(),
            self.tx.unsent().len(),
            self.operation
        );
    }
}

#[cfg(test)]
mod test {
    use std::{io::ErrorKind, time::Duration};

    use jtag_vpi_protocol::{
        Command, Dialect, EdgeCell, FULL_FRAME_SIZE, StatusResponse, TapMode, VpiFrame,
    };

    use super::Connection;
    use crate::{
        error::ConnectionError,
        link::mock::MockLink,
        server::Config,
        signals::{ObservedSignal, SignalMailbox, SignalRequest},
    };

    fn config() -> Config {
        Config {
            send_retry_delay: Duration::ZERO,
            ..Config::default()
        }
    }

    fn header(cmd: u8, length: u32) -> [u8; 8] {
        let mut header = [0u8; 8];
        header[0] = cmd;
        header[4..].copy_from_slice(&length.to_be_bytes());
        header
    }

    fn full_frame(command: Command) -> Vec<u8> {
        command.to_vpi_frame().unwrap().to_bytes().into_vec()
    }

    /// Polls like a driver whose model echoes TDI on TDO and follows the mode selection.
    fn drive(
        connection: &mut Connection<MockLink>,
        mailbox: &mut SignalMailbox,
        polls: usize,
    ) -> Result<Vec<SignalRequest>, ConnectionError> {
        let mut requests = Vec::new();
        for _ in 0..polls {
            connection.poll(mailbox)?;
            if let Some(request) = mailbox.take() {
                mailbox.observe(ObservedSignal {
                    tdo: request.tdi,
                    active_mode: request.mode_select,
                    ..ObservedSignal::default()
                });
                if request.has_stimulus() {
                    requests.push(request);
                }
            }
        }
        Ok(requests)
    }

    #[test]
    fn minimal_mode_query() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&header(3, 0));
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.dialect(), Some(Dialect::OpenOcdMinimal));
        assert_eq!(connection.link_mut().take_output(), vec![0, 0, 0, 0]);
        assert!(connection.is_idle());
    }

    #[test]
    fn header_arrives_in_pieces() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        let data = header(3, 0);
        connection.link_mut().push(&data[..3]);
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.dialect(), None);
        connection.link_mut().push(&data[3..]);
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.dialect(), Some(Dialect::OpenOcdMinimal));
        assert_eq!(connection.link_mut().take_output().len(), 4);
    }

    #[test]
    fn legacy_detected_from_first_byte() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&header(0x07, 0));
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.dialect(), Some(Dialect::Legacy));
        assert_eq!(connection.link_mut().take_output(), vec![1, 0, 0, 0]);

        // Legacy has no stop command
        connection.link_mut().push(&header(4, 0));
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![1, 0, 0, 0]);
    }

    #[test]
    fn full_reset_echoes_and_pulses() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&full_frame(Command::Reset));

        let requests = drive(&mut connection, &mut mailbox, 20).unwrap();
        assert_eq!(connection.dialect(), Some(Dialect::OpenOcdFull));
        let output = connection.link_mut().take_output();
        assert_eq!(output.len(), FULL_FRAME_SIZE);
        assert_eq!(VpiFrame::from_bytes(&output).unwrap(), VpiFrame::echo(0));
        assert_eq!(requests.len(), 6);
        assert!(requests.iter().all(|r| r.tms && r.tck_pulse));
        assert!(connection.is_idle());
    }

    #[test]
    fn reset_blocks_next_command() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&header(0, 0));
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![0, 0, 0, 0]);

        connection.link_mut().push(&header(3, 0));
        for _ in 0..5 {
            connection.poll(&mut mailbox).unwrap();
        }
        // The first pulse was never taken, so the query is still unread
        assert!(connection.link_mut().take_output().is_empty());

        let requests = drive(&mut connection, &mut mailbox, 10).unwrap();
        assert_eq!(requests.len(), 6);
        assert_eq!(connection.link_mut().take_output(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn minimal_scan_with_partial_io() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::with_chunk(3), &config());
        connection.link_mut().push(&header(2, 20));
        drive(&mut connection, &mut mailbox, 3).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![0, 0, 0, 0]);

        let tms = [0x00, 0x00, 0x08];
        let tdi = [0xDE, 0xAD, 0x0F];
        connection.link_mut().push(&tms);
        connection.link_mut().push(&tdi);
        let requests = drive(&mut connection, &mut mailbox, 100).unwrap();
        assert_eq!(requests.len(), 20);
        assert!(requests[19].tms);
        assert_eq!(connection.link_mut().take_output(), tdi.to_vec());
        assert!(connection.is_idle());
    }

    #[test]
    fn minimal_length_in_little_endian() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        let mut data = [0u8; 8];
        data[0] = 2;
        data[4..].copy_from_slice(&8u32.to_le_bytes());
        connection.link_mut().push(&data);
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![0, 0, 0, 0]);
        connection.link_mut().push(&[0x00, 0x5A]);
        drive(&mut connection, &mut mailbox, 20).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![0x5A]);
    }

    #[test]
    fn full_scan_with_flip() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::with_chunk(100), &config());
        connection.link_mut().push(&full_frame(Command::Scan {
            num_bits: 10,
            tdi: Some(vec![0x33, 0x02].into_boxed_slice()),
            flip_last_tms: true,
        }));
        let requests = drive(&mut connection, &mut mailbox, 200).unwrap();
        assert_eq!(requests.len(), 10);
        assert_eq!(requests.iter().filter(|r| r.tms).count(), 1);
        assert!(requests[9].tms);

        let frame = VpiFrame::from_bytes(&connection.link_mut().take_output()).unwrap();
        assert_eq!(frame.cmd, 3);
        assert_eq!(frame.length, 2);
        assert_eq!(frame.nb_bits, 10);
        assert_eq!(&frame.buffer_in[..2], &[0x33, 0x02]);
    }

    #[test]
    fn full_oscan1_edge() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let config = Config {
            dialect: Some(Dialect::OpenOcdFull),
            ..config()
        };
        let mut connection = Connection::new(MockLink::new(), &config);
        connection
            .link_mut()
            .push(&full_frame(Command::OScan1Edge(EdgeCell::new(true, true))));

        let requests = drive(&mut connection, &mut mailbox, 10).unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].tckc_toggle && requests[0].tms && !requests[0].tdi);
        assert!(requests[1].tckc_toggle && !requests[1].tms && requests[1].tdi);
        assert_eq!(mailbox.mode_select(), TapMode::Cjtag);

        let frame = VpiFrame::from_bytes(&connection.link_mut().take_output()).unwrap();
        assert_eq!(frame, VpiFrame::edge_response(true));
    }

    #[test]
    fn minimal_rejects_oscan1() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&header(5, 0));
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![1, 0, 0, 0]);
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn full_drops_invalid_frames() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let config = Config {
            dialect: Some(Dialect::OpenOcdFull),
            ..config()
        };
        let mut connection = Connection::new(MockLink::new(), &config);
        let invalid = VpiFrame {
            cmd: 2,
            nb_bits: 5000,
            ..VpiFrame::default()
        };
        connection.link_mut().push(&invalid.to_bytes());
        connection.link_mut().push(&full_frame(Command::Reset));
        let requests = drive(&mut connection, &mut mailbox, 20).unwrap();
        assert_eq!(requests.len(), 6);
        let output = connection.link_mut().take_output();
        assert_eq!(VpiFrame::from_bytes(&output).unwrap(), VpiFrame::echo(0));
    }

    #[test]
    fn rejected_scan_leaves_state_untouched() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&header(2, 0));
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![1, 0, 0, 0]);
        assert!(connection.is_idle());
        assert!(mailbox.is_consumed());
    }

    #[test]
    fn stop_ends_connection() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&header(4, 0));
        assert!(matches!(
            connection.poll(&mut mailbox),
            Err(ConnectionError::Stopped)
        ));
    }

    #[test]
    fn eof_and_fatal_errors() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.poll(&mut mailbox).unwrap();
        connection.link_mut().eof = true;
        assert!(matches!(
            connection.poll(&mut mailbox),
            Err(ConnectionError::Closed)
        ));

        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().fail_with = Some(ErrorKind::ConnectionReset);
        assert!(matches!(
            connection.poll(&mut mailbox),
            Err(ConnectionError::Io(err)) if err.kind() == ErrorKind::ConnectionReset
        ));
    }

    #[test]
    fn status_is_retried_until_written() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().blocked_writes = 5;
        connection.link_mut().push(&header(3, 0));
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn exhausted_retries_keep_status_queued() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        let config = Config {
            send_retry_limit: 2,
            ..config()
        };
        let mut connection = Connection::new(MockLink::new(), &config);
        connection.link_mut().blocked_writes = 4;
        connection.link_mut().push(&header(3, 0));
        connection.poll(&mut mailbox).unwrap();
        assert!(connection.link_mut().take_output().is_empty());
        assert!(!connection.is_idle());

        // one more blocked write on the next poll, then it goes out
        connection.poll(&mut mailbox).unwrap();
        connection.poll(&mut mailbox).unwrap();
        assert_eq!(connection.link_mut().take_output(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn query_reports_active_mode() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        mailbox.observe(ObservedSignal {
            tdo: true,
            active_mode: TapMode::Cjtag,
            ..ObservedSignal::default()
        });
        let mut connection = Connection::new(MockLink::new(), &config());
        connection.link_mut().push(&header(3, 0));
        connection.poll(&mut mailbox).unwrap();
        let status = connection.link_mut().take_output();
        assert_eq!(
            StatusResponse::from_bytes([status[0], status[1], status[2], status[3]]),
            StatusResponse::ok(true, TapMode::Cjtag)
        );
    }
}
