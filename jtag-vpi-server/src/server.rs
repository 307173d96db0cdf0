use std::{
    io::{self, ErrorKind},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use jtag_vpi_protocol::{Dialect, TapMode};

use crate::{
    TapModel,
    bits::BitOrder,
    connection::Connection,
    error::ConnectionError,
    signals::{ObservedSignal, SignalMailbox, SignalRequest},
};

#[derive(Debug, Clone)]
pub struct Config {
    /// Packing of scan bits into bytes.
    pub bit_order: BitOrder,
    /// Dialect to assume for every client. `None` detects it per connection.
    pub dialect: Option<Dialect>,
    /// Transport selected for the hardware until a client asks for another one.
    pub initial_mode: TapMode,
    pub send_retry_limit: u32,
    pub send_retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bit_order: BitOrder::LsbFirst,
            dialect: None,
            initial_mode: TapMode::Jtag,
            send_retry_limit: 1000,
            send_retry_delay: Duration::from_micros(100),
        }
    }
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```no_run
/// use jtag_vpi_server::{bits::BitOrder, server::Builder};
///
/// let server = Builder::new()
///     .bit_order(BitOrder::MsbFirst)
///     .bind("127.0.0.1:3333")
///     .expect("Port should be free");
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn bit_order(mut self, bit_order: BitOrder) -> Self {
        self.config.bit_order = bit_order;
        self
    }

    /// Skip detection and speak `dialect` with every client.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.config.dialect = Some(dialect);
        self
    }

    pub fn initial_mode(mut self, mode: TapMode) -> Self {
        self.config.initial_mode = mode;
        self
    }

    /// Set how often a status response is retried when the socket is full, and
    /// the pause in between.
    pub fn send_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.config.send_retry_limit = limit;
        self.config.send_retry_delay = delay;
        self
    }

    pub fn config(self) -> Config {
        self.config
    }

    /// Bind the listener and return the server
    pub fn bind(self, addr: impl ToSocketAddrs) -> io::Result<Server> {
        Server::bind(addr, self.config)
    }
}

/// A single-client JTAG VPI server that never blocks.
///
/// The driver calls [`Server::poll`] once per scheduling quantum and exchanges
/// signals through [`Server::get_pending_signals`] and [`Server::update_signals`].
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: Config,
    connection: Option<Connection<TcpStream>>,
    mailbox: SignalMailbox,
}

impl Server {
    pub fn bind(addr: impl ToSocketAddrs, config: Config) -> io::Result<Server> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        log::info!("Server listening on {}", listener.local_addr()?);
        log::debug!("{:?}", config);
        Ok(Server {
            listener,
            mailbox: SignalMailbox::new(config.initial_mode),
            config,
            connection: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Advances the server by one step. The listener is only polled while no client is connected.
    pub fn poll(&mut self) {
        match &mut self.connection {
            None => self.accept(),
            Some(connection) => {
                if let Err(err) = connection.poll(&mut self.mailbox) {
                    match &err {
                        ConnectionError::Io(io_err) => log::error!("Client error: {}", io_err),
                        ConnectionError::Closed | ConnectionError::Stopped => {}
                    }
                    connection.log_close(&err);
                    self.close_connection();
                }
            }
        }
    }

    fn accept(&mut self) {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                if let Err(err) = Self::prepare(&stream) {
                    log::error!("Could not configure connection from {}: {}", addr, err);
                    return;
                }
                log::info!("New client connection from {}", addr);
                self.connection = Some(Connection::new(stream, &self.config));
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(err) => log::error!("Connection error: {}", err),
        }
    }

    fn prepare(stream: &TcpStream) -> io::Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)
    }

    /// Drops the client together with every in-flight operation and both mailbox slots.
    fn close_connection(&mut self) {
        self.connection = None;
        self.mailbox.reset();
    }

    /// Reports the signals observed after the driver stepped the model. Last write wins.
    pub fn update_signals(
        &mut self,
        tdo: bool,
        tdo_enable: bool,
        idcode: u32,
        active_mode: TapMode,
    ) {
        self.mailbox.observe(ObservedSignal {
            tdo,
            tdo_enable,
            idcode,
            active_mode,
        });
    }

    /// Takes the next stimulus for the model, if any.
    pub fn get_pending_signals(&mut self) -> Option<SignalRequest> {
        self.mailbox.take()
    }

    pub fn is_client_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Dialect of the connected client, once detected.
    pub fn dialect(&self) -> Option<Dialect> {
        self.connection.as_ref().and_then(|connection| connection.dialect())
    }

    pub fn mode_select(&self) -> TapMode {
        self.mailbox.mode_select()
    }

    pub fn observed(&self) -> &ObservedSignal {
        self.mailbox.observed()
    }

    /// One driver step: poll, hand the pending request to `model` and report what it observed.
    pub fn step(&mut self, model: &mut (impl TapModel + ?Sized)) {
        self.poll();
        let observed = match self.get_pending_signals() {
            Some(request) => model.apply(&request),
            None => model.observe(),
        };
        self.mailbox.observe(observed);
    }
}
