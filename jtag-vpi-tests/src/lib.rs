//! Fixtures shared by the integration tests: a server driven on its own thread
//! against a simple signal-level scan chain.
use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use jtag_vpi_protocol::{EdgeCell, TapMode};
use jtag_vpi_server::{ObservedSignal, SignalRequest, TapModel, server::Builder};

pub const IDCODE: u32 = 0x4BA0_0477;

/// SF0 cells seen by a [`BypassChain`], shared with the test thread.
pub type CellLog = Arc<Mutex<Vec<EdgeCell>>>;

/// A chain of bypass registers. TDO lags TDI by one clock per device; with no
/// devices TDO follows TDI directly.
#[derive(Debug)]
pub struct BypassChain {
    registers: VecDeque<bool>,
    tdo: bool,
    tckc_high: bool,
    tmsc: bool,
    mode: TapMode,
    cells: Option<CellLog>,
}

impl BypassChain {
    pub fn new(devices: usize) -> BypassChain {
        BypassChain {
            registers: VecDeque::from(vec![false; devices]),
            tdo: false,
            tckc_high: false,
            tmsc: false,
            mode: TapMode::Jtag,
            cells: None,
        }
    }

    /// Like [`BypassChain::new`], additionally logging every two-wire cell:
    /// TMSC on the rising TCKC edge paired with TMSC on the falling one.
    pub fn recording(devices: usize) -> (BypassChain, CellLog) {
        let cells = CellLog::default();
        let chain = BypassChain {
            cells: Some(Arc::clone(&cells)),
            ..BypassChain::new(devices)
        };
        (chain, cells)
    }

    fn clock(&mut self, tdi: bool) {
        self.registers.push_back(tdi);
        if let Some(out) = self.registers.pop_front() {
            self.tdo = out;
        }
    }
}

impl TapModel for BypassChain {
    fn apply(&mut self, request: &SignalRequest) -> ObservedSignal {
        if self.mode != request.mode_select {
            self.mode = request.mode_select;
            self.tckc_high = false;
        }
        if request.tck_pulse {
            self.clock(request.tdi);
        }
        if request.tckc_toggle {
            self.tckc_high = !self.tckc_high;
            if self.tckc_high {
                self.tmsc = request.tms;
            } else {
                self.clock(request.tdi);
                if let Some(cells) = &self.cells
                    && let Ok(mut cells) = cells.lock()
                {
                    cells.push(EdgeCell::new(self.tmsc, request.tdi));
                }
            }
        }
        self.observe()
    }

    fn observe(&self) -> ObservedSignal {
        ObservedSignal {
            tdo: self.tdo,
            tdo_enable: true,
            idcode: IDCODE,
            active_mode: self.mode,
        }
    }
}

/// A server bound to an ephemeral port and stepped on a background thread
/// until dropped.
pub struct ServerThread {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ServerThread {
    pub fn spawn(
        builder: Builder,
        mut model: impl TapModel + Send + 'static,
    ) -> io::Result<ServerThread> {
        let mut server = builder.bind("127.0.0.1:0")?;
        let addr = server.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut idle = 0u32;
            while !stop_flag.load(Ordering::Relaxed) {
                server.step(&mut model);
                // Let the client threads run
                idle += 1;
                if idle % 64 == 0 {
                    thread::sleep(Duration::from_micros(10));
                }
            }
        });
        Ok(ServerThread {
            addr,
            stop,
            handle: Some(handle),
        })
    }

    /// Spawns a default-configured server in front of a direct loopback.
    pub fn loopback() -> io::Result<ServerThread> {
        Self::spawn(Builder::new(), BypassChain::new(0))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for ServerThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[test]
fn bypass_chain_delays_tdi() {
    let mut chain = BypassChain::new(2);
    let tdo: Vec<bool> = [true, false, true, true]
        .into_iter()
        .map(|tdi| chain.apply(&SignalRequest::tck_pulse(false, tdi)).tdo)
        .collect();
    assert_eq!(tdo, [false, false, true, false]);
}

#[test]
fn bypass_chain_clocks_on_falling_tckc() {
    let mut chain = BypassChain::new(0);
    let rising = SignalRequest {
        mode_select: TapMode::Cjtag,
        ..SignalRequest::tckc_toggle(true, false)
    };
    let falling = SignalRequest {
        mode_select: TapMode::Cjtag,
        ..SignalRequest::tckc_toggle(false, true)
    };
    assert!(!chain.apply(&rising).tdo);
    let observed = chain.apply(&falling);
    assert!(observed.tdo);
    assert_eq!(observed.active_mode, TapMode::Cjtag);
}

#[test]
fn recording_chain_pairs_edges_into_cells() {
    let (mut chain, cells) = BypassChain::recording(0);
    chain.apply(&SignalRequest::tckc_toggle(true, false));
    chain.apply(&SignalRequest::tckc_toggle(false, true));
    chain.apply(&SignalRequest::tckc_toggle(false, false));
    chain.apply(&SignalRequest::tckc_toggle(false, false));
    assert_eq!(
        *cells.lock().unwrap(),
        vec![EdgeCell::new(true, true), EdgeCell::new(false, false)]
    );
}
