//! # JTAG VPI Server Library
//!
//! This crate lets a simulated JTAG or cJTAG target be debugged over TCP, as if
//! it were attached to a hardware debug adapter.
//!
//! ## Overview
//!
//! A debug host (for example OpenOCD with its `jtag_vpi` driver) connects to the
//! server and sends scan, TMS and reset commands. The server breaks every command
//! down into elementary signal requests (one TCK pulse or one TCKC edge each) and
//! hands them to the driver that owns the simulated hardware. The signals the
//! driver observes afterwards (TDO, IDCODE, active transport) flow back into the
//! responses the host expects.
//!
//! ## Architecture
//!
//! - **[`server::Server`]**: accepts one client at a time on a non-blocking
//!   listener and owns the connection state and the signal mailbox
//! - **[`signals`]**: the single-slot request and observation exchanged with the driver
//! - **[`TapModel`] Trait**: optional seam for drivers that want [`server::Server::step`]
//!   to perform the whole exchange
//!
//! The wire formats are provided by the [`jtag_vpi_protocol`] crate. The dialect
//! of a client is detected from its first 8 bytes unless configured.
//!
//! ## How It Works
//!
//! Every call to [`server::Server::poll`] performs at most one transmit attempt,
//! one receive attempt and one state machine step:
//!
//! 1. The driver calls `poll()` once per scheduling quantum
//! 2. A decoded command starts an operation that posts one signal request at a time
//! 3. The driver takes the request with `get_pending_signals()` and applies it to the model
//! 4. The driver reports the result with `update_signals()`
//! 5. The next `poll()` captures TDO and posts the next request
//!
//! ## Basic Usage
//!
//! ```no_run
//! use jtag_vpi_server::server::Builder;
//!
//! let mut server = Builder::new().bind("127.0.0.1:3333").expect("Port should be free");
//! loop {
//!     server.poll();
//!     if let Some(request) = server.get_pending_signals() {
//!         // apply the request to the hardware model here
//!         server.update_signals(request.tdi, true, 0x1000_0001, request.mode_select);
//!     }
//! }
//! ```
//!
//! ## Error Handling
//!
//! Malformed frames are rejected with an error status (or dropped with a warning
//! in the OpenOCD dialect) and leave all state untouched. Fatal socket errors, a
//! closed socket and the stop command tear the connection down; the server then
//! accepts the next client.
//!
//! ## Configuration
//!
//! Server behavior can be customized via [`server::Config`]:
//!
//! - **bit_order**: LSB-first (default) or MSB-first packing of scan bits
//! - **dialect**: force a dialect instead of detecting it
//! - **initial_mode**: transport selected before any client asks (default JTAG)
//! - **send_retry_limit** / **send_retry_delay**: budget for flushing status responses
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Connections are reported at
//! `info`, decoded commands at `debug` and payload data at `trace`.
//!
//! ## Thread Model
//!
//! Everything runs on the caller's thread. Nothing inside the server blocks
//! apart from the short, bounded status response retry.
pub mod bits;
mod buffer;
mod connection;
mod detect;
pub mod error;
mod link;
mod oscan1;
mod scan;
pub mod server;
pub mod signals;

pub use bits::BitOrder;
pub use scan::RESET_PULSES;
pub use signals::{ObservedSignal, SignalRequest};

/// A signal-level model of the hardware behind the server.
///
/// Implementations only react to pins; they are not expected to know anything
/// about the commands that produced the requests.
pub trait TapModel {
    /// Applies one request and returns the signals observed afterwards.
    ///
    /// A request without stimulus only carries the transport selection.
    fn apply(&mut self, request: &SignalRequest) -> ObservedSignal;

    /// Returns the current signals without changing anything.
    fn observe(&self) -> ObservedSignal;
}
