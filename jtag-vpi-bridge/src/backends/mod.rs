//! # Signal Models
//!
//! Stand-ins for the simulated hardware, so the bridge can be run without a
//! simulator attached. They react to pins only and implement no TAP state machine.
pub mod loopback;
pub mod stuck;
