//! # Loopback Model
//!
//! TDO returns the TDI bit of the last clock cycle. On the two-wire transport
//! the TMSC level sampled on the falling TCKC edge is returned.
use jtag_vpi_protocol::TapMode;
use jtag_vpi_server::{ObservedSignal, SignalRequest, TapModel};

#[derive(Debug)]
pub struct LoopbackModel {
    idcode: u32,
    tdo: bool,
    tckc_high: bool,
    mode: TapMode,
}

impl LoopbackModel {
    pub fn new(idcode: u32) -> LoopbackModel {
        LoopbackModel {
            idcode,
            tdo: false,
            tckc_high: false,
            mode: TapMode::Jtag,
        }
    }
}

impl TapModel for LoopbackModel {
    fn apply(&mut self, request: &SignalRequest) -> ObservedSignal {
        if self.mode != request.mode_select {
            log::debug!("Model switching to {}", request.mode_select);
            self.mode = request.mode_select;
            self.tckc_high = false;
        }
        if request.tck_pulse {
            self.tdo = request.tdi;
        }
        if request.tckc_toggle {
            self.tckc_high = !self.tckc_high;
            if !self.tckc_high {
                // falling edge: TMSC carries TDI
                self.tdo = request.tdi;
            }
        }
        self.observe()
    }

    fn observe(&self) -> ObservedSignal {
        ObservedSignal {
            tdo: self.tdo,
            tdo_enable: true,
            idcode: self.idcode,
            active_mode: self.mode,
        }
    }
}
