//! # Stuck-at Model
//!
//! Drives TDO to a constant level, as a broken or missing scan chain would.
use jtag_vpi_protocol::TapMode;
use jtag_vpi_server::{ObservedSignal, SignalRequest, TapModel};

#[derive(Debug)]
pub struct StuckModel {
    level: bool,
    idcode: u32,
    mode: TapMode,
}

impl StuckModel {
    pub fn new(level: bool, idcode: u32) -> StuckModel {
        StuckModel {
            level,
            idcode,
            mode: TapMode::Jtag,
        }
    }
}

impl TapModel for StuckModel {
    fn apply(&mut self, request: &SignalRequest) -> ObservedSignal {
        self.mode = request.mode_select;
        self.observe()
    }

    fn observe(&self) -> ObservedSignal {
        ObservedSignal {
            tdo: self.level,
            tdo_enable: true,
            idcode: self.idcode,
            active_mode: self.mode,
        }
    }
}

#[test]
fn tdo_ignores_tdi() {
    let mut model = StuckModel::new(true, 0);
    assert!(model.apply(&SignalRequest::tck_pulse(false, false)).tdo);
    assert!(model.apply(&SignalRequest::tck_pulse(true, true)).tdo);
}
