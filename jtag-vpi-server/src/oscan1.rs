use jtag_vpi_protocol::{EdgeCell, TapMode};

use crate::signals::{SignalMailbox, SignalRequest};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Sf0Phase {
    /// The rising edge carrying TMS has been posted.
    AwaitingTmsEdge,
    /// The falling edge carrying TDI has been posted.
    AwaitingTdiEdge,
}

/// One Scanning Format 0 cell on the two-wire transport.
#[derive(Debug)]
pub(crate) struct Sf0Edge {
    cell: EdgeCell,
    phase: Sf0Phase,
}

impl Sf0Edge {
    /// Switches the transport to cJTAG and posts the TMS edge.
    pub fn start(cell: EdgeCell, mailbox: &mut SignalMailbox) -> Sf0Edge {
        mailbox.select_mode(TapMode::Cjtag);
        mailbox.post(SignalRequest::tckc_toggle(cell.tms, false));
        Sf0Edge {
            cell,
            phase: Sf0Phase::AwaitingTmsEdge,
        }
    }

    pub fn phase(&self) -> Sf0Phase {
        self.phase
    }

    /// Returns the captured TDO once the TDI edge has been consumed.
    pub fn step(&mut self, mailbox: &mut SignalMailbox) -> Option<bool> {
        if !mailbox.is_consumed() {
            return None;
        }
        match self.phase {
            Sf0Phase::AwaitingTmsEdge => {
                mailbox.post(SignalRequest::tckc_toggle(false, self.cell.tdi));
                self.phase = Sf0Phase::AwaitingTdiEdge;
                None
            }
            Sf0Phase::AwaitingTdiEdge => Some(mailbox.observed().tdo),
        }
    }
}
