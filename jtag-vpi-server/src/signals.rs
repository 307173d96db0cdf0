//! The exchange between the server and the driver that owns the hardware model.
//!
//! The server posts at most one [`SignalRequest`] at a time. The driver takes
//! it, applies it to the model and reports the resulting [`ObservedSignal`].
//! A request counts as consumed once it has been taken.
use jtag_vpi_protocol::TapMode;

/// One elementary stimulus for the hardware model.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SignalRequest {
    pub tms: bool,
    pub tdi: bool,
    /// Transport the hardware should operate in.
    pub mode_select: TapMode,
    /// Pulse TCK once (four-wire transport).
    pub tck_pulse: bool,
    /// Toggle TCKC once (two-wire transport).
    pub tckc_toggle: bool,
}

impl SignalRequest {
    pub fn tck_pulse(tms: bool, tdi: bool) -> SignalRequest {
        SignalRequest {
            tms,
            tdi,
            tck_pulse: true,
            ..SignalRequest::default()
        }
    }

    pub fn tckc_toggle(tms: bool, tdi: bool) -> SignalRequest {
        SignalRequest {
            tms,
            tdi,
            tckc_toggle: true,
            ..SignalRequest::default()
        }
    }

    /// A request without clock activity that only carries the transport selection.
    pub fn mode_only(mode_select: TapMode) -> SignalRequest {
        SignalRequest {
            mode_select,
            ..SignalRequest::default()
        }
    }

    pub fn has_stimulus(&self) -> bool {
        self.tck_pulse || self.tckc_toggle
    }
}

/// Signals reported by the driver after stepping the model. Last write wins.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ObservedSignal {
    pub tdo: bool,
    pub tdo_enable: bool,
    pub idcode: u32,
    pub active_mode: TapMode,
}

#[derive(Debug)]
pub struct SignalMailbox {
    pending: Option<SignalRequest>,
    observed: ObservedSignal,
    mode_select: TapMode,
    initial_mode: TapMode,
}

impl SignalMailbox {
    pub fn new(initial_mode: TapMode) -> SignalMailbox {
        SignalMailbox {
            pending: None,
            observed: ObservedSignal::default(),
            mode_select: initial_mode,
            initial_mode,
        }
    }

    /// Posts the next request, stamped with the current mode selection.
    ///
    /// The previous request must have been consumed.
    pub fn post(&mut self, request: SignalRequest) {
        debug_assert!(
            self.pending.is_none(),
            "posted {:?} while {:?} is unconsumed",
            request,
            self.pending
        );
        log::trace!("Posting {:?}", request);
        self.pending = Some(SignalRequest {
            mode_select: self.mode_select,
            ..request
        });
    }

    pub fn is_consumed(&self) -> bool {
        self.pending.is_none()
    }

    /// Takes the pending request. Without one, a mode-only request is returned
    /// while the hardware runs in a different transport than selected.
    pub fn take(&mut self) -> Option<SignalRequest> {
        self.pending.take().or_else(|| {
            (self.mode_select != self.observed.active_mode)
                .then(|| SignalRequest::mode_only(self.mode_select))
        })
    }

    pub fn observe(&mut self, observed: ObservedSignal) {
        self.observed = observed;
    }

    pub fn observed(&self) -> &ObservedSignal {
        &self.observed
    }

    pub fn select_mode(&mut self, mode: TapMode) {
        if self.mode_select != mode {
            log::debug!("Selecting {} transport", mode);
            self.mode_select = mode;
        }
    }

    pub fn mode_select(&self) -> TapMode {
        self.mode_select
    }

    /// Drops the pending request and the last observation.
    pub fn reset(&mut self) {
        self.pending = None;
        self.observed = ObservedSignal::default();
        self.mode_select = self.initial_mode;
    }
}

#[cfg(test)]
mod test {
    use jtag_vpi_protocol::TapMode;

    use super::{ObservedSignal, SignalMailbox, SignalRequest};

    #[test]
    fn take_consumes_request() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        assert_eq!(mailbox.take(), None);
        mailbox.post(SignalRequest::tck_pulse(true, false));
        assert!(!mailbox.is_consumed());
        let request = mailbox.take().unwrap();
        assert!(request.tck_pulse && request.tms && !request.tdi);
        assert!(mailbox.is_consumed());
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn request_carries_mode_selection() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        mailbox.select_mode(TapMode::Cjtag);
        mailbox.post(SignalRequest::tckc_toggle(false, true));
        assert_eq!(mailbox.take().unwrap().mode_select, TapMode::Cjtag);
    }

    #[test]
    fn mode_only_request_until_hardware_follows() {
        let mut mailbox = SignalMailbox::new(TapMode::Cjtag);
        assert_eq!(
            mailbox.take(),
            Some(SignalRequest::mode_only(TapMode::Cjtag))
        );
        assert!(!mailbox.take().unwrap().has_stimulus());
        mailbox.observe(ObservedSignal {
            active_mode: TapMode::Cjtag,
            ..ObservedSignal::default()
        });
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn reset_restores_initial_mode() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        mailbox.select_mode(TapMode::Cjtag);
        mailbox.post(SignalRequest::tckc_toggle(true, true));
        mailbox.observe(ObservedSignal {
            tdo: true,
            ..ObservedSignal::default()
        });
        mailbox.reset();
        assert!(mailbox.is_consumed());
        assert_eq!(mailbox.mode_select(), TapMode::Jtag);
        assert_eq!(*mailbox.observed(), ObservedSignal::default());
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn double_post_is_a_logic_error() {
        let mut mailbox = SignalMailbox::new(TapMode::Jtag);
        mailbox.post(SignalRequest::tck_pulse(false, false));
        mailbox.post(SignalRequest::tck_pulse(false, false));
    }
}
