//! Four-wire engines: the reset sequence and the per-bit shifter used for
//! scans and TMS sequences.
use jtag_vpi_protocol::MAX_SCAN_BITS;

use crate::{
    bits::BitOrder,
    signals::{SignalMailbox, SignalRequest},
};

/// Number of TMS-high pulses that bring any TAP into Test-Logic-Reset.
pub const RESET_PULSES: u32 = 6;

#[derive(Debug)]
pub(crate) struct ResetSequence {
    remaining: u32,
}

impl ResetSequence {
    pub fn new() -> ResetSequence {
        ResetSequence {
            remaining: RESET_PULSES,
        }
    }

    /// Returns `true` once the last pulse has been consumed.
    pub fn step(&mut self, mailbox: &mut SignalMailbox) -> bool {
        if !mailbox.is_consumed() {
            return false;
        }
        if self.remaining == 0 {
            return true;
        }
        mailbox.post(SignalRequest::tck_pulse(true, false));
        self.remaining -= 1;
        false
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ScanKind {
    /// TMS and TDI are shifted, TDO is captured.
    Scan,
    /// TMS only; TDI is held low and nothing is captured.
    TmsOnly,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ScanPhase {
    ReceivingTms { received: usize },
    ReceivingTdi { received: usize },
    Processing { bit_index: u32 },
    /// All bits were clocked; captured TDO is ready to be handed to the host.
    SendingTdo,
    Done,
}

#[derive(Debug)]
pub(crate) struct ScanOperation {
    kind: ScanKind,
    num_bits: u32,
    tms: Box<[u8]>,
    tdi: Box<[u8]>,
    tdo: Box<[u8]>,
    phase: ScanPhase,
    bit_order: BitOrder,
}

impl ScanOperation {
    fn new(kind: ScanKind, num_bits: u32, phase: ScanPhase, bit_order: BitOrder) -> ScanOperation {
        debug_assert!((1..=MAX_SCAN_BITS).contains(&num_bits));
        let num_bytes = num_bits.div_ceil(8) as usize;
        ScanOperation {
            kind,
            num_bits,
            tms: vec![0; num_bytes].into_boxed_slice(),
            tdi: vec![0; num_bytes].into_boxed_slice(),
            tdo: vec![0; num_bytes].into_boxed_slice(),
            phase,
            bit_order,
        }
    }

    /// A scan whose TMS and TDI bytes still have to arrive as payload packets.
    pub fn streamed(num_bits: u32, bit_order: BitOrder) -> ScanOperation {
        Self::new(
            ScanKind::Scan,
            num_bits,
            ScanPhase::ReceivingTms { received: 0 },
            bit_order,
        )
    }

    /// A scan with TDI taken from a frame. TMS stays low except for the last
    /// bit when `flip_last_tms` is set.
    pub fn inline(
        num_bits: u32,
        tdi: &[u8],
        flip_last_tms: bool,
        bit_order: BitOrder,
    ) -> ScanOperation {
        let mut scan = Self::new(
            ScanKind::Scan,
            num_bits,
            ScanPhase::Processing { bit_index: 0 },
            bit_order,
        );
        let len = scan.tdi.len().min(tdi.len());
        scan.tdi[..len].copy_from_slice(&tdi[..len]);
        if flip_last_tms {
            bit_order.set(&mut scan.tms, num_bits as usize - 1, true);
        }
        scan
    }

    /// A TMS sequence whose bits still have to arrive as a payload packet.
    pub fn tms_streamed(num_bits: u32, bit_order: BitOrder) -> ScanOperation {
        Self::new(
            ScanKind::TmsOnly,
            num_bits,
            ScanPhase::ReceivingTms { received: 0 },
            bit_order,
        )
    }

    pub fn tms_inline(num_bits: u32, tms: &[u8], bit_order: BitOrder) -> ScanOperation {
        let mut sequence = Self::new(
            ScanKind::TmsOnly,
            num_bits,
            ScanPhase::Processing { bit_index: 0 },
            bit_order,
        );
        let len = sequence.tms.len().min(tms.len());
        sequence.tms[..len].copy_from_slice(&tms[..len]);
        sequence
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn tdo(&self) -> &[u8] {
        &self.tdo
    }

    /// The part of the payload packet that has not been received yet.
    pub fn unreceived_mut(&mut self) -> Option<&mut [u8]> {
        match self.phase {
            ScanPhase::ReceivingTms { received } => Some(&mut self.tms[received..]),
            ScanPhase::ReceivingTdi { received } => Some(&mut self.tdi[received..]),
            _ => None,
        }
    }

    pub fn received(&mut self, n: usize) {
        let num_bytes = self.tms.len();
        self.phase = match self.phase {
            ScanPhase::ReceivingTms { received } if received + n < num_bytes => {
                ScanPhase::ReceivingTms {
                    received: received + n,
                }
            }
            ScanPhase::ReceivingTms { .. } => {
                log::trace!("TMS payload: {:02x?}", &self.tms[..]);
                match self.kind {
                    ScanKind::Scan => ScanPhase::ReceivingTdi { received: 0 },
                    ScanKind::TmsOnly => ScanPhase::Processing { bit_index: 0 },
                }
            }
            ScanPhase::ReceivingTdi { received } if received + n < num_bytes => {
                ScanPhase::ReceivingTdi {
                    received: received + n,
                }
            }
            ScanPhase::ReceivingTdi { .. } => {
                log::trace!("TDI payload: {:02x?}", &self.tdi[..]);
                ScanPhase::Processing { bit_index: 0 }
            }
            other => other,
        };
    }

    /// Advances by at most one TCK pulse.
    ///
    /// Nothing happens while the previous pulse is unconsumed. Otherwise the TDO
    /// for the previous bit is captured and the next bit is posted.
    pub fn step(&mut self, mailbox: &mut SignalMailbox) {
        let ScanPhase::Processing { bit_index } = self.phase else {
            return;
        };
        if !mailbox.is_consumed() {
            return;
        }
        if bit_index > 0 && self.kind == ScanKind::Scan {
            let tdo = mailbox.observed().tdo;
            self.bit_order.set(&mut self.tdo, bit_index as usize - 1, tdo);
        }
        if bit_index < self.num_bits {
            let index = bit_index as usize;
            let tms = self.bit_order.get(&self.tms, index);
            let tdi = match self.kind {
                ScanKind::Scan => self.bit_order.get(&self.tdi, index),
                ScanKind::TmsOnly => false,
            };
            mailbox.post(SignalRequest::tck_pulse(tms, tdi));
            self.phase = ScanPhase::Processing {
                bit_index: bit_index + 1,
            };
        } else {
            self.phase = match self.kind {
                ScanKind::Scan => {
                    log::trace!("Captured TDO: {:02x?}", &self.tdo[..]);
                    ScanPhase::SendingTdo
                }
                ScanKind::TmsOnly => ScanPhase::Done,
            };
        }
    }

    /// Marks the captured TDO as handed over.
    pub fn finish(&mut self) {
        self.phase = ScanPhase::Done;
    }
}


#[cfg(test)]
mod proptests {
    use jtag_vpi_protocol::TapMode;
    use proptest::prelude::*;

    use super::{ScanOperation, ScanPhase};
    use crate::{
        bits::BitOrder,
        signals::{ObservedSignal, SignalMailbox},
    };

    proptest! {
        #[test]
        fn tdo_is_independent_of_poll_granularity(
            tdi in proptest::collection::vec(any::<u8>(), 1..=512),
            trailing_bits in 0u32..8,
            idle_polls in proptest::collection::vec(0usize..4, 64),
            msb_first in any::<bool>(),
        ) {
            let num_bits = (tdi.len() as u32 * 8).saturating_sub(trailing_bits).max(1);
            let order = if msb_first { BitOrder::MsbFirst } else { BitOrder::LsbFirst };
            let mut mailbox = SignalMailbox::new(TapMode::Jtag);
            let mut scan = ScanOperation::inline(num_bits, &tdi, false, order);

            let mut step = 0usize;
            while scan.phase() != ScanPhase::SendingTdo {
                for _ in 0..idle_polls[step % idle_polls.len()] {
                    scan.step(&mut mailbox);
                }
                scan.step(&mut mailbox);
                if let Some(request) = mailbox.take() {
                    mailbox.observe(ObservedSignal {
                        tdo: request.tdi,
                        ..ObservedSignal::default()
                    });
                }
                step += 1;
                prop_assert!(step <= 3 * 4096);
            }

            for bit in 0..num_bits as usize {
                prop_assert_eq!(order.get(scan.tdo(), bit), order.get(&tdi, bit));
            }
        }
    }
}
