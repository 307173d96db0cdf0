use jtag_vpi_protocol::{Dialect, HEADER_SIZE};

/// Highest first byte that is still read as an OpenOCD minimal command.
const MAX_MINIMAL_FIRST_BYTE: u8 = 0x06;

/// Classifies a fresh connection from its first 8 bytes and whether more bytes
/// were already queued behind them.
///
/// A full OpenOCD client sends a 1036-byte frame in one go, so anything beyond
/// the prefix means [`Dialect::OpenOcdFull`]. The header-only dialects are told
/// apart by the opcode range.
pub(crate) fn detect(prefix: &[u8; HEADER_SIZE], more_queued: bool) -> Dialect {
    if more_queued {
        Dialect::OpenOcdFull
    } else if prefix[0] > MAX_MINIMAL_FIRST_BYTE {
        Dialect::Legacy
    } else {
        Dialect::OpenOcdMinimal
    }
}

#[test]
fn queued_data_means_full_frames() {
    assert_eq!(detect(&[0; 8], true), Dialect::OpenOcdFull);
    assert_eq!(detect(&[0x0A, 0, 0, 0, 0, 0, 0, 0], true), Dialect::OpenOcdFull);
}

#[test]
fn header_only_dialects() {
    assert_eq!(detect(&[0x02, 0, 0, 0, 0, 0, 0, 8], false), Dialect::OpenOcdMinimal);
    assert_eq!(detect(&[0x06, 0, 0, 0, 0, 0, 0, 0], false), Dialect::OpenOcdMinimal);
    assert_eq!(detect(&[0x07, 0, 0, 0, 0, 0, 0, 0], false), Dialect::Legacy);
}
