//! IEEE 1149.7 OScan1 primitives.
//!
//! These are pure building blocks for the host side of a two-wire session:
//! the Online Activation Code, JScan command packets, zero insertion and the
//! CRC-8 check value. Every bit produced here is eventually sent to the server
//! as one [`EdgeCell`](crate::EdgeCell).
use std::fmt::Display;

/// Number of TCKC edges with TMSC held high that make up an OAC.
pub const OAC_EDGES: usize = 16;
/// x^8 + x^2 + x + 1
pub const CRC8_POLYNOMIAL: u8 = 0x07;
pub const CRC8_INIT: u8 = 0xFF;
/// A zero is inserted after this many consecutive ones.
pub const MAX_CONSECUTIVE_ONES: usize = 5;

/// Bitwise CRC-8, most significant bit first.
///
/// ```
/// use jtag_vpi_protocol::oscan1::crc8;
/// assert_eq!(crc8(&[0xAA, 0x55, 0xFF]), 0x5A);
/// ```
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(CRC8_INIT, |crc, byte| {
        (0..8).fold(crc ^ byte, |crc, _| {
            if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLYNOMIAL
            } else {
                crc << 1
            }
        })
    })
}

/// JScan control commands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JScanCommand {
    OScanOff,
    OScanOn,
    Select,
    Deselect,
    SfSelect,
    Reset,
}

impl JScanCommand {
    pub fn code(&self) -> u8 {
        match self {
            JScanCommand::OScanOff => 0x0,
            JScanCommand::OScanOn => 0x1,
            JScanCommand::Select => 0x2,
            JScanCommand::Deselect => 0x3,
            JScanCommand::SfSelect => 0x4,
            JScanCommand::Reset => 0xF,
        }
    }

    /// Start bit followed by the 4-bit code, MSB first. With `parity` an even
    /// parity bit over the start bit and code is appended.
    pub fn packet(&self, parity: bool) -> Vec<bool> {
        let mut packet = (1u8 << 4) | self.code();
        let mut len = 5;
        if parity {
            packet = (packet << 1) | (packet.count_ones() & 1) as u8;
            len += 1;
        }
        (0..len).rev().map(|i| (packet >> i) & 1 != 0).collect()
    }
}

impl TryFrom<u8> for JScanCommand {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(JScanCommand::OScanOff),
            0x1 => Ok(JScanCommand::OScanOn),
            0x2 => Ok(JScanCommand::Select),
            0x3 => Ok(JScanCommand::Deselect),
            0x4 => Ok(JScanCommand::SfSelect),
            0xF => Ok(JScanCommand::Reset),
            other => Err(other),
        }
    }
}

impl Display for JScanCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JScanCommand::OScanOff => write!(f, "OSCAN_OFF"),
            JScanCommand::OScanOn => write!(f, "OSCAN_ON"),
            JScanCommand::Select => write!(f, "SELECT"),
            JScanCommand::Deselect => write!(f, "DESELECT"),
            JScanCommand::SfSelect => write!(f, "SF_SELECT"),
            JScanCommand::Reset => write!(f, "RESET"),
        }
    }
}

/// OScan1 scanning formats. Only [`ScanningFormat::Sf0`] is driven by the server.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ScanningFormat {
    #[default]
    Sf0,
    Sf1,
    Sf2,
    Sf3,
}

impl TryFrom<u8> for ScanningFormat {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ScanningFormat::Sf0),
            1 => Ok(ScanningFormat::Sf1),
            2 => Ok(ScanningFormat::Sf2),
            3 => Ok(ScanningFormat::Sf3),
            other => Err(other),
        }
    }
}

impl ScanningFormat {
    pub fn code(&self) -> u8 {
        match self {
            ScanningFormat::Sf0 => 0,
            ScanningFormat::Sf1 => 1,
            ScanningFormat::Sf2 => 2,
            ScanningFormat::Sf3 => 3,
        }
    }

    /// The two-bit format code as sent after an SF_SELECT, MSB first.
    pub fn bits(&self) -> [bool; 2] {
        let code = self.code();
        [code & 0b10 != 0, code & 0b01 != 0]
    }
}

impl Display for ScanningFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SF{}", self.code())
    }
}

/// The commands that bring a freshly attached TAP into SF0 operation. Sent after an OAC.
pub const INIT_SEQUENCE: [JScanCommand; 3] = [
    JScanCommand::OScanOn,
    JScanCommand::Select,
    JScanCommand::SfSelect,
];

/// A bit after zero insertion.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StuffedBit {
    pub value: bool,
    /// Set for the zeros added by [`insert_zeros`].
    pub inserted: bool,
}

/// Inserts a zero after every run of [`MAX_CONSECUTIVE_ONES`] ones so that
/// payload data can never be mistaken for an OAC.
pub fn insert_zeros(bits: impl IntoIterator<Item = bool>) -> Vec<StuffedBit> {
    let mut out = Vec::new();
    let mut ones = 0;
    for value in bits {
        out.push(StuffedBit {
            value,
            inserted: false,
        });
        if value {
            ones += 1;
            if ones == MAX_CONSECUTIVE_ONES {
                out.push(StuffedBit {
                    value: false,
                    inserted: true,
                });
                ones = 0;
            }
        } else {
            ones = 0;
        }
    }
    out
}

/// Bits of `data`, MSB of the first byte first.
pub fn msb_first_bits(data: &[u8]) -> impl Iterator<Item = bool> + '_ {
    data.iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 != 0))
}

/// Packs bits into bytes MSB first. A trailing partial byte is padded with zeros.
pub fn pack_msb_first(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, &bit)| byte | ((bit as u8) << (7 - i)))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crc8_check_value() {
        assert_eq!(crc8(&[0xAA, 0x55, 0xFF]), 0x5A);
        assert_eq!(crc8(&[]), CRC8_INIT);
    }

    #[test]
    fn jscan_packet_without_parity() {
        assert_eq!(
            JScanCommand::SfSelect.packet(false),
            vec![true, false, true, false, false]
        );
    }

    #[test]
    fn jscan_packet_with_parity() {
        // 1_0001 has two ones
        assert_eq!(
            JScanCommand::OScanOn.packet(true),
            vec![true, false, false, false, true, false]
        );
        // 1_1111 has five ones
        assert_eq!(
            JScanCommand::Reset.packet(true),
            vec![true, true, true, true, true, true]
        );
    }

    #[test]
    fn jscan_codes() {
        for code in [0u8, 1, 2, 3, 4, 0xF] {
            assert_eq!(JScanCommand::try_from(code).unwrap().code(), code);
        }
        assert_eq!(JScanCommand::try_from(5), Err(5));
        assert_eq!(ScanningFormat::try_from(4), Err(4));
        assert_eq!(ScanningFormat::Sf2.bits(), [true, false]);
        assert_eq!(ScanningFormat::Sf3.to_string(), "SF3");
    }

    #[test]
    fn packing_pads_the_last_byte() {
        let bits: Vec<bool> = msb_first_bits(&[0xA5]).collect();
        assert_eq!(pack_msb_first(&bits), vec![0xA5]);
        assert_eq!(pack_msb_first(&[true, false, true]), vec![0xA0]);
        assert!(pack_msb_first(&[]).is_empty());
    }

    #[test]
    fn zero_insertion_after_five_ones() {
        let stuffed = insert_zeros(msb_first_bits(&[0xFF]));
        let values: Vec<bool> = stuffed.iter().map(|bit| bit.value).collect();
        assert_eq!(
            values,
            vec![true, true, true, true, true, false, true, true, true]
        );
        assert_eq!(stuffed.iter().filter(|bit| bit.inserted).count(), 1);
        assert!(stuffed[5].inserted);
    }

    #[test]
    fn zero_resets_run() {
        let bits = [true, true, true, true, false, true, true, true, true];
        assert!(insert_zeros(bits).iter().all(|bit| !bit.inserted));
    }
}
