/// Order in which the bits of a scan are packed into bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum BitOrder {
    /// Bit `i` lives at bit `i % 8` of byte `i / 8`.
    #[default]
    LsbFirst,
    /// Bit `i` lives at bit `7 - i % 8` of byte `i / 8`.
    MsbFirst,
}

impl BitOrder {
    fn mask(self, index: usize) -> u8 {
        match self {
            BitOrder::LsbFirst => 1 << (index % 8),
            BitOrder::MsbFirst => 0x80 >> (index % 8),
        }
    }

    pub fn get(self, data: &[u8], index: usize) -> bool {
        data[index / 8] & self.mask(index) != 0
    }

    pub fn set(self, data: &mut [u8], index: usize, value: bool) {
        let mask = self.mask(index);
        if value {
            data[index / 8] |= mask;
        } else {
            data[index / 8] &= !mask;
        }
    }
}

#[test]
fn lsb_first_indexing() {
    let data = [0b0000_0001, 0b1000_0000];
    assert!(BitOrder::LsbFirst.get(&data, 0));
    assert!(!BitOrder::LsbFirst.get(&data, 7));
    assert!(BitOrder::LsbFirst.get(&data, 15));
}

#[test]
fn msb_first_indexing() {
    let mut data = [0u8; 2];
    BitOrder::MsbFirst.set(&mut data, 0, true);
    BitOrder::MsbFirst.set(&mut data, 9, true);
    assert_eq!(data, [0x80, 0x40]);
    BitOrder::MsbFirst.set(&mut data, 0, false);
    assert_eq!(data, [0x00, 0x40]);
}
