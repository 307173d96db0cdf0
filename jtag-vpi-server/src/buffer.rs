/// Accumulates partial reads until a frame of the expected size is complete.
#[derive(Debug)]
pub(crate) struct FrameBuffer {
    data: Vec<u8>,
    filled: usize,
}

impl FrameBuffer {
    pub fn with_size(size: usize) -> FrameBuffer {
        FrameBuffer {
            data: vec![0; size],
            filled: 0,
        }
    }

    /// Changes the expected frame size, keeping the bytes received so far.
    pub fn resize(&mut self, size: usize) {
        debug_assert!(self.filled <= size);
        self.data.resize(size, 0);
    }

    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    pub fn advance(&mut self, n: usize) {
        self.filled = (self.filled + n).min(self.data.len());
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn frame(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    pub fn clear(&mut self) {
        self.filled = 0;
    }
}

/// Holds the single response in flight and how much of it has been written.
#[derive(Debug, Default)]
pub(crate) struct TxBuffer {
    data: Vec<u8>,
    sent: usize,
}

impl TxBuffer {
    pub fn queue(&mut self, bytes: &[u8]) {
        debug_assert!(!self.is_pending(), "response queued while another is in flight");
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.sent = 0;
    }

    pub fn unsent(&self) -> &[u8] {
        &self.data[self.sent..]
    }

    pub fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.data.len());
    }

    pub fn is_pending(&self) -> bool {
        self.sent < self.data.len()
    }
}

#[test]
fn frame_buffer_accumulates() {
    let mut buffer = FrameBuffer::with_size(8);
    buffer.unfilled_mut()[..3].copy_from_slice(&[1, 2, 3]);
    buffer.advance(3);
    assert!(!buffer.is_complete());
    assert_eq!(buffer.unfilled_mut().len(), 5);
    buffer.resize(10);
    assert_eq!(buffer.frame(), &[1, 2, 3]);
    buffer.advance(7);
    assert!(buffer.is_complete());
    buffer.clear();
    assert_eq!(buffer.filled(), 0);
}

#[test]
fn tx_buffer_tracks_partial_writes() {
    let mut tx = TxBuffer::default();
    assert!(!tx.is_pending());
    tx.queue(&[1, 2, 3, 4]);
    tx.advance(3);
    assert_eq!(tx.unsent(), &[4]);
    tx.advance(1);
    assert!(!tx.is_pending());
}
