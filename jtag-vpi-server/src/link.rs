use std::{
    io::{self, ErrorKind, Read, Write},
    net::TcpStream,
};

/// A non-blocking byte stream to the debug host.
pub(crate) trait Link: Read + Write {
    /// Reads queued bytes without consuming them.
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl Link for TcpStream {
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::peek(self, buf)
    }
}

/// Errors after which the same operation may simply be retried on the next poll.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
    )
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::VecDeque,
        io::{self, ErrorKind, Read, Write},
    };

    use super::Link;

    /// In-memory link that hands out at most `chunk` bytes per call.
    #[derive(Debug)]
    pub(crate) struct MockLink {
        pub input: VecDeque<u8>,
        pub output: Vec<u8>,
        pub chunk: usize,
        /// Number of upcoming writes that fail with `WouldBlock`.
        pub blocked_writes: usize,
        pub eof: bool,
        pub fail_with: Option<ErrorKind>,
    }

    impl MockLink {
        pub fn new() -> MockLink {
            MockLink {
                input: VecDeque::new(),
                output: Vec::new(),
                chunk: usize::MAX,
                blocked_writes: 0,
                eof: false,
                fail_with: None,
            }
        }

        pub fn with_chunk(chunk: usize) -> MockLink {
            MockLink {
                chunk,
                ..MockLink::new()
            }
        }

        pub fn push(&mut self, data: &[u8]) {
            self.input.extend(data);
        }

        pub fn take_output(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.output)
        }
    }

    impl Read for MockLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail_with {
                return Err(kind.into());
            }
            if self.input.is_empty() {
                return if self.eof {
                    Ok(0)
                } else {
                    Err(ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(self.chunk).min(self.input.len());
            for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }

    impl Write for MockLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail_with {
                return Err(kind.into());
            }
            if self.blocked_writes > 0 {
                self.blocked_writes -= 1;
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.chunk);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for MockLink {
        fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.input.is_empty() {
                return if self.eof {
                    Ok(0)
                } else {
                    Err(ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(self.input.len());
            for (dst, src) in buf.iter_mut().zip(self.input.iter()) {
                *dst = *src;
            }
            Ok(n)
        }
    }
}
