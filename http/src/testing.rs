//! In-memory connections and flash for the unit tests.

extern crate std;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::vec;
use std::vec::Vec;

use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use embedded_storage::nor_flash::{self, NorFlash, NorFlashErrorKind, ReadNorFlash};

use crate::Close;

/// Held by tests that change or depend on the process-wide CORS switch.
pub(crate) static CORS_LOCK: Mutex<()> = Mutex::new(());

/// Hands out one queued chunk per read, so a request can be split across
/// reads at any byte. Reads return 0 once the queue is empty, or fail with
/// `ConnectionReset` when `reset` is set.
#[derive(Default)]
pub(crate) struct TestConnection {
    reads: VecDeque<Vec<u8>>,
    reset: bool,
    pub(crate) written: Vec<u8>,
    pub(crate) flushes: usize,
    pub(crate) closed: usize,
}

impl TestConnection {
    pub(crate) fn new(chunks: &[&[u8]]) -> Self {
        Self {
            reads: chunks.iter().map(|c| c.to_vec()).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn reset_when_drained(mut self) -> Self {
        self.reset = true;
        self
    }

    pub(crate) fn written_str(&self) -> &str {
        std::str::from_utf8(&self.written).unwrap()
    }
}

impl ErrorType for TestConnection {
    type Error = ErrorKind;
}

impl Read for TestConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(mut chunk) = self.reads.pop_front() else {
            if self.reset {
                return Err(ErrorKind::ConnectionReset);
            }
            return Ok(0);
        };

        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.reads.push_front(rest);
        }

        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

impl Write for TestConnection {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.closed > 0 {
            return Err(ErrorKind::BrokenPipe);
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
}

impl embedded_io::Read for TestConnection {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        embassy_futures::block_on(Read::read(self, buf))
    }
}

impl embedded_io::Write for TestConnection {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        embassy_futures::block_on(Write::write(self, buf))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        embassy_futures::block_on(Write::flush(self))
    }
}

impl Close for TestConnection {
    fn close(&mut self) {
        self.closed += 1;
    }
}

/// A connection whose every write fails.
#[derive(Default)]
pub(crate) struct BrokenConnection {
    pub(crate) inner: TestConnection,
}

impl ErrorType for BrokenConnection {
    type Error = ErrorKind;
}

impl Read for BrokenConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.inner.read(buf).await
    }
}

impl Write for BrokenConnection {
    async fn write(&mut self, _buf: &[u8]) -> Result<usize, Self::Error> {
        Err(ErrorKind::BrokenPipe)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Err(ErrorKind::BrokenPipe)
    }
}

impl Close for BrokenConnection {
    fn close(&mut self) {
        self.inner.close();
    }
}

/// One erased 4 KiB flash sector.
pub(crate) struct RamFlash {
    pub(crate) inner: Vec<u8>,
}

impl RamFlash {
    pub(crate) fn new() -> Self {
        Self {
            inner: vec![0xFFu8; 4096],
        }
    }
}

impl nor_flash::ErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let src = self
            .inner
            .get(start..start + bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.inner.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.inner
            .get_mut(from as usize..to as usize)
            .ok_or(NorFlashErrorKind::OutOfBounds)?
            .fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        self.inner
            .get_mut(start..start + bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?
            .copy_from_slice(bytes);
        Ok(())
    }
}
