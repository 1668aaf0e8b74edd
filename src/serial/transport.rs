//! Byte transport over the serial port.
//!
//! The driver only needs delimited and counted reads, buffered writes and a
//! baud rate switch, so that is the whole contract. The production
//! implementation wraps a [`tokio_serial::SerialStream`] with a persistent
//! read buffer: responses arrive in arbitrary chunks, so bytes read past a
//! delimiter are kept for the next call. Reads are cancellation safe; bytes
//! already received survive an abandoned read.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilder, SerialStream};

/// Byte-oriented duplex link to the meter.
#[async_trait]
pub trait MeterTransport: Send {
    /// Read until the delimiter sequence has been consumed; returns
    /// everything up to and including the delimiter.
    async fn read_until(&mut self, delimiter: &[u8]) -> io::Result<Vec<u8>>;

    /// Read exactly `count` bytes.
    async fn read_exact(&mut self, count: usize) -> io::Result<Vec<u8>>;

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Buffered link over any async byte stream.
pub struct SerialLink<S> {
    stream: S,
    read_buffer: Vec<u8>,
}

impl SerialLink<SerialStream> {
    /// Open the serial port described by the builder.
    pub fn open(builder: SerialPortBuilder) -> io::Result<Self> {
        let stream = SerialStream::open(&builder).map_err(serial_io_error)?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> SerialLink<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buffer: Vec::with_capacity(256),
        }
    }

    async fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 256];
        let count = self.stream.read(&mut chunk).await?;
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial stream closed",
            ));
        }
        self.read_buffer.extend_from_slice(&chunk[..count]);
        Ok(())
    }

    pub async fn buffered_read_until(&mut self, delimiter: &[u8]) -> io::Result<Vec<u8>> {
        loop {
            if let Some(position) = find_subsequence(&self.read_buffer, delimiter) {
                return Ok(self
                    .read_buffer
                    .drain(..position + delimiter.len())
                    .collect());
            }
            self.fill().await?;
        }
    }

    pub async fn buffered_read_exact(&mut self, count: usize) -> io::Result<Vec<u8>> {
        while self.read_buffer.len() < count {
            self.fill().await?;
        }
        Ok(self.read_buffer.drain(..count).collect())
    }
}

#[async_trait]
impl MeterTransport for SerialLink<SerialStream> {
    async fn read_until(&mut self, delimiter: &[u8]) -> io::Result<Vec<u8>> {
        self.buffered_read_until(delimiter).await
    }

    async fn read_exact(&mut self, count: usize) -> io::Result<Vec<u8>> {
        self.buffered_read_exact(count).await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.stream
            .set_baud_rate(baud_rate)
            .map_err(serial_io_error)
    }

    async fn close(&mut self) -> io::Result<()> {
        // The port itself is released when the stream drops.
        self.stream.flush().await
    }
}

fn serial_io_error(err: tokio_serial::Error) -> io::Error {
    match err.kind {
        tokio_serial::ErrorKind::Io(kind) => io::Error::new(kind, err.description),
        tokio_serial::ErrorKind::NoDevice => {
            io::Error::new(io::ErrorKind::NotFound, err.description)
        }
        _ => io::Error::other(err.description),
    }
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted transport for dialogue tests: serves a fixed byte sequence
    /// and records writes and baud rate changes. Once the script runs dry,
    /// reads stay pending forever so driver deadlines can fire.
    pub(crate) struct ScriptedTransport {
        incoming: Vec<u8>,
        pub(crate) written: Arc<Mutex<Vec<u8>>>,
        pub(crate) baud_rates: Arc<Mutex<Vec<u32>>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(incoming: impl AsRef<[u8]>) -> Self {
            Self {
                incoming: incoming.as_ref().to_vec(),
                written: Arc::new(Mutex::new(Vec::new())),
                baud_rates: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl MeterTransport for ScriptedTransport {
        async fn read_until(&mut self, delimiter: &[u8]) -> io::Result<Vec<u8>> {
            match find_subsequence(&self.incoming, delimiter) {
                Some(position) => Ok(self.incoming.drain(..position + delimiter.len()).collect()),
                None => std::future::pending().await,
            }
        }

        async fn read_exact(&mut self, count: usize) -> io::Result<Vec<u8>> {
            if self.incoming.len() < count {
                std::future::pending::<()>().await;
            }
            Ok(self.incoming.drain(..count).collect())
        }

        async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
            self.baud_rates.lock().unwrap().push(baud_rate);
            Ok(())
        }

        async fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
