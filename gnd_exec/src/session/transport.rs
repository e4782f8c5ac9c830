//! # Session transport
//!
//! The session only needs to open a connection, write whole records to it and read lines back,
//! so the socket is hidden behind these traits. `TcpTransport` is the real link.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use comms_if::net::{LineReader, NetError};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which can open connections to the tank.
pub trait Transport: Send {
    fn connect(&mut self) -> io::Result<Box<dyn Connection>>;
}

/// An open command connection.
pub trait Connection: Send {
    /// Write a complete encoded record.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` if nothing arrived within the connection's poll period and
    /// `Err(NetError::Closed)` once the far end has closed the link.
    fn recv_line(&mut self) -> Result<Option<Vec<u8>>, NetError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Plain TCP transport.
pub struct TcpTransport {
    endpoint: String,
    connect_timeout: Duration,
    poll_period: Duration,
    max_line_len: usize,
}

pub struct TcpConnection {
    writer: TcpStream,
    reader: LineReader<TcpStream>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcpTransport {
    pub fn new(
        endpoint: &str,
        connect_timeout: Duration,
        poll_period: Duration,
        max_line_len: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            poll_period,
            max_line_len,
        }
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        self.endpoint.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} did not resolve to an address", self.endpoint),
            )
        })
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> io::Result<Box<dyn Connection>> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.poll_period))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;

        let reader = LineReader::new(stream.try_clone()?, self.max_line_len);

        Ok(Box::new(TcpConnection {
            writer: stream,
            reader,
        }))
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    fn recv_line(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        self.reader.read_line()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.writer.shutdown(Shutdown::Both).ok();
    }
}
