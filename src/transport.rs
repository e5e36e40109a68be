//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the underlying
//! communication channel (like TCP, UART, etc.), allowing the MQTT client to be
//! hardware and network-stack agnostic.
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use core::net::SocketAddrV4;

use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;

/// Error type of the packet codec, which never touches a transport.
///
/// It is uninhabited, so a `MqttError<ErrorPlaceHolder>` can always be lifted
/// into the error type of a concrete transport.
#[derive(Debug, Copy, Clone)]
pub enum ErrorPlaceHolder {}

#[cfg(feature = "defmt")]
impl defmt::Format for ErrorPlaceHolder {
    fn format(&self, _f: defmt::Formatter<'_>) {
        match *self {}
    }
}

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {
    /// `true` when the error only means "no data arrived within the read window".
    ///
    /// The client treats such reads as idle polls instead of link failures.
    fn is_timeout(&self) -> bool {
        false
    }
}

impl TransportError for ErrorPlaceHolder {}

/// A trait representing a byte-stream transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Opens the stream to the broker, dropping any previous stream first.
    async fn open(&mut self, remote: SocketAddrV4) -> Result<(), Self::Error>;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read. `Ok(0)` means the peer closed the stream.
    /// When nothing arrives within the transport's read window the returned error
    /// reports [`TransportError::is_timeout`].
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Tears the stream down without waiting for the peer.
    fn close(&mut self);
}

/// Errors produced by [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpTransportError {
    /// The TCP handshake with the broker failed.
    Connect(ConnectError),
    /// Reading or writing the socket failed.
    Io(TcpError),
    /// The peer closed the connection.
    Closed,
    /// No data arrived within the read window.
    Timeout,
}

impl TransportError for TcpTransportError {
    fn is_timeout(&self) -> bool {
        matches!(self, TcpTransportError::Timeout)
    }
}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` with the given socket and read window.
    ///
    /// The read window bounds how long a single `recv` may block the event loop,
    /// so it should stay in the tens of milliseconds.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// A helper function to perform a read with a timeout.
    async fn read_with_timeout(&mut self, buf: &mut [u8]) -> Result<usize, TcpTransportError> {
        // Race the read operation against a timer.
        let read_fut = self.socket.read(buf);
        let timer = Timer::after(self.timeout);

        match futures::future::select(core::pin::pin!(read_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(0), _)) => {
                debug!("TCP connection closed by peer");
                Err(TcpTransportError::Closed)
            }
            futures::future::Either::Left((Ok(n), _)) => {
                trace!("TCP read: {} bytes", n);
                Ok(n)
            }
            futures::future::Either::Left((Err(e), _)) => {
                debug!("TCP read error: {:?}", crate::fmt::Dbg(&e));
                Err(TcpTransportError::Io(e))
            }
            futures::future::Either::Right(((), _)) => Err(TcpTransportError::Timeout),
        }
    }
}

impl<'a> MqttTransport for TcpTransport<'a> {
    type Error = TcpTransportError;

    async fn open(&mut self, remote: SocketAddrV4) -> Result<(), Self::Error> {
        self.socket.abort();
        let _ = self.socket.flush().await;

        let endpoint = IpEndpoint::new(IpAddress::Ipv4(*remote.ip()), remote.port());
        self.socket
            .connect(endpoint)
            .await
            .map_err(TcpTransportError::Connect)
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("TCP TX ({} bytes)", buf.len());

        self.socket.write_all(buf).await.map_err(|e| {
            debug!("TCP write error: {:?}", crate::fmt::Dbg(&e));
            TcpTransportError::Io(e)
        })?;

        // Flush to ensure data is actually sent to the network
        self.socket.flush().await.map_err(TcpTransportError::Io)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_with_timeout(buf).await
    }

    fn close(&mut self) {
        self.socket.abort();
    }
}
