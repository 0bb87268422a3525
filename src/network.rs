// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Byte-stream transport between the teleoperation host and an arm controller.
extern crate nix;

use std::io::{self, Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::net::ToSocketAddrs;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use log::debug;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use nix::sys::socket::setsockopt;
use nix::sys::socket::sockopt::{KeepAlive, TcpKeepCount, TcpKeepIdle, TcpKeepInterval};

use crate::exception::{create_link_exception, TeleopResult};

const CLIENT: Token = Token(1);

/// Time allowed for the TCP handshake with an arm controller.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// A bidirectional byte stream to an arm controller.
///
/// [`Network`] is the production implementation. The trait exists so that the arm link
/// can be driven by a scripted transport in tests.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Writes as many bytes as the socket accepts right now without blocking.
    ///
    /// Returns `Err` with kind `WouldBlock` if nothing could be written.
    fn try_send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Writes all bytes, waiting at most `timeout` for the socket to become writable.
    fn send_all(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()>;

    /// Reads whatever is available into `buffer`, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` if nothing arrived in time and `Ok(Some(0))` if the peer closed
    /// the connection.
    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

/// Non-blocking TCP connection with keep-alive probing, driven by a mio [`Poll`].
pub struct Network {
    tcp_socket: TcpStream,
    poll: Poll,
    events: Events,
}

impl Network {
    /// Connects to `address:port`, giving up after `connect_timeout`.
    pub fn new(address: &str, port: u16, connect_timeout: Duration) -> TeleopResult<Network> {
        let address_str: String = format!("{}:{}", address, port);
        let sock_address = address_str
            .to_socket_addrs()
            .map_err(create_link_exception)?
            .next()
            .ok_or_else(|| create_link_exception(format!("cannot resolve {}", address_str)))?;
        let std_socket = StdTcpStream::connect_timeout(&sock_address, connect_timeout)
            .map_err(|e| create_link_exception(format!("{}: {}", address_str, e)))?;
        std_socket.set_nodelay(true).map_err(create_link_exception)?;
        std_socket
            .set_nonblocking(true)
            .map_err(create_link_exception)?;

        let fd = std_socket.as_raw_fd();
        setsockopt(fd, KeepAlive, &true).map_err(create_link_exception)?;
        setsockopt(fd, TcpKeepIdle, &1).map_err(create_link_exception)?;
        setsockopt(fd, TcpKeepCount, &3).map_err(create_link_exception)?;
        setsockopt(fd, TcpKeepInterval, &1).map_err(create_link_exception)?;

        let mut tcp_socket = TcpStream::from_std(std_socket);
        let poll = Poll::new().map_err(create_link_exception)?;
        poll.registry()
            .register(
                &mut tcp_socket,
                CLIENT,
                Interest::READABLE | Interest::WRITABLE,
            )
            .map_err(create_link_exception)?;
        debug!("connected to {}", address_str);
        Ok(Network {
            tcp_socket,
            poll,
            events: Events::with_capacity(16),
        })
    }

    /// Waits for a readiness event until `deadline`. Returns false if the deadline passed.
    fn wait_until(&mut self, deadline: Instant) -> io::Result<bool> {
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        match self.poll.poll(&mut self.events, Some(deadline - now)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(true),
            Err(e) => Err(e),
        }
    }
}

impl Transport for Network {
    fn try_send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let written = self.tcp_socket.write(bytes)?;
        if written < bytes.len() {
            debug!(
                "partial write on arm link: {} of {} bytes",
                written,
                bytes.len()
            );
        }
        Ok(written)
    }

    fn send_all(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        let mut offset = 0;
        while offset < bytes.len() {
            match self.tcp_socket.write(&bytes[offset..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "arm link accepted no bytes",
                    ))
                }
                Ok(written) => offset += written,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.wait_until(deadline)? {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "timed out while writing to arm link",
                        ));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.tcp_socket.read(buffer) {
                Ok(num_bytes) => return Ok(Some(num_bytes)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            if !self.wait_until(deadline)? {
                return Ok(None);
            }
        }
    }
}
