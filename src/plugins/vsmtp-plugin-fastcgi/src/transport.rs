/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::ConnectionType;
use std::io::{Read, Write};
use std::net::ToSocketAddrs;

/// A connected socket to the responder.
#[derive(Debug)]
pub enum Stream {
    Tcp(std::net::TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Stream {
    /// Open a socket to `address`. `timeout` only bounds the tcp handshake,
    /// connecting to a unix socket does not block.
    pub fn dial(
        kind: ConnectionType,
        address: &str,
        timeout: std::time::Duration,
    ) -> std::io::Result<Self> {
        match kind {
            ConnectionType::Tcp => {
                let mut last_error = None;
                for socket in address.to_socket_addrs()? {
                    match std::net::TcpStream::connect_timeout(&socket, timeout) {
                        Ok(stream) => {
                            stream.set_nodelay(true)?;
                            return Ok(Self::Tcp(stream));
                        }
                        Err(error) => last_error = Some(error),
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("'{address}' did not resolve to any address"),
                    )
                }))
            }
            #[cfg(unix)]
            ConnectionType::Unix => std::os::unix::net::UnixStream::connect(address).map(Self::Unix),
            #[cfg(not(unix))]
            ConnectionType::Unix => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }

    /// Check that an idle socket was not closed by the responder, php-fpm
    /// closes the sockets of the children it stops. Nothing is expected
    /// between two requests, so pending bytes fail the check as well.
    pub fn ensure_idle(&mut self) -> std::io::Result<()> {
        self.set_nonblocking(true)?;
        let mut byte = [0; 1];
        let outcome = self.read(&mut byte);
        self.set_nonblocking(false)?;

        match outcome {
            Ok(0) => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "connection closed by the responder",
            )),
            Ok(_) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected data on an idle connection",
            )),
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(error) => Err(error),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Stream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let stream =
            Stream::dial(ConnectionType::Tcp, &address, std::time::Duration::from_secs(1)).unwrap();
        let (peer, _) = listener.accept().unwrap();
        (stream, peer)
    }

    #[test]
    fn idle() {
        let (mut stream, _peer) = pair();
        stream.ensure_idle().unwrap();
        // back in blocking mode.
        stream.write_all(b"ping").unwrap();
    }

    #[test]
    fn closed_by_peer() {
        let (mut stream, peer) = pair();
        drop(peer);
        std::thread::sleep(std::time::Duration::from_millis(100));

        assert_eq!(
            stream.ensure_idle().unwrap_err().kind(),
            std::io::ErrorKind::ConnectionAborted
        );
    }

    #[test]
    fn pending_data() {
        let (mut stream, mut peer) = pair();
        peer.write_all(b"late").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));

        assert_eq!(
            stream.ensure_idle().unwrap_err().kind(),
            std::io::ErrorKind::InvalidData
        );
    }
}
