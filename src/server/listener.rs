//! Listening socket: `@/path` Unix stream sockets and `ip:port` TCP.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use tracing::warn;

/// A parsed listening address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddr {
    /// Filesystem path for a local stream socket (`@/path` on the CLI).
    Unix(PathBuf),
    /// TCP endpoint (`ip:port` on the CLI).
    Tcp(SocketAddr),
}

impl BindAddr {
    /// Parse a CLI connection string.
    ///
    /// `@/path` selects a Unix socket. Anything containing `:` is `ip:port`;
    /// an unparseable IP falls back to the wildcard address, matching the
    /// reference server.
    pub fn parse(conn: &str) -> Result<Self, String> {
        if let Some(path) = conn.strip_prefix('@') {
            if path.is_empty() {
                return Err("empty Unix socket path".into());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let Some((host, port)) = conn.rsplit_once(':') else {
            return Err(format!("invalid connection string `{conn}`: expected @/path or ip:port"));
        };
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port in `{conn}`"))?;
        let addr = host.parse().map_or_else(
            |_| SocketAddr::from(([0, 0, 0, 0], port)),
            |ip| SocketAddr::new(ip, port),
        );
        Ok(Self::Tcp(addr))
    }
}

/// The bound listening socket.
///
/// The listener is non-blocking so the accept loop can poll the shutdown
/// flag; accepted streams are switched back to blocking mode. A path-based
/// socket file is unlinked when the listener is dropped.
#[derive(Debug)]
pub enum Listener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix listener plus the path to unlink on teardown.
    Unix {
        /// The bound listener.
        listener: UnixListener,
        /// Socket file path.
        path: PathBuf,
    },
}

impl Listener {
    /// Bind the parsed address.
    ///
    /// A stale socket file at a Unix path is removed first, matching the
    /// reference server.
    pub fn bind(addr: &BindAddr) -> io::Result<Self> {
        match addr {
            BindAddr::Tcp(sock_addr) => {
                let listener = TcpListener::bind(sock_addr)?;
                listener.set_nonblocking(true)?;
                Ok(Self::Tcp(listener))
            }
            BindAddr::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)?;
                listener.set_nonblocking(true)?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    /// Accept one connection, switching the stream to blocking mode.
    ///
    /// Propagates `WouldBlock` when no connection is pending.
    pub fn accept(&self) -> io::Result<ClientStream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nonblocking(false)?;
                Ok(ClientStream::Tcp(stream))
            }
            Self::Unix { listener, .. } => {
                let (stream, _) = listener.accept()?;
                stream.set_nonblocking(false)?;
                Ok(ClientStream::Unix(stream))
            }
        }
    }

    /// Human-readable description of the bound endpoint.
    #[must_use]
    pub fn local_description(&self) -> String {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map_or_else(|_| "tcp:?".into(), |a| format!("tcp {a}")),
            Self::Unix { path, .. } => format!("unix socket {}", path.display()),
        }
    }

    /// Local TCP address, if bound over TCP (tests bind port 0).
    #[must_use]
    pub fn local_tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Unix { .. } => None,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path.as_path()) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to unlink socket file");
                }
            }
        }
    }
}

/// One accepted client stream.
#[derive(Debug)]
pub enum ClientStream {
    /// TCP connection.
    Tcp(TcpStream),
    /// Unix-socket connection.
    Unix(UnixStream),
}

impl ClientStream {
    /// Clone the underlying socket handle, so the reader and writer actors
    /// each own one.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(s) => s.try_clone().map(Self::Tcp),
            Self::Unix(s) => s.try_clone().map(Self::Unix),
        }
    }

    /// Shut down both directions, unblocking a parked reader.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            Self::Unix(s) => s.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_form() {
        assert_eq!(
            BindAddr::parse("@/tmp/ts.sock"),
            Ok(BindAddr::Unix(PathBuf::from("/tmp/ts.sock")))
        );
        assert!(BindAddr::parse("@").is_err());
    }

    #[test]
    fn test_parse_tcp_form() {
        assert_eq!(
            BindAddr::parse("127.0.0.1:9000"),
            Ok(BindAddr::Tcp(SocketAddr::from(([127, 0, 0, 1], 9000))))
        );
    }

    #[test]
    fn test_parse_bad_ip_falls_back_to_wildcard() {
        assert_eq!(
            BindAddr::parse("nonsense:9000"),
            Ok(BindAddr::Tcp(SocketAddr::from(([0, 0, 0, 0], 9000))))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BindAddr::parse("no-colon-here").is_err());
        assert!(BindAddr::parse("127.0.0.1:notaport").is_err());
    }
}
