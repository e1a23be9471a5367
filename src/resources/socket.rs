//! Berkeley sockets.
//!
//! A socket handle starts empty; `socket_create` opens the descriptor. Blocking
//! calls (`accept`, `read`, `write`, `connect`) run on a duplicate of the
//! descriptor so the resource lock is not held while they wait, and `close`
//! shuts the socket down so that such calls return.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use super::{read_buffer, Slot};
use crate::config;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{self, Handle, NativeObject, Resource, ResourceKind};

/// Boolean socket options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// SO_REUSEADDR
    ReuseAddress,
    /// SO_KEEPALIVE
    KeepAlive,
    /// TCP_NODELAY
    TcpNoDelay,
    /// SO_BROADCAST
    Broadcast,
}

#[derive(Default)]
struct SocketState {
    socket: Option<Socket>,
    stream: bool,
    hostname: String,
    connected: bool,
    listening: bool,
}

impl SocketState {
    fn socket(&self) -> BridgeResult<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| BridgeError::Socket("socket is not open".to_string()))
    }

    fn duplicate(&self) -> BridgeResult<Socket> {
        self.socket()?.try_clone().map_err(BridgeError::socket)
    }
}

/// Stream or datagram socket over IPv4/IPv6.
pub struct BerkeleySocket {
    state: Slot<SocketState>,
}

impl BerkeleySocket {
    pub fn new() -> Self {
        Self {
            state: Slot::new(ResourceKind::Socket, SocketState::default()),
        }
    }

    fn from_accepted(socket: Socket, peer: String) -> Self {
        Self {
            state: Slot::new(
                ResourceKind::Socket,
                SocketState {
                    socket: Some(socket),
                    stream: true,
                    hostname: peer,
                    connected: true,
                    listening: false,
                },
            ),
        }
    }

    /// Open a TCP (`stream`) or UDP socket.
    pub fn create(&self, stream: bool) -> BridgeResult<()> {
        self.state.with(|s| {
            if s.socket.is_some() {
                return Err(BridgeError::Socket("socket already created".to_string()));
            }
            let (ty, proto) = if stream {
                (Type::STREAM, Protocol::TCP)
            } else {
                (Type::DGRAM, Protocol::UDP)
            };
            let socket = Socket::new(Domain::IPV4, ty, Some(proto)).map_err(BridgeError::socket)?;
            if config::current().socket.reuse_address {
                socket
                    .set_reuse_address(true)
                    .map_err(BridgeError::socket)?;
            }
            s.socket = Some(socket);
            s.stream = stream;
            log::debug!("created {} socket", if stream { "stream" } else { "datagram" });
            Ok(())
        })
    }

    pub fn bind(&self, host: &str, port: u16) -> BridgeResult<()> {
        let addr = resolve(host, port)?;
        self.state.with(|s| {
            s.socket()?
                .bind(&SockAddr::from(addr))
                .map_err(BridgeError::socket)?;
            s.hostname = host.to_string();
            Ok(())
        })
    }

    /// Start listening; a backlog of 0 uses the configured default.
    pub fn listen(&self, backlog: i32) -> BridgeResult<()> {
        let backlog = if backlog > 0 {
            backlog
        } else {
            config::current().socket.backlog
        };
        self.state.with(|s| {
            if !s.stream {
                return Err(BridgeError::Socket(
                    "listen requires a stream socket".to_string(),
                ));
            }
            s.socket()?.listen(backlog).map_err(BridgeError::socket)?;
            s.listening = true;
            Ok(())
        })
    }

    /// Connect to `host:port`; a timeout of 0 uses the configured default,
    /// and a default of 0 blocks.
    pub fn connect(&self, host: &str, port: u16, timeout_ms: u64) -> BridgeResult<()> {
        let addr = resolve(host, port)?;
        let socket = self.state.with(|s| s.duplicate())?;

        let timeout_ms = if timeout_ms > 0 {
            timeout_ms
        } else {
            config::current().socket.connect_timeout_ms
        };
        let target = SockAddr::from(addr);
        let result = if timeout_ms > 0 {
            socket.connect_timeout(&target, Duration::from_millis(timeout_ms))
        } else {
            socket.connect(&target)
        };
        result.map_err(BridgeError::socket)?;
        apply_timeouts(&socket)?;

        self.state.with(|s| {
            s.hostname = host.to_string();
            s.connected = true;
            Ok(())
        })?;
        log::debug!("connected to {}", addr);
        Ok(())
    }

    /// Wait for a peer and return it as a new socket.
    pub fn accept(&self) -> BridgeResult<BerkeleySocket> {
        let listener = self.state.with(|s| {
            if !s.listening {
                return Err(BridgeError::Socket("socket is not listening".to_string()));
            }
            s.duplicate()
        })?;
        let (socket, peer) = listener.accept().map_err(BridgeError::socket)?;
        apply_timeouts(&socket)?;
        let peer = peer
            .as_socket()
            .map(|a| a.ip().to_string())
            .unwrap_or_default();
        log::debug!("accepted connection from {}", peer);
        Ok(BerkeleySocket::from_accepted(socket, peer))
    }

    pub fn set_option(&self, option: SocketOption, on: bool) -> BridgeResult<()> {
        self.state.with(|s| {
            let socket = s.socket()?;
            match option {
                SocketOption::ReuseAddress => socket.set_reuse_address(on),
                SocketOption::KeepAlive => socket.set_keepalive(on),
                SocketOption::TcpNoDelay => socket.set_nodelay(on),
                SocketOption::Broadcast => socket.set_broadcast(on),
            }
            .map_err(BridgeError::socket)
        })
    }

    pub fn get_option(&self, option: SocketOption) -> BridgeResult<bool> {
        self.state.with(|s| {
            let socket = s.socket()?;
            match option {
                SocketOption::ReuseAddress => socket.reuse_address(),
                SocketOption::KeepAlive => socket.keepalive(),
                SocketOption::TcpNoDelay => socket.nodelay(),
                SocketOption::Broadcast => socket.broadcast(),
            }
            .map_err(BridgeError::socket)
        })
    }

    /// Read up to `max` bytes (at most [`super::MAX_READ_CHUNK`] per call); an empty
    /// result means the peer closed.
    pub fn read(&self, max: usize) -> BridgeResult<Vec<u8>> {
        let mut buf = read_buffer(max)?;
        let mut socket = self.state.with(|s| s.duplicate())?;
        let n = socket.read(&mut buf).map_err(BridgeError::socket)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn write(&self, data: &[u8]) -> BridgeResult<usize> {
        let mut socket = self.state.with(|s| s.duplicate())?;
        socket.write_all(data).map_err(BridgeError::socket)?;
        Ok(data.len())
    }

    pub fn local_port(&self) -> BridgeResult<u16> {
        self.state.with(|s| {
            let addr = s.socket()?.local_addr().map_err(BridgeError::socket)?;
            addr.as_socket()
                .map(|a| a.port())
                .ok_or_else(|| BridgeError::Socket("socket has no IP address".to_string()))
        })
    }

    pub fn hostname(&self) -> BridgeResult<String> {
        self.state.with(|s| Ok(s.hostname.clone()))
    }

    pub fn is_connected(&self) -> BridgeResult<bool> {
        self.state.with(|s| Ok(s.connected && s.socket.is_some()))
    }

    #[cfg(unix)]
    pub fn raw_fd(&self) -> BridgeResult<i32> {
        use std::os::unix::io::AsRawFd;
        self.state.with(|s| Ok(s.socket()?.as_raw_fd()))
    }

    /// Close the descriptor. Closing twice is a no-op.
    pub fn close(&self) -> BridgeResult<()> {
        self.state.with(|s| {
            shut(s);
            Ok(())
        })
    }

    /// Connected stream for layering TLS on top.
    pub(crate) fn tcp_stream(&self) -> BridgeResult<TcpStream> {
        self.state.with(|s| {
            if !s.stream || !s.connected {
                return Err(BridgeError::Socket(
                    "socket is not a connected stream".to_string(),
                ));
            }
            Ok(s.duplicate()?.into())
        })
    }
}

fn shut(state: &mut SocketState) {
    if let Some(socket) = state.socket.take() {
        // Wakes calls blocked on duplicates of the descriptor.
        let _ = socket.shutdown(Shutdown::Both);
        log::debug!("closed socket");
    }
    state.connected = false;
    state.listening = false;
}

fn resolve(host: &str, port: u16) -> BridgeResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(BridgeError::socket)?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| BridgeError::Socket(format!("cannot resolve {}:{}", host, port)))
}

fn apply_timeouts(socket: &Socket) -> BridgeResult<()> {
    let cfg = &config::current().socket;
    let millis = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
    socket
        .set_read_timeout(millis(cfg.read_timeout_ms))
        .map_err(BridgeError::socket)?;
    socket
        .set_write_timeout(millis(cfg.write_timeout_ms))
        .map_err(BridgeError::socket)
}

impl Default for BerkeleySocket {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeObject for BerkeleySocket {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Socket
    }

    fn destroy(&self) {
        if let Some(mut state) = self.state.clear() {
            shut(&mut state);
        }
    }
}

impl Resource for BerkeleySocket {
    const KIND: ResourceKind = ResourceKind::Socket;
}

// =============================================================================
// Dispatch
// =============================================================================

fn socket(handle: Handle) -> BridgeResult<std::sync::Arc<BerkeleySocket>> {
    registry::lookup_as::<BerkeleySocket>(handle)
}

pub fn socket_initialize() -> Handle {
    registry::register(BerkeleySocket::new())
}

pub fn socket_create(handle: Handle, stream: bool) -> BridgeResult<()> {
    socket(handle)?.create(stream)
}

pub fn socket_bind(handle: Handle, host: &str, port: u16) -> BridgeResult<()> {
    socket(handle)?.bind(host, port)
}

pub fn socket_listen(handle: Handle, backlog: i32) -> BridgeResult<()> {
    socket(handle)?.listen(backlog)
}

pub fn socket_connect(handle: Handle, host: &str, port: u16, timeout_ms: u64) -> BridgeResult<()> {
    socket(handle)?.connect(host, port, timeout_ms)
}

/// Accept a peer and register it under a new handle.
pub fn socket_accept(handle: Handle) -> BridgeResult<Handle> {
    let accepted = socket(handle)?.accept()?;
    Ok(registry::register(accepted))
}

pub fn socket_set_option(handle: Handle, option: SocketOption, on: bool) -> BridgeResult<()> {
    socket(handle)?.set_option(option, on)
}

pub fn socket_get_option(handle: Handle, option: SocketOption) -> BridgeResult<bool> {
    socket(handle)?.get_option(option)
}

pub fn socket_read(handle: Handle, max: usize) -> BridgeResult<Vec<u8>> {
    socket(handle)?.read(max)
}

pub fn socket_write(handle: Handle, data: &[u8]) -> BridgeResult<usize> {
    socket(handle)?.write(data)
}

pub fn socket_local_port(handle: Handle) -> BridgeResult<u16> {
    socket(handle)?.local_port()
}

pub fn socket_hostname(handle: Handle) -> BridgeResult<String> {
    socket(handle)?.hostname()
}

pub fn socket_is_connected(handle: Handle) -> BridgeResult<bool> {
    socket(handle)?.is_connected()
}

#[cfg(unix)]
pub fn socket_raw_fd(handle: Handle) -> BridgeResult<i32> {
    socket(handle)?.raw_fd()
}

pub fn socket_close(handle: Handle) -> BridgeResult<()> {
    socket(handle)?.close()
}

pub fn socket_dispose(handle: Handle) {
    registry::release(handle)
}
