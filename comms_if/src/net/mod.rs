//! # Network Module
//!
//! This module provides a UDP socket abstraction for carrying [`ServoDems`] between a demands
//! source and the helm exec. The socket is configured through [`socket2`] so that options which
//! must be set before binding (such as `SO_REUSEADDR`) can be applied.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};
use log::debug;
use socket2::{Domain, Protocol, Socket, Type};

use crate::eqpt::servo::{DemsParseError, ServoDems, MAX_DEMS_PACKET_LEN};

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| DemsSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A UDP socket which sends or receives [`ServoDems`].
///
/// Servers bind to their endpoint and call [`DemsSocket::recv_dems`], clients connect to the
/// server's endpoint and call [`DemsSocket::send_dems`].
pub struct DemsSocket {
    socket: UdpSocket,

    /// One byte larger than the maximum packet length so that oversized datagrams can be detected
    /// rather than silently truncated.
    recv_buf: [u8; MAX_DEMS_PACKET_LEN + 1],
}

/// Represents options which can be set on a [`DemsSocket`].
#[derive(Debug, Clone)]
pub struct SocketOptions {

    /// Indicates if the socket should bind itself to the endpoint. Servers should have this value
    /// set as `true`, clients should have it set as `false`.
    ///
    /// The default value is `false`.
    pub bind: bool,

    /// `SO_REUSEADDR`: allow the address to be rebound while an old socket lingers.
    ///
    /// The default value is `true`.
    pub reuse_addr: bool,

    /// `SO_RCVTIMEO`: maximum time a receive blocks before returning [`DemsRecvError::Timeout`].
    /// `None` blocks forever.
    pub recv_timeout: Option<Duration>,

    /// `SO_SNDTIMEO`: maximum time a send blocks before failing. `None` blocks forever.
    pub send_timeout: Option<Duration>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while creating or sending on a [`DemsSocket`].
#[derive(thiserror::Error, Debug)]
pub enum DemsSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(io::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, io::Error),

    #[error("Could not bind the socket to {0}: {1}")]
    BindError(SocketAddr, io::Error),

    #[error("Could not connect the socket to {0}: {1}")]
    ConnectError(SocketAddr, io::Error),

    #[error("Could not get the local address of the socket: {0}")]
    LocalAddrError(io::Error),

    #[error("Demands packet is {0} bytes long, the maximum is {}", MAX_DEMS_PACKET_LEN)]
    PacketTooLong(usize),

    #[error("Could not send demands: {0}")]
    SendError(io::Error),
}

/// Errors which can occur while receiving demands.
#[derive(thiserror::Error, Debug)]
pub enum DemsRecvError {
    #[error("No demands received before the receive timeout")]
    Timeout,

    #[error("Could not read from the socket: {0}")]
    RecvError(io::Error),

    #[error("Invalid demands from {0}: {1}")]
    InvalidDems(SocketAddr, DemsParseError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DemsSocket {
    /// Create a new demands socket.
    ///
    /// ## Arguments
    /// - `socket_options`: a [`SocketOptions`] struct specifying how to configure the socket
    /// - `endpoint`: the address to bind to (servers) or to send to (clients)
    pub fn new(
        socket_options: &SocketOptions,
        endpoint: SocketAddr
    ) -> Result<Self, DemsSocketError> {
        // Create socket
        let socket = Socket::new(
            Domain::for_address(endpoint),
            Type::DGRAM,
            Some(Protocol::UDP)
        ).map_err(DemsSocketError::CreateSocketError)?;

        // Set the options on the socket, these must be set before binding
        socket_options.set(&socket)?;

        // Servers bind to the endpoint, clients bind to any local port and connect so that
        // `send` can be used
        let bind_addr = match socket_options.bind {
            true => endpoint,
            false => unspecified_addr(&endpoint)
        };
        socket.bind(&bind_addr.into())
            .map_err(|e| DemsSocketError::BindError(bind_addr, e))?;

        let socket: UdpSocket = socket.into();

        if !socket_options.bind {
            socket.connect(endpoint)
                .map_err(|e| DemsSocketError::ConnectError(endpoint, e))?;
        }

        debug!(
            "Demands socket {} {}",
            if socket_options.bind { "bound to" } else { "connected to" },
            endpoint
        );

        Ok(Self {
            socket,
            recv_buf: [0u8; MAX_DEMS_PACKET_LEN + 1]
        })
    }

    /// Get the local address the socket is bound to.
    ///
    /// Useful when binding to port 0 and letting the OS pick a port.
    pub fn local_addr(&self) -> Result<SocketAddr, DemsSocketError> {
        self.socket.local_addr().map_err(DemsSocketError::LocalAddrError)
    }

    /// Change the receive timeout. `None` blocks forever.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<(), DemsSocketError> {
        self.socket.set_read_timeout(timeout)
            .map_err(|e| DemsSocketError::SocketOptionError("set_read_timeout".into(), e))
    }

    /// Block until a demands datagram arrives or the receive timeout elapses.
    ///
    /// On success the parsed demands and the address of the sender are returned. Datagrams which
    /// do not parse are reported as [`DemsRecvError::InvalidDems`].
    pub fn recv_dems(&mut self) -> Result<(ServoDems, SocketAddr), DemsRecvError> {
        let (num_bytes, sender) = match self.socket.recv_from(&mut self.recv_buf) {
            Ok(r) => r,
            Err(e) if is_timeout(&e) => return Err(DemsRecvError::Timeout),
            Err(e) => return Err(DemsRecvError::RecvError(e))
        };

        // If the datagram filled the whole buffer it was longer than the maximum and has been
        // truncated, which `from_packet` will reject.
        ServoDems::from_packet(&self.recv_buf[..num_bytes])
            .map(|d| (d, sender))
            .map_err(|e| DemsRecvError::InvalidDems(sender, e))
    }

    /// Send demands to the connected server.
    pub fn send_dems(&self, dems: &ServoDems) -> Result<(), DemsSocketError> {
        self.send_raw(dems.to_packet().as_bytes())
    }

    /// Send an arbitrary payload to the connected server.
    ///
    /// Payloads longer than [`MAX_DEMS_PACKET_LEN`] are refused.
    pub fn send_raw(&self, payload: &[u8]) -> Result<(), DemsSocketError> {
        if payload.len() > MAX_DEMS_PACKET_LEN {
            return Err(DemsSocketError::PacketTooLong(payload.len()))
        }

        self.socket.send(payload)
            .map(|_| ())
            .map_err(DemsSocketError::SendError)
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), DemsSocketError> {

        // Set all the socket options, we use a macro here to make the error handling nice and
        // easy
        set_sockopts!(
            socket,
            (set_reuse_address, self.reuse_addr),
            (set_read_timeout, self.recv_timeout),
            (set_write_timeout, self.send_timeout)
        );

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            bind: false,
            reuse_addr: true,
            recv_timeout: None,
            send_timeout: None
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Timeouts are reported as `WouldBlock` on unix and `TimedOut` on windows.
fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Get the wildcard address with port 0 in the same family as `endpoint`.
fn unspecified_addr(endpoint: &SocketAddr) -> SocketAddr {
    let ip = match endpoint.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };

    SocketAddr::new(ip, 0)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    fn server(recv_timeout: Duration) -> DemsSocket {
        let options = SocketOptions {
            bind: true,
            recv_timeout: Some(recv_timeout),
            ..Default::default()
        };

        DemsSocket::new(&options, "127.0.0.1:0".parse().unwrap()).unwrap()
    }

    fn client(server: &DemsSocket) -> DemsSocket {
        DemsSocket::new(&SocketOptions::default(), server.local_addr().unwrap()).unwrap()
    }

    #[test]
    fn test_send_recv() {
        let mut server = server(Duration::from_secs(2));
        let client = client(&server);

        client.send_dems(&ServoDems::new(50.0, -20.0)).unwrap();

        let (dems, from) = server.recv_dems().unwrap();
        assert_eq!(dems, ServoDems::new(50.0, -20.0));
        assert_eq!(from.port(), client.local_addr().unwrap().port());
    }

    #[test]
    fn test_recv_timeout() {
        let mut server = server(Duration::from_millis(100));

        let start = Instant::now();
        match server.recv_dems() {
            Err(DemsRecvError::Timeout) => (),
            r => panic!("Expected timeout, got {:?}", r)
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_recv_invalid() {
        let mut server = server(Duration::from_secs(2));
        let client = client(&server);

        client.send_raw(b"garbage").unwrap();
        match server.recv_dems() {
            Err(DemsRecvError::InvalidDems(_, DemsParseError::MissingSeparator)) => (),
            r => panic!("Expected invalid demands, got {:?}", r)
        }
    }

    #[test]
    fn test_recv_oversized() {
        let mut server = server(Duration::from_secs(2));

        // Send with a plain socket since `send_raw` refuses long payloads
        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        let payload = format!("50.0,{}", "0".repeat(MAX_DEMS_PACKET_LEN));
        raw.send_to(payload.as_bytes(), server.local_addr().unwrap()).unwrap();

        match server.recv_dems() {
            Err(DemsRecvError::InvalidDems(_, DemsParseError::Oversized(_))) => (),
            r => panic!("Expected oversized packet, got {:?}", r)
        }

        // The socket is still usable afterwards
        let client = client(&server);
        client.send_raw(b"40,10").unwrap();
        assert_eq!(server.recv_dems().unwrap().0, ServoDems::new(40.0, 10.0));
    }

    #[test]
    fn test_send_too_long() {
        let server = server(Duration::from_secs(2));
        let client = client(&server);

        match client.send_raw(&[b'1'; MAX_DEMS_PACKET_LEN + 1]) {
            Err(DemsSocketError::PacketTooLong(n)) => assert_eq!(n, MAX_DEMS_PACKET_LEN + 1),
            r => panic!("Expected PacketTooLong, got {:?}", r)
        }
    }
}
