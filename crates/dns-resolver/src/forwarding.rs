//! Forwarding queries to an upstream nameserver, and learning address
//! answers from what comes back.
//!
//! The query is sent as-is and the response returned as-is: nothing
//! here rewrites either.  As the upstream can say anything it likes,
//! the only validation of a response is that it parses.

use bytes::Bytes;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use dns_types::protocol::deserialise::{self, ConsumableBuffer};
use dns_types::protocol::types::*;

use crate::cache::SharedCache;
use crate::util::net::{read_tcp_bytes, send_tcp_bytes, TcpError};

/// Public resolvers, tried in this order.
pub const DEFAULT_UPSTREAMS: [SocketAddr; 4] = [
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 53)),
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 4, 4), 53)),
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, 1), 53)),
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 853)),
];

/// Applies separately to connecting, writing, and reading.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// How the query travels to the upstream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Transport {
    /// A single datagram each way, up to 512 octets.
    Udp,
    /// Length-prefixed messages, up to 4096 octets.
    Tcp,
}

impl Transport {
    /// TCP with the larger message size if EDNS is enabled, UDP
    /// otherwise.
    pub fn for_edns(edns: bool) -> Self {
        if edns {
            Transport::Tcp
        } else {
            Transport::Udp
        }
    }

    pub fn message_size(self) -> usize {
        match self {
            Transport::Udp => UDP_MESSAGE_SIZE,
            Transport::Tcp => EDNS_MESSAGE_SIZE,
        }
    }
}

/// Sends raw queries to the first reachable upstream nameserver.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstreams: Vec<SocketAddr>,
    transport: Transport,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(transport: Transport) -> Self {
        Self {
            upstreams: DEFAULT_UPSTREAMS.to_vec(),
            transport,
            timeout: UPSTREAM_TIMEOUT,
        }
    }

    pub fn with_upstreams(mut self, upstreams: Vec<SocketAddr>) -> Self {
        self.upstreams = upstreams;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn upstreams(&self) -> &[SocketAddr] {
        &self.upstreams
    }

    /// Send `query` verbatim to the first upstream which can be
    /// connected to, and return its raw response.
    ///
    /// Only connecting falls through to the next upstream: once
    /// connected, a write or read failure is returned.
    ///
    /// # Errors
    ///
    /// See `ForwardError`.
    pub async fn forward(&self, query: &[u8]) -> Result<Bytes, ForwardError> {
        match self.transport {
            Transport::Udp => {
                let (upstream, sock) = self.connect_udp().await?;
                tracing::trace!(%upstream, "forwarding over udp");
                self.exchange_udp(upstream, &sock, query).await
            }
            Transport::Tcp => {
                let (upstream, mut stream) = self.connect_tcp().await?;
                tracing::trace!(%upstream, "forwarding over tcp");
                self.exchange_tcp(upstream, &mut stream, query).await
            }
        }
    }

    async fn connect_udp(&self) -> Result<(SocketAddr, UdpSocket), ForwardError> {
        for upstream in &self.upstreams {
            let local: SocketAddr = if upstream.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };

            let connected = timeout(self.timeout, async {
                let sock = UdpSocket::bind(local).await?;
                sock.connect(upstream).await?;
                Ok::<_, io::Error>(sock)
            })
            .await;

            match connected {
                Ok(Ok(sock)) => return Ok((*upstream, sock)),
                Ok(Err(error)) => tracing::debug!(%upstream, ?error, "could not connect"),
                Err(_) => tracing::debug!(%upstream, "timed out connecting"),
            }
        }

        Err(ForwardError::NoUpstreamReachable)
    }

    async fn exchange_udp(
        &self,
        upstream: SocketAddr,
        sock: &UdpSocket,
        query: &[u8],
    ) -> Result<Bytes, ForwardError> {
        match timeout(self.timeout, sock.send(query)).await {
            Ok(Ok(_)) => (),
            Ok(Err(error)) => return Err(ForwardError::Write { upstream, error }),
            Err(_) => return Err(ForwardError::Timeout { upstream }),
        }

        let mut buf = vec![0u8; self.transport.message_size()];
        match timeout(self.timeout, sock.recv(&mut buf)).await {
            Ok(Ok(size)) => {
                buf.truncate(size);
                Ok(Bytes::from(buf))
            }
            Ok(Err(error)) => Err(ForwardError::Read { upstream, error }),
            Err(_) => Err(ForwardError::Timeout { upstream }),
        }
    }

    async fn connect_tcp(&self) -> Result<(SocketAddr, TcpStream), ForwardError> {
        for upstream in &self.upstreams {
            match timeout(self.timeout, TcpStream::connect(upstream)).await {
                Ok(Ok(stream)) => return Ok((*upstream, stream)),
                Ok(Err(error)) => tracing::debug!(%upstream, ?error, "could not connect"),
                Err(_) => tracing::debug!(%upstream, "timed out connecting"),
            }
        }

        Err(ForwardError::NoUpstreamReachable)
    }

    async fn exchange_tcp(
        &self,
        upstream: SocketAddr,
        stream: &mut TcpStream,
        query: &[u8],
    ) -> Result<Bytes, ForwardError> {
        match timeout(self.timeout, send_tcp_bytes(stream, query)).await {
            Ok(Ok(())) => (),
            Ok(Err(TcpError::IO(error))) => return Err(ForwardError::Write { upstream, error }),
            Ok(Err(error)) => return Err(ForwardError::Framing { upstream, error }),
            Err(_) => return Err(ForwardError::Timeout { upstream }),
        }

        match timeout(
            self.timeout,
            read_tcp_bytes(stream, self.transport.message_size()),
        )
        .await
        {
            Ok(Ok(bytes)) => Ok(bytes.freeze()),
            Ok(Err(TcpError::IO(error))) => Err(ForwardError::Read { upstream, error }),
            Ok(Err(error)) => Err(ForwardError::Framing { upstream, error }),
            Err(_) => Err(ForwardError::Timeout { upstream }),
        }
    }
}

/// An error that can occur when forwarding a query.
#[derive(Debug)]
pub enum ForwardError {
    /// Every upstream failed to connect.
    NoUpstreamReachable,
    Write {
        upstream: SocketAddr,
        error: io::Error,
    },
    Read {
        upstream: SocketAddr,
        error: io::Error,
    },
    Timeout {
        upstream: SocketAddr,
    },
    /// The TCP length prefix was wrong or too big.
    Framing {
        upstream: SocketAddr,
        error: TcpError,
    },
}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ForwardError::NoUpstreamReachable => write!(f, "no upstream nameserver reachable"),
            ForwardError::Write { upstream, error } => {
                write!(f, "error of sending request to {upstream}: {error}")
            }
            ForwardError::Read { upstream, error } => {
                write!(f, "error reading answer from {upstream}: {error}")
            }
            ForwardError::Timeout { upstream } => {
                write!(f, "timed out waiting for answer from {upstream}")
            }
            ForwardError::Framing { upstream, error } => {
                write!(f, "error reading answer from {upstream}: {error}")
            }
        }
    }
}

impl std::error::Error for ForwardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForwardError::Write { error, .. } | ForwardError::Read { error, .. } => Some(error),
            ForwardError::Framing { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Insert every address answer of an upstream response into the
/// cache.
///
/// Answers are processed in order, and the first one which is not A
/// or AAAA stops processing: answers before it stay cached, answers
/// after it are never looked at.
///
/// Returns the number of records cached.
///
/// # Errors
///
/// If the response does not parse, or has a non-address answer.
pub fn parse_and_cache(cache: &SharedCache, response: &[u8]) -> Result<usize, CacheError> {
    let wire_header = WireHeader::from_octets(response)?;
    let id = wire_header.header.id;

    let mut buffer = ConsumableBuffer::new(response).at_offset(HEADER_LEN);
    for _ in 0..wire_header.qdcount {
        Question::deserialise(id, &mut buffer)?;
    }

    let mut cached = 0;
    for _ in 0..wire_header.ancount {
        let rr = ResourceRecord::deserialise(id, &mut buffer)?;
        if !rr.rtype.is_address() {
            return Err(CacheError::UnsupportedRecordType {
                id,
                rtype: rr.rtype,
            });
        }

        tracing::trace!(name = %rr.name, rtype = %rr.rtype, ttl = %rr.ttl, "caching answer");
        cache.insert(&rr);
        cached += 1;
    }

    Ok(cached)
}

/// An error that can occur when caching an upstream response.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CacheError {
    Protocol(deserialise::Error),
    UnsupportedRecordType { id: u16, rtype: RecordType },
}

impl From<deserialise::Error> for CacheError {
    fn from(error: deserialise::Error) -> Self {
        CacheError::Protocol(error)
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CacheError::Protocol(error) => error.fmt(f),
            CacheError::UnsupportedRecordType { .. } => write!(f, "unsupported type of record"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Protocol(error) => Some(error),
            CacheError::UnsupportedRecordType { .. } => None,
        }
    }
}
