//! The per-datagram pipeline, and the UDP receive loop which drives
//! it.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use dns_resolver::cache::SharedCache;
use dns_resolver::forwarding::{parse_and_cache, CacheError, ForwardError, Forwarder};
use dns_resolver::metrics::Metrics;
use dns_types::protocol::deserialise;
use dns_types::protocol::serialise::{self, build_answer};
use dns_types::protocol::types::*;

use crate::rate_limit::{RateLimiter, Rejection};

/// How often the running metrics totals are logged.
pub const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] metrics mutex poisoned, cannot recover from this - aborting";

/// Everything needed to answer a datagram.  Invoking `clone` gives a
/// handler sharing the same cache and limiter.
#[derive(Debug, Clone)]
pub struct Handler {
    pub cache: SharedCache,
    pub limiter: RateLimiter,
    pub forwarder: Arc<Forwarder>,
    /// Sum of the metrics of every datagram answered so far.
    totals: Arc<Mutex<Metrics>>,
}

impl Handler {
    pub fn new(cache: SharedCache, limiter: RateLimiter, forwarder: Forwarder) -> Self {
        Self {
            cache,
            limiter,
            forwarder: Arc::new(forwarder),
            totals: Arc::new(Mutex::new(Metrics::new())),
        }
    }

    /// Add one datagram's metrics to the running totals.
    ///
    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn record(&self, metrics: &Metrics) {
        self.totals
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .merge(metrics);
    }

    /// # Panics
    ///
    /// If the mutex has been poisoned.
    pub fn totals(&self) -> Metrics {
        *self.totals.lock().expect(MUTEX_POISON_MESSAGE)
    }

    /// Produce the payload to send back for one datagram.
    ///
    /// If any question has a fresh cached answer, the payload is one
    /// answer message per cached question, concatenated in the order
    /// they finish building; questions which missed the cache are
    /// dropped.  If no question is cached, the datagram is forwarded
    /// upstream verbatim and the upstream response is returned as-is,
    /// once its address answers have been cached.
    ///
    /// # Errors
    ///
    /// If the client is rate limited, the datagram does not decode,
    /// forwarding fails, or the upstream response cannot be cached (an
    /// error rcode, or an answer which is not A or AAAA).  The
    /// `Display` of the error is what the client gets instead of a DNS
    /// message.
    pub async fn handle(
        &self,
        peer: IpAddr,
        datagram: &[u8],
        metrics: &mut Metrics,
    ) -> Result<Bytes, Error> {
        self.limiter.process_ip(peer)?;

        let wire_header = WireHeader::from_octets(datagram)?;
        let id = wire_header.header.id;
        tracing::Span::current().record("id", id);

        let questions = Question::from_octets(id, datagram, wire_header.qdcount)?;

        let hits = self.lookup(&questions).await?;
        for _ in 0..(questions.len() - hits.len()) {
            metrics.cache_hit_or_miss(false);
        }
        for _ in 0..hits.len() {
            metrics.cache_hit_or_miss(true);
        }

        if hits.is_empty() {
            return self.forward(datagram, metrics).await;
        }

        let response_header = wire_header.make_response();
        let mut fragments = JoinSet::new();
        for (question, answer) in hits {
            let mut header = response_header;
            fragments.spawn(async move { build_answer(&mut header, &question, &answer) });
        }

        let mut response = BytesMut::new();
        while let Some(fragment) = fragments.join_next().await {
            response.extend_from_slice(&fragment.map_err(|_| Error::Internal)??);
        }

        Ok(response.freeze())
    }

    /// Look every question up in the cache concurrently.  Only
    /// questions for a specific record type can be answered from the
    /// cache.
    async fn lookup(
        &self,
        questions: &[Question],
    ) -> Result<Vec<(Question, ResourceRecord)>, Error> {
        let mut lookups = JoinSet::new();
        for question in questions {
            if let QueryType::Record(rtype) = question.qtype {
                let cache = self.cache.clone();
                let question = question.clone();
                lookups.spawn(async move {
                    cache
                        .get(rtype, &question.name)
                        .map(|answer| (question, answer))
                });
            }
        }

        let mut hits = Vec::with_capacity(questions.len());
        while let Some(hit) = lookups.join_next().await {
            if let Some(hit) = hit.map_err(|_| Error::Internal)? {
                tracing::trace!(question = %hit.0, "cache hit");
                hits.push(hit);
            }
        }

        Ok(hits)
    }

    async fn forward(&self, datagram: &[u8], metrics: &mut Metrics) -> Result<Bytes, Error> {
        let response = match self.forwarder.forward(datagram).await {
            Ok(response) => {
                metrics.nameserver_hit();
                response
            }
            Err(error) => {
                metrics.nameserver_miss();
                return Err(error.into());
            }
        };

        let cached = parse_and_cache(&self.cache, &response)?;
        metrics.records_cached(cached);

        Ok(response)
    }
}

/// Why a datagram could not be answered.
#[derive(Debug)]
pub enum Error {
    Rejected(Rejection),
    Protocol(deserialise::Error),
    Forward(ForwardError),
    /// The upstream response was not something which can be cached.
    Cache(CacheError),
    Serialise(serialise::Error),
    /// A lookup or build task panicked or was cancelled.
    Internal,
}

impl From<Rejection> for Error {
    fn from(error: Rejection) -> Self {
        Error::Rejected(error)
    }
}

impl From<deserialise::Error> for Error {
    fn from(error: deserialise::Error) -> Self {
        Error::Protocol(error)
    }
}

impl From<ForwardError> for Error {
    fn from(error: ForwardError) -> Self {
        Error::Forward(error)
    }
}

impl From<CacheError> for Error {
    fn from(error: CacheError) -> Self {
        Error::Cache(error)
    }
}

impl From<serialise::Error> for Error {
    fn from(error: serialise::Error) -> Self {
        Error::Serialise(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Rejected(error) => error.fmt(f),
            Error::Protocol(error) => error.fmt(f),
            Error::Forward(error) => error.fmt(f),
            Error::Cache(error) => error.fmt(f),
            Error::Serialise(error) => error.fmt(f),
            Error::Internal => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Rejected(error) => Some(error),
            Error::Protocol(error) => Some(error),
            Error::Forward(error) => Some(error),
            Error::Cache(error) => Some(error),
            Error::Serialise(error) => Some(error),
            Error::Internal => None,
        }
    }
}

/// A bound UDP socket and the handler answering it.
#[derive(Debug)]
pub struct Server {
    socket: Arc<UdpSocket>,
    handler: Handler,
    message_size: usize,
}

impl Server {
    /// # Errors
    ///
    /// If the socket cannot be bound.
    pub async fn bind(
        address: SocketAddr,
        handler: Handler,
        message_size: usize,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        Ok(Self {
            socket: Arc::new(socket),
            handler,
            message_size,
        })
    }

    /// # Errors
    ///
    /// If the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive datagrams until `shutdown` is cancelled, answering each
    /// in its own task.  Tasks still running at shutdown are left to
    /// finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut buf = vec![0u8; self.message_size];

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("server stopped");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((size, peer)) => {
                        let datagram = Bytes::copy_from_slice(&buf[..size]);
                        let socket = self.socket.clone();
                        let handler = self.handler.clone();
                        let span = tracing::error_span!("datagram", %peer, id = tracing::field::Empty);
                        tokio::spawn(respond(socket, handler, peer, datagram).instrument(span));
                    }
                    Err(error) => tracing::warn!(?error, "udp receive error"),
                }
            }
        }
    }
}

/// Answer one datagram with exactly one write back to the peer: the
/// response, or the error text.
async fn respond(socket: Arc<UdpSocket>, handler: Handler, peer: SocketAddr, datagram: Bytes) {
    let mut metrics = Metrics::new();

    let payload = match handler.handle(peer.ip(), &datagram, &mut metrics).await {
        Ok(response) => response,
        Err(error) => {
            match &error {
                Error::Rejected(_) | Error::Protocol(_) => tracing::debug!(%error, "refused"),
                Error::Forward(_) => tracing::warn!(%error, "upstream error"),
                Error::Cache(_) => tracing::debug!(%error, "upstream response not cached"),
                Error::Serialise(_) | Error::Internal => tracing::error!(%error, "internal error"),
            }
            Bytes::from(error.to_string())
        }
    };

    if let Err(error) = socket.send_to(&payload, peer).await {
        tracing::warn!(?error, "udp send error");
    }

    tracing::debug!(
        cache_hits = %metrics.cache_hits,
        cache_misses = %metrics.cache_misses,
        nameserver_hits = %metrics.nameserver_hits,
        nameserver_misses = %metrics.nameserver_misses,
        records_cached = %metrics.records_cached,
        "ok"
    );
    handler.record(&metrics);
}

/// Log the running metrics totals every `interval`, until `shutdown`
/// is cancelled.
pub async fn report_metrics_task(
    handler: Handler,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let totals = handler.totals();
                tracing::info!(
                    cache_hits = %totals.cache_hits,
                    cache_misses = %totals.cache_misses,
                    nameserver_hits = %totals.nameserver_hits,
                    nameserver_misses = %totals.nameserver_misses,
                    records_cached = %totals.records_cached,
                    cache_size = %handler.cache.len(),
                    "metrics"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dns_resolver::forwarding::Transport;
    use dns_types::protocol::types::test_util::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    const PEER: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn handler(limit: u32) -> Handler {
        // nothing listens on the discard port
        let forwarder = Forwarder::new(Transport::Udp)
            .with_upstreams(vec!["127.0.0.1:9".parse().unwrap()])
            .with_timeout(Duration::from_millis(100));
        Handler::new(SharedCache::new(), RateLimiter::new(limit), forwarder)
    }

    #[tokio::test]
    async fn answers_from_cache() {
        let handler = handler(10);
        let answer = a_record("example.com.", Ipv4Addr::new(93, 184, 216, 34));
        handler.cache.insert(&answer);

        let query = query_octets(7, &[question("example.com.", RecordType::A)]);
        let mut metrics = Metrics::new();
        let response = handler.handle(PEER, &query, &mut metrics).await.unwrap();

        let wire_header = WireHeader::from_octets(&response).unwrap();
        assert_eq!(7, wire_header.header.id);
        assert!(wire_header.header.is_response);
        assert!(wire_header.header.recursion_available);
        assert_eq!(1, wire_header.qdcount);
        assert_eq!(1, wire_header.ancount);
        assert_eq!(&[93, 184, 216, 34], &response[response.len() - 4..]);
        assert_eq!(1, metrics.cache_hits);
        assert_eq!(0, metrics.nameserver_hits);
    }

    #[tokio::test]
    async fn answers_each_cached_question() {
        let handler = handler(10);
        handler
            .cache
            .insert(&a_record("a.example.com.", Ipv4Addr::new(192, 0, 2, 1)));
        handler
            .cache
            .insert(&a_record("b.example.com.", Ipv4Addr::new(192, 0, 2, 2)));

        let query = query_octets(
            1,
            &[
                question("a.example.com.", RecordType::A),
                question("b.example.com.", RecordType::A),
                question("c.example.com.", RecordType::A),
            ],
        );
        let mut metrics = Metrics::new();
        let response = handler.handle(PEER, &query, &mut metrics).await.unwrap();

        let first = WireHeader::from_octets(&response).unwrap();
        assert_eq!(1, first.ancount);
        let first_len = HEADER_LEN + "a.example.com.".len() + 1 + 4 + 2 + 2 + 2 + 4 + 2 + 4;
        assert_eq!(first_len * 2, response.len());
        let second = WireHeader::from_octets(&response[first_len..]).unwrap();
        assert_eq!(1, second.ancount);
        assert_eq!(2, metrics.cache_hits);
        assert_eq!(1, metrics.cache_misses);
    }

    #[tokio::test]
    async fn case_insensitive_cache_hit() {
        let handler = handler(10);
        handler
            .cache
            .insert(&a_record("example.com.", Ipv4Addr::new(93, 184, 216, 34)));

        let query = query_octets(1, &[question("EXAMPLE.com.", RecordType::A)]);
        let response = handler
            .handle(PEER, &query, &mut Metrics::new())
            .await
            .unwrap();

        assert_eq!(1, WireHeader::from_octets(&response).unwrap().ancount);
    }

    #[tokio::test]
    async fn rejects_malformed_datagrams() {
        let handler = handler(10);

        let short = handler.handle(PEER, &[0, 1, 2], &mut Metrics::new()).await;
        assert_eq!("DNS message is too short", short.unwrap_err().to_string());

        let no_questions = handler
            .handle(PEER, &[0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0], &mut Metrics::new())
            .await;
        assert_eq!("QDCOUNT is 0", no_questions.unwrap_err().to_string());
    }

    #[tokio::test]
    async fn rejects_over_limit() {
        let handler = handler(1);
        let query = query_octets(1, &[question("example.com.", RecordType::A)]);
        handler
            .cache
            .insert(&a_record("example.com.", Ipv4Addr::new(93, 184, 216, 34)));

        assert!(handler.handle(PEER, &query, &mut Metrics::new()).await.is_ok());
        assert!(matches!(
            handler.handle(PEER, &query, &mut Metrics::new()).await,
            Err(Error::Rejected(Rejection::RateExceeded { rate: 2 }))
        ));
        assert!(matches!(
            handler.handle(PEER, &query, &mut Metrics::new()).await,
            Err(Error::Rejected(Rejection::Banned { .. }))
        ));
    }

    #[tokio::test]
    async fn totals_are_shared_between_clones() {
        let handler = handler(10);
        let clone = handler.clone();
        handler
            .cache
            .insert(&a_record("example.com.", Ipv4Addr::new(93, 184, 216, 34)));

        for query in [
            query_octets(1, &[question("example.com.", RecordType::A)]),
            query_octets(2, &[question("example.com.", RecordType::A)]),
        ] {
            let mut metrics = Metrics::new();
            handler.handle(PEER, &query, &mut metrics).await.unwrap();
            handler.record(&metrics);
        }

        assert_eq!(2, clone.totals().cache_hits);
        assert_eq!(0, clone.totals().cache_misses);
    }

    #[tokio::test]
    async fn forward_failure_is_reported() {
        let handler = handler(10);
        let query = query_octets(1, &[question("example.com.", RecordType::A)]);
        let mut metrics = Metrics::new();

        let result = handler.handle(PEER, &query, &mut metrics).await;

        assert!(matches!(result, Err(Error::Forward(_))));
        assert_eq!(1, metrics.cache_misses);
        assert_eq!(1, metrics.nameserver_misses);
    }
}
