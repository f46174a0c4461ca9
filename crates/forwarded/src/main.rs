use clap::Parser;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use dns_resolver::cache::{evict_expired_task, SharedCache};
use dns_resolver::forwarding::{Forwarder, Transport, DEFAULT_UPSTREAMS};
use forwarded::rate_limit::{sweep_task, RateLimiter};
use forwarded::server::{report_metrics_task, Handler, Server, METRICS_REPORT_INTERVAL};

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// A caching DNS forwarder.
///
/// forwarded answers address queries from its cache when it can, and
/// otherwise passes the query on to the first upstream nameserver
/// which accepts a connection, caching the A and AAAA records in the
/// response.  Clients sending too many requests per second are banned
/// for a while.
///
/// Every option can also be set with an environment variable.  Logs go
/// to stdout, filtered by `RUST_LOG` (default "info") and formatted
/// according to `RUST_LOG_FORMAT`, a comma-separated list of "json",
/// "pretty", "compact", or "full", and optionally "no-time" and
/// "no-ansi".
struct Args {
    /// Interface to listen on
    #[clap(short, long, env = "FORWARDED_INTERFACE", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    interface: IpAddr,

    /// Port to listen on
    #[clap(short, long, env = "FORWARDED_PORT", default_value_t = 53)]
    port: u16,

    /// Requests per second a single client may make before being banned
    #[clap(short = 'r', long, env = "FORWARDED_RATE_LIMIT", default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
    rate_limit: u32,

    /// How long a client which exceeds the rate limit is banned for
    #[clap(long, env = "FORWARDED_BAN_DURATION", default_value_t = 300)]
    ban_duration_seconds: u64,

    /// Accept and forward messages of up to 4096 octets, talking to
    /// upstream nameservers over TCP
    #[clap(long, env = "FORWARDED_EDNS")]
    edns: bool,

    /// Upstream nameserver, can be specified more than once.  Tried in
    /// the order given.
    #[clap(short, long = "upstream", env = "FORWARDED_UPSTREAMS", value_delimiter = ',', default_values_t = DEFAULT_UPSTREAMS.to_vec())]
    upstreams: Vec<SocketAddr>,

    /// How long to wait on each step of talking to an upstream nameserver
    #[clap(long, env = "FORWARDED_UPSTREAM_TIMEOUT", default_value_t = 5)]
    upstream_timeout_seconds: u64,

    /// How often to remove expired entries from the cache
    #[clap(long, env = "FORWARDED_CACHE_EVICTION_INTERVAL", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    cache_eviction_interval_seconds: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum LogFormat {
    Full,
    Compact,
    Pretty,
    Json,
}

fn begin_logging() {
    let mut format = LogFormat::Full;
    let mut ansi = true;
    let mut time = true;

    if let Ok(var) = env::var("RUST_LOG_FORMAT") {
        for option in var.split(',').map(str::trim) {
            match option {
                "full" => format = LogFormat::Full,
                "compact" => format = LogFormat::Compact,
                "pretty" => format = LogFormat::Pretty,
                "json" => format = LogFormat::Json,
                "no-ansi" => ansi = false,
                "no-time" => time = false,
                _ => (),
            }
        }
    }

    let layer = tracing_subscriber::fmt::layer().with_ansi(ansi);
    let layer = match (format, time) {
        (LogFormat::Full, true) => layer.boxed(),
        (LogFormat::Full, false) => layer.without_time().boxed(),
        (LogFormat::Compact, true) => layer.compact().boxed(),
        (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
        (LogFormat::Pretty, true) => layer.pretty().boxed(),
        (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (LogFormat::Json, true) => layer.json().boxed(),
        (LogFormat::Json, false) => layer.json().without_time().boxed(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(layer).with(filter).init();
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            tracing::error!(?error, "could not register SIGTERM handler");
            process::exit(1);
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging();

    if args.upstreams.is_empty() {
        tracing::error!("no upstream nameservers given");
        process::exit(1);
    }

    let transport = Transport::for_edns(args.edns);
    let forwarder = Forwarder::new(transport)
        .with_upstreams(args.upstreams)
        .with_timeout(Duration::from_secs(args.upstream_timeout_seconds));
    let cache = SharedCache::new();
    let limiter = RateLimiter::new(args.rate_limit)
        .with_ban_duration(Duration::from_secs(args.ban_duration_seconds));

    let address = SocketAddr::new(args.interface, args.port);
    tracing::info!(
        %address,
        ?transport,
        upstreams = ?forwarder.upstreams(),
        rate_limit = %limiter.limit(),
        "binding DNS UDP socket"
    );

    let handler = Handler::new(cache.clone(), limiter.clone(), forwarder);
    let server = match Server::bind(address, handler.clone(), transport.message_size()).await {
        Ok(server) => server,
        Err(error) => {
            tracing::error!(%address, ?error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    tokio::spawn(evict_expired_task(
        cache,
        Duration::from_secs(args.cache_eviction_interval_seconds),
        shutdown.clone(),
    ));
    tokio::spawn(sweep_task(limiter, shutdown.clone()));
    tokio::spawn(report_metrics_task(
        handler.clone(),
        METRICS_REPORT_INTERVAL,
        shutdown.clone(),
    ));
    let server = tokio::spawn(server.run(shutdown.clone()));

    wait_for_shutdown_signal().await;
    shutdown.cancel();

    if let Err(error) = server.await {
        tracing::error!(?error, "server task failed");
        process::exit(1);
    }

    let totals = handler.totals();
    tracing::info!(
        cache_hits = %totals.cache_hits,
        cache_misses = %totals.cache_misses,
        nameserver_hits = %totals.nameserver_hits,
        nameserver_misses = %totals.nameserver_misses,
        records_cached = %totals.records_cached,
        "shutdown complete"
    );
}
