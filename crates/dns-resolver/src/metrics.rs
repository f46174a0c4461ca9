/// Metrics from answering one datagram.  The server builds this
/// structure, logs it once the response has been sent, and then adds
/// it to its running totals.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Metrics {
    /// Questions answered from the cache.
    pub cache_hits: u64,
    /// Questions the cache had no fresh answer for.
    pub cache_misses: u64,
    /// Forwarded queries which got a response.
    pub nameserver_hits: u64,
    /// Forwarded queries which failed.
    pub nameserver_misses: u64,
    /// Records learned from upstream responses.
    pub records_cached: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_hit_or_miss(&mut self, hit: bool) {
        if hit {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
    }

    pub fn nameserver_hit(&mut self) {
        self.nameserver_hits += 1;
    }

    pub fn nameserver_miss(&mut self) {
        self.nameserver_misses += 1;
    }

    pub fn records_cached(&mut self, count: usize) {
        self.records_cached += u64::try_from(count).unwrap_or(u64::MAX);
    }

    /// Add another set of metrics to this one.
    pub fn merge(&mut self, other: &Metrics) {
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.nameserver_hits += other.nameserver_hits;
        self.nameserver_misses += other.nameserver_misses;
        self.records_cached += other.records_cached;
    }
}
