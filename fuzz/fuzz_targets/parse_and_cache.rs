#![no_main]
use libfuzzer_sys::fuzz_target;

use dns_resolver::cache::SharedCache;
use dns_resolver::forwarding::parse_and_cache;

fuzz_target!(|data: &[u8]| {
    let cache = SharedCache::new();
    if let Ok(cached) = parse_and_cache(&cache, data) {
        assert!(cache.len() <= cached);
    }
});
