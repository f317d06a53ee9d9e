// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reverse hostname resolution for network inputs.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Addresses kept at most. The oldest entry goes first once it is full.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Maps an IP address to a hostname. Implementations are shared across
/// connection tasks and must never fail: an address that cannot be resolved
/// is returned as its textual form.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn host_from_ip(&self, ip: IpAddr) -> String;
}

type LookupFn = fn(&IpAddr) -> io::Result<String>;

/// Reverse DNS resolver with a per-address TTL cache. Expired entries are
/// evicted whenever a new name is stored.
pub struct CachingResolver {
    lookup: LookupFn,
    ttl: Duration,
    capacity: usize,
    cache: Mutex<HashMap<IpAddr, (String, Instant)>>,
}

impl CachingResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookup(dns_lookup::lookup_addr, DEFAULT_CACHE_TTL)
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_lookup(dns_lookup::lookup_addr, ttl)
    }

    pub(crate) fn with_lookup(lookup: LookupFn, ttl: Duration) -> Self {
        CachingResolver {
            lookup,
            ttl,
            capacity: DEFAULT_CACHE_CAPACITY,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    async fn resolve(&self, ip: IpAddr) -> String {
        let lookup = self.lookup;
        let result = tokio::task::spawn_blocking(move || lookup(&ip)).await;
        match result {
            Ok(Ok(name)) if !name.is_empty() => name.trim_end_matches('.').to_string(),
            Ok(Ok(_)) => ip.to_string(),
            Ok(Err(e)) => {
                debug!("Reverse lookup of {ip} failed: {e}");
                ip.to_string()
            }
            Err(e) => {
                debug!("Reverse lookup task for {ip} did not complete: {e}");
                ip.to_string()
            }
        }
    }
}

impl Default for CachingResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for CachingResolver {
    async fn host_from_ip(&self, ip: IpAddr) -> String {
        {
            let cache = self.cache.lock().await;
            if let Some((name, resolved_at)) = cache.get(&ip) {
                if resolved_at.elapsed() < self.ttl {
                    return name.clone();
                }
            }
        }

        let name = self.resolve(ip).await;
        let mut cache = self.cache.lock().await;
        cache.retain(|_, (_, resolved_at)| resolved_at.elapsed() < self.ttl);
        if cache.len() >= self.capacity && !cache.contains_key(&ip) {
            let oldest = cache
                .iter()
                .min_by_key(|(_, (_, resolved_at))| *resolved_at)
                .map(|(oldest, _)| *oldest);
            if let Some(oldest) = oldest {
                cache.remove(&oldest);
            }
        }
        cache.insert(ip, (name.clone(), Instant::now()));
        name
    }
}
