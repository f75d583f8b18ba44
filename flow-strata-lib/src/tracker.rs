//! Flow lifecycle
//!
//! A [`FlowManager`] keeps the active flows of one transport protocol in an
//! insertion-ordered table: every lookup moves the flow to the back, so the
//! front is always the least recently seen flow. Expired flows are swept
//! from the front during lookups, and go back to the manager's
//! [`FlowCache`](cache::FlowCache) for reuse.
//!
//! At any time every flow allocated by the cache is either active in the
//! manager or free in the cache:
//! `manager.len() + cache.free_flows() == cache.allocated()`.
//!
//! ```
//! use std::net::SocketAddrV4;
//! use flow_strata::packet::protocol::IpProto;
//! use flow_strata::timestamp::{Interval, Timestamp};
//! use flow_strata::tracker::{cache::FlowCache, flow_key::FlowKey, FlowManager};
//!
//! let mut manager = FlowManager::new(FlowCache::new("tcp", 16), Interval::from_secs(60));
//! let key = FlowKey::new(
//!     "10.0.0.2:51000".parse().unwrap(),
//!     "10.0.0.1:80".parse().unwrap(),
//!     IpProto::TCP,
//!     0,
//! );
//!
//! manager.lookup(key, Timestamp::from_secs(0)).unwrap();
//! assert_eq!(manager.len(), 1);
//!
//! // a lookup after the timeout sweeps the stale flow first
//! let other = FlowKey::new(
//!     "10.0.0.3:51000".parse().unwrap(),
//!     "10.0.0.1:80".parse().unwrap(),
//!     IpProto::TCP,
//!     0,
//! );
//! manager.lookup(other, Timestamp::from_secs(61)).unwrap();
//! assert_eq!(manager.len(), 1);
//! assert!(manager.find(&key).is_none());
//! ```

use std::fmt;

use ahash::RandomState;
use hashlink::linked_hash_map::Entry;
use hashlink::LinkedHashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::timestamp::{Interval, Timestamp};
use crate::tracker::cache::FlowCache;
use crate::tracker::flow::{Flow, Termination};
use crate::tracker::flow_key::FlowKey;

pub mod cache;
pub mod direction;
pub mod flow;
pub mod flow_key;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("flow table exhausted: {limit} flows allocated")]
    Exhausted { limit: usize },
}

/// Lifetime counters of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowManagerStats {
    pub created: u64,
    pub expired: u64,
    pub drained: u64,
    pub exhausted: u64,
    pub terminations: TerminationCounters,
}

/// Released flows by [`Termination`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TerminationCounters {
    pub close: u64,
    pub reset: u64,
    pub timeout: u64,
    pub monitor_shutdown: u64,
}

impl TerminationCounters {
    #[inline]
    fn record(&mut self, termination: Termination) {
        match termination {
            Termination::Close => self.close += 1,
            Termination::Reset => self.reset += 1,
            Termination::Timeout => self.timeout += 1,
            Termination::MonitorShutdown => self.monitor_shutdown += 1,
        }
    }

    pub fn get(&self, termination: Termination) -> u64 {
        match termination {
            Termination::Close => self.close,
            Termination::Reset => self.reset,
            Termination::Timeout => self.timeout,
            Termination::MonitorShutdown => self.monitor_shutdown,
        }
    }
}

pub struct FlowManager {
    active: LinkedHashMap<FlowKey, Box<Flow>, RandomState>,
    cache: FlowCache,
    timeout: Interval,
    stats: FlowManagerStats,
}

impl FlowManager {
    pub fn new(cache: FlowCache, timeout: Interval) -> Self {
        FlowManager {
            active: LinkedHashMap::with_hasher(RandomState::new()),
            cache,
            timeout,
            stats: FlowManagerStats::default(),
        }
    }

    /// Active flow for `key`, without touching its recency.
    #[inline]
    pub fn find(&self, key: &FlowKey) -> Option<&Flow> {
        self.active.get(key).map(|flow| &**flow)
    }

    #[inline]
    pub fn find_mut(&mut self, key: &FlowKey) -> Option<&mut Flow> {
        self.active.get_mut(key).map(|flow| &mut **flow)
    }

    /// Finds or creates the flow for `key` at time `now`.
    ///
    /// Expired flows are swept first. A new flow comes from the cache and is
    /// already reset; when the cache has reached its ceiling the lookup fails
    /// with [`FlowError::Exhausted`].
    pub fn lookup(&mut self, key: FlowKey, now: Timestamp) -> Result<&mut Flow, FlowError> {
        self.sweep(now);

        match self.active.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.to_back();
                Ok(&mut **entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let Some(mut flow) = self.cache.acquire() else {
                    self.stats.exhausted += 1;
                    debug!(
                        cache = self.cache.name(),
                        limit = self.cache.ceiling(),
                        %key,
                        "flow table exhausted"
                    );
                    return Err(FlowError::Exhausted {
                        limit: self.cache.ceiling(),
                    });
                };

                flow.activate(key, now);
                self.stats.created += 1;
                debug!(cache = self.cache.name(), %key, "flow created");
                Ok(&mut **entry.insert(flow))
            }
        }
    }

    /// Releases every flow idle for at least the timeout, oldest first.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let timeout = self.timeout;
        let mut expired = 0;
        loop {
            match self.active.front() {
                Some((_, flow)) if now - flow.last_seen >= timeout => {
                    if let Some((key, flow)) = self.active.pop_front() {
                        let termination = flow.termination_on_expiry();
                        self.release(key, flow, termination);
                        expired += 1;
                    }
                }
                _ => break,
            }
        }
        self.stats.expired += expired as u64;
        expired
    }

    /// Releases every active flow back to the cache.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some((key, flow)) = self.active.pop_front() {
            self.release(key, flow, Termination::MonitorShutdown);
            drained += 1;
        }
        self.stats.drained += drained as u64;
        drained
    }

    fn release(&mut self, key: FlowKey, flow: Box<Flow>, termination: Termination) {
        debug!(
            cache = self.cache.name(),
            %key,
            %termination,
            packets = flow.total_packets(),
            bytes = flow.total_bytes,
            "flow released"
        );
        self.stats.terminations.record(termination);
        self.cache.release(flow);
    }

    #[inline]
    pub fn set_timeout(&mut self, timeout: Interval) {
        self.timeout = timeout;
    }

    #[inline]
    pub fn timeout(&self) -> Interval {
        self.timeout
    }

    /// Changes the number of flows the cache may allocate.
    #[inline]
    pub fn set_total_flows(&mut self, total: usize) {
        self.cache.set_ceiling(total);
    }

    #[inline]
    pub fn cache(&self) -> &FlowCache {
        &self.cache
    }

    #[inline]
    pub fn stats(&self) -> FlowManagerStats {
        self.stats
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Active flows, least recently seen first.
    pub fn iter(&self) -> impl Iterator<Item = &Flow> {
        self.active.values().map(|flow| &**flow)
    }

    /// Writes up to `limit` flows, most recently seen first.
    pub fn show_flows(&self, f: &mut impl fmt::Write, limit: usize) -> fmt::Result {
        writeln!(
            f,
            "{} flows: {} active, {} free, {} allocated (limit {})",
            self.cache.name(),
            self.len(),
            self.cache.free_flows(),
            self.cache.allocated(),
            self.cache.ceiling()
        )?;
        for flow in self.active.values().rev().take(limit) {
            writeln!(f, "\t{flow}")?;
        }
        Ok(())
    }
}

/// The TCP and UDP managers of one stack, shared by the outer and the
/// tunnelled transport layers.
#[derive(Debug)]
pub struct FlowTables {
    pub tcp: FlowManager,
    pub udp: FlowManager,
}

impl FlowTables {
    pub fn new(tcp: FlowManager, udp: FlowManager) -> Self {
        FlowTables { tcp, udp }
    }
}

impl fmt::Debug for FlowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowManager")
            .field("active", &self.active.len())
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("stats", &self.stats)
            .finish()
    }
}
