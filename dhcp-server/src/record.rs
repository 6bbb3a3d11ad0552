//! Record source (D): the external collaborator this server is built
//! around. Everything here is either an interface contract or the thin
//! caching/concurrency wrapper the engine needs in front of it — concrete
//! backends (SQL, INI, custom) are out of scope; see `dhcp-records-toml`
//! in the `staticdhcpd` binary crate for a minimal reference backend.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex};

/// Immutable record returned by the record source. `(subnet, serial)` is
/// the record's logical key; both are opaque to the protocol and only
/// echoed to the operator and the hook.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Definition {
    pub ip: Ipv4Addr,
    pub lease_time_secs: u32,
    pub subnet: String,
    pub serial: i64,
    pub hostname: Option<String>,
    pub gateway: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub broadcast_address: Option<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub domain_name_servers: Vec<Ipv4Addr>,
    pub ntp_servers: Vec<Ipv4Addr>,
    pub extra: Option<String>,
}

impl Definition {
    /// Record source fields cap these two lists at three entries (§3).
    pub const MAX_DNS_SERVERS: usize = 3;
    pub const MAX_NTP_SERVERS: usize = 3;
}

#[derive(Debug)]
pub enum RecordError {
    /// The backend raised; this is a server-side failure, not a policy
    /// rejection, so the engine must not quarantine the MAC for it (§7).
    Backend(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "record source error: {msg}"),
        }
    }
}

impl std::error::Error for RecordError {}

/// The record source interface (§6): one lookup method keyed by MAC, plus
/// cache invalidation.
pub trait RecordSource: Send + Sync {
    fn lookup_mac(&self, mac: &[u8; 6]) -> Result<Option<Definition>, RecordError>;

    fn reinitialise(&self) {}
}

pub type UnknownMacHook = Arc<dyn Fn(&[u8; 6]) -> Option<Definition> + Send + Sync>;

/// A small counting semaphore bounding concurrent record-source lookups
/// at `concurrency_limit` (§5). `std::sync` has no semaphore of its own;
/// this is the ordinary Mutex+Condvar construction for one.
struct Semaphore {
    state: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut permits = self.state.lock().unwrap();
        while *permits == 0 {
            permits = self.condvar.wait(permits).unwrap();
        }
        *permits -= 1;

        SemaphoreGuard { sem: self }
    }
}

struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        *self.sem.state.lock().unwrap() += 1;
        self.sem.condvar.notify_one();
    }
}

/// Wraps a [`RecordSource`] with the optional in-process cache, the
/// bounded concurrency semaphore, and the optional unknown-MAC hook — the
/// three pieces of machinery §5/§6 specify around the bare interface.
pub struct Source {
    inner: Box<dyn RecordSource>,
    cache: Option<Mutex<HashMap<[u8; 6], Option<Definition>>>>,
    semaphore: Semaphore,
    unknown_mac_hook: Option<UnknownMacHook>,
}

impl Source {
    pub fn new(
        inner: Box<dyn RecordSource>,
        use_cache: bool,
        concurrency_limit: usize,
        unknown_mac_hook: Option<UnknownMacHook>,
    ) -> Self {
        Self {
            inner,
            cache: use_cache.then(|| Mutex::new(HashMap::new())),
            semaphore: Semaphore::new(concurrency_limit.max(1)),
            unknown_mac_hook,
        }
    }

    /// Looks a MAC up, consulting the cache first, then the backend under
    /// the concurrency semaphore, then (on a backend miss) the optional
    /// unknown-MAC hook. The combined result — including a `None` — is
    /// cached, so a synthetic hook definition is remembered too.
    pub fn resolve(&self, mac: &[u8; 6]) -> Result<Option<Definition>, RecordError> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.lock().unwrap().get(mac) {
                return Ok(cached.clone());
            }
        }

        let result = {
            let _permit = self.semaphore.acquire();
            self.inner.lookup_mac(mac)?
        };

        let result = match result {
            Some(definition) => Some(definition),
            None => self.unknown_mac_hook.as_ref().and_then(|hook| hook(mac)),
        };

        if let Some(cache) = &self.cache {
            cache.lock().unwrap().insert(*mac, result.clone());
        }

        Ok(result)
    }

    /// Explicit cache-control handle (§9): replaces the source's global
    /// "current servers" list with a call the engine owner can make
    /// directly.
    pub fn flush_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap().clear();
        }
        self.inner.reinitialise();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        definition: Option<Definition>,
    }

    impl RecordSource for CountingSource {
        fn lookup_mac(&self, _mac: &[u8; 6]) -> Result<Option<Definition>, RecordError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.definition.clone())
        }
    }

    fn sample_definition() -> Definition {
        Definition {
            ip: Ipv4Addr::new(192, 0, 2, 50),
            lease_time_secs: 3600,
            subnet: "s".into(),
            serial: 1,
            hostname: None,
            gateway: None,
            subnet_mask: None,
            broadcast_address: None,
            domain_name: None,
            domain_name_servers: Vec::new(),
            ntp_servers: Vec::new(),
            extra: None,
        }
    }

    #[test]
    fn cache_avoids_repeat_backend_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = CountingSource {
            calls: calls.clone(),
            definition: Some(sample_definition()),
        };

        let source = Source::new(Box::new(backend), true, 4, None);
        let mac = [0xaa, 0xbb, 0xcc, 0, 0, 1];

        source.resolve(&mac).unwrap();
        source.resolve(&mac).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_mac_hook_fills_backend_miss() {
        let backend = CountingSource {
            calls: Arc::new(AtomicUsize::new(0)),
            definition: None,
        };

        let hook_definition = sample_definition();
        let hook: UnknownMacHook = Arc::new(move |_mac| Some(hook_definition.clone()));

        let source = Source::new(Box::new(backend), false, 4, Some(hook));
        let result = source.resolve(&[0, 0, 0, 0, 0, 1]).unwrap();

        assert_eq!(result.map(|d| d.ip), Some(Ipv4Addr::new(192, 0, 2, 50)));
    }
}
