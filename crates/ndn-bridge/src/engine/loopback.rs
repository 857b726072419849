//! In-process loopback engine
//!
//! Every session created by one `LoopbackEngine` is attached to the same hub.
//! Interests expressed on one session are offered to the filters of the others
//! when those run; content put by any session is kept in a shared store and
//! satisfies matching interests. Names are `/`-separated URIs (an `ndn:` scheme
//! prefix is accepted). A content object is encoded as its name, a NUL byte and
//! the payload; an interest is encoded as its bare name.
//!
//! Keys are opaque DER-like blobs derived from caller-supplied entropy. They
//! are not cryptographic keys.

use super::{ClosurePtr, KeyPtr, NativeEngine, SessionPtr, FORW_ACTIVE};
use crate::closure::{NativeUpcallInfo, UpcallKind, UpcallResult};
use crate::crypto::KeyAdapter;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{CharBuf, ParsedContent, ParsedInterest};
use ndn_bridge_config::BridgeConfig;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ffi::c_void;
use std::ops::Range;
use std::os::raw::c_int;
use std::ptr::NonNull;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const EINVAL: c_int = 22;
const ENOMEM: c_int = 12;
const POLL_INTERVAL: Duration = Duration::from_millis(1);
const FIRST_FD: c_int = 3;
const KEY_MAGIC: &[u8; 4] = b"LBK1";
const KEY_PRIVATE: u8 = 1;
const KEY_PUBLIC: u8 = 2;

/// Counters exposed for tests
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackStats {
    pub sessions_created: usize,
    pub sessions_destroyed: usize,
    pub keys_created: usize,
    pub keys_freed: usize,
    pub upcalls: usize,
}

// Non-zero-sized so every allocation has a distinct address.
struct Marker(#[allow(dead_code)] u8);

struct SessionState {
    connected: bool,
    fd: c_int,
    last_error: c_int,
    run_timeout: c_int,
    output_pending: bool,
    filters: Vec<Filter>,
}

struct Filter {
    prefix: Vec<u8>,
    closure: ClosurePtr,
    flags: c_int,
}

struct Pending {
    id: u64,
    owner: usize,
    name: Vec<u8>,
    closure: Option<ClosurePtr>,
    deadline: Instant,
    seen_by: Vec<usize>,
    consumed: bool,
}

#[derive(Clone)]
struct LoopbackKey {
    private: bool,
    material: Vec<u8>,
}

#[derive(Default)]
struct Hub {
    sessions: HashMap<usize, SessionState>,
    store: Vec<Vec<u8>>,
    pending: Vec<Pending>,
    keys: HashMap<usize, LoopbackKey>,
    next_id: u64,
    next_fd: c_int,
    stats: LoopbackStats,
}

impl Hub {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_content(&self, name: &[u8]) -> Option<&Vec<u8>> {
        self.store
            .iter()
            .find(|content| content_matches(name, content))
    }

    fn add_key(&mut self, key: LoopbackKey) -> KeyPtr {
        let marker = NonNull::from(Box::leak(Box::new(Marker(0)))).cast::<c_void>();
        self.keys.insert(marker.as_ptr() as usize, key);
        self.stats.keys_created += 1;
        KeyPtr::new(marker)
    }

    fn key(&self, key: KeyPtr) -> BridgeResult<&LoopbackKey> {
        self.keys
            .get(&key.addr())
            .ok_or_else(|| BridgeError::InvalidArgument("unknown loopback key".to_string()))
    }
}

enum Action {
    Content {
        closure: ClosurePtr,
        name: Vec<u8>,
        content: Vec<u8>,
        matched: c_int,
    },
    TimedOut {
        closure: ClosurePtr,
        name: Vec<u8>,
    },
    Incoming {
        id: u64,
        closure: ClosurePtr,
        name: Vec<u8>,
        matched: c_int,
    },
}

/// Shared in-process engine
pub struct LoopbackEngine {
    hub: Mutex<Hub>,
    interest_lifetime: Duration,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::with_interest_lifetime(Duration::from_millis(
            ndn_bridge_config::DEFAULT_INTEREST_LIFETIME_MS,
        ))
    }

    /// Engine honouring the configured interest lifetime
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::with_interest_lifetime(Duration::from_millis(config.interest_lifetime_ms()))
    }

    pub fn with_interest_lifetime(lifetime: Duration) -> Self {
        Self {
            hub: Mutex::new(Hub {
                next_fd: FIRST_FD,
                ..Hub::default()
            }),
            interest_lifetime: lifetime,
        }
    }

    /// Encode a content object
    pub fn encode_content(name: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(name.len() + 1 + payload.len());
        out.extend_from_slice(name);
        out.push(0);
        out.extend_from_slice(payload);
        out
    }

    pub fn stats(&self) -> LoopbackStats {
        self.hub.lock().stats
    }

    /// Number of content objects held by the hub
    pub fn stored_content(&self) -> usize {
        self.hub.lock().store.len()
    }

    /// Outstanding interests, from every session
    pub fn pending_interests(&self) -> usize {
        self.hub.lock().pending.len()
    }

    fn with_session<R>(&self, session: SessionPtr, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        self.hub.lock().sessions.get_mut(&session.addr()).map(f)
    }

    fn has_pending(&self, key: usize) -> bool {
        self.hub
            .lock()
            .pending
            .iter()
            .any(|p| p.owner == key && p.closure.is_some())
    }

    fn filter_registered(&self, key: usize, closure: ClosurePtr) -> bool {
        self.hub
            .lock()
            .sessions
            .get(&key)
            .map(|s| s.filters.iter().any(|f| f.closure == closure))
            .unwrap_or(false)
    }

    fn rearm(&self, key: usize, name: Vec<u8>, closure: ClosurePtr) {
        let mut hub = self.hub.lock();
        let id = hub.next_id();
        hub.pending.push(Pending {
            id,
            owner: key,
            name,
            closure: Some(closure),
            deadline: Instant::now() + self.interest_lifetime,
            seen_by: Vec::new(),
            consumed: false,
        });
    }

    fn collect(&self, key: usize) -> Option<Vec<Action>> {
        let mut guard = self.hub.lock();
        let hub = &mut *guard;
        let state = hub.sessions.get_mut(&key)?;
        if !state.connected {
            return None;
        }
        state.output_pending = false;
        let filters: Vec<(Vec<u8>, ClosurePtr)> = state
            .filters
            .iter()
            .filter(|f| f.flags & FORW_ACTIVE != 0)
            .map(|f| (f.prefix.clone(), f.closure))
            .collect();

        let now = Instant::now();
        let mut actions = Vec::new();
        let mut done = Vec::new();
        for p in hub.pending.iter_mut() {
            if p.owner == key {
                if let Some(closure) = p.closure {
                    if let Some(content) = hub.store.iter().find(|c| content_matches(&p.name, c)) {
                        actions.push(Action::Content {
                            closure,
                            name: p.name.clone(),
                            content: content.clone(),
                            matched: name_components(&p.name).len() as c_int,
                        });
                        done.push(p.id);
                    } else if now >= p.deadline {
                        actions.push(Action::TimedOut {
                            closure,
                            name: p.name.clone(),
                        });
                        done.push(p.id);
                    }
                }
                continue;
            }
            if p.seen_by.contains(&key) {
                continue;
            }
            p.seen_by.push(key);
            for (prefix, closure) in &filters {
                if let Some(matched) = prefix_match(prefix, &p.name) {
                    actions.push(Action::Incoming {
                        id: p.id,
                        closure: *closure,
                        name: p.name.clone(),
                        matched: matched as c_int,
                    });
                }
            }
        }
        hub.pending.retain(|p| !done.contains(&p.id));
        hub.stats.upcalls += actions.len();
        Some(actions)
    }

    fn fire(&self, key: usize, action: Action) {
        let empty = NativeUpcallInfo::empty();
        match action {
            Action::Content {
                closure,
                name,
                content,
                matched,
            } => {
                let info = empty.with_interest(&name, matched).with_content(&content);
                // SAFETY: the record stays allocated until it receives Final.
                let r = unsafe { closure.invoke(UpcallKind::Content, &info) };
                if r == UpcallResult::Reexpress as c_int {
                    self.rearm(key, name, closure);
                } else {
                    self.finalize(closure);
                }
            }
            Action::TimedOut { closure, name } => {
                let info = empty.with_interest(&name, name_components(&name).len() as c_int);
                // SAFETY: as above.
                let r = unsafe { closure.invoke(UpcallKind::InterestTimedOut, &info) };
                if r == UpcallResult::Reexpress as c_int {
                    self.rearm(key, name, closure);
                } else {
                    self.finalize(closure);
                }
            }
            Action::Incoming {
                id,
                closure,
                name,
                matched,
            } => {
                // An earlier upcall in this pass may have replaced the filter.
                if !self.filter_registered(key, closure) {
                    return;
                }
                let consumed = self
                    .hub
                    .lock()
                    .pending
                    .iter()
                    .find(|p| p.id == id)
                    .map(|p| p.consumed)
                    .unwrap_or(false);
                let kind = if consumed {
                    UpcallKind::ConsumedInterest
                } else {
                    UpcallKind::Interest
                };
                let info = empty.with_interest(&name, matched);
                // SAFETY: the filter still holds the record.
                let r = unsafe { closure.invoke(kind, &info) };
                if r == UpcallResult::InterestConsumed as c_int {
                    if let Some(p) = self.hub.lock().pending.iter_mut().find(|p| p.id == id) {
                        p.consumed = true;
                    }
                }
            }
        }
    }

    fn finalize(&self, closure: ClosurePtr) {
        self.hub.lock().stats.upcalls += 1;
        // SAFETY: the engine gives up the record with this call.
        unsafe { closure.invoke(UpcallKind::Final, &NativeUpcallInfo::empty()) };
    }

    fn generate_material(bits: u32, entropy: &[u8]) -> Vec<u8> {
        let seed: [u8; 32] = Sha256::digest(entropy).into();
        let mut rng = StdRng::from_seed(seed);
        let mut material = vec![0u8; (bits / 8) as usize];
        rng.fill(&mut material[..]);
        material
    }

    fn encode_key(key: &LoopbackKey) -> Vec<u8> {
        let mut der = KEY_MAGIC.to_vec();
        der.push(if key.private { KEY_PRIVATE } else { KEY_PUBLIC });
        der.extend_from_slice(&key.material);
        der
    }

    fn decode_key(der: &[u8], expected: u8) -> BridgeResult<Vec<u8>> {
        match der {
            [m0, m1, m2, m3, kind, material @ ..]
                if [*m0, *m1, *m2, *m3] == *KEY_MAGIC && *kind == expected && !material.is_empty() =>
            {
                Ok(material.to_vec())
            }
            _ => Err(BridgeError::InvalidArgument(
                "not a loopback key encoding".to_string(),
            )),
        }
    }

    fn public_material(private_material: &[u8]) -> Vec<u8> {
        Sha256::digest(private_material).to_vec()
    }
}

fn name_components(name: &[u8]) -> Vec<Range<usize>> {
    let start = if name.starts_with(b"ndn:") { 4 } else { 0 };
    let mut comps = Vec::new();
    let mut seg_start = start;
    for (i, &b) in name.iter().enumerate().skip(start) {
        if b == b'/' {
            if i > seg_start {
                comps.push(seg_start..i);
            }
            seg_start = i + 1;
        }
    }
    if name.len() > seg_start {
        comps.push(seg_start..name.len());
    }
    comps
}

/// Number of components of `prefix` if it is a component-wise prefix of `name`
fn prefix_match(prefix: &[u8], name: &[u8]) -> Option<usize> {
    let p = name_components(prefix);
    let n = name_components(name);
    if p.len() > n.len() {
        return None;
    }
    p.iter()
        .zip(n.iter())
        .all(|(a, b)| prefix[a.clone()] == name[b.clone()])
        .then_some(p.len())
}

fn same_name(a: &[u8], b: &[u8]) -> bool {
    name_components(a).len() == name_components(b).len() && prefix_match(a, b).is_some()
}

fn content_matches(interest_name: &[u8], content: &[u8]) -> bool {
    match content.iter().position(|&b| b == 0) {
        Some(end) => prefix_match(interest_name, &content[..end]).is_some(),
        None => false,
    }
}

impl NativeEngine for LoopbackEngine {
    fn create_session(&self) -> Option<SessionPtr> {
        let marker = NonNull::from(Box::leak(Box::new(Marker(0)))).cast::<c_void>();
        let mut hub = self.hub.lock();
        hub.sessions.insert(
            marker.as_ptr() as usize,
            SessionState {
                connected: false,
                fd: -1,
                last_error: 0,
                run_timeout: -1,
                output_pending: false,
                filters: Vec::new(),
            },
        );
        hub.stats.sessions_created += 1;
        Some(SessionPtr::new(marker))
    }

    unsafe fn destroy_session(&self, session: SessionPtr) {
        let key = session.addr();
        let finals: Vec<ClosurePtr> = {
            let mut hub = self.hub.lock();
            let mut closures = Vec::new();
            if let Some(state) = hub.sessions.remove(&key) {
                closures.extend(state.filters.into_iter().map(|f| f.closure));
            }
            hub.pending.retain(|p| {
                if p.owner != key {
                    return true;
                }
                if let Some(closure) = p.closure {
                    closures.push(closure);
                }
                false
            });
            hub.stats.sessions_destroyed += 1;
            closures
        };
        debug!(finals = finals.len(), "destroying loopback session");
        for closure in finals {
            self.finalize(closure);
        }
        drop(Box::from_raw(session.as_ptr().cast::<Marker>()));
    }

    fn connect(&self, session: SessionPtr) -> c_int {
        let mut hub = self.hub.lock();
        let fd = hub.next_fd;
        match hub.sessions.get_mut(&session.addr()) {
            Some(state) if state.connected => state.fd,
            Some(state) => {
                state.connected = true;
                state.fd = fd;
                hub.next_fd += 1;
                fd
            }
            None => -1,
        }
    }

    fn disconnect(&self, session: SessionPtr) -> c_int {
        self.with_session(session, |state| {
            state.connected = false;
            state.fd = -1;
            0
        })
        .unwrap_or(-1)
    }

    fn connection_fd(&self, session: SessionPtr) -> c_int {
        self.with_session(session, |state| if state.connected { state.fd } else { -1 })
            .unwrap_or(-1)
    }

    fn run(&self, session: SessionPtr, timeout_ms: c_int) -> c_int {
        let key = session.addr();
        let timeout = match self.with_session(session, |state| {
            if !state.connected {
                state.last_error = 0;
                return None;
            }
            Some(if timeout_ms < 0 { state.run_timeout } else { timeout_ms })
        }) {
            Some(Some(timeout)) => timeout,
            _ => return -1,
        };

        let deadline = (timeout >= 0).then(|| Instant::now() + Duration::from_millis(timeout as u64));
        loop {
            let Some(actions) = self.collect(key) else {
                return -1;
            };
            let fired = actions.len();
            for action in actions {
                self.fire(key, action);
            }
            trace!(fired, "loopback pass");

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    if fired == 0 {
                        thread::sleep(POLL_INTERVAL.min(deadline - now));
                    }
                }
                None => {
                    if fired == 0 {
                        if !self.has_pending(key) {
                            break;
                        }
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        }
        0
    }

    fn set_run_timeout(&self, session: SessionPtr, timeout_ms: c_int) -> c_int {
        self.with_session(session, |state| std::mem::replace(&mut state.run_timeout, timeout_ms))
            .unwrap_or(-1)
    }

    fn process_scheduled_operations(&self, session: SessionPtr) -> c_int {
        let key = session.addr();
        let hub = self.hub.lock();
        let now = Instant::now();
        hub.pending
            .iter()
            .filter(|p| p.owner == key && p.closure.is_some())
            .map(|p| p.deadline.saturating_duration_since(now))
            .min()
            .map(|d| d.as_micros().min(c_int::MAX as u128) as c_int)
            .unwrap_or(1_000_000)
    }

    fn output_is_pending(&self, session: SessionPtr) -> bool {
        self.with_session(session, |state| state.output_pending)
            .unwrap_or(false)
    }

    fn express_interest(
        &self,
        session: SessionPtr,
        name: &[u8],
        closure: ClosurePtr,
        _template: Option<&[u8]>,
    ) -> c_int {
        let key = session.addr();
        let mut hub = self.hub.lock();
        let id = hub.next_id();
        let Some(state) = hub.sessions.get_mut(&key) else {
            return -1;
        };
        if !state.connected {
            state.last_error = 0;
            return -1;
        }
        state.output_pending = true;
        hub.pending.push(Pending {
            id,
            owner: key,
            name: name.to_vec(),
            closure: Some(closure),
            deadline: Instant::now() + self.interest_lifetime,
            seen_by: Vec::new(),
            consumed: false,
        });
        0
    }

    fn set_interest_filter(
        &self,
        session: SessionPtr,
        name: &[u8],
        closure: Option<ClosurePtr>,
        forw_flags: c_int,
    ) -> c_int {
        let replaced = {
            let mut hub = self.hub.lock();
            let Some(state) = hub.sessions.get_mut(&session.addr()) else {
                return -1;
            };
            let pos = state.filters.iter().position(|f| same_name(&f.prefix, name));
            match (pos, closure) {
                (Some(i), Some(closure)) => {
                    state.filters[i].flags = forw_flags;
                    Some(std::mem::replace(&mut state.filters[i].closure, closure))
                }
                (Some(i), None) => Some(state.filters.remove(i).closure),
                (None, Some(closure)) => {
                    state.filters.push(Filter {
                        prefix: name.to_vec(),
                        closure,
                        flags: forw_flags,
                    });
                    None
                }
                (None, None) => None,
            }
        };
        if let Some(old) = replaced {
            if Some(old) != closure {
                self.finalize(old);
            }
        }
        0
    }

    fn get(
        &self,
        session: SessionPtr,
        name: &[u8],
        _template: Option<&[u8]>,
        timeout_ms: c_int,
        out: &mut CharBuf,
    ) -> c_int {
        let key = session.addr();
        let timeout = if timeout_ms < 0 {
            self.interest_lifetime
        } else {
            Duration::from_millis(timeout_ms as u64)
        };
        let deadline = Instant::now() + timeout;

        let id = {
            let mut hub = self.hub.lock();
            let id = hub.next_id();
            let Some(state) = hub.sessions.get_mut(&key) else {
                return -1;
            };
            if !state.connected {
                state.last_error = 0;
                return -1;
            }
            hub.pending.push(Pending {
                id,
                owner: key,
                name: name.to_vec(),
                closure: None,
                deadline,
                seen_by: Vec::new(),
                consumed: false,
            });
            id
        };

        loop {
            {
                let mut hub = self.hub.lock();
                let found = hub.find_content(name).cloned();
                if let Some(content) = found {
                    hub.pending.retain(|p| p.id != id);
                    out.clear();
                    return match out.append(&content) {
                        Ok(()) => 0,
                        Err(_) => {
                            if let Some(state) = hub.sessions.get_mut(&key) {
                                state.last_error = ENOMEM;
                            }
                            -1
                        }
                    };
                }
                if Instant::now() >= deadline {
                    hub.pending.retain(|p| p.id != id);
                    if let Some(state) = hub.sessions.get_mut(&key) {
                        state.last_error = 0;
                    }
                    return -1;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn put(&self, session: SessionPtr, content: &[u8]) -> c_int {
        let mut hub = self.hub.lock();
        let Some(state) = hub.sessions.get_mut(&session.addr()) else {
            return -1;
        };
        if !state.connected {
            state.last_error = 0;
            return -1;
        }
        if !content.contains(&0) {
            state.last_error = EINVAL;
            return -1;
        }
        state.output_pending = true;
        if !hub.store.iter().any(|c| c == content) {
            hub.store.push(content.to_vec());
        }
        0
    }

    fn last_error(&self, session: SessionPtr) -> c_int {
        self.with_session(session, |state| state.last_error)
            .unwrap_or(0)
    }

    fn parse_content(&self, bytes: &[u8]) -> Result<ParsedContent, c_int> {
        let end = bytes.iter().position(|&b| b == 0).ok_or(EINVAL)?;
        Ok(ParsedContent {
            name: 0..end,
            payload: end + 1..bytes.len(),
            end: bytes.len(),
            components: name_components(&bytes[..end]),
        })
    }

    fn parse_interest(&self, bytes: &[u8]) -> Result<ParsedInterest, c_int> {
        if bytes.contains(&0) {
            return Err(EINVAL);
        }
        Ok(ParsedInterest {
            name: 0..bytes.len(),
            end: bytes.len(),
            components: name_components(bytes),
        })
    }

    unsafe fn free_key(&self, key: KeyPtr) {
        {
            let mut hub = self.hub.lock();
            if hub.keys.remove(&key.addr()).is_some() {
                hub.stats.keys_freed += 1;
            }
        }
        drop(Box::from_raw(key.as_ptr().cast::<Marker>()));
    }

    fn key_adapter(&self) -> Option<&dyn KeyAdapter> {
        Some(self)
    }
}

impl KeyAdapter for LoopbackEngine {
    fn generate_keypair(&self, bits: u32, entropy: &[u8]) -> BridgeResult<(KeyPtr, KeyPtr)> {
        if bits < 512 || bits % 8 != 0 {
            return Err(BridgeError::InvalidArgument(format!(
                "unsupported key size {}",
                bits
            )));
        }
        let material = Self::generate_material(bits, entropy);
        let public = Self::public_material(&material);
        let mut hub = self.hub.lock();
        let private = hub.add_key(LoopbackKey {
            private: true,
            material,
        });
        let public = hub.add_key(LoopbackKey {
            private: false,
            material: public,
        });
        Ok((private, public))
    }

    fn private_to_der(&self, key: KeyPtr) -> BridgeResult<Vec<u8>> {
        let hub = self.hub.lock();
        let key = hub.key(key)?;
        if !key.private {
            return Err(BridgeError::InvalidArgument("key has no private part".to_string()));
        }
        Ok(Self::encode_key(key))
    }

    fn public_to_der(&self, key: KeyPtr) -> BridgeResult<Vec<u8>> {
        let hub = self.hub.lock();
        let key = hub.key(key)?;
        let public = if key.private {
            LoopbackKey {
                private: false,
                material: Self::public_material(&key.material),
            }
        } else {
            key.clone()
        };
        Ok(Self::encode_key(&public))
    }

    fn private_from_der(&self, der: &[u8]) -> BridgeResult<(KeyPtr, KeyPtr)> {
        let material = Self::decode_key(der, KEY_PRIVATE)?;
        let public = Self::public_material(&material);
        let mut hub = self.hub.lock();
        let private = hub.add_key(LoopbackKey {
            private: true,
            material,
        });
        let public = hub.add_key(LoopbackKey {
            private: false,
            material: public,
        });
        Ok((private, public))
    }

    fn public_from_der(&self, der: &[u8]) -> BridgeResult<KeyPtr> {
        let material = Self::decode_key(der, KEY_PUBLIC)?;
        Ok(self.hub.lock().add_key(LoopbackKey {
            private: false,
            material,
        }))
    }

    fn duplicate_private(&self, key: KeyPtr) -> BridgeResult<KeyPtr> {
        let mut hub = self.hub.lock();
        let copy = hub.key(key)?.clone();
        if !copy.private {
            return Err(BridgeError::InvalidArgument("key has no private part".to_string()));
        }
        Ok(hub.add_key(copy))
    }
}
