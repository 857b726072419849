//! Shared test utilities for bridge integration tests
//!
//! Provides loopback-backed contexts, handle builders and recording callables.

#![allow(dead_code)]

use ndn_bridge::closure::{self, Closure, UpcallError, UpcallEvent, UpcallKind, UpcallResult};
use ndn_bridge::engine::LoopbackEngine;
use ndn_bridge::handle::{Handle, HandleTag, SigningParams};
use ndn_bridge::{BridgeContext, KeyAdapter, MemoryReporter, Session};
use ndn_bridge_config::{BridgeConfig, CryptoConfig, SessionConfig};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Loopback-backed context with an in-memory reporter
pub struct TestBridge {
    pub ctx: Arc<BridgeContext>,
    pub engine: Arc<LoopbackEngine>,
    pub reporter: MemoryReporter,
}

impl TestBridge {
    pub fn new() -> Self {
        Self::with_engine(LoopbackEngine::new(), BridgeConfig::default())
    }

    /// Interests expire after `lifetime`
    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self::with_engine(
            LoopbackEngine::with_interest_lifetime(lifetime),
            BridgeConfig::default(),
        )
    }

    /// Seed file under `dir`
    pub fn with_seed_dir(dir: &Path) -> Self {
        let config = BridgeConfig {
            crypto: Some(CryptoConfig {
                seed_file: Some(dir.join("seed")),
            }),
            ..BridgeConfig::default()
        };
        Self::with_engine(LoopbackEngine::new(), config)
    }

    /// `run(None)` returns after `ms`
    pub fn with_run_timeout(ms: i32) -> Self {
        let config = BridgeConfig {
            session: Some(SessionConfig {
                run_timeout_ms: Some(ms),
                ..SessionConfig::default()
            }),
            ..BridgeConfig::default()
        };
        Self::with_engine(LoopbackEngine::new(), config)
    }

    pub fn with_engine(engine: LoopbackEngine, config: BridgeConfig) -> Self {
        let engine = Arc::new(engine);
        let reporter = MemoryReporter::new();
        let ctx = BridgeContext::builder(engine.clone())
            .reporter(Arc::new(reporter.clone()))
            .config(config)
            .build();
        Self {
            ctx,
            engine,
            reporter,
        }
    }

    pub fn session(&self) -> Session {
        Session::new(&self.ctx).unwrap()
    }

    pub fn name(&self, uri: &str) -> Handle {
        Handle::from_bytes(&self.ctx, HandleTag::Name, uri.as_bytes()).unwrap()
    }

    pub fn content(&self, uri: &str, payload: &[u8]) -> Handle {
        let bytes = LoopbackEngine::encode_content(uri.as_bytes(), payload);
        Handle::from_bytes(&self.ctx, HandleTag::ContentObject, &bytes).unwrap()
    }

    /// One handle of every kind; the Closure handle is already abandoned
    pub fn handle_of(&self, tag: HandleTag) -> Handle {
        match tag {
            HandleTag::Session => Handle::new_session(&self.ctx).unwrap(),
            HandleTag::SigningParams => {
                Handle::from_signing_params(&self.ctx, SigningParams::default())
            }
            HandleTag::Closure => {
                let callable = Recorder::new().into_closure();
                let handle = closure::register(&self.ctx, &callable).unwrap();
                closure::abandon(&handle).unwrap();
                handle
            }
            HandleTag::PrivateKey | HandleTag::PublicKey => {
                let (private, public) = self.engine.generate_keypair(512, b"test").unwrap();
                let (keep, other, other_tag) = if tag == HandleTag::PrivateKey {
                    (private, public, HandleTag::PublicKey)
                } else {
                    (public, private, HandleTag::PrivateKey)
                };
                unsafe {
                    drop(Handle::from_key(&self.ctx, other_tag, other).unwrap());
                    Handle::from_key(&self.ctx, tag, keep).unwrap()
                }
            }
            buffer => Handle::from_bytes(&self.ctx, buffer, b"/test/bytes").unwrap(),
        }
    }
}

/// What a [`Recorder`] saw in one upcall
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub kind: UpcallKind,
    pub matched_comps: i32,
    pub interest: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

type Reply = Box<dyn Fn(UpcallKind, usize) -> UpcallResult + Send + Sync>;

/// Callable recording every upcall it receives
pub struct Recorder {
    seen: Mutex<Vec<Seen>>,
    reply: Reply,
}

impl Recorder {
    pub fn new() -> Self {
        Self::replying(|_, _| UpcallResult::Ok)
    }

    /// `reply(kind, n)` decides the result; `n` counts earlier upcalls of `kind`
    pub fn replying(reply: impl Fn(UpcallKind, usize) -> UpcallResult + Send + Sync + 'static) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        }
    }

    pub fn into_closure(self) -> Arc<dyn Closure> {
        Arc::new(self)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn kinds(&self) -> Vec<UpcallKind> {
        self.seen.lock().iter().map(|s| s.kind).collect()
    }

    pub fn count(&self, kind: UpcallKind) -> usize {
        self.seen.lock().iter().filter(|s| s.kind == kind).count()
    }
}

impl Closure for Recorder {
    fn upcall(&self, kind: UpcallKind, event: &UpcallEvent<'_>) -> Result<UpcallResult, UpcallError> {
        let interest = event.interest().map(|i| i.bytes()).transpose()?.map(<[u8]>::to_vec);
        let payload = match event.content() {
            Some(content) => {
                let parsed = content.parsed_content()?;
                Some(content.bytes()?[parsed.payload.clone()].to_vec())
            }
            None => None,
        };
        let mut seen = self.seen.lock();
        let earlier = seen.iter().filter(|s| s.kind == kind).count();
        seen.push(Seen {
            kind,
            matched_comps: event.matched_comps(),
            interest,
            payload,
        });
        drop(seen);
        Ok((self.reply)(kind, earlier))
    }
}

/// Answers interests by publishing `payload` under the interest name
pub struct Producer {
    pub session: Mutex<Weak<Session>>,
    pub payload: Vec<u8>,
    pub answered: Mutex<Vec<Vec<u8>>>,
}

impl Producer {
    pub fn new(payload: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(Weak::new()),
            payload: payload.to_vec(),
            answered: Mutex::new(Vec::new()),
        })
    }

    pub fn attach(&self, session: &Arc<Session>) {
        *self.session.lock() = Arc::downgrade(session);
    }
}

impl Closure for Producer {
    fn upcall(&self, kind: UpcallKind, event: &UpcallEvent<'_>) -> Result<UpcallResult, UpcallError> {
        if kind != UpcallKind::Interest {
            return Ok(UpcallResult::Ok);
        }
        let Some(session) = self.session.lock().upgrade() else {
            return Err(UpcallError::Failed("producer session gone".to_string()));
        };
        let Some(interest) = event.interest() else {
            return Ok(UpcallResult::Ok);
        };
        let name = interest.bytes()?;
        let content = LoopbackEngine::encode_content(name, &self.payload);
        let content = Handle::from_bytes(session.context(), HandleTag::ContentObject, &content)?;
        session.put(&content)?;
        self.answered.lock().push(name.to_vec());
        Ok(UpcallResult::InterestConsumed)
    }
}
