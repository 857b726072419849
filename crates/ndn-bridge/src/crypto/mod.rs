//! Crypto adapter boundary
//!
//! Key material lives in engine-owned key objects. [`KeyAdapter`] is the set of
//! key operations an engine offers through [`NativeEngine::key_adapter`]; the
//! [`Key`] object pairs the resulting private and public key handles and adds
//! PEM armor and public key digests on top.
//!
//! [`NativeEngine::key_adapter`]: crate::engine::NativeEngine::key_adapter

pub mod digest;
pub mod pem;
pub mod seed;

use crate::context::BridgeContext;
use crate::engine::KeyPtr;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleTag};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub use digest::{public_key_digest, DIGEST_LEN};
pub use seed::{seed_prng, SeedChain, SeededRng};

/// Amount of entropy handed to key generation
pub const KEYGEN_ENTROPY_BYTES: usize = 32;

/// Key operations on engine key objects. Returned keys are owned by the
/// caller and freed with the engine's `free_key`.
pub trait KeyAdapter: Send + Sync {
    /// Generate a `(private, public)` pair of `bits` bits from `entropy`
    fn generate_keypair(&self, bits: u32, entropy: &[u8]) -> BridgeResult<(KeyPtr, KeyPtr)>;

    fn private_to_der(&self, key: KeyPtr) -> BridgeResult<Vec<u8>>;

    /// DER of the public half; accepts private keys too
    fn public_to_der(&self, key: KeyPtr) -> BridgeResult<Vec<u8>>;

    /// Load a private key, returning it with its public half
    fn private_from_der(&self, der: &[u8]) -> BridgeResult<(KeyPtr, KeyPtr)>;

    fn public_from_der(&self, der: &[u8]) -> BridgeResult<KeyPtr>;

    fn duplicate_private(&self, key: KeyPtr) -> BridgeResult<KeyPtr>;
}

fn adapter(ctx: &BridgeContext) -> BridgeResult<&dyn KeyAdapter> {
    ctx.engine()
        .key_adapter()
        .ok_or_else(|| BridgeError::InvalidArgument("engine has no key support".to_string()))
}

/// A key pair, or a lone public key
pub struct Key {
    ctx: Arc<BridgeContext>,
    private: Option<Handle>,
    public: Handle,
    public_key_id: [u8; DIGEST_LEN],
}

impl Key {
    /// Generate a new pair, seeding from the configured seed chain
    pub fn generate(ctx: &Arc<BridgeContext>, bits: u32) -> BridgeResult<Key> {
        let keys = adapter(ctx)?;
        let chain = SeedChain::from_config(ctx.config())?;
        let mut prng = seed_prng(&chain);
        let mut entropy = [0u8; KEYGEN_ENTROPY_BYTES];
        prng.fill(&mut entropy);

        let (private, public) = keys.generate_keypair(bits, &entropy)?;
        let key = Self::from_pair(ctx, private, public)?;
        prng.save_seed()?;
        debug!(bits, "generated key pair");
        Ok(key)
    }

    pub fn from_private_der(ctx: &Arc<BridgeContext>, der: &[u8]) -> BridgeResult<Key> {
        let (private, public) = adapter(ctx)?.private_from_der(der)?;
        Self::from_pair(ctx, private, public)
    }

    pub fn from_public_der(ctx: &Arc<BridgeContext>, der: &[u8]) -> BridgeResult<Key> {
        let keys = adapter(ctx)?;
        let public = keys.public_from_der(der)?;
        // SAFETY: fresh key from the context's engine.
        let public = unsafe { Handle::from_key(ctx, HandleTag::PublicKey, public)? };
        Ok(Key {
            ctx: Arc::clone(ctx),
            private: None,
            public,
            public_key_id: public_key_digest(der),
        })
    }

    pub fn from_private_pem(ctx: &Arc<BridgeContext>, text: &str) -> BridgeResult<Key> {
        Self::from_private_der(ctx, &pem::decode(pem::PRIVATE_KEY_LABEL, text)?)
    }

    pub fn from_public_pem(ctx: &Arc<BridgeContext>, text: &str) -> BridgeResult<Key> {
        Self::from_public_der(ctx, &pem::decode(pem::PUBLIC_KEY_LABEL, text)?)
    }

    /// Read a private key from a PEM file
    pub fn read_private_pem(ctx: &Arc<BridgeContext>, path: &Path) -> BridgeResult<Key> {
        let text = std::fs::read_to_string(path)?;
        Self::from_private_pem(ctx, &text)
    }

    fn from_pair(ctx: &Arc<BridgeContext>, private: KeyPtr, public: KeyPtr) -> BridgeResult<Key> {
        // SAFETY: fresh keys from the context's engine, owned by us from here on.
        let private = unsafe { Handle::from_key(ctx, HandleTag::PrivateKey, private)? };
        let public = unsafe { Handle::from_key(ctx, HandleTag::PublicKey, public)? };
        let der = adapter(ctx)?.public_to_der(public.key_ptr(HandleTag::PublicKey)?)?;
        Ok(Key {
            ctx: Arc::clone(ctx),
            private: Some(private),
            public,
            public_key_id: public_key_digest(&der),
        })
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    pub fn private_handle(&self) -> Option<&Handle> {
        self.private.as_ref()
    }

    pub fn public_handle(&self) -> &Handle {
        &self.public
    }

    /// SHA-256 of the DER public key
    pub fn public_key_id(&self) -> [u8; DIGEST_LEN] {
        self.public_key_id
    }

    pub fn private_to_der(&self) -> BridgeResult<Vec<u8>> {
        adapter(&self.ctx)?.private_to_der(self.private_ptr()?)
    }

    pub fn public_to_der(&self) -> BridgeResult<Vec<u8>> {
        adapter(&self.ctx)?.public_to_der(self.public.key_ptr(HandleTag::PublicKey)?)
    }

    pub fn private_to_pem(&self) -> BridgeResult<String> {
        Ok(pem::encode(pem::PRIVATE_KEY_LABEL, &self.private_to_der()?))
    }

    pub fn public_to_pem(&self) -> BridgeResult<String> {
        Ok(pem::encode(pem::PUBLIC_KEY_LABEL, &self.public_to_der()?))
    }

    /// Write the private key to a PEM file
    pub fn write_private_pem(&self, path: &Path) -> BridgeResult<()> {
        std::fs::write(path, self.private_to_pem()?)?;
        Ok(())
    }

    /// Independent copy of the private key in a new handle
    pub fn duplicate_private(&self) -> BridgeResult<Handle> {
        let copy = adapter(&self.ctx)?.duplicate_private(self.private_ptr()?)?;
        // SAFETY: fresh key from the context's engine.
        unsafe { Handle::from_key(&self.ctx, HandleTag::PrivateKey, copy) }
    }

    fn private_ptr(&self) -> BridgeResult<KeyPtr> {
        self.private
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidArgument("Key has no private part".to_string()))?
            .key_ptr(HandleTag::PrivateKey)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("private", &self.private.is_some())
            .field("public_key_id", &digest::to_hex(&self.public_key_id))
            .finish()
    }
}
