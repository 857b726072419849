//! Handle type tags
//!
//! The closed set of native pointer kinds a handle may wrap. Each tag carries a
//! stable capsule name used in diagnostics and type-mismatch messages.

use std::fmt;

/// Kind of native object wrapped by a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleTag {
    /// Native callback record (`NativeClosure`)
    Closure,
    /// Encoded content object buffer
    ContentObject,
    /// Encoded exclusion filter buffer
    ExclusionFilter,
    /// Engine session (connection to the daemon)
    Session,
    /// Encoded interest buffer
    Interest,
    /// Encoded key locator buffer
    KeyLocator,
    /// Encoded name buffer
    Name,
    /// Engine-owned private key
    PrivateKey,
    /// Engine-owned public key
    PublicKey,
    /// Encoded signature buffer
    Signature,
    /// Encoded signed-info buffer
    SignedInfo,
    /// Signing parameters record
    SigningParams,
}

impl HandleTag {
    /// Number of tags
    pub const COUNT: usize = 12;

    /// Every tag, in declaration order
    pub const ALL: [HandleTag; HandleTag::COUNT] = [
        HandleTag::Closure,
        HandleTag::ContentObject,
        HandleTag::ExclusionFilter,
        HandleTag::Session,
        HandleTag::Interest,
        HandleTag::KeyLocator,
        HandleTag::Name,
        HandleTag::PrivateKey,
        HandleTag::PublicKey,
        HandleTag::Signature,
        HandleTag::SignedInfo,
        HandleTag::SigningParams,
    ];

    /// Capsule name of this tag
    pub fn capsule_name(self) -> &'static str {
        match self {
            HandleTag::Closure => "Closure_ndn_data",
            HandleTag::ContentObject => "ContentObject_ndn_data",
            HandleTag::ExclusionFilter => "ExclusionFilter_ndn_data",
            HandleTag::Session => "NDN_ndn_data",
            HandleTag::Interest => "Interest_ndn_data",
            HandleTag::KeyLocator => "KeyLocator_ndn_data",
            HandleTag::Name => "Name_ndn_data",
            HandleTag::PrivateKey => "PKEY_PRIV_ndn_data",
            HandleTag::PublicKey => "PKEY_PUB_ndn_data",
            HandleTag::Signature => "Signature_ndn_data",
            HandleTag::SignedInfo => "SignedInfo_ndn_data",
            HandleTag::SigningParams => "SigningParams_ndn_data",
        }
    }

    /// Look up a tag by capsule name
    pub fn from_capsule_name(name: &str) -> Option<HandleTag> {
        HandleTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.capsule_name() == name)
    }

    /// Dense index, used for per-tag bookkeeping
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether the handle's pointer is a `CharBuf`
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            HandleTag::ContentObject
                | HandleTag::ExclusionFilter
                | HandleTag::Interest
                | HandleTag::KeyLocator
                | HandleTag::Name
                | HandleTag::Signature
                | HandleTag::SignedInfo
        )
    }

    /// Whether handles of this tag carry a parse cache
    pub fn has_parse_cache(self) -> bool {
        matches!(self, HandleTag::ContentObject | HandleTag::Interest)
    }
}

impl fmt::Display for HandleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capsule_name())
    }
}
