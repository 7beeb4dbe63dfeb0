//! Message and identity types shared by the server and its clients.
//!
//! Identities use the 24-hex-character document id format, and message
//! fields serialize in camelCase for browser clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Length of a well-formed identity reference.
pub const USER_ID_LENGTH: usize = 24;

/// A message identifier assigned by storage.
pub type MessageId = String;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
static ID_SEED: OnceLock<u64> = OnceLock::new();

/// Generate a 24-hex-character identifier.
///
/// The first 8 characters encode the creation second, the remaining 16 a
/// per-process counter offset by a startup seed, so ids sort roughly by
/// creation time and never repeat within a process.
#[must_use]
pub fn generate_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let seed = *ID_SEED.get_or_init(|| now.as_nanos() as u64);
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:08x}{:016x}", now.as_secs() as u32, seed.wrapping_add(counter))
}

/// Returned when a string is not a well-formed identity reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid user id: {0:?}")]
pub struct InvalidUserId(pub String);

/// Stable reference to a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parse an identity reference, lowercasing it.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input is exactly 24 hex characters.
    pub fn parse(value: &str) -> Result<Self, InvalidUserId> {
        if value.len() != USER_ID_LENGTH || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidUserId(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Generate a fresh identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_id())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = InvalidUserId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = InvalidUserId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Public profile fields joined onto a sender by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(
        rename = "profilePic",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_pic: Option<String>,
}

/// The sender of a message, either bare or expanded with profile fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SenderRef {
    Id(UserId),
    Profile(SenderProfile),
}

impl SenderRef {
    /// The identity this reference points at.
    #[must_use]
    pub fn id(&self) -> &UserId {
        match self {
            SenderRef::Id(id) => id,
            SenderRef::Profile(profile) => &profile.id,
        }
    }

    /// Collapse to a bare identity reference.
    #[must_use]
    pub fn into_bare(self) -> Self {
        match self {
            SenderRef::Id(id) => SenderRef::Id(id),
            SenderRef::Profile(profile) => SenderRef::Id(profile.id),
        }
    }

    /// Whether this reference is already bare.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        matches!(self, SenderRef::Id(_))
    }
}

impl From<UserId> for SenderRef {
    fn from(id: UserId) -> Self {
        SenderRef::Id(id)
    }
}

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub sender_id: SenderRef,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl ChatMessage {
    /// Canonical view with a bare sender reference.
    ///
    /// Idempotent: normalizing an already normalized message returns it
    /// unchanged.
    #[must_use]
    pub fn normalize(self) -> Self {
        Self {
            sender_id: self.sender_id.into_bare(),
            ..self
        }
    }

    /// The sender's identity, whatever its representation.
    #[must_use]
    pub fn sender(&self) -> &UserId {
        self.sender_id.id()
    }

    /// Whether this message was exchanged between `a` and `b` in either direction.
    #[must_use]
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        let sender = self.sender();
        (sender == a && &self.receiver_id == b) || (sender == b && &self.receiver_id == a)
    }
}
