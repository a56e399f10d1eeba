//! # Client Identity
//!
//! Pseudonymous client identifiers for like deduplication.
//!
//! There are no accounts, so a "client" is whatever the request metadata says it is: the
//! connecting address plus the user agent. Both are hashed so the raw address never reaches
//! storage.
//!
//! ## Derivation
//!
//! - address (or `unknown`) followed by user agent (or empty), no separator
//! - SHA-256 over the raw header bytes, UTF-8 or not
//! - standard base64, first 24 characters
//!
//! Same inputs always give the same identifier, which is the whole reason dedup works without
//! sessions. Clients behind one NAT/proxy with the same browser collide; that is accepted.
use std::fmt;

use axum::http::{HeaderMap, header::USER_AGENT};
use base64::{Engine, prelude::BASE64_STANDARD};
use sha2::{Digest, Sha256};

use crate::ledger::LikeError;

pub const UNKNOWN_ADDRESS: &str = "unknown";
pub const CLIENT_ID_LEN: usize = 24;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Accept an identifier produced elsewhere; the only requirement is that it's non-empty.
    pub fn parse(raw: &str) -> Result<Self, LikeError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(LikeError::MissingClientId);
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection-level facts about a request. Either may be missing.
///
/// Kept as raw bytes: header values need not be UTF-8, and two clients whose user agents differ
/// only in non-UTF-8 bytes are still two clients.
#[derive(Clone, Debug, Default)]
pub struct RequestMetadata {
    pub source_address: Option<Vec<u8>>,
    pub user_agent: Option<Vec<u8>>,
}

impl RequestMetadata {
    pub fn new(source_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            source_address: source_address.map(|s| s.as_bytes().to_vec()),
            user_agent: user_agent.map(|s| s.as_bytes().to_vec()),
        }
    }

    pub fn from_headers(headers: &HeaderMap, address_header: &str) -> Self {
        Self {
            source_address: header_value(headers, address_header),
            user_agent: header_value(headers, USER_AGENT.as_str()),
        }
    }

    pub fn client_id(&self) -> ClientId {
        derive_bytes(self.source_address.as_deref(), self.user_agent.as_deref())
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<Vec<u8>> {
    headers
        .get(name)
        .map(|value| value.as_bytes().trim_ascii())
        .filter(|value| !value.is_empty())
        .map(<[u8]>::to_vec)
}

pub fn derive(source_address: Option<&str>, user_agent: Option<&str>) -> ClientId {
    derive_bytes(source_address.map(str::as_bytes), user_agent.map(str::as_bytes))
}

pub fn derive_bytes(source_address: Option<&[u8]>, user_agent: Option<&[u8]>) -> ClientId {
    let address = source_address.unwrap_or(UNKNOWN_ADDRESS.as_bytes());
    let agent = user_agent.unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(address);
    hasher.update(agent);

    let mut encoded = BASE64_STANDARD.encode(hasher.finalize().as_slice());
    encoded.truncate(CLIENT_ID_LEN);

    ClientId(encoded)
}
