//! HMAC authentication of whole messages (RFC 3414 section 6,
//! RFC 7860 for the SHA-2 family).
//!
//! The MAC always covers the complete wire message with the
//! msgAuthenticationParameters field zeroed, so both signing and
//! verification operate on the encoded bytes in place.

use std::fmt;

use openssl::{
    hash::{Hasher, MessageDigest},
    memcmp,
    pkey::PKey,
    sign::Signer,
};

use crate::{AuthErrorKind, ConfigError, SnmpError, SnmpResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum AuthProtocol {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl fmt::Display for AuthProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProtocol::Md5 => write!(f, "Md5"),
            AuthProtocol::Sha1 => write!(f, "Sha1"),
            AuthProtocol::Sha224 => write!(f, "Sha224"),
            AuthProtocol::Sha256 => write!(f, "Sha256"),
            AuthProtocol::Sha384 => write!(f, "Sha384"),
            AuthProtocol::Sha512 => write!(f, "Sha512"),
        }
    }
}

impl std::str::FromStr for AuthProtocol {
    type Err = SnmpError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" | "MD5" | "Md5" => Ok(AuthProtocol::Md5),
            "sha1" | "Sha1" | "SHA1" => Ok(AuthProtocol::Sha1),
            "sha224" | "Sha224" => Ok(AuthProtocol::Sha224),
            "sha256" | "Sha256" => Ok(AuthProtocol::Sha256),
            "sha384" | "Sha384" => Ok(AuthProtocol::Sha384),
            "sha512" | "Sha512" => Ok(AuthProtocol::Sha512),
            _ => Err(SnmpError::Config(ConfigError::BadSecuritySpec(format!(
                "invalid AuthProtocol={}",
                s
            )))),
        }
    }
}

impl AuthProtocol {
    pub(crate) fn create_hasher(self) -> SnmpResult<Hasher> {
        Hasher::new(self.digest()).map_err(Into::into)
    }

    pub(crate) fn digest(self) -> MessageDigest {
        match self {
            AuthProtocol::Md5 => MessageDigest::md5(),
            AuthProtocol::Sha1 => MessageDigest::sha1(),
            AuthProtocol::Sha224 => MessageDigest::sha224(),
            AuthProtocol::Sha256 => MessageDigest::sha256(),
            AuthProtocol::Sha384 => MessageDigest::sha384(),
            AuthProtocol::Sha512 => MessageDigest::sha512(),
        }
    }

    /// Bytes of the HMAC that go on the wire.
    pub fn truncation_length(self) -> usize {
        match self {
            AuthProtocol::Md5 | AuthProtocol::Sha1 => 12,
            AuthProtocol::Sha224 => 16,
            AuthProtocol::Sha256 => 24,
            AuthProtocol::Sha384 => 32,
            AuthProtocol::Sha512 => 48,
        }
    }

    /// Digest output length, which is also the localized key length.
    pub fn key_length(self) -> usize {
        match self {
            AuthProtocol::Md5 => 16,
            AuthProtocol::Sha1 => 20,
            AuthProtocol::Sha224 => 28,
            AuthProtocol::Sha256 => 32,
            AuthProtocol::Sha384 => 48,
            AuthProtocol::Sha512 => 64,
        }
    }
}

pub(crate) fn calculate_hmac(
    protocol: AuthProtocol,
    key: &[u8],
    data: &[u8],
) -> SnmpResult<Vec<u8>> {
    let pkey = PKey::hmac(key)?;
    let mut signer = Signer::new(protocol.digest(), &pkey)?;
    signer.update(data)?;
    signer.sign_to_vec().map_err(SnmpError::from)
}

/// Signs `message` in place: zeroes the authentication parameters
/// field at `auth_pos`, computes the HMAC over the whole message and
/// writes the truncated fingerprint into the field.
pub(crate) fn sign(
    protocol: AuthProtocol,
    key: &[u8],
    message: &mut [u8],
    auth_pos: usize,
) -> SnmpResult<()> {
    let truncation_len = protocol.truncation_length();
    if auth_pos + truncation_len > message.len() {
        return Err(SnmpError::Auth(AuthErrorKind::PayloadLengthMismatch));
    }
    for b in &mut message[auth_pos..auth_pos + truncation_len] {
        *b = 0;
    }
    let hmac = calculate_hmac(protocol, key, message)?;
    message[auth_pos..auth_pos + truncation_len].copy_from_slice(&hmac[..truncation_len]);
    Ok(())
}

/// Verifies the truncated HMAC at `auth_pos` by zeroing the field,
/// recomputing over the whole message and comparing. The received
/// fingerprint is written back afterwards, leaving the buffer intact.
pub(crate) fn verify(
    protocol: AuthProtocol,
    key: &[u8],
    message: &mut [u8],
    auth_pos: usize,
) -> SnmpResult<()> {
    let truncation_len = protocol.truncation_length();
    if auth_pos + truncation_len > message.len() {
        return Err(SnmpError::Auth(AuthErrorKind::PayloadLengthMismatch));
    }
    let mut received = vec![0u8; truncation_len];
    received.copy_from_slice(&message[auth_pos..auth_pos + truncation_len]);
    for b in &mut message[auth_pos..auth_pos + truncation_len] {
        *b = 0;
    }
    let hmac = calculate_hmac(protocol, key, message)?;
    message[auth_pos..auth_pos + truncation_len].copy_from_slice(&received);
    if hmac.len() < truncation_len || !memcmp::eq(&hmac[..truncation_len], &received) {
        return Err(SnmpError::Auth(AuthErrorKind::SignatureMismatch));
    }
    Ok(())
}
