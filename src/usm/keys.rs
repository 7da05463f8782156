//! Password-to-key derivation and key localization (RFC 3414
//! section 2.6 and appendix A.2).

use std::collections::HashMap;

use crate::{ConfigError, SnmpError, SnmpResult};

use super::auth::AuthProtocol;
use super::privacy::Cipher;

/// Expands a password into a master key Ku by digesting 1MiB of the
/// password repeated.
pub fn password_to_key(protocol: AuthProtocol, password: &[u8]) -> SnmpResult<Vec<u8>> {
    if password.is_empty() {
        return Err(SnmpError::Config(ConfigError::MissingAuthPassword));
    }
    let mut hasher = protocol.create_hasher()?;
    let mut password_index = 0;
    let mut password_buf = [0u8; 64];
    for _ in 0..16384 {
        for x in &mut password_buf {
            *x = password[password_index];
            password_index += 1;
            if password_index == password.len() {
                password_index = 0;
            }
        }
        hasher.update(&password_buf)?;
    }
    Ok(hasher.finish()?.to_vec())
}

/// Localizes a master key to an engine: digest(Ku ++ engineId ++ Ku).
pub fn localize_key(protocol: AuthProtocol, ku: &[u8], engine_id: &[u8]) -> SnmpResult<Vec<u8>> {
    let mut hasher = protocol.create_hasher()?;
    hasher.update(ku)?;
    hasher.update(engine_id)?;
    hasher.update(ku)?;
    Ok(hasher.finish()?.to_vec())
}

/// Derives the localized authentication key for an engine.
pub fn derive_auth_key(
    protocol: AuthProtocol,
    password: &[u8],
    engine_id: &[u8],
) -> SnmpResult<Vec<u8>> {
    let ku = password_to_key(protocol, password)?;
    localize_key(protocol, &ku, engine_id)
}

/// Derives the localized privacy key for an engine and sizes it for
/// the cipher. A digest shorter than the cipher's key material is a
/// configuration error; a longer one is truncated.
pub fn derive_priv_key(
    protocol: AuthProtocol,
    cipher: Cipher,
    password: &[u8],
    engine_id: &[u8],
) -> SnmpResult<Vec<u8>> {
    let need = cipher.key_material_len();
    if protocol.key_length() < need {
        return Err(SnmpError::Config(ConfigError::UnsupportedKeyLength));
    }
    if password.is_empty() {
        return Err(SnmpError::Config(ConfigError::MissingPrivacyPassword));
    }
    let mut key = derive_auth_key(protocol, password, engine_id)?;
    key.truncate(need);
    Ok(key)
}

/// Per-engine cache of localized keys.
///
/// Derivation digests a megabyte of input, so keys are computed once
/// per engine and dropped whenever a password changes.
#[derive(Debug, Default)]
pub(crate) struct KeyCache {
    auth: HashMap<Vec<u8>, Vec<u8>>,
    privacy: HashMap<Vec<u8>, Vec<u8>>,
}

impl KeyCache {
    pub(crate) fn auth_key(
        &mut self,
        protocol: AuthProtocol,
        password: &[u8],
        engine_id: &[u8],
    ) -> SnmpResult<Vec<u8>> {
        if let Some(key) = self.auth.get(engine_id) {
            return Ok(key.clone());
        }
        let key = derive_auth_key(protocol, password, engine_id)?;
        self.auth.insert(engine_id.to_vec(), key.clone());
        Ok(key)
    }

    pub(crate) fn priv_key(
        &mut self,
        protocol: AuthProtocol,
        cipher: Cipher,
        password: &[u8],
        engine_id: &[u8],
    ) -> SnmpResult<Vec<u8>> {
        if let Some(key) = self.privacy.get(engine_id) {
            return Ok(key.clone());
        }
        let key = derive_priv_key(protocol, cipher, password, engine_id)?;
        self.privacy.insert(engine_id.to_vec(), key.clone());
        Ok(key)
    }

    pub(crate) fn invalidate_auth(&mut self) {
        self.auth.clear();
        // privacy keys derive from the auth protocol as well
        self.privacy.clear();
    }

    pub(crate) fn invalidate_priv(&mut self) {
        self.privacy.clear();
    }

    pub(crate) fn invalidate_all(&mut self) {
        self.auth.clear();
        self.privacy.clear();
    }
}
