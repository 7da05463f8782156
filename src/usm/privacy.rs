//! Scoped PDU encryption: DES-CBC (RFC 3414 section 8) and
//! AES-128/192/256 in CFB128 mode (RFC 3826).

use std::convert::TryFrom;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use openssl::symm::{Crypter, Mode};

use crate::{AuthErrorKind, ConfigError, SnmpError, SnmpResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum Cipher {
    Des,
    Aes128,
    Aes192,
    Aes256,
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cipher::Des => write!(f, "Des"),
            Cipher::Aes128 => write!(f, "Aes128"),
            Cipher::Aes192 => write!(f, "Aes192"),
            Cipher::Aes256 => write!(f, "Aes256"),
        }
    }
}

impl std::str::FromStr for Cipher {
    type Err = SnmpError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "des" | "Des" | "DES" => Ok(Cipher::Des),
            "aes128" | "Aes128" | "AES128" => Ok(Cipher::Aes128),
            "aes192" | "Aes192" | "AES192" => Ok(Cipher::Aes192),
            "aes256" | "Aes256" | "AES256" => Ok(Cipher::Aes256),
            _ => Err(SnmpError::Config(ConfigError::BadSecuritySpec(format!(
                "invalid Cipher={}",
                s
            )))),
        }
    }
}

impl Cipher {
    /// Localized key material the cipher consumes. DES uses 8 key
    /// bytes plus an 8 byte pre-IV.
    pub fn key_material_len(&self) -> usize {
        match self {
            Cipher::Des | Cipher::Aes128 => 16,
            Cipher::Aes192 => 24,
            Cipher::Aes256 => 32,
        }
    }

    fn openssl_aes(&self) -> Option<openssl::symm::Cipher> {
        match self {
            Cipher::Des => None,
            Cipher::Aes128 => Some(openssl::symm::Cipher::aes_128_cfb128()),
            Cipher::Aes192 => Some(openssl::symm::Cipher::aes_192_cfb128()),
            Cipher::Aes256 => Some(openssl::symm::Cipher::aes_256_cfb128()),
        }
    }
}

/// Monotonic source for the local part of the privacy salt. DES takes
/// the low 32 bits, AES the full 64 bit value (RFC 3826 section
/// 3.1.2.1). Wrapping is fine, reuse only matters within one
/// (boots, time) window.
#[derive(Debug)]
pub(crate) struct SaltCounter(AtomicU64);

impl SaltCounter {
    pub(crate) fn new() -> SnmpResult<SaltCounter> {
        let mut seed = [0u8; 8];
        openssl::rand::rand_bytes(&mut seed)?;
        Ok(SaltCounter(AtomicU64::new(u64::from_be_bytes(seed))))
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

fn run_crypter(mut crypter: Crypter, block_size: usize, input: &[u8]) -> SnmpResult<Vec<u8>> {
    crypter.pad(false);
    let mut out = vec![0; input.len() + block_size];
    let mut count = crypter.update(input, &mut out)?;
    if count < out.len() {
        count += crypter.finalize(&mut out[count..])?;
    }
    out.truncate(count);
    Ok(out)
}

fn des_iv(key: &[u8], salt: &[u8]) -> SnmpResult<[u8; 8]> {
    if key.len() < 16 {
        return Err(SnmpError::Auth(AuthErrorKind::KeyLengthMismatch));
    }
    let pre_iv = &key[8..16];
    let mut iv = [0u8; 8];
    for (i, (a, b)) in pre_iv.iter().zip(salt.iter()).enumerate() {
        iv[i] = a ^ b;
    }
    Ok(iv)
}

#[cfg(not(feature = "localdes"))]
fn des_cbc(key: &[u8], iv: &[u8], mode: Mode, input: &[u8]) -> SnmpResult<Vec<u8>> {
    let crypter = Crypter::new(openssl::symm::Cipher::des_cbc(), mode, key, Some(iv))?;
    run_crypter(crypter, 8, input)
}

// OpenSSL 3 moved DES-CBC into the legacy provider; the localdes
// feature substitutes a pure Rust implementation.
#[cfg(feature = "localdes")]
fn des_cbc(key: &[u8], iv: &[u8], mode: Mode, input: &[u8]) -> SnmpResult<Vec<u8>> {
    let direction = match mode {
        Mode::Encrypt => easydes::easydes::Des::Encrypt,
        Mode::Decrypt => easydes::easydes::Des::Decrypt,
    };
    Ok(easydes::easydes::des_cbc(
        key,
        iv,
        &mut input.to_vec(),
        direction,
    ))
}

fn encrypt_des(
    key: &[u8],
    boots: i64,
    salt_counter: &SaltCounter,
    plaintext: &[u8],
) -> SnmpResult<(Vec<u8>, Vec<u8>)> {
    let mut salt = [0u8; 8];
    salt[..4].copy_from_slice(&u32::try_from(boots).unwrap_or(0).to_be_bytes());
    salt[4..].copy_from_slice(&(salt_counter.next() as u32).to_be_bytes());

    let iv = des_iv(key, &salt)?;

    // RFC 3414 pads the last block with arbitrary bytes; the BER
    // length inside the scoped PDU delimits the real content.
    let mut padded = plaintext.to_vec();
    let rem = padded.len() % 8;
    if rem != 0 {
        padded.resize(padded.len() + 8 - rem, 0);
    }

    let encrypted = des_cbc(&key[..8], &iv, Mode::Encrypt, &padded)?;
    Ok((encrypted, salt.to_vec()))
}

fn decrypt_des(key: &[u8], priv_params: &[u8], encrypted: &[u8]) -> SnmpResult<Vec<u8>> {
    if priv_params.len() != 8 {
        return Err(SnmpError::Auth(AuthErrorKind::PrivLengthMismatch));
    }
    if encrypted.is_empty() || encrypted.len() % 8 != 0 {
        return Err(SnmpError::Auth(AuthErrorKind::PayloadLengthMismatch));
    }
    let iv = des_iv(key, priv_params)?;
    des_cbc(&key[..8], &iv, Mode::Decrypt, encrypted)
}

fn aes_iv(boots: i64, time: i64, salt: &[u8]) -> SnmpResult<[u8; 16]> {
    if salt.len() != 8 {
        return Err(SnmpError::Auth(AuthErrorKind::PrivLengthMismatch));
    }
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&u32::try_from(boots).unwrap_or(0).to_be_bytes());
    iv[4..8].copy_from_slice(&u32::try_from(time).unwrap_or(0).to_be_bytes());
    iv[8..].copy_from_slice(salt);
    Ok(iv)
}

fn encrypt_aes(
    cipher: openssl::symm::Cipher,
    key: &[u8],
    boots: i64,
    time: i64,
    salt_counter: &SaltCounter,
    plaintext: &[u8],
) -> SnmpResult<(Vec<u8>, Vec<u8>)> {
    let key_len = cipher.key_len();
    if key.len() < key_len {
        return Err(SnmpError::Auth(AuthErrorKind::KeyLengthMismatch));
    }
    let salt = salt_counter.next().to_be_bytes();
    let iv = aes_iv(boots, time, &salt)?;

    let crypter = Crypter::new(cipher, Mode::Encrypt, &key[..key_len], Some(&iv))?;
    let encrypted = run_crypter(crypter, cipher.block_size(), plaintext)?;
    Ok((encrypted, salt.to_vec()))
}

fn decrypt_aes(
    cipher: openssl::symm::Cipher,
    key: &[u8],
    boots: i64,
    time: i64,
    priv_params: &[u8],
    encrypted: &[u8],
) -> SnmpResult<Vec<u8>> {
    let key_len = cipher.key_len();
    if key.len() < key_len {
        return Err(SnmpError::Auth(AuthErrorKind::KeyLengthMismatch));
    }
    let iv = aes_iv(boots, time, priv_params)?;
    let crypter = Crypter::new(cipher, Mode::Decrypt, &key[..key_len], Some(&iv))?;
    run_crypter(crypter, cipher.block_size(), encrypted)
}

/// Encrypts a scoped PDU, returning the ciphertext and the privacy
/// parameters (salt) to carry in the security header.
pub(crate) fn encrypt(
    cipher: Cipher,
    key: &[u8],
    boots: i64,
    time: i64,
    salt_counter: &SaltCounter,
    plaintext: &[u8],
) -> SnmpResult<(Vec<u8>, Vec<u8>)> {
    match cipher.openssl_aes() {
        None => encrypt_des(key, boots, salt_counter, plaintext),
        Some(aes) => encrypt_aes(aes, key, boots, time, salt_counter, plaintext),
    }
}

/// Decrypts a scoped PDU using the salt from the security header and
/// the boots/time values carried in the same message.
pub(crate) fn decrypt(
    cipher: Cipher,
    key: &[u8],
    boots: i64,
    time: i64,
    priv_params: &[u8],
    encrypted: &[u8],
) -> SnmpResult<Vec<u8>> {
    match cipher.openssl_aes() {
        None => decrypt_des(key, priv_params, encrypted),
        Some(aes) => decrypt_aes(aes, key, boots, time, priv_params, encrypted),
    }
}
