// Copyright 2016 Hroi Sigurdsson
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # snmp3-usm
//! SNMP client engine for Rust with a full SNMPv3 User-based Security
//! Model (RFC 3414) implementation.
//!
//! Supports:
//!
//! - GET, GETNEXT, GETBULK, SET
//! - SNMPv1/v2c community security
//! - SNMPv3 USM: MD5/SHA-1/SHA-2 authentication, DES-CBC and AES-CFB privacy
//! - Engine discovery and time synchronization
//! - Replay protection via a shared time window
//! - Synchronous (UDP) and Tokio-based sessions
//!
//! Currently does not support:
//!
//! - MIB interpretation
//! - Transports other than UDP
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use snmp3_usm::{usm, SyncSession, Value};
//!
//! let security = usm::Security::new(b"initial", b"authpass")
//!     .with_auth_protocol(usm::AuthProtocol::Sha1);
//! let time_window = Arc::new(usm::TimeWindow::new());
//!
//! let mut sess = SyncSession::new_v3(
//!     "198.51.100.23:161",
//!     security,
//!     time_window,
//!     Some(Duration::from_secs(2)),
//!     1,
//! ).unwrap();
//! let response = sess.get(&[1, 3, 6, 1, 2, 1, 1, 1, 0][..], 2).unwrap();
//! if let Some((_oid, Value::OctetString(descr))) = response.varbinds.clone().next() {
//!     println!("sysDescr: {}", String::from_utf8_lossy(descr));
//! }
//! ```

#[macro_use]
extern crate log;

use std::convert::TryFrom;
use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

pub mod pdu;
pub mod session;
#[cfg(feature = "async")]
pub mod tokio_session;
pub mod usm;

pub use session::SyncSession;
#[cfg(feature = "async")]
pub use tokio_session::TokioSession;

#[cfg(test)]
mod tests;

pub const BUFFER_SIZE: usize = 4096;

/// Reason an incoming message failed security processing.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AuthErrorKind {
    UnsupportedSecurityModel,
    UsernameMismatch,
    SignatureMismatch,
    OutsideTimeWindow,
    EngineIdMismatch,
    AuthLevelMismatch,
    PrivLevelMismatch,
    PrivLengthMismatch,
    KeyLengthMismatch,
    PayloadLengthMismatch,
    NotEncrypted,
    /// The agent reported it could not decrypt our request.
    DecryptionError,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthErrorKind::UnsupportedSecurityModel => write!(f, "unsupported security model"),
            AuthErrorKind::UsernameMismatch => write!(f, "user name mismatch"),
            AuthErrorKind::SignatureMismatch => write!(f, "HMAC signature mismatch"),
            AuthErrorKind::OutsideTimeWindow => write!(f, "message is outside the time window"),
            AuthErrorKind::EngineIdMismatch => write!(f, "engine ID mismatch"),
            AuthErrorKind::AuthLevelMismatch => {
                write!(f, "authentication flag does not match configuration")
            }
            AuthErrorKind::PrivLevelMismatch => {
                write!(f, "privacy flag does not match configuration")
            }
            AuthErrorKind::PrivLengthMismatch => write!(f, "privacy parameters length mismatch"),
            AuthErrorKind::KeyLengthMismatch => write!(f, "key length mismatch"),
            AuthErrorKind::PayloadLengthMismatch => write!(f, "payload length mismatch"),
            AuthErrorKind::NotEncrypted => write!(f, "expected an encrypted payload"),
            AuthErrorKind::DecryptionError => write!(f, "agent could not decrypt the request"),
        }
    }
}

/// Configuration problems detected before any bytes leave the host.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ConfigError {
    PrivacyWithoutAuth,
    MissingAuthPassword,
    MissingPrivacyPassword,
    /// The digest is too narrow to key the chosen cipher.
    UnsupportedKeyLength,
    /// A security definition string that does not parse.
    BadSecuritySpec(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::PrivacyWithoutAuth => {
                write!(f, "privacy requires authentication to be enabled")
            }
            ConfigError::MissingAuthPassword => {
                write!(f, "authentication enabled but no password set")
            }
            ConfigError::MissingPrivacyPassword => {
                write!(f, "privacy enabled but no privacy password set")
            }
            ConfigError::UnsupportedKeyLength => {
                write!(f, "digest output too short for the chosen cipher")
            }
            ConfigError::BadSecuritySpec(s) => {
                write!(f, "bad security definition: {}", s)
            }
        }
    }
}

/// Failures of the engine discovery handshake.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DiscoveryError {
    EngineIdUnknown,
    TimelineUnknown,
    Timeout,
    MalformedReport,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::EngineIdUnknown => {
                write!(f, "engine ID of the target is unknown, perform discovery")
            }
            DiscoveryError::TimelineUnknown => {
                write!(f, "time line of the target engine is unknown, perform discovery")
            }
            DiscoveryError::Timeout => write!(f, "discovery timed out"),
            DiscoveryError::MalformedReport => write!(f, "malformed discovery report"),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum SnmpError {
    AsnParseError,
    AsnInvalidLen,
    AsnWrongType,
    AsnUnsupportedType,
    AsnEof,
    AsnIntOverflow,

    UnsupportedVersion,
    RequestIdMismatch,
    CommunityMismatch,
    ValueOutOfRange,
    BufferOverflow,

    SendError(String),
    ReceiveError(String),
    Timeout,
    IoError(String),
    OidIsNotIncreasing,

    Auth(AuthErrorKind),
    Config(ConfigError),
    Discovery(DiscoveryError),
    /// A response that matches no outstanding request.
    CorrelationMiss,
    Crypto(String),
}

impl fmt::Display for SnmpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SnmpError::AsnParseError => write!(f, "ASN.1 parse error"),
            SnmpError::AsnInvalidLen => write!(f, "ASN.1 invalid length"),
            SnmpError::AsnWrongType => write!(f, "wrong ASN.1 type"),
            SnmpError::AsnUnsupportedType => write!(f, "unsupported ASN.1 type"),
            SnmpError::AsnEof => write!(f, "end of ASN.1 data"),
            SnmpError::AsnIntOverflow => write!(f, "ASN.1 integer overflow"),
            SnmpError::UnsupportedVersion => write!(f, "unsupported SNMP version"),
            SnmpError::RequestIdMismatch => write!(f, "SNMP request ID mismatch"),
            SnmpError::CommunityMismatch => write!(f, "community mismatch"),
            SnmpError::ValueOutOfRange => write!(f, "value out of range"),
            SnmpError::BufferOverflow => write!(f, "buffer overflow"),
            SnmpError::SendError(s) => write!(f, "send error ({})", s),
            SnmpError::ReceiveError(s) => write!(f, "receive error ({})", s),
            SnmpError::Timeout => write!(f, "timeout"),
            SnmpError::IoError(s) => write!(f, "io error ({})", s),
            SnmpError::OidIsNotIncreasing => write!(f, "OID is not increasing"),
            SnmpError::Auth(kind) => write!(f, "authentication failure: {}", kind),
            SnmpError::Config(e) => write!(f, "configuration error: {}", e),
            SnmpError::Discovery(e) => write!(f, "discovery failure: {}", e),
            SnmpError::CorrelationMiss => {
                write!(f, "response does not match any outstanding request")
            }
            SnmpError::Crypto(s) => write!(f, "crypto error: {}", s),
        }
    }
}

impl std::error::Error for SnmpError {}

impl From<std::num::TryFromIntError> for SnmpError {
    fn from(_: std::num::TryFromIntError) -> SnmpError {
        SnmpError::AsnIntOverflow
    }
}

impl From<std::io::Error> for SnmpError {
    fn from(e: std::io::Error) -> SnmpError {
        SnmpError::IoError(e.to_string())
    }
}

impl From<openssl::error::ErrorStack> for SnmpError {
    fn from(e: openssl::error::ErrorStack) -> SnmpError {
        SnmpError::Crypto(e.to_string())
    }
}

pub type SnmpResult<T> = Result<T, SnmpError>;

pub mod asn1 {
    pub const PRIMITIVE: u8 = 0b0000_0000;
    pub const CONSTRUCTED: u8 = 0b0010_0000;

    pub const CLASS_UNIVERSAL: u8 = 0b0000_0000;
    pub const CLASS_APPLICATION: u8 = 0b0100_0000;
    pub const CLASS_CONTEXTSPECIFIC: u8 = 0b1000_0000;

    pub const TYPE_BOOLEAN: u8 = CLASS_UNIVERSAL | PRIMITIVE | 1;
    pub const TYPE_INTEGER: u8 = CLASS_UNIVERSAL | PRIMITIVE | 2;
    pub const TYPE_OCTETSTRING: u8 = CLASS_UNIVERSAL | PRIMITIVE | 4;
    pub const TYPE_NULL: u8 = CLASS_UNIVERSAL | PRIMITIVE | 5;
    pub const TYPE_OBJECTIDENTIFIER: u8 = CLASS_UNIVERSAL | PRIMITIVE | 6;
    pub const TYPE_SEQUENCE: u8 = CLASS_UNIVERSAL | CONSTRUCTED | 16;
}

pub mod snmp {
    use super::asn1;

    pub const VERSION_1: i64 = 0;
    pub const VERSION_2: i64 = 1;
    pub const VERSION_3: i64 = 3;

    pub const USM_SECURITY_MODEL: i64 = 3;

    pub const MSG_GET: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED;
    pub const MSG_GET_NEXT: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 1;
    pub const MSG_RESPONSE: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 2;
    pub const MSG_SET: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 3;
    pub const MSG_GET_BULK: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 5;
    pub const MSG_INFORM: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 6;
    pub const MSG_TRAP: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 7;
    pub const MSG_REPORT: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 8;

    pub const TYPE_IPADDRESS: u8 = asn1::CLASS_APPLICATION;
    pub const TYPE_COUNTER32: u8 = asn1::CLASS_APPLICATION | 1;
    pub const TYPE_UNSIGNED32: u8 = asn1::CLASS_APPLICATION | 2;
    pub const TYPE_GAUGE32: u8 = TYPE_UNSIGNED32;
    pub const TYPE_TIMETICKS: u8 = asn1::CLASS_APPLICATION | 3;
    pub const TYPE_OPAQUE: u8 = asn1::CLASS_APPLICATION | 4;
    pub const TYPE_COUNTER64: u8 = asn1::CLASS_APPLICATION | 6;

    pub const SNMP_NOSUCHOBJECT: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::PRIMITIVE;
    pub const SNMP_NOSUCHINSTANCE: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::PRIMITIVE | 0x1;
    pub const SNMP_ENDOFMIBVIEW: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::PRIMITIVE | 0x2;

    pub const ERRSTATUS_NOERROR: u32 = 0;
    pub const ERRSTATUS_TOOBIG: u32 = 1;
    pub const ERRSTATUS_NOSUCHNAME: u32 = 2;
    pub const ERRSTATUS_BADVALUE: u32 = 3;
    pub const ERRSTATUS_READONLY: u32 = 4;
    pub const ERRSTATUS_GENERR: u32 = 5;

    pub const V3_MSG_FLAGS_AUTH: u8 = 0x01;
    pub const V3_MSG_FLAGS_PRIVACY: u8 = 0x02;
    pub const V3_MSG_FLAGS_REPORTABLE: u8 = 0x04;
}

fn decode_i64(i: &[u8]) -> SnmpResult<i64> {
    if i.is_empty() || i.len() > mem::size_of::<i64>() {
        return Err(SnmpError::AsnIntOverflow);
    }
    let mut bytes = [0u8; 8];
    bytes[(mem::size_of::<i64>() - i.len())..].copy_from_slice(i);
    let ret = i64::from_be_bytes(bytes);
    // sign extend
    let shift = (mem::size_of::<i64>() - i.len()) as u32 * 8;
    Ok(ret.wrapping_shl(shift).wrapping_shr(shift))
}

/// Parses a dotted-decimal OID string into sub-identifiers.
pub fn get_oid_array(oid: &str) -> Vec<u32> {
    oid.split('.').filter_map(|x| x.parse().ok()).collect()
}

pub trait VarbindOid {
    fn oid(&self) -> &[u32];
    fn value(&self) -> Option<&Value<'_>>;
}

impl VarbindOid for &[u32] {
    fn oid(&self) -> &[u32] {
        self
    }
    fn value(&self) -> Option<&Value<'_>> {
        None
    }
}

impl VarbindOid for Vec<u32> {
    fn oid(&self) -> &[u32] {
        self
    }
    fn value(&self) -> Option<&Value<'_>> {
        None
    }
}

impl VarbindOid for &Vec<u32> {
    fn oid(&self) -> &[u32] {
        self
    }
    fn value(&self) -> Option<&Value<'_>> {
        None
    }
}

impl VarbindOid for &&[u32] {
    fn oid(&self) -> &[u32] {
        self
    }
    fn value(&self) -> Option<&Value<'_>> {
        None
    }
}

impl<'v> VarbindOid for (&[u32], Value<'v>) {
    fn oid(&self) -> &[u32] {
        self.0
    }
    fn value(&self) -> Option<&Value<'_>> {
        Some(&self.1)
    }
}

impl<'v> VarbindOid for &(&[u32], Value<'v>) {
    fn oid(&self) -> &[u32] {
        self.0
    }
    fn value(&self) -> Option<&Value<'_>> {
        Some(&self.1)
    }
}

pub type ObjIdBuf = [u32; 128];

/// Wrapper around the raw bytes of a BER-encoded OBJECT IDENTIFIER.
#[derive(PartialEq, Serialize, Deserialize, Clone, Copy)]
pub struct ObjectIdentifier<'a> {
    inner: &'a [u8],
}

impl<'a> fmt::Debug for ObjectIdentifier<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.inner).finish()
    }
}

impl<'a> fmt::Display for ObjectIdentifier<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut buf: ObjIdBuf = [0; 128];
        match self.read_name(&mut buf) {
            Ok(name) => {
                for (i, subid) in name.iter().enumerate() {
                    if i == 0 {
                        write!(f, "{}", subid)?;
                    } else {
                        write!(f, ".{}", subid)?;
                    }
                }
                Ok(())
            }
            Err(err) => write!(f, "invalid OID: {}", err),
        }
    }
}

impl<'a> PartialEq<[u32]> for ObjectIdentifier<'a> {
    fn eq(&self, other: &[u32]) -> bool {
        let mut buf: ObjIdBuf = [0; 128];
        matches!(self.read_name(&mut buf), Ok(name) if name == other)
    }
}

impl<'a, 'b> PartialEq<&'b [u32]> for ObjectIdentifier<'a> {
    fn eq(&self, other: &&[u32]) -> bool {
        self == *other
    }
}

impl<'a> ObjectIdentifier<'a> {
    pub fn from_bytes(bytes: &[u8]) -> ObjectIdentifier<'_> {
        ObjectIdentifier { inner: bytes }
    }

    pub fn raw(&self) -> &'a [u8] {
        self.inner
    }

    /// Decodes the sub-identifiers into caller-provided storage.
    pub fn read_name<'b>(&self, out: &'b mut ObjIdBuf) -> SnmpResult<&'b [u32]> {
        let input = self.inner;
        if input.len() < 2 {
            return Err(SnmpError::AsnInvalidLen);
        }
        out[0] = u32::from(input[0] / 40);
        out[1] = u32::from(input[0] % 40);
        let mut pos = 2;
        let mut cur: u32 = 0;
        let mut is_done = false;
        for b in &input[1..] {
            if pos == out.len() {
                return Err(SnmpError::AsnEof);
            }
            is_done = b & 0b1000_0000 == 0;
            cur = cur.checked_shl(7).ok_or(SnmpError::AsnIntOverflow)?;
            cur |= u32::from(b & 0b0111_1111);
            if is_done {
                out[pos] = cur;
                pos += 1;
                cur = 0;
            }
        }
        if is_done {
            Ok(&out[..pos])
        } else {
            Err(SnmpError::AsnParseError)
        }
    }

    pub fn starts_with(&self, prefix: &[u32]) -> bool {
        let mut buf: ObjIdBuf = [0; 128];
        matches!(self.read_name(&mut buf),
            Ok(name) if name.len() >= prefix.len() && &name[..prefix.len()] == prefix)
    }
}

/// BER decoder over a borrowed byte slice.
///
/// Supports the subset of types SNMP uses; extended tag IDs and
/// indefinite lengths are rejected.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct AsnReader<'a> {
    inner: &'a [u8],
}

impl<'a> fmt::Debug for AsnReader<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.inner).finish()
    }
}

const USIZE_LEN: usize = mem::size_of::<usize>();

impl<'a> AsnReader<'a> {
    pub fn from_bytes(bytes: &[u8]) -> AsnReader<'_> {
        AsnReader { inner: bytes }
    }

    pub fn bytes_left(&self) -> usize {
        self.inner.len()
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.inner
    }

    pub fn peek_byte(&self) -> SnmpResult<u8> {
        self.inner.first().copied().ok_or(SnmpError::AsnEof)
    }

    pub fn read_byte(&mut self) -> SnmpResult<u8> {
        match self.inner.split_first() {
            Some((head, tail)) => {
                self.inner = tail;
                Ok(*head)
            }
            None => Err(SnmpError::AsnEof),
        }
    }

    pub fn read_length(&mut self) -> SnmpResult<usize> {
        let head = self.read_byte()?;
        if head < 128 {
            return Ok(head as usize);
        }
        if head == 0xff {
            return Err(SnmpError::AsnInvalidLen);
        }
        let length_len = (head & 0b0111_1111) as usize;
        if length_len == 0 || length_len > USIZE_LEN || length_len > self.inner.len() {
            return Err(SnmpError::AsnInvalidLen);
        }
        let mut bytes = [0u8; USIZE_LEN];
        bytes[USIZE_LEN - length_len..].copy_from_slice(&self.inner[..length_len]);
        self.inner = &self.inner[length_len..];
        Ok(usize::from_be_bytes(bytes))
    }

    fn read_value(&mut self, expected_ident: u8) -> SnmpResult<&'a [u8]> {
        let ident = self.read_byte()?;
        if ident != expected_ident {
            return Err(SnmpError::AsnWrongType);
        }
        let len = self.read_length()?;
        if len > self.inner.len() {
            return Err(SnmpError::AsnInvalidLen);
        }
        let (val, remaining) = self.inner.split_at(len);
        self.inner = remaining;
        Ok(val)
    }

    pub fn read_raw(&mut self, expected_ident: u8) -> SnmpResult<&'a [u8]> {
        self.read_value(expected_ident)
    }

    pub fn read_i64_type(&mut self, expected_ident: u8) -> SnmpResult<i64> {
        let val = self.read_value(expected_ident)?;
        decode_i64(val)
    }

    pub fn read_constructed<F>(&mut self, expected_ident: u8, f: F) -> SnmpResult<()>
    where
        F: FnOnce(&mut AsnReader) -> SnmpResult<()>,
    {
        let seq = self.read_value(expected_ident)?;
        f(&mut AsnReader::from_bytes(seq))
    }

    pub fn read_asn_boolean(&mut self) -> SnmpResult<bool> {
        match self.read_value(asn1::TYPE_BOOLEAN)? {
            [0] => Ok(false),
            [_] => Ok(true),
            _ => Err(SnmpError::AsnParseError),
        }
    }

    pub fn read_asn_integer(&mut self) -> SnmpResult<i64> {
        self.read_i64_type(asn1::TYPE_INTEGER)
    }

    pub fn read_asn_octetstring(&mut self) -> SnmpResult<&'a [u8]> {
        self.read_value(asn1::TYPE_OCTETSTRING)
    }

    pub fn read_asn_null(&mut self) -> SnmpResult<()> {
        let val = self.read_value(asn1::TYPE_NULL)?;
        if val.is_empty() {
            Ok(())
        } else {
            Err(SnmpError::AsnInvalidLen)
        }
    }

    pub fn read_asn_objectidentifier(&mut self) -> SnmpResult<ObjectIdentifier<'a>> {
        let val = self.read_value(asn1::TYPE_OBJECTIDENTIFIER)?;
        Ok(ObjectIdentifier { inner: val })
    }

    pub fn read_asn_sequence<F>(&mut self, f: F) -> SnmpResult<()>
    where
        F: FnOnce(&mut AsnReader) -> SnmpResult<()>,
    {
        self.read_constructed(asn1::TYPE_SEQUENCE, f)
    }

    pub fn read_snmp_counter32(&mut self) -> SnmpResult<u32> {
        self.read_i64_type(snmp::TYPE_COUNTER32).map(|v| v as u32)
    }

    pub fn read_snmp_unsigned32(&mut self) -> SnmpResult<u32> {
        self.read_i64_type(snmp::TYPE_UNSIGNED32).map(|v| v as u32)
    }

    pub fn read_snmp_timeticks(&mut self) -> SnmpResult<u32> {
        self.read_i64_type(snmp::TYPE_TIMETICKS).map(|v| v as u32)
    }

    pub fn read_snmp_counter64(&mut self) -> SnmpResult<u64> {
        self.read_i64_type(snmp::TYPE_COUNTER64).map(|v| v as u64)
    }

    pub fn read_snmp_opaque(&mut self) -> SnmpResult<&'a [u8]> {
        self.read_value(snmp::TYPE_OPAQUE)
    }

    pub fn read_snmp_ipaddress(&mut self) -> SnmpResult<[u8; 4]> {
        let val = self.read_value(snmp::TYPE_IPADDRESS)?;
        if val.len() != 4 {
            return Err(SnmpError::AsnInvalidLen);
        }
        let mut ip = [0u8; 4];
        ip.copy_from_slice(val);
        Ok(ip)
    }
}

impl<'a> Iterator for AsnReader<'a> {
    type Item = Value<'a>;

    fn next(&mut self) -> Option<Value<'a>> {
        use Value::*;
        if let Ok(ident) = self.peek_byte() {
            let ret: SnmpResult<Value> = match ident {
                asn1::TYPE_BOOLEAN => self.read_asn_boolean().map(Boolean),
                asn1::TYPE_NULL => self.read_asn_null().map(|_| Null),
                asn1::TYPE_INTEGER => self.read_asn_integer().map(Integer),
                asn1::TYPE_OCTETSTRING => self.read_asn_octetstring().map(OctetString),
                asn1::TYPE_OBJECTIDENTIFIER => {
                    self.read_asn_objectidentifier().map(ObjectIdentifier)
                }
                asn1::TYPE_SEQUENCE => self.read_raw(ident).map(Sequence),
                snmp::TYPE_IPADDRESS => self.read_snmp_ipaddress().map(IpAddress),
                snmp::TYPE_COUNTER32 => self.read_snmp_counter32().map(Counter32),
                snmp::TYPE_UNSIGNED32 => self.read_snmp_unsigned32().map(Unsigned32),
                snmp::TYPE_TIMETICKS => self.read_snmp_timeticks().map(Timeticks),
                snmp::TYPE_OPAQUE => self.read_snmp_opaque().map(Opaque),
                snmp::TYPE_COUNTER64 => self.read_snmp_counter64().map(Counter64),
                snmp::SNMP_NOSUCHOBJECT => self.read_raw(ident).map(|_| NoSuchObject),
                snmp::SNMP_NOSUCHINSTANCE => self.read_raw(ident).map(|_| NoSuchInstance),
                snmp::SNMP_ENDOFMIBVIEW => self.read_raw(ident).map(|_| EndOfMibView),
                ident
                    if ident & (asn1::CONSTRUCTED | asn1::CLASS_CONTEXTSPECIFIC)
                        == (asn1::CONSTRUCTED | asn1::CLASS_CONTEXTSPECIFIC) =>
                {
                    self.read_raw(ident).map(|raw| Pdu(ident, raw))
                }
                _ => Err(SnmpError::AsnUnsupportedType),
            };
            ret.ok()
        } else {
            None
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Value<'a> {
    Boolean(bool),
    Null,
    Integer(i64),
    OctetString(&'a [u8]),
    ObjectIdentifier(ObjectIdentifier<'a>),
    Sequence(&'a [u8]),
    IpAddress([u8; 4]),
    Counter32(u32),
    Unsigned32(u32),
    Timeticks(u32),
    Opaque(&'a [u8]),
    Counter64(u64),
    EndOfMibView,
    NoSuchObject,
    NoSuchInstance,
    Pdu(u8, &'a [u8]),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SnmpMessageType {
    GetRequest,
    GetNextRequest,
    Response,
    SetRequest,
    GetBulkRequest,
    InformRequest,
    Trap,
    Report,
}

impl SnmpMessageType {
    pub fn from_ident(ident: u8) -> SnmpResult<SnmpMessageType> {
        use SnmpMessageType::*;
        Ok(match ident {
            snmp::MSG_GET => GetRequest,
            snmp::MSG_GET_NEXT => GetNextRequest,
            snmp::MSG_RESPONSE => Response,
            snmp::MSG_SET => SetRequest,
            snmp::MSG_GET_BULK => GetBulkRequest,
            snmp::MSG_INFORM => InformRequest,
            snmp::MSG_TRAP => Trap,
            snmp::MSG_REPORT => Report,
            _ => return Err(SnmpError::AsnWrongType),
        })
    }

    pub fn ident(self) -> u8 {
        use SnmpMessageType::*;
        match self {
            GetRequest => snmp::MSG_GET,
            GetNextRequest => snmp::MSG_GET_NEXT,
            Response => snmp::MSG_RESPONSE,
            SetRequest => snmp::MSG_SET,
            GetBulkRequest => snmp::MSG_GET_BULK,
            InformRequest => snmp::MSG_INFORM,
            Trap => snmp::MSG_TRAP,
            Report => snmp::MSG_REPORT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Varbinds<'a> {
    inner: AsnReader<'a>,
}

impl<'a> Varbinds<'a> {
    pub fn from_bytes(bytes: &[u8]) -> Varbinds<'_> {
        Varbinds {
            inner: AsnReader::from_bytes(bytes),
        }
    }
}

impl<'a> Iterator for Varbinds<'a> {
    type Item = (ObjectIdentifier<'a>, Value<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if let Ok(seq) = self.inner.read_raw(asn1::TYPE_SEQUENCE) {
            let mut pair = AsnReader::from_bytes(seq);
            if let Ok(name) = pair.read_asn_objectidentifier() {
                if let Some(value) = pair.next() {
                    return Some((name, value));
                }
            }
        }
        None
    }
}

/// A decoded SNMP message.
#[derive(Debug)]
pub struct SnmpPdu<'a> {
    pub version: i64,
    pub community: &'a [u8],
    pub message_type: SnmpMessageType,
    pub req_id: i32,
    pub error_status: u32,
    pub error_index: u32,
    pub varbinds: Varbinds<'a>,
    /// Transport-level message ID (SNMPv3 only, zero otherwise).
    pub msg_id: i32,
}

impl<'a> SnmpPdu<'a> {
    /// Decodes an SNMPv1/v2c message. SNMPv3 messages must go through
    /// [`usm::MessageProcessor::decode`](crate::usm::MessageProcessor).
    pub fn from_bytes(bytes: &'a [u8]) -> SnmpResult<SnmpPdu<'a>> {
        let seq = AsnReader::from_bytes(bytes).read_raw(asn1::TYPE_SEQUENCE)?;
        let mut rdr = AsnReader::from_bytes(seq);
        let version = rdr.read_asn_integer()?;
        if version != snmp::VERSION_1 && version != snmp::VERSION_2 {
            return Err(SnmpError::UnsupportedVersion);
        }
        let community = rdr.read_asn_octetstring()?;
        Self::from_inner(rdr, version, community, 0)
    }

    pub(crate) fn from_inner(
        mut rdr: AsnReader<'a>,
        version: i64,
        community: &'a [u8],
        msg_id: i32,
    ) -> SnmpResult<SnmpPdu<'a>> {
        let ident = rdr.peek_byte()?;
        let message_type = SnmpMessageType::from_ident(ident)?;
        let mut pdu = AsnReader::from_bytes(rdr.read_raw(ident)?);
        let req_id = i32::try_from(pdu.read_asn_integer()?)?;
        let error_status =
            u32::try_from(pdu.read_asn_integer()?).map_err(|_| SnmpError::ValueOutOfRange)?;
        let error_index = u32::try_from(pdu.read_asn_integer()?)?;
        let varbind_bytes = pdu.read_raw(asn1::TYPE_SEQUENCE)?;
        Ok(SnmpPdu {
            version,
            community,
            message_type,
            req_id,
            error_status,
            error_index,
            varbinds: Varbinds::from_bytes(varbind_bytes),
            msg_id,
        })
    }
}
