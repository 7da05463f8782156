//! SNMPv3 User-based Security Model (RFC 3414).
//!
//! The pieces fit together as follows: [`Security`] describes a user
//! (name, passwords, protocols), [`TimeWindow`] holds the shared
//! boots/time knowledge about authoritative engines, and a
//! [`MessageProcessor`] ties one user and one target engine together,
//! encoding outgoing requests and checking incoming responses.
//! Sessions own a processor each; the time window is shared.

use std::convert::TryFrom;
use std::sync::Arc;

use crate::{
    asn1,
    pdu::{self, Buf},
    snmp::{self, V3_MSG_FLAGS_AUTH, V3_MSG_FLAGS_PRIVACY, V3_MSG_FLAGS_REPORTABLE},
    AsnReader, AuthErrorKind, ConfigError, DiscoveryError, SnmpError, SnmpMessageType, SnmpPdu,
    SnmpResult, VarbindOid, BUFFER_SIZE,
};

pub mod auth;
pub mod correlator;
pub mod discovery;
pub mod keys;
pub mod privacy;
pub mod timewindow;

pub use auth::AuthProtocol;
pub use correlator::MessageCorrelator;
pub use discovery::{DiscoveryState, DiscoveryTransport};
pub use privacy::Cipher;
pub use timewindow::{TimeWindow, ENGINE_TIME_WINDOW};

use keys::KeyCache;
use privacy::SaltCounter;

/// USM user configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Security {
    pub(crate) username: Vec<u8>,
    pub(crate) authentication_password: Vec<u8>,
    pub(crate) privacy_password: Vec<u8>,
    pub(crate) auth_protocol: AuthProtocol,
    pub(crate) cipher: Cipher,
    pub(crate) use_authentication: bool,
    pub(crate) use_privacy: bool,
}

impl Security {
    pub fn new(username: &[u8], authentication_password: &[u8]) -> Self {
        Self {
            username: username.to_vec(),
            authentication_password: authentication_password.to_vec(),
            privacy_password: Vec::new(),
            auth_protocol: AuthProtocol::Md5,
            cipher: Cipher::Des,
            use_authentication: !authentication_password.is_empty(),
            use_privacy: false,
        }
    }

    pub fn with_auth_protocol(mut self, auth_protocol: AuthProtocol) -> Self {
        self.auth_protocol = auth_protocol;
        self
    }

    pub fn with_privacy(mut self, cipher: Cipher, privacy_password: &[u8]) -> Self {
        self.cipher = cipher;
        self.privacy_password = privacy_password.to_vec();
        self.use_privacy = true;
        self
    }

    pub fn without_authentication(mut self) -> Self {
        self.use_authentication = false;
        self
    }

    pub fn username(&self) -> &[u8] {
        &self.username
    }

    pub(crate) fn need_auth(&self) -> bool {
        self.use_authentication
    }

    pub(crate) fn need_privacy(&self) -> bool {
        self.use_privacy
    }

    /// Rejects user configurations no message can be built from.
    pub fn check_sanity(&self) -> SnmpResult<()> {
        if self.use_privacy && !self.use_authentication {
            return Err(SnmpError::Config(ConfigError::PrivacyWithoutAuth));
        }
        if self.use_authentication && self.authentication_password.is_empty() {
            return Err(SnmpError::Config(ConfigError::MissingAuthPassword));
        }
        if self.use_privacy && self.privacy_password.is_empty() {
            return Err(SnmpError::Config(ConfigError::MissingPrivacyPassword));
        }
        if self.use_privacy && self.auth_protocol.key_length() < self.cipher.key_material_len() {
            return Err(SnmpError::Config(ConfigError::UnsupportedKeyLength));
        }
        Ok(())
    }

    fn flags(&self) -> u8 {
        let mut flags = V3_MSG_FLAGS_REPORTABLE;
        if self.use_authentication {
            flags |= V3_MSG_FLAGS_AUTH;
        }
        if self.use_privacy {
            flags |= V3_MSG_FLAGS_PRIVACY;
        }
        flags
    }
}

impl std::str::FromStr for Security {
    type Err = SnmpError;

    /// Parses `user=NAME password=PW authproto=Sha1 cipher=Aes128
    /// privacy=PRIVPW` style definitions.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ret = Security::new(b"", b"");
        for term in s.split(' ').filter(|t| !t.is_empty()) {
            let kv: Vec<&str> = term.splitn(2, '=').collect();
            if kv.len() != 2 {
                return Err(SnmpError::Config(ConfigError::BadSecuritySpec(format!(
                    "invalid term {}",
                    term
                ))));
            }
            match kv[0] {
                "user" | "username" | "login" => {
                    ret.username = kv[1].as_bytes().to_vec();
                }
                "password" | "authentication_password" => {
                    ret.authentication_password = kv[1].as_bytes().to_vec();
                    ret.use_authentication = true;
                }
                "authprotocol" | "authproto" => {
                    ret.auth_protocol = kv[1].parse()?;
                }
                "cipher" => {
                    ret.cipher = kv[1].parse()?;
                    ret.use_privacy = true;
                }
                "privacy" | "privacy_password" => {
                    ret.privacy_password = kv[1].as_bytes().to_vec();
                    ret.use_privacy = true;
                }
                _ => {
                    return Err(SnmpError::Config(ConfigError::BadSecuritySpec(format!(
                        "unknown term {}",
                        term
                    ))));
                }
            }
        }
        if ret.use_authentication && ret.username.is_empty() {
            return Err(SnmpError::Config(ConfigError::BadSecuritySpec(
                "no username specified".to_string(),
            )));
        }
        ret.check_sanity()?;
        Ok(ret)
    }
}

impl std::fmt::Display for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "username={}", self.username.escape_ascii())?;
        write!(f, " authproto={}", self.auth_protocol)?;
        if !self.use_authentication {
            write!(f, " level=NoAuthNoPriv")?;
        } else if !self.use_privacy {
            write!(f, " level=AuthNoPriv")?;
        } else {
            write!(f, " level=AuthPriv cipher={}", self.cipher)?;
        }
        Ok(())
    }
}

/// Encodes and decodes SNMPv3 messages for one user and one
/// authoritative engine.
#[derive(Debug)]
pub struct MessageProcessor {
    security: Security,
    time_window: Arc<TimeWindow>,
    correlator: MessageCorrelator,
    keys: KeyCache,
    engine_id: Vec<u8>,
    salt: SaltCounter,
}

impl MessageProcessor {
    pub fn new(security: Security, time_window: Arc<TimeWindow>) -> SnmpResult<Self> {
        Ok(Self {
            security,
            time_window,
            correlator: MessageCorrelator::default(),
            keys: KeyCache::default(),
            engine_id: Vec::new(),
            salt: SaltCounter::new()?,
        })
    }

    pub fn security(&self) -> &Security {
        &self.security
    }

    pub fn time_window(&self) -> &Arc<TimeWindow> {
        &self.time_window
    }

    pub fn correlator(&self) -> &MessageCorrelator {
        &self.correlator
    }

    pub fn engine_id(&self) -> &[u8] {
        &self.engine_id
    }

    /// Sets a known engine ID up front, skipping the engine ID
    /// discovery step.
    pub fn set_engine_id(&mut self, engine_id: &[u8]) {
        if engine_id != self.engine_id.as_slice() {
            self.engine_id = engine_id.to_vec();
        }
    }

    /// Changes the authentication password, dropping all localized
    /// keys derived from the old one.
    pub fn set_authentication_password(&mut self, password: &[u8]) {
        self.security.authentication_password = password.to_vec();
        self.security.use_authentication = !password.is_empty();
        self.keys.invalidate_auth();
    }

    /// Changes the privacy password, dropping localized privacy keys.
    pub fn set_privacy_password(&mut self, password: &[u8]) {
        self.security.privacy_password = password.to_vec();
        self.keys.invalidate_priv();
    }

    /// Replaces the whole user configuration.
    pub fn set_security(&mut self, security: Security) {
        self.security = security;
        self.keys.invalidate_all();
    }

    /// Forgets the engine, forcing rediscovery on the next request.
    pub fn reset_engine(&mut self) {
        if !self.engine_id.is_empty() {
            self.time_window.forget(&self.engine_id);
        }
        self.engine_id.clear();
        self.keys.invalidate_all();
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        if self.engine_id.is_empty() {
            DiscoveryState::UnknownEngine
        } else if self.security.need_auth() && !self.time_window.is_synchronized(&self.engine_id) {
            DiscoveryState::EngineIdKnown
        } else {
            DiscoveryState::TimeSynchronized
        }
    }

    /// Whether requests can be encoded right now, and if not, which
    /// discovery step is missing.
    pub fn ready(&self) -> SnmpResult<()> {
        self.security.check_sanity()?;
        match self.discovery_state() {
            DiscoveryState::UnknownEngine => {
                Err(SnmpError::Discovery(DiscoveryError::EngineIdUnknown))
            }
            DiscoveryState::EngineIdKnown => {
                Err(SnmpError::Discovery(DiscoveryError::TimelineUnknown))
            }
            DiscoveryState::TimeSynchronized => Ok(()),
        }
    }

    fn auth_key(&mut self) -> SnmpResult<Vec<u8>> {
        self.keys.auth_key(
            self.security.auth_protocol,
            &self.security.authentication_password,
            &self.engine_id,
        )
    }

    fn priv_key(&mut self) -> SnmpResult<Vec<u8>> {
        self.keys.priv_key(
            self.security.auth_protocol,
            self.security.cipher,
            &self.security.privacy_password,
            &self.engine_id,
        )
    }

    /// Encodes a request message. Returns the msgID assigned to the
    /// exchange; retransmits reuse the encoded bytes and with them the
    /// same msgID.
    pub fn encode<VLS, ITM>(
        &mut self,
        ident: u8,
        req_id: i32,
        u1: u32,
        u2: u32,
        values: VLS,
        buf: &mut Buf,
    ) -> SnmpResult<i32>
    where
        VLS: IntoIterator<Item = ITM>,
        VLS::IntoIter: DoubleEndedIterator,
        ITM: VarbindOid,
    {
        self.ready()?;
        self.build_message(ident, req_id, u1, u2, values, buf)
    }

    /// Encodes a time synchronization probe: an authenticated GET with
    /// no varbinds, sent while the engine's time line is still
    /// unconfirmed. Privacy is not applied, matching agents which
    /// answer synchronization requests in the clear.
    pub(crate) fn encode_sync_probe(&mut self, req_id: i32, buf: &mut Buf) -> SnmpResult<i32> {
        self.security.check_sanity()?;
        if self.engine_id.is_empty() {
            return Err(SnmpError::Discovery(DiscoveryError::EngineIdUnknown));
        }
        let saved_privacy = self.security.use_privacy;
        self.security.use_privacy = false;
        let ret = self.build_message(
            snmp::MSG_GET,
            req_id,
            0,
            0,
            std::iter::empty::<&[u32]>(),
            buf,
        );
        self.security.use_privacy = saved_privacy;
        ret
    }

    fn build_message<VLS, ITM>(
        &mut self,
        ident: u8,
        req_id: i32,
        u1: u32,
        u2: u32,
        values: VLS,
        buf: &mut Buf,
    ) -> SnmpResult<i32>
    where
        VLS: IntoIterator<Item = ITM>,
        VLS::IntoIter: DoubleEndedIterator,
        ITM: VarbindOid,
    {
        let msg_id = self.correlator.register(req_id);
        let truncation_len = self.security.auth_protocol.truncation_length();
        let flags = self.security.flags();
        let boots = self.time_window.engine_boots(&self.engine_id);
        let time = self.time_window.engine_time(&self.engine_id);

        buf.reset();
        let mut sec_buf = Buf::default();
        let mut auth_pos = 0;
        let mut sec_buf_len = 0;
        let mut inner_len = 0;
        let mut priv_params: Vec<u8> = Vec::new();

        let engine_id = self.engine_id.clone();
        let username = self.security.username.clone();

        let mut pdu_buf = Buf::default();
        pdu_buf.push_sequence(|buf| {
            pdu::push_request_pdu(ident, req_id, u1, u2, values, buf);
            buf.push_octet_string(&[]); // context name
            buf.push_octet_string(&engine_id); // context engine ID
        });

        let encrypted = if self.security.need_privacy() {
            let priv_key = self.priv_key()?;
            let (ciphertext, salt) = privacy::encrypt(
                self.security.cipher,
                &priv_key,
                boots,
                time,
                &self.salt,
                &pdu_buf,
            )?;
            priv_params = salt;
            Some(ciphertext)
        } else {
            None
        };

        buf.push_sequence(|buf| {
            if let Some(ciphertext) = encrypted.as_ref() {
                buf.push_octet_string(ciphertext);
            } else {
                buf.push_chunk(&pdu_buf);
            }
            let l0 = buf.len();
            sec_buf.push_sequence(|buf| {
                buf.push_octet_string(&priv_params);
                let l0 = buf.len() - priv_params.len();
                buf.push_octet_string(&vec![0u8; truncation_len]); // auth params
                let l1 = buf.len() - l0;
                buf.push_octet_string(&username);
                buf.push_integer(time);
                buf.push_integer(boots);
                buf.push_octet_string(&engine_id);
                auth_pos = buf.len() - l1;
                sec_buf_len = buf.len();
            });
            buf.push_octet_string(&sec_buf);
            buf.push_sequence(|buf| {
                buf.push_integer(snmp::USM_SECURITY_MODEL);
                buf.push_octet_string(&[flags]);
                buf.push_integer(BUFFER_SIZE as i64); // max message size
                buf.push_integer(i64::from(msg_id));
            });
            buf.push_integer(snmp::VERSION_3);
            auth_pos = buf.len() - l0 - (sec_buf_len - auth_pos);
            inner_len = buf.len();
        });
        auth_pos += buf.len() - inner_len;

        if self.security.need_auth() {
            let auth_key = self.auth_key()?;
            auth::sign(self.security.auth_protocol, &auth_key, buf, auth_pos)?;
        }
        Ok(msg_id)
    }

    /// Decodes and checks a received SNMPv3 message. `plain_buf`
    /// provides storage for the decrypted scoped PDU so the returned
    /// PDU can borrow from it.
    pub fn decode<'a>(
        &mut self,
        bytes: &'a mut [u8],
        plain_buf: &'a mut Vec<u8>,
    ) -> SnmpResult<SnmpPdu<'a>> {
        let header = parse_header(bytes)?;

        if header.security_model != snmp::USM_SECURITY_MODEL {
            return Err(SnmpError::Auth(AuthErrorKind::UnsupportedSecurityModel));
        }
        if self.engine_id.is_empty() {
            return Err(SnmpError::Discovery(DiscoveryError::EngineIdUnknown));
        }
        // Some agents send a zero-length engine ID while acting
        // non-authoritatively; tolerate it, reject anything else that
        // does not match.
        if !header.engine_id.is_empty() && header.engine_id != self.engine_id {
            return Err(SnmpError::Auth(AuthErrorKind::EngineIdMismatch));
        }

        let is_authenticated = header.flags & V3_MSG_FLAGS_AUTH != 0;
        let is_encrypted = header.flags & V3_MSG_FLAGS_PRIVACY != 0;

        if self.security.need_auth() && !is_authenticated {
            return Err(SnmpError::Auth(AuthErrorKind::AuthLevelMismatch));
        }
        if !self.security.need_auth() && is_authenticated {
            return Err(SnmpError::Auth(AuthErrorKind::AuthLevelMismatch));
        }
        if is_encrypted && !self.security.need_privacy() {
            return Err(SnmpError::Auth(AuthErrorKind::PrivLevelMismatch));
        }

        if is_authenticated {
            if header.auth_params_len != self.security.auth_protocol.truncation_length() {
                return Err(SnmpError::Auth(AuthErrorKind::SignatureMismatch));
            }
            let auth_key = self.auth_key()?;
            if let Err(e) = auth::verify(
                self.security.auth_protocol,
                &auth_key,
                bytes,
                header.auth_params_pos,
            ) {
                warn!(
                    "message authentication failed for engine {:02x?}",
                    header.engine_id
                );
                return Err(e);
            }
        }

        // Reborrow immutably now that verification has restored the
        // buffer.
        let bytes: &'a [u8] = bytes;
        let body = parse_body(bytes)?;

        if !body.username.is_empty() && body.username != self.security.username.as_slice() {
            return Err(SnmpError::Auth(AuthErrorKind::UsernameMismatch));
        }

        let scoped_pdu_bytes: &'a [u8] = if is_encrypted {
            if !self.security.need_auth() {
                return Err(SnmpError::Auth(AuthErrorKind::PrivLevelMismatch));
            }
            let priv_key = self.priv_key()?;
            *plain_buf = privacy::decrypt(
                self.security.cipher,
                &priv_key,
                header.boots,
                header.time,
                body.priv_params,
                body.scoped_pdu,
            )?;
            plain_buf
        } else {
            body.scoped_pdu
        };

        let scoped_seq = AsnReader::from_bytes(scoped_pdu_bytes).read_raw(asn1::TYPE_SEQUENCE)?;
        let mut scoped_rdr = AsnReader::from_bytes(scoped_seq);
        let _context_engine_id = scoped_rdr.read_asn_octetstring()?;
        let _context_name = scoped_rdr.read_asn_octetstring()?;

        let pdu = SnmpPdu::from_inner(
            scoped_rdr,
            snmp::VERSION_3,
            body.username,
            header.msg_id,
        )?;

        // Reports arrive in the clear even under an AuthPriv
        // configuration; anything else must be encrypted when privacy
        // is on.
        if self.security.need_privacy()
            && !is_encrypted
            && pdu.message_type != SnmpMessageType::Report
        {
            return Err(SnmpError::Auth(AuthErrorKind::NotEncrypted));
        }

        // Timeliness: replayed or stale messages are rejected once the
        // engine's time line is confirmed. Reports re-synchronize
        // instead, they are how an agent tells us our notion is off.
        if pdu.message_type != SnmpMessageType::Report
            && self.time_window.is_synchronized(&self.engine_id)
            && self.time_window.is_outside_window(&self.engine_id, header.boots, header.time)
        {
            warn!(
                "rejecting replayed or stale message from engine {:02x?} (boots {}, time {})",
                header.engine_id, header.boots, header.time
            );
            return Err(SnmpError::Auth(AuthErrorKind::OutsideTimeWindow));
        }
        self.time_window
            .update(&self.engine_id, header.boots, header.time, is_authenticated);

        if self.correlator.resolve(header.msg_id, pdu.req_id).is_none() {
            return Err(SnmpError::CorrelationMiss);
        }

        Ok(pdu)
    }
}

struct Header {
    msg_id: i32,
    flags: u8,
    security_model: i64,
    engine_id: Vec<u8>,
    boots: i64,
    time: i64,
    auth_params_pos: usize,
    auth_params_len: usize,
}

struct Body<'a> {
    username: &'a [u8],
    priv_params: &'a [u8],
    scoped_pdu: &'a [u8],
}

/// First pass over a received message: header fields and the location
/// of the authentication parameters within the raw bytes.
fn parse_header(bytes: &[u8]) -> SnmpResult<Header> {
    let seq = AsnReader::from_bytes(bytes).read_raw(asn1::TYPE_SEQUENCE)?;
    let mut rdr = AsnReader::from_bytes(seq);
    let version = rdr.read_asn_integer()?;
    if version != snmp::VERSION_3 {
        return Err(SnmpError::UnsupportedVersion);
    }

    let mut global_rdr = AsnReader::from_bytes(rdr.read_raw(asn1::TYPE_SEQUENCE)?);
    let msg_id = i32::try_from(global_rdr.read_asn_integer()?)?;
    let max_size = global_rdr.read_asn_integer()?;
    if max_size < 0 {
        return Err(SnmpError::BufferOverflow);
    }
    let flags = global_rdr
        .read_asn_octetstring()?
        .first()
        .copied()
        .unwrap_or_default();
    let security_model = global_rdr.read_asn_integer()?;

    let security_params = rdr.read_asn_octetstring()?;
    let security_seq = AsnReader::from_bytes(security_params).read_raw(asn1::TYPE_SEQUENCE)?;
    let mut security_rdr = AsnReader::from_bytes(security_seq);
    let engine_id = security_rdr.read_asn_octetstring()?.to_vec();
    let boots = security_rdr.read_asn_integer()?;
    let time = security_rdr.read_asn_integer()?;
    let _username = security_rdr.read_asn_octetstring()?;
    let auth_params = security_rdr.read_asn_octetstring()?;
    let auth_params_pos =
        bytes.len() - rdr.bytes_left() - auth_params.len() - security_rdr.bytes_left();

    Ok(Header {
        msg_id,
        flags,
        security_model,
        engine_id,
        boots,
        time,
        auth_params_pos,
        auth_params_len: auth_params.len(),
    })
}

/// Second pass: borrowed views into the security parameters and the
/// scoped PDU (still encrypted when the privacy flag is set).
fn parse_body(bytes: &[u8]) -> SnmpResult<Body<'_>> {
    let seq = AsnReader::from_bytes(bytes).read_raw(asn1::TYPE_SEQUENCE)?;
    let mut rdr = AsnReader::from_bytes(seq);
    let _version = rdr.read_asn_integer()?;
    let _global = rdr.read_raw(asn1::TYPE_SEQUENCE)?;

    let security_params = rdr.read_asn_octetstring()?;
    let security_seq = AsnReader::from_bytes(security_params).read_raw(asn1::TYPE_SEQUENCE)?;
    let mut security_rdr = AsnReader::from_bytes(security_seq);
    let _engine_id = security_rdr.read_asn_octetstring()?;
    let _boots = security_rdr.read_asn_integer()?;
    let _time = security_rdr.read_asn_integer()?;
    let username = security_rdr.read_asn_octetstring()?;
    let _auth_params = security_rdr.read_asn_octetstring()?;
    let priv_params = security_rdr.read_asn_octetstring()?;

    let scoped_pdu = if rdr.peek_byte()? == asn1::TYPE_OCTETSTRING {
        rdr.read_asn_octetstring()?
    } else {
        rdr.remaining()
    };

    Ok(Body {
        username,
        priv_params,
        scoped_pdu,
    })
}
