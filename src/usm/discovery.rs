//! Engine discovery handshake (RFC 3414 section 4).
//!
//! Discovery runs in two steps, each a request/response pair:
//!
//! 1. An unauthenticated probe with an empty engine ID. The agent
//!    answers with a usmStatsUnknownEngineIDs report carrying its
//!    engine ID.
//! 2. An authenticated probe signed with the localized key. The agent
//!    answers with a usmStatsNotInTimeWindows report carrying its
//!    current boots and time, which confirm the time line.
//!
//! Step 2 is skipped for unauthenticated users. Only one discovery
//! per target runs at a time; concurrent sessions wait and then find
//! the shared time window already populated.

use crate::{
    asn1,
    pdu::Buf,
    snmp::{self, V3_MSG_FLAGS_REPORTABLE},
    AsnReader, AuthErrorKind, DiscoveryError, SnmpError, SnmpMessageType, SnmpPdu, SnmpResult,
    BUFFER_SIZE,
};
use std::convert::TryFrom;

use super::MessageProcessor;

/// Where a processor stands in the discovery handshake.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DiscoveryState {
    /// Nothing is known about the target engine yet.
    UnknownEngine,
    /// The engine ID is known but its time line is unconfirmed.
    EngineIdKnown,
    /// Authenticated requests can be sent.
    TimeSynchronized,
}

/// One request/response exchange with the target, used to drive the
/// handshake over whatever transport the session owns.
pub trait DiscoveryTransport {
    fn exchange(&mut self, request: &[u8], response: &mut [u8]) -> SnmpResult<usize>;
}

// usmStats counter OIDs carried in Report PDUs (RFC 3414 section 5).
pub const USM_STATS_UNSUPPORTED_SEC_LEVELS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 1, 0];
pub const USM_STATS_NOT_IN_TIME_WINDOWS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0];
pub const USM_STATS_UNKNOWN_USER_NAMES: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 3, 0];
pub const USM_STATS_UNKNOWN_ENGINE_IDS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0];
pub const USM_STATS_WRONG_DIGESTS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0];
pub const USM_STATS_DECRYPTION_ERRORS: &[u32] = &[1, 3, 6, 1, 6, 3, 15, 1, 1, 6, 0];

/// Maps a Report PDU onto the failure it announces. Unrecognized
/// report OIDs count as a time line problem, which rerunning the
/// handshake sorts out.
pub fn report_error(pdu: &SnmpPdu) -> SnmpError {
    if let Some((name, _)) = pdu.varbinds.clone().next() {
        if name == USM_STATS_NOT_IN_TIME_WINDOWS {
            return SnmpError::Discovery(DiscoveryError::TimelineUnknown);
        }
        if name == USM_STATS_UNKNOWN_ENGINE_IDS {
            return SnmpError::Discovery(DiscoveryError::EngineIdUnknown);
        }
        if name == USM_STATS_UNKNOWN_USER_NAMES {
            return SnmpError::Auth(AuthErrorKind::UsernameMismatch);
        }
        if name == USM_STATS_WRONG_DIGESTS {
            return SnmpError::Auth(AuthErrorKind::SignatureMismatch);
        }
        if name == USM_STATS_DECRYPTION_ERRORS {
            return SnmpError::Auth(AuthErrorKind::DecryptionError);
        }
        if name == USM_STATS_UNSUPPORTED_SEC_LEVELS {
            return SnmpError::Auth(AuthErrorKind::AuthLevelMismatch);
        }
    }
    SnmpError::Discovery(DiscoveryError::TimelineUnknown)
}

/// What a discovery report tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportInfo {
    pub engine_id: Vec<u8>,
    pub boots: i64,
    pub time: i64,
    pub msg_id: i32,
    pub req_id: i32,
}

/// Builds the unauthenticated engine ID probe: every security field
/// empty, no varbinds.
pub fn build_probe(msg_id: i32, req_id: i32, buf: &mut Buf) {
    buf.reset();
    let mut sec_buf = Buf::default();
    sec_buf.push_sequence(|sec| {
        sec.push_octet_string(&[]); // priv params
        sec.push_octet_string(&[]); // auth params
        sec.push_octet_string(&[]); // user name
        sec.push_integer(0); // time
        sec.push_integer(0); // boots
        sec.push_octet_string(&[]); // engine ID
    });
    buf.push_sequence(|message| {
        message.push_sequence(|pdu| {
            pdu.push_constructed(snmp::MSG_GET, |req| {
                req.push_sequence(|_varbinds| {});
                req.push_integer(0); // error index
                req.push_integer(0); // error status
                req.push_integer(req_id.into());
            });
            pdu.push_octet_string(&[]); // context name
            pdu.push_octet_string(&[]); // context engine ID
        });
        message.push_octet_string(&sec_buf);
        message.push_sequence(|global| {
            global.push_integer(snmp::USM_SECURITY_MODEL);
            global.push_octet_string(&[V3_MSG_FLAGS_REPORTABLE]);
            global.push_integer(BUFFER_SIZE as i64);
            global.push_integer(msg_id.into());
        });
        message.push_integer(snmp::VERSION_3);
    });
}

/// Parses an unauthenticated discovery report. No signature check, no
/// time window check; the caller decides what to trust.
pub fn parse_report(bytes: &[u8]) -> SnmpResult<ReportInfo> {
    let header = super::parse_header(bytes)?;
    if header.security_model != snmp::USM_SECURITY_MODEL {
        return Err(SnmpError::Discovery(DiscoveryError::MalformedReport));
    }
    let body = super::parse_body(bytes)?;

    let scoped_seq = AsnReader::from_bytes(body.scoped_pdu).read_raw(asn1::TYPE_SEQUENCE)?;
    let mut scoped_rdr = AsnReader::from_bytes(scoped_seq);
    let _context_engine_id = scoped_rdr.read_asn_octetstring()?;
    let _context_name = scoped_rdr.read_asn_octetstring()?;
    let ident = scoped_rdr.peek_byte()?;
    if SnmpMessageType::from_ident(ident)? != SnmpMessageType::Report {
        return Err(SnmpError::Discovery(DiscoveryError::MalformedReport));
    }
    let mut report_rdr = AsnReader::from_bytes(scoped_rdr.read_raw(ident)?);
    let req_id = i32::try_from(report_rdr.read_asn_integer()?)?;

    Ok(ReportInfo {
        engine_id: header.engine_id,
        boots: header.boots,
        time: header.time,
        msg_id: header.msg_id,
        req_id,
    })
}

/// Runs the handshake until the processor is ready for requests.
///
/// `target` identifies the agent (host and port) for the purpose of
/// serializing concurrent discoveries. Returns the next unused
/// request ID.
pub fn discover(
    processor: &mut MessageProcessor,
    transport: &mut dyn DiscoveryTransport,
    target: &str,
    starting_req_id: i32,
    retries: u32,
) -> SnmpResult<i32> {
    processor.security().check_sanity()?;
    let window = processor.time_window().clone();
    let _guard = window.lock_discovery(target);

    let mut req_id = starting_req_id;
    let mut buf = Buf::default();
    let mut recv = vec![0u8; BUFFER_SIZE];

    // Another session may have probed this target already.
    if processor.discovery_state() == DiscoveryState::UnknownEngine {
        if let Some(engine_id) = window.engine_for_target(target) {
            processor.set_engine_id(&engine_id);
        }
    }

    if processor.discovery_state() == DiscoveryState::UnknownEngine {
        let msg_id = processor.correlator().register(req_id);
        build_probe(msg_id, req_id, &mut buf);
        let mut done = false;
        for _ in 0..=retries {
            let len = match transport.exchange(&buf, &mut recv) {
                Ok(len) => len,
                Err(SnmpError::Timeout) => continue,
                Err(e) => return Err(e),
            };
            let report = match parse_report(&recv[..len]) {
                Ok(report) => report,
                Err(e) => {
                    debug!("ignoring malformed discovery response: {}", e);
                    continue;
                }
            };
            if report.engine_id.is_empty() {
                return Err(SnmpError::Discovery(DiscoveryError::MalformedReport));
            }
            if processor.correlator().resolve(report.msg_id, report.req_id).is_none() {
                continue;
            }
            info!(
                "discovered engine {:02x?} at {} (boots {}, time {})",
                report.engine_id, target, report.boots, report.time
            );
            processor.set_engine_id(&report.engine_id);
            window.record_engine(target, &report.engine_id);
            window.update(&report.engine_id, report.boots, report.time, false);
            done = true;
            break;
        }
        if !done {
            processor.correlator().cancel(req_id);
            return Err(SnmpError::Discovery(DiscoveryError::Timeout));
        }
        req_id = req_id.wrapping_add(1);
    }

    if processor.discovery_state() == DiscoveryState::EngineIdKnown {
        processor.encode_sync_probe(req_id, &mut buf)?;
        let mut done = false;
        for _ in 0..=retries {
            let len = match transport.exchange(&buf, &mut recv) {
                Ok(len) => len,
                Err(SnmpError::Timeout) => continue,
                Err(e) => return Err(e),
            };
            let mut plain_buf = Vec::new();
            match processor.decode(&mut recv[..len], &mut plain_buf) {
                // Either a notInTimeWindow report or a straight
                // response confirms the time line.
                Ok(_) => {
                    done = true;
                    break;
                }
                Err(SnmpError::CorrelationMiss) => continue,
                Err(e) => {
                    debug!("time synchronization attempt failed: {}", e);
                    continue;
                }
            }
        }
        if !done {
            processor.correlator().cancel(req_id);
            return Err(SnmpError::Discovery(DiscoveryError::Timeout));
        }
        req_id = req_id.wrapping_add(1);
    }

    processor.ready()?;
    Ok(req_id)
}
