//! Asynchronous UDP session for Tokio.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::num::Wrapping;
use std::sync::Arc;

use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};
use tokio::time::{self, Duration};

use crate::session::SessionSecurity;
use crate::usm::{self, DiscoveryState, MessageProcessor, TimeWindow};
use crate::{
    get_oid_array, pdu, snmp, DiscoveryError, ObjIdBuf, ObjectIdentifier, SnmpError,
    SnmpMessageType, SnmpPdu, SnmpResult, Value, VarbindOid, BUFFER_SIZE,
};

/// Asynchronous SNMP client for Tokio.
pub struct TokioSession {
    socket: UdpSocket,
    security: SessionSecurity,
    target: String,
    req_id: Wrapping<i32>,
    send_pdu: pdu::Buf,
    recv_buf: Box<[u8; BUFFER_SIZE]>,
    plain_buf: Vec<u8>,
}

impl TokioSession {
    async fn new<SA>(
        destination: SA,
        security: SessionSecurity,
        starting_req_id: i32,
    ) -> SnmpResult<Self>
    where
        SA: ToSocketAddrs,
    {
        let socket = match lookup_host(&destination).await?.next() {
            Some(SocketAddr::V4(_)) => UdpSocket::bind((Ipv4Addr::new(0, 0, 0, 0), 0)).await?,
            Some(SocketAddr::V6(_)) => {
                UdpSocket::bind((Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 0)).await?
            }
            None => return Err(SnmpError::SendError("empty list of socket addrs".into())),
        };
        socket.connect(destination).await?;
        let target = socket
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        Ok(Self {
            socket,
            security,
            target,
            req_id: Wrapping(starting_req_id),
            send_pdu: pdu::Buf::default(),
            recv_buf: Box::new([0; BUFFER_SIZE]),
            plain_buf: Vec::new(),
        })
    }

    pub async fn new_v1<SA>(
        destination: SA,
        community: &[u8],
        starting_req_id: i32,
    ) -> SnmpResult<Self>
    where
        SA: ToSocketAddrs,
    {
        Self::new(
            destination,
            SessionSecurity::Community {
                version: snmp::VERSION_1,
                community: community.to_vec(),
            },
            starting_req_id,
        )
        .await
    }

    pub async fn new_v2c<SA>(
        destination: SA,
        community: &[u8],
        starting_req_id: i32,
    ) -> SnmpResult<Self>
    where
        SA: ToSocketAddrs,
    {
        Self::new(
            destination,
            SessionSecurity::Community {
                version: snmp::VERSION_2,
                community: community.to_vec(),
            },
            starting_req_id,
        )
        .await
    }

    pub async fn new_v3<SA>(
        destination: SA,
        security: usm::Security,
        time_window: Arc<TimeWindow>,
        starting_req_id: i32,
    ) -> SnmpResult<Self>
    where
        SA: ToSocketAddrs,
    {
        security.check_sanity()?;
        let processor = MessageProcessor::new(security, time_window)?;
        Self::new(
            destination,
            SessionSecurity::Usm(Box::new(processor)),
            starting_req_id,
        )
        .await
    }

    pub fn last_req_id(&self) -> i32 {
        self.req_id.0
    }

    pub fn set_last_req_id(&mut self, req_id: i32) {
        self.req_id.0 = req_id;
    }

    /// The USM processor, when this is an SNMPv3 session.
    pub fn processor_mut(&mut self) -> Option<&mut MessageProcessor> {
        match &mut self.security {
            SessionSecurity::Usm(p) => Some(p),
            SessionSecurity::Community { .. } => None,
        }
    }

    async fn send_and_recv(socket: &UdpSocket, pdu: &[u8], out: &mut [u8]) -> SnmpResult<usize> {
        match socket.send(pdu).await {
            Ok(_pdu_len) => match socket.recv(out).await {
                Ok(len) => Ok(len),
                Err(e) => Err(SnmpError::ReceiveError(format!("{}", e))),
            },
            Err(e) => Err(SnmpError::SendError(format!("{}", e))),
        }
    }

    async fn send_and_recv_repeat(
        socket: &UdpSocket,
        pdu: &pdu::Buf,
        out: &mut [u8],
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<usize> {
        for _ in 1..repeat {
            match time::timeout(timeout, Self::send_and_recv(socket, &pdu[..], out)).await {
                Err(_) => {}
                Ok(result) => {
                    if let Ok(len) = result {
                        return Ok(len);
                    }
                }
            }
        }
        match time::timeout(timeout, Self::send_and_recv(socket, &pdu[..], out)).await {
            Err(_) => Err(SnmpError::Timeout),
            Ok(result) => result,
        }
    }

    /// Runs the discovery handshake when the target engine is not yet
    /// known or time synchronized. The same handshake as the blocking
    /// session, except that waiting for another task's in-flight
    /// discovery yields to the runtime instead of parking the thread.
    async fn check_security(&mut self, repeat: u32, timeout: Duration) -> SnmpResult<()> {
        let processor = match &mut self.security {
            SessionSecurity::Usm(p) => p,
            SessionSecurity::Community { .. } => return Ok(()),
        };
        if processor.ready().is_ok() {
            return Ok(());
        }
        processor.security().check_sanity()?;
        let window = processor.time_window().clone();
        let _guard = loop {
            if let Some(guard) = window.try_lock_discovery(&self.target) {
                break guard;
            }
            time::sleep(Duration::from_millis(20)).await;
            if processor.ready().is_ok() {
                return Ok(());
            }
        };

        // Another session may have probed this target already.
        if processor.discovery_state() == DiscoveryState::UnknownEngine {
            if let Some(engine_id) = window.engine_for_target(&self.target) {
                processor.set_engine_id(&engine_id);
            }
        }

        if processor.discovery_state() == DiscoveryState::UnknownEngine {
            let req_id = self.req_id.0;
            let msg_id = processor.correlator().register(req_id);
            usm::discovery::build_probe(msg_id, req_id, &mut self.send_pdu);
            let mut done = false;
            for _ in 0..repeat.max(1) {
                let exchange =
                    Self::send_and_recv(&self.socket, &self.send_pdu[..], &mut self.recv_buf[..]);
                let len = match time::timeout(timeout, exchange).await {
                    Err(_) => continue,
                    Ok(Ok(len)) => len,
                    Ok(Err(e)) => return Err(e),
                };
                let report = match usm::discovery::parse_report(&self.recv_buf[..len]) {
                    Ok(report) => report,
                    Err(e) => {
                        debug!("ignoring malformed discovery response: {}", e);
                        continue;
                    }
                };
                if report.engine_id.is_empty() {
                    return Err(SnmpError::Discovery(DiscoveryError::MalformedReport));
                }
                if processor
                    .correlator()
                    .resolve(report.msg_id, report.req_id)
                    .is_none()
                {
                    continue;
                }
                info!(
                    "discovered engine {:02x?} at {} (boots {}, time {})",
                    report.engine_id, self.target, report.boots, report.time
                );
                processor.set_engine_id(&report.engine_id);
                window.record_engine(&self.target, &report.engine_id);
                window.update(&report.engine_id, report.boots, report.time, false);
                done = true;
                break;
            }
            if !done {
                processor.correlator().cancel(req_id);
                return Err(SnmpError::Discovery(DiscoveryError::Timeout));
            }
            self.req_id += Wrapping(1);
        }

        if processor.discovery_state() == DiscoveryState::EngineIdKnown {
            let req_id = self.req_id.0;
            processor.encode_sync_probe(req_id, &mut self.send_pdu)?;
            let mut done = false;
            for _ in 0..repeat.max(1) {
                let exchange =
                    Self::send_and_recv(&self.socket, &self.send_pdu[..], &mut self.recv_buf[..]);
                let len = match time::timeout(timeout, exchange).await {
                    Err(_) => continue,
                    Ok(Ok(len)) => len,
                    Ok(Err(e)) => return Err(e),
                };
                match processor.decode(&mut self.recv_buf[..len], &mut self.plain_buf) {
                    Ok(_) => {
                        done = true;
                        break;
                    }
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
            self.req_id += Wrapping(1);
        }

        processor.ready()
    }

    async fn request<'slf, VLS, ITM>(
        &'slf mut self,
        ident: u8,
        u1: u32,
        u2: u32,
        values: VLS,
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'slf>>
    where
        VLS: IntoIterator<Item = ITM>,
        VLS::IntoIter: DoubleEndedIterator,
        ITM: VarbindOid,
    {
        self.check_security(repeat, timeout).await?;
        let req_id = self.req_id.0;
        match &mut self.security {
            SessionSecurity::Community { version, community } => {
                pdu::build_community(
                    ident,
                    *version,
                    community,
                    req_id,
                    u1,
                    u2,
                    values,
                    &mut self.send_pdu,
                );
            }
            SessionSecurity::Usm(processor) => {
                processor.encode(ident, req_id, u1, u2, values, &mut self.send_pdu)?;
            }
        }
        let recv_len = Self::send_and_recv_repeat(
            &self.socket,
            &self.send_pdu,
            &mut self.recv_buf[..],
            repeat,
            timeout,
        )
        .await?;
        self.req_id += Wrapping(1);
        let resp = match &mut self.security {
            SessionSecurity::Community { .. } => SnmpPdu::from_bytes(&self.recv_buf[..recv_len])?,
            SessionSecurity::Usm(processor) => {
                processor.decode(&mut self.recv_buf[..recv_len], &mut self.plain_buf)?
            }
        };
        if resp.message_type == SnmpMessageType::Report {
            return Err(usm::discovery::report_error(&resp));
        }
        if resp.message_type != SnmpMessageType::Response {
            return Err(SnmpError::AsnWrongType);
        }
        if resp.req_id != req_id {
            return Err(SnmpError::RequestIdMismatch);
        }
        Ok(resp)
    }

    pub async fn get_oid(
        &mut self,
        oid: &str,
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'_>> {
        self.get(get_oid_array(oid).as_slice(), repeat, timeout)
            .await
    }

    pub async fn get<ITM>(
        &mut self,
        name: ITM,
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'_>>
    where
        ITM: VarbindOid,
    {
        self.request(snmp::MSG_GET, 0, 0, [name], repeat, timeout)
            .await
    }

    pub async fn getmulti<NAMES, ITM>(
        &mut self,
        names: NAMES,
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'_>>
    where
        NAMES: IntoIterator<Item = ITM>,
        NAMES::IntoIter: DoubleEndedIterator,
        ITM: VarbindOid,
    {
        self.request(snmp::MSG_GET, 0, 0, names, repeat, timeout)
            .await
    }

    pub async fn get_oid_next(
        &mut self,
        oid: &str,
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'_>> {
        self.getnext(get_oid_array(oid).as_slice(), repeat, timeout)
            .await
    }

    pub async fn getnext<ITM>(
        &mut self,
        name: ITM,
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'_>>
    where
        ITM: VarbindOid,
    {
        self.request(snmp::MSG_GET_NEXT, 0, 0, [name], repeat, timeout)
            .await
    }

    pub async fn getbulk<NAMES, ITM>(
        &mut self,
        names: NAMES,
        non_repeaters: u32,
        max_repetitions: u32,
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'_>>
    where
        NAMES: IntoIterator<Item = ITM>,
        NAMES::IntoIter: DoubleEndedIterator,
        ITM: VarbindOid,
    {
        self.request(
            snmp::MSG_GET_BULK,
            non_repeaters,
            max_repetitions,
            names,
            repeat,
            timeout,
        )
        .await
    }

    /// Walks the subtree under `prefix` with GETNEXT, calling `f` for
    /// each varbind. Stops at the end of the subtree or of the MIB
    /// view. Returns the number of varbinds visited.
    pub async fn walk<F>(
        &mut self,
        prefix: &[u32],
        repeat: u32,
        timeout: Duration,
        mut f: F,
    ) -> SnmpResult<usize>
    where
        F: FnMut(&ObjectIdentifier, &Value) -> SnmpResult<()>,
    {
        let mut current: Vec<u32> = prefix.to_vec();
        let mut count = 0;
        loop {
            let resp = self
                .request(
                    snmp::MSG_GET_NEXT,
                    0,
                    0,
                    [current.as_slice()],
                    repeat,
                    timeout,
                )
                .await?;
            let mut next: Option<Vec<u32>> = None;
            for (name, value) in resp.varbinds.clone() {
                let mut buf: ObjIdBuf = [0; 128];
                let subids = name.read_name(&mut buf)?;
                if !name.starts_with(prefix) || value == Value::EndOfMibView {
                    return Ok(count);
                }
                if subids <= &current[..] {
                    return Err(SnmpError::OidIsNotIncreasing);
                }
                f(&name, &value)?;
                count += 1;
                next = Some(subids.to_vec());
            }
            match next {
                Some(n) => current = n,
                None => return Ok(count),
            }
        }
    }

    /// # Panics if any of the values are not one of these supported types:
    ///   - `Boolean`
    ///   - `Null`
    ///   - `Integer`
    ///   - `OctetString`
    ///   - `ObjectIdentifier`
    ///   - `IpAddress`
    ///   - `Counter32`
    ///   - `Unsigned32`
    ///   - `Timeticks`
    ///   - `Opaque`
    ///   - `Counter64`
    pub async fn set(
        &mut self,
        values: &[(&[u32], Value<'_>)],
        repeat: u32,
        timeout: Duration,
    ) -> SnmpResult<SnmpPdu<'_>> {
        self.request(snmp::MSG_SET, 0, 0, values, repeat, timeout)
            .await
    }
}
