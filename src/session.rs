//! Synchronous UDP session.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::num::Wrapping;
use std::sync::Arc;
use std::time::Duration;

use crate::usm::{self, DiscoveryTransport, MessageProcessor, TimeWindow};
use crate::{
    pdu, snmp, ObjIdBuf, ObjectIdentifier, SnmpError, SnmpMessageType, SnmpPdu, SnmpResult, Value,
    VarbindOid, BUFFER_SIZE,
};

pub(crate) enum SessionSecurity {
    Community { version: i64, community: Vec<u8> },
    Usm(Box<MessageProcessor>),
}

/// Synchronous SNMP client over UDP.
pub struct SyncSession {
    socket: UdpSocket,
    security: SessionSecurity,
    target: String,
    req_id: Wrapping<i32>,
    send_pdu: pdu::Buf,
    recv_buf: [u8; BUFFER_SIZE],
    plain_buf: Vec<u8>,
}

fn bind_for<SA>(destination: &SA) -> SnmpResult<UdpSocket>
where
    SA: ToSocketAddrs,
{
    match destination.to_socket_addrs()?.next() {
        Some(SocketAddr::V4(_)) => Ok(UdpSocket::bind((Ipv4Addr::new(0, 0, 0, 0), 0))?),
        Some(SocketAddr::V6(_)) => {
            Ok(UdpSocket::bind((Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 0))?)
        }
        None => Err(SnmpError::SendError("empty list of socket addrs".into())),
    }
}

pub(crate) struct UdpTransport<'a> {
    pub(crate) socket: &'a UdpSocket,
}

impl<'a> DiscoveryTransport for UdpTransport<'a> {
    fn exchange(&mut self, request: &[u8], response: &mut [u8]) -> SnmpResult<usize> {
        self.socket
            .send(request)
            .map_err(|e| SnmpError::SendError(format!("{}", e)))?;
        match self.socket.recv(response) {
            Ok(len) => Ok(len),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(SnmpError::Timeout)
            }
            Err(e) => Err(SnmpError::ReceiveError(format!("{}", e))),
        }
    }
}

impl SyncSession {
    fn new<SA>(
        destination: SA,
        security: SessionSecurity,
        timeout: Option<Duration>,
        starting_req_id: i32,
    ) -> SnmpResult<Self>
    where
        SA: ToSocketAddrs,
    {
        let socket = bind_for(&destination)?;
        socket.set_read_timeout(timeout)?;
        socket.connect(destination)?;
        let target = socket
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        Ok(SyncSession {
            socket,
            security,
            target,
            req_id: Wrapping(starting_req_id),
            send_pdu: pdu::Buf::default(),
            recv_buf: [0; BUFFER_SIZE],
            plain_buf: Vec::new(),
        })
    }

    pub fn new_v1<SA>(
        destination: SA,
        community: &[u8],
        timeout: Option<Duration>,
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
            timeout,
            starting_req_id,
        )
    }

    pub fn new_v2c<SA>(
        destination: SA,
        community: &[u8],
        timeout: Option<Duration>,
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
            timeout,
            starting_req_id,
        )
    }

    pub fn new_v3<SA>(
        destination: SA,
        security: usm::Security,
        time_window: Arc<TimeWindow>,
        timeout: Option<Duration>,
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
            timeout,
            starting_req_id,
        )
    }

    pub fn last_req_id(&self) -> i32 {
        self.req_id.0
    }

    /// The USM processor, when this is an SNMPv3 session.
    pub fn processor_mut(&mut self) -> Option<&mut MessageProcessor> {
        match &mut self.security {
            SessionSecurity::Usm(p) => Some(p),
            SessionSecurity::Community { .. } => None,
        }
    }

    /// Runs the discovery handshake if the target engine is not known
    /// or not yet time synchronized. No-op for community sessions.
    pub fn ensure_discovered(&mut self, repeat: u32) -> SnmpResult<()> {
        if let SessionSecurity::Usm(processor) = &mut self.security {
            if processor.ready().is_err() {
                let mut transport = UdpTransport {
                    socket: &self.socket,
                };
                let next = usm::discovery::discover(
                    processor,
                    &mut transport,
                    &self.target,
                    self.req_id.0,
                    repeat.saturating_sub(1),
                )?;
                self.req_id = Wrapping(next);
            }
        }
        Ok(())
    }

    fn send_and_recv(socket: &UdpSocket, pdu: &pdu::Buf, out: &mut [u8]) -> SnmpResult<usize> {
        let mut transport = UdpTransport { socket };
        transport.exchange(&pdu[..], out)
    }

    fn send_and_recv_repeat(
        socket: &UdpSocket,
        pdu: &pdu::Buf,
        out: &mut [u8],
        repeat: u32,
    ) -> SnmpResult<usize> {
        for _ in 1..repeat {
            if let Ok(n) = Self::send_and_recv(socket, pdu, out) {
                return Ok(n);
            }
        }
        Self::send_and_recv(socket, pdu, out)
    }

    fn request<'slf, VLS, ITM>(
        &'slf mut self,
        ident: u8,
        u1: u32,
        u2: u32,
        values: VLS,
        repeat: u32,
    ) -> SnmpResult<SnmpPdu<'slf>>
    where
        VLS: IntoIterator<Item = ITM>,
        VLS::IntoIter: DoubleEndedIterator,
        ITM: VarbindOid,
    {
        self.ensure_discovered(repeat)?;
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
        )?;
        self.req_id += Wrapping(1);
        let resp = match &mut self.security {
            SessionSecurity::Community { .. } => SnmpPdu::from_bytes(&self.recv_buf[..recv_len])?,
            SessionSecurity::Usm(processor) => {
                processor.decode(&mut self.recv_buf[..recv_len], &mut self.plain_buf)?
            }
        };
        if resp.message_type == SnmpMessageType::Report {
            // The agent rejected the request at the security layer;
            // the decode step already absorbed any time information it
            // carried. The usmStats OID names what it objected to.
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

    pub fn get<'slf, ITM>(&'slf mut self, name: ITM, repeat: u32) -> SnmpResult<SnmpPdu<'slf>>
    where
        ITM: VarbindOid,
    {
        self.request(snmp::MSG_GET, 0, 0, [name], repeat)
    }

    pub fn getmulti<'slf, NAMES, ITM>(
        &'slf mut self,
        names: NAMES,
        repeat: u32,
    ) -> SnmpResult<SnmpPdu<'slf>>
    where
        NAMES: IntoIterator<Item = ITM>,
        NAMES::IntoIter: DoubleEndedIterator,
        ITM: VarbindOid,
    {
        self.request(snmp::MSG_GET, 0, 0, names, repeat)
    }

    pub fn getnext<'slf, ITM>(&'slf mut self, name: ITM, repeat: u32) -> SnmpResult<SnmpPdu<'slf>>
    where
        ITM: VarbindOid,
    {
        self.request(snmp::MSG_GET_NEXT, 0, 0, [name], repeat)
    }

    pub fn getbulk<'slf, NAMES, ITM>(
        &'slf mut self,
        names: NAMES,
        non_repeaters: u32,
        max_repetitions: u32,
        repeat: u32,
    ) -> SnmpResult<SnmpPdu<'slf>>
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
        )
    }

    /// Walks the subtree under `prefix` with GETNEXT, calling `f` for
    /// each varbind. Stops at the end of the subtree or of the MIB
    /// view. Returns the number of varbinds visited.
    pub fn walk<F>(&mut self, prefix: &[u32], repeat: u32, mut f: F) -> SnmpResult<usize>
    where
        F: FnMut(&ObjectIdentifier, &Value) -> SnmpResult<()>,
    {
        let mut current: Vec<u32> = prefix.to_vec();
        let mut count = 0;
        loop {
            let resp = self.request(snmp::MSG_GET_NEXT, 0, 0, [current.as_slice()], repeat)?;
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
    pub fn set<'slf>(
        &'slf mut self,
        values: &[(&[u32], Value)],
        repeat: u32,
    ) -> SnmpResult<SnmpPdu<'slf>> {
        self.request(snmp::MSG_SET, 0, 0, values, repeat)
    }
}
