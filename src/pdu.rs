//! BER message construction.
//!
//! Encoding runs back-to-front: values are pushed into the tail of a
//! fixed buffer so that definite lengths are known by the time the
//! enclosing header is written.

use super::{asn1, snmp, Value, VarbindOid, BUFFER_SIZE};
use std::{fmt, mem, ops};

pub struct Buf {
    len: usize,
    buf: [u8; BUFFER_SIZE],
}

impl fmt::Debug for Buf {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_list().entries(&self[..]).finish()
    }
}

impl Default for Buf {
    fn default() -> Buf {
        Buf {
            len: 0,
            buf: [0; BUFFER_SIZE],
        }
    }
}

impl ops::Deref for Buf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf[BUFFER_SIZE - self.len..]
    }
}

impl ops::DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[BUFFER_SIZE - self.len..]
    }
}

impl Buf {
    pub(crate) fn available(&mut self) -> &mut [u8] {
        &mut self.buf[..(BUFFER_SIZE - self.len)]
    }

    pub(crate) fn push_chunk(&mut self, chunk: &[u8]) {
        let offset = BUFFER_SIZE - self.len;
        self.buf[(offset - chunk.len())..offset].copy_from_slice(chunk);
        self.len += chunk.len();
    }

    pub(crate) fn push_byte(&mut self, byte: u8) {
        self.buf[BUFFER_SIZE - self.len - 1] = byte;
        self.len += 1;
    }

    pub(crate) fn reset(&mut self) {
        self.len = 0;
    }

    pub(crate) fn scribble_bytes<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        let scribbled = f(self.available());
        self.len += scribbled;
    }

    pub(crate) fn push_constructed<F>(&mut self, ident: u8, f: F)
    where
        F: FnOnce(&mut Self),
    {
        let before_len = self.len;
        f(self);
        let written = self.len - before_len;
        self.push_length(written);
        self.push_byte(ident);
    }

    pub(crate) fn push_sequence<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.push_constructed(asn1::TYPE_SEQUENCE, f)
    }

    pub(crate) fn push_length(&mut self, len: usize) {
        if len < 128 {
            // short form
            self.push_byte(len as u8);
        } else {
            // long form
            let num_leading_nulls = (len.leading_zeros() / 8) as usize;
            let length_len = mem::size_of::<usize>() - num_leading_nulls;
            let leading_byte = length_len as u8 | 0b1000_0000;
            self.scribble_bytes(|o| {
                assert!(o.len() >= length_len + 1);
                let bytes = len.to_be_bytes();
                let write_offset = o.len() - length_len - 1;
                o[write_offset] = leading_byte;
                o[write_offset + 1..].copy_from_slice(&bytes[num_leading_nulls..]);
                length_len + 1
            });
        }
    }

    pub(crate) fn push_integer(&mut self, n: i64) {
        let len = self.push_i64(n);
        self.push_length(len);
        self.push_byte(asn1::TYPE_INTEGER);
    }

    pub(crate) fn push_endofmibview(&mut self) {
        self.push_chunk(&[snmp::SNMP_ENDOFMIBVIEW, 0]);
    }

    pub(crate) fn push_nosuchobject(&mut self) {
        self.push_chunk(&[snmp::SNMP_NOSUCHOBJECT, 0]);
    }

    pub(crate) fn push_nosuchinstance(&mut self) {
        self.push_chunk(&[snmp::SNMP_NOSUCHINSTANCE, 0]);
    }

    pub(crate) fn push_counter32(&mut self, n: u32) {
        let len = self.push_i64(i64::from(n));
        self.push_length(len);
        self.push_byte(snmp::TYPE_COUNTER32);
    }

    pub(crate) fn push_unsigned32(&mut self, n: u32) {
        let len = self.push_i64(i64::from(n));
        self.push_length(len);
        self.push_byte(snmp::TYPE_UNSIGNED32);
    }

    pub(crate) fn push_timeticks(&mut self, n: u32) {
        let len = self.push_i64(i64::from(n));
        self.push_length(len);
        self.push_byte(snmp::TYPE_TIMETICKS);
    }

    pub(crate) fn push_opaque(&mut self, bytes: &[u8]) {
        self.push_chunk(bytes);
        self.push_length(bytes.len());
        self.push_byte(snmp::TYPE_OPAQUE);
    }

    pub(crate) fn push_counter64(&mut self, n: u64) {
        let len = self.push_i64(n as i64);
        self.push_length(len);
        self.push_byte(snmp::TYPE_COUNTER64);
    }

    pub(crate) fn push_i64(&mut self, n: i64) -> usize {
        let null = if n.is_negative() { 0xffu8 } else { 0x00u8 };
        let bytes = n.to_be_bytes();
        let mut count = bytes.iter().take_while(|&&b| b == null).count();
        // keep at least one byte, and one more if the sign bit would flip
        if count == bytes.len() || (bytes[count] ^ null) > 127 {
            count -= 1;
        }
        self.push_chunk(&bytes[count..]);
        bytes.len() - count
    }

    pub(crate) fn push_boolean(&mut self, boolean: bool) {
        if boolean {
            self.push_byte(0x1);
        } else {
            self.push_byte(0x0);
        }
        self.push_length(1);
        self.push_byte(asn1::TYPE_BOOLEAN);
    }

    pub(crate) fn push_ipaddress(&mut self, ip: &[u8; 4]) {
        self.push_chunk(ip);
        self.push_length(ip.len());
        self.push_byte(snmp::TYPE_IPADDRESS);
    }

    pub(crate) fn push_null(&mut self) {
        self.push_chunk(&[asn1::TYPE_NULL, 0]);
    }

    pub(crate) fn push_object_identifier_raw(&mut self, input: &[u8]) {
        self.push_chunk(input);
        self.push_length(input.len());
        self.push_byte(asn1::TYPE_OBJECTIDENTIFIER);
    }

    pub fn push_object_identifier(&mut self, input: &[u32]) {
        assert!(input.len() >= 2);
        let length_before = self.len;

        self.scribble_bytes(|output| {
            let mut pos = output.len() - 1;
            let (head, tail) = input.split_at(2);
            assert!(head[0] < 3 && head[1] < 40);

            // encode the subids in reverse order
            for subid in tail.iter().rev() {
                let mut subid = *subid;
                let mut last_byte = true;
                loop {
                    assert!(pos != 0);
                    if last_byte {
                        // continue bit is cleared
                        output[pos] = (subid & 0b0111_1111) as u8;
                        last_byte = false;
                    } else {
                        // continue bit is set
                        output[pos] = (subid | 0b1000_0000) as u8;
                    }
                    pos -= 1;
                    subid >>= 7;

                    if subid == 0 {
                        break;
                    }
                }
            }

            // encode the head last
            output[pos] = (head[0] * 40 + head[1]) as u8;
            output.len() - pos
        });
        let length_after = self.len;
        self.push_length(length_after - length_before);
        self.push_byte(asn1::TYPE_OBJECTIDENTIFIER);
    }

    pub(crate) fn push_octet_string(&mut self, bytes: &[u8]) {
        self.push_chunk(bytes);
        self.push_length(bytes.len());
        self.push_byte(asn1::TYPE_OCTETSTRING);
    }
}

pub fn push_varbinds<VLS, ITM>(buf: &mut Buf, values: VLS)
where
    VLS: IntoIterator<Item = ITM>,
    VLS::IntoIter: DoubleEndedIterator,
    ITM: VarbindOid,
{
    buf.push_sequence(|buf| {
        for itm in values.into_iter().rev() {
            buf.push_sequence(|buf| {
                if let Some(v) = itm.value() {
                    match v {
                        Value::Boolean(b) => buf.push_boolean(*b),
                        Value::Null => buf.push_null(),
                        Value::Integer(i) => buf.push_integer(*i),
                        Value::OctetString(ostr) => buf.push_octet_string(ostr),
                        Value::ObjectIdentifier(ref objid) => {
                            buf.push_object_identifier_raw(objid.raw());
                        }
                        Value::IpAddress(ref ip) => buf.push_ipaddress(ip),
                        Value::Counter32(i) => buf.push_counter32(*i),
                        Value::Unsigned32(i) => buf.push_unsigned32(*i),
                        Value::Timeticks(tt) => buf.push_timeticks(*tt),
                        Value::Opaque(bytes) => buf.push_opaque(bytes),
                        Value::Counter64(i) => buf.push_counter64(*i),
                        Value::EndOfMibView => buf.push_endofmibview(),
                        Value::NoSuchObject => buf.push_nosuchobject(),
                        Value::NoSuchInstance => buf.push_nosuchinstance(),
                        _ => return,
                    }
                } else {
                    buf.push_null();
                }
                buf.push_object_identifier(itm.oid());
            });
        }
    });
}

/// Pushes the request PDU: ident, request-id, two PDU integers
/// (error-status/error-index, or non-repeaters/max-repetitions for
/// GETBULK) and the varbind list.
pub fn push_request_pdu<VLS, ITM>(ident: u8, req_id: i32, u1: u32, u2: u32, values: VLS, buf: &mut Buf)
where
    VLS: IntoIterator<Item = ITM>,
    VLS::IntoIter: DoubleEndedIterator,
    ITM: VarbindOid,
{
    buf.push_constructed(ident, |buf| {
        push_varbinds(buf, values);
        buf.push_integer(i64::from(u2));
        buf.push_integer(i64::from(u1));
        buf.push_integer(i64::from(req_id));
    });
}


/// Builds a complete SNMPv1/v2c message with community security.
pub fn build_community<VLS, ITM>(
    ident: u8,
    version: i64,
    community: &[u8],
    req_id: i32,
    u1: u32,
    u2: u32,
    values: VLS,
    buf: &mut Buf,
) where
    VLS: IntoIterator<Item = ITM>,
    VLS::IntoIter: DoubleEndedIterator,
    ITM: VarbindOid,
{
    buf.reset();
    buf.push_sequence(|buf| {
        push_request_pdu(ident, req_id, u1, u2, values, buf);
        buf.push_octet_string(community);
        buf.push_integer(version);
    });
}
