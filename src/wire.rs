//! DNS wire codec (§6 "Codec dependency"). Out of scope for the scanner core
//! proper but shipped here as the crate's concrete collaborator, grounded on
//! the teacher's `mdns.rs` (label read/write, message framing) and
//! `mdns2/protocol.rs` (record encoding, SRV target handling).

use std::io::{Cursor, Read};
use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const CLASS_IN: u16 = 1;

/// DNS RR types the scanner cares about (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Ptr,
    Srv,
    Txt,
    Any,
    /// Anything else observed on the wire; preserved for round-tripping but
    /// never produced by this crate's own queries.
    Other(u16),
}

impl RecordType {
    pub fn wire_value(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ptr => 12,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Any => 255,
            RecordType::Other(v) => v,
        }
    }

    pub fn from_wire(v: u16) -> Self {
        match v {
            1 => RecordType::A,
            12 => RecordType::Ptr,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            33 => RecordType::Srv,
            255 => RecordType::Any,
            other => RecordType::Other(other),
        }
    }
}

/// mDNS message type, derived from the DNS header's QR bit plus the TC
/// (truncated) bit (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Query,
    TruncatedQuery,
    Response,
    TruncatedResponse,
}

impl MessageType {
    fn flags(self) -> u16 {
        match self {
            MessageType::Query => 0x0000,
            MessageType::TruncatedQuery => 0x0200,
            MessageType::Response => 0x8400,
            MessageType::TruncatedResponse => 0x8600,
        }
    }

    fn from_flags(flags: u16) -> Self {
        let is_response = flags & 0x8000 != 0;
        let truncated = flags & 0x0200 != 0;
        match (is_response, truncated) {
            (false, false) => MessageType::Query,
            (false, true) => MessageType::TruncatedQuery,
            (true, false) => MessageType::Response,
            (true, true) => MessageType::TruncatedResponse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    /// Raw TXT payload, left for `txt::parse_*` to interpret.
    Txt(Vec<u8>),
    Other(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
    /// Seconds, as carried on the wire. `0` means "goodbye" (§3 lifecycle).
    pub ttl: u32,
    pub data: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub message_type: MessageType,
    pub transaction_id: u16,
    pub queries: Vec<Query>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additional: Vec<Record>,
}

fn write_label(name: &str, out: &mut Vec<u8>) {
    for seg in name.trim_end_matches('.').split('.') {
        if seg.is_empty() {
            continue;
        }
        let bytes = seg.as_bytes();
        out.push(bytes.len().min(63) as u8);
        out.extend_from_slice(&bytes[..bytes.len().min(63)]);
    }
    out.push(0);
}

fn read_label(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Option<String> {
    let mut out = String::new();
    let mut jumps = 0;
    loop {
        let n = cursor.read_u8().ok()?;
        if n == 0 {
            break;
        } else if n & 0xc0 == 0xc0 {
            jumps += 1;
            if jumps > 32 {
                return None; // guard against malformed compression loops
            }
            let lo = cursor.read_u8().ok()?;
            let offset = (((n & 0x3f) as usize) << 8) | lo as usize;
            let frag = read_label(data, &mut Cursor::new(data.get(offset..)?))?;
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(&frag);
            break;
        } else {
            let len = n as usize;
            let mut buf = vec![0u8; len];
            cursor.read_exact(&mut buf).ok()?;
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(std::str::from_utf8(&buf).ok()?);
        }
    }
    Some(out)
}

fn encode_record_data(rtype: RecordType, data: &RecordData, out: &mut Vec<u8>) {
    match data {
        RecordData::A(ip) => out.extend_from_slice(&ip.octets()),
        RecordData::Aaaa(ip) => out.extend_from_slice(&ip.octets()),
        RecordData::Ptr(target) => write_label(target, out),
        RecordData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            let _ = out.write_u16::<BigEndian>(*priority);
            let _ = out.write_u16::<BigEndian>(*weight);
            let _ = out.write_u16::<BigEndian>(*port);
            write_label(target, out);
        }
        RecordData::Txt(raw) => out.extend_from_slice(raw),
        RecordData::Other(raw) => out.extend_from_slice(raw),
    }
    let _ = rtype; // kept for symmetry with decode_record_data's dispatch
}

/// Encode one resource record, used both for full-message assembly and for
/// measuring a single answer's size during fragmentation (§4.5 step 3).
pub fn encode_record(rr: &Record, out: &mut Vec<u8>) {
    write_label(&rr.name, out);
    let _ = out.write_u16::<BigEndian>(rr.rtype.wire_value());
    let _ = out.write_u16::<BigEndian>(rr.class);
    let _ = out.write_u32::<BigEndian>(rr.ttl);

    let mut rdata = Vec::new();
    encode_record_data(rr.rtype, &rr.data, &mut rdata);
    let _ = out.write_u16::<BigEndian>(rdata.len() as u16);
    out.extend_from_slice(&rdata);
}

fn encode_query(q: &Query, out: &mut Vec<u8>) {
    write_label(&q.name, out);
    let _ = out.write_u16::<BigEndian>(q.rtype.wire_value());
    let _ = out.write_u16::<BigEndian>(q.class);
}

/// Encode a full DNS message. `transaction_id` is always 0 for mDNS (§4.5 step 5).
pub fn encode(msg: &DnsMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    let _ = out.write_u16::<BigEndian>(msg.transaction_id);
    let _ = out.write_u16::<BigEndian>(msg.message_type.flags());
    let _ = out.write_u16::<BigEndian>(msg.queries.len() as u16);
    let _ = out.write_u16::<BigEndian>(msg.answers.len() as u16);
    let _ = out.write_u16::<BigEndian>(msg.authorities.len() as u16);
    let _ = out.write_u16::<BigEndian>(msg.additional.len() as u16);

    for q in &msg.queries {
        encode_query(q, &mut out);
    }
    for rr in &msg.answers {
        encode_record(rr, &mut out);
    }
    for rr in &msg.authorities {
        encode_record(rr, &mut out);
    }
    for rr in &msg.additional {
        encode_record(rr, &mut out);
    }
    out
}

fn decode_record_data(rtype: RecordType, raw: &[u8], whole: &[u8]) -> RecordData {
    match rtype {
        RecordType::A => {
            if let Ok(arr) = <[u8; 4]>::try_from(raw) {
                RecordData::A(Ipv4Addr::from(arr))
            } else {
                RecordData::Other(raw.to_vec())
            }
        }
        RecordType::Aaaa => {
            if let Ok(arr) = <[u8; 16]>::try_from(raw) {
                RecordData::Aaaa(Ipv6Addr::from(arr))
            } else {
                RecordData::Other(raw.to_vec())
            }
        }
        RecordType::Ptr => match read_label(whole, &mut Cursor::new(raw)) {
            Some(name) => RecordData::Ptr(name),
            None => RecordData::Other(raw.to_vec()),
        },
        RecordType::Srv => {
            if raw.len() < 6 {
                return RecordData::Other(raw.to_vec());
            }
            let priority = u16::from_be_bytes([raw[0], raw[1]]);
            let weight = u16::from_be_bytes([raw[2], raw[3]]);
            let port = u16::from_be_bytes([raw[4], raw[5]]);
            let target = read_label(whole, &mut Cursor::new(&raw[6..]))
                .unwrap_or_default();
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            }
        }
        RecordType::Txt => RecordData::Txt(raw.to_vec()),
        RecordType::Any | RecordType::Other(_) => RecordData::Other(raw.to_vec()),
    }
}

fn decode_query(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Option<Query> {
    let name = read_label(data, cursor)?;
    let rtype = RecordType::from_wire(cursor.read_u16::<BigEndian>().ok()?);
    let class = cursor.read_u16::<BigEndian>().ok()?;
    Some(Query { name, rtype, class })
}

fn decode_record(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Option<Record> {
    let name = read_label(data, cursor)?;
    let rtype = RecordType::from_wire(cursor.read_u16::<BigEndian>().ok()?);
    let class = cursor.read_u16::<BigEndian>().ok()?;
    let ttl = cursor.read_u32::<BigEndian>().ok()?;
    let rdlen = cursor.read_u16::<BigEndian>().ok()? as usize;
    let start = cursor.position() as usize;
    let end = start.checked_add(rdlen)?;
    let raw = data.get(start..end)?;
    cursor.set_position(end as u64);
    let parsed = decode_record_data(rtype, raw, data);
    Some(Record {
        name,
        rtype,
        class,
        ttl,
        data: parsed,
    })
}

/// Decode a full DNS message. Returns `None` on any parse failure
/// (*ParseFailure*, §7) — the caller silently drops the packet.
pub fn decode(data: &[u8]) -> Option<DnsMessage> {
    let mut cursor = Cursor::new(data);
    let transaction_id = cursor.read_u16::<BigEndian>().ok()?;
    let flags = cursor.read_u16::<BigEndian>().ok()?;
    let nq = cursor.read_u16::<BigEndian>().ok()?;
    let na = cursor.read_u16::<BigEndian>().ok()?;
    let nauth = cursor.read_u16::<BigEndian>().ok()?;
    let nadd = cursor.read_u16::<BigEndian>().ok()?;

    let mut queries = Vec::with_capacity(nq as usize);
    for _ in 0..nq {
        queries.push(decode_query(data, &mut cursor)?);
    }
    let mut answers = Vec::with_capacity(na as usize);
    for _ in 0..na {
        answers.push(decode_record(data, &mut cursor)?);
    }
    let mut authorities = Vec::with_capacity(nauth as usize);
    for _ in 0..nauth {
        authorities.push(decode_record(data, &mut cursor)?);
    }
    let mut additional = Vec::with_capacity(nadd as usize);
    for _ in 0..nadd {
        additional.push(decode_record(data, &mut cursor)?);
    }

    Some(DnsMessage {
        message_type: MessageType::from_flags(flags),
        transaction_id,
        queries,
        answers,
        authorities,
        additional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr_record(name: &str, target: &str, ttl: u32) -> Record {
        Record {
            name: name.to_owned(),
            rtype: RecordType::Ptr,
            class: CLASS_IN,
            ttl,
            data: RecordData::Ptr(target.to_owned()),
        }
    }

    #[test]
    fn round_trips_a_query_message() {
        let msg = DnsMessage {
            message_type: MessageType::Query,
            transaction_id: 0,
            queries: vec![Query {
                name: "_matterc._udp.local".to_owned(),
                rtype: RecordType::Ptr,
                class: CLASS_IN,
            }],
            answers: vec![],
            authorities: vec![],
            additional: vec![],
        };
        let encoded = encode(&msg);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.message_type, MessageType::Query);
        assert_eq!(decoded.queries.len(), 1);
        assert_eq!(decoded.queries[0].name, "_matterc._udp.local");
    }

    #[test]
    fn round_trips_ptr_srv_txt_a_aaaa_answers() {
        let msg = DnsMessage {
            message_type: MessageType::Response,
            transaction_id: 0,
            queries: vec![],
            answers: vec![ptr_record(
                "_matterc._udp.local",
                "ABCD1234._matterc._udp.local",
                120,
            )],
            authorities: vec![],
            additional: vec![
                Record {
                    name: "ABCD1234._matterc._udp.local".to_owned(),
                    rtype: RecordType::Srv,
                    class: CLASS_IN,
                    ttl: 120,
                    data: RecordData::Srv {
                        priority: 0,
                        weight: 0,
                        port: 5540,
                        target: "device1.local".to_owned(),
                    },
                },
                Record {
                    name: "device1.local".to_owned(),
                    rtype: RecordType::Aaaa,
                    class: CLASS_IN,
                    ttl: 120,
                    data: RecordData::Aaaa("fe80::1".parse().unwrap()),
                },
            ],
        };
        let encoded = encode(&msg);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.message_type, MessageType::Response);
        assert_eq!(decoded.answers.len(), 1);
        match &decoded.answers[0].data {
            RecordData::Ptr(t) => assert_eq!(t, "ABCD1234._matterc._udp.local"),
            other => panic!("unexpected {other:?}"),
        }
        match &decoded.additional[0].data {
            RecordData::Srv { port, target, .. } => {
                assert_eq!(*port, 5540);
                assert_eq!(target, "device1.local");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &decoded.additional[1].data {
            RecordData::Aaaa(ip) => assert_eq!(ip.to_string(), "fe80::1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_flag_round_trips() {
        let msg = DnsMessage {
            message_type: MessageType::TruncatedQuery,
            transaction_id: 0,
            queries: vec![],
            answers: vec![],
            authorities: vec![],
            additional: vec![],
        };
        let decoded = decode(&encode(&msg)).unwrap();
        assert_eq!(decoded.message_type, MessageType::TruncatedQuery);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(decode(&[0, 0, 0]).is_none());
    }

    #[test]
    fn zero_ttl_round_trips() {
        let rr = ptr_record("a.local", "b.local", 0);
        let mut out = Vec::new();
        encode_record(&rr, &mut out);
        assert_eq!(out[out.len() - 8..out.len() - 4], [0, 0, 0, 0]);
    }
}
