//! TXT Parser (§4.2): decode a Matter TXT record payload into a structured
//! [`DiscoveryData`] (operational devices) or [`CommissionableTxt`]
//! (commissionable devices, which additionally requires `D`/`CM`).

use std::collections::HashMap;

/// The reserved `T` value that is treated the same as "absent".
const T_RESERVED: u64 = 1;

/// Fields shared by operational and commissionable TXT records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryData {
    pub sii: Option<u64>,
    pub sai: Option<u64>,
    pub sat: Option<u64>,
    /// TCP support bitmap; clamped to 0 if absent or the reserved value `1`.
    pub t: u64,
    /// ICD (intermittently connected device) flag; defaults to 0.
    pub icd: u64,
    pub ph: Option<u64>,
    pub vp: Option<String>,
    pub dn: Option<String>,
    pub ri: Option<String>,
    pub pi: Option<String>,
}

/// Commissionable-only identifier surface layered on top of [`DiscoveryData`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionableTxt {
    pub discovery: DiscoveryData,
    pub d: u16,
    pub cm: u8,
    pub dt: Option<u32>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

/// Split a raw TXT value (a sequence of length-prefixed `key=value` byte
/// strings) into a map, silently skipping malformed entries.
fn split_entries(data: &[u8]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let len = data[pos] as usize;
        pos += 1;
        if pos + len > data.len() {
            break;
        }
        let entry = &data[pos..pos + len];
        pos += len;
        let Ok(entry) = std::str::from_utf8(entry) else {
            continue;
        };
        let mut parts = entry.splitn(2, '=');
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        out.insert(key.to_owned(), value.to_owned());
    }
    out
}

fn parse_u64(raw: &HashMap<String, String>, key: &str) -> Option<u64> {
    raw.get(key).and_then(|v| v.parse::<u64>().ok())
}

fn base_discovery(raw: &HashMap<String, String>) -> DiscoveryData {
    let t = match parse_u64(raw, "T") {
        Some(T_RESERVED) | None => 0,
        Some(v) => v,
    };
    DiscoveryData {
        sii: parse_u64(raw, "SII"),
        sai: parse_u64(raw, "SAI"),
        sat: parse_u64(raw, "SAT"),
        t,
        icd: parse_u64(raw, "ICD").unwrap_or(0),
        ph: parse_u64(raw, "PH"),
        vp: raw.get("VP").cloned(),
        dn: raw.get("DN").cloned(),
        ri: raw.get("RI").cloned(),
        pi: raw.get("PI").cloned(),
    }
}

/// Parse an operational device's TXT record. Unlike commissionable records,
/// `D`/`CM` are not required.
pub fn parse_operational_txt(data: &[u8]) -> DiscoveryData {
    base_discovery(&split_entries(data))
}

/// Parse a commissionable device's TXT record. Fails (returns `None`) unless
/// both `D` and `CM` parse successfully (§4.2).
pub fn parse_commissionable_txt(data: &[u8]) -> Option<CommissionableTxt> {
    let raw = split_entries(data);
    let d = parse_u64(&raw, "D")? as u16;
    let cm = parse_u64(&raw, "CM")? as u8;
    let dt = parse_u64(&raw, "DT").map(|v| v as u32);

    let (vendor_id, product_id) = match raw.get("VP") {
        Some(vp) => {
            let mut parts = vp.split('+');
            let v = parts.next().and_then(|s| s.parse::<u16>().ok());
            let p = parts.next().and_then(|s| s.parse::<u16>().ok());
            (v, p)
        }
        None => (None, None),
    };

    Some(CommissionableTxt {
        discovery: base_discovery(&raw),
        d,
        cm,
        dt,
        vendor_id,
        product_id,
    })
}

/// Derive the short discriminator from the long one: `(D >> 8) & 0x0F`.
pub fn short_discriminator(d: u16) -> u8 {
    ((d >> 8) & 0x0F) as u8
}
