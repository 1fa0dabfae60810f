//! Matter DNS-SD name constants and sub-service name builders (§6).

/// Operational service QName.
pub const OPERATIONAL_SERVICE: &str = "_matter._tcp.local";

/// Commissionable service QName.
pub const COMMISSIONABLE_SERVICE: &str = "_matterc._udp.local";

/// Instance sub-service name: `<instanceId>._matterc._udp.local`.
pub fn instance(instance_id: &str) -> String {
    format!("{instance_id}.{COMMISSIONABLE_SERVICE}")
}

/// Long discriminator sub-service name: `_L<D>._sub._matterc._udp.local`.
pub fn long_discriminator(d: u16) -> String {
    format!("_L{d}._sub.{COMMISSIONABLE_SERVICE}")
}

/// Short discriminator sub-service name: `_S<SD>._sub._matterc._udp.local`.
pub fn short_discriminator(sd: u8) -> String {
    format!("_S{sd}._sub.{COMMISSIONABLE_SERVICE}")
}

/// Vendor sub-service name: `_V<vendor>._sub._matterc._udp.local`.
pub fn vendor(vendor_id: u16) -> String {
    format!("_V{vendor_id}._sub.{COMMISSIONABLE_SERVICE}")
}

/// Device type sub-service name: `_T<dt>._sub._matterc._udp.local`.
pub fn device_type(dt: u32) -> String {
    format!("_T{dt}._sub.{COMMISSIONABLE_SERVICE}")
}

/// Commissioning-mode sub-service name: `_CM._sub._matterc._udp.local`.
pub fn commissioning_mode() -> String {
    format!("_CM._sub.{COMMISSIONABLE_SERVICE}")
}

/// Internal (not sent on the wire) vendor+product key.
pub fn vendor_product_key(vendor_id: u16, product_id: u16) -> String {
    format!("_VP{vendor_id}+{product_id}")
}

/// Internal (not sent on the wire) product-only key.
pub fn product_key(product_id: u16) -> String {
    format!("_P{product_id}")
}

/// Internal "any commissioning device" sentinel key.
pub const ANY_COMMISSIONING_DEVICE: &str = "_CM";

/// Fully-qualified operational instance name: `<opid-hex>-<nodeid-hex>._matter._tcp.local`.
pub fn operational_instance(operational_id: u64, node_id: u64) -> String {
    format!("{operational_id:016X}-{node_id:016X}.{OPERATIONAL_SERVICE}")
}
