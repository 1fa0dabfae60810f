//! Polymorphic predicate for commissionable search (§9 design note).

use crate::names;

/// How a caller wants to filter commissionable devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommissionablePredicate {
    Instance(String),
    LongDiscriminator(u16),
    ShortDiscriminator(u8),
    VendorProduct(u16, u16),
    Vendor(u16),
    DeviceType(u32),
    Product(u16),
    Any,
}

impl CommissionablePredicate {
    /// The canonical query/cache key used as an `ActiveQuery`/Waiter id
    /// (§4.5.5 lookup order relies on these being stable strings).
    pub fn query_id(&self) -> String {
        match self {
            CommissionablePredicate::Instance(id) => id.clone(),
            CommissionablePredicate::LongDiscriminator(d) => format!("_L{d}"),
            CommissionablePredicate::ShortDiscriminator(sd) => format!("_S{sd}"),
            CommissionablePredicate::VendorProduct(v, p) => names::vendor_product_key(*v, *p),
            CommissionablePredicate::Vendor(v) => format!("_V{v}"),
            CommissionablePredicate::DeviceType(dt) => format!("_T{dt}"),
            CommissionablePredicate::Product(p) => names::product_key(*p),
            CommissionablePredicate::Any => names::ANY_COMMISSIONING_DEVICE.to_owned(),
        }
    }

    /// The predicate-specific PTR sub-service name to query, when the
    /// predicate has an on-the-wire sub-service representation (§4.7,
    /// §6 "Combined vendor+product and product-only identifiers are
    /// internal keys not emitted on the wire").
    pub fn wire_sub_service(&self) -> Option<String> {
        match self {
            CommissionablePredicate::Instance(id) => Some(names::instance(id)),
            CommissionablePredicate::LongDiscriminator(d) => Some(names::long_discriminator(*d)),
            CommissionablePredicate::ShortDiscriminator(sd) => {
                Some(names::short_discriminator(*sd))
            }
            CommissionablePredicate::Vendor(v) => Some(names::vendor(*v)),
            CommissionablePredicate::DeviceType(dt) => Some(names::device_type(*dt)),
            CommissionablePredicate::Any => Some(names::commissioning_mode()),
            // VendorProduct/Product fall back to the enclosing sub-service
            // (vendor, or "any") since they have no wire representation.
            CommissionablePredicate::VendorProduct(v, _) => Some(names::vendor(*v)),
            CommissionablePredicate::Product(_) => None,
        }
    }

    /// Whether a cached device satisfies this predicate.
    pub fn matches(&self, device: &crate::cache::CommissionableDevice) -> bool {
        match self {
            CommissionablePredicate::Instance(id) => &device.device_identifier == id,
            CommissionablePredicate::LongDiscriminator(d) => device.d == Some(*d),
            CommissionablePredicate::ShortDiscriminator(sd) => device.sd == Some(*sd),
            CommissionablePredicate::VendorProduct(v, p) => {
                device.vendor_id == Some(*v) && device.product_id == Some(*p)
            }
            CommissionablePredicate::Vendor(v) => device.vendor_id == Some(*v),
            CommissionablePredicate::DeviceType(dt) => device.device_type == Some(*dt),
            CommissionablePredicate::Product(p) => device.product_id == Some(*p),
            CommissionablePredicate::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_ids_are_stable_strings() {
        assert_eq!(
            CommissionablePredicate::LongDiscriminator(3840).query_id(),
            "_L3840"
        );
        assert_eq!(
            CommissionablePredicate::VendorProduct(1, 2).query_id(),
            "_VP1+2"
        );
        assert_eq!(CommissionablePredicate::Any.query_id(), "_CM");
    }

    #[test]
    fn product_only_predicate_has_no_wire_sub_service() {
        assert_eq!(CommissionablePredicate::Product(5).wire_sub_service(), None);
    }
}
