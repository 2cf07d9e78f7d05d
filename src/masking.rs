//! Client address masking.
//!
//! Addresses are anonymised by keeping only their network prefix: the
//! leading 8 bits of an IPv4 address and the leading 32 bits of an IPv6
//! address. Host bits are zeroed regardless of their value.

use crate::constants::{ABSENT_VALUE, DEFAULT_MASKED_FIELDS, IPV4_PREFIX_LEN, IPV6_PREFIX_LEN};
use crate::error::{MaskerError, Result};
use crate::models::Row;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Network address of the IPv4 `/8` containing `addr`
pub fn mask_ipv4(addr: Ipv4Addr) -> Ipv4Addr {
    let mask = u32::MAX << (u32::BITS - IPV4_PREFIX_LEN);
    Ipv4Addr::from(u32::from(addr) & mask)
}

/// Network address of the IPv6 `/32` containing `addr`
pub fn mask_ipv6(addr: Ipv6Addr) -> Ipv6Addr {
    let mask = u128::MAX << (u128::BITS - IPV6_PREFIX_LEN);
    Ipv6Addr::from(u128::from(addr) & mask)
}

pub fn mask_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => IpAddr::V4(mask_ipv4(v4)),
        IpAddr::V6(v6) => IpAddr::V6(mask_ipv6(v6)),
    }
}

/// Mask the textual address `value` read from `field`.
///
/// IPv6 results use the compressed RFC 5952 form, e.g. `2001:db8::`.
pub fn mask_ip_address(field: &str, value: &str) -> Result<String> {
    value
        .parse::<IpAddr>()
        .map(|addr| mask_ip(addr).to_string())
        .map_err(|_| MaskerError::invalid_address(field, value))
}

/// Masks the address-bearing fields of rows
#[derive(Debug, Clone)]
pub struct FieldMasker {
    fields: Vec<String>,
}

impl Default for FieldMasker {
    fn default() -> Self {
        Self::new(DEFAULT_MASKED_FIELDS.iter().map(|field| field.to_string()))
    }
}

impl FieldMasker {
    pub fn new(fields: impl IntoIterator<Item = String>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Mask every configured field present in `row`.
    ///
    /// Empty values and the `-` placeholder are left alone; fields missing
    /// from the row's schema are skipped.
    pub fn mask(&self, mut row: Row) -> Result<Row> {
        for field in &self.fields {
            let masked = match row.get(field) {
                Some(value) if !value.is_empty() && value != ABSENT_VALUE => {
                    mask_ip_address(field, value)?
                }
                _ => continue,
            };
            row.set(field, masked);
        }
        Ok(row)
    }
}
