//! Instance identity derived from the host's network configuration.
//!
//! An instance identifier is the delimiter-joined list of addresses through
//! which the host reaches its storage. Backends that grant access per client
//! address receive the parsed list, so a host with several addresses is
//! granted access on all of them in one step.

use std::net::{IpAddr, Ipv4Addr};

use get_if_addrs::get_if_addrs;
use ipnetwork::Ipv4Network;
use tracing::debug;

use super::error::DriverError;
use super::types::Instance;

/// Separator between addresses inside an instance identifier.
pub const INSTANCE_ID_DELIMITER: char = ',';

/// Joins `addresses` into an instance identifier.
#[must_use]
pub fn create_instance_id<S: AsRef<str>>(addresses: &[S]) -> String {
    let mut id = String::new();
    for (index, address) in addresses.iter().enumerate() {
        if index > 0 {
            id.push(INSTANCE_ID_DELIMITER);
        }
        id.push_str(address.as_ref());
    }
    id
}

/// Splits an instance identifier back into its addresses. The empty
/// identifier yields an empty list.
#[must_use]
pub fn parse_instance_id(instance_id: &str) -> Vec<String> {
    if instance_id.is_empty() {
        return Vec::new();
    }
    instance_id
        .split(INSTANCE_ID_DELIMITER)
        .map(str::to_owned)
        .collect()
}

/// Returns `true` when both identifiers name the same set of addresses,
/// regardless of order.
#[must_use]
pub fn same_instance(left: &str, right: &str) -> bool {
    let mut lhs = parse_instance_id(left);
    let mut rhs = parse_instance_id(right);
    lhs.sort_unstable();
    rhs.sort_unstable();
    lhs == rhs
}

/// Builds the instance identity for `provider` from candidate addresses.
///
/// Only non-loopback IPv4 addresses are used; when `subnet` is given they
/// must also fall inside it.
///
/// # Errors
///
/// Returns [`DriverError::InvalidSubnet`] when `subnet` is not a valid IPv4
/// CIDR and [`DriverError::NoLocalAddress`] when nothing qualifies.
pub fn instance_from_addresses(
    provider: &str,
    addresses: &[IpAddr],
    subnet: Option<&str>,
) -> Result<Instance, DriverError> {
    let network = subnet
        .map(str::trim)
        .filter(|cidr| !cidr.is_empty())
        .map(|cidr| {
            cidr.parse::<Ipv4Network>()
                .map_err(|err| DriverError::InvalidSubnet {
                    subnet: cidr.to_owned(),
                    message: err.to_string(),
                })
        })
        .transpose()?;

    let selected: Vec<String> = addresses
        .iter()
        .filter_map(|address| match address {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(*v4),
            _ => None,
        })
        .filter(|v4: &Ipv4Addr| network.is_none_or(|net| net.contains(*v4)))
        .map(|v4| v4.to_string())
        .collect();

    if selected.is_empty() {
        return Err(DriverError::NoLocalAddress {
            subnet: network.map_or_else(|| String::from("none"), |net| net.to_string()),
        });
    }

    let instance_id = create_instance_id(&selected);
    Ok(Instance {
        provider_name: provider.to_owned(),
        instance_id: instance_id.clone(),
        region: String::new(),
        name: instance_id,
    })
}

/// Enumerates the addresses of every local interface.
///
/// # Errors
///
/// Returns [`DriverError::NetworkEnumeration`] when the interface list
/// cannot be read.
pub fn local_addresses() -> Result<Vec<IpAddr>, DriverError> {
    let interfaces =
        get_if_addrs().map_err(|err| DriverError::NetworkEnumeration(err.to_string()))?;
    let addresses: Vec<IpAddr> = interfaces.iter().map(get_if_addrs::Interface::ip).collect();
    debug!(count = addresses.len(), "enumerated local addresses");
    Ok(addresses)
}

/// Derives this host's identity for `provider`.
///
/// # Errors
///
/// Propagates [`local_addresses`] and [`instance_from_addresses`] failures.
pub fn local_instance(provider: &str, subnet: Option<&str>) -> Result<Instance, DriverError> {
    let addresses = local_addresses()?;
    instance_from_addresses(provider, &addresses, subnet)
}
