//! Static-pool IP selection.
//!
//! An address counts as allocated if the cloud reports it, if it is the
//! gateway, if any NIC in the datacenter carries it, or if the caller
//! excluded it (after a power-on conflict). Selection walks each range in
//! order and yields the first free address.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::driver::types::NetworkScope;
use crate::errors::{ForgeError, ForgeResult};

/// Gateway, netmask, and DNS of the scope together with the selected address.
#[derive(Debug, Clone)]
pub struct NetworkLease {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns1: Option<Ipv4Addr>,
    pub dns2: Option<Ipv4Addr>,
}

/// Pick the first free address in `scope`, treating `used` (NIC-observed)
/// and `exclude` (conflict history) as allocated.
pub fn allocate(
    scope: &NetworkScope,
    used: &[Ipv4Addr],
    exclude: &[Ipv4Addr],
) -> ForgeResult<NetworkLease> {
    let mut taken: HashSet<Ipv4Addr> = scope.allocated.iter().copied().collect();
    taken.insert(scope.gateway);
    taken.extend(used.iter().copied());
    taken.extend(exclude.iter().copied());

    for range in &scope.ranges {
        if let Some(ip) = first_free(range.start, range.end, &taken) {
            return Ok(NetworkLease {
                ip,
                gateway: scope.gateway,
                netmask: scope.netmask,
                dns1: scope.dns1,
                dns2: scope.dns2,
            });
        }
    }

    Err(ForgeError::Conflict(
        "no available IPs in the network's static pool".into(),
    ))
}

fn first_free(start: Ipv4Addr, end: Ipv4Addr, taken: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    let start = u32::from(start);
    let end = u32::from(end);
    if end < start {
        return None;
    }
    (start..=end)
        .map(Ipv4Addr::from)
        .find(|ip| !taken.contains(ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::IpRange;

    fn scope(allocated: &[[u8; 4]]) -> NetworkScope {
        NetworkScope {
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            dns1: Some(Ipv4Addr::new(10, 0, 0, 2)),
            dns2: None,
            ranges: vec![IpRange {
                start: Ipv4Addr::new(10, 0, 0, 10),
                end: Ipv4Addr::new(10, 0, 0, 20),
            }],
            allocated: allocated.iter().map(|a| Ipv4Addr::from(*a)).collect(),
        }
    }

    #[test]
    fn picks_range_start_when_pool_is_empty() {
        let lease = allocate(&scope(&[]), &[], &[]).unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(lease.gateway, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(lease.netmask, Ipv4Addr::new(255, 255, 255, 0));
    }

    #[test]
    fn skips_allocated_and_excluded_addresses() {
        let lease = allocate(
            &scope(&[[10, 0, 0, 10]]),
            &[],
            &[Ipv4Addr::new(10, 0, 0, 11)],
        )
        .unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 12));
    }

    #[test]
    fn skips_addresses_seen_on_existing_nics() {
        let lease = allocate(&scope(&[]), &[Ipv4Addr::new(10, 0, 0, 10)], &[]).unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 11));
    }

    #[test]
    fn gateway_is_never_selected() {
        let mut s = scope(&[]);
        s.ranges = vec![IpRange {
            start: Ipv4Addr::new(10, 0, 0, 1),
            end: Ipv4Addr::new(10, 0, 0, 2),
        }];
        let lease = allocate(&s, &[], &[]).unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn empty_scope_is_a_deterministic_failure() {
        let mut s = scope(&[]);
        s.ranges.clear();
        let err = allocate(&s, &[], &[]).unwrap_err();
        assert!(matches!(err, ForgeError::Conflict(_)));
    }

    #[test]
    fn exhausted_range_moves_to_the_next() {
        let mut s = scope(&[]);
        s.ranges = vec![
            IpRange {
                start: Ipv4Addr::new(10, 0, 0, 10),
                end: Ipv4Addr::new(10, 0, 0, 10),
            },
            IpRange {
                start: Ipv4Addr::new(10, 0, 0, 30),
                end: Ipv4Addr::new(10, 0, 0, 40),
            },
        ];
        let lease = allocate(&s, &[Ipv4Addr::new(10, 0, 0, 10)], &[]).unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(10, 0, 0, 30));
    }
}
