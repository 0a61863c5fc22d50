//! DHCP range overlap checks and update policies

use std::collections::HashSet;
use std::net::IpAddr;

use pve_shared_types::{DhcpRange, DhcpRangeUpdateMode};

use crate::error::ReconcileError;

/// Map an address into one ordered space; IPv4 uses its IPv6-mapped form.
pub fn address_to_int(address: IpAddr) -> u128 {
    match address {
        IpAddr::V4(v4) => u128::from(v4.to_ipv6_mapped()),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn bounds(range: &DhcpRange) -> (u128, u128) {
    (address_to_int(range.start), address_to_int(range.end))
}

/// Outcome of comparing requested ranges with configured ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeComparison {
    /// Requested ranges not configured yet, in request order.
    pub new_ranges: Vec<DhcpRange>,
    /// A requested range intersects a configured one without being equal.
    pub partial_overlap: bool,
}

pub fn compare_ranges(existing: &[DhcpRange], desired: &[DhcpRange]) -> RangeComparison {
    let existing: Vec<(u128, u128)> = existing.iter().map(bounds).collect();
    let mut result = RangeComparison::default();

    for range in desired {
        let (start, end) = bounds(range);

        let repeated = result.new_ranges.iter().any(|seen| bounds(seen) == (start, end));
        if !existing.contains(&(start, end)) && !repeated {
            result.new_ranges.push(*range);
        }

        let overlaps = existing.iter().any(|&(existing_start, existing_end)| {
            start <= existing_end && end >= existing_start && (start, end) != (existing_start, existing_end)
        });
        if overlaps {
            result.partial_overlap = true;
        }
    }

    result
}

/// What to do with the `dhcp-range` field of a subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangePlan {
    /// Leave the field alone.
    Unchanged,
    /// Send this full list; the API replaces the configured list.
    Replace(Vec<DhcpRange>),
    /// Add `dhcp-range` to the `delete` list.
    DeleteAll,
}

/// A plan plus an optional warning for the module result.
pub type PlannedRanges = (RangePlan, Option<String>);

/// Apply the append or overwrite policy.
///
/// `desired` is `None` when the caller did not mention ranges at all, and
/// an empty slice when it asked for no ranges.
pub fn plan_ranges(
    existing: &[DhcpRange],
    desired: Option<&[DhcpRange]>,
    mode: DhcpRangeUpdateMode,
) -> Result<PlannedRanges, ReconcileError> {
    let desired = match desired {
        Some(desired) if !desired.is_empty() => desired,
        _ => {
            if existing.is_empty() {
                return Ok((RangePlan::Unchanged, None));
            }
            return Ok(match mode {
                DhcpRangeUpdateMode::Append => (
                    RangePlan::Unchanged,
                    Some("No dhcp_range given in append mode, existing ranges are kept".to_string()),
                ),
                DhcpRangeUpdateMode::Overwrite => (
                    RangePlan::DeleteAll,
                    Some("No dhcp_range given in overwrite mode, all existing ranges are removed".to_string()),
                ),
            });
        }
    };

    let comparison = compare_ranges(existing, desired);

    match mode {
        DhcpRangeUpdateMode::Append => {
            if comparison.partial_overlap {
                return Err(ReconcileError::PartialOverlap {
                    ranges: desired.iter().map(ToString::to_string).collect(),
                });
            }
            if comparison.new_ranges.is_empty() {
                return Ok((RangePlan::Unchanged, None));
            }
            let mut ranges = comparison.new_ranges;
            ranges.extend_from_slice(existing);
            Ok((RangePlan::Replace(ranges), None))
        }
        DhcpRangeUpdateMode::Overwrite => {
            let mut seen = HashSet::new();
            let unique: Vec<DhcpRange> = desired
                .iter()
                .filter(|range| seen.insert(bounds(range)))
                .copied()
                .collect();

            let configured: HashSet<(u128, u128)> = existing.iter().map(bounds).collect();
            if comparison.new_ranges.is_empty() && seen == configured {
                Ok((RangePlan::Unchanged, None))
            } else {
                Ok((RangePlan::Replace(unique), None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> DhcpRange {
        DhcpRange::new(start.parse().unwrap(), end.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_exact_duplicate_is_skipped() {
        let existing = [range("10.0.0.5", "10.0.0.10")];
        let result = compare_ranges(&existing, &existing);

        assert!(result.new_ranges.is_empty());
        assert!(!result.partial_overlap);
    }

    #[test]
    fn test_contained_range_overlaps() {
        let existing = [range("10.0.0.5", "10.0.0.20")];
        let desired = [range("10.0.0.10", "10.0.0.15")];

        assert!(compare_ranges(&existing, &desired).partial_overlap);
    }

    #[test]
    fn test_touching_endpoint_overlaps() {
        let existing = [range("10.0.0.5", "10.0.0.20")];
        let desired = [range("10.0.0.20", "10.0.0.30")];

        assert!(compare_ranges(&existing, &desired).partial_overlap);
    }

    #[test]
    fn test_disjoint_ranges() {
        let existing = [range("10.0.0.5", "10.0.0.10")];
        let desired = [range("10.0.0.11", "10.0.0.20")];

        let result = compare_ranges(&existing, &desired);
        assert!(!result.partial_overlap);
        assert_eq!(result.new_ranges, desired.to_vec());
    }

    #[test]
    fn test_numeric_not_lexical_order() {
        // "10.0.0.9" sorts after "10.0.0.10" as text
        let existing = [range("10.0.0.10", "10.0.0.20")];
        let desired = [range("10.0.0.2", "10.0.0.9")];

        assert!(!compare_ranges(&existing, &desired).partial_overlap);
    }

    #[test]
    fn test_families_do_not_collide() {
        let existing = [range("10.0.0.1", "10.0.0.200")];
        let desired = [range("fd00::1", "fd00::ff")];

        assert!(!compare_ranges(&existing, &desired).partial_overlap);
    }

    #[test]
    fn test_append_keeps_existing() {
        let existing = [range("10.0.0.5", "10.0.0.10")];
        let desired = [range("10.0.0.50", "10.0.0.60"), range("10.0.0.5", "10.0.0.10")];

        let (plan, warning) =
            plan_ranges(&existing, Some(&desired), DhcpRangeUpdateMode::Append).unwrap();
        assert_eq!(
            plan,
            RangePlan::Replace(vec![range("10.0.0.50", "10.0.0.60"), range("10.0.0.5", "10.0.0.10")])
        );
        assert!(warning.is_none());
    }

    #[test]
    fn test_append_sends_repeated_range_once() {
        let existing = [range("10.0.0.5", "10.0.0.10")];
        let desired = [range("10.0.0.50", "10.0.0.60"), range("10.0.0.50", "10.0.0.60")];

        let (plan, _) =
            plan_ranges(&existing, Some(&desired), DhcpRangeUpdateMode::Append).unwrap();
        assert_eq!(
            plan,
            RangePlan::Replace(vec![range("10.0.0.50", "10.0.0.60"), range("10.0.0.5", "10.0.0.10")])
        );
    }

    #[test]
    fn test_append_rejects_overlap() {
        let existing = [range("10.0.0.5", "10.0.0.20")];
        let desired = [range("10.0.0.10", "10.0.0.30")];

        let result = plan_ranges(&existing, Some(&desired), DhcpRangeUpdateMode::Append);
        assert!(matches!(result, Err(ReconcileError::PartialOverlap { .. })));
    }

    #[test]
    fn test_append_without_ranges_warns() {
        let existing = [range("10.0.0.5", "10.0.0.20")];

        let (plan, warning) = plan_ranges(&existing, None, DhcpRangeUpdateMode::Append).unwrap();
        assert_eq!(plan, RangePlan::Unchanged);
        assert!(warning.is_some());
    }

    #[test]
    fn test_overwrite_replaces() {
        let existing = [range("10.0.0.5", "10.0.0.20")];
        let desired = [range("10.0.0.10", "10.0.0.30")];

        let (plan, _) =
            plan_ranges(&existing, Some(&desired), DhcpRangeUpdateMode::Overwrite).unwrap();
        assert_eq!(plan, RangePlan::Replace(desired.to_vec()));

        let (plan, _) =
            plan_ranges(&existing, Some(&existing), DhcpRangeUpdateMode::Overwrite).unwrap();
        assert_eq!(plan, RangePlan::Unchanged);
    }

    #[test]
    fn test_overwrite_with_repeated_range_drops_the_rest() {
        let existing = [range("10.0.0.5", "10.0.0.10"), range("10.0.0.50", "10.0.0.60")];
        let desired = [range("10.0.0.5", "10.0.0.10"), range("10.0.0.5", "10.0.0.10")];

        let (plan, _) =
            plan_ranges(&existing, Some(&desired), DhcpRangeUpdateMode::Overwrite).unwrap();
        assert_eq!(plan, RangePlan::Replace(vec![range("10.0.0.5", "10.0.0.10")]));
    }

    #[test]
    fn test_overwrite_same_set_in_other_order() {
        let existing = [range("10.0.0.5", "10.0.0.10"), range("10.0.0.50", "10.0.0.60")];
        let desired = [range("10.0.0.50", "10.0.0.60"), range("10.0.0.5", "10.0.0.10")];

        let (plan, _) =
            plan_ranges(&existing, Some(&desired), DhcpRangeUpdateMode::Overwrite).unwrap();
        assert_eq!(plan, RangePlan::Unchanged);
    }

    #[test]
    fn test_overwrite_without_ranges_deletes() {
        let existing = [range("10.0.0.5", "10.0.0.20")];

        let (plan, warning) =
            plan_ranges(&existing, Some(&[]), DhcpRangeUpdateMode::Overwrite).unwrap();
        assert_eq!(plan, RangePlan::DeleteAll);
        assert!(warning.is_some());

        let (plan, warning) = plan_ranges(&[], None, DhcpRangeUpdateMode::Overwrite).unwrap();
        assert_eq!(plan, RangePlan::Unchanged);
        assert!(warning.is_none());
    }
}
