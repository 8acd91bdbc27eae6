//! RFC 7233 byte-range parsing.
//!
//! Accepts single ranges, multiple ranges, suffix ranges (`-500`) and open
//! ranges (`500-`). Overlapping sets and malformed headers are rejected —
//! the caller answers 416 with `Content-Range: bytes */{len}`.

use crate::errors::QueryError;

const MAX_RANGES: usize = 16;

/// Parse a `Range` header value against a resource of `total` bytes.
/// Returns inclusive `(start, end)` pairs in request order.
pub fn parse_range(header: &str, total: u64) -> Result<Vec<(u64, u64)>, QueryError> {
    let unsatisfiable = || QueryError::RangeNotSatisfiable { total };

    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(unsatisfiable)?;
    if spec.trim().is_empty() {
        return Err(unsatisfiable());
    }

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let (raw_start, raw_end) = part.split_once('-').ok_or_else(unsatisfiable)?;
        let range = match (raw_start.is_empty(), raw_end.is_empty()) {
            // "-N": the final N bytes.
            (true, false) => {
                let suffix: u64 = raw_end.parse().map_err(|_| unsatisfiable())?;
                if suffix == 0 || total == 0 {
                    return Err(unsatisfiable());
                }
                (total.saturating_sub(suffix), total - 1)
            }
            // "S-": from S to the end.
            (false, true) => {
                let start: u64 = raw_start.parse().map_err(|_| unsatisfiable())?;
                if start >= total {
                    return Err(unsatisfiable());
                }
                (start, total - 1)
            }
            // "S-E": explicit window, end clamped to the resource.
            (false, false) => {
                let start: u64 = raw_start.parse().map_err(|_| unsatisfiable())?;
                let end: u64 = raw_end.parse().map_err(|_| unsatisfiable())?;
                if start > end || start >= total {
                    return Err(unsatisfiable());
                }
                (start, end.min(total - 1))
            }
            (true, true) => return Err(unsatisfiable()),
        };
        ranges.push(range);
        if ranges.len() > MAX_RANGES {
            return Err(unsatisfiable());
        }
    }

    // Overlapping sets are rejected outright rather than coalesced.
    let mut sorted = ranges.clone();
    sorted.sort_by_key(|(start, _)| *start);
    for window in sorted.windows(2) {
        if window[1].0 <= window[0].1 {
            return Err(unsatisfiable());
        }
    }

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_explicit_range() {
        assert_eq!(parse_range("bytes=0-499", 1000).unwrap(), vec![(0, 499)]);
    }

    #[test]
    fn open_range_runs_to_end() {
        assert_eq!(parse_range("bytes=500-", 1000).unwrap(), vec![(500, 999)]);
    }

    #[test]
    fn suffix_range_takes_final_bytes() {
        assert_eq!(parse_range("bytes=-100", 1000).unwrap(), vec![(900, 999)]);
        // Suffix longer than the resource covers all of it.
        assert_eq!(parse_range("bytes=-5000", 1000).unwrap(), vec![(0, 999)]);
    }

    #[test]
    fn end_is_clamped_to_resource() {
        assert_eq!(parse_range("bytes=900-5000", 1000).unwrap(), vec![(900, 999)]);
    }

    #[test]
    fn multiple_disjoint_ranges_keep_request_order() {
        assert_eq!(
            parse_range("bytes=500-999, 0-99", 1000).unwrap(),
            vec![(500, 999), (0, 99)]
        );
    }

    #[test]
    fn start_beyond_resource_is_unsatisfiable() {
        assert!(parse_range("bytes=1500-", 1000).is_err());
        assert!(parse_range("bytes=1000-1200", 1000).is_err());
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        assert!(parse_range("bytes=0-499,400-899", 1000).is_err());
        assert!(parse_range("bytes=0-499,499-", 1000).is_err());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for bad in [
            "bites=0-499",
            "bytes=",
            "bytes=-",
            "bytes=a-b",
            "bytes=10",
            "bytes=-0",
            "0-499",
        ] {
            assert!(parse_range(bad, 1000).is_err(), "header {bad:?}");
        }
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(parse_range("bytes=500-100", 1000).is_err());
    }

    #[test]
    fn empty_resource_rejects_suffix() {
        assert!(parse_range("bytes=-100", 0).is_err());
    }
}
