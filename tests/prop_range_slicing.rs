// Property: slicing a stored entry returns exactly the requested bytes with a
// Content-Range that describes them, or a 416 with an empty body when the
// range cannot be satisfied

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use offline_relay::{CacheEntry, RangeSlicer, RangeSpec};
use proptest::prelude::*;

fn entry(body: Vec<u8>) -> CacheEntry {
    CacheEntry::new(
        "GET https://h/track.mp3",
        "https://h/track.mp3",
        200,
        &HeaderMap::new(),
        Bytes::from(body),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// In-bounds ranges produce end - start + 1 bytes taken from the right offset
    #[test]
    fn prop_in_bounds_range_is_exact(
        body in prop::collection::vec(any::<u8>(), 1..4096),
        a in any::<prop::sample::Index>(),
        b in any::<prop::sample::Index>(),
    ) {
        let total = body.len();
        let (start, end) = {
            let (x, y) = (a.index(total), b.index(total));
            (x.min(y), x.max(y))
        };
        let entry = entry(body.clone());

        let response = RangeSlicer::slice(&entry, &RangeSpec::new(start as u64, Some(end as u64)));

        prop_assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        prop_assert_eq!(response.body.len(), end - start + 1);
        prop_assert_eq!(&response.body[..], &body[start..=end]);
        let expected_range = format!("bytes {}-{}/{}", start, end, total);
        prop_assert_eq!(response.header("content-range"), Some(expected_range.as_str()));
        let expected_length = (end - start + 1).to_string();
        prop_assert_eq!(response.header("content-length"), Some(expected_length.as_str()));
    }

    /// Open-ended ranges run to the last byte
    #[test]
    fn prop_open_ended_range_reaches_end(
        body in prop::collection::vec(any::<u8>(), 1..4096),
        a in any::<prop::sample::Index>(),
    ) {
        let total = body.len();
        let start = a.index(total);
        let entry = entry(body.clone());

        let response = RangeSlicer::slice(&entry, &RangeSpec::new(start as u64, None));

        prop_assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        prop_assert_eq!(&response.body[..], &body[start..]);
        let expected_range = format!("bytes {}-{}/{}", start, total - 1, total);
        prop_assert_eq!(response.header("content-range"), Some(expected_range.as_str()));
    }

    /// Ranges past the end are unsatisfiable
    #[test]
    fn prop_out_of_bounds_range_is_416(
        total in 1usize..4096,
        overshoot in 0u64..10_000,
        len in 0u64..10_000,
    ) {
        let entry = entry(vec![7u8; total]);
        let start = total as u64 + overshoot;

        let response = RangeSlicer::slice(&entry, &RangeSpec::new(start, Some(start + len)));

        prop_assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
        prop_assert!(response.body.is_empty());
        let expected_range = format!("bytes */{}", total);
        prop_assert_eq!(response.header("content-range"), Some(expected_range.as_str()));
    }

    /// An end beyond the last byte is unsatisfiable even if the start is valid
    #[test]
    fn prop_end_past_total_is_416(
        total in 1usize..4096,
        extra in 0u64..10_000,
    ) {
        let entry = entry(vec![1u8; total]);

        let response = RangeSlicer::slice(&entry, &RangeSpec::new(0, Some(total as u64 + extra)));

        prop_assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
        prop_assert!(response.body.is_empty());
    }

    /// Inverted ranges are unsatisfiable
    #[test]
    fn prop_inverted_range_is_416(
        total in 2usize..4096,
        a in any::<prop::sample::Index>(),
        gap in 1usize..100,
    ) {
        let entry = entry(vec![3u8; total]);
        let start = a.index(total - 1) + 1;
        let end = start.saturating_sub(gap).min(start - 1);

        let response = RangeSlicer::slice(&entry, &RangeSpec::new(start as u64, Some(end as u64)));

        prop_assert_eq!(response.status, StatusCode::RANGE_NOT_SATISFIABLE);
        prop_assert!(response.body.is_empty());
    }

    /// Without a range the stored body comes back byte for byte
    #[test]
    fn prop_full_response_is_identical(body in prop::collection::vec(any::<u8>(), 0..4096)) {
        let entry = entry(body.clone());

        let response = RangeSlicer::full(&entry);

        prop_assert_eq!(response.status, StatusCode::OK);
        prop_assert_eq!(&response.body[..], &body[..]);
        prop_assert_eq!(response.header("accept-ranges"), Some("bytes"));
    }

    /// Header parsing agrees with the slicer for well-formed ranges
    #[test]
    fn prop_header_round_trip(
        start in 0u64..1_000_000,
        len in proptest::option::of(0u64..1_000_000),
    ) {
        let spec = RangeSpec::new(start, len.map(|l| start + l));
        let parsed = RangeSpec::from_header(&spec.to_header()).unwrap();
        prop_assert_eq!(parsed, spec);
    }
}
