//! Property-based tests for the reconnect schedule and wire helpers.

use hydra_realtime::backoff::{BackoffConfig, ReconnectBackoff};
use hydra_realtime::message::format_duration;
use hydra_realtime::protocol::{decode_inbound, encode_request, validate_payload, Inbound};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

fn expected_default_ms(attempt: u32) -> u64 {
    match attempt {
        0 | 1 => 0,
        2..=5 => 1_000,
        6..=15 => 5_000,
        _ => 10_000,
    }
}

proptest! {
    #[test]
    fn prop_default_schedule_matches_tiers(attempt in 0u32..10_000) {
        let backoff = ReconnectBackoff::default();
        prop_assert_eq!(
            backoff.delay_for(attempt),
            Duration::from_millis(expected_default_ms(attempt))
        );
    }

    #[test]
    fn prop_schedule_never_decreases(attempt in 1u32..1_000) {
        let backoff = ReconnectBackoff::default();
        prop_assert!(backoff.base_delay(attempt) <= backoff.base_delay(attempt + 1));
    }

    #[test]
    fn prop_jitter_stays_in_band(attempt in 1u32..100, ratio in 0.0f64..=1.0) {
        let backoff = ReconnectBackoff::new(BackoffConfig {
            jitter_ratio: ratio,
            ..Default::default()
        });
        let base = backoff.base_delay(attempt);
        let delay = backoff.delay_for(attempt);
        prop_assert!(delay >= base);
        let max = base.as_millis() as f64 * (1.0 + ratio);
        prop_assert!(delay.as_millis() as f64 <= max + 1.0);
        if base.is_zero() {
            prop_assert!(delay.is_zero());
        }
    }

    #[test]
    fn prop_request_id_is_injected_and_routed(
        request_id in 1u64..u64::from(u32::MAX),
        op in "[a-z]{1,12}",
    ) {
        let payload = validate_payload(json!({ "op": op.clone() })).unwrap();
        let text = encode_request(&payload, request_id).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(&value["op"], &json!(op));

        // An ack shaped like the request routes back by id.
        match decode_inbound(&text).unwrap() {
            Inbound::Response { request_id: got, .. } => prop_assert_eq!(got, Some(request_id)),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn prop_duration_has_clock_shape(seconds in 0.0f64..86_399.0) {
        let text = format_duration(seconds, false);
        let parts: Vec<&str> = text.split(':').collect();
        prop_assert_eq!(parts.len(), 3);
        prop_assert!(parts.iter().all(|p| p.len() == 2));
        prop_assert_eq!(format_duration(-seconds - 1.0, false).chars().next(), Some('-'));
    }
}
