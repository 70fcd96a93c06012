use super::*;

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Timestamp {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
}

fn watermark(last_to: Timestamp) -> Watermark {
    Watermark {
        endpoint_id: "rtm_lmp".to_string(),
        last_to,
        last_poll_time: last_to,
        last_record_count: 10,
    }
}

#[test]
fn test_first_run_second_granularity() {
    let now = at(2025, 1, 27, 10, 0, 0);
    let window = plan(None, now, Duration::minutes(15), Granularity::Second);

    assert_eq!(window.from, at(2025, 1, 27, 9, 45, 0));
    assert_eq!(window.to, now);
    assert!(!window.is_noop());
    assert_eq!(window.to_string(), "[2025-01-27T09:45:00, 2025-01-27T10:00:00)");
}

#[test]
fn test_subsequent_run_starts_one_unit_after_watermark() {
    let last = watermark(at(2025, 1, 27, 10, 0, 0));
    let window = plan(
        Some(&last),
        at(2025, 1, 27, 10, 15, 0),
        Duration::minutes(15),
        Granularity::Second,
    );

    assert_eq!(window.from, at(2025, 1, 27, 10, 0, 1));
    assert_eq!(window.to, at(2025, 1, 27, 10, 15, 0));
}

#[test]
fn test_same_second_is_noop() {
    let last = watermark(at(2025, 1, 27, 10, 0, 0));
    let window = plan(
        Some(&last),
        at(2025, 1, 27, 10, 0, 0),
        Duration::minutes(15),
        Granularity::Second,
    );

    assert!(window.is_noop());
    assert_eq!(window.duration(), Duration::zero());
}

#[test]
fn test_watermark_ahead_of_clock_is_noop() {
    // Clock stepped backwards: never plan a window that would regress.
    let last = watermark(at(2025, 1, 27, 10, 30, 0));
    let window = plan(
        Some(&last),
        at(2025, 1, 27, 10, 0, 0),
        Duration::minutes(15),
        Granularity::Second,
    );

    assert!(window.is_noop());
}

#[test]
fn test_subsecond_now_is_truncated() {
    let now = at(2025, 1, 27, 10, 0, 0) + Duration::milliseconds(750);
    let window = plan(None, now, Duration::minutes(15), Granularity::Second);

    assert_eq!(window.to, at(2025, 1, 27, 10, 0, 0));
    assert_eq!(window.from, at(2025, 1, 27, 9, 45, 0));
}

#[test]
fn test_first_run_day_granularity() {
    let now = at(2025, 1, 27, 13, 42, 7);
    let window = plan(None, now, Duration::days(1), Granularity::Day);

    assert_eq!(window.from, at(2025, 1, 26, 0, 0, 0));
    assert_eq!(window.to, at(2025, 1, 27, 0, 0, 0));
    assert_eq!(window.from_formatted(), "2025-01-26");
    assert_eq!(window.to_formatted(), "2025-01-27");
}

#[test]
fn test_day_granularity_noop_within_same_day() {
    let last = watermark(at(2025, 1, 27, 0, 0, 0));
    let window = plan(
        Some(&last),
        at(2025, 1, 28, 6, 0, 0),
        Duration::days(1),
        Granularity::Day,
    );
    // from = 01-28, to = 01-28
    assert!(window.is_noop());

    let window = plan(
        Some(&last),
        at(2025, 1, 29, 6, 0, 0),
        Duration::days(1),
        Granularity::Day,
    );
    assert_eq!(window.from_formatted(), "2025-01-28");
    assert_eq!(window.to_formatted(), "2025-01-29");
}

#[test]
fn test_lookback_overflow_is_noop() {
    let now = at(2025, 1, 27, 10, 0, 0);
    let window = plan(None, now, Duration::days(1_000_000_000), Granularity::Second);
    assert!(window.is_noop());
}

#[test]
fn test_to_params() {
    let window = plan(
        None,
        at(2025, 1, 27, 10, 0, 0),
        Duration::minutes(15),
        Granularity::Second,
    );
    let params = window.to_params("SCEDTimestampFrom", "SCEDTimestampTo");

    assert_eq!(params.len(), 2);
    assert_eq!(params["SCEDTimestampFrom"], "2025-01-27T09:45:00");
    assert_eq!(params["SCEDTimestampTo"], "2025-01-27T10:00:00");
}

#[test]
fn test_parse_accepts_both_forms() {
    assert_eq!(
        parse_timestamp("2025-01-27T10:00:00"),
        Some(at(2025, 1, 27, 10, 0, 0))
    );
    assert_eq!(parse_timestamp("2025-01-27"), Some(at(2025, 1, 27, 0, 0, 0)));
    assert_eq!(
        parse_timestamp("2025-01-27T10:00:00.123456"),
        Some(at(2025, 1, 27, 10, 0, 0) + Duration::microseconds(123456))
    );
    assert_eq!(
        parse_timestamp("2025-01-27 10:00:00"),
        Some(at(2025, 1, 27, 10, 0, 0))
    );
    assert_eq!(parse_timestamp("yesterday"), None);
    assert_eq!(parse_timestamp(""), None);
}

#[test]
fn test_repeated_local_hour_plans_noop() {
    // Autumn fallback: the committed 01:59:59 is from the first pass
    // through the hour, the clock now reads 01:10 of the second pass.
    let last = watermark(at(2025, 11, 2, 1, 59, 59));
    let repeated = at(2025, 11, 2, 1, 10, 0);

    let window = plan(Some(&last), repeated, Duration::minutes(15), Granularity::Second);
    assert!(window.is_noop());
    assert_eq!(window.duration(), Duration::zero());

    // Resumes right after the watermark once the clock passes it again
    let window = plan(
        Some(&last),
        at(2025, 11, 2, 2, 5, 0),
        Duration::minutes(15),
        Granularity::Second,
    );
    assert_eq!(window.from, at(2025, 11, 2, 2, 0, 0));
    assert_eq!(window.duration(), Duration::minutes(5));
}

#[test]
fn test_granularity_serde_lowercase() {
    let g: Granularity = serde_json::from_str("\"day\"").unwrap();
    assert_eq!(g, Granularity::Day);
    assert_eq!(serde_json::to_string(&Granularity::Second).unwrap(), "\"second\"");
}
