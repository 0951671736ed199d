use super::*;

#[test]
fn ladder_doubles_from_one_second_and_stops_after_five() {
    let mut policy = ReconnectPolicy::new();
    let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
        .map(|d| u64::try_from(d.as_millis()).expect("fits"))
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    assert!(policy.next_delay().is_none(), "sixth attempt must not happen");
}

#[test]
fn delay_caps_at_thirty_seconds() {
    let mut policy = ReconnectPolicy::with_max_attempts(8);
    let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
        .map(|d| u64::try_from(d.as_millis()).expect("fits"))
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]);
}

#[test]
fn reset_restarts_the_ladder() {
    let mut policy = ReconnectPolicy::new();
    policy.next_delay();
    policy.next_delay();
    assert_eq!(policy.attempts(), 2);

    policy.reset();
    assert_eq!(policy.attempts(), 0);
    assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
}
