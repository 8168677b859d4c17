use super::*;
use yare::parameterized;

fn schedule(mode: BackoffMode) -> BackoffSchedule {
    BackoffSchedule {
        initial: Duration::from_secs(10),
        max: Duration::from_secs(300),
        mode,
        linear_increment: Duration::from_secs(10),
    }
}

#[parameterized(
    first = { 1, 10 },
    second = { 2, 20 },
    third = { 3, 40 },
    clamps_at_max = { 10, 300 },
)]
fn exponential_matches_spec_example(n: u32, expected_s: u64) {
    let sched = schedule(BackoffMode::Exponential);
    assert_eq!(sched.compute_backoff(n), Duration::from_secs(expected_s));
}

#[parameterized(
    first = { 1, 10 },
    second = { 2, 20 },
    third = { 3, 30 },
    clamps_at_max = { 100, 300 },
)]
fn linear_increments_by_fixed_step(n: u32, expected_s: u64) {
    let sched = schedule(BackoffMode::Linear);
    assert_eq!(sched.compute_backoff(n), Duration::from_secs(expected_s));
}

#[test]
fn none_mode_always_returns_initial() {
    let sched = schedule(BackoffMode::None);
    for n in [1, 2, 10, 100] {
        assert_eq!(sched.compute_backoff(n), Duration::from_secs(10));
    }
}

#[test]
fn never_exceeds_max_bound() {
    let sched = schedule(BackoffMode::Exponential);
    for n in 1..40 {
        assert!(sched.compute_backoff(n) <= sched.max);
    }
}

#[test]
fn monotone_until_max_is_reached() {
    let sched = schedule(BackoffMode::Linear);
    let mut prev = sched.compute_backoff(1);
    for n in 2..50 {
        let next = sched.compute_backoff(n);
        assert!(next >= prev);
        prev = next;
    }
}

#[tokio::test(start_paused = true)]
async fn timer_fires_after_delay() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let parent = CancellationToken::new();
    let _timer = BackoffTimer::schedule(Duration::from_secs(5), tx, &parent);

    tokio::time::advance(Duration::from_secs(6)).await;
    let event = rx.recv().await.expect("backoff event expected");
    assert_eq!(event, PrivateEvent::BackoffExpired);
}

#[tokio::test(start_paused = true)]
async fn cancel_suppresses_event() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let parent = CancellationToken::new();
    let timer = BackoffTimer::schedule(Duration::from_secs(5), tx, &parent);
    timer.cancel();

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(rx.try_recv().is_err());
}
