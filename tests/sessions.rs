use std::time::{Duration, Instant};

use serde_json::json;
use skv::{named_token, random_token, ExpirySpec, SessionRegistry};

fn expiry(secs: u64, delete_on_expire: bool) -> Option<ExpirySpec> {
    Some(ExpirySpec {
        duration: Duration::from_secs(secs),
        delete_on_expire,
    })
}

#[test]
fn duplicate_start_is_refused() {
    let mut registry = SessionRegistry::new();

    let store = registry.start(7, false, None).unwrap();
    store.set("k".to_string(), json!(1));

    // the second start must not disturb the first session's store
    assert!(registry.start(7, true, expiry(10, true)).is_none());
    assert_eq!(
        registry.session(7).unwrap().store().get("k"),
        Some(&json!(1))
    );
    assert!(!registry.session(7).unwrap().shared());
    assert_eq!(registry.count_sessions(), 1);
}

#[test]
fn named_tokens_are_deterministic() {
    assert_eq!(named_token("conference-room"), named_token("conference-room"));
    assert_ne!(named_token("conference-room"), named_token("lobby"));
}

#[test]
fn random_tokens_differ() {
    assert_ne!(random_token(), random_token());
}

#[test]
fn sweep_deletes_an_expired_session() {
    let mut registry = SessionRegistry::new();
    let now = Instant::now();
    registry.start_at(1, false, expiry(10, true), now);

    // one tick before the deadline, nothing expires
    let swept = registry.sweep_at(now + Duration::from_secs(10) - Duration::from_millis(1));
    assert_eq!(swept, 0);
    assert!(registry.contains(1));

    let swept = registry.sweep_at(now + Duration::from_secs(10));
    assert_eq!(swept, 1);
    assert!(!registry.contains(1));
    assert_eq!(registry.count_expiring(), 0);
}

#[test]
fn sweep_clears_and_renews_a_keep_session() {
    let mut registry = SessionRegistry::new();
    let now = Instant::now();
    let store = registry.start_at(2, false, expiry(10, false), now).unwrap();
    store.set("k".to_string(), json!("v"));

    let sweep_time = now + Duration::from_secs(10);
    assert_eq!(registry.sweep_at(sweep_time), 1);

    // the session survives with an empty store and a fresh deadline
    assert!(registry.contains(2));
    let session = registry.session(2).unwrap();
    assert_eq!(session.store().count(), 0);
    assert_eq!(
        session.remaining(sweep_time),
        Some(Duration::from_secs(10))
    );
    assert_eq!(registry.count_expiring(), 1);
}

#[test]
fn sweep_processes_the_whole_expired_prefix() {
    let mut registry = SessionRegistry::new();
    let now = Instant::now();
    registry.start_at(1, false, expiry(5, true), now);
    registry.start_at(2, false, expiry(10, true), now);
    registry.start_at(3, false, expiry(15, true), now);

    assert_eq!(registry.sweep_at(now + Duration::from_secs(12)), 2);
    assert!(!registry.contains(1));
    assert!(!registry.contains(2));
    assert!(registry.contains(3));
}

#[test]
fn sweep_tolerates_an_empty_index() {
    let mut registry = SessionRegistry::new();
    registry.start(1, false, None);
    assert_eq!(registry.sweep(), 0);
    assert!(registry.contains(1));
}

#[test]
fn renew_relocates_and_never_duplicates() {
    let mut registry = SessionRegistry::new();
    let now = Instant::now();
    registry.start_at(4, false, expiry(10, true), now);

    for i in 1..=5 {
        assert!(registry.renew_at(4, now + Duration::from_secs(i)));
        assert_eq!(registry.count_expiring(), 1);
    }

    // the original deadline no longer exists in the index
    assert_eq!(registry.sweep_at(now + Duration::from_secs(10)), 0);
    assert!(registry.contains(4));
    assert_eq!(registry.sweep_at(now + Duration::from_secs(15)), 1);
    assert!(!registry.contains(4));
}

#[test]
fn renew_requires_a_live_expiring_session() {
    let mut registry = SessionRegistry::new();
    registry.start(5, false, None);

    assert!(!registry.renew(5));
    assert!(!registry.renew(99));
}

#[test]
fn end_removes_the_session_and_its_index_entry() {
    let mut registry = SessionRegistry::new();
    registry.start(6, false, expiry(10, true));

    assert!(registry.end(6));
    assert!(!registry.contains(6));
    assert_eq!(registry.count_expiring(), 0);

    assert!(!registry.end(6));
}

#[test]
fn end_disambiguates_same_instant_entries() {
    let mut registry = SessionRegistry::new();
    let now = Instant::now();
    registry.start_at(1, false, expiry(10, true), now);
    registry.start_at(2, false, expiry(10, true), now);

    assert!(registry.end(1));
    assert_eq!(registry.count_expiring(), 1);
    assert!(registry.contains(2));

    // the surviving entry still expires on schedule
    assert_eq!(registry.sweep_at(now + Duration::from_secs(10)), 1);
    assert!(!registry.contains(2));
}

#[test]
fn open_shared_checks_the_shared_flag() {
    let mut registry = SessionRegistry::new();
    let shared = named_token("open-house");
    let private = named_token("diary");
    registry.start(shared, true, None);
    registry.start(private, false, None);

    assert_eq!(registry.open_shared(shared), (true, true));
    assert_eq!(registry.open_shared(private), (true, false));
    assert_eq!(registry.open_shared(named_token("nobody-home")), (false, false));
}

#[test]
fn zero_duration_never_expires() {
    let mut registry = SessionRegistry::new();
    let now = Instant::now();
    registry.start_at(8, false, expiry(0, true), now);

    assert_eq!(registry.count_expiring(), 0);
    assert_eq!(registry.sweep_at(now + Duration::from_secs(3600)), 0);
    assert!(registry.contains(8));
    assert!(!registry.session(8).unwrap().expires());
}

#[test]
fn count_keys_sums_every_store() {
    let mut registry = SessionRegistry::new();
    let store = registry.start(1, false, None).unwrap();
    store.set("a".to_string(), json!(1));
    store.set("b".to_string(), json!(2));
    let store = registry.start(2, false, None).unwrap();
    store.set("c".to_string(), json!(3));

    assert_eq!(registry.count_sessions(), 2);
    assert_eq!(registry.count_keys(), 3);
}

#[test]
fn end_all_empties_the_registry() {
    let mut registry = SessionRegistry::new();
    registry.start(1, false, None);
    registry.start(2, false, expiry(10, true));
    registry.start(3, true, expiry(20, false));

    assert_eq!(registry.end_all(), 3);
    assert_eq!(registry.count_sessions(), 0);
    assert_eq!(registry.count_keys(), 0);
    assert_eq!(registry.count_expiring(), 0);
}
