// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read/query conditions: incremental trigger maintenance, attach-time
//! rescans, slot exhaustion and waitset wake-up.

mod common;

use common::{writer, KeyedValue, TestSample};
use rhc::qos::{History, ReaderQos};
use rhc::{Condition, Error, KeyMap, ReadCondition, ReaderHistoryCache, StateMask, WaitSet};
use std::sync::Arc;
use std::time::Duration;

fn keep_all() -> ReaderQos {
    ReaderQos {
        history: History::KeepAll,
        ..Default::default()
    }
}

fn not_read_mask() -> StateMask {
    StateMask::NOT_READ | StateMask::ANY_VIEW | StateMask::ANY_INSTANCE
}

#[test]
fn query_condition_trigger_follows_store_read_take() {
    let cache = ReaderHistoryCache::new(keep_all()).unwrap();
    let keymap = KeyMap::new();
    let w1 = writer(1);

    let cond = ReadCondition::<TestSample>::with_query(
        not_read_mask(),
        Arc::new(|v: &KeyedValue| v.value > 100),
    );
    cache.add_condition(&cond).unwrap();
    assert_eq!(cond.trigger_count(), 0);

    // Non-matching content: no trigger.
    let s = TestSample::data(1, 50, 1);
    let k = keymap.instance(&s);
    cache.store(&w1, s, &k);
    assert_eq!(cond.trigger_count(), 0);

    // Matching content: one matching unread sample.
    cache.store(&w1, TestSample::data(1, 150, 2), &k);
    assert_eq!(cond.trigger_count(), 1);

    // Reading the matching sample makes it READ: no longer matches.
    let batch = cache.read(1, StateMask::from_bits(0), None, Some(&cond)).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].1.value, 150);
    assert_eq!(cond.trigger_count(), 0);

    // Taking the read sample leaves the trigger at zero.
    let taken = cache.take(10, StateMask::ANY, None, None).unwrap();
    assert_eq!(taken.len(), 2);
    assert_eq!(cond.trigger_count(), 0);
}

#[test]
fn plain_read_condition_counts_matching_instances() {
    let cache = ReaderHistoryCache::new(keep_all()).unwrap();
    let keymap = KeyMap::new();
    let w1 = writer(1);

    let cond = ReadCondition::<TestSample>::new(not_read_mask());
    cache.add_condition(&cond).unwrap();

    let a = TestSample::data(1, 1, 1);
    let k1 = keymap.instance(&a);
    cache.store(&w1, a, &k1);
    assert_eq!(cond.trigger_count(), 1);

    // A second unread sample on the same instance: still one instance.
    cache.store(&w1, TestSample::data(1, 2, 2), &k1);
    assert_eq!(cond.trigger_count(), 1);

    let b = TestSample::data(2, 3, 3);
    let k2 = keymap.instance(&b);
    cache.store(&w1, b, &k2);
    assert_eq!(cond.trigger_count(), 2);

    // Reading everything clears the unread predicate per instance.
    cache.read(10, StateMask::ANY, None, None).unwrap();
    assert_eq!(cond.trigger_count(), 0);
}

#[test]
fn attach_rescan_initializes_trigger_from_existing_samples() {
    let cache = ReaderHistoryCache::new(keep_all()).unwrap();
    let keymap = KeyMap::new();
    let w1 = writer(1);

    let s = TestSample::data(1, 150, 1);
    let k = keymap.instance(&s);
    cache.store(&w1, s, &k);
    cache.store(&w1, TestSample::data(1, 50, 2), &k);
    cache.store(&w1, TestSample::data(1, 200, 3), &k);

    // One of the matching samples is already read.
    let read = cache.read(1, StateMask::ANY, None, None).unwrap();
    assert_eq!(read[0].1.value, 150);

    let cond = ReadCondition::<TestSample>::with_query(
        not_read_mask(),
        Arc::new(|v: &KeyedValue| v.value > 100),
    );
    cache.add_condition(&cond).unwrap();
    // 200 is unread and matches; 150 matches but is read; 50 doesn't match.
    assert_eq!(cond.trigger_count(), 1);

    // Conditions with ANY sample state see both matching samples.
    let any_cond = ReadCondition::<TestSample>::with_query(
        StateMask::ANY,
        Arc::new(|v: &KeyedValue| v.value > 100),
    );
    cache.add_condition(&any_cond).unwrap();
    assert_eq!(any_cond.trigger_count(), 2);
}

#[test]
fn condition_filters_read_and_take() {
    let cache = ReaderHistoryCache::new(keep_all()).unwrap();
    let keymap = KeyMap::new();
    let w1 = writer(1);

    let cond = ReadCondition::<TestSample>::with_query(
        StateMask::ANY,
        Arc::new(|v: &KeyedValue| v.value % 2 == 0),
    );
    cache.add_condition(&cond).unwrap();

    let first = TestSample::data(1, 1, 1);
    let k = keymap.instance(&first);
    cache.store(&w1, first, &k);
    for v in 2..=5i64 {
        cache.store(&w1, TestSample::data(1, v, v), &k);
    }

    let evens = cache.take(10, StateMask::from_bits(0), None, Some(&cond)).unwrap();
    let values: Vec<i64> = evens.iter().map(|(_, v)| v.value).collect();
    assert_eq!(values, vec![2, 4]);
    assert_eq!(cond.trigger_count(), 0);

    // The odd samples are untouched.
    let rest = cache.take(10, StateMask::ANY, None, None).unwrap();
    let values: Vec<i64> = rest.iter().map(|(_, v)| v.value).collect();
    assert_eq!(values, vec![1, 3, 5]);
}

#[test]
fn invalid_samples_count_for_matching_conditions() {
    let cache = ReaderHistoryCache::new(keep_all()).unwrap();
    let keymap = KeyMap::new();
    let w1 = writer(1);

    // Key-level predicate matching key 5; dispose creates an invalid
    // sample whose key projection satisfies it.
    let cond = ReadCondition::<TestSample>::with_query(
        not_read_mask(),
        Arc::new(|v: &KeyedValue| v.key == 5),
    );
    cache.add_condition(&cond).unwrap();

    let d = TestSample::dispose(5, 1);
    let k = keymap.instance(&d);
    cache.store(&w1, d, &k);
    assert_eq!(cond.trigger_count(), 1);

    let batch = cache.take(10, StateMask::from_bits(0), None, Some(&cond)).unwrap();
    assert_eq!(batch.len(), 1);
    assert!(!batch[0].0.valid_data);
    assert_eq!(cond.trigger_count(), 0);
}

#[test]
fn detached_condition_cannot_filter_and_slots_are_reused() {
    let cache = ReaderHistoryCache::new(keep_all()).unwrap();

    let cond = ReadCondition::<TestSample>::with_query(
        StateMask::ANY,
        Arc::new(|_: &KeyedValue| true),
    );
    let err = cache.read(1, StateMask::ANY, None, Some(&cond));
    assert!(matches!(err, Err(Error::ConditionNotAttached)));

    cache.add_condition(&cond).unwrap();
    assert!(matches!(
        cache.add_condition(&cond),
        Err(Error::AlreadyAttached)
    ));
    assert!(cache.remove_condition(&cond));
    assert!(!cache.remove_condition(&cond));

    // Detach freed the slot: 64 fresh query conditions fit again.
    let mut conds = Vec::new();
    for _ in 0..64 {
        let c = ReadCondition::<TestSample>::with_query(
            StateMask::ANY,
            Arc::new(|_: &KeyedValue| true),
        );
        cache.add_condition(&c).unwrap();
        conds.push(c);
    }
    let overflow = ReadCondition::<TestSample>::with_query(
        StateMask::ANY,
        Arc::new(|_: &KeyedValue| true),
    );
    assert!(matches!(
        cache.add_condition(&overflow),
        Err(Error::ConditionSlotsExhausted)
    ));

    // Plain read conditions don't consume slots.
    let plain = ReadCondition::<TestSample>::new(StateMask::ANY);
    cache.add_condition(&plain).unwrap();
}

#[test]
fn waitset_wakes_on_trigger_transition() {
    let cache = Arc::new(ReaderHistoryCache::new(keep_all()).unwrap());
    let keymap = Arc::new(KeyMap::new());
    let cond = ReadCondition::<TestSample>::with_query(
        not_read_mask(),
        Arc::new(|v: &KeyedValue| v.value > 0),
    );
    cache.add_condition(&cond).unwrap();

    let ws = WaitSet::new();
    ws.attach(cond.clone() as Arc<dyn Condition>);

    // Nothing yet.
    assert!(ws.wait(Duration::from_millis(10)).is_empty());

    let storer = {
        let cache = Arc::clone(&cache);
        let keymap = Arc::clone(&keymap);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let s = TestSample::data(1, 1, 1);
            let k = keymap.instance(&s);
            cache.store(&writer(1), s, &k);
        })
    };

    let triggered = ws.wait(Duration::from_secs(5));
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].condition_id(), cond.condition_id());
    storer.join().unwrap();

    // Draining the cache clears the trigger; the waitset times out again.
    cache.take(10, StateMask::ANY, None, None).unwrap();
    assert!(ws.wait(Duration::from_millis(10)).is_empty());
}

#[test]
fn keep_last_overwrite_updates_trigger() {
    let qos = ReaderQos {
        history: History::KeepLast(1),
        ..Default::default()
    };
    let cache = ReaderHistoryCache::new(qos).unwrap();
    let keymap = KeyMap::new();
    let w1 = writer(1);

    let cond = ReadCondition::<TestSample>::with_query(
        not_read_mask(),
        Arc::new(|v: &KeyedValue| v.value > 100),
    );
    cache.add_condition(&cond).unwrap();

    let s = TestSample::data(1, 150, 1);
    let k = keymap.instance(&s);
    cache.store(&w1, s, &k);
    assert_eq!(cond.trigger_count(), 1);

    // Overwritten by a non-matching sample: trigger falls back to zero.
    cache.store(&w1, TestSample::data(1, 50, 2), &k);
    assert_eq!(cond.trigger_count(), 0);

    // And back.
    cache.store(&w1, TestSample::data(1, 200, 3), &k);
    assert_eq!(cond.trigger_count(), 1);
}
