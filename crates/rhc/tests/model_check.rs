// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Randomized operation mix checked against the cache's invariants.
//!
//! Debug builds re-verify every aggregate counter and every condition
//! trigger against a from-scratch enumeration after each mutation, so this
//! test doubles as a property check: counters match the sample lists,
//! triggers match what a filtered read would return, generations never go
//! backwards, taken samples never resurface, and keep-last depth holds.

mod common;

use common::{writer, KeyedValue, TestSample, RecordingListener};
use rhc::qos::{History, ReaderQos};
use rhc::{
    InstanceId, KeyMap, ReadCondition, ReaderHistoryCache, SampleInfo, StateMask,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const DEPTH: u32 = 3;
const KEYS: u32 = 4;
const WRITERS: u64 = 3;
const OPS: usize = 600;

struct Tracker {
    taken: HashSet<i64>,
    // highest observed generation sum per instance
    gen_high: HashMap<InstanceId, u32>,
}

impl Tracker {
    fn new() -> Self {
        Self {
            taken: HashSet::new(),
            gen_high: HashMap::new(),
        }
    }

    fn observe_batch(&mut self, batch: &[(SampleInfo, KeyedValue)], is_take: bool, depth: u32) {
        let mut per_inst: HashMap<InstanceId, u32> = HashMap::new();
        for (info, value) in batch {
            if info.valid_data {
                *per_inst.entry(info.instance_handle).or_default() += 1;
                if is_take {
                    assert!(
                        self.taken.insert(value.value),
                        "sample {} returned by take twice",
                        value.value
                    );
                }
            }
            // generation counters never decrease over an instance's life
            let gen = info
                .disposed_generation_count
                .wrapping_add(info.no_writers_generation_count)
                .wrapping_add(info.absolute_generation_rank);
            let high = self.gen_high.entry(info.instance_handle).or_insert(0);
            assert!(gen >= *high, "instance generation went backwards");
            *high = gen;
        }
        for (_, count) in per_inst {
            assert!(count <= depth, "keep-last depth exceeded");
        }
    }
}

fn run(seed: u64) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let qos = ReaderQos {
        history: History::KeepLast(DEPTH),
        ..Default::default()
    };
    let listener = RecordingListener::new();
    let cache = ReaderHistoryCache::with_listener(qos, listener).unwrap();
    let keymap: KeyMap<TestSample> = KeyMap::new();

    let query = ReadCondition::<TestSample>::with_query(
        StateMask::NOT_READ | StateMask::ANY_VIEW | StateMask::ANY_INSTANCE,
        Arc::new(|v: &KeyedValue| v.value % 3 == 0),
    );
    cache.add_condition(&query).unwrap();
    let plain = ReadCondition::<TestSample>::new(StateMask::ANY);
    cache.add_condition(&plain).unwrap();

    let mut tracker = Tracker::new();
    let mut next_value: i64 = 0;
    let mut now: u64 = 0;
    let mut ts: i64 = 0;

    for _ in 0..OPS {
        now += u64::from(rng.u32(1..50));
        ts += 1;
        let key = rng.u32(0..KEYS);
        let wr = rng.u64(1..=WRITERS);
        match rng.u32(0..12) {
            0..=5 => {
                let mut w = writer(wr);
                if rng.bool() {
                    w.lifespan_expiry = Some(now + u64::from(rng.u32(1..200)));
                }
                let value = next_value;
                next_value += 1;
                let s = TestSample::data(key, value, ts);
                let k = keymap.instance(&s);
                assert!(cache.store(&w, s, &k));
            }
            6 => {
                let s = TestSample::dispose(key, ts);
                let k = keymap.instance(&s);
                assert!(cache.store(&writer(wr), s, &k));
            }
            7 => {
                let s = if rng.bool() {
                    TestSample::unregister(key, ts)
                } else {
                    TestSample::dispose_unregister(key, ts)
                };
                let k = keymap.instance(&s);
                assert!(cache.store(&writer(wr), s, &k));
            }
            8 => {
                let max = rng.usize(1..6);
                let mask = if rng.bool() {
                    StateMask::ANY
                } else {
                    StateMask::NOT_READ
                };
                let batch = cache.read(max, mask, None, None).unwrap();
                tracker.observe_batch(&batch, false, DEPTH);
            }
            9 => {
                let max = rng.usize(1..6);
                let batch = cache.take(max, StateMask::ANY, None, None).unwrap();
                tracker.observe_batch(&batch, true, DEPTH);
            }
            10 => {
                let use_query = rng.bool();
                let cond = if use_query { &query } else { &plain };
                let batch = cache
                    .take(rng.usize(1..4), StateMask::from_bits(0), None, Some(cond))
                    .unwrap();
                tracker.observe_batch(&batch, true, DEPTH);
            }
            _ => {
                cache.process_expired_samples(now);
            }
        }
    }

    // Drain and re-check the terminal state.
    let rest = cache.take(usize::MAX, StateMask::ANY, None, None).unwrap();
    tracker.observe_batch(&rest, true, DEPTH);
    assert_eq!(cache.sample_count(), 0);
}

#[test]
fn randomized_mix_holds_invariants() {
    for seed in 0..6 {
        run(seed);
    }
}
