//! Shared helpers for the integration tests

#![allow(dead_code)]

use tempo_processor::prelude::*;
use tempo_types::{canonical_data, row, StreamEvent, MIN_TIME};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Inputs and output of a declared query
pub struct Query {
    pub inputs: Vec<InputHandle>,
    pub output: OutputHandle,
}

pub type Build<'a> = &'a dyn Fn(&mut QueryContainer) -> Query;

/// One event pushed into the input at the given index
pub type Feed = Vec<(usize, StreamEvent)>;

fn push(container: &mut QueryContainer, query: &Query, feed: &[(usize, StreamEvent)]) {
    for (input, event) in feed {
        container.on_next(&query.inputs[*input], event.clone()).unwrap();
    }
}

fn complete(container: &mut QueryContainer, query: &Query) {
    for input in &query.inputs {
        container.on_completed(input).unwrap();
    }
}

/// Check that punctuations advance and no data event precedes the last
/// punctuation; returns the data events
pub fn check_output(messages: Vec<OutputMessage>) -> Vec<StreamEvent> {
    let mut punctuation = MIN_TIME;
    let mut data = Vec::new();
    let mut completed = false;
    for message in messages {
        assert!(!completed, "message after completion");
        match message {
            OutputMessage::Event(event) if event.is_punctuation() => {
                assert!(event.sync_time > punctuation, "punctuation did not advance");
                punctuation = event.sync_time;
            }
            OutputMessage::Event(event) => {
                assert!(
                    event.sync_time >= punctuation,
                    "{:?} emitted behind punctuation {}",
                    event,
                    punctuation
                );
                data.push(event);
            }
            OutputMessage::Completed => completed = true,
            OutputMessage::Faulted(error) => panic!("query faulted: {}", error),
        }
    }
    assert!(completed, "output did not complete");
    canonical_data(data)
}

/// Run the whole feed through a fresh container
pub fn run(config: &ProcessorConfig, build: Build<'_>, feed: &[(usize, StreamEvent)]) -> Vec<StreamEvent> {
    init_tracing();
    let mut container = QueryContainer::new(config.clone()).unwrap();
    let mut query = build(&mut container);
    container.restore(None).unwrap();
    push(&mut container, &query, feed);
    complete(&mut container, &query);
    check_output(query.output.drain())
}

/// Feed `feed[..split]`, checkpoint, restore a second container from the
/// blob and feed the rest into it
pub fn run_split(
    config: &ProcessorConfig,
    build: Build<'_>,
    feed: &[(usize, StreamEvent)],
    split: usize,
) -> Vec<StreamEvent> {
    init_tracing();
    let mut first = QueryContainer::new(config.clone()).unwrap();
    let mut query = build(&mut first);
    first.restore(None).unwrap();
    push(&mut first, &query, &feed[..split]);
    let blob = first.checkpoint().unwrap();
    let mut messages = query.output.drain();
    first.dispose();

    let mut second = QueryContainer::new(config.clone()).unwrap();
    let mut query = build(&mut second);
    second.restore(Some(&blob)).unwrap();
    push(&mut second, &query, &feed[split..]);
    complete(&mut second, &query);
    messages.extend(query.output.drain());
    check_output(messages)
}

/// Small deterministic generator for test data
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed ^ 0x9e37_79b9_7f4a_7c15)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    /// Uniform in `0..bound`
    pub fn below(&mut self, bound: u64) -> i64 {
        (self.next() % bound.max(1)) as i64
    }
}

/// Intervals in sync order with payload `(key, value)`
pub fn intervals(seed: u64, count: usize, keys: i64, max_gap: u64, max_len: u64) -> Vec<StreamEvent> {
    let mut rng = Lcg::new(seed);
    let mut time = 0;
    (0..count)
        .map(|_| {
            time += rng.below(max_gap + 1);
            let len = 1 + rng.below(max_len);
            let key = rng.below(keys as u64);
            let value = rng.below(100);
            StreamEvent::interval(time, time + len, row![key, value])
        })
        .collect()
}

/// Single-input feed with a punctuation every `every` events
pub fn single_input(events: Vec<StreamEvent>, every: usize) -> Feed {
    let mut feed = Vec::with_capacity(events.len() + events.len() / every.max(1));
    for (index, event) in events.into_iter().enumerate() {
        let sync = event.sync_time;
        feed.push((0, event));
        if every > 0 && (index + 1) % every == 0 {
            feed.push((0, StreamEvent::punctuation(sync)));
        }
    }
    feed
}

/// Two-input feed alternating between the sides, each in sync order
pub fn two_inputs(left: Vec<StreamEvent>, right: Vec<StreamEvent>) -> Feed {
    let mut feed = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter();
    let mut right = right.into_iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => break,
            (l, r) => {
                feed.extend(l.map(|e| (0, e)));
                feed.extend(r.map(|e| (1, e)));
            }
        }
    }
    feed
}

/// Every config variant that must not change query results
pub fn config_variants() -> Vec<ProcessorConfig> {
    vec![
        ProcessorConfig::default(),
        ProcessorConfig::default().with_data_batch_size(100),
        ProcessorConfig::default().with_force_row_based_execution(true),
        ProcessorConfig::default().with_data_batch_size(7).with_reduce_arity(3).with_map_arity(2),
        ProcessorConfig::default().with_force_row_based_execution(true).with_reduce_arity(4),
    ]
}
