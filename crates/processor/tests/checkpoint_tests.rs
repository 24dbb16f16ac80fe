//! Checkpoint/restore equivalence
//!
//! For every query below, feeding a prefix, checkpointing, restoring a fresh
//! container and feeding the rest must give the same output multiset as one
//! uninterrupted run.

mod common;

use common::{config_variants, intervals, run, run_split, single_input, two_inputs, Feed, Query};
use tempo_processor::prelude::*;
use tempo_processor::{ProcessorError, StreamProcessingError};
use tempo_types::{row, StreamEvent, Value};

fn splits(len: usize) -> Vec<usize> {
    let mut splits: Vec<usize> = (0..=len).step_by(3).collect();
    splits.push(len);
    splits
}

fn assert_split_equivalence(build: &dyn Fn(&mut QueryContainer) -> Query, feed: &Feed) {
    for config in config_variants() {
        let expected = run(&config, build, feed);
        for split in splits(feed.len()) {
            assert_eq!(
                run_split(&config, build, feed, split),
                expected,
                "split at {} with {:?}",
                split,
                config
            );
        }
    }
}

fn one_input(container: &mut QueryContainer, f: impl Fn(Stream) -> Stream) -> Query {
    let input = container.register_input("in", IngressPolicy::default()).unwrap();
    let output = container.register_output(&f(input.stream())).unwrap();
    Query {
        inputs: vec![input],
        output,
    }
}

fn two_input(container: &mut QueryContainer, f: impl Fn(Stream, Stream) -> Stream) -> Query {
    let left = container.register_input("left", IngressPolicy::default()).unwrap();
    let right = container.register_input("right", IngressPolicy::default()).unwrap();
    let output = container
        .register_output(&f(left.stream(), right.stream()))
        .unwrap();
    Query {
        inputs: vec![left, right],
        output,
    }
}

fn key() -> KeySelector {
    KeySelector::fields(&[0])
}

#[test]
fn test_tumbling_count() {
    let feed = single_input(intervals(1, 40, 3, 4, 12), 5);
    assert_split_equivalence(
        &|c| {
            one_input(c, |s| {
                s.window_aggregate(WindowSpec::tumbling(10), key(), Aggregate::count())
                    .unwrap()
            })
        },
        &feed,
    );
}

#[test]
fn test_hopping_sum_points() {
    let feed = single_input(intervals(2, 40, 2, 3, 20), 7);
    assert_split_equivalence(
        &|c| {
            one_input(c, |s| {
                s.window_aggregate_with(
                    WindowSpec::hopping(15, 5),
                    key(),
                    Aggregate::sum(Expr::field(1)),
                    WindowOutput::Point,
                    ResultSelector::default(),
                )
                .unwrap()
            })
        },
        &feed,
    );
}

#[test]
fn test_sessions() {
    let feed = single_input(intervals(3, 40, 3, 9, 3), 4);
    assert_split_equivalence(
        &|c| {
            one_input(c, |s| {
                s.window_aggregate(WindowSpec::session_with_max(6, 20), key(), Aggregate::max(Expr::field(1)))
                    .unwrap()
            })
        },
        &feed,
    );
}

#[test]
fn test_snapshot_average() {
    let feed = single_input(intervals(4, 40, 3, 3, 15), 6);
    assert_split_equivalence(
        &|c| {
            one_input(c, |s| {
                s.snapshot_aggregate(key(), Aggregate::average(Expr::field(1)))
                    .unwrap()
            })
        },
        &feed,
    );
}

#[test]
fn test_stateless_chain_with_union() {
    let feed = single_input(intervals(5, 40, 4, 3, 8), 0);
    assert_split_equivalence(
        &|c| {
            one_input(c, |s| {
                let evens = s.filter(Expr::field(1).rem(Expr::lit(2)).equals(Expr::lit(0))).unwrap();
                let doubled = s
                    .select(Projection::columns(vec![Expr::field(0), Expr::field(1).mul(Expr::lit(2))]))
                    .unwrap();
                let split = doubled
                    .select_many(|r| vec![r.clone(), r.concat(&row!["copy"])])
                    .unwrap();
                evens.union(&split).unwrap()
            })
        },
        &feed,
    );
}

#[test]
fn test_equi_join() {
    let feed = two_inputs(intervals(6, 25, 3, 4, 10), intervals(7, 25, 3, 4, 10));
    assert_split_equivalence(
        &|c| two_input(c, |l, r| l.join(&r, key(), key(), JoinCombiner::default()).unwrap()),
        &feed,
    );
}

#[test]
fn test_anti_join() {
    let feed = two_inputs(intervals(8, 25, 3, 4, 10), intervals(9, 25, 3, 6, 4));
    assert_split_equivalence(
        &|c| two_input(c, |l, r| l.where_not_exists(&r, key(), key()).unwrap()),
        &feed,
    );
}

#[test]
fn test_clip() {
    let feed = two_inputs(intervals(10, 25, 2, 4, 30), intervals(11, 25, 2, 4, 2));
    assert_split_equivalence(
        &|c| two_input(c, |l, r| l.clip_event_duration(&r, key(), key()).unwrap()),
        &feed,
    );
}

#[test]
fn test_self_join_over_multicast() {
    let feed = single_input(intervals(12, 30, 3, 4, 10), 5);
    assert_split_equivalence(
        &|c| {
            one_input(c, |s| {
                let copies = s.multicast(2);
                let joined = copies[0]
                    .join(&copies[1], key(), key(), JoinCombiner::default())
                    .unwrap();
                joined
                    .window_aggregate(WindowSpec::tumbling(20), KeySelector::none(), Aggregate::count())
                    .unwrap()
            })
        },
        &feed,
    );
}

#[test]
fn test_nested_grouping() {
    let feed = single_input(intervals(13, 40, 4, 2, 6), 3);
    assert_split_equivalence(
        &|c| {
            one_input(c, |s| {
                s.group_apply(
                    key(),
                    Aggregate::sum(Expr::field(1)),
                    ResultSelector::function(|key, value| {
                        let mut out = row![value.clone()];
                        out.push(key.get(0).cloned().unwrap_or(Value::Null));
                        out
                    }),
                )
                .unwrap()
                .window_aggregate(WindowSpec::tumbling(10), KeySelector::fields(&[1]), Aggregate::max(Expr::field(0)))
                .unwrap()
            })
        },
        &feed,
    );
}

#[test]
fn test_combine_max_min_matches_max() {
    let feed = single_input(intervals(14, 40, 3, 3, 10), 4);
    let by_max = |c: &mut QueryContainer| {
        one_input(c, |s| {
            s.snapshot_aggregate(key(), Aggregate::max(Expr::field(1)))
                .unwrap()
        })
    };
    let by_combine = |c: &mut QueryContainer| {
        one_input(c, |s| {
            s.snapshot_aggregate(
                key(),
                Aggregate::combine(
                    Aggregate::max(Expr::field(1)),
                    Aggregate::min(Expr::field(1)),
                    |max, _min| max.clone(),
                ),
            )
            .unwrap()
        })
    };
    for config in config_variants() {
        let expected = run(&config, &by_max, &feed);
        assert_eq!(run(&config, &by_combine, &feed), expected);
        for split in [0, feed.len() / 2, feed.len()] {
            assert_eq!(run_split(&config, &by_combine, &feed, split), expected);
        }
    }
}

#[test]
fn test_checkpoint_through_files() {
    common::init_tracing();
    let events: Vec<StreamEvent> = intervals(15, 20, 2, 3, 5);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("query.ckpt");

    let build = |c: &mut QueryContainer| {
        one_input(c, |s| {
            s.window_aggregate(WindowSpec::tumbling(5), key(), Aggregate::count())
                .unwrap()
        })
    };
    let expected = run(&ProcessorConfig::default(), &build, &single_input(events.clone(), 0));

    let mut first = QueryContainer::new(ProcessorConfig::default()).unwrap();
    let mut query = build(&mut first);
    first.restore(None).unwrap();
    first.on_next_batch(&query.inputs[0], events[..10].iter().cloned()).unwrap();
    first
        .checkpoint_to(std::fs::File::create(&path).unwrap())
        .unwrap();
    let mut messages = query.output.drain();

    let mut second = QueryContainer::new(ProcessorConfig::default()).unwrap();
    let mut query = build(&mut second);
    second.restore_from(std::fs::File::open(&path).unwrap()).unwrap();
    second.on_next_batch(&query.inputs[0], events[10..].iter().cloned()).unwrap();
    second.on_completed(&query.inputs[0]).unwrap();
    messages.extend(query.output.drain());

    assert_eq!(common::check_output(messages), expected);
}

#[test]
fn test_restore_into_other_plan_fails() {
    common::init_tracing();
    let mut first = QueryContainer::new(ProcessorConfig::default()).unwrap();
    one_input(&mut first, |s| {
        s.window_aggregate(WindowSpec::tumbling(10), key(), Aggregate::count())
            .unwrap()
    });
    first.restore(None).unwrap();
    let blob = first.checkpoint().unwrap();

    let mut other = QueryContainer::new(ProcessorConfig::default()).unwrap();
    one_input(&mut other, |s| {
        s.window_aggregate(WindowSpec::tumbling(20), key(), Aggregate::count())
            .unwrap()
    });
    assert!(matches!(
        other.restore(Some(&blob)),
        Err(ProcessorError::StreamProcessing(StreamProcessingError::ShapeMismatch { .. }))
    ));

    let mut sharded = QueryContainer::new(ProcessorConfig::default().with_reduce_arity(2)).unwrap();
    one_input(&mut sharded, |s| {
        s.window_aggregate(WindowSpec::tumbling(10), key(), Aggregate::count())
            .unwrap()
    });
    assert!(matches!(
        sharded.restore(Some(&blob)),
        Err(ProcessorError::StreamProcessing(StreamProcessingError::ShapeMismatch { .. }))
    ));
}

#[test]
fn test_restored_watermark_rejects_stale_events() {
    common::init_tracing();
    let build = |c: &mut QueryContainer| one_input(c, |s| s);
    let mut first = QueryContainer::new(ProcessorConfig::default()).unwrap();
    let query = build(&mut first);
    first.restore(None).unwrap();
    first.on_next(&query.inputs[0], StreamEvent::point(50, row![1])).unwrap();
    let blob = first.checkpoint().unwrap();

    let mut second = QueryContainer::new(ProcessorConfig::default()).unwrap();
    let mut query = build(&mut second);
    second.restore(Some(&blob)).unwrap();
    second.on_next(&query.inputs[0], StreamEvent::point(10, row![1])).unwrap();
    assert_eq!(second.state(), ContainerState::Faulted);
    assert!(matches!(
        query.output.drain().last(),
        Some(OutputMessage::Faulted(ProcessorError::Ingress(_)))
    ));
}
