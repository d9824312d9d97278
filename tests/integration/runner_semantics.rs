//! Execution graph semantics.
//!
//! These tests verify how sequences and parallel nodes start, finish and
//! fail, independent of any real build task.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_test::{assert_pending, assert_ready_ok};

use kiln::core::{parallel, sequence, Node, Task};
use kiln::orchestration::{FailurePolicy, RunEvent, Runner};
use kiln::Error;

use crate::fixtures::{failing_task, timed_task, Journal};

/// A task that resolves when its gate fires.
fn gated(name: &str, gate: oneshot::Receiver<()>, journal: &Journal) -> Task {
    let gate = Arc::new(Mutex::new(Some(gate)));
    let journal = journal.clone();
    let owned = name.to_string();
    Task::new(name, move |_| {
        let gate = gate.lock().unwrap().take();
        let journal = journal.clone();
        let name = owned.clone();
        async move {
            journal.record(format!("start:{}", name));
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            journal.record(format!("end:{}", name));
            Ok(())
        }
    })
}

/// Test: Sequential failure property
/// Given sequences of N steps where step i fails
/// When each sequence runs
/// Then steps before i ran exactly once and steps after i never started
#[tokio::test]
async fn test_sequence_failure_property() {
    for n in 1..=5 {
        for i in 0..n {
            let journal = Journal::new();
            let steps: Vec<Node> = (0..n)
                .map(|k| {
                    let name = format!("step{}", k);
                    if k == i {
                        failing_task(&name, Duration::ZERO, &journal).into()
                    } else {
                        timed_task(&name, Duration::ZERO, &journal).into()
                    }
                })
                .collect();

            let err = Runner::default().run(&sequence(steps)).await.unwrap_err();
            let failed = format!("step{}", i);
            assert_eq!(err.task_name(), Some(failed.as_str()));

            for k in 0..n {
                let name = format!("step{}", k);
                let starts = journal.count(&format!("start:{}", name));
                if k < i {
                    assert_eq!(starts, 1, "n={} i={} k={}", n, i, k);
                    assert_eq!(journal.count(&format!("end:{}", name)), 1);
                } else if k > i {
                    assert_eq!(starts, 0, "n={} i={} k={} should not start", n, i, k);
                }
            }
        }
    }
}

/// Test: Parallel completion
/// Given a parallel node whose members finish on demand
/// When members resolve one by one
/// Then the node stays pending until the last one resolves
#[test]
fn test_parallel_resolves_after_every_member() {
    let journal = Journal::new();
    let (tx_a, rx_a) = oneshot::channel();
    let (tx_b, rx_b) = oneshot::channel();
    let (tx_c, rx_c) = oneshot::channel();
    let graph = parallel([
        gated("a", rx_a, &journal),
        gated("b", rx_b, &journal),
        gated("c", rx_c, &journal),
    ]);
    let runner = Runner::default();

    let mut run = tokio_test::task::spawn(runner.run(&graph));
    assert_pending!(run.poll());
    // All members started within the first poll.
    assert_eq!(journal.entries(), vec!["start:a", "start:b", "start:c"]);

    tx_b.send(()).unwrap();
    assert_pending!(run.poll());
    tx_a.send(()).unwrap();
    assert_pending!(run.poll());
    tx_c.send(()).unwrap();
    assert_ready_ok!(run.poll());

    assert_eq!(journal.count("end:a") + journal.count("end:b") + journal.count("end:c"), 3);
}

/// Test: Cancel siblings
/// Given a parallel node with one fast failure and two slower members
/// When it runs under the cancel_siblings policy
/// Then siblings stop at their checkpoint and the failure is reported after they resolve
#[tokio::test]
async fn test_cancel_siblings_policy() {
    let journal = Journal::new();
    let graph = parallel([
        timed_task("slow", Duration::from_millis(200), &journal),
        failing_task("bad", Duration::from_millis(10), &journal),
        timed_task("other", Duration::from_millis(60), &journal),
    ]);

    let started = Instant::now();
    let err = Runner::new(FailurePolicy::CancelSiblings)
        .run(&graph)
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(err.task_name(), Some("bad"));
    assert!(!err.is_cancelled());
    assert_eq!(journal.count("start:slow"), 1);
    assert_eq!(journal.count("end:slow"), 0);
    assert_eq!(journal.count("end:other"), 0);
}

#[tokio::test]
async fn test_run_to_completion_policy() {
    let journal = Journal::new();
    let graph = parallel([
        timed_task("slow", Duration::from_millis(100), &journal),
        failing_task("bad", Duration::from_millis(10), &journal),
        timed_task("other", Duration::from_millis(30), &journal),
    ]);

    let err = Runner::new(FailurePolicy::RunToCompletion)
        .run(&graph)
        .await
        .unwrap_err();

    assert_eq!(err.task_name(), Some("bad"));
    assert_eq!(journal.count("end:slow"), 1);
    assert_eq!(journal.count("end:other"), 1);
}

#[tokio::test]
async fn test_first_declared_failure_wins() {
    let journal = Journal::new();
    let graph = parallel([
        failing_task("late", Duration::from_millis(50), &journal),
        failing_task("early", Duration::from_millis(5), &journal),
    ]);

    let err = Runner::new(FailurePolicy::RunToCompletion)
        .run(&graph)
        .await
        .unwrap_err();
    assert_eq!(err.task_name(), Some("late"));
}

/// Test: Clean before transforms
/// Given series(clean, parallel(a, b))
/// When it runs
/// Then clean finishes before either parallel member starts
#[tokio::test]
async fn test_sequence_orders_parallel_after_clean() {
    let journal = Journal::new();
    let graph = sequence([
        Node::from(timed_task("clean", Duration::from_millis(30), &journal)),
        parallel([
            timed_task("styles", Duration::from_millis(5), &journal),
            timed_task("html", Duration::from_millis(5), &journal),
        ]),
    ]);

    Runner::default().run(&graph).await.unwrap();

    let clean_end = journal.position("end:clean").unwrap();
    assert!(journal.position("start:styles").unwrap() > clean_end);
    assert!(journal.position("start:html").unwrap() > clean_end);
}

#[tokio::test]
async fn test_nested_failure_propagates_out_of_sequence() {
    let journal = Journal::new();
    let graph = sequence([
        parallel([
            Node::from(failing_task("sprite", Duration::ZERO, &journal)),
            sequence([
                timed_task("copy", Duration::from_millis(5), &journal),
                timed_task("images", Duration::from_millis(5), &journal),
            ]),
        ]),
        Node::from(timed_task("server", Duration::ZERO, &journal)),
    ]);

    let err = Runner::default().run(&graph).await.unwrap_err();
    assert_eq!(err.task_name(), Some("sprite"));
    assert_eq!(journal.count("start:server"), 0);
    assert_eq!(journal.count("start:images"), 0);
}

#[tokio::test]
async fn test_events_reported_for_failure() {
    let journal = Journal::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = Runner::default().with_events(tx);
    let graph = sequence([
        timed_task("clean", Duration::ZERO, &journal),
        failing_task("styles", Duration::ZERO, &journal),
    ]);

    let _ = runner.run(&graph).await;
    drop(runner);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], RunEvent::Started { task: "clean".into() });
    assert!(matches!(&events[1], RunEvent::Finished { task, .. } if task == "clean"));
    assert_eq!(events[2], RunEvent::Started { task: "styles".into() });
    assert!(matches!(&events[3], RunEvent::Failed { task, error } if task == "styles" && error.contains("styles broke")));
}

#[tokio::test]
async fn test_cancelled_scope_reports_cancellation() {
    let journal = Journal::new();
    let scope = tokio_util::sync::CancellationToken::new();
    scope.cancel();

    let err = Runner::default()
        .run_scoped(&Node::from(timed_task("html", Duration::ZERO, &journal)), scope)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(ref task) if task == "html"));
    assert_eq!(journal.count("start:html"), 0);
}
