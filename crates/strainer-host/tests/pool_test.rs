//! Integration tests for the instance pool.

mod common;

use common::*;
use strainer_host::{BlueprintError, InstancePool};

#[test]
fn test_checkout_is_bounded() {
    let runtime = runtime();
    let module = load(&runtime, "topic-equals", TOPIC_EQUALS);
    let pool = InstancePool::new(module, topic_params("orders"), 2);

    let a = pool.checkout().unwrap();
    let b = pool.checkout().unwrap();
    assert!(matches!(pool.checkout(), Err(BlueprintError::ResourceExhausted(_))));
    assert_eq!(pool.status().checked_out, 2);

    drop(a);
    let status = pool.status();
    assert_eq!(status.checked_out, 1);
    assert_eq!(status.idle, 1);

    let _c = pool.checkout().unwrap();
    assert_eq!(pool.status().idle, 0);
    drop(b);
}

#[test]
fn test_checked_out_instances_are_configured() {
    let runtime = runtime();
    let module = load(&runtime, "topic-equals", TOPIC_EQUALS);
    let pool = InstancePool::new(module, topic_params("orders"), 1);

    let mut instance = pool.checkout().unwrap();
    assert_eq!(instance.params_handle(), Some(0));
    assert!(instance.evaluate(&record("orders")).unwrap().is_match());
    drop(instance);

    // the same instance comes back, statistics intact
    let instance = pool.checkout().unwrap();
    assert_eq!(instance.stats().evaluations, 1);
}

#[test]
fn test_rejected_parameters_fail_checkout() {
    let runtime = runtime();
    let module = load(&runtime, "topic-equals", TOPIC_EQUALS);
    let pool = InstancePool::new(module, vec![0x00], 1);

    let err = pool.checkout().unwrap_err();
    assert!(matches!(err, BlueprintError::InvalidParameters { .. }));
    // the failed creation does not hold a slot
    assert_eq!(pool.status().checked_out, 0);
}

#[test]
fn test_faulted_instances_are_discarded() {
    let runtime = runtime();
    let module = load(&runtime, "faulty", &aborts());
    let pool = InstancePool::new(module, Vec::new(), 1);

    let mut instance = pool.checkout().unwrap();
    assert!(instance.evaluate(&record("orders")).is_err());
    drop(instance);

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.checked_out, 0);

    let replacement = pool.checkout().unwrap();
    assert!(!replacement.is_poisoned());
}

#[test]
fn test_parallel_workers() {
    let runtime = runtime();
    let module = load(&runtime, "topic-equals", TOPIC_EQUALS);
    let pool = InstancePool::new(module, topic_params("orders"), 4);

    let matched: usize = std::thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let pool = pool.clone();
                s.spawn(move || {
                    let mut instance = pool.checkout().unwrap();
                    (0..50)
                        .filter(|i| {
                            let topic = if (i + worker) % 2 == 0 { "orders" } else { "payments" };
                            instance.evaluate(&record(topic)).unwrap().is_match()
                        })
                        .count()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).sum()
    });

    assert_eq!(matched, 100);
    let status = pool.status();
    assert_eq!(status.checked_out, 0);
    assert!((1..=4).contains(&status.idle));
}
