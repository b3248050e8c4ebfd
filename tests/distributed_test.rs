//! Hosts of one cluster simulated as threads, each with its own context,
//! rendezvousing through the coordinator of the master over TCP.
use std::{sync::Arc, thread, time::Duration};

use rendezvous::{
    barrier::{Barrier, ExecutionContext, ExecutionError},
    cluster::{Address, ClusterSpec, Host},
    context::{make_distribute_host, ClusterContext, ContextError},
    node::Session,
};

mod utils;

fn workers(num_workers: usize) -> Vec<Host> {
    (0..num_workers)
        .map(|i| Host::any_address("worker", i))
        .collect()
}

fn spawn_worker(spec: ClusterSpec, task_index: usize, num_workers: usize) -> thread::JoinHandle<Result<(), ContextError>> {
    thread::spawn(move || {
        let ctx = ClusterContext::new();
        make_distribute_host(&ctx, spec, "worker", task_index, None, Some("master"), Some(0))?;
        let barrier = Barrier::new(
            "phase_0",
            workers(num_workers),
            vec![Host::any_address("master", 0)],
        );
        barrier.run(&ctx)?;
        ctx.join()
    })
}

#[test]
fn test_barrier_across_hosts() {
    let spec = utils::make_local_cluster(&[("master", 1), ("worker", 3)]);
    let worker_threads: Vec<_> = (0..3).map(|i| spawn_worker(spec.clone(), i, 3)).collect();

    let ctx = ClusterContext::new().with_barrier_timeout(Some(Duration::from_secs(30)));
    make_distribute_host(&ctx, spec, "master", 0, None, Some("master"), Some(0)).unwrap();
    assert!(ctx.is_master());
    Barrier::new("phase_0", workers(3), vec![Host::any_address("master", 0)])
        .run(&ctx)
        .unwrap();

    for worker in workers(3) {
        ctx.shutdown_host(&worker).unwrap();
    }
    for handle in worker_threads {
        handle.join().unwrap().unwrap();
    }
}

/// A master waiting for a worker that never signals fails once the timeout passes.
#[test]
fn test_barrier_timeout_across_hosts() {
    let spec = utils::make_local_cluster(&[("master", 1), ("worker", 2)]);
    let worker = spawn_worker(spec.clone(), 0, 2);

    let ctx = ClusterContext::new().with_barrier_timeout(Some(Duration::from_millis(500)));
    make_distribute_host(&ctx, spec, "master", 0, None, None, None).unwrap();
    assert!(ctx.master().is_none());
    // Without a designated master the first host, master:0, hosts the queues.
    assert_eq!(ctx.rendezvous_host().unwrap(), &Host::any_address("master", 0));

    match Barrier::new("phase_0", workers(2), vec![Host::any_address("master", 0)]).run(&ctx) {
        Err(ContextError::Execution(ExecutionError::Timeout { queue })) => {
            assert_eq!(queue, "phase_0_0")
        }
        other => panic!("Expected a timeout, got {:?}", other),
    }

    ctx.shutdown_host(&Host::any_address("worker", 0)).unwrap();
    worker.join().unwrap().unwrap();
}

/// A coordinator rejects requests that disagree on the capacity of a queue.
#[test]
fn test_capacity_mismatch_is_rejected() {
    let spec = utils::make_local_cluster(&[("worker", 2)]);
    let ctx = ClusterContext::new();
    make_distribute_host(&ctx, spec, "worker", 0, None, None, None).unwrap();

    let two_signals = Barrier::new("shared", workers(2), vec![Host::any_address("ps", 0)]);
    two_signals.run(&ctx).unwrap();
    let one_signal = Barrier::new("shared", workers(1), vec![Host::any_address("ps", 0)]);
    assert!(matches!(
        one_signal.run(&ctx),
        Err(ContextError::Execution(ExecutionError::Rejected { .. }))
    ));
}

/// A single-host cluster whose worker:0 hosts the queues; returns its address.
fn make_rendezvous_host(ctx: &ClusterContext) -> Address {
    let spec = utils::make_local_cluster(&[("worker", 1)]);
    let host = make_distribute_host(ctx, spec, "worker", 0, None, None, None).unwrap();
    host.address().cloned().unwrap()
}

/// A join abandoned by its caller does not take the tokens of a later join.
#[test]
fn test_abandoned_request_is_withdrawn() {
    let ctx = ClusterContext::new();
    make_rendezvous_host(&ctx);
    let session = ctx.session().unwrap();
    ctx.block_on(async {
        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            session.dequeue_many("p_0", 1, 1, None),
        )
        .await;
        assert!(abandoned.is_err());
        session.enqueue("p_0", 1, None).await.unwrap();
        session
            .dequeue_many("p_0", 1, 1, Some(Duration::from_secs(5)))
            .await
            .unwrap();
    })
    .unwrap();
}

/// Closing a session withdraws its parked requests, so a join on another
/// session receives the signals.
#[test]
fn test_closed_session_requests_are_withdrawn() {
    let ctx = ClusterContext::new();
    let address = make_rendezvous_host(&ctx);
    let me = Host::any_address("worker", 0);
    ctx.block_on(async {
        let first = Arc::new(Session::connect(me.clone(), me.clone(), &address, 10).await.unwrap());
        let waiting = {
            let first = Arc::clone(&first);
            tokio::spawn(async move { first.dequeue_many("d_0", 2, 2, None).await })
        };
        // Let the request reach the coordinator.
        tokio::time::sleep(Duration::from_millis(100)).await;
        first.close().await.unwrap();
        assert!(matches!(
            waiting.await.unwrap(),
            Err(ExecutionError::CommunicationError(_))
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = Session::connect(me.clone(), me.clone(), &address, 10).await.unwrap();
        second.enqueue("d_0", 2, None).await.unwrap();
        second.enqueue("d_0", 2, None).await.unwrap();
        second
            .dequeue_many("d_0", 2, 2, Some(Duration::from_secs(5)))
            .await
            .unwrap();
    })
    .unwrap();
}

/// A signal rejected on one join queue deposits nothing on the others.
#[test]
fn test_rejected_signal_leaves_no_token() {
    let ctx = ClusterContext::new();
    make_rendezvous_host(&ctx);
    let session = ctx.session().unwrap();
    ctx.block_on(session.enqueue("b_1", 5, None)).unwrap().unwrap();

    let barrier = Barrier::new(
        "b",
        vec![Host::any_address("worker", 0)],
        vec![Host::any_address("master", 0), Host::any_address("master", 1)],
    );
    assert!(matches!(
        barrier.run(&ctx),
        Err(ContextError::Execution(ExecutionError::Rejected { .. }))
    ));
    // With no token left on b_0, a join there still waits.
    let join = ctx.block_on(session.dequeue_many("b_0", 1, 1, Some(Duration::from_millis(200))));
    assert!(matches!(join, Ok(Err(ExecutionError::Timeout { .. }))));
}
