use rendezvous::{
    barrier::Barrier,
    cluster::{Address, Host},
    context::{make_distribute_host, ClusterContext, ContextError},
    node::ServerConfig,
};

mod utils;

const TOPOLOGY: &str = r#"{"master": {"0": "10.0.0.1:2222"},
                           "worker": {"0": "10.0.0.2:3333", "1": "10.0.0.3:3333"}}"#;

#[test]
fn test_cluster_lookup() {
    let ctx = ClusterContext::new();
    assert!(ctx.cluster().is_none());
    assert!(ctx.hosts().is_empty());
    assert_eq!(ctx.dumps(), "", "An unset cluster should dump as an empty string.");

    ctx.set_cluster(TOPOLOGY).unwrap();
    assert_eq!(ctx.hosts().len(), 3);
    assert_eq!(ctx.host("worker", 1), Some(&ctx.hosts()[2]));
    assert_eq!(
        ctx.host("worker", 1).and_then(Host::address),
        Some(&Address::new("10.0.0.3", 3333))
    );
    assert!(ctx.host("worker", 2).is_none());
}

/// Setting the cluster twice fails, even with an identical topology.
#[test]
fn test_set_cluster_twice() {
    let ctx = ClusterContext::new();
    ctx.set_cluster(TOPOLOGY).unwrap();
    match ctx.set_cluster(TOPOLOGY) {
        Err(ContextError::DoubleInitialization { slot, detail }) => {
            assert_eq!(slot, "cluster");
            assert!(detail.contains("10.0.0.3:3333"), "The error should show the set topology.");
        }
        other => panic!("Expected a double initialization, got {:?}", other.map(|_| ())),
    }
    assert_eq!(ctx.hosts().len(), 3, "The first topology should be kept.");
}

#[test]
fn test_set_host_twice() {
    let ctx = ClusterContext::new();
    ctx.set_host("worker", 0, None).unwrap();
    assert!(matches!(
        ctx.set_host("worker", 1, None),
        Err(ContextError::DoubleInitialization { .. })
    ));
    assert_eq!(ctx.this_host(), Some(&Host::any_address("worker", 0)));
}

/// A server needs the cluster and this host, and is never partially constructed.
#[test]
fn test_server_preconditions() {
    let ctx = ClusterContext::new();
    assert!(matches!(
        ctx.set_server(ServerConfig::default()),
        Err(ContextError::MissingPrecondition {
            missing: "cluster",
            ..
        })
    ));
    assert!(ctx.server().is_none());

    let spec = utils::make_local_cluster(&[("worker", 1)]);
    ctx.set_cluster(spec).unwrap();
    assert!(matches!(
        ctx.set_server(ServerConfig::default()),
        Err(ContextError::MissingPrecondition {
            missing: "this host",
            ..
        })
    ));
    assert!(ctx.server().is_none());
    assert!(matches!(ctx.join(), Err(ContextError::NotConstructed("server"))));

    ctx.set_host("worker", 0, None).unwrap();
    let server = ctx.set_server(ServerConfig::default()).unwrap();
    assert_eq!(server.host(), &Host::any_address("worker", 0));
    assert!(matches!(
        ctx.set_server(ServerConfig::default()),
        Err(ContextError::DoubleInitialization { slot: "server", .. })
    ));

    ctx.shutdown_host(&Host::any_address("worker", 0)).unwrap();
    ctx.join().unwrap();
    assert!(ctx.server().unwrap().is_terminated());
}

#[test]
fn test_master() {
    let ctx = ClusterContext::new();
    ctx.set_cluster(TOPOLOGY).unwrap();
    assert!(!ctx.is_master());
    ctx.set_host("master", 0, None).unwrap();
    assert!(!ctx.is_master(), "No master was designated yet.");

    let master = ctx.set_master(None, None).unwrap();
    assert_eq!(master, &Host::any_address("master", 0));
    assert_eq!(master.address(), Some(&Address::new("10.0.0.1", 2222)));
    assert!(ctx.is_master());
    assert!(ctx.is_me(&Host::new("master", 0, Some(Address::new("10.0.0.1", 2222)))));
    assert!(ctx.is_master_host(&Host::any_address("master", 0)));
    assert!(!ctx.is_master_host(&Host::any_address("worker", 0)));
    assert!(matches!(
        ctx.set_master(Some("worker"), Some(0)),
        Err(ContextError::DoubleInitialization { slot: "master", .. })
    ));
    assert_eq!(ctx.rendezvous_host().unwrap(), &Host::any_address("master", 0));
}

/// Without a master the first host of the topology hosts the barriers.
#[test]
fn test_rendezvous_without_master() {
    let ctx = ClusterContext::new();
    assert!(matches!(
        ctx.rendezvous_host(),
        Err(ContextError::NotConstructed("cluster"))
    ));
    ctx.set_cluster(TOPOLOGY).unwrap();
    assert_eq!(ctx.rendezvous_host().unwrap(), &Host::any_address("master", 0));
}

#[test]
fn test_barrier_needs_this_host() {
    let ctx = ClusterContext::new();
    ctx.set_cluster(TOPOLOGY).unwrap();
    let barrier = Barrier::new(
        "phase",
        vec![Host::any_address("worker", 0)],
        vec![Host::any_address("master", 0)],
    );
    assert!(matches!(
        barrier.run(&ctx),
        Err(ContextError::NotConstructed("this host"))
    ));
}

#[test]
fn test_make_distribute_host() {
    let ctx = ClusterContext::new();
    let spec = utils::make_local_cluster(&[("master", 1), ("worker", 2)]);
    let host = make_distribute_host(&ctx, spec, "worker", 1, None, Some("master"), None).unwrap();
    assert_eq!(host, &Host::any_address("worker", 1));
    assert!(host.address().is_some(), "This host should carry its topology address.");
    assert_eq!(ctx.master(), Some(&Host::any_address("master", 0)));
    let server = ctx.server().unwrap();
    assert_eq!(
        Some(server.local_address().port()),
        host.address().map(Address::port)
    );
    assert!(!ctx.is_master());
}
