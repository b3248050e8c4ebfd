#![allow(dead_code)]
use rendezvous::cluster::ClusterSpec;

/// Returns a unique port for each test to avoid race conditions.
pub fn get_unique_port() -> u16 {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static PORT: AtomicUsize = AtomicUsize::new(23000);
    PORT.fetch_add(1, Ordering::SeqCst) as u16
}

/// A topology on localhost with the given number of hosts per role.
pub fn make_local_cluster(roles: &[(&str, usize)]) -> ClusterSpec {
    roles
        .iter()
        .fold(ClusterSpec::new(), |spec, (role, num_hosts)| {
            let addresses: Vec<String> = (0..*num_hosts)
                .map(|_| format!("127.0.0.1:{}", get_unique_port()))
                .collect();
            spec.with_job(role, addresses)
        })
}
