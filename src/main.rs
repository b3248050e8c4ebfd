use std::process;

use rendezvous::{
    barrier::Barrier,
    cluster::Host,
    context::{ClusterContext, ContextError, WORKER_ROLE},
    Configuration,
};

fn main() {
    let args = rendezvous::new_app("Rendezvous").get_matches();
    let config = match Configuration::from_args(&args) {
        Ok(config) => config,
        Err(error) => error.exit(),
    };
    let ctx = match ClusterContext::from_configuration(&config) {
        Ok(ctx) => ctx,
        Err(error) => {
            eprintln!("Unable to bootstrap {}:{}: {}", config.role, config.task_index, error);
            process::exit(1);
        }
    };
    if let Err(error) = run(&ctx, args.value_of("barrier")) {
        tracing::error!("{}", error);
        eprintln!("{}", error);
        drop(ctx);
        process::exit(1);
    }
}

/// The master waits on the barrier and then shuts the workers down; every
/// other host signals the barrier and serves until it is shut down.
fn run(ctx: &ClusterContext, barrier_name: Option<&str>) -> Result<(), ContextError> {
    let workers: Vec<Host> = ctx
        .cluster()
        .ok_or(ContextError::NotConstructed("cluster"))?
        .hosts_with_role(WORKER_ROLE)
        .cloned()
        .collect();

    if let Some(name) = barrier_name {
        let masters: Vec<Host> = ctx.master().cloned().into_iter().collect();
        Barrier::new(name, workers.clone(), masters).run(ctx)?;
        tracing::info!("Passed barrier {}.", name);
    }

    if ctx.is_master() {
        for worker in &workers {
            ctx.shutdown_host(worker)?;
        }
        Ok(())
    } else {
        ctx.join()
    }
}
