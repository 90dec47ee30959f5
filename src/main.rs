use std::fmt::Debug;
use std::fmt::Display;

use nudge::configuration::get_configuration;
use nudge::startup::Application;
use nudge::telemetry::get_subscriber;
use nudge::telemetry::init_subscriber;
use nudge::workers::executor::init_executor_workers;
use nudge::workers::ingest::init_ingest_workers;
use nudge::workers::outbox::init_outbox_sender;
use nudge::workers::retention::init_retention_worker;
use nudge::workers::scheduler::init_scheduler;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }

        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (inner)"
            )
        }

        Err(e) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (outer)"
            )
        }
    }
}

/// Initialise telemetry, load config, then run the API and every worker role
/// in one process. All coordination goes through the store, so any number of
/// replicas of this binary can run side by side.
#[tokio::main] // requires tokio features: macros, rt-multi-thread
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("nudge", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration().unwrap();

    let server = Application::build(cfg.clone()).await?.run_until_stopped();

    // If `spawn` is not called, all async branches run on the same thread;
    // one blocking branch would stall every other
    let server_thread = tokio::spawn(server);
    let ingest_thread = tokio::spawn(init_ingest_workers(cfg.clone()));
    let scheduler_thread = tokio::spawn(init_scheduler(cfg.clone()));
    let executor_thread = tokio::spawn(init_executor_workers(cfg.clone()));
    let outbox_thread = tokio::spawn(init_outbox_sender(cfg.clone()));
    let retention_thread = tokio::spawn(init_retention_worker(cfg));

    // Whoever returns first ends the process. In-flight job claims are plain
    // transactions and roll back on exit; the outbox sweep recovers any rows
    // caught mid-send. So an abrupt exit here loses nothing.
    tokio::select! {
        o = server_thread => { report_exit("API", o) },
        o = ingest_thread => { report_exit("Ingest worker", o) },
        o = scheduler_thread => { report_exit("Scheduler", o) },
        o = executor_thread => { report_exit("Executor worker", o) },
        o = outbox_thread => { report_exit("Outbox sender", o) },
        o = retention_thread => { report_exit("Retention worker", o) },
        _ = tokio::signal::ctrl_c() => { tracing::info!("shutdown signal received") },
    }

    Ok(())
}
