#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cli;
mod config;
mod db;
mod discord;
mod facebook;
mod queue;
mod relay;
mod utils;
mod web;

use cli::{Cli, Commands};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::ValidateConfig) => {
            match Config::load() {
                Ok(_) => println!("configuration OK"),
                Err(err) => {
                    eprintln!("configuration error: {err}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Some(Commands::Subscribe { verify }) => {
            let config = Arc::new(Config::load()?);
            if let Err(err) = cli::run_subscribe(config, verify).await {
                error!("subscribe failed: {err:#}");
                std::process::exit(1);
            }
            Ok(())
        }
        None => run_relay().await,
    }
}

async fn run_relay() -> Result<()> {
    let config = Arc::new(Config::load()?);
    info!("facebook-discord relay starting up");

    let db = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db.migrate().await?;

    let job_queue = Arc::new(queue::PostgresJobQueue::new(db.pool().clone()));
    let graph = Arc::new(facebook::GraphClient::new(config.clone())?);
    let discord = Arc::new(discord::DiscordClient::new(config.clone())?);

    let worker = Arc::new(relay::RelayWorker::new(
        db.post_store(),
        db.delivery_log_store(),
        graph,
        discord,
        config.clone(),
    ));
    // Fail the deploy loudly on unusable credentials instead of letting the
    // queue grind through retries.
    worker.preflight().await?;

    let ingest = Arc::new(relay::RelayIngest::new(db.clone(), config.clone()));
    let web_server = web::WebServer::new(config.clone(), db.clone(), ingest).await?;

    let consumer = queue::QueueConsumer::new(
        job_queue.clone(),
        worker,
        queue::ConsumerConfig::for_queue(relay::PROCESS_POST_QUEUE, config.relay.worker_batch_size),
    );

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    tasks.spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = web_server.start(shutdown).await {
                error!("web server error: {err}");
            }
        }
    });
    tasks.spawn({
        let shutdown = shutdown.clone();
        async move { consumer.run(shutdown).await }
    });
    tasks.spawn(relay::maintenance::run_sweeper(
        job_queue.clone(),
        db.post_store(),
        shutdown.clone(),
    ));

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received, beginning shutdown");
        }
        _ = tasks.join_next() => {
            info!("a relay task exited, beginning shutdown");
        }
    }

    shutdown.cancel();
    while tasks.join_next().await.is_some() {}

    info!("facebook-discord relay shutting down");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler installs");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
