use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tasklane_core::app::{AddSubscription, IncreaseCredits, PartitionHandle, SubscribedTask};
use tasklane_core::domain::{NewTask, Payload, TaskType};
use tasklane_core::{Broker, BrokerBuilder, BrokerConfig};

/// Run a local broker, feed it demo tasks and work them off with subscribed workers.
#[derive(Debug, Parser)]
#[command(name = "tasklane", version)]
struct Cli {
    /// TOML config file; TASKLANE_* variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tasks to create per partition
    #[arg(long, default_value_t = 5)]
    tasks: usize,

    /// Workers subscribed per partition
    #[arg(long, default_value_t = 2)]
    workers: usize,

    #[arg(long, default_value = "hello")]
    task_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloPayload {
    name: String,
    /// Fail the first attempt to show the retry path.
    flaky: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BrokerConfig::from_file(path)?,
        None => BrokerConfig::default(),
    }
    .with_env_overrides()?;
    info!(?config, "starting broker");

    let broker = BrokerBuilder::new(config).build()?;

    let mut workers = Vec::new();
    for partition in broker.partitions() {
        for worker_id in 0..cli.workers {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                partition.clone(),
                cli.task_type.clone(),
            )));
        }
    }

    for partition in broker.partitions() {
        for n in 0..cli.tasks {
            let payload = HelloPayload {
                name: format!("task-{n}"),
                flaky: n % 3 == 0,
            };
            let task = NewTask::new(cli.task_type.clone(), 3)
                .payload(Payload::from_value(&serde_json::to_value(&payload)?))
                .header("source", "tasklane-cli");
            let created = partition.create_task(task).await?;
            info!(partition_id = partition.partition_id(), task_key = %created.key, "task created");
        }
    }

    tokio::select! {
        result = wait_until_idle(&broker) => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    for status in broker.status().await? {
        info!(?status, "final status");
    }
    broker.shutdown().await;
    for worker in workers {
        let _ = worker.await;
    }
    Ok(())
}

async fn wait_until_idle(broker: &Broker) -> anyhow::Result<()> {
    loop {
        let statuses = broker.status().await?;
        if statuses.iter().all(|s| s.active_tasks() == 0) {
            return Ok(());
        }
        sleep(Duration::from_millis(50)).await;
    }
}

/// One subscription with a single credit, topped up after each finished task.
async fn worker_loop(worker_id: usize, partition: PartitionHandle, task_type: String) {
    let owner = format!("worker-{}-{worker_id}", partition.partition_id());
    let request = AddSubscription {
        topic_name: partition.topic_name().to_string(),
        partition_id: partition.partition_id(),
        task_type: TaskType::new(task_type),
        lock_duration: Duration::from_secs(30),
        lock_owner: owner.clone(),
        credits: 1,
    };
    let mut subscribed = match partition.add_subscription(request).await {
        Ok(subscribed) => subscribed,
        Err(err) => {
            warn!(%owner, error = %err, "subscription refused");
            return;
        }
    };

    // ends when the partition shuts down and drops the channel
    while let Some(task) = subscribed.tasks.recv().await {
        if let Err(err) = handle(&partition, &owner, &task).await {
            warn!(%owner, task_key = %task.key, error = %err, "task handling failed");
            break;
        }
        let top_up = IncreaseCredits {
            topic_name: partition.topic_name().to_string(),
            partition_id: partition.partition_id(),
            subscriber_key: subscribed.subscriber_key,
            credits: 1,
        };
        if let Err(err) = partition.increase_credits(top_up).await {
            warn!(%owner, error = %err, "credit top-up failed");
            break;
        }
    }
}

async fn handle(partition: &PartitionHandle, owner: &str, task: &SubscribedTask) -> anyhow::Result<()> {
    let payload: HelloPayload = match &task.value.payload {
        Some(payload) => serde_json::from_slice(payload.as_bytes())?,
        None => anyhow::bail!("task {} has no payload", task.key),
    };

    if payload.flaky && task.value.retries == 3 {
        let failed = partition
            .fail_task(task.key, owner, task.value.retries - 1)
            .await?;
        info!(%owner, task_key = %task.key, retries = failed.value.retries, "intentional failure");
        return Ok(());
    }

    println!("Hello, {}!", payload.name);
    let result = serde_json::json!({ "greeted": payload.name, "by": owner });
    let completed = partition
        .complete_task(task.key, owner, Some(Payload::from_value(&result)))
        .await?;
    if completed.is_rejection() {
        warn!(%owner, task_key = %task.key, reason = ?completed.metadata.rejection_reason, "complete rejected");
    }
    Ok(())
}
