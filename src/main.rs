use anyhow::{Context, bail};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shard_ledger::topology::NodeId;
use shard_ledger::{ClusterConfig, Coordinator, WorkerNode, net};

const USAGE: &str = "usage: shard-ledger worker <cluster.json> <node-id>\n       shard-ledger coordinator <cluster.json>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [role, path, node_id] if role == "worker" => {
            let node_id = node_id
                .parse()
                .with_context(|| format!("invalid node id '{node_id}'"))?;
            run_worker(path, node_id).await
        }
        [role, path] if role == "coordinator" => run_coordinator(path).await,
        _ => bail!(USAGE),
    }
}

async fn run_worker(path: &str, node_id: NodeId) -> anyhow::Result<()> {
    let config = ClusterConfig::load(path)?;
    let worker = config.worker(node_id)?;
    let node = Arc::new(WorkerNode::open(&worker)?);

    let addr = worker.node.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    info!(
        node = node_id,
        partition = worker.partition,
        %addr,
        snapshot = %worker.snapshot.display(),
        "worker listening"
    );

    net::serve(listener, move |line| {
        let node = Arc::clone(&node);
        async move { node.handle_line(&line).await }
    })
    .await?;
    Ok(())
}

async fn run_coordinator(path: &str) -> anyhow::Result<()> {
    let config = ClusterConfig::load(path)?;
    let coordinator = Arc::new(Coordinator::new(&config));

    let addr = config.coordinator.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    info!(
        %addr,
        partitions = config.topology.partition_count(),
        "coordinator listening"
    );

    net::serve(listener, move |line| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.handle_line(&line).await }
    })
    .await?;
    Ok(())
}
