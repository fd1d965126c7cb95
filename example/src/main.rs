use anyhow::{Context, Result};
use log::{error, info};
use std::env;
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};
use tether_rs::*;

const LEASE: Duration = Duration::from_secs(5);
const HEARTBEAT: Duration = Duration::from_secs(1);

// Usage: example [<projects/p/instances/i/databases/d> <table>]
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let (tx, rx) = channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set ctrl-c handler")?;

    let args: Vec<String> = env::args().skip(1).collect();
    let store: Arc<dyn LeaseStore> = match args.as_slice() {
        [db, table] => Arc::new(SpannerLeaseStore::connect(db, table).await?),
        _ => {
            info!("no database given, using an in-memory store");
            Arc::new(MemoryLeaseStore::new())
        }
    };

    // Two processes contend for "tether-demo"; b waits until a lets go.
    let start = Instant::now();
    let a = DistributedLock::acquire(store.clone(), "tether-demo", LEASE, HEARTBEAT).await?;
    info!("a: granted, token={}", a.handle().version());

    let b_store = store.clone();
    let b = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let lock = DistributedLock::acquire(b_store, "tether-demo", LEASE, HEARTBEAT).await?;
        info!(
            "b: granted after {:?}, token={}",
            start.elapsed(),
            lock.handle().version()
        );
        lock.release().await
    });

    tokio::time::sleep(Duration::from_secs(8)).await;
    a.release().await?;
    info!("a: released after {:?}", start.elapsed());
    if let Err(e) = b.await? {
        error!("b: {e}");
    }

    // Hold a lock until Ctrl-C.
    let client = LockClient::builder(store)
        .lease_duration(LEASE)
        .heartbeat_interval(HEARTBEAT)
        .build();
    let handle = client
        .acquire(
            "tether-demo",
            AcquireOptions::new().payload(client.owner().as_bytes().to_vec()),
        )
        .await?;
    info!("holding {handle:?}, press Ctrl-C to stop");

    tokio::task::spawn_blocking(move || rx.recv()).await??;
    info!("still held: {}", handle.is_valid());
    client.close().await?;

    Ok(())
}
