//! Bounded parallel execution of JSON-RPC batch elements.
//!
//! `min(batch length, max_parallel_batch)` workers pull indices from a shared
//! cursor and report `(index, reply)` pairs to a collector that owns the
//! result vector, so each index has exactly one writer and result order
//! equals input order regardless of execution order. Workers finish the
//! element in flight when the shared deadline fires; cancellation is observed
//! by the element runner, never forced.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;

use girder_jsonrpc::RpcReply;

/// Executes the element at the given index; `None` means no response entry
/// (a notification).
pub type ElementRunner = Arc<dyn Fn(usize) -> BoxFuture<'static, Option<RpcReply>> + Send + Sync>;

/// Run `len` elements on at most `workers` tasks; the returned vector is
/// indexed by input position.
pub async fn run(len: usize, workers: usize, runner: ElementRunner) -> Vec<Option<RpcReply>> {
    if len == 0 {
        return Vec::new();
    }
    let worker_count = workers.max(1).min(len);
    let cursor = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(usize, Option<RpcReply>)>(len);

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let cursor = Arc::clone(&cursor);
        let runner = Arc::clone(&runner);
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                if index >= len {
                    break;
                }
                let reply = runner(index).await;
                if tx.send((index, reply)).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(tx);

    let mut results: Vec<Option<RpcReply>> = (0..len).map(|_| None).collect();
    while let Some((index, reply)) = rx.recv().await {
        results[index] = reply;
    }
    for handle in handles {
        let _ = handle.await;
    }
    results
}
