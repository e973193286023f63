//! Background writes.
//!
//! A [`WriteQueue`] owns one worker thread fed by a bounded channel, so a
//! latency-sensitive caller can hand off disk I/O and collect the outcome
//! later through a [`WriteTicket`]. When no worker is available the write
//! runs on the caller's thread instead.

use std::fmt;
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tokio::sync::oneshot;

use super::store::CacheStore;
use crate::Error;

type OnWritten = Box<dyn FnOnce(&str) + Send + 'static>;

/// A single pending write.
///
/// Every payload kind (image bytes, serialized values) goes through the
/// same request shape; only the caller-side encoding differs.
pub struct WriteRequest {
    pub namespace: Option<String>,
    pub key: String,
    pub payload: Vec<u8>,
    on_written: Option<OnWritten>,
}

impl WriteRequest {
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { namespace: None, key: key.into(), payload: payload.into(), on_written: None }
    }

    /// Build a request from a value serialized with serde_json.
    pub fn value<T: Serialize + ?Sized>(key: impl Into<String>, value: &T) -> Result<Self, Error> {
        Ok(Self::new(key, serde_json::to_vec(value)?))
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Called with the key once the entry is on disk and the eviction pass
    /// has run. Not called when the write fails.
    pub fn on_written(mut self, callback: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_written = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .field("on_written", &self.on_written.is_some())
            .finish()
    }
}

impl CacheStore {
    /// Execute a write request on the current thread.
    ///
    /// Returns the written key.
    pub fn write(&self, request: WriteRequest) -> Result<String, Error> {
        let WriteRequest { namespace, key, payload, on_written } = request;
        self.put(namespace.as_deref(), &key, &payload)?;
        drop(payload);

        if let Some(callback) = on_written {
            callback(&key);
        }
        Ok(key)
    }
}

struct Job {
    request: WriteRequest,
    done: oneshot::Sender<Result<String, Error>>,
}

/// Resolves once with the outcome of a submitted write.
#[derive(Debug)]
pub struct WriteTicket {
    rx: oneshot::Receiver<Result<String, Error>>,
}

impl WriteTicket {
    /// Wait for the write to finish.
    pub async fn wait(self) -> Result<String, Error> {
        self.rx.await.unwrap_or_else(|_| Err(Error::QueueClosed))
    }

    /// Block the current thread until the write finishes.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait_blocking(self) -> Result<String, Error> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(Error::QueueClosed))
    }

    /// The outcome if the write has already finished.
    pub fn try_result(&mut self) -> Option<Result<String, Error>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::QueueClosed)),
        }
    }
}

/// Single-worker write queue for one store.
///
/// Requests are written in submission order. Dropping the queue drains
/// pending requests and joins the worker.
pub struct WriteQueue {
    store: CacheStore,
    tx: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl WriteQueue {
    /// Start a worker thread for `store`, buffering up to `queue_capacity`
    /// requests. Falls back to inline writes if the thread cannot start.
    pub fn spawn(store: CacheStore) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Job>(store.config().queue_capacity);
        let worker_store = store.clone();

        let spawned = thread::Builder::new()
            .name("filecache-writer".into())
            .spawn(move || {
                for job in rx {
                    run_job(&worker_store, job);
                }
                tracing::debug!("cache writer stopped");
            });

        match spawned {
            Ok(worker) => Self { store, tx: Some(tx), worker: Some(worker) },
            Err(e) => {
                tracing::warn!(error = %e, "could not start cache writer; writes will run inline");
                Self::inline(store)
            }
        }
    }

    /// A queue that runs every request on the submitting thread.
    pub fn inline(store: CacheStore) -> Self {
        Self { store, tx: None, worker: None }
    }

    pub fn is_background(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a write. Blocks while the queue is full.
    pub fn submit(&self, request: WriteRequest) -> WriteTicket {
        let (done, rx) = oneshot::channel();
        let job = Job { request, done };

        let job = match &self.tx {
            Some(tx) => match tx.send(job) {
                Ok(()) => return WriteTicket { rx },
                Err(mpsc::SendError(job)) => {
                    tracing::warn!(key = %job.request.key, "cache writer is gone; writing inline");
                    job
                }
            },
            None => job,
        };

        run_job(&self.store, job);
        WriteTicket { rx }
    }

    /// Finish pending writes and stop the worker.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        drop(self.tx.take());
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.join().is_err() {
            tracing::warn!("cache writer panicked");
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteQueue")
            .field("store", &self.store)
            .field("background", &self.is_background())
            .finish()
    }
}

fn run_job(store: &CacheStore, job: Job) {
    let Job { request, done } = job;
    let result = store.write(request);
    // The submitter may have dropped its ticket.
    let _ = done.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use serde::Deserialize;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn create_test_store() -> (CacheStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = CacheStore::open(temp_dir.path()).expect("store should open");
        (store, temp_dir)
    }

    #[test]
    fn test_write_invokes_callback_once() {
        let (store, _temp_dir) = create_test_store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let request = WriteRequest::new("k", b"v".to_vec())
            .in_namespace("ns")
            .on_written(move |key| sink.lock().unwrap().push(key.to_string()));
        let key = store.write(request).unwrap();

        assert_eq!(key, "k");
        assert_eq!(*seen.lock().unwrap(), vec!["k".to_string()]);
        assert_eq!(store.get(Some("ns"), "k").unwrap(), b"v");
    }

    #[test]
    fn test_failed_write_skips_callback() {
        let (store, _temp_dir) = create_test_store();
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);

        let request = WriteRequest::new("bad/key", b"v".to_vec()).on_written(move |_| *flag.lock().unwrap() = true);

        assert!(matches!(store.write(request), Err(Error::InvalidInput(_))));
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_failed_write_still_enforces_limit() {
        let temp_dir = TempDir::new().unwrap();
        let unlimited = CacheStore::open(temp_dir.path()).unwrap();
        unlimited.put(None, "old", &[0u8; 600]).unwrap();

        let config = StoreConfig { size_limit_bytes: Some(100), ..StoreConfig::with_root(temp_dir.path()) };
        let limited = CacheStore::new(config).unwrap();

        assert!(limited.write(WriteRequest::new("bad/key", vec![0u8; 10])).is_err());
        assert!(!limited.exists(None, "old"));
    }

    #[test]
    fn test_background_queue_blocking_wait() {
        let (store, _temp_dir) = create_test_store();
        let queue = WriteQueue::spawn(store.clone());
        assert!(queue.is_background());

        let ticket = queue.submit(WriteRequest::new("bg", b"payload".to_vec()));

        assert_eq!(ticket.wait_blocking().unwrap(), "bg");
        assert_eq!(store.get(None, "bg").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_background_queue_async_wait() {
        let (store, _temp_dir) = create_test_store();
        let queue = WriteQueue::spawn(store.clone());

        let first = queue.submit(WriteRequest::new("a", b"1".to_vec()));
        let second = queue.submit(WriteRequest::new("b", b"2".to_vec()).in_namespace("ns"));

        assert_eq!(first.wait().await.unwrap(), "a");
        assert_eq!(second.wait().await.unwrap(), "b");
        assert!(store.exists(None, "a"));
        assert!(store.exists(Some("ns"), "b"));
    }

    #[tokio::test]
    async fn test_background_queue_reports_failure() {
        let (store, _temp_dir) = create_test_store();
        let queue = WriteQueue::spawn(store);

        let ticket = queue.submit(WriteRequest::new("..", b"x".to_vec()));

        assert!(matches!(ticket.wait().await, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_inline_queue_resolves_immediately() {
        let (store, _temp_dir) = create_test_store();
        let queue = WriteQueue::inline(store.clone());
        assert!(!queue.is_background());

        let mut ticket = queue.submit(WriteRequest::new("now", b"x".to_vec()));

        assert!(matches!(ticket.try_result(), Some(Ok(key)) if key == "now"));
        assert!(store.exists(None, "now"));
    }

    #[test]
    fn test_shutdown_drains_pending_writes() {
        let (store, _temp_dir) = create_test_store();
        let queue = WriteQueue::spawn(store.clone());
        let written = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let sink = Arc::clone(&written);
            let request = WriteRequest::new(format!("k{i}"), vec![i as u8; 8])
                .on_written(move |key| sink.lock().unwrap().push(key.to_string()));
            drop(queue.submit(request));
        }
        queue.shutdown();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 20);
        assert_eq!(written[0], "k0");
        assert_eq!(written[19], "k19");
        assert_eq!(store.list(None).len(), 20);
    }

    #[test]
    fn test_value_request() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Tide {
            height_m: f32,
        }

        let (store, _temp_dir) = create_test_store();
        let request = WriteRequest::value("tide", &Tide { height_m: 4.2 }).unwrap();
        store.write(request).unwrap();

        let tide: Tide = store.get_value(None, "tide").unwrap();
        assert_eq!(tide, Tide { height_m: 4.2 });
    }
}
