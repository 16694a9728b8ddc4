//! Write/read thread pools and the directory watcher that turns newly
//! arrived TSV files into load jobs (spec §2 items 10 "Watcher" and 12
//! "Thread pools", §4.3, §5 "Shared-resource policy").

use crate::config::WatchConfig;
use crate::loader::LoadDescriptor;
use crate::schema::WatchDescriptor;
use crate::table::{Database, Table};
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads draining one shared job queue
/// (spec §2 item 12: "write pool" serializes ingest, "read pool" runs
/// queries concurrently). `sender` is `Option` so `Drop` can close the
/// channel before joining workers — otherwise each worker's blocking
/// `receiver.iter()` would never return and `join` would hang forever.
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(name: &str, threads: usize) -> Self {
        let (sender, receiver) = channel::unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job();
                        }
                    })
                    .expect("failed to spawn pool worker thread")
            })
            .collect();
        ThreadPool {
            sender: Some(sender),
            workers,
        }
    }

    /// Enqueue a job; silently dropped if the pool is already shutting
    /// down (sender gone).
    pub fn enqueue(&self, job: Job) {
        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                log::warn!("thread pool: worker threads gone, job dropped");
            }
        }
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// One watched directory, associated with the table its files load into
/// (spec §2 item 10 "Watcher", §3 "Table" watch field).
struct WatchEntry {
    table: String,
    directory: PathBuf,
    extensions: Vec<String>,
    /// Lexicographically greatest file name enqueued so far; files
    /// sorting at or before this name are skipped (spec §4.3 "Watcher
    /// scan order": file names are assumed lexicographically
    /// chronological, matching the reference implementation's
    /// `last_file`-based incremental scan).
    last_file: Mutex<Option<String>>,
}

impl WatchEntry {
    fn matches(&self, file_name: &str) -> bool {
        self.extensions.is_empty() || self.extensions.iter().any(|ext| file_name.ends_with(ext.as_str()))
    }
}

/// Directory watcher: periodically polls every registered watch for new
/// files and enqueues a load job per file onto the write pool (spec §2
/// item 10, §4.3).
pub struct Watcher {
    watches: Arc<RwLock<Vec<Arc<WatchEntry>>>>,
    running: Arc<AtomicBool>,
    poll_thread: Option<JoinHandle<()>>,
}

impl Watcher {
    pub fn new(db: Arc<Database>, write_pool: Arc<ThreadPool>, config: WatchConfig) -> Self {
        let watches: Arc<RwLock<Vec<Arc<WatchEntry>>>> = Arc::new(RwLock::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let poll_thread = {
            let watches = watches.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("viyadb-watcher".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        std::thread::sleep(config.poll_interval);
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        let entries: Vec<Arc<WatchEntry>> = watches.read().clone();
                        for entry in entries {
                            poll_one(&db, &write_pool, &entry);
                        }
                    }
                })
                .expect("failed to spawn watcher poll thread")
        };

        Watcher {
            watches,
            running,
            poll_thread: Some(poll_thread),
        }
    }

    pub fn add_watch(&self, table: &str, directory: impl Into<PathBuf>, extensions: Vec<String>) {
        self.watches.write().push(Arc::new(WatchEntry {
            table: table.to_string(),
            directory: directory.into(),
            extensions,
            last_file: Mutex::new(None),
        }));
    }

    pub fn remove_watch(&self, table: &str) {
        self.watches.write().retain(|w| w.table != table);
    }

    /// Register a watch directly from a table's own descriptor (spec §3
    /// "Table" `watch` field), a no-op if the table declares none.
    pub fn add_watch_from_schema(&self, table: &Table) {
        if let Some(WatchDescriptor { directory, extensions }) = &table.schema.watch {
            self.add_watch(&table.schema.name, directory.clone(), extensions.clone());
        }
    }

    pub fn watch_count(&self) -> usize {
        self.watches.read().len()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.poll_thread.take() {
            let _ = thread.join();
        }
    }
}

/// One directory's scan: list every file matching the watch's
/// extensions, sorted by name, and return only those ordering after the
/// last one already enqueued.
fn scan_files(entry: &WatchEntry) -> Vec<PathBuf> {
    let mut names: Vec<String> = match fs::read_dir(&entry.directory) {
        Ok(dir) => dir
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| entry.matches(name))
            .collect(),
        Err(e) => {
            log::warn!("watch: cannot read directory {:?}: {}", entry.directory, e);
            return Vec::new();
        }
    };
    names.sort();

    let last = entry.last_file.lock();
    names
        .into_iter()
        .filter(|name| last.as_deref().map(|l| name.as_str() > l).unwrap_or(true))
        .map(|name| entry.directory.join(name))
        .collect()
}

fn poll_one(db: &Arc<Database>, write_pool: &Arc<ThreadPool>, entry: &Arc<WatchEntry>) {
    let files = scan_files(entry);
    for path in files {
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        *entry.last_file.lock() = Some(file_name.clone());

        let db = db.clone();
        let table = entry.table.clone();
        let file = path.to_string_lossy().into_owned();
        write_pool.enqueue(Box::new(move || {
            let descriptor = LoadDescriptor {
                load_type: Some("file".to_string()),
                table: table.clone(),
                format: Some("tsv".to_string()),
                file,
                columns: None,
                partition_filter: None,
                batch_id: None,
            };
            match db.load(&descriptor, current_unix_time()) {
                Ok(stats) => log::info!("watch: loaded '{}' into '{}': {:?}", descriptor.file, table, stats),
                Err(e) => log::warn!("watch: failed to load '{}' into '{}': {}", descriptor.file, table, e),
            }
        }));
    }
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::TableDescriptor;
    use std::io::Write as _;
    use std::sync::mpsc;

    #[test]
    fn test_thread_pool_runs_enqueued_jobs() {
        let pool = ThreadPool::new("test-pool", 2);
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            pool.enqueue(Box::new(move || {
                tx.send(i).unwrap();
            }));
        }
        let mut received: Vec<i32> = (0..5).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        received.sort();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.thread_count(), 2);
    }

    #[test]
    fn test_thread_pool_drop_joins_without_deadlock() {
        let pool = ThreadPool::new("test-pool", 1);
        let (tx, rx) = mpsc::channel();
        pool.enqueue(Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(pool); // must return promptly, not hang
    }

    fn events_descriptor() -> TableDescriptor {
        serde_json::from_str(
            r#"{
                "name": "events",
                "dimensions": [{"name": "country", "cardinality": 300}],
                "metrics": [{"name": "count", "type": "count"}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_watcher_picks_up_new_files_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(Config::default()));
        db.create_table(&events_descriptor()).unwrap();

        let mut f1 = fs::File::create(dir.path().join("00001.tsv")).unwrap();
        writeln!(f1, "US\t1").unwrap();

        let write_pool = Arc::new(ThreadPool::new("write", 1));
        let watcher = Watcher::new(db.clone(), write_pool.clone(), WatchConfig {
            default_extensions: vec![".tsv".to_string()],
            poll_interval: Duration::from_millis(20),
        });
        watcher.add_watch("events", dir.path(), vec![".tsv".to_string()]);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(db.table("events").unwrap().tuple_count(), 1);

        let mut f2 = fs::File::create(dir.path().join("00002.tsv")).unwrap();
        writeln!(f2, "RU\t1").unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(db.table("events").unwrap().tuple_count(), 2);
    }

    #[test]
    fn test_add_watch_from_schema_reads_table_watch_descriptor() {
        let descriptor: TableDescriptor = serde_json::from_str(
            r#"{
                "name": "events",
                "dimensions": [{"name": "country", "cardinality": 300}],
                "metrics": [{"name": "count", "type": "count"}],
                "watch": {"directory": "/tmp/viyadb-events", "extensions": [".tsv"]}
            }"#,
        )
        .unwrap();
        let db = Database::new(Config::default());
        let table = db.create_table(&descriptor).unwrap();

        let write_pool = Arc::new(ThreadPool::new("write", 1));
        let watcher = Watcher::new(Arc::new(Database::new(Config::default())), write_pool, WatchConfig::default());
        watcher.add_watch_from_schema(&table);
        assert_eq!(watcher.watch_count(), 1);
    }
}
