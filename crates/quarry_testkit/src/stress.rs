//! Stress tests for Quarry.
//!
//! These tests verify catalog and pipeline behavior under heavy load and
//! concurrent access.

use quarry_codec::{Document, Value};
use quarry_core::pipeline::{AggregateCommand, AggregateReply, ExpressionContext};
use quarry_core::{Access, CoreResult, Database, Namespace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform, split across threads.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Documents per insert.
    pub batch_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            batch_size: 10,
        }
    }
}

#[derive(Default)]
struct Tally {
    successful: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record<T>(&self, result: CoreResult<T>) {
        match result {
            Ok(_) => self.successful.fetch_add(1, Ordering::Relaxed),
            Err(err) => {
                tracing::debug!(error = %err, "stress operation failed");
                self.failed.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    fn finish(&self, started: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            started.elapsed(),
        )
    }
}

fn run_threads(threads: usize, work: impl Fn(usize) + Send + Sync + 'static) {
    let work = Arc::new(work);
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let work = Arc::clone(&work);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                work(t);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
}

/// Evicts `ns` from the catalog cache, then has `threads` threads read it
/// at the same moment. Returns how many handles were constructed for it,
/// which must be exactly one.
///
/// # Panics
///
/// Panics if `ns` does not exist or a read fails.
pub fn stress_concurrent_first_opens(db: Arc<Database>, ns: &str, threads: usize) -> u64 {
    let namespace = Namespace::parse(ns).expect("valid namespace");
    db.run(db.connect(), namespace.db(), Access::Exclusive, |ctx, catalog| {
        catalog.close_ns(ctx, ns, false)
    })
    .expect("Failed to evict collection");
    let catalog = db.catalog(namespace.db()).expect("valid database");
    let before = catalog.stats().constructed();

    let ns = ns.to_string();
    let reader = Arc::clone(&db);
    run_threads(threads, move |_| {
        reader.count(&ns).expect("Failed to read collection");
    });
    catalog.stats().constructed() - before
}

/// Inserts `config.operations` batches from `config.threads` threads, each
/// thread into its own collection `<db>.t<thread>`. The collections are
/// created up front so that every insert runs under the shared lock.
///
/// # Panics
///
/// Panics if a collection cannot be created.
pub fn stress_concurrent_inserts(db: Arc<Database>, database: &str, config: &StressConfig) -> StressTestResult {
    for t in 0..config.threads {
        db.create_collection(&format!("{database}.t{t}"), Document::new())
            .expect("Failed to create collection");
    }
    let tally = Arc::new(Tally::default());
    let per_thread = config.operations / config.threads;
    let batch_size = config.batch_size;
    let database = database.to_string();

    let started = Instant::now();
    let worker_tally = Arc::clone(&tally);
    run_threads(config.threads, move |t| {
        let ns = format!("{database}.t{t}");
        for i in 0..per_thread {
            let batch = (0..batch_size).map(|j| {
                Document::new()
                    .with("thread", Value::int_or_long(t as i64))
                    .with("seq", Value::int_or_long((i * batch_size + j) as i64))
            });
            worker_tally.record(db.insert(&ns, batch));
        }
    });
    tally.finish(started)
}

/// Runs the same pipeline over `ns` from `config.threads` threads, counting
/// any run whose output differs from a single-threaded reference run as a
/// failure.
///
/// # Panics
///
/// Panics if the reference run fails.
pub fn stress_concurrent_aggregates(
    db: Arc<Database>,
    ns: &str,
    pipeline: Vec<Value>,
    config: &StressConfig,
) -> StressTestResult {
    let namespace = Namespace::parse(ns).expect("valid namespace");
    let run = move |db: &Database, split: bool| -> CoreResult<Vec<Document>> {
        let command = AggregateCommand::new(namespace.coll(), pipeline.clone()).with_split(split);
        match db.run_aggregate(&namespace, &command, &ExpressionContext::detached())? {
            AggregateReply::Results { documents, .. } => Ok(documents),
            AggregateReply::Explain(doc) => Ok(vec![doc]),
        }
    };
    let reference = run(&db, false).expect("Reference aggregate failed");

    let tally = Arc::new(Tally::default());
    let per_thread = config.operations / config.threads;
    let worker_tally = Arc::clone(&tally);
    let started = Instant::now();
    run_threads(config.threads, move |t| {
        for i in 0..per_thread {
            let outcome = run(&db, (t + i) % 2 == 1).and_then(|docs| {
                if docs == reference {
                    Ok(())
                } else {
                    Err(quarry_core::CoreError::fatal("aggregate output diverged"))
                }
            });
            worker_tally.record(outcome);
        }
    });
    tally.finish(started)
}

/// Creates and drops `ns` `cycles` times, checking after each step that
/// the catalog cache agrees with the namespace list.
///
/// # Panics
///
/// Panics on the first disagreement.
pub fn stress_create_drop_cycles(db: &Database, ns: &str, cycles: usize) -> StressTestResult {
    let namespace = Namespace::parse(ns).expect("valid namespace");
    let catalog = db.catalog(namespace.db()).expect("valid database");
    let tally = Tally::default();
    let started = Instant::now();
    for i in 0..cycles {
        tally.record(db.insert(ns, vec![Document::new().with("cycle", Value::int_or_long(i as i64))]));
        assert!(catalog.is_open(ns), "{ns} not cached after insert");
        tally.record(db.drop_collection(ns).map(|dropped| assert!(dropped)));
        assert!(!catalog.is_open(ns), "{ns} still cached after drop");
        let names = db.collection_names(namespace.db()).expect("Failed to list namespaces");
        assert!(!names.iter().any(|name| name == ns), "{ns} still listed after drop");
    }
    tally.finish(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_documents, scenarios, TestDatabase};

    #[test]
    fn test_concurrent_first_opens() {
        let db = TestDatabase::memory();
        db.insert("test.shared", sample_documents(5)).unwrap();
        let db = Arc::new(db.db);
        for _ in 0..3 {
            assert_eq!(stress_concurrent_first_opens(Arc::clone(&db), "test.shared", 8), 1);
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        let db = Arc::new(TestDatabase::memory().db);
        let config = StressConfig {
            operations: 200,
            threads: 4,
            batch_size: 5,
        };
        let result = stress_concurrent_inserts(Arc::clone(&db), "stress", &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 200);
        for t in 0..4 {
            assert_eq!(db.count(&format!("stress.t{t}")).unwrap(), 250);
        }
    }

    #[test]
    fn test_concurrent_aggregates() {
        let db = Arc::new(scenarios::sales_database(60).db);
        let pipeline = Value::from_json_str(
            r#"[{"$group": {"_id": "$item", "qty": {"$sum": "$qty"}, "max": {"$max": "$price"}}}, {"$sort": {"_id": 1}}]"#,
        )
        .unwrap();
        let config = StressConfig {
            operations: 40,
            threads: 4,
            ..Default::default()
        };
        let result = stress_concurrent_aggregates(db, "shop.sales", pipeline.as_array().unwrap().to_vec(), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 40);
    }

    #[test]
    fn test_create_drop_cycles() {
        let db = TestDatabase::memory();
        let result = stress_create_drop_cycles(&db, "test.cycled", 20);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 40);
    }
}
