// src/engine/pool.rs
//
// Global worker pool for background resize requests.
//
// One pool serves every request instead of a pool (or thread) per call:
// threads are reused and the thread count stays bounded no matter how many
// requests are queued.
//
// - Sized from IMAGE_RESIZER_THREADS, else std::thread::available_parallelism()
// - Initialized lazily on first use; later changes to the env var have no effect

use rayon::ThreadPool;
use std::sync::OnceLock;

/// Environment variable overriding the worker count.
pub const THREADS_ENV: &str = "IMAGE_RESIZER_THREADS";

/// Minimum number of worker threads
const MIN_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// Worker count from the environment, falling back to detected parallelism.
pub fn configured_threads() -> usize {
    parse_thread_count(std::env::var(THREADS_ENV).ok().as_deref()).unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_THREADS)
    })
}

fn parse_thread_count(raw: Option<&str>) -> Option<usize> {
    raw?.trim().parse::<usize>().ok().filter(|n| *n >= MIN_THREADS)
}

/// The shared pool, or `None` if it could not be built.
pub fn get_pool() -> Option<&'static ThreadPool> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| {
            let num_threads = configured_threads();
            match rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("image-resizer-{i}"))
                .build()
            {
                Ok(pool) => {
                    tracing::debug!(num_threads, "worker pool started");
                    Some(pool)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "failed to build worker pool, using rayon global pool"
                    );
                    None
                }
            }
        })
        .as_ref()
}

/// Run `job` on a worker thread.
pub fn spawn<F>(job: F)
where
    F: FnOnce() + Send + 'static,
{
    match get_pool() {
        Some(pool) => pool.spawn(job),
        None => rayon::spawn(job),
    }
}
