//! Concurrency controller: worker budget and the bounded page pool.
//!
//! ## Budget
//!
//! * **Local engine**: each page pins a CPU core, so the budget is
//!   `min(configured, cpus, pages)`; `auto` resolves to the CPU count.
//! * **Remote engine**: each page is one outstanding request against the
//!   provider's rate limit, so the budget comes from the [`TierTable`].
//!   An explicit worker count can lower it but never raise it.
//!
//! ## Pool
//!
//! [`WorkerPool::run`] admits tasks in input order through
//! `buffer_unordered(budget)`: at most `budget` futures are alive at once and
//! a finishing task immediately frees a slot for the next one. Admission
//! stops as soon as the pool's [`HaltSignal`] is raised; tasks already in
//! flight run to completion.

pub mod tier;

pub use tier::{ApiTier, TierTable};

use crate::engine::EngineKind;
use futures::future;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Requested number of workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerSetting {
    /// Derive from CPU count (local) or tier (remote).
    #[default]
    Auto,
    Fixed(usize),
}

impl FromStr for WorkerSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(WorkerSetting::Auto);
        }
        match s.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(WorkerSetting::Fixed(n)),
            _ => Err(format!("expected 'auto' or a positive integer, got '{s}'")),
        }
    }
}

impl fmt::Display for WorkerSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerSetting::Auto => f.write_str("auto"),
            WorkerSetting::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// Number of CPUs the process may use, at least 1.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Budget for the local engine: `min(setting, cpus, tasks)`, at least 1.
pub fn local_budget(setting: WorkerSetting, cpus: usize, tasks: usize) -> usize {
    let requested = match setting {
        WorkerSetting::Auto => cpus,
        WorkerSetting::Fixed(n) => n,
    };
    requested.min(cpus).min(tasks).max(1)
}

/// Budget for the remote engine: tier budget, optionally lowered, at most `tasks`.
pub fn remote_budget(setting: WorkerSetting, tier: &str, table: &TierTable, tasks: usize) -> usize {
    let by_tier = table.remote_budget(tier);
    let requested = match setting {
        WorkerSetting::Auto => by_tier,
        WorkerSetting::Fixed(n) => n.min(by_tier),
    };
    requested.min(tasks).max(1)
}

/// Worker budget W for one document of `tasks` pages.
pub fn worker_budget(
    engine: EngineKind,
    setting: WorkerSetting,
    tier: &str,
    table: &TierTable,
    tasks: usize,
) -> usize {
    let w = match engine {
        EngineKind::Local => local_budget(setting, available_cpus(), tasks),
        EngineKind::Remote => remote_budget(setting, tier, table, tasks),
    };
    debug!(engine = %engine, %setting, tier, tasks, workers = w, "worker budget");
    w
}

/// Stop flag shared between the pool and its tasks.
#[derive(Debug, Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn halt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded pool running at most `budget` tasks at a time.
#[derive(Debug)]
pub struct WorkerPool {
    budget: usize,
    halt: HaltSignal,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
            halt: HaltSignal::new(),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Handle tasks use to stop further admissions.
    pub fn halt_signal(&self) -> HaltSignal {
        self.halt.clone()
    }

    /// Highest number of tasks observed running at the same time.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Run `task` over `items`, returning outputs in completion order.
    ///
    /// Items not yet admitted when the halt signal is raised are skipped,
    /// so the output may be shorter than the input.
    pub async fn run<I, F, Fut, T>(&self, items: Vec<I>, task: F) -> Vec<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T>,
    {
        let halt = self.halt.clone();
        stream::iter(items)
            .take_while(move |_| future::ready(!halt.is_halted()))
            .map(|item| {
                let fut = task(item);
                let running = Arc::clone(&self.running);
                let peak = Arc::clone(&self.peak);
                async move {
                    let _slot = Slot::enter(running, &peak);
                    fut.await
                }
            })
            .buffer_unordered(self.budget)
            .collect()
            .await
    }
}

/// Counts a task as running for as long as it is alive.
struct Slot(Arc<AtomicUsize>);

impl Slot {
    fn enter(running: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Slot(running)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
