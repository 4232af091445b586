use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{hardware_threads, SynthConfig, ThreadCount};

use super::{BankPlan, PadBank, PadParams, PadTable};

/// The bank notes read from. Jobs replace it as a whole.
pub type SharedPadBank = Arc<ArcSwap<PadBank>>;

/// A shared handle to an empty bank.
pub fn shared_pad_bank() -> SharedPadBank {
    Arc::new(ArcSwap::from_pointee(PadBank::default()))
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum PadError {
    #[error("The wavetable generation was cancelled")]
    Cancelled,

    #[error("Failed to build the wavetable thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to spawn the wavetable thread")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadJobStatus {
    /// A bank with this many tables was published.
    Published { tables: usize, generation: u64 },

    /// The job was cancelled and its tables were discarded.
    Cancelled,
}

/// A background wavetable generation. Tables are rendered in parallel on
/// a rayon pool and published together once all of them are done.
pub struct PadJob {
    cancel: Arc<AtomicBool>,
    status: Receiver<PadJobStatus>,
    result: Option<PadJobStatus>,
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl PadJob {
    pub fn spawn(
        params: PadParams,
        config: SynthConfig,
        threads: ThreadCount,
        bank: SharedPadBank,
    ) -> Result<Self, PadError> {
        let pool = threads.build_pool(Some(hardware_threads()))?;
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(1);

        let handle = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(format!("pad-bank-{}", generation))
                .spawn(move || {
                    let plan = BankPlan::new(params, config);
                    let status = match render_bank(&plan, pool.as_ref(), &cancel) {
                        Some(tables) => {
                            let count = tables.len();
                            if publish(&bank, PadBank::new(tables, generation)) {
                                log::debug!(
                                    "Published PAD bank {} with {} tables",
                                    generation,
                                    count
                                );
                                PadJobStatus::Published {
                                    tables: count,
                                    generation,
                                }
                            } else {
                                PadJobStatus::Cancelled
                            }
                        }
                        None => {
                            log::warn!("PAD bank {} was cancelled, discarding it", generation);
                            PadJobStatus::Cancelled
                        }
                    };
                    tx.send(status).ok();
                })?
        };

        Ok(Self {
            cancel,
            status: rx,
            result: None,
            handle: Some(handle),
            generation,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Asks the job to stop. Tables that are already being rendered are
    /// finished, the rest are skipped and nothing is published.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// The outcome of the job, if it has finished.
    pub fn status(&mut self) -> Option<PadJobStatus> {
        if self.result.is_none() {
            self.result = self.status.try_recv().ok();
        }
        self.result
    }

    /// Blocks until the job has finished. Returns the amount of published
    /// tables.
    pub fn wait(&mut self) -> Result<usize, PadError> {
        if self.result.is_none() {
            self.result = Some(self.status.recv().unwrap_or(PadJobStatus::Cancelled));
        }
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
        match self.result {
            Some(PadJobStatus::Published { tables, .. }) => Ok(tables),
            _ => Err(PadError::Cancelled),
        }
    }
}

impl Drop for PadJob {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Renders every table of the plan, or `None` if the job was cancelled
/// before all of them were done.
pub fn render_bank(
    plan: &BankPlan,
    pool: Option<&rayon::ThreadPool>,
    cancel: &AtomicBool,
) -> Option<Vec<PadTable>> {
    let cancelled = || cancel.load(Ordering::Relaxed);

    let tables: Vec<Option<PadTable>> = match pool {
        Some(pool) => pool.install(|| {
            (0..plan.table_count())
                .into_par_iter()
                .map_init(
                    || plan.generator(),
                    |gen, index| (!cancelled()).then(|| plan.render_table(gen, index)),
                )
                .collect()
        }),
        None => {
            let mut gen = plan.generator();
            (0..plan.table_count())
                .map(|index| (!cancelled()).then(|| plan.render_table(&mut gen, index)))
                .collect()
        }
    };

    if cancelled() {
        return None;
    }
    tables.into_iter().collect()
}

/// Swaps in a bank unless a newer one was already published.
fn publish(bank: &SharedPadBank, new: PadBank) -> bool {
    let generation = new.generation();
    let new = Arc::new(new);
    let previous = bank.rcu(|current| {
        if current.generation() > generation {
            Arc::clone(current)
        } else {
            Arc::clone(&new)
        }
    });
    previous.generation() <= generation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::PadQuality;

    fn small_params() -> PadParams {
        PadParams {
            quality: PadQuality {
                sample_size: 0,
                base_note: 4,
                octaves: 1,
                samples_per_octave: 2,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_job_publishes_bank() {
        let bank = shared_pad_bank();
        let mut job = PadJob::spawn(
            small_params(),
            SynthConfig::default(),
            ThreadCount::Manual(2),
            bank.clone(),
        )
        .unwrap();
        assert_eq!(job.wait().unwrap(), 4);
        let published = bank.load();
        assert_eq!(published.tables().len(), 4);
        assert_eq!(published.generation(), job.generation());
        assert!(matches!(
            job.status(),
            Some(PadJobStatus::Published { tables: 4, .. })
        ));
    }

    #[test]
    fn test_single_threaded_matches_pool() {
        let plan = BankPlan::new(small_params(), SynthConfig::default());
        let cancel = AtomicBool::new(false);
        let pool = ThreadCount::Manual(3).build_pool(None).unwrap();
        let a = render_bank(&plan, None, &cancel).unwrap();
        let b = render_bank(&plan, pool.as_ref(), &cancel).unwrap();
        for (a, b) in a.iter().zip(b.iter()) {
            assert_eq!(a.samples(), b.samples());
        }
    }

    #[test]
    fn test_cancelled_render_is_discarded() {
        let plan = BankPlan::new(small_params(), SynthConfig::default());
        let cancel = AtomicBool::new(true);
        assert!(render_bank(&plan, None, &cancel).is_none());
    }

    #[test]
    fn test_cancelled_job_keeps_previous_bank() {
        let bank = shared_pad_bank();
        let params = PadParams {
            quality: PadQuality {
                sample_size: 4,
                octaves: 7,
                samples_per_octave: 6,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut job =
            PadJob::spawn(params, SynthConfig::default(), ThreadCount::None, bank.clone())
                .unwrap();
        job.cancel();
        match job.wait() {
            Err(PadError::Cancelled) => assert!(bank.load().is_empty()),
            Ok(tables) => assert_eq!(bank.load().tables().len(), tables),
            Err(err) => panic!("unexpected error: {}", err),
        }
    }

    #[test]
    fn test_older_bank_is_not_published_over_newer() {
        let bank = shared_pad_bank();
        assert!(publish(&bank, PadBank::new(Vec::new(), 10)));
        assert!(!publish(&bank, PadBank::new(Vec::new(), 4)));
        assert_eq!(bank.load().generation(), 10);
        assert!(publish(&bank, PadBank::new(Vec::new(), 11)));
        assert_eq!(bank.load().generation(), 11);
    }
}
