//! Bounded patch queue refilled by producer threads.
//!
//! # Architecture
//! - Producers pop numbered units (one subject of one pass) from a per-pass
//!   pool, load the subject and draw `samples_per_volume` patches
//! - Each unit samples with its own RNG derived from the queue seed, the pass
//!   and the subject index, so the worker that picks it up does not matter
//! - Finished units are buffered strictly in pool order; a producer waits
//!   for its turn before pushing
//! - The buffer never holds more than `capacity` patches; producers wait
//!   on a condition variable while it is full
//! - Consumers wait on a second condition variable while it is empty
//! - With `num_workers = 0` the consumer thread produces on demand
//!
//! # Example
//! ```ignore
//! let sampler = LabelSampler::new([64, 64, 64])?;
//! let config = QueueConfig::new(128).samples_per_volume(8).workers(4);
//! let queue = PatchQueue::new(subjects, sampler, config)?;
//!
//! for batch in queue.batches(16)? {
//!     train_step(&model, batch?);
//! }
//! ```

mod config;
mod stats;

pub use config::{FailurePolicy, QueueConfig};
pub use stats::QueueStats;

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::dataset::SubjectSource;
use crate::error::{Error, Result};
use crate::patch::{Patch, PatchBatch};
use crate::sampler::{get_rng, PatchSampler};
use crate::volume::Subject;

/// One subject drawn from the pool, numbered in pool order.
#[derive(Debug, Clone, Copy)]
struct Unit {
    ticket: u64,
    pass: usize,
    index: usize,
}

/// Mutable queue state, guarded by one mutex.
struct State {
    buffer: VecDeque<Patch>,
    /// Patches that did not fit in the buffer: synchronous overflow, or
    /// units finished after `close()`.
    pending: VecDeque<Patch>,
    pool: VecDeque<usize>,
    pool_rng: ChaCha8Rng,
    passes_started: usize,
    next_ticket: u64,
    /// Ticket of the unit allowed to push next.
    next_push: u64,
    pool_exhausted: bool,
    closed: bool,
    halted: bool,
    failure: Option<Error>,
    /// Subjects that failed since the last successful one.
    failed_since_success: Vec<bool>,
    num_failed_since_success: usize,
    active_producers: usize,
    blocked_producers: usize,
    produced: usize,
    consumed: usize,
    failed_subjects: usize,
    discarded: usize,
}

impl State {
    fn new(pool_rng: ChaCha8Rng, capacity: usize, num_subjects: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            pending: VecDeque::new(),
            pool: VecDeque::new(),
            pool_rng,
            passes_started: 0,
            next_ticket: 0,
            next_push: 0,
            pool_exhausted: false,
            closed: false,
            halted: false,
            failure: None,
            failed_since_success: vec![false; num_subjects],
            num_failed_since_success: 0,
            active_producers: 0,
            blocked_producers: 0,
            produced: 0,
            consumed: 0,
            failed_subjects: 0,
            discarded: 0,
        }
    }

    /// Next unit of work, starting a new pass when the pool runs dry.
    fn next_unit(&mut self, num_subjects: usize, config: &QueueConfig) -> Option<Unit> {
        if self.pool.is_empty() {
            if config
                .max_passes
                .is_some_and(|max| self.passes_started >= max)
            {
                self.pool_exhausted = true;
                return None;
            }
            let mut order: Vec<usize> = (0..num_subjects).collect();
            if config.shuffle_subjects {
                order.shuffle(&mut self.pool_rng);
            }
            self.pool = order.into();
            self.passes_started += 1;
            tracing::debug!(
                pass = self.passes_started,
                subjects = num_subjects,
                "starting pass"
            );
        }
        let index = self.pool.pop_front()?;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        Some(Unit {
            ticket,
            pass: self.passes_started,
            index,
        })
    }

    fn record_success(&mut self) {
        if self.num_failed_since_success > 0 {
            self.failed_since_success.fill(false);
            self.num_failed_since_success = 0;
        }
    }

    /// No more patches will ever reach the buffer.
    fn production_finished(&self) -> bool {
        (self.pool_exhausted || self.halted) && self.active_producers == 0 && self.pending.is_empty()
    }

    /// Drop a unit that can no longer be buffered because production halted.
    fn discard(&mut self, unit: Unit, count: usize) {
        if count > 0 {
            self.discarded += count;
            tracing::debug!(
                subject = unit.index,
                discarded = count,
                "production halted, discarding patches"
            );
        }
    }
}

struct Shared {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    /// Signalled whenever `next_push` advances or production stops.
    turn: Condvar,
    config: QueueConfig,
    num_subjects: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.turn.notify_all();
    }

    fn record_failure(&self, state: &mut State, index: usize, err: Error) {
        state.failed_subjects += 1;
        if !state.failed_since_success[index] {
            state.failed_since_success[index] = true;
            state.num_failed_since_success += 1;
        }

        match self.config.failure_policy {
            FailurePolicy::Skip => {
                tracing::warn!(subject = index, error = %err, "skipping subject");
                if state.num_failed_since_success == self.num_subjects && !state.halted {
                    state.halted = true;
                    state.failure = Some(Error::Exhausted(format!(
                        "all {} subjects failed",
                        self.num_subjects
                    )));
                }
            }
            FailurePolicy::Abort => {
                tracing::error!(subject = index, error = %err, "aborting patch production");
                if state.failure.is_none() {
                    state.failure = Some(Error::subject_failed(index, err));
                }
                state.halted = true;
            }
        }

        if state.halted {
            self.wake_all();
        }
    }

    /// Hand a finished unit over once every earlier unit has been handed
    /// over. Returns `false` when the producer should stop.
    fn complete(&self, unit: Unit, result: Result<Vec<Patch>>) -> bool {
        let mut state = self.lock();
        if state.next_push != unit.ticket && !state.halted {
            state.blocked_producers += 1;
            while state.next_push != unit.ticket && !state.halted {
                state = self.turn.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            state.blocked_producers -= 1;
        }

        let keep_going = if state.halted {
            let count = result.map_or(0, |patches| patches.len());
            state.discard(unit, count);
            false
        } else {
            match result {
                Ok(patches) => {
                    state.record_success();
                    state = self.push_in_turn(state, patches);
                }
                Err(err) => self.record_failure(&mut state, unit.index, err),
            }
            !state.closed && !state.halted
        };

        state.next_push = state.next_push.max(unit.ticket + 1);
        drop(state);
        self.turn.notify_all();
        keep_going
    }

    /// Push patches one at a time, waiting for room. Once the queue is
    /// closed the rest of the unit goes to `pending` for the consumer to
    /// drain.
    fn push_in_turn<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        patches: Vec<Patch>,
    ) -> MutexGuard<'a, State> {
        let capacity = self.config.capacity;
        for patch in patches {
            if state.buffer.len() >= capacity && !state.closed {
                state.blocked_producers += 1;
                while state.buffer.len() >= capacity && !state.closed {
                    state = self
                        .not_full
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                state.blocked_producers -= 1;
            }
            if state.buffer.len() < capacity && state.pending.is_empty() {
                state.buffer.push_back(patch);
                state.produced += 1;
                self.not_empty.notify_one();
            } else {
                state.pending.push_back(patch);
            }
        }
        state
    }
}

/// Loads subjects and draws patches from them.
struct Producer {
    source: Arc<dyn SubjectSource>,
    sampler: Arc<dyn PatchSampler>,
}

impl Producer {
    /// Draw the patches of one unit. A panic in the source, a transform or
    /// the sampler is reported as [`Error::ProducerPanicked`].
    fn produce(&self, unit: Unit, config: &QueueConfig) -> Result<Vec<Patch>> {
        let draw = || -> Result<Vec<Patch>> {
            let mut rng = get_rng(config.unit_seed(unit.pass, unit.index));
            let subject = self.source.subject(unit.index)?;
            let mut patches = self
                .sampler
                .sample(&subject, config.samples_per_volume, &mut rng)?;
            if config.shuffle_patches {
                patches.shuffle(&mut rng);
            }
            Ok(patches)
        };
        panic::catch_unwind(AssertUnwindSafe(draw))
            .unwrap_or_else(|payload| Err(Error::ProducerPanicked(panic_message(payload.as_ref()))))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Marks a producer thread as finished even if it unwinds, halting
/// production when it does so no other producer waits on its turn.
struct ActiveGuard(Arc<Shared>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.active_producers -= 1;
        if thread::panicking() && !state.halted {
            tracing::error!("producer thread panicked, halting patch production");
            state.halted = true;
            if state.failure.is_none() {
                state.failure = Some(Error::ProducerPanicked(
                    "producer thread unwound outside a unit".to_string(),
                ));
            }
        }
        drop(state);
        self.0.wake_all();
    }
}

fn run_producer(shared: Arc<Shared>, producer: Producer, id: usize) {
    let _guard = ActiveGuard(Arc::clone(&shared));
    tracing::debug!(worker = id, "producer started");

    loop {
        let unit = {
            let mut state = shared.lock();
            if state.closed || state.halted {
                break;
            }
            match state.next_unit(shared.num_subjects, &shared.config) {
                Some(unit) => unit,
                None => break,
            }
        };

        let result = producer.produce(unit, &shared.config);
        if !shared.complete(unit, result) {
            break;
        }
    }

    tracing::debug!(worker = id, "producer stopped");
}

/// Fill the buffer on the consumer thread, keeping overflow in `pending`.
fn refill_sync<'a>(
    shared: &'a Shared,
    mut state: MutexGuard<'a, State>,
    producer: &Producer,
) -> MutexGuard<'a, State> {
    let capacity = shared.config.capacity;
    while state.buffer.len() < capacity {
        let Some(patch) = state.pending.pop_front() else {
            break;
        };
        state.buffer.push_back(patch);
        state.produced += 1;
    }

    while state.buffer.len() < capacity && !state.halted {
        let Some(unit) = state.next_unit(shared.num_subjects, &shared.config) else {
            break;
        };
        match producer.produce(unit, &shared.config) {
            Ok(patches) => {
                state.record_success();
                for patch in patches {
                    if state.buffer.len() < capacity {
                        state.buffer.push_back(patch);
                        state.produced += 1;
                    } else {
                        state.pending.push_back(patch);
                    }
                }
            }
            Err(err) => shared.record_failure(&mut state, unit.index, err),
        }
        state.next_push = unit.ticket + 1;
    }
    state
}


/// Bounded buffer of training patches, refilled concurrently.
///
/// Dropping the queue closes it and joins its producer threads.
pub struct PatchQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    /// Present only when producing on the consumer thread.
    producer: Option<Producer>,
    /// Error held back by `next_batch` to return on the following call.
    deferred: Option<Error>,
    patch_shape: [usize; 3],
}

impl PatchQueue {
    /// Validate `config` and start producing.
    pub fn new<S, P>(source: S, sampler: P, config: QueueConfig) -> Result<Self>
    where
        S: SubjectSource + 'static,
        P: PatchSampler + 'static,
    {
        config.validate()?;
        let num_subjects = source.len();
        if num_subjects == 0 {
            return Err(Error::InvalidConfiguration(
                "subject source is empty".to_string(),
            ));
        }

        let source: Arc<dyn SubjectSource> = Arc::new(source);
        let sampler: Arc<dyn PatchSampler> = Arc::new(sampler);
        let patch_shape = sampler.patch_shape();
        let num_workers = config.num_workers;
        let state = State::new(get_rng(config.seed), config.capacity, num_subjects);

        let mut queue = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                turn: Condvar::new(),
                config,
                num_subjects,
            }),
            workers: Vec::with_capacity(num_workers),
            producer: None,
            deferred: None,
            patch_shape,
        };

        if num_workers == 0 {
            queue.producer = Some(Producer { source, sampler });
        } else {
            for id in 0..num_workers {
                let producer = Producer {
                    source: Arc::clone(&source),
                    sampler: Arc::clone(&sampler),
                };
                let shared = Arc::clone(&queue.shared);
                shared.lock().active_producers += 1;
                let spawned = thread::Builder::new()
                    .name(format!("medpatch-producer-{id}"))
                    .spawn(move || run_producer(shared, producer, id));
                match spawned {
                    Ok(handle) => queue.workers.push(handle),
                    Err(err) => {
                        queue.shared.lock().active_producers -= 1;
                        return Err(err.into());
                    }
                }
            }
        }

        tracing::info!(
            subjects = num_subjects,
            workers = num_workers,
            capacity = queue.shared.config.capacity,
            samples_per_volume = queue.shared.config.samples_per_volume,
            "patch queue started"
        );
        Ok(queue)
    }

    /// Next patch, blocking until one is available.
    ///
    /// Fails with [`Error::QueueClosed`] once the queue is closed and
    /// drained, with [`Error::Exhausted`] once `max_passes` have been
    /// consumed, and with [`Error::SubjectFailed`] after an aborting failure
    /// once the patches of every unit drawn before it have been consumed.
    /// Nothing drawn after a failing unit is ever buffered, so the stream
    /// does not resume after the error.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Patch> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let shared = &*self.shared;
        let mut state = shared.lock();
        loop {
            if let Some(patch) = state.buffer.pop_front() {
                state.consumed += 1;
                shared.not_full.notify_one();
                return Ok(patch);
            }
            if state.closed {
                return match state.pending.pop_front() {
                    Some(patch) => {
                        state.produced += 1;
                        state.consumed += 1;
                        Ok(patch)
                    }
                    None => Err(Error::QueueClosed),
                };
            }
            if state.pending.is_empty() {
                if let Some(err) = state.failure.take() {
                    return Err(err);
                }
            }
            if state.production_finished() {
                return Err(Error::Exhausted(if state.halted {
                    "patch production stopped".to_string()
                } else {
                    format!("all {} passes consumed", state.passes_started)
                }));
            }
            state = match self.producer.as_ref() {
                Some(producer) => refill_sync(shared, state, producer),
                None => shared
                    .not_empty
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Up to `batch_size` patches.
    ///
    /// The batch is short only when the queue ends; the error that ended it
    /// is returned by the following call.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<PatchBatch> {
        validate_batch_size(batch_size)?;
        let mut batch = PatchBatch::with_capacity(batch_size);
        while batch.len() < batch_size {
            match self.next() {
                Ok(patch) => batch.push(patch),
                Err(err) if batch.is_empty() => return Err(err),
                Err(err) => {
                    if !err.is_terminal() {
                        self.deferred = Some(err);
                    }
                    break;
                }
            }
        }
        Ok(batch)
    }

    /// Iterate over batches of the given size.
    pub fn batches(self, batch_size: usize) -> Result<Batches> {
        validate_batch_size(batch_size)?;
        Ok(Batches {
            queue: self,
            batch_size,
        })
    }

    /// Stop producing and join producer threads.
    ///
    /// Producers finish the unit they are working on and stop. Buffered
    /// patches and those finished units stay available in pool order; `next`
    /// returns [`Error::QueueClosed`] once they are drained. Calling `close`
    /// again does nothing.
    pub fn close(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.wake_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("producer thread panicked");
            }
        }
        self.producer = None;

        let stats = self.stats();
        tracing::info!(
            produced = stats.produced,
            consumed = stats.consumed,
            unbuffered = self.shared.lock().pending.len(),
            "patch queue closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of buffered patches.
    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered patches.
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Patch shape being extracted.
    pub fn patch_shape(&self) -> [usize; 3] {
        self.patch_shape
    }

    /// Number of subjects in the source.
    pub fn num_subjects(&self) -> usize {
        self.shared.num_subjects
    }

    /// Patches produced per pass over all subjects.
    pub fn iterations_per_pass(&self) -> usize {
        self.shared.num_subjects * self.shared.config.samples_per_volume
    }

    /// Upper bound on memory held in patches for subjects shaped like `subject`.
    ///
    /// Counts the full buffer plus one finished unit of patches per
    /// producer waiting to push it.
    pub fn max_memory_bytes(&self, subject: &Subject) -> usize {
        let voxels: usize = self.patch_shape.iter().product();
        let patch_bytes: usize = subject
            .iter()
            .map(|(_, volume)| volume.num_channels() * voxels * std::mem::size_of::<f32>())
            .sum();
        let config = &self.shared.config;
        let held = config.capacity + config.num_workers.max(1) * config.samples_per_volume;
        held * patch_bytes
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock();
        QueueStats {
            buffered: state.buffer.len(),
            capacity: self.shared.config.capacity,
            passes_started: state.passes_started,
            produced: state.produced,
            consumed: state.consumed,
            failed_subjects: state.failed_subjects,
            discarded: state.discarded,
            blocked_producers: state.blocked_producers,
            active_producers: state.active_producers,
        }
    }
}

fn validate_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::InvalidConfiguration(
            "batch size must be positive".to_string(),
        ));
    }
    Ok(())
}

impl Drop for PatchQueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl Iterator for PatchQueue {
    type Item = Result<Patch>;

    /// Ends when the queue is closed or exhausted.
    fn next(&mut self) -> Option<Self::Item> {
        match PatchQueue::next(self) {
            Ok(patch) => Some(Ok(patch)),
            Err(err) if err.is_terminal() => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// Iterator over batches from a [`PatchQueue`].
pub struct Batches {
    queue: PatchQueue,
    batch_size: usize,
}

impl Batches {
    /// The underlying queue.
    pub fn queue(&self) -> &PatchQueue {
        &self.queue
    }
}

impl Iterator for Batches {
    type Item = Result<PatchBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.queue.next_batch(self.batch_size) {
            Ok(batch) => Some(Ok(batch)),
            Err(err) if err.is_terminal() => None,
            Err(err) => Some(Err(err)),
        }
    }
}
