//! Running the transform over every block.
//!
//! Direct dispatch reads, computes and writes on the calling thread, with
//! optional read-ahead threads. Distributed dispatch runs compute workers as
//! scoped threads or child processes; they publish outputs into a bounded
//! buffer that the calling thread drains into the [`OutputWriter`]. Worker
//! errors travel on their own channel and stop the run.

use crate::associations::BlockAssociations;
use crate::buffer::{block_buffer, BufferConsumer, BufferProducer, CancelToken};
use crate::chunking::BlockDefn;
use crate::config::{ComputeKind, ConcurrencyStyle};
use crate::error::{BlockError, Result};
use crate::reader::{InputPlan, InputReader};
use crate::subprocess::WorkerProcess;
use crate::transform::{BlockInfo, BlockTransform, RunInfo};
use crate::writer::OutputWriter;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::thread::{self, Scope, ScopedJoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    NotStarted,
    /// Blocks are being handed out.
    Dispatching,
    /// Every block has been handed out; waiting for the last outputs.
    Draining,
    Finished,
    Failed,
}

impl DispatchState {
    fn name(self) -> &'static str {
        match self {
            DispatchState::NotStarted => "NotStarted",
            DispatchState::Dispatching => "Dispatching",
            DispatchState::Draining => "Draining",
            DispatchState::Finished => "Finished",
            DispatchState::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Finished | DispatchState::Failed)
    }

    pub fn can_advance_to(self, next: DispatchState) -> bool {
        use DispatchState::*;
        match (self, next) {
            (NotStarted, Dispatching) | (Dispatching, Draining) | (Draining, Finished) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn advance(&mut self, next: DispatchState) -> Result<()> {
        if !self.can_advance_to(next) {
            return Err(BlockError::IllegalTransition {
                from: self.name(),
                to: next.name(),
            });
        }
        debug!("Dispatch {} -> {}", self.name(), next.name());
        *self = next;
        Ok(())
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A worker's error on its way to the control loop.
#[derive(Debug)]
pub struct WorkerFailure {
    pub worker: String,
    pub error: BlockError,
}

impl From<WorkerFailure> for BlockError {
    fn from(failure: WorkerFailure) -> Self {
        BlockError::Worker {
            worker: failure.worker,
            source: Box::new(failure.error),
        }
    }
}

type BlockItem = (usize, BlockDefn, BlockAssociations);

/// Holds items that arrive ahead of their turn when order matters.
struct WriteQueue<T> {
    ordered: bool,
    next: usize,
    held: BTreeMap<usize, T>,
}

impl<T> WriteQueue<T> {
    fn new(ordered: bool) -> Self {
        Self {
            ordered,
            next: 0,
            held: BTreeMap::new(),
        }
    }

    fn push(&mut self, index: usize, item: T, mut write: impl FnMut(T) -> Result<()>) -> Result<()> {
        if !self.ordered {
            return write(item);
        }
        self.held.insert(index, item);
        while let Some(item) = self.held.remove(&self.next) {
            write(item)?;
            self.next += 1;
        }
        if !self.held.is_empty() {
            debug!("Holding {} blocks until block {} arrives", self.held.len(), self.next);
        }
        Ok(())
    }
}

fn compute_block(
    transform: &dyn BlockTransform,
    run: &RunInfo,
    index: usize,
    block: BlockDefn,
    inputs: &BlockAssociations,
) -> Result<BlockAssociations> {
    let info = BlockInfo::new(run, index, block);
    let mut outputs = BlockAssociations::new();
    transform.apply(&info, inputs, &mut outputs)?;
    Ok(outputs)
}

/// Queue holding every block index, for workers to take from.
fn task_queue(total: usize) -> Receiver<usize> {
    let (sender, receiver) = unbounded();
    for index in 0..total {
        // Receiver is alive, send cannot fail
        let _ = sender.send(index);
    }
    receiver
}

/// Where a compute worker gets its next block from.
enum BlockSource<'a> {
    /// Take an index and read the block itself.
    Tasks {
        tasks: Receiver<usize>,
        reader: InputReader<'a>,
        blocks: &'a [BlockDefn],
        margin: usize,
    },
    /// Blocks already read by the read workers.
    Buffer(BufferConsumer<BlockItem>),
}

impl BlockSource<'_> {
    fn next(&mut self, cancel: &CancelToken) -> Result<Option<BlockItem>> {
        cancel.check()?;
        match self {
            BlockSource::Tasks {
                tasks,
                reader,
                blocks,
                margin,
            } => {
                let Ok(index) = tasks.try_recv() else {
                    return Ok(None);
                };
                let block = blocks[index];
                let inputs = reader.read_block(&block, *margin)?;
                Ok(Some((index, block, inputs)))
            }
            BlockSource::Buffer(consumer) => consumer.pop(),
        }
    }
}

/// The transform, in this process or in a child.
enum Backend<'a> {
    Thread {
        transform: &'a dyn BlockTransform,
        run: &'a RunInfo,
    },
    Process(WorkerProcess),
}

impl Backend<'_> {
    fn compute(&mut self, index: usize, block: BlockDefn, inputs: BlockAssociations) -> Result<BlockAssociations> {
        match self {
            Backend::Thread { transform, run } => compute_block(*transform, run, index, block, &inputs),
            Backend::Process(process) => process.compute(index, block, inputs),
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            Backend::Thread { .. } => Ok(()),
            Backend::Process(process) => process.shutdown(),
        }
    }
}

fn spawn_worker<'scope, F>(
    scope: &'scope Scope<'scope, '_>,
    name: String,
    failures: Sender<WorkerFailure>,
    body: F,
) -> Result<(String, ScopedJoinHandle<'scope, ()>)>
where
    F: FnOnce() -> Result<()> + Send + 'scope,
{
    let worker = name.clone();
    let handle = thread::Builder::new().name(name.clone()).spawn_scoped(scope, move || match body() {
        Ok(()) => debug!("{} done", worker),
        Err(BlockError::Cancelled) => debug!("{} cancelled", worker),
        Err(error) => {
            let _ = failures.send(WorkerFailure { worker, error });
        }
    })?;
    Ok((name, handle))
}

fn read_worker(
    tasks: Receiver<usize>,
    blocks: &[BlockDefn],
    plans: &[InputPlan],
    margin: usize,
    producer: BufferProducer<BlockItem>,
    cancel: &CancelToken,
) -> Result<()> {
    let mut reader = InputReader::new(plans);
    while let Ok(index) = tasks.try_recv() {
        cancel.check()?;
        let block = blocks[index];
        let inputs = reader.read_block(&block, margin)?;
        producer.insert((index, block, inputs))?;
    }
    Ok(())
}

fn compute_worker(
    mut source: BlockSource,
    mut backend: Backend,
    producer: BufferProducer<BlockItem>,
    cancel: &CancelToken,
) -> Result<()> {
    let mut computed = 0;
    while let Some((index, block, inputs)) = source.next(cancel)? {
        let outputs = backend.compute(index, block, inputs)?;
        producer.insert((index, block, outputs))?;
        computed += 1;
    }
    debug!("{} blocks computed", computed);
    backend.finish()
}

/// Join every worker; the first panic, if any, names the worker.
fn join_workers(handles: Vec<(String, ScopedJoinHandle<'_, ()>)>) -> Result<()> {
    let mut panicked = None;
    for (name, handle) in handles {
        if handle.join().is_err() && panicked.is_none() {
            panicked = Some(name);
        }
    }
    match panicked {
        Some(name) => Err(BlockError::WorkerPanicked(name)),
        None => Ok(()),
    }
}

pub struct Dispatcher<'a> {
    transform: &'a dyn BlockTransform,
    run: &'a RunInfo,
    blocks: &'a [BlockDefn],
    plans: &'a [InputPlan],
    style: &'a ConcurrencyStyle,
    state: DispatchState,
    cancel: CancelToken,
}

impl<'a> Dispatcher<'a> {
    /// `transform` is not called when compute workers are child processes;
    /// the child runs its own.
    pub fn new(
        transform: &'a dyn BlockTransform,
        run: &'a RunInfo,
        blocks: &'a [BlockDefn],
        plans: &'a [InputPlan],
        style: &'a ConcurrencyStyle,
    ) -> Self {
        Self {
            transform,
            run,
            blocks,
            plans,
            style,
            state: DispatchState::NotStarted,
            cancel: CancelToken::new(),
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Cancelling stops the run at the next block boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Process every block; the writer finalizes its outputs after the last.
    pub fn run(&mut self, writer: &mut OutputWriter) -> Result<()> {
        self.state.advance(DispatchState::Dispatching)?;
        let style = self.style;
        info!(
            "Dispatching {} blocks: {} compute workers ({}), {} read workers",
            self.blocks.len(),
            style.compute_workers,
            match style.compute_kind {
                ComputeKind::Threads => "threads",
                ComputeKind::Subprocess { .. } => "subprocesses",
            },
            style.read_workers
        );

        let result = if style.is_direct() && style.read_workers == 0 {
            self.run_direct(writer)
        } else {
            self.run_concurrent(writer)
        };

        match result {
            Ok(()) if writer.is_finished() => {
                if self.state == DispatchState::Dispatching {
                    self.state.advance(DispatchState::Draining)?;
                }
                self.state.advance(DispatchState::Finished)
            }
            Ok(()) => {
                self.state = DispatchState::Failed;
                Err(BlockError::Protocol(format!(
                    "workers stopped after {} of {} blocks",
                    writer.blocks_written(),
                    self.blocks.len()
                )))
            }
            Err(e) => {
                self.cancel.cancel();
                self.state = DispatchState::Failed;
                Err(e)
            }
        }
    }

    fn run_direct(&mut self, writer: &mut OutputWriter) -> Result<()> {
        let mut reader = InputReader::new(self.plans);
        for (index, block) in self.blocks.iter().enumerate() {
            self.cancel.check()?;
            if index + 1 == self.blocks.len() {
                self.state.advance(DispatchState::Draining)?;
            }
            let inputs = reader.read_block(block, self.run.margin)?;
            let outputs = compute_block(self.transform, self.run, index, *block, &inputs)?;
            writer.write_block(block, outputs)?;
        }
        Ok(())
    }

    /// Read workers and/or compute workers on scoped threads; the calling
    /// thread computes only when there are no compute workers.
    fn run_concurrent(&mut self, writer: &mut OutputWriter) -> Result<()> {
        let (transform, run, blocks, plans, style) = (self.transform, self.run, self.blocks, self.plans, self.style);
        let cancel = &self.cancel;
        let state = &mut self.state;
        let capacity = style.buffer_capacity();
        let tasks = task_queue(blocks.len());
        let (failure_tx, failure_rx) = unbounded::<WorkerFailure>();

        thread::scope(|scope| {
            let mut handles = Vec::new();
            let spawned = (|| -> Result<BufferConsumer<BlockItem>> {
                let read_buffer = (style.read_workers > 0).then(|| {
                    block_buffer::<BlockItem>("input", capacity, style.insert_timeout, style.pop_timeout, cancel)
                });
                if let Some((producer, _)) = &read_buffer {
                    for n in 0..style.read_workers {
                        let (tasks, producer) = (tasks.clone(), producer.clone());
                        handles.push(spawn_worker(scope, format!("read-worker-{}", n), failure_tx.clone(), move || {
                            read_worker(tasks, blocks, plans, run.margin, producer, cancel)
                        })?);
                    }
                }

                if style.is_direct() {
                    // The calling thread computes from the read-ahead buffer
                    return read_buffer
                        .map(|(_, consumer)| consumer)
                        .ok_or_else(|| BlockError::InvalidConfig("no read workers".to_string()));
                }

                let (out_producer, out_consumer) =
                    block_buffer::<BlockItem>("output", capacity, style.insert_timeout, style.pop_timeout, cancel);
                for n in 0..style.compute_workers {
                    let name = format!("compute-worker-{}", n);
                    let buffered = read_buffer.as_ref().map(|(_, consumer)| consumer.clone());
                    let tasks = tasks.clone();
                    let producer = out_producer.clone();
                    let worker_name = name.clone();
                    let compute_kind = &style.compute_kind;
                    handles.push(spawn_worker(scope, name, failure_tx.clone(), move || {
                        // Datasets are opened on the thread that reads them
                        let source = match buffered {
                            Some(consumer) => BlockSource::Buffer(consumer),
                            None => BlockSource::Tasks {
                                tasks,
                                reader: InputReader::new(plans),
                                blocks,
                                margin: run.margin,
                            },
                        };
                        let backend = match compute_kind {
                            ComputeKind::Threads => Backend::Thread { transform, run },
                            ComputeKind::Subprocess { program, args } => {
                                Backend::Process(WorkerProcess::spawn(&worker_name, Path::new(program), args, run)?)
                            }
                        };
                        compute_worker(source, backend, producer, cancel)
                    })?);
                }
                Ok(out_consumer)
            })();

            // Only workers hold senders from here on
            drop(failure_tx);

            let result = spawned.and_then(|consumer| {
                let computes_here = style.is_direct();
                let mut queue = WriteQueue::new(style.ordered_writes || computes_here);
                loop {
                    if *state == DispatchState::Dispatching && tasks.is_empty() {
                        state.advance(DispatchState::Draining)?;
                    }
                    if writer.is_finished() {
                        return Ok(());
                    }
                    select! {
                        recv(failure_rx) -> failure => {
                            if let Ok(failure) = failure {
                                return Err(failure.into());
                            }
                        },
                        recv(consumer.receiver()) -> item => {
                            let Ok((index, block, arrays)) = item else {
                                // Every worker has exited
                                return match failure_rx.try_recv() {
                                    Ok(failure) => Err(failure.into()),
                                    Err(_) => Ok(()),
                                };
                            };
                            let outputs = if computes_here {
                                compute_block(transform, run, index, block, &arrays)?
                            } else {
                                arrays
                            };
                            queue.push(index, (block, outputs), |(block, outputs)| writer.write_block(&block, outputs))?;
                        },
                        default(consumer.timeout()) => return Err(consumer.timed_out()),
                    }
                }
            });

            if result.is_err() {
                cancel.cancel();
            }
            let joined = join_workers(handles);
            match (result, joined) {
                (Err(e @ BlockError::Worker { .. }), _) => Err(e),
                (_, Err(panicked)) => Err(panicked),
                (result, Ok(())) => result,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = DispatchState::NotStarted;
        assert!(state.advance(DispatchState::Draining).is_err());
        state.advance(DispatchState::Dispatching).unwrap();
        state.advance(DispatchState::Draining).unwrap();
        state.advance(DispatchState::Finished).unwrap();
        assert!(state.is_terminal());
        assert!(matches!(
            state.advance(DispatchState::Failed),
            Err(BlockError::IllegalTransition {
                from: "Finished",
                to: "Failed"
            })
        ));
    }

    #[test]
    fn test_failed_reachable_from_every_running_state() {
        for from in [
            DispatchState::NotStarted,
            DispatchState::Dispatching,
            DispatchState::Draining,
        ] {
            assert!(from.can_advance_to(DispatchState::Failed), "{}", from);
        }
        assert!(!DispatchState::Failed.can_advance_to(DispatchState::Failed));
        assert!(!DispatchState::Dispatching.can_advance_to(DispatchState::Finished));
    }

    #[test]
    fn test_write_queue_holds_early_blocks() {
        let mut queue = WriteQueue::new(true);
        let mut written = Vec::new();
        for index in [2, 0, 3, 1] {
            queue
                .push(index, index * 10, |item| {
                    written.push(item);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(written, vec![0, 10, 20, 30]);
        assert!(queue.held.is_empty());
    }

    #[test]
    fn test_write_queue_unordered_passes_through() {
        let mut queue = WriteQueue::new(false);
        let mut written = Vec::new();
        for index in [2, 0, 1] {
            queue
                .push(index, index, |item| {
                    written.push(item);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(written, vec![2, 0, 1]);
    }

    #[test]
    fn test_task_queue_yields_every_index_once() {
        let tasks = task_queue(5);
        let mut seen: Vec<usize> = tasks.try_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(tasks.try_recv().is_err());
    }
}
