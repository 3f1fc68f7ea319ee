//! Single-threaded event loop.
//!
//! An [`EventLoop`] owns one worker thread (started lazily on the first
//! submission) and serializes everything that runs on it: plain tasks
//! submitted with [`execute`](EventLoop::execute), scheduled and periodic
//! tasks, and the channel operations dispatched to it. All per-channel
//! state is only ever touched from the loop's thread; cross-thread callers
//! communicate with the loop exclusively through its task queue.
//!
//! The worker blocks on the queue with a timeout derived from the earliest
//! scheduled deadline. Submitting from another thread wakes it; a dedicated
//! wake message is used where no task should run (shutdown, cancellation).
//! Spurious wakes are tolerated.
//!
//! Shutdown is orderly: [`shutdown`](EventLoop::shutdown) stops accepting
//! new work, but every task accepted before it still runs. Once the queue
//! drains, the builder-supplied cleanup hook runs exactly once on the
//! worker, after which the loop reports itself terminated.

use std::collections::{BinaryHeap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use core_affinity::CoreId;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{error, trace};

use crate::completion::Completion;
use crate::error::{Error, Result};
use crate::misuse::MisuseDetector;

static EVENT_LOOP_INSTANCES: MisuseDetector = MisuseDetector::new("EventLoop");

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

type Task = Box<dyn FnOnce() + Send + 'static>;
type PeriodicFn = Box<dyn FnMut() + Send + 'static>;
type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Task(Task),
    Schedule(ScheduledEntry),
    Wake,
}

enum TaskFn {
    Once(Option<Task>),
    Periodic(PeriodicFn),
}

#[derive(Clone, Copy)]
enum ScheduleKind {
    Once,
    /// Deadlines advance by a fixed period from the original start; a
    /// lagging worker fires missed deadlines back-to-back, never skipping.
    FixedRate { period: Duration },
    /// The next deadline is measured from the completion of the previous
    /// firing.
    FixedDelay { delay: Duration },
}

struct ScheduledEntry {
    deadline: Instant,
    seq: u64,
    kind: ScheduleKind,
    task: TaskFn,
    handle: ScheduledHandle,
}

// BinaryHeap is a max-heap; order entries so the earliest deadline (then
// the lowest sequence number) is the greatest element.
impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

/// Cancellable handle to a scheduled task.
///
/// For one-shot tasks the embedded [`Completion`] succeeds after the task
/// has run; for periodic tasks it stays pending until the task is
/// cancelled, at which point it fails with [`Error::Cancelled`].
#[derive(Clone)]
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
    completion: Completion,
    wake: Sender<Message>,
}

impl ScheduledHandle {
    fn new(wake: Sender<Message>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            completion: Completion::new(),
            wake,
        }
    }

    /// Suppresses all future firings. A firing already executing runs to
    /// completion; the worker is woken so it re-evaluates its deadlines
    /// immediately. Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.completion.try_failure(Error::Cancelled);
            let _ = self.wake.send(Message::Wake);
        }
        first
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// The completion token tied to this scheduled task.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }
}

struct Lifecycle {
    started: bool,
    shutdown: bool,
    terminated: bool,
    rx: Option<Receiver<Message>>,
    cleanup: Option<CleanupFn>,
    name: String,
    core_id: Option<CoreId>,
}

struct Shared {
    id: u64,
    lifecycle: Mutex<Lifecycle>,
    cond: Condvar,
    shutdown_flag: AtomicBool,
    terminated_flag: AtomicBool,
    worker_thread: OnceLock<thread::ThreadId>,
    next_seq: AtomicU64,
}

/// Configures and creates an [`EventLoop`].
///
/// ```
/// use gyre::EventLoopBuilder;
///
/// let event_loop = EventLoopBuilder::new()
///     .name("io-loop")
///     .build();
/// event_loop.execute(|| println!("running on the loop")).unwrap();
/// event_loop.shutdown();
/// ```
pub struct EventLoopBuilder {
    name: String,
    core_id: Option<CoreId>,
    cleanup: Option<CleanupFn>,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoopBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            name: "gyre-loop".to_string(),
            core_id: None,
            cleanup: None,
        }
    }

    /// Names the worker thread.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Pins the worker thread to a CPU core.
    pub fn core_id(mut self, core_id: CoreId) -> Self {
        self.core_id = Some(core_id);
        self
    }

    /// Installs a cleanup hook that runs exactly once on the worker thread
    /// after the task queue drains, before the loop reports termination.
    pub fn cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Builds the event loop. The worker thread is not started until the
    /// first task is submitted.
    pub fn build(self) -> EventLoop {
        let (tx, rx) = unbounded();
        EVENT_LOOP_INSTANCES.increase();
        EventLoop {
            tx,
            shared: Arc::new(Shared {
                id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
                lifecycle: Mutex::new(Lifecycle {
                    started: false,
                    shutdown: false,
                    terminated: false,
                    rx: Some(rx),
                    cleanup: self.cleanup,
                    name: self.name,
                    core_id: self.core_id,
                }),
                cond: Condvar::new(),
                shutdown_flag: AtomicBool::new(false),
                terminated_flag: AtomicBool::new(false),
                worker_thread: OnceLock::new(),
                next_seq: AtomicU64::new(0),
            }),
        }
    }
}

/// A single-threaded task executor with deadline scheduling.
///
/// Cloning an `EventLoop` yields another handle to the same loop. The
/// worker holds no handle to its own queue: if every handle (including
/// scheduled-task handles) is dropped without a shutdown, the worker
/// drains what is left, runs cleanup, and exits.
#[derive(Clone)]
pub struct EventLoop {
    tx: Sender<Message>,
    shared: Arc<Shared>,
}

impl EventLoop {
    /// Creates an event loop with default settings.
    pub fn new() -> Self {
        EventLoopBuilder::new().build()
    }

    /// Identifier of this loop, unique within the process.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Returns `true` iff the calling thread is this loop's worker.
    pub fn in_event_loop(&self) -> bool {
        self.shared.worker_thread.get() == Some(&thread::current().id())
    }

    /// Enqueues `task` for execution on the worker thread. The task is
    /// never run inline, even when submitted from the worker itself, so
    /// FIFO ordering with earlier submissions is preserved.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        self.submit(Message::Task(Box::new(task)))
    }

    /// Schedules `task` to run once, no earlier than `delay` from now.
    pub fn schedule(
        &self,
        task: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> Result<ScheduledHandle> {
        self.schedule_entry(
            TaskFn::Once(Some(Box::new(task))),
            delay,
            ScheduleKind::Once,
        )
    }

    /// Schedules `task` to run periodically with target deadlines
    /// `start + initial_delay + k * period`. When the worker lags, missed
    /// deadlines fire back-to-back until the schedule has caught up; no
    /// firing is skipped.
    pub fn schedule_at_fixed_rate(
        &self,
        task: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle> {
        self.schedule_entry(
            TaskFn::Periodic(Box::new(task)),
            initial_delay,
            ScheduleKind::FixedRate { period },
        )
    }

    /// Schedules `task` to run periodically, each deadline measured from
    /// the completion of the previous firing. Consecutive firings are
    /// therefore separated by at least `delay` plus the task's runtime.
    pub fn schedule_with_fixed_delay(
        &self,
        task: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledHandle> {
        self.schedule_entry(
            TaskFn::Periodic(Box::new(task)),
            initial_delay,
            ScheduleKind::FixedDelay { delay },
        )
    }

    fn schedule_entry(
        &self,
        task: TaskFn,
        initial_delay: Duration,
        kind: ScheduleKind,
    ) -> Result<ScheduledHandle> {
        let handle = ScheduledHandle::new(self.tx.clone());
        let entry = ScheduledEntry {
            deadline: Instant::now() + initial_delay,
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            kind,
            task,
            handle: handle.clone(),
        };
        self.submit(Message::Schedule(entry))?;
        Ok(handle)
    }

    fn submit(&self, msg: Message) -> Result<()> {
        let mut lifecycle = self.shared.lifecycle.lock().unwrap();
        if lifecycle.shutdown {
            return Err(Error::RejectedExecution);
        }
        if !lifecycle.started {
            self.start_worker(&mut lifecycle)?;
        }
        // Sending while the lifecycle lock is held orders every accepted
        // submission before a concurrent shutdown(): once the shutdown flag
        // is observed by the worker, the queue already contains this task.
        self.tx.send(msg).map_err(|_| Error::RejectedExecution)?;
        Ok(())
    }

    fn start_worker(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        let rx = lifecycle.rx.take().expect("worker already started");
        let cleanup = lifecycle.cleanup.take();
        let core_id = lifecycle.core_id;
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(lifecycle.name.clone())
            .spawn(move || run_worker(shared, rx, cleanup, core_id))
            .map_err(Error::Io)?;
        lifecycle.started = true;
        Ok(())
    }

    /// Requests shutdown. Already-submitted tasks still run; new
    /// submissions fail with [`Error::RejectedExecution`]. Scheduled tasks
    /// whose deadline has not arrived are cancelled. Idempotent.
    pub fn shutdown(&self) {
        let never_started = {
            let mut lifecycle = self.shared.lifecycle.lock().unwrap();
            if lifecycle.shutdown {
                return;
            }
            lifecycle.shutdown = true;
            self.shared.shutdown_flag.store(true, Ordering::Release);
            if !lifecycle.started {
                // The worker never ran and never will; run the cleanup hook
                // here and terminate immediately.
                let cleanup = lifecycle.cleanup.take();
                lifecycle.terminated = true;
                self.shared.terminated_flag.store(true, Ordering::Release);
                drop(lifecycle);
                run_cleanup(cleanup);
                EVENT_LOOP_INSTANCES.decrease();
                self.shared.cond.notify_all();
                return;
            }
            false
        };
        if !never_started {
            let _ = self.tx.send(Message::Wake);
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown_flag.load(Ordering::Acquire)
    }

    /// Whether the loop has fully terminated (queue drained, cleanup run).
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated_flag.load(Ordering::Acquire)
    }

    /// Blocks until the loop terminates or `timeout` elapses. Returns
    /// whether the loop is terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let lifecycle = self.shared.lifecycle.lock().unwrap();
        let (lifecycle, _) = self
            .shared
            .cond
            .wait_timeout_while(lifecycle, timeout, |l| !l.terminated)
            .unwrap();
        lifecycle.terminated
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.shared.id)
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

enum Ready {
    Task(Task),
    Scheduled(ScheduledEntry),
}

fn run_worker(
    shared: Arc<Shared>,
    rx: Receiver<Message>,
    cleanup: Option<CleanupFn>,
    core_id: Option<CoreId>,
) {
    if let Some(core_id) = core_id {
        if !core_affinity::set_for_current(core_id) {
            log::warn!("failed to pin event loop {} to {:?}", shared.id, core_id);
        }
    }
    let _ = shared.worker_thread.set(thread::current().id());
    trace!("event loop {} worker started", shared.id);

    let mut scheduled: BinaryHeap<ScheduledEntry> = BinaryHeap::new();
    let mut ready: VecDeque<Ready> = VecDeque::new();
    let mut disconnected = false;

    loop {
        let now = Instant::now();
        promote_due(&mut scheduled, &mut ready, now);

        if shared.shutdown_flag.load(Ordering::Acquire) || disconnected {
            while let Ok(msg) = rx.try_recv() {
                enqueue(msg, &mut ready, &mut scheduled);
            }
            promote_due(&mut scheduled, &mut ready, Instant::now());
            if ready.is_empty() {
                // Remaining entries are not yet due; suppress them.
                for entry in scheduled.drain() {
                    entry.handle.completion.try_failure(Error::Cancelled);
                }
                break;
            }
        }

        if ready.is_empty() {
            let received = match scheduled.peek() {
                Some(entry) => {
                    let wait = entry.deadline.saturating_duration_since(Instant::now());
                    rx.recv_timeout(wait)
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(msg) => enqueue(msg, &mut ready, &mut scheduled),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Every handle to this loop is gone; drain and stop.
                    disconnected = true;
                }
            }
            continue;
        }

        while let Ok(msg) = rx.try_recv() {
            enqueue(msg, &mut ready, &mut scheduled);
        }

        while let Some(item) = ready.pop_front() {
            match item {
                Ready::Task(task) => run_task(task),
                Ready::Scheduled(entry) => run_scheduled(entry, &mut scheduled),
            }
        }
    }

    run_cleanup(cleanup);
    {
        let mut lifecycle = shared.lifecycle.lock().unwrap();
        lifecycle.terminated = true;
    }
    shared.terminated_flag.store(true, Ordering::Release);
    EVENT_LOOP_INSTANCES.decrease();
    shared.cond.notify_all();
    trace!("event loop {} worker terminated", shared.id);
}

fn promote_due(scheduled: &mut BinaryHeap<ScheduledEntry>, ready: &mut VecDeque<Ready>, now: Instant) {
    while let Some(entry) = scheduled.peek() {
        if entry.deadline > now {
            break;
        }
        let entry = scheduled.pop().unwrap();
        ready.push_back(Ready::Scheduled(entry));
    }
}

fn enqueue(msg: Message, ready: &mut VecDeque<Ready>, scheduled: &mut BinaryHeap<ScheduledEntry>) {
    match msg {
        Message::Task(task) => ready.push_back(Ready::Task(task)),
        Message::Schedule(entry) => scheduled.push(entry),
        Message::Wake => {}
    }
}

fn run_task(task: Task) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
        error!("task panicked: {}", panic_message(&panic));
    }
}

fn run_scheduled(mut entry: ScheduledEntry, scheduled: &mut BinaryHeap<ScheduledEntry>) {
    if entry.handle.is_cancelled() {
        return;
    }
    match &mut entry.task {
        TaskFn::Once(task) => {
            if let Some(task) = task.take() {
                run_task(task);
            }
            entry.handle.completion.try_success();
        }
        TaskFn::Periodic(task) => {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task())) {
                error!("periodic task panicked: {}", panic_message(&panic));
            }
        }
    }
    match entry.kind {
        ScheduleKind::Once => {}
        ScheduleKind::FixedRate { period } => {
            if !entry.handle.is_cancelled() {
                entry.deadline += period;
                scheduled.push(entry);
            }
        }
        ScheduleKind::FixedDelay { delay } => {
            if !entry.handle.is_cancelled() {
                entry.deadline = Instant::now() + delay;
                scheduled.push(entry);
            }
        }
    }
}

fn run_cleanup(cleanup: Option<CleanupFn>) {
    if let Some(cleanup) = cleanup {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(cleanup)) {
            error!("event loop cleanup panicked: {}", panic_message(&panic));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn runs_tasks_on_the_worker_thread() {
        let event_loop = EventLoop::new();
        let (tx, rx) = mpsc::channel();
        let remote = event_loop.clone();
        event_loop
            .execute(move || {
                tx.send((thread::current().id(), remote.in_event_loop()))
                    .unwrap();
            })
            .unwrap();
        let (worker_id, in_loop) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(worker_id, thread::current().id());
        assert!(in_loop);
        assert!(!event_loop.in_event_loop());
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn preserves_fifo_order_for_a_single_submitter() {
        let event_loop = EventLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..64 {
            let order = Arc::clone(&order);
            event_loop
                .execute(move || order.lock().unwrap().push(i))
                .unwrap();
        }
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
        assert_eq!(*order.lock().unwrap(), (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn tasks_submitted_from_the_loop_are_not_run_inline() {
        let event_loop = EventLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let remote = event_loop.clone();
        let outer = Arc::clone(&order);
        event_loop
            .execute(move || {
                let inner = Arc::clone(&outer);
                remote.execute(move || inner.lock().unwrap().push("inner")).unwrap();
                outer.lock().unwrap().push("outer");
            })
            .unwrap();
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn rejects_submissions_after_shutdown() {
        let event_loop = EventLoop::new();
        event_loop.execute(|| {}).unwrap();
        event_loop.shutdown();
        assert!(matches!(
            event_loop.execute(|| {}),
            Err(Error::RejectedExecution)
        ));
        assert!(matches!(
            event_loop.schedule(|| {}, Duration::from_millis(1)),
            Err(Error::RejectedExecution)
        ));
        assert!(event_loop.await_termination(Duration::from_secs(5)));
        assert!(event_loop.is_shutdown());
        assert!(event_loop.is_terminated());
    }

    #[test]
    fn shutdown_before_first_use_terminates_and_cleans_up() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&cleaned);
        let event_loop = EventLoopBuilder::new()
            .cleanup(move || {
                n.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        event_loop.shutdown();
        event_loop.shutdown();
        assert!(event_loop.is_terminated());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_runs_exactly_once_after_drain() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&cleaned);
        let event_loop = EventLoopBuilder::new()
            .name("cleanup-loop")
            .cleanup(move || {
                n.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        for _ in 0..8 {
            let ran = Arc::clone(&ran);
            event_loop
                .execute(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 8);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_task_does_not_kill_the_worker() {
        let event_loop = EventLoop::new();
        let survived = Arc::new(AtomicBool::new(false));
        event_loop.execute(|| panic!("boom")).unwrap();
        let flag = Arc::clone(&survived);
        event_loop
            .execute(move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
        assert!(survived.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_one_shot_never_fires() {
        let event_loop = EventLoop::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = event_loop
            .schedule(
                move || flag.store(true, Ordering::SeqCst),
                Duration::from_millis(200),
            )
            .unwrap();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
        thread::sleep(Duration::from_millis(300));
        assert!(!fired.load(Ordering::SeqCst));
        assert!(matches!(
            handle.completion().cause().as_deref(),
            Some(Error::Cancelled)
        ));
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn one_shot_completion_succeeds_after_firing() {
        let event_loop = EventLoop::new();
        let handle = event_loop.schedule(|| {}, Duration::from_millis(10)).unwrap();
        handle.completion().wait();
        assert!(handle.completion().is_success());
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn pending_scheduled_tasks_are_cancelled_at_shutdown() {
        let event_loop = EventLoop::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = event_loop
            .schedule(
                move || flag.store(true, Ordering::SeqCst),
                Duration::from_secs(60),
            )
            .unwrap();
        event_loop.shutdown();
        assert!(event_loop.await_termination(Duration::from_secs(5)));
        assert!(!fired.load(Ordering::SeqCst));
        handle.completion().wait();
        assert!(matches!(
            handle.completion().cause().as_deref(),
            Some(Error::Cancelled)
        ));
    }
}
