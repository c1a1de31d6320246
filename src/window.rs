use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::coordinator::{FetchCoordinator, FetchState};
use crate::coverage::CoverageSet;
use crate::fetch::{PostWindow, WindowFetcher, WindowRequest, WindowSource};
use crate::index::{HintSide, PostIndexSpace, Slot, SlotBatch, SlotEntry};
use crate::reconcile::{ReconcileError, WindowReconciler};

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("discussion window is closed")]
    Closed,
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub page_limit: usize,
    pub fetch_workers: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            page_limit: 30,
            fetch_workers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    Slots(SlotBatch),
    FetchFailed { request: WindowRequest },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Skipped,
    Applied { updated: usize },
    Empty,
    Failed,
    Rejected,
}

enum Command {
    ShouldLoad {
        offset: usize,
        reply: Sender<bool>,
    },
    FinishLoad {
        offset: usize,
    },
    Pause,
    Resume,
    Load {
        request: WindowRequest,
        reply: Sender<LoadOutcome>,
    },
    Fetched {
        request: WindowRequest,
        window: PostWindow,
    },
    Apply {
        request: WindowRequest,
        window: PostWindow,
        reply: Sender<Result<SlotBatch, ReconcileError>>,
    },
    SlotVisible {
        index: usize,
        reply: Sender<Vec<usize>>,
    },
    Locate {
        number: u32,
        reply: Sender<Option<usize>>,
    },
    Snapshot {
        reply: Sender<PostIndexSpace>,
    },
    State {
        offset: usize,
        reply: Sender<FetchState>,
    },
    Shutdown,
}

struct Job {
    request: WindowRequest,
}

// Dropping the window stops the owner and the fetch workers.
pub struct DiscussionWindow {
    handle: WindowHandle,
    events: Receiver<WindowEvent>,
    stop: Sender<()>,
    owner: Option<thread::JoinHandle<()>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl DiscussionWindow {
    pub fn open(
        source: Arc<dyn WindowSource>,
        discussion_id: impl Into<String>,
        declared_count: usize,
        config: WindowConfig,
    ) -> Self {
        let discussion_id = discussion_id.into();
        let limit = config.page_limit.max(1);
        let workers = config.fetch_workers.max(1);
        info!(discussion = %discussion_id, declared_count, limit, workers, "opening discussion window");

        let fetcher = WindowFetcher::new(source, discussion_id, limit);
        let (command_tx, command_rx) = unbounded();
        let (job_tx, job_rx) = unbounded::<Job>();
        let (event_tx, event_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let mut worker_handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let stop = stop_rx.clone();
            let commands = command_tx.clone();
            let fetcher = fetcher.clone();
            worker_handles.push(thread::spawn(move || {
                fetch_worker(fetcher, jobs, stop, commands)
            }));
        }

        let owner = Owner {
            space: PostIndexSpace::with_placeholders(declared_count),
            coordinator: FetchCoordinator::new(),
            reconciler: WindowReconciler::new(limit),
            coverage: CoverageSet::new(),
            jobs: job_tx,
            events: event_tx,
            waiters: HashMap::new(),
            triggers: HashMap::new(),
        };
        let owner_handle = thread::spawn(move || owner.run(command_rx));

        Self {
            handle: WindowHandle {
                commands: command_tx,
                limit,
            },
            events: event_rx,
            stop: stop_tx,
            owner: Some(owner_handle),
            workers: worker_handles,
        }
    }

    pub fn handle(&self) -> WindowHandle {
        self.handle.clone()
    }

    pub fn events(&self) -> Receiver<WindowEvent> {
        self.events.clone()
    }

    fn shutdown(&mut self) {
        let _ = self.handle.commands.send(Command::Shutdown);
        for _ in &self.workers {
            let _ = self.stop.send(());
        }
        while let Some(handle) = self.workers.pop() {
            let _ = handle.join();
        }
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
    }
}

impl std::ops::Deref for DiscussionWindow {
    type Target = WindowHandle;

    fn deref(&self) -> &WindowHandle {
        &self.handle
    }
}

impl Drop for DiscussionWindow {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct WindowHandle {
    commands: Sender<Command>,
    limit: usize,
}

impl WindowHandle {
    pub fn page_limit(&self) -> usize {
        self.limit
    }

    pub fn should_load(&self, offset: usize) -> Result<bool, WindowError> {
        self.call(|reply| Command::ShouldLoad { offset, reply })
    }

    pub fn finish_load(&self, offset: usize) -> Result<(), WindowError> {
        self.send(Command::FinishLoad { offset })
    }

    pub fn pause(&self) -> Result<(), WindowError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), WindowError> {
        self.send(Command::Resume)
    }

    pub fn load(&self, request: WindowRequest) -> Result<LoadOutcome, WindowError> {
        self.call(|reply| Command::Load { request, reply })
    }

    pub fn apply(&self, request: WindowRequest, window: PostWindow) -> Result<SlotBatch, WindowError> {
        let batch = self.call(|reply| Command::Apply {
            request,
            window,
            reply,
        })??;
        Ok(batch)
    }

    pub fn slot_visible(&self, index: usize) -> Result<Vec<usize>, WindowError> {
        self.call(|reply| Command::SlotVisible { index, reply })
    }

    pub fn locate(&self, number: u32) -> Result<Option<usize>, WindowError> {
        self.call(|reply| Command::Locate { number, reply })
    }

    pub fn snapshot(&self) -> Result<PostIndexSpace, WindowError> {
        self.call(|reply| Command::Snapshot { reply })
    }

    pub fn fetch_state(&self, offset: usize) -> Result<FetchState, WindowError> {
        self.call(|reply| Command::State { offset, reply })
    }

    fn send(&self, command: Command) -> Result<(), WindowError> {
        self.commands.send(command).map_err(|_| WindowError::Closed)
    }

    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T, WindowError> {
        let (tx, rx) = bounded(1);
        self.send(build(tx))?;
        rx.recv().map_err(|_| WindowError::Closed)
    }
}

fn fetch_worker(
    fetcher: WindowFetcher,
    jobs: Receiver<Job>,
    stop: Receiver<()>,
    commands: Sender<Command>,
) {
    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(jobs) -> msg => {
                match msg {
                    Ok(job) => {
                        let window = fetcher.fetch(job.request);
                        let fetched = Command::Fetched { request: job.request, window };
                        if commands.send(fetched).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

struct Owner {
    space: PostIndexSpace,
    coordinator: FetchCoordinator,
    reconciler: WindowReconciler,
    coverage: CoverageSet,
    jobs: Sender<Job>,
    events: Sender<WindowEvent>,
    waiters: HashMap<WindowRequest, Vec<Sender<LoadOutcome>>>,
    triggers: HashMap<usize, Vec<(usize, HintSide)>>,
}

impl Owner {
    fn run(mut self, commands: Receiver<Command>) {
        for command in commands.iter() {
            match command {
                Command::ShouldLoad { offset, reply } => {
                    let _ = reply.send(self.coordinator.should_load(offset));
                }
                Command::FinishLoad { offset } => self.coordinator.finish_load(offset),
                Command::Pause => {
                    debug!("fetches paused");
                    self.coordinator.pause();
                }
                Command::Resume => {
                    debug!("fetches resumed");
                    self.coordinator.resume();
                }
                Command::Load { request, reply } => self.load(request, reply),
                Command::Fetched { request, window } => self.fetched(request, window),
                Command::Apply {
                    request,
                    window,
                    reply,
                } => {
                    let result = self.reconcile(request, &window);
                    let _ = reply.send(result);
                }
                Command::SlotVisible { index, reply } => {
                    let started = self.slot_visible(index);
                    let _ = reply.send(started);
                }
                Command::Locate { number, reply } => {
                    let _ = reply.send(self.space.nearest_comment(number));
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.space.clone());
                }
                Command::State { offset, reply } => {
                    let _ = reply.send(self.coordinator.state(offset));
                }
                Command::Shutdown => break,
            }
        }
        debug!("discussion window owner stopped");
    }

    fn load(&mut self, request: WindowRequest, reply: Sender<LoadOutcome>) {
        let start = match request {
            WindowRequest::Offset(offset) => self.coordinator.should_load(offset),
            WindowRequest::Near(_) => {
                !self.coordinator.is_paused() && !self.waiters.contains_key(&request)
            }
        };
        if !start {
            let _ = reply.send(LoadOutcome::Skipped);
            return;
        }
        self.waiters.entry(request).or_default().push(reply);
        self.dispatch(request);
    }

    fn dispatch(&mut self, request: WindowRequest) {
        debug!(?request, "dispatching fetch");
        if self.jobs.send(Job { request }).is_err() {
            warn!(?request, "fetch workers gone");
            self.fetched(request, PostWindow::failed());
        }
    }

    fn fetched(&mut self, request: WindowRequest, window: PostWindow) {
        let outcome = if window.failed {
            if let WindowRequest::Offset(offset) = request {
                self.coordinator.abandon_load(offset);
                self.restore_hints(offset);
            }
            let _ = self.events.send(WindowEvent::FetchFailed { request });
            LoadOutcome::Failed
        } else {
            if let WindowRequest::Offset(offset) = request {
                self.coordinator.finish_load(offset);
                self.triggers.remove(&offset);
            }
            if window.posts.is_empty() {
                debug!(?request, "empty window treated as terminal");
                LoadOutcome::Empty
            } else {
                match self.reconcile(request, &window) {
                    Ok(batch) => LoadOutcome::Applied {
                        updated: batch.updates.len(),
                    },
                    Err(err) => {
                        error!(?request, error = %err, "rejected window");
                        LoadOutcome::Rejected
                    }
                }
            }
        };

        if let Some(waiters) = self.waiters.remove(&request) {
            for waiter in waiters {
                let _ = waiter.send(outcome);
            }
        }
    }

    fn reconcile(
        &mut self,
        request: WindowRequest,
        window: &PostWindow,
    ) -> Result<SlotBatch, ReconcileError> {
        let result = self.reconciler.reconcile(&mut self.space, request, window)?;
        if let Some((lo, hi)) = result.range {
            self.coverage.insert(lo, hi);
        }
        if !result.batch.is_empty() {
            let _ = self.events.send(WindowEvent::Slots(result.batch.clone()));
        }
        Ok(result.batch)
    }

    fn slot_visible(&mut self, index: usize) -> Vec<usize> {
        if self.coordinator.is_paused() {
            return Vec::new();
        }
        let Some(entry) = self.space.get(index) else {
            return Vec::new();
        };

        let hint = entry.hint;
        let unresolved = entry.slot.is_placeholder();

        let mut started = Vec::new();
        if !hint.is_empty() {
            for (side, offset) in hint.offsets() {
                let fresh = self.coordinator.should_load(offset);
                match self.coordinator.state(offset) {
                    // Waits on the pending fetch; a failure hands the hint back here too.
                    FetchState::InFlight => {
                        self.triggers.entry(offset).or_default().push((index, side));
                    }
                    FetchState::Completed => {}
                    FetchState::Unrequested => continue,
                }
                self.space.clear_hint(index, side);
                if fresh {
                    started.push(offset);
                }
            }
            if let Some(entry) = self.space.get(index) {
                if entry.hint != hint {
                    let batch = SlotBatch {
                        inserted: 0,
                        updates: vec![(index, entry.clone())],
                    };
                    let _ = self.events.send(WindowEvent::Slots(batch));
                }
            }
        } else if unresolved {
            let fill = self
                .coverage
                .fill_offset(index, self.space.len(), self.reconciler.limit());
            if let Some(offset) = fill {
                if self.coordinator.should_load(offset) {
                    started.push(offset);
                }
            }
        }

        for offset in &started {
            self.dispatch(WindowRequest::Offset(*offset));
        }
        started
    }

    fn restore_hints(&mut self, offset: usize) {
        let Some(slots) = self.triggers.remove(&offset) else {
            return;
        };
        let mut updates = Vec::new();
        for (index, side) in slots {
            if self.space.slot(index).is_some_and(Slot::is_comment) {
                continue;
            }
            self.space.set_hint(index, side, offset);
            if let Some(entry) = self.space.get(index) {
                updates.push((index, entry.clone()));
            }
        }
        if !updates.is_empty() {
            let batch = SlotBatch {
                inserted: 0,
                updates,
            };
            let _ = self.events.send(WindowEvent::Slots(batch));
        }
    }
}

#[derive(Debug, Default)]
pub struct SlotMirror {
    space: parking_lot::RwLock<PostIndexSpace>,
}

impl SlotMirror {
    pub fn new(initial: PostIndexSpace) -> Self {
        Self {
            space: parking_lot::RwLock::new(initial),
        }
    }

    pub fn drain(&self, events: &Receiver<WindowEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            if let WindowEvent::Slots(batch) = event {
                self.space.write().apply_batch(&batch);
                applied += 1;
            }
        }
        applied
    }

    pub fn entry(&self, index: usize) -> Option<SlotEntry> {
        self.space.read().get(index).cloned()
    }

    pub fn snapshot(&self) -> PostIndexSpace {
        self.space.read().clone()
    }
}
