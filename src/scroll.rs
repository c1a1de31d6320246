use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::fetch::WindowRequest;
use crate::window::{LoadOutcome, WindowError, WindowHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    Idle,
    LoadingInitialWindow,
    LocatingTarget,
    Scrolling,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAnchor {
    Top,
    Center,
}

pub trait ScrollView {
    fn scroll_to(&mut self, index: usize, anchor: ScrollAnchor);
}

#[derive(Debug, thiserror::Error)]
pub enum ScrollError {
    #[error("no comment near post {number} in the loaded window")]
    TargetNotFound { number: u32 },
    #[error("initial window at offset {offset} could not be fetched")]
    InitialWindowFailed { offset: usize },
    #[error("scroll target already requested")]
    AlreadyStarted,
    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone)]
pub struct ScrollSettings {
    pub attempts: usize,
    pub settle_delay: Duration,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            attempts: 2,
            settle_delay: Duration::from_millis(150),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollReport {
    pub target: u32,
    pub offset: usize,
    pub index: usize,
    pub outcome: LoadOutcome,
}

pub fn initial_offset(target: u32, limit: usize) -> usize {
    (target as usize).saturating_sub(limit / 2)
}

pub struct ScrollTargetCoordinator {
    window: WindowHandle,
    settings: ScrollSettings,
    layout: Option<Receiver<()>>,
    phase: ScrollPhase,
}

impl ScrollTargetCoordinator {
    pub fn new(window: WindowHandle, settings: ScrollSettings) -> Self {
        Self {
            window,
            settings,
            layout: None,
            phase: ScrollPhase::Idle,
        }
    }

    // Without layout events the coordinator sleeps `settle_delay` between attempts.
    pub fn with_layout_events(mut self, layout: Receiver<()>) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn phase(&self) -> ScrollPhase {
        self.phase
    }

    pub fn open_near<V: ScrollView + ?Sized>(
        &mut self,
        target: u32,
        view: &mut V,
    ) -> Result<ScrollReport, ScrollError> {
        if self.phase != ScrollPhase::Idle {
            return Err(ScrollError::AlreadyStarted);
        }

        self.advance(ScrollPhase::LoadingInitialWindow);
        let offset = initial_offset(target, self.window.page_limit());
        let outcome = self.window.load(WindowRequest::Offset(offset))?;
        self.window.pause()?;

        let result = self.locate_and_scroll(target, offset, outcome, view);
        // The gate is released even when locating fails.
        self.window.resume()?;
        if result.is_ok() {
            self.advance(ScrollPhase::Settled);
        }
        result
    }

    fn locate_and_scroll<V: ScrollView + ?Sized>(
        &mut self,
        target: u32,
        offset: usize,
        outcome: LoadOutcome,
        view: &mut V,
    ) -> Result<ScrollReport, ScrollError> {
        if outcome == LoadOutcome::Failed {
            return Err(ScrollError::InitialWindowFailed { offset });
        }

        self.advance(ScrollPhase::LocatingTarget);
        let index = self
            .window
            .locate(target)?
            .ok_or(ScrollError::TargetNotFound { number: target })?;

        self.advance(ScrollPhase::Scrolling);
        if let Some(layout) = &self.layout {
            // Notifications from before the first jump say nothing about it.
            while layout.try_recv().is_ok() {}
        }
        let attempts = self.settings.attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                self.wait_for_layout();
            }
            debug!(index, attempt, "scrolling to target");
            view.scroll_to(index, ScrollAnchor::Top);
        }

        info!(post = target, offset, index, "opened discussion near post");
        Ok(ScrollReport {
            target,
            offset,
            index,
            outcome,
        })
    }

    fn wait_for_layout(&self) {
        match &self.layout {
            Some(layout) => {
                let _ = layout.recv_timeout(self.settings.settle_delay);
            }
            None => thread::sleep(self.settings.settle_delay),
        }
    }

    fn advance(&mut self, next: ScrollPhase) {
        debug!(from = ?self.phase, to = ?next, "scroll phase");
        self.phase = next;
    }
}
