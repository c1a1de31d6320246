use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchState {
    #[default]
    Unrequested,
    InFlight,
    Completed,
}

// Only the window owner touches this, which keeps `should_load` atomic for callers.
#[derive(Debug, Default)]
pub struct FetchCoordinator {
    states: HashMap<usize, FetchState>,
    paused: bool,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_load(&mut self, offset: usize) -> bool {
        if self.paused {
            return false;
        }
        let state = self.states.entry(offset).or_default();
        match *state {
            FetchState::Unrequested => {
                *state = FetchState::InFlight;
                true
            }
            FetchState::InFlight | FetchState::Completed => false,
        }
    }

    pub fn finish_load(&mut self, offset: usize) {
        self.states.insert(offset, FetchState::Completed);
    }

    pub fn abandon_load(&mut self, offset: usize) {
        if self.state(offset) == FetchState::InFlight {
            self.states.remove(&offset);
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn state(&self, offset: usize) -> FetchState {
        self.states.get(&offset).copied().unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.states
            .values()
            .filter(|state| **state == FetchState::InFlight)
            .count()
    }
}
