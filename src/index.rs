use serde::{Deserialize, Serialize};

use crate::flarum::Post;

// Index `i` holds post number `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Placeholder,
    Comment(Post),
    Tombstone,
}

impl Slot {
    pub fn is_comment(&self) -> bool {
        matches!(self, Slot::Comment(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Slot::Placeholder)
    }

    pub fn symbol(&self) -> char {
        match self {
            Slot::Placeholder => '.',
            Slot::Comment(_) => 'C',
            Slot::Tombstone => 'x',
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMoreHint {
    pub prev_offset: Option<usize>,
    pub next_offset: Option<usize>,
}

impl LoadMoreHint {
    pub fn is_empty(&self) -> bool {
        self.prev_offset.is_none() && self.next_offset.is_none()
    }

    pub fn offsets(&self) -> impl Iterator<Item = (HintSide, usize)> {
        let prev = self.prev_offset.map(|offset| (HintSide::Prev, offset));
        let next = self.next_offset.map(|offset| (HintSide::Next, offset));
        prev.into_iter().chain(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HintSide {
    Prev,
    Next,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub slot: Slot,
    #[serde(default)]
    pub hint: LoadMoreHint,
}

impl SlotEntry {
    pub fn placeholder() -> Self {
        Self {
            slot: Slot::Placeholder,
            hint: LoadMoreHint::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotBatch {
    pub inserted: usize,
    pub updates: Vec<(usize, SlotEntry)>,
}

impl SlotBatch {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updates.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostIndexSpace {
    entries: Vec<SlotEntry>,
}

impl PostIndexSpace {
    pub fn with_placeholders(count: usize) -> Self {
        Self {
            entries: vec![SlotEntry::placeholder(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SlotEntry> {
        self.entries.get(index)
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.entries.get(index).map(|entry| &entry.slot)
    }

    pub fn entries(&self) -> &[SlotEntry] {
        &self.entries
    }

    pub fn grow_to(&mut self, len: usize) -> usize {
        let current = self.entries.len();
        if len <= current {
            return 0;
        }
        self.entries.resize(len, SlotEntry::placeholder());
        len - current
    }

    pub fn set_slot(&mut self, index: usize, slot: Slot) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) if !entry.slot.is_comment() => {
                entry.slot = slot;
                true
            }
            _ => false,
        }
    }

    pub fn set_hint(&mut self, index: usize, side: HintSide, offset: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            match side {
                HintSide::Prev => entry.hint.prev_offset = Some(offset),
                HintSide::Next => entry.hint.next_offset = Some(offset),
            }
        }
    }

    pub fn clear_hint(&mut self, index: usize, side: HintSide) {
        if let Some(entry) = self.entries.get_mut(index) {
            match side {
                HintSide::Prev => entry.hint.prev_offset = None,
                HintSide::Next => entry.hint.next_offset = None,
            }
        }
    }

    pub fn hint(&self, index: usize) -> LoadMoreHint {
        self.entries
            .get(index)
            .map(|entry| entry.hint)
            .unwrap_or_default()
    }

    // Ties go to the lower number.
    pub fn nearest_comment(&self, number: u32) -> Option<usize> {
        let target = i64::from(number);
        let mut best: Option<(usize, i64)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let Slot::Comment(post) = &entry.slot else {
                continue;
            };
            let distance = (post.number - target).abs();
            match best {
                Some((_, best_distance)) if best_distance <= distance => {}
                _ => best = Some((index, distance)),
            }
        }
        best.map(|(index, _)| index)
    }

    pub fn count_where(&self, predicate: impl Fn(&Slot) -> bool) -> usize {
        self.entries
            .iter()
            .filter(|entry| predicate(&entry.slot))
            .count()
    }

    pub fn apply_batch(&mut self, batch: &SlotBatch) {
        let len = self.entries.len() + batch.inserted;
        self.grow_to(len);
        for (index, entry) in &batch.updates {
            if *index >= self.entries.len() {
                self.grow_to(index + 1);
            }
            self.entries[*index] = entry.clone();
        }
    }

    pub fn render_map(&self) -> String {
        self.entries.iter().map(|entry| entry.slot.symbol()).collect()
    }
}
