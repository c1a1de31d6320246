use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::fetch::{PostWindow, WindowRequest};
use crate::index::{HintSide, PostIndexSpace, Slot, SlotBatch};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("post {post_id} has non-positive number {number}")]
    InvalidPostNumber { post_id: String, number: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetRangeRecord {
    pub min_index: usize,
    pub max_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub batch: SlotBatch,
    pub range: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct WindowReconciler {
    limit: usize,
    records: BTreeMap<usize, OffsetRangeRecord>,
}

impl WindowReconciler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: BTreeMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn record(&self, offset: usize) -> Option<OffsetRangeRecord> {
        self.records.get(&offset).copied()
    }

    #[instrument(level = "debug", skip(self, space, window), fields(posts = window.posts.len()))]
    pub fn reconcile(
        &mut self,
        space: &mut PostIndexSpace,
        request: WindowRequest,
        window: &PostWindow,
    ) -> Result<Reconciliation, ReconcileError> {
        let Some((min_index, max_index)) = index_bounds(window)? else {
            return Ok(Reconciliation::default());
        };

        let inserted = space.grow_to(max_index + 1);
        let len = space.len();

        let (left, right, prev, next) = match request {
            WindowRequest::Offset(offset) => {
                let (left, right) =
                    self.affected_range(offset, min_index, max_index, window.next_offset.is_none(), len);
                (left, right, window.prev_offset, window.next_offset)
            }
            WindowRequest::Near(number) => {
                let number = number as usize;
                (
                    min_index,
                    max_index,
                    Some(number.saturating_sub(self.limit)),
                    Some(number.saturating_add(self.limit)),
                )
            }
        };

        let run_lo = placeholder_run_start(space, left);
        let run_hi = placeholder_run_end(space, right);
        let before = space.entries()[run_lo..=run_hi].to_vec();

        self.resolve_range(space, left, right, prev, next);
        if let Some(offset) = prev {
            for index in run_lo..left {
                space.set_hint(index, HintSide::Prev, offset);
            }
        }
        if let Some(offset) = next {
            for index in right + 1..=run_hi {
                space.set_hint(index, HintSide::Next, offset);
            }
        }

        for post in &window.posts {
            if !post.is_comment() {
                continue;
            }
            let index = (post.number - 1) as usize;
            if (left..=right).contains(&index) {
                space.set_slot(index, Slot::Comment(post.clone()));
            }
        }

        if let WindowRequest::Offset(offset) = request {
            self.records.insert(offset, OffsetRangeRecord { min_index, max_index });
        }

        let updates: Vec<_> = before
            .into_iter()
            .enumerate()
            .filter_map(|(i, old)| {
                let index = run_lo + i;
                let current = &space.entries()[index];
                (*current != old).then(|| (index, current.clone()))
            })
            .collect();
        debug!(left, right, inserted, updated = updates.len(), "window reconciled");

        Ok(Reconciliation {
            batch: SlotBatch { inserted, updates },
            range: Some((left, right)),
        })
    }

    fn affected_range(
        &self,
        offset: usize,
        min_index: usize,
        max_index: usize,
        last_page: bool,
        len: usize,
    ) -> (usize, usize) {
        let mut left = self
            .records
            .range(offset.saturating_sub(self.limit)..offset)
            .map(|(_, record)| record.max_index + 1)
            .filter(|candidate| *candidate <= min_index)
            .max()
            .unwrap_or(min_index);
        let mut right = self
            .records
            .range(offset.saturating_add(1)..=offset.saturating_add(self.limit))
            .filter(|(_, record)| record.min_index > max_index)
            .map(|(_, record)| record.min_index - 1)
            .min()
            .unwrap_or(max_index);

        if offset == 0 {
            left = 0;
        }
        if last_page {
            right = len - 1;
        }
        (left, right)
    }

    // Lower half learns the previous page, upper half the next one.
    fn resolve_range(
        &self,
        space: &mut PostIndexSpace,
        left: usize,
        right: usize,
        prev: Option<usize>,
        next: Option<usize>,
    ) {
        let mid = left + (right - left) / 2;
        for index in left..=right {
            if space.slot(index).is_some_and(Slot::is_comment) {
                continue;
            }
            space.set_slot(index, Slot::Tombstone);
            let lower = index <= mid;
            let upper = index > mid || left == right;
            if let (true, Some(offset)) = (lower, prev) {
                space.set_hint(index, HintSide::Prev, offset);
            }
            if let (true, Some(offset)) = (upper, next) {
                space.set_hint(index, HintSide::Next, offset);
            }
        }
    }
}

fn index_bounds(window: &PostWindow) -> Result<Option<(usize, usize)>, ReconcileError> {
    let mut bounds: Option<(i64, i64)> = None;
    for post in &window.posts {
        if post.number <= 0 {
            return Err(ReconcileError::InvalidPostNumber {
                post_id: post.id.clone(),
                number: post.number,
            });
        }
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(post.number), hi.max(post.number)),
            None => (post.number, post.number),
        });
    }
    Ok(bounds.map(|(lo, hi)| ((lo - 1) as usize, (hi - 1) as usize)))
}

fn placeholder_run_start(space: &PostIndexSpace, left: usize) -> usize {
    let mut start = left;
    while start > 0 && space.slot(start - 1).is_some_and(Slot::is_placeholder) {
        start -= 1;
    }
    start
}

fn placeholder_run_end(space: &PostIndexSpace, right: usize) -> usize {
    let mut end = right;
    while space.slot(end + 1).is_some_and(Slot::is_placeholder) {
        end += 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_event, mock_post};
    use crate::flarum::Post;

    fn offset_window(numbers: &[i64], prev: Option<usize>, next: Option<usize>) -> PostWindow {
        PostWindow {
            posts: numbers.iter().copied().map(mock_post).collect(),
            prev_offset: prev,
            next_offset: next,
            failed: false,
        }
    }

    #[test]
    fn empty_window_is_a_no_op() {
        let mut space = PostIndexSpace::with_placeholders(10);
        let mut reconciler = WindowReconciler::new(5);
        let result = reconciler
            .reconcile(&mut space, WindowRequest::Offset(0), &PostWindow::default())
            .unwrap();
        assert!(result.batch.is_empty());
        assert_eq!(result.range, None);
        assert_eq!(reconciler.record(0), None);
    }

    #[test]
    fn rejects_non_positive_numbers() {
        let mut space = PostIndexSpace::with_placeholders(10);
        let mut reconciler = WindowReconciler::new(5);
        let window = offset_window(&[0, 1], None, None);
        let err = reconciler
            .reconcile(&mut space, WindowRequest::Offset(0), &window)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidPostNumber { number: 0, .. }));
        assert_eq!(space, PostIndexSpace::with_placeholders(10));
    }

    #[test]
    fn grows_space_for_undercounted_discussions() {
        let mut space = PostIndexSpace::with_placeholders(3);
        let mut reconciler = WindowReconciler::new(5);
        let window = offset_window(&[1, 2, 3, 4, 5], None, None);
        let result = reconciler
            .reconcile(&mut space, WindowRequest::Offset(0), &window)
            .unwrap();
        assert_eq!(space.len(), 5);
        assert_eq!(result.batch.inserted, 2);
        assert_eq!(space.render_map(), "CCCCC");
    }

    #[test]
    fn events_become_tombstones_and_gaps_are_resolved() {
        let mut space = PostIndexSpace::with_placeholders(12);
        let mut reconciler = WindowReconciler::new(5);
        let mut posts: Vec<Post> = [3, 4, 6].iter().copied().map(mock_post).collect();
        posts.push(mock_event(7));
        let window = PostWindow {
            posts,
            prev_offset: Some(0),
            next_offset: Some(9),
            failed: false,
        };
        reconciler
            .reconcile(&mut space, WindowRequest::Offset(4), &window)
            .unwrap();
        assert_eq!(space.render_map(), "..CCxCx.....");
        assert_eq!(reconciler.record(4), Some(OffsetRangeRecord { min_index: 2, max_index: 6 }));
    }

    #[test]
    fn hints_split_across_range_and_reach_neighbouring_placeholders() {
        let mut space = PostIndexSpace::with_placeholders(20);
        let mut reconciler = WindowReconciler::new(4);
        let window = offset_window(&[9, 10, 11, 12], Some(4), Some(12));
        reconciler
            .reconcile(&mut space, WindowRequest::Offset(8), &window)
            .unwrap();

        assert_eq!(space.hint(8).prev_offset, Some(4));
        assert_eq!(space.hint(9).prev_offset, Some(4));
        assert_eq!(space.hint(10).next_offset, Some(12));
        assert_eq!(space.hint(11).next_offset, Some(12));
        assert_eq!(space.hint(8).next_offset, None);
        for index in 0..8 {
            assert_eq!(space.hint(index).prev_offset, Some(4), "index {index}");
        }
        for index in 12..20 {
            assert_eq!(space.hint(index).next_offset, Some(12), "index {index}");
        }
    }

    #[test]
    fn near_windows_synthesise_hints() {
        let mut space = PostIndexSpace::with_placeholders(100);
        let mut reconciler = WindowReconciler::new(10);
        let window = offset_window(&[46, 47, 48, 49, 50, 51, 52, 53, 54, 55], None, None);
        let result = reconciler
            .reconcile(&mut space, WindowRequest::Near(50), &window)
            .unwrap();
        assert_eq!(result.range, Some((45, 54)));
        assert_eq!(space.hint(45).prev_offset, Some(40));
        assert_eq!(space.hint(54).next_offset, Some(60));
        assert_eq!(reconciler.record(40), None);
    }

    #[test]
    fn same_window_twice_changes_nothing() {
        let mut space = PostIndexSpace::with_placeholders(40);
        let mut reconciler = WindowReconciler::new(10);
        let window = offset_window(&[11, 12, 14, 15, 16, 17, 18, 19, 20], Some(0), Some(20));
        reconciler
            .reconcile(&mut space, WindowRequest::Offset(10), &window)
            .unwrap();
        let once = space.clone();
        let again = reconciler
            .reconcile(&mut space, WindowRequest::Offset(10), &window)
            .unwrap();
        assert_eq!(space, once);
        assert!(again.batch.updates.is_empty());
    }

    #[test]
    fn seam_between_windows_is_tombstoned_in_either_order() {
        for order in [[0usize, 5], [5, 0]] {
            let mut space = PostIndexSpace::with_placeholders(12);
            let mut reconciler = WindowReconciler::new(5);
            for offset in order {
                let window = if offset == 0 {
                    offset_window(&[1, 2, 3, 4, 5], None, Some(5))
                } else {
                    // Number 6 is an event the server never returns.
                    offset_window(&[7, 8, 9, 10, 11], Some(0), Some(10))
                };
                reconciler
                    .reconcile(&mut space, WindowRequest::Offset(offset), &window)
                    .unwrap();
            }
            assert_eq!(space.slot(5), Some(&Slot::Tombstone), "order {order:?}");
            assert_eq!(&space.render_map()[..11], "CCCCCxCCCCC");
        }
    }

    #[test]
    fn last_page_tombstones_overcounted_tail() {
        let mut space = PostIndexSpace::with_placeholders(10);
        let mut reconciler = WindowReconciler::new(5);
        let window = offset_window(&[5, 6, 7], Some(0), None);
        reconciler
            .reconcile(&mut space, WindowRequest::Offset(4), &window)
            .unwrap();
        assert_eq!(space.render_map(), "....CCCxxx");
    }

    #[test]
    fn offsets_at_the_top_of_the_range_do_not_overflow() {
        let mut space = PostIndexSpace::with_placeholders(10);
        let mut reconciler = WindowReconciler::new(5);
        let window = offset_window(&[4, 5], Some(usize::MAX - 5), Some(usize::MAX));
        reconciler
            .reconcile(&mut space, WindowRequest::Offset(usize::MAX), &window)
            .unwrap();
        reconciler
            .reconcile(&mut space, WindowRequest::Offset(usize::MAX - 2), &window)
            .unwrap();
        assert!(space.slot(3).unwrap().is_comment());
        assert!(space.slot(4).unwrap().is_comment());
    }
}
