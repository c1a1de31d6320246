#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use flarum_stream::fetch::{PostWindow, WindowSource};
use flarum_stream::flarum::{Post, PostContent};
use parking_lot::Mutex;

// Paginates like a Flarum server: offsets are positions in the list of
// existing posts, not post numbers.
#[derive(Default)]
pub struct MockWindowSource {
    posts: Vec<Post>,
    failing: Mutex<HashSet<usize>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockWindowSource {
    pub fn new(mut posts: Vec<Post>) -> Self {
        posts.sort_by_key(|post| post.number);
        Self {
            posts,
            ..Self::default()
        }
    }

    pub fn with_comments(count: i64) -> Self {
        Self::new((1..=count).map(mock_post).collect())
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_offset(&self, offset: usize) {
        self.failing.lock().insert(offset);
    }

    pub fn heal_offset(&self, offset: usize) {
        self.failing.lock().remove(&offset);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn page(&self, offset: usize, limit: usize) -> PostWindow {
        let start = offset.min(self.posts.len());
        let end = offset.saturating_add(limit).min(self.posts.len());
        PostWindow {
            posts: self.posts[start..end].to_vec(),
            prev_offset: (offset > 0).then(|| offset.saturating_sub(limit)),
            next_offset: (end < self.posts.len()).then_some(end),
            failed: false,
        }
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }
}

impl WindowSource for MockWindowSource {
    fn fetch_by_offset(&self, _discussion_id: &str, offset: usize, limit: usize) -> Result<PostWindow> {
        self.enter();
        if self.failing.lock().contains(&offset) {
            bail!("mock: offset {offset} unavailable");
        }
        Ok(self.page(offset, limit))
    }

    fn fetch_by_near_number(
        &self,
        _discussion_id: &str,
        number: u32,
        limit: usize,
    ) -> Result<PostWindow> {
        self.enter();
        let position = self
            .posts
            .iter()
            .position(|post| post.number >= i64::from(number))
            .unwrap_or(self.posts.len());
        let offset = position.saturating_sub(limit / 2);
        Ok(PostWindow {
            posts: self.page(offset, limit).posts,
            ..PostWindow::default()
        })
    }
}

pub fn mock_post(number: i64) -> Post {
    Post {
        id: format!("p{number}"),
        number,
        content: PostContent::Comment {
            html: format!("<p>Post #{number}</p>"),
        },
        author: Some("flarum".into()),
        created_at: None,
    }
}

pub fn mock_event(number: i64) -> Post {
    Post {
        id: format!("e{number}"),
        number,
        content: PostContent::Event {
            content_type: "discussionRenamed".into(),
        },
        author: None,
        created_at: None,
    }
}
