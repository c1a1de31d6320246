use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::flarum::{self, Post};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowRequest {
    Offset(usize),
    Near(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostWindow {
    pub posts: Vec<Post>,
    pub prev_offset: Option<usize>,
    pub next_offset: Option<usize>,
    pub failed: bool,
}

impl PostWindow {
    pub fn failed() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }
}

pub trait WindowSource: Send + Sync {
    fn fetch_by_offset(&self, discussion_id: &str, offset: usize, limit: usize) -> Result<PostWindow>;
    fn fetch_by_near_number(&self, discussion_id: &str, number: u32, limit: usize)
        -> Result<PostWindow>;
}

pub struct FlarumWindowSource {
    client: Arc<flarum::Client>,
}

impl FlarumWindowSource {
    pub fn new(client: Arc<flarum::Client>) -> Self {
        Self { client }
    }
}

impl WindowSource for FlarumWindowSource {
    fn fetch_by_offset(&self, discussion_id: &str, offset: usize, limit: usize) -> Result<PostWindow> {
        let page = self
            .client
            .posts_by_offset(discussion_id, offset, limit)
            .context("fetch posts by offset")?;
        Ok(PostWindow {
            prev_offset: page.prev_offset(),
            next_offset: page.next_offset(),
            posts: page.posts,
            failed: false,
        })
    }

    fn fetch_by_near_number(
        &self,
        discussion_id: &str,
        number: u32,
        limit: usize,
    ) -> Result<PostWindow> {
        let page = self
            .client
            .posts_near(discussion_id, number, limit)
            .context("fetch posts near number")?;
        Ok(PostWindow {
            posts: page.posts,
            ..PostWindow::default()
        })
    }
}

#[derive(Clone)]
pub struct WindowFetcher {
    source: Arc<dyn WindowSource>,
    discussion_id: String,
    limit: usize,
}

impl WindowFetcher {
    pub fn new(source: Arc<dyn WindowSource>, discussion_id: impl Into<String>, limit: usize) -> Self {
        Self {
            source,
            discussion_id: discussion_id.into(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn fetch(&self, request: WindowRequest) -> PostWindow {
        let result = match request {
            WindowRequest::Offset(offset) => {
                self.source
                    .fetch_by_offset(&self.discussion_id, offset, self.limit)
            }
            WindowRequest::Near(number) => {
                self.source
                    .fetch_by_near_number(&self.discussion_id, number, self.limit)
            }
        };
        match result {
            Ok(mut window) => {
                window.posts.truncate(self.limit);
                window
            }
            Err(err) => {
                warn!(
                    discussion = %self.discussion_id,
                    ?request,
                    error = ?err,
                    "window fetch failed"
                );
                PostWindow::failed()
            }
        }
    }
}
