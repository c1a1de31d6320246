use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config;
use crate::fetch::{FlarumWindowSource, WindowSource};
use crate::flarum::{self, PostContent};
use crate::index::{PostIndexSpace, Slot};
use crate::scroll::{ScrollAnchor, ScrollSettings, ScrollTargetCoordinator, ScrollView};
use crate::window::{DiscussionWindow, SlotMirror, WindowConfig};

const LOG_ENV: &str = "FLARUM_STREAM_LOG";
const MAP_WIDTH: usize = 60;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub discussion: String,
    pub near: u32,
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct TerminalView {
    position: Option<usize>,
    jumps: usize,
}

impl ScrollView for TerminalView {
    fn scroll_to(&mut self, index: usize, _anchor: ScrollAnchor) {
        self.position = Some(index);
        self.jumps += 1;
    }
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    init_tracing(&cfg.log.filter);

    let client = flarum::Client::new(flarum::ClientConfig {
        base_url: cfg.forum.base_url.clone(),
        user_agent: cfg.forum.user_agent.clone(),
        timeout: cfg.forum.timeout,
        http_client: None,
    })
    .context("build forum client")?;
    let client = Arc::new(client);

    let discussion = client
        .discussion(&options.discussion)
        .with_context(|| format!("load discussion {}", options.discussion))?;
    let declared = discussion.declared_count();

    let source: Arc<dyn WindowSource> = Arc::new(FlarumWindowSource::new(client.clone()));
    let window = DiscussionWindow::open(
        source,
        discussion.id.clone(),
        declared,
        WindowConfig {
            page_limit: cfg.window.page_limit,
            fetch_workers: cfg.window.fetch_workers,
        },
    );
    let events = window.events();
    let mirror = SlotMirror::new(PostIndexSpace::with_placeholders(declared));

    let mut view = TerminalView::default();
    let mut scroller = ScrollTargetCoordinator::new(
        window.handle(),
        ScrollSettings {
            attempts: cfg.window.settle_attempts,
            settle_delay: cfg.window.settle_delay,
        },
    );
    let report = scroller
        .open_near(options.near, &mut view)
        .with_context(|| format!("open discussion near post {}", options.near))?;
    mirror.drain(&events);

    println!("{} (#{})", discussion.title, discussion.id);
    println!(
        "opened near post {} at index {} (offset {}, {} jumps)",
        report.target, report.index, report.offset, view.jumps
    );
    print_slot_map(&mirror.snapshot());

    if let Some(entry) = view.position.and_then(|index| mirror.entry(index)) {
        if let Slot::Comment(post) = entry.slot {
            let author = post.author.as_deref().unwrap_or("unknown");
            let body = match &post.content {
                PostContent::Comment { html } => html.as_str(),
                PostContent::Event { content_type } => content_type.as_str(),
            };
            println!("\n#{} by {author}\n{body}", post.number);
        }
    }

    Ok(())
}

fn print_slot_map(space: &PostIndexSpace) {
    let map = space.render_map();
    let symbols: Vec<char> = map.chars().collect();
    for (row, chunk) in symbols.chunks(MAP_WIDTH).enumerate() {
        let line: String = chunk.iter().collect();
        println!("{:>6}  {}", row * MAP_WIDTH + 1, line);
    }
    println!(
        "        C comment  x tombstone  . not loaded ({} comments, {} placeholders)",
        space.count_where(Slot::is_comment),
        space.count_where(Slot::is_placeholder)
    );
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}
