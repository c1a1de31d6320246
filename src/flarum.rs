use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://discuss.flarum.org/";

static PAGE_OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"page\[offset\]=(\d+)").expect("valid page offset regex"));

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("flarum-stream/{}", crate::VERSION),
            timeout: Duration::from_secs(20),
            http_client: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: String,
    pub title: String,
    pub comment_count: u32,
    pub last_post_number: Option<u32>,
}

impl Discussion {
    // The last post number also counts system events.
    pub fn declared_count(&self) -> usize {
        self.last_post_number.unwrap_or(self.comment_count) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostContent {
    Comment { html: String },
    Event { content_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub number: i64,
    pub content: PostContent,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_comment(&self) -> bool {
        matches!(self.content, PostContent::Comment { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub prev: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub links: PageLinks,
}

impl PostPage {
    pub fn prev_offset(&self) -> Option<usize> {
        self.links.prev.as_deref().map(page_offset)
    }

    pub fn next_offset(&self) -> Option<usize> {
        self.links.next.as_deref().map(page_offset)
    }
}

// A link without `page[offset]` points at the first page.
pub fn page_offset(link: &str) -> usize {
    let decoded = percent_decode_str(link).decode_utf8_lossy();
    PAGE_OFFSET_RE
        .captures(&decoded)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .unwrap_or(0)
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("flarum client user agent required");
        }
        let mut base = config.base_url.trim().to_string();
        if base.is_empty() {
            base = DEFAULT_BASE_URL.to_string();
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("flarum: parse base url {base}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder().timeout(config.timeout).build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn discussion(&self, id: &str) -> Result<Discussion> {
        if id.trim().is_empty() {
            bail!("flarum: discussion id is required");
        }
        let resp = self.request(&format!("api/discussions/{}", id.trim()), &[])?;
        let doc: Document<Resource> = resp.json().context("flarum: decode discussion")?;
        let attrs: DiscussionAttributes = serde_json::from_value(doc.data.attributes)
            .context("flarum: decode discussion attributes")?;
        Ok(Discussion {
            id: doc.data.id,
            title: attrs.title,
            comment_count: attrs.comment_count,
            last_post_number: attrs.last_post_number,
        })
    }

    pub fn posts_by_offset(&self, discussion_id: &str, offset: usize, limit: usize) -> Result<PostPage> {
        let params = vec![
            ("filter[discussion]".to_string(), discussion_id.to_string()),
            ("page[offset]".to_string(), offset.to_string()),
            ("page[limit]".to_string(), limit.to_string()),
        ];
        self.fetch_posts(&params)
    }

    pub fn posts_near(&self, discussion_id: &str, number: u32, limit: usize) -> Result<PostPage> {
        let params = vec![
            ("filter[discussion]".to_string(), discussion_id.to_string()),
            ("page[near]".to_string(), number.to_string()),
            ("page[limit]".to_string(), limit.to_string()),
        ];
        let mut page = self.fetch_posts(&params)?;
        // Near-number responses carry no usable cursor; callers derive hints.
        page.links = PageLinks::default();
        Ok(page)
    }

    fn fetch_posts(&self, params: &[(String, String)]) -> Result<PostPage> {
        let resp = self.request("api/posts", params)?;
        let doc: Document<Vec<Resource>> = resp.json().context("flarum: decode post listing")?;
        let authors = author_names(&doc.included);

        let mut posts = Vec::with_capacity(doc.data.len());
        for resource in doc.data {
            if resource.kind != "posts" {
                continue;
            }
            match decode_post(resource, &authors) {
                Ok(post) => posts.push(post),
                Err(err) => warn!(error = %err, "flarum: skipping undecodable post"),
            }
        }
        debug!(count = posts.len(), "flarum: decoded post window");

        Ok(PostPage {
            posts,
            links: doc.links,
        })
    }

    fn request(&self, path: &str, params: &[(String, String)]) -> Result<Response> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/vnd.api+json")
            .send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                401 => Err(anyhow!("flarum: unauthorized")),
                403 => Err(anyhow!("flarum: forbidden")),
                404 => Err(anyhow!("flarum: not found")),
                429 => Err(anyhow!("flarum: rate limited: {}", body)),
                _ => Err(anyhow!("flarum: api error {}: {}", status, body)),
            }
        }
    }
}

fn decode_post(resource: Resource, authors: &HashMap<String, String>) -> Result<Post> {
    let attrs: PostAttributes =
        serde_json::from_value(resource.attributes).context("flarum: decode post attributes")?;
    let content = if attrs.content_type == "comment" {
        PostContent::Comment {
            html: attrs.content_html.unwrap_or_default(),
        }
    } else {
        PostContent::Event {
            content_type: attrs.content_type,
        }
    };
    let author = resource
        .relationships
        .pointer("/user/data/id")
        .and_then(Value::as_str)
        .and_then(|id| authors.get(id))
        .cloned();

    Ok(Post {
        id: resource.id,
        number: attrs.number,
        content,
        author,
        created_at: attrs.created_at,
    })
}

fn author_names(included: &[Resource]) -> HashMap<String, String> {
    included
        .iter()
        .filter(|res| res.kind == "users")
        .filter_map(|res| {
            let name = res
                .attributes
                .get("displayName")
                .or_else(|| res.attributes.get("username"))
                .and_then(Value::as_str)?;
            Some((res.id.clone(), name.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
struct Document<T> {
    data: T,
    #[serde(default)]
    included: Vec<Resource>,
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Clone, Deserialize)]
struct Resource {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(default)]
    attributes: Value,
    #[serde(default)]
    relationships: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostAttributes {
    number: i64,
    content_type: String,
    #[serde(default)]
    content_html: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionAttributes {
    #[serde(default)]
    title: String,
    #[serde(default)]
    comment_count: u32,
    #[serde(default)]
    last_post_number: Option<u32>,
}
