//! Web tools — `web_search` (Brave Search API) and `web_fetch` (page
//! download with rough HTML-to-text reduction). No sandbox checks here;
//! these never touch the local filesystem.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::base::{optional_i64, require_string, Tool};

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_2) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Cap on fetched page text.
const DEFAULT_MAX_CHARS: usize = 50_000;

/// Default search result count.
const DEFAULT_RESULTS: i64 = 5;

// ─────────────────────────────────────────────
// web_search
// ─────────────────────────────────────────────

/// Web search via the Brave Search API.
pub struct WebSearchTool {
    api_key: Option<String>,
    client: Client,
}

impl WebSearchTool {
    /// `api_key` falls back to the `BRAVE_API_KEY` env var when `None`.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a numbered list of results with titles, URLs, and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results (1-10, default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&args, "query")?;
        let count = optional_i64(&args, "count")
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, 10);

        let api_key = self
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("no search API key configured (set BRAVE_API_KEY)"))?;

        debug!(query = %query, count, "web search");

        let resp = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &api_key)
            .query(&[("q", query.as_str()), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("search request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("search API returned {status}: {body}");
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("failed to parse search response: {e}"))?;

        let results = body["web"]["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return Ok(format!("No results for '{query}'"));
        }

        let mut lines = Vec::new();
        for (i, result) in results.iter().take(count as usize).enumerate() {
            let title = result["title"].as_str().unwrap_or("(untitled)");
            let url = result["url"].as_str().unwrap_or("");
            let description = result["description"].as_str().unwrap_or("");
            lines.push(format!("{}. {title}\n   {url}\n   {description}", i + 1));
        }
        Ok(lines.join("\n\n"))
    }
}

// ─────────────────────────────────────────────
// web_fetch
// ─────────────────────────────────────────────

/// Fetch a URL and return its text content.
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its content as text. HTML is reduced to visible text."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Truncate the content to this many characters"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let url = require_string(&args, "url")?;
        let max_chars = optional_i64(&args, "max_chars")
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        debug!(url = %url, "web fetch");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("fetch failed: {e}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("fetch returned {}", resp.status());
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read body: {e}"))?;

        let text = if content_type.contains("text/html") {
            strip_html(&body)
        } else {
            body
        };

        let mut text = text.trim().to_string();
        if text.chars().count() > max_chars {
            text = text.chars().take(max_chars).collect();
            text.push_str("\n... (truncated)");
        }
        Ok(text)
    }
}

/// Very rough HTML → text: drops scripts/styles/tags, decodes a few common
/// entities, and collapses whitespace.
fn strip_html(html: &str) -> String {
    fn starts_with_ci(bytes: &[u8], prefix: &str) -> bool {
        bytes.len() >= prefix.len()
            && bytes[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    }

    let bytes = html.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            // Skip script/style blocks wholesale.
            let end_tag = if starts_with_ci(&bytes[i..], "<script") {
                Some("</script>")
            } else if starts_with_ci(&bytes[i..], "<style") {
                Some("</style>")
            } else {
                None
            };
            if let Some(end_tag) = end_tag {
                let mut j = i + 1;
                while j < bytes.len() && !starts_with_ci(&bytes[j..], end_tag) {
                    j += 1;
                }
                i = (j + end_tag.len()).min(bytes.len());
                out.push(b' ');
                continue;
            }
            // Skip the tag itself.
            while i < bytes.len() && bytes[i] != b'>' {
                i += 1;
            }
            i += 1;
            out.push(b' ');
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    let out = String::from_utf8_lossy(&out).into_owned();

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    // Collapse runs of whitespace, keep line structure readable.
    let mut result = String::with_capacity(decoded.len());
    let mut last_was_space = true;
    for c in decoded.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                result.push(if c == '\n' { '\n' } else { ' ' });
                last_was_space = true;
            }
        } else {
            result.push(c);
            last_was_space = false;
        }
    }
    result
}
