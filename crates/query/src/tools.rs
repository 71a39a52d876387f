//! Course-search tool selection.
//!
//! Providers with native function calling pick the tool themselves; for the
//! rest a text heuristic pulls a topic out of the question. Which strategy
//! runs is decided by provider capability in [`selector_for`].

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use llm::{LlmProvider, ToolSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const SEARCH_COURSES: &str = "search_courses";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub topic: String,
}

#[async_trait]
pub trait ToolSelector: Send + Sync {
    async fn select(&self, query: &str) -> Option<ToolInvocation>;
}

pub fn search_courses_spec() -> ToolSpec {
    ToolSpec {
        name: SEARCH_COURSES.to_string(),
        description: "Search the course catalogue for courses on a topic".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "topic": {"type": "string", "description": "Topic to find courses about"}
            },
            "required": ["topic"]
        }),
    }
}

/// Lets the model decide through its function-calling interface.
pub struct NativeToolSelector {
    llm: Arc<dyn LlmProvider>,
}

impl NativeToolSelector {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ToolSelector for NativeToolSelector {
    async fn select(&self, query: &str) -> Option<ToolInvocation> {
        let calls = match self.llm.complete_with_tools(query, &[search_courses_spec()]).await {
            Ok(calls) => calls,
            Err(e) => {
                warn!(error = %e, "Tool selection failed");
                return None;
            }
        };

        calls.into_iter().find_map(|call| {
            if call.name != SEARCH_COURSES {
                return None;
            }
            let topic = call.arguments.get("topic")?.as_str()?.trim().to_string();
            (!topic.is_empty()).then(|| ToolInvocation {
                name: call.name,
                topic,
            })
        })
    }
}

// Literal patterns; compilation cannot fail.
static COURSE_TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcourses?\b(?:\s+\w+)?\s+(?:about|on|for|covering|in)\s+(?P<topic>.+)")
        .expect("course topic pattern")
});
static LEARN_TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:learn|study|teach me)\s+(?:more\s+)?(?:about\s+)?(?P<topic>.+)")
        .expect("learn topic pattern")
});

/// Regex topic extraction for providers without function calling.
#[derive(Debug, Default)]
pub struct HeuristicToolSelector;

impl HeuristicToolSelector {
    pub fn extract_topic(query: &str) -> Option<String> {
        let caps = COURSE_TOPIC
            .captures(query)
            .or_else(|| LEARN_TOPIC.captures(query))?;

        let topic = caps["topic"]
            .trim()
            .trim_end_matches(|c: char| matches!(c, '?' | '.' | '!'))
            .trim();

        (!topic.is_empty()).then(|| topic.to_string())
    }
}

#[async_trait]
impl ToolSelector for HeuristicToolSelector {
    async fn select(&self, query: &str) -> Option<ToolInvocation> {
        Self::extract_topic(query).map(|topic| ToolInvocation {
            name: SEARCH_COURSES.to_string(),
            topic,
        })
    }
}

pub fn selector_for(llm: Arc<dyn LlmProvider>) -> Arc<dyn ToolSelector> {
    if llm.supports_tools() {
        Arc::new(NativeToolSelector::new(llm))
    } else {
        Arc::new(HeuristicToolSelector)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

#[async_trait]
pub trait CourseSearch: Send + Sync {
    async fn search(&self, topic: &str, limit: usize) -> Result<Vec<Course>>;
}

#[derive(Deserialize)]
struct CourseSearchResponse {
    courses: Vec<Course>,
}

/// Client for the course catalogue's `GET /courses?q=` endpoint.
#[derive(Clone)]
pub struct HttpCourseSearch {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCourseSearch {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CourseSearch for HttpCourseSearch {
    async fn search(&self, topic: &str, limit: usize) -> Result<Vec<Course>> {
        let url = format!("{}/courses", self.base_url.trim_end_matches('/'));
        let limit = limit.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("q", topic), ("limit", limit.as_str())])
            .send()
            .await
            .context("Failed to send course search request")?;

        if !response.status().is_success() {
            anyhow::bail!("Course search failed: {}", response.status());
        }

        let parsed: CourseSearchResponse = response
            .json()
            .await
            .context("Failed to parse course search response")?;

        Ok(parsed.courses)
    }
}

pub fn format_courses(courses: &[Course]) -> String {
    let mut out = String::from("Courses:");
    for course in courses {
        out.push_str(&format!("\n- {} ({})", course.title, course.url));
        if !course.description.is_empty() {
            out.push_str(&format!(": {}", course.description));
        }
    }
    out
}

/// Selector plus catalogue: produces the extra prompt section, if any.
#[derive(Clone)]
pub struct CourseTool {
    selector: Arc<dyn ToolSelector>,
    search: Arc<dyn CourseSearch>,
    timeout: Duration,
    limit: usize,
}

impl CourseTool {
    pub fn new(
        selector: Arc<dyn ToolSelector>,
        search: Arc<dyn CourseSearch>,
        timeout: Duration,
    ) -> Self {
        Self {
            selector,
            search,
            timeout,
            limit: 3,
        }
    }

    /// Failures are logged and yield `None`; the answer never depends on them.
    pub async fn run(&self, query: &str) -> Option<String> {
        let invocation = match timeout(self.timeout, self.selector.select(query)).await {
            Ok(Some(invocation)) => invocation,
            Ok(None) => return None,
            Err(_) => {
                warn!("Tool selection timed out");
                return None;
            }
        };

        debug!(tool = %invocation.name, topic = %invocation.topic, "tool selected");

        match timeout(self.timeout, self.search.search(&invocation.topic, self.limit)).await {
            Ok(Ok(courses)) if !courses.is_empty() => Some(format_courses(&courses)),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(topic = %invocation.topic, error = %e, "Course search failed");
                None
            }
            Err(_) => {
                warn!(topic = %invocation.topic, "Course search timed out");
                None
            }
        }
    }
}
