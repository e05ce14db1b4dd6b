//! Built-in paper search capability server.
//!
//! Runs as `paperlens tools-server`, an MCP server on stdin/stdout that
//! [`crate::mcp`] connects to, with arXiv as the paper index.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

pub mod arxiv;
mod search_papers;
mod search_with_multiple_keywords;
pub mod server;

pub use arxiv::ArxivClient;
pub use server::serve;

pub const DEFAULT_MAX_RESULTS: usize = 10;
const SUMMARY_CHARS: usize = 300;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),

    #[error("paper search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid paper search query: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paper {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    /// `YYYY-MM-DD`
    pub published: String,
    pub categories: Vec<String>,
    pub pdf_url: String,
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Papers matching an arXiv-syntax `query`, most relevant first.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, ProviderError>;
}

type ToolHandler = for<'a> fn(
    &'a dyn PaperSource,
    serde_json::Value,
) -> Pin<Box<dyn Future<Output = Result<Vec<String>, ProviderError>> + Send + 'a>>;

pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: serde_json::Value,
    pub(crate) handler: ToolHandler,
}

pub(crate) fn get_all_tools() -> Vec<ToolDefinition> {
    vec![
        search_papers::definition(),
        search_with_multiple_keywords::definition(),
    ]
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

/// `(cat:a OR cat:b)`, or nothing for an empty filter.
fn category_clause(categories: &[String]) -> Option<String> {
    let categories: Vec<String> = categories
        .iter()
        .map(|category| category.trim())
        .filter(|category| !category.is_empty())
        .map(|category| format!("cat:{category}"))
        .collect();
    if categories.is_empty() {
        return None;
    }
    Some(format!("({})", categories.join(" OR ")))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// One content part per paper, or a single "nothing found" part.
fn format_results(papers: &[Paper], empty_message: String) -> Vec<String> {
    if papers.is_empty() {
        return vec![empty_message];
    }
    papers
        .iter()
        .enumerate()
        .map(|(index, paper)| format_paper(index + 1, paper))
        .collect()
}

fn format_paper(position: usize, paper: &Paper) -> String {
    let mut authors = paper
        .authors
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if paper.authors.len() > 3 {
        authors.push_str(&format!(" et al. ({} total)", paper.authors.len()));
    }

    let summary = crate::tools::truncate(&paper.summary, SUMMARY_CHARS);
    format!(
        "{position}. {}\n   Authors: {authors}\n   Published: {}\n   Categories: {}\n   PDF: {}\n   Summary: {summary}",
        paper.title,
        paper.published,
        paper.categories.join(", "),
        paper.pdf_url,
    )
}
