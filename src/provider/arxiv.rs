use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::{Paper, PaperSource, ProviderError};

pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// Queries the arXiv Atom API, sorted by relevance.
pub struct ArxivClient {
    http: Client,
    endpoint: String,
}

impl ArxivClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn search_url(&self, query: &str, max_results: usize) -> Result<Url, ProviderError> {
        let max_results = max_results.to_string();
        Url::parse_with_params(
            &self.endpoint,
            [
                ("search_query", query),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ],
        )
        .map_err(|e| ProviderError::Query(e.to_string()))
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, ProviderError> {
        let url = self.search_url(query, max_results)?;
        debug!(%url, "querying arXiv");

        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_feed(&body))
    }
}

/// Papers in an arXiv Atom feed, in feed order. Entries without a title are
/// skipped.
pub fn parse_feed(xml: &str) -> Vec<Paper> {
    elements(xml, "entry")
        .into_iter()
        .filter_map(|entry| parse_entry(entry.body))
        .collect()
}

fn parse_entry(entry: &str) -> Option<Paper> {
    let title = first_text(entry, "title")?;

    let authors = elements(entry, "author")
        .into_iter()
        .filter_map(|author| first_text(author.body, "name"))
        .collect();

    let categories = elements(entry, "category")
        .into_iter()
        .filter_map(|category| category.attribute("term").map(decode_entities))
        .collect();

    let pdf_url = elements(entry, "link")
        .into_iter()
        .find(|link| link.attribute("title") == Some("pdf"))
        .and_then(|link| link.attribute("href").map(decode_entities))
        .or_else(|| first_text(entry, "id").map(|id| id.replacen("/abs/", "/pdf/", 1)))
        .unwrap_or_default();

    let published = first_text(entry, "published")
        .map(|date| date.chars().take(10).collect())
        .unwrap_or_default();

    Some(Paper {
        title,
        authors,
        summary: first_text(entry, "summary").unwrap_or_default(),
        published,
        categories,
        pdf_url,
    })
}

struct Element<'a> {
    attributes: &'a str,
    body: &'a str,
}

impl<'a> Element<'a> {
    fn attribute(&self, name: &str) -> Option<&'a str> {
        let needle = format!(" {name}=\"");
        let start = self.attributes.find(&needle)? + needle.len();
        let len = self.attributes[start..].find('"')?;
        Some(&self.attributes[start..start + len])
    }
}

/// Every `<tag ...>...</tag>` or `<tag .../>` directly matching `tag`, in
/// document order. Enough for the flat structure of arXiv entries.
fn elements<'a>(xml: &'a str, tag: &str) -> Vec<Element<'a>> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut found = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let at_boundary = after
            .chars()
            .next()
            .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace());
        if !at_boundary {
            rest = after;
            continue;
        }

        let Some(tag_end) = after.find('>') else {
            break;
        };
        let attributes = &after[..tag_end];
        if let Some(attributes) = attributes.strip_suffix('/') {
            found.push(Element {
                attributes,
                body: "",
            });
            rest = &after[tag_end + 1..];
            continue;
        }

        let body = &after[tag_end + 1..];
        let Some(body_end) = body.find(&close) else {
            break;
        };
        found.push(Element {
            attributes,
            body: &body[..body_end],
        });
        rest = &body[body_end + close.len()..];
    }

    found
}

/// Whitespace-collapsed, entity-decoded text of the first `tag` element.
fn first_text(xml: &str, tag: &str) -> Option<String> {
    let element = elements(xml, tag).into_iter().next()?;
    let text = element.body.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    Some(decode_entities(&text))
}

/// Decode XML character references in one pass. Unknown or malformed
/// references are kept as written.
fn decode_entities(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let candidate = &rest[start + 1..];
        let reference = candidate
            .find(';')
            .filter(|end| *end <= MAX_REFERENCE_LEN)
            .and_then(|end| Some((entity(&candidate[..end])?, end)));

        match reference {
            Some((ch, end)) => {
                decoded.push(ch);
                rest = &candidate[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = candidate;
            }
        }
    }

    decoded.push_str(rest);
    decoded
}

const MAX_REFERENCE_LEN: usize = 10;

fn entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
