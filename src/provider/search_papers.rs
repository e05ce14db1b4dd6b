use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

use super::{
    PaperSource, ProviderError, ToolDefinition, category_clause, default_max_results,
    format_results, non_empty,
};

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
struct SearchPapersInput {
    #[schemars(description = "General keyword to search across all fields")]
    keyword: Option<String>,
    #[schemars(description = "Keyword to search in paper titles")]
    title: Option<String>,
    #[schemars(description = "Author name to search for")]
    author: Option<String>,
    #[serde(rename = "abstract")]
    #[schemars(description = "Keyword to search in paper abstracts")]
    abstract_text: Option<String>,
    #[schemars(
        description = "arXiv categories to filter by. Examples: cs.AI (Artificial Intelligence), cs.LG (Machine Learning), cs.CL (Computational Linguistics), cs.CV (Computer Vision), stat.ML (Statistics - Machine Learning)"
    )]
    #[serde(default)]
    categories: Vec<String>,
    #[schemars(description = "Maximum number of papers to return")]
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn build_query(input: &SearchPapersInput) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(title) = non_empty(&input.title) {
        parts.push(format!("ti:\"{title}\""));
    }
    if let Some(author) = non_empty(&input.author) {
        parts.push(format!("au:\"{author}\""));
    }
    if let Some(text) = non_empty(&input.abstract_text) {
        parts.push(format!("abs:\"{text}\""));
    }
    if let Some(clause) = category_clause(&input.categories) {
        parts.push(clause);
    }
    if let Some(keyword) = non_empty(&input.keyword) {
        parts.push(format!("all:\"{keyword}\""));
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts.join(" AND "))
}

async fn search_papers_impl(
    source: &dyn PaperSource,
    input: serde_json::Value,
) -> Result<Vec<String>, ProviderError> {
    let input: SearchPapersInput = serde_json::from_value(input)?;
    let Some(query) = build_query(&input) else {
        return Ok(vec![
            "Error: At least one search parameter is required.".to_string(),
        ]);
    };

    let papers = source.search(&query, input.max_results).await?;
    Ok(format_results(
        &papers,
        format!("No papers found for query: {query}"),
    ))
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "search_papers",
        description: "Search arXiv papers by keyword, title, author, abstract, or categories. Returns a list of papers with basic information.",
        input_schema: schema_for!(SearchPapersInput).to_value(),
        handler: |source, input| Box::pin(search_papers_impl(source, input)),
    }
}
