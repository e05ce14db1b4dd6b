use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};

use super::{
    PaperSource, ProviderError, ToolDefinition, category_clause, default_max_results,
    format_results,
};

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct MultipleKeywordsInput {
    #[schemars(description = "List of keywords that must all be present in the paper")]
    keywords: Vec<String>,
    #[schemars(description = "arXiv categories to filter by (optional)")]
    #[serde(default)]
    categories: Vec<String>,
    #[schemars(description = "Maximum number of papers to return")]
    #[serde(default = "default_max_results")]
    max_results: usize,
}

async fn search_with_multiple_keywords_impl(
    source: &dyn PaperSource,
    input: serde_json::Value,
) -> Result<Vec<String>, ProviderError> {
    let input: MultipleKeywordsInput = serde_json::from_value(input)?;
    let keywords: Vec<&str> = input
        .keywords
        .iter()
        .map(|keyword| keyword.trim())
        .filter(|keyword| !keyword.is_empty())
        .collect();
    if keywords.is_empty() {
        return Ok(vec!["Error: At least one keyword is required.".to_string()]);
    }

    let mut parts: Vec<String> = keywords
        .iter()
        .map(|keyword| format!("all:\"{keyword}\""))
        .collect();
    if let Some(clause) = category_clause(&input.categories) {
        parts.push(clause);
    }
    let query = parts.join(" AND ");

    let papers = source.search(&query, input.max_results).await?;
    Ok(format_results(
        &papers,
        format!(
            "No papers found containing all keywords: {}",
            keywords.join(", ")
        ),
    ))
}

pub(crate) fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "search_with_multiple_keywords",
        description: "Search for papers that contain ALL of the specified keywords. Useful for finding papers on specific topics.",
        input_schema: schema_for!(MultipleKeywordsInput).to_value(),
        handler: |source, input| Box::pin(search_with_multiple_keywords_impl(source, input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::FixedSource;
    use serde_json::json;

    #[tokio::test]
    async fn keywords_are_all_required_and_categories_ored() {
        let source = FixedSource::new(vec![]);

        let parts = search_with_multiple_keywords_impl(
            &source,
            json!({
                "keywords": ["transformer", "attention"],
                "categories": ["cs.CL", "cs.LG"],
                "max_results": 3
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            source.queries(),
            vec![(
                "all:\"transformer\" AND all:\"attention\" AND (cat:cs.CL OR cat:cs.LG)"
                    .to_string(),
                3
            )]
        );
        assert_eq!(
            parts,
            vec!["No papers found containing all keywords: transformer, attention"]
        );
    }

    #[tokio::test]
    async fn empty_keyword_list_is_reported_as_text() {
        let source = FixedSource::new(vec![]);
        let parts = search_with_multiple_keywords_impl(&source, json!({"keywords": [" "]}))
            .await
            .unwrap();
        assert_eq!(parts, vec!["Error: At least one keyword is required."]);
    }

    #[tokio::test]
    async fn missing_keywords_field_is_invalid() {
        let source = FixedSource::new(vec![]);
        let result = search_with_multiple_keywords_impl(&source, json!({})).await;
        assert!(matches!(result, Err(ProviderError::InvalidArguments(_))));
    }

    #[test]
    fn schema_requires_keywords() {
        let schema = definition().input_schema;
        assert_eq!(schema["required"], json!(["keywords"]));
    }
}
