pub const SYSTEM_PROMPT: &str = "You explain research terms to curious readers. \
Use the paper search tools to find real papers before answering, and ground every claim \
in what those papers say.";

/// First user message of a session: how to search, filter and write up `term`.
pub fn explanation_request(term: &str) -> String {
    format!(
        r#"You are a research term explainer. Your task is to explain the term: '{term}'

Follow these steps in order:

Step 1: Search for relevant papers
- If you know landmark/seminal papers for this term, search by exact title
- Search using the original term '{term}' as a keyword
- Search using related technical terms, variations, or more specific keywords
- Use multiple search queries to gather approximately 20-30 papers total
- Use max_results parameter appropriately for each search

Step 2: Filter papers based on abstracts
- Read the abstract of each retrieved paper carefully
- Select only papers that are directly relevant to explaining '{term}'
- Exclude papers that only mention the term tangentially
- Aim to select the top 10 most relevant papers (or fewer if less than 10 are truly relevant)
- Prioritize: foundational papers, seminal works, survey papers, and highly-cited research

Step 3: Write the explanation
- Based on the abstracts of the selected papers, write a comprehensive explanation of '{term}'
- Include: definition, key concepts, applications, and significance in the field
- Reference specific papers when explaining concepts (e.g., "as introduced in [Paper Title]")
- Use proper Markdown format with double line breaks between sections

Step 4: Display the selected papers
- At the end, show the 10 most relevant papers
- Use the actual PDF URL from each paper result, never placeholder text
- Format each paper link like this example:
  - [Attention is All You Need](https://arxiv.org/pdf/1706.03762) - Introduces the Transformer architecture

## Related Papers

[List the actual papers here with their real PDF URLs]

Format requirements:
- Use proper Markdown with clear line breaks and double line breaks between sections
- In the explanation text (Step 3), insert a newline character (\n) after every sentence ending in '.'
- Keep the explanation evidence-based, using the paper abstracts

Your explanation should be grounded in the actual content of the papers you found, not just general knowledge.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_names_the_term() {
        let prompt = explanation_request("attention mechanism");
        assert!(prompt.contains("explain the term: 'attention mechanism'"));
        assert!(prompt.contains("## Related Papers"));
        assert!(prompt.contains("newline character (\\n) after every sentence"));
    }
}
