//! Prompt templates for the question-answering chain.

use crate::config::PromptStyle;
use crate::models::ScoredChunk;
use anyhow::{bail, Result};

const BASIC_TEMPLATE: &str = "\
You are an assistant for answering questions about HR policy documents.
Use the following context to answer the question clearly and simply.

Context:
{context}

Question:
{question}

Answer:
";

const CITED_TEMPLATE: &str = "\
You are an assistant helping employees understand HR policies at {company}.

Use the following extracted document content to answer the question.
Be concise, professional, and easy to understand.
If a page number is available for the information you use, end with \"For more information, refer to page <n>.\"
If no page reference is available, do not mention pages at all; just answer the question.

Context:
{context}

Question:
{question}

Answer:
";

const CONDENSE_TEMPLATE: &str = "\
Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question, in its original language.
Reply with the standalone question only.

Chat History:
{chat_history}

Follow Up Input: {question}
Standalone question:";

/// A template with named `{variable}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    input_variables: Vec<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, input_variables: &[&str]) -> Self {
        Self {
            template: template.into(),
            input_variables: input_variables.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn for_style(style: PromptStyle, company_name: &str) -> Self {
        match style {
            PromptStyle::Basic => Self::new(BASIC_TEMPLATE, &["context", "question"]),
            PromptStyle::Cited => Self::new(
                CITED_TEMPLATE.replace("{company}", company_name),
                &["context", "question"],
            ),
        }
    }

    pub fn condense() -> Self {
        Self::new(CONDENSE_TEMPLATE, &["chat_history", "question"])
    }

    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    /// Substitute every declared variable. Values are inserted verbatim, so a
    /// value containing `{question}` is never expanded a second time.
    pub fn format(&self, values: &[(&str, &str)]) -> Result<String> {
        for variable in &self.input_variables {
            if !values.iter().any(|(name, _)| name == variable) {
                bail!("missing value for prompt variable '{}'", variable);
            }
        }

        let mut output = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            output.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let substituted = after.find('}').and_then(|close| {
                let name = &after[..close];
                values
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, value)| (*value, close))
            });

            match substituted {
                Some((value, close)) => {
                    output.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    output.push('{');
                    rest = after;
                }
            }
        }
        output.push_str(rest);

        Ok(output)
    }
}

/// Render retrieved chunks into the `{context}` block ("stuff" strategy).
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|scored| {
            format!(
                "[Source: {}, page {}]\n{}",
                scored.chunk.source, scored.chunk.page, scored.chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
