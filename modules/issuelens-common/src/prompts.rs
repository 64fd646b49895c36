use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const DEFAULT_PROBLEM_EXTRACTION: &str = r#"You are analysing customer support tickets for a software product.

Identify every distinct problem the customer reports in the ticket below. For each problem give:
- Problem: one sentence describing the problem
- Severity: one of low, medium, high, critical
- Impact: who or what is affected

Known problem categories:
{{taxonomy}}

Similar past tickets, for context only:
{{similar_cases}}

Respond with one JSON object per problem, using the keys "Problem", "Severity" and "Impact".

Ticket:
{{text}}"#;

const DEFAULT_CLUSTER_SUMMARY: &str = r#"The following problem descriptions were grouped together because they are semantically similar.

{{descriptions}}

Write a short synopsis (at most three sentences) of the common underlying problem. Respond with the synopsis only."#;

/// Versioned prompt templates. Bumping `version` re-opens every issue for extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSet {
    pub version: String,
    pub problem_extraction: String,
    pub cluster_summary: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            problem_extraction: DEFAULT_PROBLEM_EXTRACTION.to_string(),
            cluster_summary: DEFAULT_CLUSTER_SUMMARY.to_string(),
        }
    }
}

impl PromptSet {
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn render_extraction(&self, text: &str, similar_cases: &str, taxonomy: &str) -> String {
        let vars = HashMap::from([
            ("text", text),
            ("similar_cases", similar_cases),
            ("taxonomy", taxonomy),
        ]);
        render_template(&self.problem_extraction, &vars)
    }

    pub fn render_cluster_summary(&self, descriptions: &str) -> String {
        let vars = HashMap::from([("descriptions", descriptions)]);
        render_template(&self.cluster_summary, &vars)
    }
}

/// Resolve `{{var}}` placeholders from `vars`. Unknown placeholders are left
/// as-is; an unterminated placeholder is emitted verbatim.
pub fn render_template(template: &str, vars: &HashMap<&str, &str>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') if chars.peek() == Some(&'}') => {
                        chars.next();
                        break;
                    }
                    Some(ch) => var_name.push(ch),
                    None => {
                        result.push_str("{{");
                        result.push_str(&var_name);
                        return result;
                    }
                }
            }

            let name = var_name.trim();
            if let Some(value) = vars.get(name) {
                result.push_str(value);
            } else {
                result.push_str("{{");
                result.push_str(name);
                result.push_str("}}");
            }
        } else {
            result.push(c);
        }
    }

    result
}
