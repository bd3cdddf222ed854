// src/evaluate/persona.rs
//! Named evaluation profiles. Built-ins can be overridden or extended from the
//! `[[personas]]` section of the config document.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::schema::{Schema, SchemaKind};
use crate::error::{DigestError, Result};
use crate::ingest::types::Candidate;

const SUMMARY_PROMPT_CHARS: usize = 1500;
pub const DEFAULT_RATIONALE_FALLBACK: &str = "(no rationale given)";

const GENAI_NEWS_TEMPLATE: &str = "\
You curate technical news about generative AI, model inference and ML infrastructure \
for engineers. Judge how relevant the item below is to practitioners building with LLMs. \
Marketing fluff, funding announcements and generic opinion pieces score low.";

const PRODUCT_IDEAS_TEMPLATE: &str = "\
You scan launches and discussions for reusable product and startup ideas. Judge whether \
the item below describes a concrete problem with a reusable solution pattern that a small \
team could build on.";

/// `[[personas]]` entry. Unset fields inherit from the built-in of the same name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaSpec {
    pub name: String,
    #[serde(default)]
    pub schema: Option<SchemaKind>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Rationale used when the model leaves every rationale field blank.
    #[serde(default)]
    pub rationale_fallback: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub name: String,
    pub description: String,
    pub schema: SchemaKind,
    pub min_score: f64,
    /// Framing text. May reference `{title}`, `{source}`, `{url}`, `{summary}`;
    /// when it references none of them the item block is appended.
    pub prompt_template: String,
    pub rationale_fallback: String,
}

impl Persona {
    pub fn schema_def(&self) -> &'static Schema {
        self.schema.schema()
    }

    pub fn render_prompt(&self, c: &Candidate) -> String {
        let summary: String = c.summary.chars().take(SUMMARY_PROMPT_CHARS).collect();
        let url = c.url.as_deref().unwrap_or("(none)");
        static RE_PLACEHOLDER: OnceCell<Regex> = OnceCell::new();
        let re = RE_PLACEHOLDER
            .get_or_init(|| Regex::new(r"\{(title|source|url|summary)\}").unwrap());
        let inline = re.is_match(&self.prompt_template);

        // One pass, so substituted values are never scanned for placeholders.
        let mut out = re
            .replace_all(&self.prompt_template, |caps: &Captures| match &caps[1] {
                "title" => c.title.clone(),
                "source" => c.source.clone(),
                "url" => url.to_string(),
                _ => summary.clone(),
            })
            .into_owned();
        if !inline {
            out.push_str(&format!(
                "\n\nItem:\nTitle: {}\nSource: {}\nURL: {}\nSummary: {}\n",
                c.title, c.source, url, summary
            ));
        }
        out.push_str("\nRespond with a single JSON object with exactly these fields:\n");
        out.push_str(&self.schema_def().describe());
        out
    }
}

fn builtin(name: &str) -> Option<Persona> {
    match name {
        "GENAI_NEWS" => Some(Persona {
            name: "GENAI_NEWS".into(),
            description: "Technical GenAI and infrastructure news".into(),
            schema: SchemaKind::GenaiNews,
            min_score: 0.6,
            prompt_template: GENAI_NEWS_TEMPLATE.into(),
            rationale_fallback: DEFAULT_RATIONALE_FALLBACK.into(),
        }),
        "PRODUCT_IDEAS" => Some(Persona {
            name: "PRODUCT_IDEAS".into(),
            description: "Product and startup opportunity scanner".into(),
            schema: SchemaKind::ProductIdeas,
            min_score: 0.5,
            prompt_template: PRODUCT_IDEAS_TEMPLATE.into(),
            rationale_fallback: DEFAULT_RATIONALE_FALLBACK.into(),
        }),
        _ => None,
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Read-only during a run; looked up by (case-insensitive) name.
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, Arc<Persona>>,
}

impl PersonaRegistry {
    pub fn with_builtins() -> Self {
        let mut r = Self::default();
        for name in ["GENAI_NEWS", "PRODUCT_IDEAS"] {
            if let Some(p) = builtin(name) {
                r.insert(p);
            }
        }
        r
    }

    pub fn insert(&mut self, persona: Persona) {
        self.personas
            .insert(normalize_name(&persona.name), Arc::new(persona));
    }

    /// Apply config entries on top of what is registered. A new name must
    /// declare its schema; every min_score must lie in [0, 1].
    pub fn apply_specs(&mut self, specs: &[PersonaSpec]) -> Result<()> {
        for spec in specs {
            let key = normalize_name(&spec.name);
            if key.is_empty() {
                return Err(DigestError::config("persona name must not be empty"));
            }
            let base = self.personas.get(&key).map(|p| p.as_ref().clone());
            let schema = match (spec.schema, &base) {
                (Some(s), _) => s,
                (None, Some(b)) => b.schema,
                (None, None) => {
                    return Err(DigestError::config(format!(
                        "persona '{}': schema is required for a new persona",
                        spec.name
                    )))
                }
            };
            let min_score = spec
                .min_score
                .or(base.as_ref().map(|b| b.min_score))
                .unwrap_or(0.5);
            if !(0.0..=1.0).contains(&min_score) {
                return Err(DigestError::config(format!(
                    "persona '{}': min_score {min_score} outside [0, 1]",
                    spec.name
                )));
            }
            let prompt_template = spec
                .prompt_template
                .clone()
                .filter(|t| !t.trim().is_empty())
                .or(base.as_ref().map(|b| b.prompt_template.clone()))
                .unwrap_or_else(|| format!("Evaluate the item below for the '{}' digest.", spec.name));
            let description = spec
                .description
                .clone()
                .or(base.as_ref().map(|b| b.description.clone()))
                .unwrap_or_default();
            let rationale_fallback = spec
                .rationale_fallback
                .clone()
                .or(base.as_ref().map(|b| b.rationale_fallback.clone()))
                .unwrap_or_else(|| DEFAULT_RATIONALE_FALLBACK.to_string());

            self.insert(Persona {
                name: key,
                description,
                schema,
                min_score,
                prompt_template,
                rationale_fallback,
            });
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Persona>> {
        self.personas
            .get(&normalize_name(name))
            .cloned()
            .ok_or_else(|| {
                DigestError::config(format!(
                    "unknown persona '{name}' (known: {})",
                    self.names().join(", ")
                ))
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.personas.keys().map(String::as_str).collect()
    }
}
