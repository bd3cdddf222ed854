// src/evaluate/schema.rs
//! Closed set of response schemas a persona can bind to.
//!
//! Validation collects every problem instead of stopping at the first, so a
//! corrective re-prompt can name all of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::SchemaViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    GenaiNews,
    ProductIdeas,
}

impl SchemaKind {
    pub fn schema(self) -> &'static Schema {
        match self {
            SchemaKind::GenaiNews => &GENAI_NEWS,
            SchemaKind::ProductIdeas => &PRODUCT_IDEAS,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SchemaKind::GenaiNews => "genai_news",
            SchemaKind::ProductIdeas => "product_ideas",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    Number { min: f64, max: f64 },
    Text,
    OneOf(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
}

/// Model's own include/exclude call, carried alongside the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Include,
    Exclude,
}

#[derive(Debug)]
pub struct Schema {
    pub kind: SchemaKind,
    pub version: &'static str,
    pub fields: &'static [FieldSpec],
    pub score_field: &'static str,
    /// Joined with a space to form the rationale.
    pub rationale_fields: &'static [&'static str],
    pub audience_field: Option<&'static str>,
}

const DECISIONS: &[&str] = &["include", "exclude"];

pub static GENAI_NEWS: Schema = Schema {
    kind: SchemaKind::GenaiNews,
    version: "genai_news/v1",
    fields: &[
        FieldSpec {
            name: "relevance_score",
            ty: FieldType::Number { min: 0.0, max: 1.0 },
        },
        FieldSpec {
            name: "topic",
            ty: FieldType::Text,
        },
        FieldSpec {
            name: "why_it_matters",
            ty: FieldType::Text,
        },
        FieldSpec {
            name: "target_audience",
            ty: FieldType::OneOf(&["developer", "architect", "manager"]),
        },
        FieldSpec {
            name: "decision",
            ty: FieldType::OneOf(DECISIONS),
        },
    ],
    score_field: "relevance_score",
    rationale_fields: &["why_it_matters"],
    audience_field: Some("target_audience"),
};

pub static PRODUCT_IDEAS: Schema = Schema {
    kind: SchemaKind::ProductIdeas,
    version: "product_ideas/v1",
    fields: &[
        FieldSpec {
            name: "idea_type",
            ty: FieldType::Text,
        },
        FieldSpec {
            name: "problem_statement",
            ty: FieldType::Text,
        },
        FieldSpec {
            name: "solution_summary",
            ty: FieldType::Text,
        },
        FieldSpec {
            name: "maturity_level",
            ty: FieldType::OneOf(&["idea", "mvp", "early_traction", "scaling"]),
        },
        FieldSpec {
            name: "reusability_score",
            ty: FieldType::Number { min: 0.0, max: 1.0 },
        },
        FieldSpec {
            name: "decision",
            ty: FieldType::OneOf(DECISIONS),
        },
    ],
    score_field: "reusability_score",
    rationale_fields: &["problem_statement", "solution_summary"],
    audience_field: None,
};

/// A response that passed validation, reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub score: f64,
    pub rationale: String,
    pub audience: Option<String>,
    pub decision: Option<Decision>,
    /// Every declared field after coercion (enums lower-cased, numbers as f64).
    pub fields: Map<String, Value>,
}

/// Slice of `raw` from the first `{` to the last `}`. Tolerates ```json fences
/// and prose around the object.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

impl Schema {
    /// Field list in the form used inside prompts.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for f in self.fields {
            let ty = match f.ty {
                FieldType::Number { min, max } => format!("number between {min} and {max}"),
                FieldType::Text => "string".to_string(),
                FieldType::OneOf(opts) => format!(
                    "one of {}",
                    opts.iter()
                        .map(|o| format!("\"{o}\""))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            out.push_str(&format!("- \"{}\": {}\n", f.name, ty));
        }
        out
    }

    pub fn validate(&self, raw: &str) -> Result<Validated, SchemaViolation> {
        let tag = self.kind.tag();
        let body = extract_json_object(raw)
            .ok_or_else(|| SchemaViolation::single(tag, "response contains no JSON object"))?;
        let obj = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(m)) => m,
            Ok(_) => return Err(SchemaViolation::single(tag, "response is not a JSON object")),
            Err(e) => return Err(SchemaViolation::single(tag, format!("invalid JSON: {e}"))),
        };

        let mut problems = Vec::new();
        let mut fields = Map::new();
        for spec in self.fields {
            match obj.get(spec.name) {
                None | Some(Value::Null) => problems.push(format!("missing field '{}'", spec.name)),
                Some(v) => match coerce(spec, v) {
                    Ok(c) => {
                        fields.insert(spec.name.to_string(), c);
                    }
                    Err(p) => problems.push(p),
                },
            }
        }
        if !problems.is_empty() {
            return Err(SchemaViolation {
                schema: tag.to_string(),
                problems,
            });
        }

        let score = fields
            .get(self.score_field)
            .and_then(Value::as_f64)
            .unwrap_or_default();
        let rationale = self
            .rationale_fields
            .iter()
            .filter_map(|f| fields.get(*f).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let audience = self
            .audience_field
            .and_then(|f| fields.get(f))
            .and_then(Value::as_str)
            .map(str::to_string);
        let decision = match fields.get("decision").and_then(Value::as_str) {
            Some("include") => Some(Decision::Include),
            Some("exclude") => Some(Decision::Exclude),
            _ => None,
        };

        Ok(Validated {
            score,
            rationale,
            audience,
            decision,
            fields,
        })
    }
}

fn coerce(spec: &FieldSpec, v: &Value) -> Result<Value, String> {
    match spec.ty {
        FieldType::Number { min, max } => {
            let n = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("field '{}' must be a number", spec.name))?;
            if n < min || n > max {
                return Err(format!(
                    "field '{}' = {n} is outside [{min}, {max}]",
                    spec.name
                ));
            }
            Ok(Value::from(n))
        }
        FieldType::Text => match v {
            Value::String(s) => Ok(Value::String(s.clone())),
            _ => Err(format!("field '{}' must be a string", spec.name)),
        },
        FieldType::OneOf(opts) => {
            let s = v
                .as_str()
                .map(|s| s.trim().to_ascii_lowercase())
                .ok_or_else(|| format!("field '{}' must be a string", spec.name))?;
            if opts.contains(&s.as_str()) {
                Ok(Value::String(s))
            } else {
                Err(format!(
                    "field '{}' = \"{s}\" is not one of [{}]",
                    spec.name,
                    opts.join(", ")
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{"relevance_score": 0.82, "topic": "inference",
        "why_it_matters": "Halves serving cost.", "target_audience": "Architect",
        "decision": "include"}"#;

    #[test]
    fn accepts_a_conforming_response() {
        let v = GENAI_NEWS.validate(GOOD).unwrap();
        assert!((v.score - 0.82).abs() < 1e-9);
        assert_eq!(v.rationale, "Halves serving cost.");
        assert_eq!(v.audience.as_deref(), Some("architect"));
        assert_eq!(v.decision, Some(Decision::Include));
    }

    #[test]
    fn tolerates_fences_and_prose() {
        let raw = format!("Sure! Here is the evaluation:\n```json\n{GOOD}\n```\n");
        assert!(GENAI_NEWS.validate(&raw).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let raw = r#"{"relevance_score": 1.4, "topic": 3, "target_audience": "ceo", "decision": "include"}"#;
        let err = GENAI_NEWS.validate(raw).unwrap_err();
        assert_eq!(err.schema, "genai_news");
        assert_eq!(err.problems.len(), 4, "{:?}", err.problems);
        assert!(err.problems.iter().any(|p| p.contains("missing field 'why_it_matters'")));
        assert!(err.problems.iter().any(|p| p.contains("outside [0, 1]")));
    }

    #[test]
    fn non_json_is_a_violation() {
        assert!(GENAI_NEWS.validate("I think this is relevant.").is_err());
        assert!(GENAI_NEWS.validate("{not json}").is_err());
    }

    #[test]
    fn product_ideas_join_rationale_and_coerce_numeric_strings() {
        let raw = r#"{"idea_type": "devtool", "problem_statement": "Prompts drift.",
            "solution_summary": "Version them like code.", "maturity_level": "mvp",
            "reusability_score": "0.5", "decision": "include"}"#;
        let v = PRODUCT_IDEAS.validate(raw).unwrap();
        assert_eq!(v.score, 0.5);
        assert_eq!(v.rationale, "Prompts drift. Version them like code.");
        assert!(v.audience.is_none());
    }

    #[test]
    fn describe_lists_fields_with_ranges() {
        let d = GENAI_NEWS.describe();
        assert!(d.contains("\"relevance_score\": number between 0 and 1"));
        assert!(d.contains("\"target_audience\": one of \"developer\", \"architect\", \"manager\""));
    }
}
