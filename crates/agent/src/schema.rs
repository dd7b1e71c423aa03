//! Interaction schema supplied with a test request
//!
//! A schema may be a structured document (JSON or YAML) with key bindings
//! and an explicit step list, or plain free text describing the controls.

use gameqa_common::GameType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dispatcher::key_stroke;

/// Largest schema accepted at submission
pub const MAX_SCHEMA_BYTES: usize = 64 * 1024;

const SCHEMA_FIELDS: &[&str] = &["game_type", "controls", "description", "steps"];

/// Caller-provided hints about how to drive the game
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractionSchema {
    /// Forces the game type instead of detecting it
    #[serde(default)]
    pub game_type: Option<GameType>,

    /// Action name to key names, e.g. `jump: [Space, ArrowUp]`
    #[serde(default)]
    pub controls: BTreeMap<String, Vec<String>>,

    /// Free-text description forwarded to the evaluator
    #[serde(default)]
    pub description: Option<String>,

    /// Explicit plan, replacing the standard one
    #[serde(default)]
    pub steps: Vec<ActionStep>,
}

/// A single step of an interaction plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionStep {
    /// Press a key on the dispatch target
    Press { key: String },

    /// Click an element or a point
    Click {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },

    /// Wait a fixed amount of time
    Wait { ms: u64 },

    /// Capture a post-interaction screenshot
    Screenshot,
}

impl ActionStep {
    /// Short label used in logs
    pub fn label(&self) -> String {
        match self {
            ActionStep::Press { key } => format!("press:{}", key),
            ActionStep::Click { selector: Some(sel), .. } => format!("click:{}", sel),
            ActionStep::Click { x, y, .. } => {
                format!("click:{},{}", x.unwrap_or_default(), y.unwrap_or_default())
            }
            ActionStep::Wait { ms } => format!("wait:{}ms", ms),
            ActionStep::Screenshot => "screenshot".to_string(),
        }
    }
}

impl InteractionSchema {
    /// Parse a schema leniently.
    ///
    /// Structured documents are accepted as JSON or YAML. A bare string is
    /// taken as a free-text description. Anything else is an error carrying
    /// the reason; callers fall back to default detection.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("schema is empty".to_string());
        }

        let value: serde_yaml::Value = match serde_yaml::from_str(raw) {
            Ok(value) => value,
            // Prose with stray colons or quotes is still a description
            Err(_) if !raw.starts_with('{') && !raw.starts_with('[') => {
                return Ok(Self::free_text(raw));
            }
            Err(e) => return Err(format!("unparseable schema: {}", e)),
        };

        match value {
            serde_yaml::Value::String(text) => Ok(Self::free_text(&text)),
            serde_yaml::Value::Mapping(ref map) => {
                let structured = raw.starts_with('{')
                    || map
                        .keys()
                        .filter_map(|k| k.as_str())
                        .any(|k| SCHEMA_FIELDS.contains(&k));
                match serde_yaml::from_value::<Self>(value.clone()) {
                    Ok(schema) => {
                        schema.validate()?;
                        Ok(schema)
                    }
                    // "Move: arrow keys" reads as a mapping but is prose
                    Err(_) if !structured => Ok(Self::free_text(raw)),
                    Err(e) => Err(format!("invalid schema: {}", e)),
                }
            }
            _ => Err("schema must be a mapping or free text".to_string()),
        }
    }

    fn free_text(text: &str) -> Self {
        Self {
            description: Some(text.trim().to_string()),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), String> {
        for step in &self.steps {
            if let ActionStep::Click { selector: None, x, y } = step {
                if x.is_none() || y.is_none() {
                    return Err("click step needs a selector or both x and y".to_string());
                }
            }
        }
        Ok(())
    }

    /// Distinct bound keys the dispatcher understands, in binding order
    pub fn bound_keys(&self) -> (Vec<String>, Vec<String>) {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for key in self.controls.values().flatten() {
            if key_stroke(key).is_some() {
                if !known.contains(key) {
                    known.push(key.clone());
                }
            } else if !unknown.contains(key) {
                unknown.push(key.clone());
            }
        }
        (known, unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_yaml() {
        let yaml = r#"
game_type: canvas
description: Side-scrolling platformer
controls:
  move: [ArrowLeft, ArrowRight]
  jump: [Space]
steps:
  - action: press
    key: ArrowRight
  - action: wait
    ms: 250
  - action: click
    x: 100
    y: 200
  - action: screenshot
"#;
        let schema = InteractionSchema::parse(yaml).unwrap();
        assert_eq!(schema.game_type, Some(GameType::Canvas));
        assert_eq!(schema.steps.len(), 4);
        assert_eq!(schema.steps[3], ActionStep::Screenshot);
        assert_eq!(schema.controls["jump"], vec!["Space".to_string()]);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"controls": {"fire": ["x", "Enter"]}, "game_type": "dom"}"#;
        let schema = InteractionSchema::parse(json).unwrap();
        assert_eq!(schema.game_type, Some(GameType::Dom));
        let (known, unknown) = schema.bound_keys();
        assert_eq!(known, vec!["x".to_string(), "Enter".to_string()]);
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_free_text_becomes_description() {
        let schema = InteractionSchema::parse("Use arrow keys to move: avoid the ghosts").unwrap();
        assert_eq!(
            schema.description.as_deref(),
            Some("Use arrow keys to move: avoid the ghosts")
        );
        assert!(schema.steps.is_empty());
    }

    #[test]
    fn test_broken_structure_is_rejected() {
        assert!(InteractionSchema::parse("{\"controls\": [1, 2").is_err());
        assert!(InteractionSchema::parse("controls: 42").is_err());
        assert!(InteractionSchema::parse("   ").is_err());
    }

    #[test]
    fn test_click_without_target_is_rejected() {
        let yaml = "steps:\n  - action: click\n    x: 10\n";
        assert!(InteractionSchema::parse(yaml).is_err());
    }

    #[test]
    fn test_unknown_keys_reported() {
        let yaml = "controls:\n  warp: [Hyperdrive, ArrowUp]\n";
        let (known, unknown) = InteractionSchema::parse(yaml).unwrap().bound_keys();
        assert_eq!(known, vec!["ArrowUp".to_string()]);
        assert_eq!(unknown, vec!["Hyperdrive".to_string()]);
    }
}
