//! Skill documents and the library of skills they can call.

use crate::errors::SkillError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// File extensions recognised when loading a library directory.
pub const SKILL_EXTENSIONS: &[&str] = &["psk", "json"];

/// Accepts a string, a number, or null, always yielding a string.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillHeader {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub skid: String,
    #[serde(default)]
    pub description: String,
}

/// One `step <N>` record, still untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStep {
    pub key: String,
    pub number: u64,
    pub kind: String,
    pub fields: Map<String, Value>,
}

impl RawStep {
    pub fn str_field(&self, name: &str) -> &str {
        self.fields.get(name).and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Deserialize the record into a typed argument struct.
    pub fn args<T: serde::de::DeserializeOwned>(&self) -> Result<T, SkillError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            SkillError::InvalidStep {
                step: self.key.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// Drop lines whose first non-blank character is `#`.
pub fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `"step 25"` -> `25`. Also accepts `"step25"`.
pub fn parse_step_key(key: &str) -> Option<u64> {
    key.strip_prefix("step")?.trim().parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkillDocument {
    /// Name the document is known by in a library.
    pub name: String,
    pub header: SkillHeader,
    /// Steps sorted by their numeric key.
    pub steps: Vec<RawStep>,
}

impl SkillDocument {
    pub fn parse(name: &str, text: &str) -> Result<Self, SkillError> {
        let cleaned = strip_comments(text);
        let value: Value = serde_json::from_str(&cleaned)
            .map_err(|e| SkillError::MalformedSkill(format!("{name}: {e}")))?;
        Self::from_value(name, value)
    }

    pub fn from_value(name: &str, value: Value) -> Result<Self, SkillError> {
        let Value::Object(map) = value else {
            return Err(SkillError::MalformedSkill(format!(
                "{name}: top level must be a mapping"
            )));
        };

        let mut header = SkillHeader::default();
        let mut steps = Vec::new();

        for (key, record) in map {
            if key == "header" {
                header = serde_json::from_value(record).map_err(|e| {
                    SkillError::MalformedSkill(format!("{name}: bad header: {e}"))
                })?;
                continue;
            }
            if key == "dummy" {
                continue;
            }
            if !key.starts_with("step") {
                warn!("Ignoring unknown key '{}' in skill '{}'", key, name);
                continue;
            }

            let number = parse_step_key(&key).ok_or_else(|| {
                SkillError::MalformedSkill(format!("{name}: bad step key '{key}'"))
            })?;
            let Value::Object(fields) = record else {
                return Err(SkillError::InvalidStep {
                    step: key,
                    reason: "step record must be a mapping".into(),
                });
            };
            let kind = fields
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| SkillError::InvalidStep {
                    step: key.clone(),
                    reason: "missing 'type'".into(),
                })?
                .to_string();
            steps.push(RawStep {
                key,
                number,
                kind,
                fields,
            });
        }

        steps.sort_by_key(|s| s.number);
        if let Some(pair) = steps.windows(2).find(|w| w[0].number == w[1].number) {
            return Err(SkillError::MalformedSkill(format!(
                "{name}: duplicate step number {}",
                pair[0].number
            )));
        }

        debug!("Parsed skill '{}' with {} steps", name, steps.len());
        Ok(Self {
            name: name.to_string(),
            header,
            steps,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SkillError> {
        let text = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main")
            .to_string();
        Self::parse(&name, &text)
    }
}

/// Skills available to `Use Skill` and `Overload Skill`, by name.
#[derive(Debug, Clone, Default)]
pub struct SkillLibrary {
    skills: BTreeMap<String, SkillDocument>,
}

impl SkillLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, doc: SkillDocument) {
        self.skills.insert(doc.name.clone(), doc);
    }

    pub fn with(mut self, doc: SkillDocument) -> Self {
        self.insert(doc);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SkillDocument> {
        self.skills.get(name.trim_matches('/'))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.skills.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Load every skill file below `root`. Each is keyed by its path relative
    /// to `root` without extension, and also by its header name when that differs.
    pub fn load_dir(root: &Path) -> Result<Self, SkillError> {
        let mut library = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let is_skill = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| SKILL_EXTENSIONS.contains(&e))
                    .unwrap_or(false);
                if !is_skill {
                    continue;
                }

                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .with_extension("");
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");

                let text = fs::read_to_string(&path)?;
                let doc = SkillDocument::parse(&key, &text)?;
                let alias = doc.header.name.clone();
                if !alias.is_empty() && alias != key && !library.skills.contains_key(&alias) {
                    let mut aliased = doc.clone();
                    aliased.name = alias;
                    library.insert(aliased);
                }
                library.insert(doc);
            }
        }

        info!("Loaded {} skills from {}", library.len(), root.display());
        Ok(library)
    }
}

/// The key `Use Skill` looks a skill up by.
pub fn skill_key(path: &str, name: &str) -> String {
    let path = path.trim_matches('/');
    let name = name.trim_matches('/');
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_are_stripped_before_parsing() {
        let text = r#"
# generated skill
{
    "header": {"name": "demo", "skid": 7},
    # a comment between steps
    "step 10": {"type": "Halt"},
    "step 5": {"type": "Wait", "time": 1},
    "dummy": ""
}
"#;
        let doc = SkillDocument::parse("demo", text).unwrap();
        assert_eq!(doc.header.skid, "7");
        let numbers: Vec<u64> = doc.steps.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![5, 10]);
    }

    #[test]
    fn step_without_type_is_rejected() {
        let err = SkillDocument::parse("bad", r#"{"step 1": {"x": 1}}"#).unwrap_err();
        assert!(matches!(err, SkillError::InvalidStep { .. }));
    }

    #[test]
    fn bad_step_key_is_rejected() {
        let err = SkillDocument::parse("bad", r#"{"step x": {"type": "Halt"}}"#).unwrap_err();
        assert!(matches!(err, SkillError::MalformedSkill(_)));
    }

    #[test]
    fn skill_keys_join_path_and_name() {
        assert_eq!(skill_key("public/amz", "browse"), "public/amz/browse");
        assert_eq!(skill_key("", "subA"), "subA");
    }
}
