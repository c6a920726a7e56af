//! Content schema registry
//!
//! Maps an exercise-type code to the typed [`ContentSchema`] its content must satisfy.
//! A registry is immutable once built; replacing a schema produces a new registry
//! with a bumped version so stored content keeps the version it was validated against.

use crate::error::{PipelineError, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    TextList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatHint {
    #[default]
    Free,
    /// Must contain a `___` blank
    BlankMarker,
    /// Must contain at least `[1]` and `[2]`
    NumberedOptions,
    /// Integer 1-9 or a non-empty phrase
    OptionNumber,
    /// At most eight words on one line
    SinglePhrase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageRole {
    #[default]
    Any,
    /// Learner's language
    Source,
    /// Language being learned
    Target,
}

fn default_true() -> bool {
    true
}

fn default_kind() -> FieldKind {
    FieldKind::Text
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: FieldKind,
    /// Minimum length in characters (items for `text_list`)
    #[serde(default)]
    pub min_length: usize,
    pub max_length: usize,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub format: FormatHint,
    #[serde(default)]
    pub language: LanguageRole,
    #[serde(default)]
    pub description: String,
    /// Free-text format guidance for the producer prompt
    #[serde(default)]
    pub format_description: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSchema {
    /// Exercise-type code this schema applies to
    pub id: String,
    pub name: String,
    #[serde(default = "default_schema_version")]
    pub version: u32,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub validation_rules: String,
}

fn default_schema_version() -> u32 {
    1
}

impl ContentSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::Invalid {
            schema: self.id.clone(),
            reason,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("schema id is empty".to_string()));
        }
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(invalid("field with empty name".to_string()));
            }
            if !names.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            if field.min_length > field.max_length {
                return Err(invalid(format!(
                    "field '{}' has min_length {} > max_length {}",
                    field.name, field.min_length, field.max_length
                )));
            }
        }
        if self.required_fields().next().is_none() {
            return Err(invalid("no required fields".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    version: u32,
    schemas: BTreeMap<String, ContentSchema>,
}

/// On-disk layout of a schema file
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default = "default_schema_version")]
    version: u32,
    schemas: Vec<ContentSchema>,
}

impl SchemaRegistry {
    pub fn new(version: u32, schemas: Vec<ContentSchema>) -> Result<Self, SchemaError> {
        let mut map = BTreeMap::new();
        for schema in schemas {
            if map.contains_key(&schema.id) {
                return Err(SchemaError::Invalid {
                    schema: schema.id.clone(),
                    reason: "registered twice".to_string(),
                });
            }
            map.insert(schema.id.clone(), schema);
        }
        let registry = SchemaRegistry {
            version,
            schemas: map,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Load from disk. `.toml` files are parsed as TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let raw = std::fs::read_to_string(path).map_err(|e| SchemaError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let file: SchemaFile = if is_toml {
            toml::from_str(&raw).map_err(|e| SchemaError::Malformed(e.to_string()))?
        } else {
            serde_json::from_str(&raw).map_err(|e| SchemaError::Malformed(e.to_string()))?
        };
        Self::new(file.version, file.schemas)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        self.schemas.values().try_for_each(ContentSchema::validate)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn lookup(&self, exercise_type: &str) -> Result<&ContentSchema, PipelineError> {
        self.schemas
            .get(exercise_type)
            .ok_or_else(|| PipelineError::SchemaNotFound(exercise_type.to_string()))
    }

    pub fn contains(&self, exercise_type: &str) -> bool {
        self.schemas.contains_key(exercise_type)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &ContentSchema> {
        self.schemas.values()
    }

    /// New registry with `schema` added or replaced; the registry version and the
    /// replaced schema's version are both bumped.
    pub fn with_schema(&self, mut schema: ContentSchema) -> Result<Self, SchemaError> {
        schema.validate()?;
        let mut schemas = self.schemas.clone();
        if let Some(previous) = schemas.get(&schema.id) {
            schema.version = schema.version.max(previous.version + 1);
        }
        schemas.insert(schema.id.clone(), schema);
        Ok(SchemaRegistry {
            version: self.version + 1,
            schemas,
        })
    }

    /// The six built-in four-field exercise schemas.
    pub fn builtin() -> Self {
        let schemas = vec![
            four_field_schema(
                "EX_MCQ",
                "Multiple Choice",
                [
                    "Concept explanation with contextual examples",
                    "Instructions for selecting from options",
                    "Sentence with blank followed by numbered options",
                    "Option number or the full correct phrase",
                ],
                (FormatHint::NumberedOptions, "Sentence with ___ followed by [1] Option1 [2] Option2 [3] Option3"),
                (FormatHint::OptionNumber, "Number (1, 2, 3) or complete sentence"),
                "Options must be numbered 1-3, only one correct answer",
                [
                    "Spanish articles must agree in gender with nouns. \"El\" (masculine) vs \"La\" (feminine).",
                    "Choose the correct option that best completes the sentence.",
                    "___ libro es interesante. [1] El [2] La [3] Los",
                    "1",
                ],
            ),
            four_field_schema(
                "EX_FILL",
                "Fill in the Blank",
                [
                    "Grammar rule explanation or vocabulary definitions with examples",
                    "Instructions for filling blanks",
                    "Sentence with missing word marked by underscores",
                    "Single word or phrase that fills the blank",
                ],
                (FormatHint::BlankMarker, "Sentence with ___ representing missing word"),
                (FormatHint::SinglePhrase, "Single word or short phrase"),
                "Underscores represent missing word, answer must fit context",
                [
                    "In Spanish, the verb \"ser\" is used for permanent characteristics. Example: \"Yo ___ estudiante\" -> \"Yo soy estudiante\".",
                    "Fill in the blank with the correct word that best completes the sentence.",
                    "Mi hermana ___ muy inteligente.",
                    "es",
                ],
            ),
            four_field_schema(
                "EX_ROLEPLAY",
                "Roleplay",
                [
                    "Cultural context and functional language patterns",
                    "Scenario setup and role description",
                    "Scenario description with context",
                    "Appropriate response in target language",
                ],
                (FormatHint::Free, "Scenario description with dialogue prompt"),
                (FormatHint::Free, "Complete response in target language"),
                "Response must be culturally appropriate and in target language",
                [
                    "When ordering food in Spanish, use \"Me gustaria\" for polite requests. Common phrases: \"Que recomienda?\"",
                    "You are at a restaurant in Madrid. Play the role of a customer ordering lunch.",
                    "Camarero: \"Que desea tomar?\" (Waiter: \"What would you like to order?\")",
                    "Me gustaria una paella, por favor.",
                ],
            ),
            four_field_schema(
                "EX_TRANS",
                "Translation",
                [
                    "Translation strategies and common pitfalls",
                    "Translation instructions",
                    "Source language sentence",
                    "Accurate translation in target language",
                ],
                (FormatHint::Free, "Complete sentence in source language"),
                (FormatHint::Free, "Complete sentence in target language"),
                "Translation must maintain meaning and be grammatically correct",
                [
                    "False cognates: \"embarazada\" means \"pregnant\", not \"embarrassed\". Always consider context.",
                    "Translate the following sentence from Spanish to English.",
                    "Ayer fui al mercado.",
                    "Yesterday I went to the market.",
                ],
            ),
            four_field_schema(
                "EX_ERROR",
                "Error Identification",
                [
                    "Common error patterns and correction rules",
                    "Error-finding instructions",
                    "Sentence containing an error",
                    "Corrected sentence",
                ],
                (FormatHint::Free, "Sentence with grammatical or vocabulary error"),
                (FormatHint::Free, "Complete corrected sentence"),
                "Output must fix the error in the input",
                [
                    "Ser vs Estar: use \"ser\" for permanent states, \"estar\" for temporary conditions.",
                    "Find and correct the error in the following sentence.",
                    "Yo estoy profesor.",
                    "Yo soy profesor.",
                ],
            ),
            four_field_schema(
                "EX_OPEN",
                "Open Response",
                [
                    "Communication strategies and response patterns",
                    "Open-ended response instructions",
                    "Open-ended question",
                    "Complete personal response",
                ],
                (FormatHint::Free, "Question requiring personal or creative response"),
                (FormatHint::Free, "Complete sentence or multiple sentences"),
                "Response must be relevant and in target language",
                [
                    "In Spanish conversations it is common to use diminutives like \"-ito\" for politeness: \"un momentito\".",
                    "Respond to the following question in a complete sentence.",
                    "Como te llamas y de donde eres?",
                    "Me llamo Carlos y soy de Mexico.",
                ],
            ),
        ];

        let mut map = BTreeMap::new();
        for mut schema in schemas {
            if schema.id == "EX_TRANS" {
                if let Some(input) = schema.fields.iter_mut().find(|f| f.name == "exercise_input") {
                    input.language = LanguageRole::Source;
                }
            }
            map.insert(schema.id.clone(), schema);
        }
        SchemaRegistry {
            version: 1,
            schemas: map,
        }
    }
}

fn four_field_schema(
    id: &str,
    name: &str,
    descriptions: [&str; 4],
    input_format: (FormatHint, &str),
    output_format: (FormatHint, &str),
    rules: &str,
    examples: [&str; 4],
) -> ContentSchema {
    let field = |name: &str,
                 min_length: usize,
                 max_length: usize,
                 index: usize,
                 format: (FormatHint, Option<&str>),
                 language: LanguageRole| FieldDefinition {
        name: name.to_string(),
        kind: FieldKind::Text,
        min_length,
        max_length,
        required: true,
        format: format.0,
        language,
        description: descriptions[index].to_string(),
        format_description: format.1.map(str::to_string),
        example: Some(examples[index].to_string()),
    };

    ContentSchema {
        id: id.to_string(),
        name: name.to_string(),
        version: 1,
        fields: vec![
            field("theory", 50, 2000, 0, (FormatHint::Free, None), LanguageRole::Any),
            field(
                "exercise_introduction",
                10,
                500,
                1,
                (FormatHint::Free, None),
                LanguageRole::Source,
            ),
            field(
                "exercise_input",
                10,
                1000,
                2,
                (input_format.0, Some(input_format.1)),
                LanguageRole::Any,
            ),
            field(
                "expected_output",
                1,
                500,
                3,
                (output_format.0, Some(output_format.1)),
                LanguageRole::Target,
            ),
        ],
        validation_rules: rules.to_string(),
    }
}
