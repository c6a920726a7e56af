//! Curriculum dimension catalog
//!
//! Static definition of the five curriculum dimensions (language pairs, levels,
//! content categories, exercise types, topics) and the exclusion rules that
//! prune the combination matrix. Loaded once at startup, read-only afterwards.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguagePair {
    pub code: String,
    /// ISO 639-1 code of the learner's language
    pub source_lang: String,
    /// ISO 639-1 code of the language being learned
    pub target_lang: String,
    pub source_name: String,
    pub target_name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// 1 = highest
    #[serde(default = "default_priority")]
    pub priority: u32,
}

impl LanguagePair {
    pub fn display_name(&self) -> String {
        format!("{} -> {}", self.source_name, self.target_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Level {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExerciseType {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub requires_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

/// Partial match over dimension codes. Unset fields match anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExclusionRule {
    #[serde(default)]
    pub language_pair: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub exercise_type: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl ExclusionRule {
    pub fn matches(&self, codes: &DimensionCodes<'_>) -> bool {
        fn field(rule: &Option<String>, code: &str) -> bool {
            rule.as_deref().map_or(true, |r| r == code)
        }
        field(&self.language_pair, codes.language_pair)
            && field(&self.level, codes.level)
            && field(&self.category, codes.category)
            && field(&self.exercise_type, codes.exercise_type)
            && field(&self.topic, codes.topic)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CombinationRules {
    /// Drop exercise types that need audio (text-only delivery channel)
    #[serde(default = "default_true")]
    pub skip_audio: bool,
    #[serde(default)]
    pub exclude: Vec<ExclusionRule>,
}

impl Default for CombinationRules {
    fn default() -> Self {
        Self {
            skip_audio: true,
            exclude: Vec::new(),
        }
    }
}

/// Borrowed view of one point in the matrix, used for rule matching.
#[derive(Debug, Clone, Copy)]
pub struct DimensionCodes<'a> {
    pub language_pair: &'a str,
    pub level: &'a str,
    pub category: &'a str,
    pub exercise_type: &'a str,
    pub topic: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    pub language_pairs: Vec<LanguagePair>,
    pub levels: Vec<Level>,
    pub categories: Vec<Category>,
    pub exercise_types: Vec<ExerciseType>,
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub rules: CombinationRules,
}

impl Catalog {
    /// Load a catalog from disk. `.toml` files are parsed as TOML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let catalog: Catalog = if is_toml {
            toml::from_str(&raw).map_err(|e| CatalogError::Malformed(e.to_string()))?
        } else {
            serde_json::from_str(&raw).map_err(|e| CatalogError::Malformed(e.to_string()))?
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reject empty or duplicate codes and rules that name codes the catalog does not define.
    pub fn validate(&self) -> Result<(), CatalogError> {
        check_codes("language pair", self.language_pairs.iter().map(|x| x.code.as_str()))?;
        check_codes("level", self.levels.iter().map(|x| x.code.as_str()))?;
        check_codes("category", self.categories.iter().map(|x| x.code.as_str()))?;
        check_codes("exercise type", self.exercise_types.iter().map(|x| x.code.as_str()))?;
        check_codes("topic", self.topics.iter().map(|x| x.code.as_str()))?;

        for rule in &self.rules.exclude {
            if let Some(code) = &rule.language_pair {
                self.require_language_pair(code)?;
            }
            if let Some(code) = &rule.level {
                self.require_level(code)?;
            }
            if let Some(code) = &rule.category {
                self.require_category(code)?;
            }
            if let Some(code) = &rule.exercise_type {
                self.require_exercise_type(code)?;
            }
            if let Some(code) = &rule.topic {
                self.require_topic(code)?;
            }
        }
        Ok(())
    }

    pub fn language_pair(&self, code: &str) -> Option<&LanguagePair> {
        self.language_pairs.iter().find(|x| x.code == code)
    }

    pub fn level(&self, code: &str) -> Option<&Level> {
        self.levels.iter().find(|x| x.code == code)
    }

    pub fn category(&self, code: &str) -> Option<&Category> {
        self.categories.iter().find(|x| x.code == code)
    }

    pub fn exercise_type(&self, code: &str) -> Option<&ExerciseType> {
        self.exercise_types.iter().find(|x| x.code == code)
    }

    pub fn topic(&self, code: &str) -> Option<&Topic> {
        self.topics.iter().find(|x| x.code == code)
    }

    pub fn require_language_pair(&self, code: &str) -> Result<&LanguagePair, CatalogError> {
        self.language_pair(code)
            .ok_or_else(|| unknown("language pair", code))
    }

    pub fn require_level(&self, code: &str) -> Result<&Level, CatalogError> {
        self.level(code).ok_or_else(|| unknown("level", code))
    }

    pub fn require_category(&self, code: &str) -> Result<&Category, CatalogError> {
        self.category(code).ok_or_else(|| unknown("category", code))
    }

    pub fn require_exercise_type(&self, code: &str) -> Result<&ExerciseType, CatalogError> {
        self.exercise_type(code)
            .ok_or_else(|| unknown("exercise type", code))
    }

    pub fn require_topic(&self, code: &str) -> Result<&Topic, CatalogError> {
        self.topic(code).ok_or_else(|| unknown("topic", code))
    }

    /// True when the rules prune this point of the matrix.
    pub fn is_excluded(&self, codes: &DimensionCodes<'_>, exercise_type: &ExerciseType) -> bool {
        if self.rules.skip_audio && exercise_type.requires_audio {
            return true;
        }
        self.rules.exclude.iter().any(|rule| rule.matches(codes))
    }

    /// Built-in MVP catalog: Spanish and Portuguese speakers learning English at B1,
    /// three categories, three exercise types, three topics (54 combinations).
    pub fn builtin() -> Self {
        let pair = |code: &str, src: &str, tgt: &str, sn: &str, tn: &str, active, priority| {
            LanguagePair {
                code: code.to_string(),
                source_lang: src.to_string(),
                target_lang: tgt.to_string(),
                source_name: sn.to_string(),
                target_name: tn.to_string(),
                active,
                priority,
            }
        };
        let level = |code: &str, name: &str, description: &str, active| Level {
            code: code.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            active,
        };
        let category = |code: &str, name: &str, description: &str, active| Category {
            code: code.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            active,
        };
        let exercise = |code: &str, name: &str, description: &str, active, requires_audio| {
            ExerciseType {
                code: code.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                active,
                requires_audio,
            }
        };
        let topic = |code: &str, name: &str, description: &str, active, priority| Topic {
            code: code.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            active,
            priority,
        };

        Catalog {
            language_pairs: vec![
                pair("LANG_001", "es", "en", "Spanish", "English", true, 1),
                pair("LANG_002", "pt", "en", "Portuguese", "English", true, 2),
                pair("LANG_003", "en", "es", "English", "Spanish", false, 3),
                pair("LANG_004", "en", "pt", "English", "Portuguese", false, 4),
            ],
            levels: vec![
                level("LEVEL_A1", "Beginner", "Basic phrases, survival communication", false),
                level("LEVEL_A2", "Elementary", "Simple conversations, routine tasks", false),
                level("LEVEL_B1", "Intermediate", "Independent communication, opinions", true),
                level("LEVEL_B2", "Upper-Intermediate", "Complex ideas, nuanced expression", false),
                level("LEVEL_C1", "Advanced", "Professional/academic contexts", false),
                level("LEVEL_C2", "Proficient", "Near-native fluency", false),
            ],
            categories: vec![
                category("CAT_VOCAB", "Vocabulary", "Words, phrases, expressions, terminology", true),
                category("CAT_GRAMMAR", "Grammar", "Structure, rules, patterns, syntax", true),
                category(
                    "CAT_FUNCTIONAL",
                    "Functional Language",
                    "Practical expressions for real situations",
                    true,
                ),
                category(
                    "CAT_CONVERSATION",
                    "Conversation Skills",
                    "Dialogue practice, communication strategies",
                    false,
                ),
                category(
                    "CAT_CULTURAL",
                    "Cultural Competence",
                    "Social norms, cultural context, pragmatics",
                    false,
                ),
            ],
            exercise_types: vec![
                exercise("EX_MCQ", "Multiple Choice", "Select correct answer from options", true, false),
                exercise("EX_FILL", "Fill in the Blank", "Complete missing parts in sentences", true, false),
                exercise("EX_ROLEPLAY", "Roleplay", "Simulated conversations and scenarios", true, false),
                exercise("EX_OPEN", "Open Response", "Free-form answers", false, false),
                exercise("EX_TRANS", "Translation", "Convert between languages", false, false),
                exercise("EX_ERROR", "Error Identification", "Find and correct mistakes", false, false),
                exercise("EX_VOICE_MCQ", "Voice Multiple Choice", "Select the correct audio option", false, true),
                exercise("EX_VOICE_INPUT", "Voice Input", "Spoken answers, pronunciation practice", false, true),
            ],
            topics: vec![
                topic("TOPIC_DAILY", "Daily Life & Routines", "Personal care, home activities, time management", true, 1),
                topic("TOPIC_FOOD", "Food & Dining", "Meals, cooking, restaurants, dietary preferences", true, 2),
                topic("TOPIC_WORK", "Work & Professional", "Office environment, job roles, business communication", true, 3),
                topic("TOPIC_TRAVEL", "Travel & Geography", "Transportation, directions, accommodations", true, 4),
                topic("TOPIC_SOCIAL", "Social & Relationships", "Family, friends, social events, emotions", false, 5),
                topic("TOPIC_SHOPPING", "Shopping & Errands", "Clothing, stores, money, services", false, 6),
                topic("TOPIC_HEALTH", "Health & Wellness", "Body, illnesses, medical care, fitness", false, 7),
            ],
            rules: CombinationRules {
                skip_audio: true,
                // MVP focuses on the top three topics
                exclude: vec![ExclusionRule {
                    topic: Some("TOPIC_TRAVEL".to_string()),
                    ..ExclusionRule::default()
                }],
            },
        }
    }
}

fn unknown(dimension: &'static str, code: &str) -> CatalogError {
    CatalogError::UnknownDimension {
        dimension,
        code: code.to_string(),
    }
}

fn check_codes<'a>(
    dimension: &'static str,
    codes: impl Iterator<Item = &'a str>,
) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for code in codes {
        if code.trim().is_empty() {
            return Err(CatalogError::EmptyCode { dimension });
        }
        if !seen.insert(code) {
            return Err(CatalogError::DuplicateCode {
                dimension,
                code: code.to_string(),
            });
        }
    }
    Ok(())
}
