//! Combination resolver
//!
//! Expands the catalog into uniquely identified [`Combination`]s and turns them
//! into [`GenerationSpec`] work items. Pure: the same catalog always yields the
//! same combinations, in the same order, with the same identifiers.

use crate::catalog::{Catalog, Category, DimensionCodes, ExerciseType, LanguagePair, Level, Topic};
use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic identifier of a combination: `cmb_` + 16 hex chars of BLAKE3
/// over the length-prefixed dimension codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombinationId(String);

impl CombinationId {
    pub fn from_codes(codes: &DimensionCodes<'_>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for code in [
            codes.language_pair,
            codes.level,
            codes.category,
            codes.exercise_type,
            codes.topic,
        ] {
            hasher.update(&(code.len() as u64).to_le_bytes());
            hasher.update(code.as_bytes());
        }
        let digest = hasher.finalize();
        CombinationId(format!("cmb_{}", hex::encode(&digest.as_bytes()[..8])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CombinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One point of the curriculum matrix. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    pub id: CombinationId,
    pub language_pair: LanguagePair,
    pub level: Level,
    pub category: Category,
    pub exercise_type: ExerciseType,
    pub topic: Topic,
    /// Lower is more urgent
    pub priority: u32,
}

impl Combination {
    pub fn new(
        language_pair: &LanguagePair,
        level: &Level,
        category: &Category,
        exercise_type: &ExerciseType,
        topic: &Topic,
    ) -> Self {
        let codes = DimensionCodes {
            language_pair: &language_pair.code,
            level: &level.code,
            category: &category.code,
            exercise_type: &exercise_type.code,
            topic: &topic.code,
        };
        Combination {
            id: CombinationId::from_codes(&codes),
            priority: language_pair.priority * 100 + topic.priority,
            language_pair: language_pair.clone(),
            level: level.clone(),
            category: category.clone(),
            exercise_type: exercise_type.clone(),
            topic: topic.clone(),
        }
    }

    pub fn codes(&self) -> DimensionCodes<'_> {
        DimensionCodes {
            language_pair: &self.language_pair.code,
            level: &self.level.code,
            category: &self.category.code,
            exercise_type: &self.exercise_type.code,
            topic: &self.topic.code,
        }
    }

    /// Human-readable key, e.g. `LANG_001/LEVEL_B1/CAT_VOCAB/EX_MCQ/TOPIC_DAILY`
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.language_pair.code,
            self.level.code,
            self.category.code,
            self.exercise_type.code,
            self.topic.code
        )
    }
}

/// Restricts expansion and claiming to a slice of the matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionFilter {
    pub language_pair: Option<String>,
    pub level: Option<String>,
    pub category: Option<String>,
}

impl DimensionFilter {
    pub fn is_empty(&self) -> bool {
        self.language_pair.is_none() && self.level.is_none() && self.category.is_none()
    }

    pub fn matches(&self, combination: &Combination) -> bool {
        fn field(filter: &Option<String>, code: &str) -> bool {
            filter.as_deref().map_or(true, |f| f == code)
        }
        field(&self.language_pair, &combination.language_pair.code)
            && field(&self.level, &combination.level.code)
            && field(&self.category, &combination.category.code)
    }

    /// Every code in the filter must exist in the catalog.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        if let Some(code) = &self.language_pair {
            catalog.require_language_pair(code)?;
        }
        if let Some(code) = &self.level {
            catalog.require_level(code)?;
        }
        if let Some(code) = &self.category {
            catalog.require_category(code)?;
        }
        Ok(())
    }
}

/// Identity of one status row: `<combination_id>#<variation:04>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpecKey(String);

impl SpecKey {
    pub fn new(combination: &CombinationId, variation: u32) -> Self {
        SpecKey(format!("{}#{:04}", combination, variation))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SpecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpecKey {
    fn from(value: &str) -> Self {
        SpecKey(value.to_string())
    }
}

/// A single unit of work: one variation of one combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub combination: Combination,
    pub variation: u32,
    /// Exercise-type code naming the content schema
    pub schema_id: String,
}

impl GenerationSpec {
    pub fn new(combination: Combination, variation: u32) -> Self {
        let schema_id = combination.exercise_type.code.clone();
        GenerationSpec {
            combination,
            variation,
            schema_id,
        }
    }

    pub fn key(&self) -> SpecKey {
        SpecKey::new(&self.combination.id, self.variation)
    }
}

/// Expand every active, non-excluded combination in stable code order.
pub fn expand(catalog: &Catalog) -> Result<Vec<Combination>, CatalogError> {
    expand_filtered(catalog, &DimensionFilter::default())
}

/// Same as [`expand`], restricted to the filter. Unknown filter codes are a configuration error.
pub fn expand_filtered(
    catalog: &Catalog,
    filter: &DimensionFilter,
) -> Result<Vec<Combination>, CatalogError> {
    catalog.validate()?;
    filter.validate(catalog)?;

    let mut combinations = Vec::new();
    for language_pair in catalog.language_pairs.iter().filter(|x| x.active) {
        for level in catalog.levels.iter().filter(|x| x.active) {
            for category in catalog.categories.iter().filter(|x| x.active) {
                for exercise_type in catalog.exercise_types.iter().filter(|x| x.active) {
                    for topic in catalog.topics.iter().filter(|x| x.active) {
                        let codes = DimensionCodes {
                            language_pair: &language_pair.code,
                            level: &level.code,
                            category: &category.code,
                            exercise_type: &exercise_type.code,
                            topic: &topic.code,
                        };
                        if catalog.is_excluded(&codes, exercise_type) {
                            continue;
                        }
                        let combination =
                            Combination::new(language_pair, level, category, exercise_type, topic);
                        if filter.matches(&combination) {
                            combinations.push(combination);
                        }
                    }
                }
            }
        }
    }

    combinations.sort_by(|a, b| {
        let (a, b) = (a.codes(), b.codes());
        (a.language_pair, a.level, a.category, a.exercise_type, a.topic).cmp(&(
            b.language_pair,
            b.level,
            b.category,
            b.exercise_type,
            b.topic,
        ))
    });
    Ok(combinations)
}

/// Emit `variations_per_combo` specs per combination, variations `0..n`.
pub fn to_specs(combinations: &[Combination], variations_per_combo: u32) -> Vec<GenerationSpec> {
    combinations
        .iter()
        .flat_map(|combination| {
            (0..variations_per_combo).map(move |v| GenerationSpec::new(combination.clone(), v))
        })
        .collect()
}
