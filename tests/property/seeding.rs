//! Seeding is idempotent: one status row per spec no matter how often it runs.

use coursegen::catalog::Catalog;
use coursegen::resolver::{expand, to_specs};
use coursegen::status::{GenerationState, StatusStore};
use proptest::prelude::*;
use tempfile::TempDir;

fn small_catalog(topics: usize) -> Catalog {
    let mut catalog = Catalog::builtin();
    catalog.language_pairs.truncate(1);
    catalog.exercise_types.retain(|x| x.code == "EX_FILL");
    catalog.categories.truncate(1);
    catalog.topics.truncate(topics);
    catalog.levels.retain(|x| x.code == "LEVEL_B1");
    catalog.language_pairs.iter_mut().for_each(|x| x.active = true);
    catalog.categories.iter_mut().for_each(|x| x.active = true);
    catalog.exercise_types.iter_mut().for_each(|x| x.active = true);
    catalog.topics.iter_mut().for_each(|x| x.active = true);
    catalog
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn reseeding_never_duplicates_rows(
        topics in 1usize..4,
        first_variations in 1u32..5,
        second_variations in 1u32..5,
    ) {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(sled::open(dir.path().join("store")).unwrap()).unwrap();
        let combinations = expand(&small_catalog(topics)).unwrap();

        let first = store.seed(&to_specs(&combinations, first_variations)).unwrap();
        prop_assert_eq!(first.inserted, combinations.len() * first_variations as usize);

        let second_specs = to_specs(&combinations, second_variations);
        let second = store.seed(&second_specs).unwrap();
        prop_assert_eq!(second.inserted + second.existing, second_specs.len());

        let expected = combinations.len() * first_variations.max(second_variations) as usize;
        let rows = store.list(None, None).unwrap();
        prop_assert_eq!(rows.len(), expected);
        prop_assert!(rows.iter().all(|r| r.state == GenerationState::Pending && r.attempts == 0));
    }
}
