//! Catalog expansion is deterministic and yields unique identities.

use coursegen::catalog::{Catalog, CombinationRules};
use coursegen::producer::variation_seed;
use coursegen::resolver::{expand, to_specs, CombinationId};
use proptest::prelude::*;
use std::collections::HashSet;

/// Builtin catalog with each dimension value switched on or off by the masks.
fn masked_catalog(masks: [u16; 5]) -> Catalog {
    let mut catalog = Catalog::builtin();
    catalog.rules = CombinationRules::default();
    for (i, x) in catalog.language_pairs.iter_mut().enumerate() {
        x.active = masks[0] & (1 << i) != 0;
    }
    for (i, x) in catalog.levels.iter_mut().enumerate() {
        x.active = masks[1] & (1 << i) != 0;
    }
    for (i, x) in catalog.categories.iter_mut().enumerate() {
        x.active = masks[2] & (1 << i) != 0;
    }
    for (i, x) in catalog.exercise_types.iter_mut().enumerate() {
        x.active = masks[3] & (1 << i) != 0;
    }
    for (i, x) in catalog.topics.iter_mut().enumerate() {
        x.active = masks[4] & (1 << i) != 0;
    }
    catalog
}

fn active_count(catalog: &Catalog) -> usize {
    catalog.language_pairs.iter().filter(|x| x.active).count()
        * catalog.levels.iter().filter(|x| x.active).count()
        * catalog.categories.iter().filter(|x| x.active).count()
        * catalog.exercise_types.iter().filter(|x| x.active).count()
        * catalog.topics.iter().filter(|x| x.active).count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn expansion_is_deterministic_and_complete(masks in any::<[u16; 5]>()) {
        let catalog = masked_catalog(masks);
        let first = expand(&catalog).unwrap();
        let second = expand(&catalog).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), active_count(&catalog));

        let ids: HashSet<_> = first.iter().map(|c| c.id.clone()).collect();
        prop_assert_eq!(ids.len(), first.len());
        for combination in &first {
            prop_assert_eq!(&combination.id, &CombinationId::from_codes(&combination.codes()));
        }
    }

    #[test]
    fn spec_keys_are_unique(masks in any::<[u16; 5]>(), variations in 1u32..6) {
        let combinations = expand(&masked_catalog(masks)).unwrap();
        let specs = to_specs(&combinations, variations);

        prop_assert_eq!(specs.len(), combinations.len() * variations as usize);
        let keys: HashSet<_> = specs.iter().map(|s| s.key()).collect();
        prop_assert_eq!(keys.len(), specs.len());
    }

    #[test]
    fn retry_seeds_never_collide(
        a in (0u32..1000, 0u32..10),
        b in (0u32..1000, 0u32..10),
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(variation_seed(a.0, a.1), variation_seed(b.0, b.1));
    }
}
