//! Well-formed candidates pass schema compliance; dropping a required field never does.

use coursegen::producer::CandidateContent;
use coursegen::schema::SchemaRegistry;
use coursegen::validator::compliance;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

fn fill_candidate(before: &[String], after: &[String], answer: &str) -> CandidateContent {
    let mut fields = BTreeMap::new();
    fields.insert(
        "theory".to_string(),
        json!("The present simple describes habits and routines. We add -s for he, she and it."),
    );
    fields.insert(
        "exercise_introduction".to_string(),
        json!("Completa la frase con la palabra correcta."),
    );
    fields.insert(
        "exercise_input".to_string(),
        json!(format!("{} ___ {}.", before.join(" "), after.join(" "))),
    );
    fields.insert("expected_output".to_string(), json!(answer));
    CandidateContent::new(fields)
}

proptest! {
    #[test]
    fn well_formed_fill_candidates_comply(
        before in prop::collection::vec("[a-z]{3,8}", 2..6),
        after in prop::collection::vec("[a-z]{3,8}", 1..6),
        answer in "[a-z]{1,12}( [a-z]{1,12}){0,3}",
    ) {
        let registry = SchemaRegistry::builtin();
        let schema = registry.lookup("EX_FILL").unwrap();
        let candidate = fill_candidate(&before, &after, &answer);
        let violations = compliance::check(&candidate, schema);
        prop_assert!(violations.is_empty(), "unexpected violations: {:?}", violations);
    }

    #[test]
    fn missing_required_field_always_violates(
        field in prop::sample::select(vec![
            "theory",
            "exercise_introduction",
            "exercise_input",
            "expected_output",
        ]),
    ) {
        let registry = SchemaRegistry::builtin();
        let schema = registry.lookup("EX_FILL").unwrap();
        let words = vec!["mi".to_string(), "hermana".to_string()];
        let mut fields = fill_candidate(&words, &["inteligente".to_string()], "es").fields;
        fields.remove(field);

        let violations = compliance::check(&CandidateContent::new(fields), schema);
        prop_assert_eq!(violations.len(), 1);
        prop_assert_eq!(violations[0].field.as_deref(), Some(field));
        prop_assert_eq!(violations[0].code.as_str(), "missing");
        prop_assert!(compliance::signature(&violations).contains(field));
    }
}
