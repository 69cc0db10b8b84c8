//! Property-Based Tests for snapshot persistence
//!
//! - Round-trip: snapshot -> JSON -> restore reproduces every section
//! - Tolerance: arbitrary junk in any section never panics and leaves the
//!   engine usable with in-range state

use proptest::prelude::*;
use serde_json::{json, Value};

use adaptive_practice::snapshot::{
    SECTION_ABILITY, SECTION_ARMS, SECTION_EPSILON, SECTION_HISTORY, SECTION_MASTERY,
};
use adaptive_practice::{DifficultyLevel, Engine, EngineConfig, ResponseEvent};

const TOPICS: [&str; 3] = ["vocabulary", "grammar", "listening"];

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_event() -> impl Strategy<Value = ResponseEvent> {
    (
        0usize..TOPICS.len(),
        any::<bool>(),
        prop_oneof![
            Just(DifficultyLevel::Easy),
            Just(DifficultyLevel::Medium),
            Just(DifficultyLevel::Hard),
        ],
        0.0f64..200.0,
    )
        .prop_map(|(topic, correct, difficulty, rt)| {
            ResponseEvent::new(TOPICS[topic], correct, difficulty, rt)
        })
}

fn arb_json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        (-1e6f64..1e6).prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

fn arb_json() -> impl Strategy<Value = Value> {
    arb_json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map(
                prop_oneof![Just("vocabulary".to_string()), "[a-z]{1,6}"],
                inner,
                0..4
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn engine(seed: u64) -> Engine {
    let mut config = EngineConfig::default();
    config.policy.seed = Some(seed);
    Engine::new("snap-user", TOPICS.iter().map(|t| t.to_string()).collect(), config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_snapshot_round_trip(
        seed in any::<u64>(),
        events in prop::collection::vec(arb_event(), 0..80),
    ) {
        let mut source = engine(seed);
        for event in &events {
            source.record_response(event).unwrap();
        }
        let before = source.snapshot();
        let value = before.to_value().unwrap();

        // round-trip through text as a store would
        let text = serde_json::to_string(&value).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();

        let mut target = engine(seed.wrapping_add(1));
        let corrupt = target.restore_snapshot(&parsed);
        prop_assert!(corrupt.is_empty());

        let after = target.snapshot();
        prop_assert_eq!(&before.ability_by_topic, &after.ability_by_topic);
        prop_assert_eq!(&before.mastery_params_by_skill, &after.mastery_params_by_skill);
        prop_assert_eq!(&before.bandit_arms_by_topic, &after.bandit_arms_by_topic);
        prop_assert_eq!(before.epsilon, after.epsilon);
        prop_assert_eq!(&before.history, &after.history);
    }

    #[test]
    fn prop_junk_sections_never_break_engine(
        seed in any::<u64>(),
        ability in arb_json(),
        mastery in arb_json(),
        arms in arb_json(),
        epsilon in arb_json(),
        history in arb_json(),
    ) {
        let mut engine = engine(seed);
        engine.restore_snapshot(&json!({
            "version": 1,
            SECTION_ABILITY: ability,
            SECTION_MASTERY: mastery,
            SECTION_ARMS: arms,
            SECTION_EPSILON: epsilon,
            SECTION_HISTORY: history,
        }));

        let eps = engine.selection_policy().epsilon();
        prop_assert!((0.0..=1.0).contains(&eps));
        for topic in TOPICS {
            prop_assert!((-3.0..=3.0).contains(&engine.ability(topic).unwrap()));
            prop_assert!((0.0..=1.0).contains(&engine.mastery(topic).unwrap()));
            prop_assert!(engine.selection_policy().arm(topic).unwrap().is_consistent());
        }

        let outcome = engine
            .record_response(&ResponseEvent::new("grammar", true, DifficultyLevel::Medium, 12.0))
            .unwrap();
        prop_assert!((-3.0..=3.0).contains(&outcome.theta));
    }
}
