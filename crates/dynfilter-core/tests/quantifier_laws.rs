//! Property tests for quantifiers over filtered child collections.
//!
//! For a child filter `C` and a user predicate `P`, evaluating the rewritten
//! quantifier over the full collection must agree with evaluating the
//! original quantifier over only the elements `C` keeps:
//!
//! - `Any(P)` holds iff some visible element satisfies `P`.
//! - `All(P)` holds iff every visible element satisfies `P`.
//! - `Any()` holds iff some element is visible; `All()` always holds.
//!
//! The same laws are checked one level down, with the quantifier nested
//! inside an unfiltered intermediate collection.

use dynfilter_core::{
    constant, EntityModel, EntityRecord, FilterDefinition, FilterRegistry, NavigationDef,
    PredicateEvaluator, PredicateRewriter,
};
use dynfilter_proto::{all, any, field, lit, param, PredicateExpr, QuantifierKind};
use proptest::prelude::*;

fn model() -> EntityModel {
    EntityModel::new()
        .with_navigation(NavigationDef::many("groups", "Root", "Group"))
        .with_navigation(NavigationDef::many("children", "Group", "Child"))
        .with_navigation(NavigationDef::many("children", "Parent", "Child"))
}

fn registry(max_visible: i32, enabled: bool) -> FilterRegistry {
    let registry = FilterRegistry::new();
    let def = FilterDefinition::new("Child", "visible", field("child_value").le(param("max")))
        .with_parameter("max", constant(max_visible));
    registry
        .register(if enabled { def } else { def.disabled_by_default() })
        .unwrap();
    registry
}

fn children(values: &[i32]) -> Vec<EntityRecord> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            EntityRecord::new("Child")
                .with_field("id", i as i32 + 1)
                .with_field("child_value", *v)
        })
        .collect()
}

fn quantifier(
    kind: QuantifierKind,
    collection: &str,
    body: Option<PredicateExpr>,
) -> PredicateExpr {
    match kind {
        QuantifierKind::Any => any(collection, body),
        QuantifierKind::All => all(collection, body),
    }
}

fn kind_strategy() -> impl Strategy<Value = QuantifierKind> {
    prop_oneof![Just(QuantifierKind::Any), Just(QuantifierKind::All)]
}

fn predicate_strategy() -> impl Strategy<Value = Option<PredicateExpr>> {
    prop_oneof![
        Just(None),
        (0i32..6).prop_map(|v| Some(field("child_value").eq(lit(v)))),
        (0i32..6).prop_map(|v| Some(field("child_value").ge(lit(v)))),
        (0i32..6, 0i32..6)
            .prop_map(|(a, b)| Some(field("child_value").ne(lit(a)).and(field("id").le(lit(b))))),
    ]
}

/// The quantifier evaluated over the visible elements only.
fn expected(
    kind: QuantifierKind,
    body: Option<&PredicateExpr>,
    elements: &[EntityRecord],
    max_visible: Option<i32>,
) -> bool {
    let visible: Vec<EntityRecord> = elements
        .iter()
        .filter(|c| {
            let value = c.field("child_value").and_then(|v| v.as_i64()).unwrap();
            max_visible.map_or(true, |max| value <= i64::from(max))
        })
        .cloned()
        .collect();
    let parent = EntityRecord::new("Parent").with_collection("children", visible);
    PredicateEvaluator::evaluate(&quantifier(kind, "children", body.cloned()), &parent).unwrap()
}

proptest! {
    #[test]
    fn prop_rewritten_quantifier_matches_visible_enumeration(
        kind in kind_strategy(),
        body in predicate_strategy(),
        values in proptest::collection::vec(0i32..6, 0..8),
        max_visible in 0i32..6,
        enabled in proptest::bool::ANY,
    ) {
        let registry = registry(max_visible, enabled);
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let original = quantifier(kind, "children", body.clone());
        let rewritten = rewriter.rewrite_root("Parent", Some(original)).unwrap().unwrap();

        let elements = children(&values);
        let record = EntityRecord::new("Parent").with_collection("children", elements.clone());
        let actual = PredicateEvaluator::evaluate(&rewritten, &record).unwrap();

        let max = enabled.then_some(max_visible);
        prop_assert_eq!(actual, expected(kind, body.as_ref(), &elements, max));
    }

    #[test]
    fn prop_nested_quantifier_matches_visible_enumeration(
        outer in kind_strategy(),
        inner in kind_strategy(),
        body in predicate_strategy(),
        groups in proptest::collection::vec(proptest::collection::vec(0i32..6, 0..5), 0..4),
        max_visible in 0i32..6,
    ) {
        let registry = registry(max_visible, true);
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let nested = quantifier(inner, "children", body.clone());
        let original = quantifier(outer, "groups", Some(nested));
        let rewritten = rewriter.rewrite_root("Root", Some(original)).unwrap().unwrap();

        let group_records: Vec<EntityRecord> = groups
            .iter()
            .map(|values| EntityRecord::new("Group").with_collection("children", children(values)))
            .collect();
        let root = EntityRecord::new("Root").with_collection("groups", group_records.clone());
        let actual = PredicateEvaluator::evaluate(&rewritten, &root).unwrap();

        let per_group = group_records
            .iter()
            .map(|g| expected(inner, body.as_ref(), g.collection("children"), Some(max_visible)));
        let want = match outer {
            QuantifierKind::Any => per_group.fold(false, |acc, v| acc || v),
            QuantifierKind::All => per_group.fold(true, |acc, v| acc && v),
        };
        prop_assert_eq!(actual, want);
    }

    #[test]
    fn prop_rewrite_is_idempotent(
        kind in kind_strategy(),
        body in predicate_strategy(),
        max_visible in 0i32..6,
    ) {
        let registry = registry(max_visible, true);
        let model = model();
        let rewriter = PredicateRewriter::new(&registry, &model);

        let once = rewriter
            .rewrite_root("Parent", Some(quantifier(kind, "children", body)))
            .unwrap();
        let twice = rewriter.rewrite_root("Parent", once.clone()).unwrap();
        prop_assert_eq!(once, twice);
    }
}

#[test]
fn test_all_example_values() {
    let registry = registry(2, true);
    let model = model();
    let rewriter = PredicateRewriter::new(&registry, &model);
    let rewritten = rewriter
        .rewrite_root("Parent", Some(all("children", Some(field("child_value").eq(lit(1))))))
        .unwrap()
        .unwrap();

    let with = |values: &[i32]| {
        EntityRecord::new("Parent").with_collection("children", children(values))
    };
    assert!(PredicateEvaluator::evaluate(&rewritten, &with(&[1, 1, 3, 4])).unwrap());
    assert!(!PredicateEvaluator::evaluate(&rewritten, &with(&[1, 2, 3])).unwrap());
}

#[test]
fn test_any_example_without_predicate() {
    let registry = FilterRegistry::new();
    registry
        .register(FilterDefinition::new("Child", "small_id", field("id").le(lit(3))))
        .unwrap();
    let model = model();
    let rewriter = PredicateRewriter::new(&registry, &model);
    let rewritten = rewriter
        .rewrite_root("Parent", Some(any("children", None)))
        .unwrap()
        .unwrap();

    let five = EntityRecord::new("Parent").with_collection("children", children(&[1, 2, 3, 4, 5]));
    assert!(PredicateEvaluator::evaluate(&rewritten, &five).unwrap());

    let late = EntityRecord::new("Parent").with_collection(
        "children",
        vec![
            EntityRecord::new("Child").with_field("id", 4),
            EntityRecord::new("Child").with_field("id", 5),
        ],
    );
    assert!(!PredicateEvaluator::evaluate(&rewritten, &late).unwrap());
}
