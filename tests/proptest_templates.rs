//! Property-based tests using proptest
//!
//! These tests verify template matching, path tree construction and the
//! status bus using randomized inputs.

use proptest::prelude::*;
use std::collections::HashMap;
use tarm::endpoints::EndpointTemplate;
use tarm::notification::{StatusBus, StatusKind};
use tarm::swagger::{merge_paths, render_paths, DeclaredPath, PathTreeConfig, Verb};

/// A template segment: either a literal or a placeholder
#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Named,
}

/// Generate a template of 1..8 segments with unique placeholder names
fn arb_template() -> impl Strategy<Value = Vec<Part>> {
    prop::collection::vec(
        prop_oneof!["[a-z][a-zA-Z]{0,11}".prop_map(Part::Literal), Just(Part::Named)],
        1..8,
    )
}

fn template_url(parts: &[Part]) -> String {
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| match part {
            Part::Literal(text) => format!("/{}", text),
            Part::Named => format!("/{{p{}}}", i),
        })
        .collect()
}

/// Concrete URL for `parts` plus the values its placeholders should capture
fn concrete_url(parts: &[Part], value: &str) -> (String, HashMap<String, String>) {
    let mut values = HashMap::new();
    let mut url = String::new();
    for (i, part) in parts.iter().enumerate() {
        match part {
            Part::Literal(text) => url.push_str(&format!("/{}", text.to_uppercase())),
            Part::Named => {
                let captured = format!("{}{}", value, i);
                url.push_str(&format!("/{}", captured));
                values.insert(format!("p{}", i), captured);
            }
        }
    }
    (url, values)
}

/// A small resource provider: list, item, item children and a nested list
fn provider_paths() -> Vec<DeclaredPath> {
    let base = "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroupName}/providers/Test.Rp";
    vec![
        DeclaredPath::new(&format!("{}/widgets", base), &[Verb::Get]),
        DeclaredPath::new(&format!("{}/widgets/{{widgetName}}", base), &[Verb::Get, Verb::Put, Verb::Delete]),
        DeclaredPath::new(&format!("{}/widgets/{{widgetName}}/config", base), &[Verb::Get]),
        DeclaredPath::new(&format!("{}/widgets/{{widgetName}}/keys", base), &[Verb::Post]),
        DeclaredPath::new(&format!("{}/widgets/{{widgetName}}/parts", base), &[Verb::Get]),
        DeclaredPath::new(&format!("{}/widgets/{{widgetName}}/parts/{{partName}}", base), &[Verb::Get, Verb::Delete]),
        DeclaredPath::new(&format!("{}/gadgets/{{gadgetName}}", base), &[Verb::Get]),
    ]
}

proptest! {
    /// Matching a built URL captures exactly the values it was built from
    #[test]
    fn test_match_captures_placeholder_values(
        parts in arb_template(),
        value in "[a-zA-Z0-9-]{1,12}",
    ) {
        let template = EndpointTemplate::parse(&template_url(&parts), Some("2020-01-01")).unwrap();
        let (url, values) = concrete_url(&parts, &value);

        let result = template.matches(&format!("{}?api-version=2020-01-01", url));
        prop_assert!(result.is_match);
        prop_assert_eq!(&result.values, &values);

        let built = template.build(&result.values).unwrap();
        prop_assert!(built.ends_with("?api-version=2020-01-01"));
        let rebuilt = template.matches(&built);
        prop_assert!(rebuilt.is_match);
        prop_assert_eq!(&rebuilt.values, &values);
    }

    /// A URL one segment deeper or shallower never matches
    #[test]
    fn test_segment_count_is_strict(
        parts in arb_template(),
        extra in "[a-z0-9]{1,8}",
    ) {
        let template = EndpointTemplate::parse(&template_url(&parts), None).unwrap();
        let (url, _) = concrete_url(&parts, "v");

        let deeper = format!("{}/{}", url, extra);
        prop_assert!(!template.matches(&deeper).is_match);

        let shorter = url.rsplit_once('/').map(|(head, _)| head).unwrap_or_default();
        prop_assert!(!template.matches(shorter).is_match);
    }

    /// Positional build agrees with the by-name build
    #[test]
    fn test_positional_build_matches_named_build(
        parts in arb_template(),
        value in "[a-z0-9]{1,8}",
    ) {
        let template = EndpointTemplate::parse(&template_url(&parts), None).unwrap();
        let (_, values) = concrete_url(&parts, &value);

        let by_name = template.build(&values).unwrap();
        let by_position = template.build_from_values(&template.ordered_values(&values)).unwrap();
        prop_assert_eq!(by_name, by_position);
    }

    /// The merged tree does not depend on declaration order
    #[test]
    fn test_path_tree_ignores_input_order(
        shuffled in Just(provider_paths()).prop_shuffle(),
    ) {
        let config = PathTreeConfig::default();
        let expected = merge_paths(Vec::new(), &provider_paths(), Some("2021-01-01"), &config).unwrap();
        let actual = merge_paths(Vec::new(), &shuffled, Some("2021-01-01"), &config).unwrap();
        prop_assert_eq!(render_paths(&expected), render_paths(&actual));
    }

    /// Every published event reaches a subscriber, in order
    #[test]
    fn test_status_bus_delivers_in_order(
        messages in prop::collection::vec("[a-z ]{1,20}", 1..20),
    ) {
        let bus = StatusBus::new();
        let mut rx = bus.subscribe();
        for message in &messages {
            bus.failure(message.clone());
        }

        let received = tokio_test::block_on(async {
            let mut received = Vec::new();
            for _ in 0..messages.len() {
                received.push(rx.recv().await.unwrap());
            }
            received
        });

        prop_assert!(received.iter().all(|e| e.kind == StatusKind::Failure));
        let texts: Vec<String> = received.into_iter().map(|e| e.message).collect();
        prop_assert_eq!(texts, messages);
    }
}

#[test]
fn test_provider_tree_shape() {
    let paths = merge_paths(Vec::new(), &provider_paths(), Some("2021-01-01"), &PathTreeConfig::default()).unwrap();
    let rendered = render_paths(&paths);

    // widgets list with its item as a sub path, gadgets as a separate root
    assert_eq!(paths.len(), 2);
    assert!(rendered.contains("* {widgetName}"));
    assert!(rendered.contains("+ config"));
    assert!(rendered.contains("+ keys"));
}
