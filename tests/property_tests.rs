use hpoa_builder::reconcile::{fingerprint, ApplyOptions, ApplyPolicy, Strictness};
use hpoa_builder::{apply, filter, materialize, AnnotationRow, ChangeStatus, Curie, FlatChange, Ontology, Term};
use proptest::prelude::*;
use std::collections::HashSet;

const MAX_TERMS: usize = 9;

fn id(n: usize) -> Curie {
    Curie::new("HP", format!("{:07}", n))
}

/// A random DAG over HP:0000000..n where every term but the first has one
/// or two parents with smaller ids, so HP:0000000 reaches everything.
fn dag_strategy() -> impl Strategy<Value = Ontology> {
    (2usize..=MAX_TERMS)
        .prop_flat_map(|n| {
            let parents: Vec<_> = (1..n)
                .map(|child| prop::collection::vec(0..child, 1..=2))
                .collect();
            (Just(n), parents)
        })
        .prop_map(|(n, parents)| {
            let terms = (0..n)
                .map(|i| Term::new(id(i), format!("term {}", i)))
                .collect();
            let edges = parents
                .iter()
                .enumerate()
                .flat_map(|(offset, ps)| ps.iter().map(move |p| (id(offset + 1), id(*p))))
                .collect();
            Ontology::from_parts("HP", terms, edges)
        })
}

fn row_strategy() -> impl Strategy<Value = AnnotationRow> {
    (0u8..4, 0u8..4).prop_map(|(disease, term)| AnnotationRow {
        database_id: format!("OMIM:{}", 100 + disease),
        disease_name: format!("Disease {}", disease),
        hpo_id: format!("HP:{:07}", term),
        reference: format!("OMIM:{}", 100 + disease),
        evidence: "IEA".to_string(),
        aspect: "P".to_string(),
        ..Default::default()
    })
}

fn change_strategy() -> impl Strategy<Value = FlatChange> {
    (row_strategy(), 0u8..3).prop_map(|(row, status)| {
        let status = match status {
            0 => ChangeStatus::Added,
            1 => ChangeStatus::Changed,
            _ => ChangeStatus::Removed,
        };
        FlatChange::new(row, status, "")
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn every_term_is_reachable_with_unique_path_keys(ontology in dag_strategy()) {
        let tree = materialize(&ontology, &id(0)).unwrap();
        let nodes = tree.walk();

        let keys: HashSet<&str> = nodes.iter().map(|(n, _)| n.path_key.as_str()).collect();
        prop_assert_eq!(keys.len(), nodes.len());

        let terms: HashSet<&Curie> = nodes.iter().map(|(n, _)| &n.term_id).collect();
        prop_assert_eq!(terms.len(), ontology.len());

        for (node, _) in &nodes {
            let expected: Vec<&Curie> = ontology.children(&node.term_id).map(|t| &t.id).collect();
            let actual: Vec<&Curie> = node.children.iter().map(|c| &c.term_id).collect();
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn filter_keeps_exactly_matches_and_their_ancestors(ontology in dag_strategy(), digit in 0usize..MAX_TERMS) {
        let tree = materialize(&ontology, &id(0)).unwrap();
        let query = format!("term {}", digit);
        let matches = |label: &str| label.to_lowercase().contains(&query);

        let expected: HashSet<String> = tree
            .walk()
            .into_iter()
            .filter(|(n, _)| matches(n.label.as_str()))
            .map(|(n, _)| n.path_key.clone())
            .collect();

        match filter(&tree, &query) {
            None => prop_assert!(expected.is_empty()),
            Some(filtered) => {
                let kept = filtered.root.walk();
                let kept_matches: HashSet<String> = kept
                    .iter()
                    .filter(|(n, _)| matches(n.label.as_str()))
                    .map(|(n, _)| n.path_key.clone())
                    .collect();
                prop_assert_eq!(kept_matches, expected);
                for (node, _) in &kept {
                    prop_assert!(matches(node.label.as_str()) || !node.children.is_empty());
                }
                for key in &filtered.expanded {
                    prop_assert!(kept.iter().any(|(n, _)| &n.path_key == key && !n.children.is_empty()));
                }
            }
        }
    }

    #[test]
    fn append_accounts_for_every_row(
        current in prop::collection::vec(row_strategy(), 0..12),
        changes in prop::collection::vec(change_strategy(), 0..12),
    ) {
        let options = ApplyOptions { policy: ApplyPolicy::Append, strictness: Strictness::Off };
        let result = apply(&current, &changes, &options, None);

        prop_assert!(result.rejected.is_empty());
        prop_assert_eq!(result.replaced, 0);
        prop_assert_eq!(result.rows.len(), current.len() + result.added - result.removed);
        let additions = changes.iter().filter(|c| c.status != ChangeStatus::Removed).count();
        prop_assert_eq!(result.added, additions);
    }

    #[test]
    fn replace_by_key_leaves_one_row_per_changed_key(
        current in prop::collection::vec(row_strategy(), 0..12),
        changes in prop::collection::vec(change_strategy(), 0..12),
    ) {
        let options = ApplyOptions { policy: ApplyPolicy::ReplaceByKey, strictness: Strictness::Off };
        let result = apply(&current, &changes, &options, None);

        // the last change for a key decides whether that key survives
        let mut last = std::collections::HashMap::new();
        for change in &changes {
            last.insert(change.key(), change.status);
        }
        for (key, status) in last {
            let count = result.rows.iter().filter(|r| r.has_key(&key)).count();
            let expected = if status == ChangeStatus::Removed { 0 } else { 1 };
            prop_assert_eq!(count, expected);
        }
    }

    #[test]
    fn fingerprint_follows_content(changes in prop::collection::vec(change_strategy(), 1..6)) {
        let copy = changes.clone();
        prop_assert_eq!(fingerprint(&changes), fingerprint(&copy));

        let mut extended = changes.clone();
        extended.push(FlatChange::new(AnnotationRow::default(), ChangeStatus::Added, "extra"));
        prop_assert_ne!(fingerprint(&changes), fingerprint(&extended));
    }
}
