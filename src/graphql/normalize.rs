use std::collections::{HashMap, HashSet};

use graphql_parser::query::{
    Definition, Directive, Document, FragmentDefinition, OperationDefinition, Selection,
    SelectionSet, Value,
};

use super::NormalizeError;

/// Renders `source_text` in canonical form.
///
/// - comments, commas and insignificant whitespace are dropped by re-printing
///   the parsed document
/// - field and directive arguments are sorted by name
/// - variable definitions are sorted by name
/// - when `operation_name` names an operation, the other operations are dropped
/// - fragments not reachable from the remaining operations are dropped, the
///   rest are sorted by name and printed before the operations
///
/// Selection order and argument values are left alone: the first decides the
/// field order of the response, the second is part of what is being asked.
pub fn normalize_document(
    source_text: &str,
    operation_name: Option<&str>,
) -> Result<String, NormalizeError> {
    let mut document = graphql_parser::parse_query::<&str>(source_text)
        .map_err(|e| NormalizeError::Parse(e.to_string()))?;

    if let Some(operation_name) = operation_name {
        let has_named = document
            .definitions
            .iter()
            .any(|definition| operation_of(definition).is_some_and(|op| op.0 == Some(operation_name)));

        if has_named {
            document.definitions.retain(|definition| match operation_of(definition) {
                Some((name, _)) => name == Some(operation_name),
                None => true,
            });
        }
    }

    for definition in &mut document.definitions {
        match definition {
            Definition::Operation(operation) => normalize_operation(operation),
            Definition::Fragment(fragment) => {
                normalize_directives(&mut fragment.directives);
                normalize_selection_set(&mut fragment.selection_set);
            }
        }
    }

    retain_used_fragments(&mut document);

    document.definitions.sort_by(|a, b| match (a, b) {
        (Definition::Fragment(a), Definition::Fragment(b)) => a.name.cmp(b.name),
        (Definition::Fragment(_), Definition::Operation(_)) => std::cmp::Ordering::Less,
        (Definition::Operation(_), Definition::Fragment(_)) => std::cmp::Ordering::Greater,
        // operations keep their relative order
        (Definition::Operation(_), Definition::Operation(_)) => std::cmp::Ordering::Equal,
    });

    if document.definitions.is_empty() {
        return Err(NormalizeError::EmptyDocument);
    }

    Ok(document.to_string())
}

fn operation_of<'a, 'd>(
    definition: &'d Definition<'a, &'a str>,
) -> Option<(Option<&'a str>, &'d OperationDefinition<'a, &'a str>)> {
    match definition {
        Definition::Operation(operation) => {
            let name = match operation {
                OperationDefinition::SelectionSet(_) => None,
                OperationDefinition::Query(query) => query.name,
                OperationDefinition::Mutation(mutation) => mutation.name,
                OperationDefinition::Subscription(subscription) => subscription.name,
            };
            Some((name, operation))
        }
        Definition::Fragment(_) => None,
    }
}

fn normalize_operation<'a>(operation: &mut OperationDefinition<'a, &'a str>) {
    // `query { a }` and `{ a }` are the same operation
    if let OperationDefinition::Query(query) = operation {
        if query.name.is_none() && query.variable_definitions.is_empty() && query.directives.is_empty() {
            *operation = OperationDefinition::SelectionSet(query.selection_set.clone());
        }
    }

    match operation {
        OperationDefinition::SelectionSet(selection_set) => normalize_selection_set(selection_set),
        OperationDefinition::Query(query) => {
            query.variable_definitions.sort_by(|a, b| a.name.cmp(b.name));
            normalize_directives(&mut query.directives);
            normalize_selection_set(&mut query.selection_set);
        }
        OperationDefinition::Mutation(mutation) => {
            mutation.variable_definitions.sort_by(|a, b| a.name.cmp(b.name));
            normalize_directives(&mut mutation.directives);
            normalize_selection_set(&mut mutation.selection_set);
        }
        OperationDefinition::Subscription(subscription) => {
            subscription.variable_definitions.sort_by(|a, b| a.name.cmp(b.name));
            normalize_directives(&mut subscription.directives);
            normalize_selection_set(&mut subscription.selection_set);
        }
    }
}

fn normalize_selection_set<'a>(selection_set: &mut SelectionSet<'a, &'a str>) {
    for selection in &mut selection_set.items {
        match selection {
            Selection::Field(field) => {
                normalize_arguments(&mut field.arguments);
                normalize_directives(&mut field.directives);
                normalize_selection_set(&mut field.selection_set);
            }
            Selection::FragmentSpread(spread) => normalize_directives(&mut spread.directives),
            Selection::InlineFragment(fragment) => {
                normalize_directives(&mut fragment.directives);
                normalize_selection_set(&mut fragment.selection_set);
            }
        }
    }
}

fn normalize_directives<'a>(directives: &mut [Directive<'a, &'a str>]) {
    for directive in directives {
        normalize_arguments(&mut directive.arguments);
    }
}

// Object values are BTreeMaps and already print in key order.
fn normalize_arguments<'a>(arguments: &mut [(&'a str, Value<'a, &'a str>)]) {
    arguments.sort_by(|(a, _), (b, _)| a.cmp(b));
}

fn retain_used_fragments<'a>(document: &mut Document<'a, &'a str>) {
    let fragments: HashMap<&'a str, &FragmentDefinition<'a, &'a str>> = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::Fragment(fragment) => Some((fragment.name, fragment)),
            Definition::Operation(_) => None,
        })
        .collect();

    let mut pending = Vec::new();
    for definition in &document.definitions {
        if let Definition::Operation(operation) = definition {
            let selection_set = match operation {
                OperationDefinition::SelectionSet(selection_set) => selection_set,
                OperationDefinition::Query(query) => &query.selection_set,
                OperationDefinition::Mutation(mutation) => &mutation.selection_set,
                OperationDefinition::Subscription(subscription) => &subscription.selection_set,
            };
            collect_spreads(selection_set, &mut pending);
        }
    }

    let mut used = HashSet::new();
    while let Some(name) = pending.pop() {
        if !used.insert(name) {
            continue;
        }
        if let Some(fragment) = fragments.get(name) {
            collect_spreads(&fragment.selection_set, &mut pending);
        }
    }

    document.definitions.retain(|definition| match definition {
        Definition::Fragment(fragment) => used.contains(fragment.name),
        Definition::Operation(_) => true,
    });
}

fn collect_spreads<'a>(selection_set: &SelectionSet<'a, &'a str>, out: &mut Vec<&'a str>) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => collect_spreads(&field.selection_set, out),
            Selection::FragmentSpread(spread) => out.push(spread.fragment_name),
            Selection::InlineFragment(fragment) => collect_spreads(&fragment.selection_set, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(source: &str) -> String {
        normalize_document(source, None).unwrap()
    }

    #[test]
    fn whitespace_and_comments_do_not_matter() {
        let compact = "query Viewer{viewer{id name}}";
        let spread = r#"
            # fetch the current user
            query   Viewer {
                viewer {   # inline comment
                    id,
                    name
                }
            }
        "#;
        assert_eq!(normalized(compact), normalized(spread));
    }

    #[test]
    fn anonymous_query_keyword_is_optional() {
        assert_eq!(normalized("query { viewer { id } }"), normalized("{ viewer { id } }"));
    }

    #[test]
    fn arguments_are_sorted() {
        assert_eq!(
            normalized("{ users(last: 10, after: \"x\") { id } }"),
            normalized("{ users(after: \"x\", last: 10) { id } }"),
        );
    }

    #[test]
    fn nested_object_arguments_are_sorted() {
        assert_eq!(
            normalized("{ search(filter: { b: 1, a: 2 }) { id } }"),
            normalized("{ search(filter: { a: 2, b: 1 }) { id } }"),
        );
    }

    #[test]
    fn variable_definitions_are_sorted() {
        assert_eq!(
            normalized("query Q($b: Int, $a: Int) { f(a: $a, b: $b) }"),
            normalized("query Q($a: Int, $b: Int) { f(b: $b, a: $a) }"),
        );
    }

    #[test]
    fn argument_values_are_kept() {
        assert_ne!(
            normalized("{ user(id: 1) { name } }"),
            normalized("{ user(id: 2) { name } }"),
        );
    }

    #[test]
    fn selection_order_is_kept() {
        assert_ne!(normalized("{ a b }"), normalized("{ b a }"));
    }

    #[test]
    fn aliases_are_kept() {
        assert_ne!(normalized("{ me: viewer { id } }"), normalized("{ viewer { id } }"));
    }

    #[test]
    fn unused_fragments_are_dropped() {
        let with_unused = "fragment Unused on User { email } query { viewer { ...Fields } } fragment Fields on User { id }";
        let without = "query { viewer { ...Fields } } fragment Fields on User { id }";
        assert_eq!(normalized(with_unused), normalized(without));
        assert!(!normalized(with_unused).contains("Unused"));
    }

    #[test]
    fn nested_fragments_are_kept() {
        let doc = "query { viewer { ...A } } fragment A on User { ...B } fragment B on User { id }";
        let out = normalized(doc);
        assert!(out.contains("fragment A"));
        assert!(out.contains("fragment B"));
    }

    #[test]
    fn fragment_position_does_not_matter() {
        assert_eq!(
            normalized("fragment F on User { id } query { viewer { ...F } }"),
            normalized("query { viewer { ...F } } fragment F on User { id }"),
        );
    }

    #[test]
    fn operation_name_selects_operation() {
        let doc = "query A { a } query B { b }";
        let out = normalize_document(doc, Some("B")).unwrap();
        assert!(out.contains("query B"));
        assert!(!out.contains("query A"));
    }

    #[test]
    fn unknown_operation_name_keeps_document() {
        let doc = "query A { a } query B { b }";
        let out = normalize_document(doc, Some("C")).unwrap();
        assert!(out.contains("query A"));
        assert!(out.contains("query B"));
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(matches!(
            normalize_document("query {", None),
            Err(NormalizeError::Parse(_))
        ));
    }
}
