use graphql_parser::query::{Definition, OperationDefinition};

use super::OperationKind;

/// Finds the kind of operation a request would execute.
///
/// With an operation name the matching operation decides. Otherwise a single
/// operation decides; with several, the document is a query only if every
/// operation is one. Returns `None` for documents that fail to parse or hold
/// no (matching) operation.
pub fn detect(source_text: &str, operation_name: Option<&str>) -> Option<OperationKind> {
    let document = graphql_parser::parse_query::<&str>(source_text).ok()?;

    let operations = document.definitions.iter().filter_map(|definition| match definition {
        Definition::Operation(operation) => Some(operation),
        Definition::Fragment(_) => None,
    });

    let mut detected = None;
    for operation in operations {
        let (name, kind) = match operation {
            OperationDefinition::SelectionSet(_) => (None, OperationKind::Query),
            OperationDefinition::Query(query) => (query.name, OperationKind::Query),
            OperationDefinition::Mutation(mutation) => (mutation.name, OperationKind::Mutation),
            OperationDefinition::Subscription(subscription) => {
                (subscription.name, OperationKind::Subscription)
            }
        };

        match operation_name {
            Some(wanted) if name == Some(wanted) => return Some(kind),
            Some(_) => continue,
            None => {}
        }

        detected = match detected {
            None | Some(OperationKind::Query) => Some(kind),
            other => other,
        };
    }

    detected
}

/// Best-effort kind of a document that does not parse.
///
/// Looks at the first keyword after leading whitespace, commas and comments.
/// Anything that does not start like an operation yields `None`.
pub fn detect_lexically(source_text: &str) -> Option<OperationKind> {
    let mut rest = source_text.trim_start_matches('\u{feff}');
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        match rest.strip_prefix('#') {
            Some(comment) => rest = comment.split_once('\n').map_or("", |(_, tail)| tail),
            None => break,
        }
    }

    if rest.starts_with('{') {
        return Some(OperationKind::Query);
    }

    let keyword_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    match &rest[..keyword_len] {
        "query" => Some(OperationKind::Query),
        "mutation" => Some(OperationKind::Mutation),
        "subscription" => Some(OperationKind::Subscription),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_operations() {
        assert_eq!(detect("{ viewer { id } }", None), Some(OperationKind::Query));
        assert_eq!(detect("query Q { a }", None), Some(OperationKind::Query));
        assert_eq!(
            detect("mutation M { like(id: 1) }", None),
            Some(OperationKind::Mutation)
        );
        assert_eq!(
            detect("subscription S { ticks }", None),
            Some(OperationKind::Subscription)
        );
    }

    #[test]
    fn operation_name_picks_the_operation() {
        let doc = "query Read { a } mutation Write { b }";
        assert_eq!(detect(doc, Some("Read")), Some(OperationKind::Query));
        assert_eq!(detect(doc, Some("Write")), Some(OperationKind::Mutation));
        assert_eq!(detect(doc, Some("Missing")), None);
    }

    #[test]
    fn mixed_documents_without_name_are_not_queries() {
        assert_eq!(
            detect("query Read { a } mutation Write { b }", None),
            Some(OperationKind::Mutation)
        );
        assert_eq!(
            detect("query A { a } query B { b }", None),
            Some(OperationKind::Query)
        );
    }

    #[test]
    fn fragments_only_or_garbage() {
        assert_eq!(detect("fragment F on User { id }", None), None);
        assert_eq!(detect("not graphql", None), None);
    }

    #[test]
    fn lexical_detection() {
        assert_eq!(detect_lexically("  { a "), Some(OperationKind::Query));
        assert_eq!(
            detect_lexically("# leading\n, mutation {"),
            Some(OperationKind::Mutation)
        );
        assert_eq!(
            detect_lexically("subscription("),
            Some(OperationKind::Subscription)
        );
        assert_eq!(detect_lexically("queryish {"), None);
        assert_eq!(detect_lexically("[{\"query\":\"{ a }\"}]"), None);
        assert_eq!(detect_lexically(""), None);
    }
}
