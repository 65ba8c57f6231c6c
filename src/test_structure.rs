use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static SUITE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\b(describe|context|it|test)\s*(?:\.(only|skip))?\s*\(\s*(?:'((?s:.*?))'|"((?s:.*?))"|`((?s:.*?))`)"#,
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestNode {
    #[serde(rename = "type")]
    pub kind: String,
    pub modifier: Option<String>,
    pub name: String,
    pub line: usize,
}

/// Lists `describe`/`context`/`it`/`test` calls that have a quoted title, in source order.
pub fn parse_test_structure(content: &str) -> Vec<TestNode> {
    SUITE_CALL
        .captures_iter(content)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let name = captures
                .get(3)
                .or_else(|| captures.get(4))
                .or_else(|| captures.get(5))?;
            Some(TestNode {
                kind: captures[1].to_owned(),
                modifier: captures.get(2).map(|found| found.as_str().to_owned()),
                name: name.as_str().to_owned(),
                line: content[..whole.start()].matches('\n').count() + 1,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_test_structure;

    #[test]
    fn finds_suites_tests_and_modifiers_with_lines() {
        let content = "describe('login', () => {\n  it.only(\"accepts valid user\", () => {});\n  context(`when locked`, () => {\n    test.skip('shows banner', () => {});\n  });\n});\n";
        let nodes = parse_test_structure(content);
        let summary = nodes
            .iter()
            .map(|node| (node.kind.as_str(), node.modifier.as_deref(), node.name.as_str(), node.line))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("describe", None, "login", 1),
                ("it", Some("only"), "accepts valid user", 2),
                ("context", None, "when locked", 3),
                ("test", Some("skip"), "shows banner", 4),
            ]
        );
    }

    #[test]
    fn titles_keep_other_quote_kinds_and_identifiers_are_not_matched() {
        let content = "it(\"can't fail\", () => {});\nconst visit = () => {};\nsplit('x');\n";
        let nodes = parse_test_structure(content);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "can't fail");
    }

    #[test]
    fn serializes_kind_as_type() {
        let nodes = parse_test_structure("describe('a', () => {});");
        let value = serde_json::to_value(&nodes).expect("json");
        assert_eq!(
            value,
            serde_json::json!([{ "type": "describe", "modifier": null, "name": "a", "line": 1 }])
        );
    }
}
