use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(Tests|Passing|Failing|Pending|Skipped|Screenshots|Video):?\s+(\d+)")
        .expect("valid regex")
});

/// Extracts run counters from the runner's text report.
///
/// Each line contributes at most its first match; a later line overrides an earlier one
/// for the same label. Labels are lower-cased. Never fails.
pub fn summarize_output(output: &str) -> BTreeMap<String, u64> {
    let mut summary = BTreeMap::new();
    for line in output.lines() {
        let Some(captures) = SUMMARY_LINE.captures(line) else {
            continue;
        };
        let Ok(count) = captures[2].parse::<u64>() else {
            continue;
        };
        summary.insert(captures[1].to_ascii_lowercase(), count);
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::summarize_output;

    #[test]
    fn collects_labelled_counts() {
        let summary = summarize_output("Tests: 5\nPassing: 3\nFailing: 2\nsomething else\n");
        assert_eq!(
            summary,
            BTreeMap::from([
                ("failing".to_owned(), 2),
                ("passing".to_owned(), 3),
                ("tests".to_owned(), 5),
            ])
        );
    }

    #[test]
    fn last_occurrence_wins_and_case_is_ignored() {
        let report = "  │ Tests:        4 │\n  │ passing:      1 │\n  │ Passing:      4 │\n  │ Video:        true │\n  │ Screenshots:  0 │\n";
        let summary = summarize_output(report);
        assert_eq!(summary.get("tests"), Some(&4));
        assert_eq!(summary.get("passing"), Some(&4));
        assert_eq!(summary.get("screenshots"), Some(&0));
        assert_eq!(summary.get("video"), None);
    }

    #[test]
    fn unmatched_output_is_empty() {
        assert!(summarize_output("").is_empty());
        assert!(summarize_output("Opening Cypress...\nDone").is_empty());
    }
}
