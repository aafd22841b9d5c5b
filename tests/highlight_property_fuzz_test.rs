use combobox_wire::{Combobox, Page};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

fn letter_strategy() -> BoxedStrategy<char> {
    prop_oneof![
        prop::char::range('a', 'z'),
        prop::char::range('A', 'Z'),
        prop::char::range('0', '9'),
    ]
    .boxed()
}

fn metachar_strategy() -> BoxedStrategy<char> {
    prop_oneof![
        Just('.'),
        Just('+'),
        Just('*'),
        Just('?'),
        Just('('),
        Just(')'),
        Just('['),
        Just(']'),
        Just('{'),
        Just('}'),
        Just('|'),
        Just('^'),
        Just('$'),
        Just('\\'),
        Just('/'),
        Just('-'),
        Just('_'),
        Just(' '),
    ]
    .boxed()
}

fn text_strategy(max_len: usize) -> BoxedStrategy<String> {
    prop::collection::vec(
        prop_oneof![letter_strategy(), metachar_strategy()],
        1..max_len,
    )
    .prop_map(|chars| chars.into_iter().collect())
    .boxed()
}

fn highlight(label: &str, query: &str) -> Result<String, TestCaseError> {
    let html = format!(
        "<div id='combobox-x-results'>\
         <span id='label' data-combobox-item-name='{label}'>{label}</span>\
         </div>"
    );
    let mut page = Page::from_html(&html).map_err(fail)?;
    let combobox = Combobox::new();
    combobox
        .highlight_query(&mut page, "combobox-x-results", query)
        .map_err(fail)?;
    page.inner_html("#label").map_err(fail)
}

fn fail(err: combobox_wire::Error) -> TestCaseError {
    TestCaseError::fail(err.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    // Arbitrary queries, metacharacters included, never fail and never
    // lose label text: stripping the emphasis markup restores the label.
    #[test]
    fn highlight_preserves_label_text(
        label in text_strategy(30),
        query in text_strategy(8),
    ) {
        let highlighted = highlight(&label, &query)?;
        let stripped = highlighted
            .replace("<strong>", "")
            .replace("</strong>", "");
        prop_assert_eq!(stripped, label);
    }

    // A query equal to the whole label wraps the label exactly once,
    // preserving its case.
    #[test]
    fn full_label_match_is_fully_wrapped(label in text_strategy(12)) {
        let highlighted = highlight(&label, &label)?;
        prop_assert_eq!(highlighted, format!("<strong>{label}</strong>"));
    }

    // Matching is case-insensitive while the replacement keeps the
    // label's original case.
    #[test]
    fn matching_ignores_case_without_rewriting_it(
        word in prop::collection::vec(prop::char::range('a', 'z'), 2..10)
            .prop_map(|chars| chars.into_iter().collect::<String>()),
    ) {
        let label = word.to_uppercase();
        let highlighted = highlight(&label, &word)?;
        prop_assert_eq!(highlighted, format!("<strong>{label}</strong>"));
    }

    // Queries drawn from a disjoint alphabet never produce markup, even
    // when they are built entirely from pattern metacharacters.
    #[test]
    fn non_matching_queries_leave_labels_untouched(
        label in prop::collection::vec(prop::char::range('a', 'm'), 1..20)
            .prop_map(|chars| chars.into_iter().collect::<String>()),
        query in prop::collection::vec(
            prop_oneof![prop::char::range('n', 'z'), metachar_strategy()],
            1..8,
        )
        .prop_map(|chars| chars.into_iter().collect::<String>()),
    ) {
        let highlighted = highlight(&label, &query)?;
        prop_assert!(!highlighted.contains("<strong>"));
        prop_assert_eq!(highlighted, label);
    }
}
