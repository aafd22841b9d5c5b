//! Combobox widget wiring.
//!
//! A widget is a set of elements sharing one id: a hidden value field
//! `combobox-{id}-value`, a hidden name field `combobox-{id}-name`, a search
//! input `combobox-{id}-search` carrying `data-combobox="{id}"`, and a
//! results container `combobox-{id}-results`. Selectable result rows carry
//! `data-combobox-select="{id}"` and `data-combobox-item-id`; the display
//! name comes from `data-combobox-item-name`, on the row itself or on a
//! label element inside it.

use super::*;

pub(crate) const HIDDEN_CLASS: &str = "hidden";

const SEARCH_MARKER_ATTR: &str = "data-combobox";
const SUBMIT_MARKER_ATTR: &str = "data-combobox-submit";
const ROW_MARKER_ATTR: &str = "data-combobox-select";
const ITEM_ID_ATTR: &str = "data-combobox-item-id";
const ITEM_NAME_ATTR: &str = "data-combobox-item-name";

const DEFAULT_HIDE_DELAY_MS: i64 = 200;

/// Wired reaction of a widget element to a page event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Behavior {
    SyncSearchInput { widget: String },
    HideResultsOnBlur { widget: String, delay_ms: i64 },
    SelectItem { widget: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskAction {
    HideResults { container_id: String },
}

/// The combobox controller. Construct one per page and pass it by
/// reference wherever widget operations are needed.
#[derive(Debug, Clone)]
pub struct Combobox {
    hide_delay_ms: i64,
}

impl Default for Combobox {
    fn default() -> Self {
        Self::new()
    }
}

impl Combobox {
    pub fn new() -> Self {
        Self {
            hide_delay_ms: DEFAULT_HIDE_DELAY_MS,
        }
    }

    /// Delay between a search field blur and hiding its results container.
    /// The delay must be long enough for a pending result-row click to run
    /// before the container disappears.
    pub fn set_hide_delay_ms(&mut self, delay_ms: i64) {
        self.hide_delay_ms = delay_ms.max(0);
    }

    /// Scan the page for widget markers and wire input/blur behaviors on
    /// search inputs and click behaviors on selectable result rows.
    ///
    /// Re-run after every fragment swap. Wiring is deduplicated, so
    /// repeated runs over the same elements attach nothing new. Returns the
    /// number of search inputs found.
    pub fn install(&self, page: &mut Page) -> Result<usize> {
        let mut wired = 0usize;
        for input in page.dom.elements_with_attr(SEARCH_MARKER_ATTR) {
            let Some(widget) = page.dom.attr(input, SEARCH_MARKER_ATTR) else {
                continue;
            };
            if widget.is_empty() {
                page.warn("combobox: search input has an empty widget id".to_string());
                continue;
            }
            wired += 1;
            let added_input = page.add_listener(
                input,
                "input",
                Behavior::SyncSearchInput {
                    widget: widget.clone(),
                },
            );
            let added_blur = page.add_listener(
                input,
                "blur",
                Behavior::HideResultsOnBlur {
                    widget: widget.clone(),
                    delay_ms: self.hide_delay_ms,
                },
            );
            if added_input || added_blur {
                page.trace_widget_line(format!("[widget] wire id={widget}"));
            }
        }

        for row in page.dom.elements_with_attr(ROW_MARKER_ATTR) {
            let Some(widget) = page.dom.attr(row, ROW_MARKER_ATTR) else {
                continue;
            };
            if widget.is_empty() {
                continue;
            }
            page.add_listener(row, "click", Behavior::SelectItem { widget });
        }

        Ok(wired)
    }

    /// Select an item: write the item id into the value field, the display
    /// name into the search and name fields, hide the results container,
    /// and submit the enclosing form when the search input opts in via
    /// `data-combobox-submit="true"`.
    pub fn select(
        &self,
        page: &mut Page,
        widget: &str,
        item_id: &str,
        item_name: &str,
    ) -> Result<()> {
        select_in_page(page, widget, item_id, item_name)
    }

    /// Reset the widget's value, name, and search fields to empty strings.
    /// Missing fields are skipped; the results container is untouched.
    pub fn clear(&self, page: &mut Page, widget: &str) -> Result<()> {
        page.trace_widget_line(format!("[widget] clear id={widget}"));
        let refs = resolve_widget(&page.dom, widget);
        for field in [refs.value, refs.name, refs.search].into_iter().flatten() {
            page.dom.set_value(field, "")?;
        }
        Ok(())
    }

    /// Rewrite every result label inside `container_id` so that each
    /// case-insensitive occurrence of `query` is wrapped in `<strong>`,
    /// keeping the matched text's original case. The query is escaped
    /// before matching, so user-typed metacharacters match literally.
    ///
    /// Labels are rebuilt from their `data-combobox-item-name` attribute,
    /// which must hold trusted plain text.
    pub fn highlight_query(&self, page: &mut Page, container_id: &str, query: &str) -> Result<()> {
        if query.is_empty() {
            return Ok(());
        }
        let Some(container) = page.dom.by_id(container_id) else {
            return Ok(());
        };
        let labels = page.dom.descendants_with_attr(container, ITEM_NAME_ATTR);
        if labels.is_empty() {
            return Ok(());
        }

        let pattern = PatternBuilder::new(&pattern::escape(query))
            .case_insensitive(true)
            .build()?;

        let mut rewritten = 0usize;
        for label in labels {
            let Some(name) = page.dom.attr(label, ITEM_NAME_ATTR) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let highlighted = wrap_matches(&pattern, &name)?;
            page.dom.set_inner_html(label, &highlighted)?;
            rewritten += 1;
        }

        page.trace_widget_line(format!(
            "[widget] highlight container={container_id} labels={rewritten}"
        ));
        Ok(())
    }
}

pub(crate) fn select_in_page(
    page: &mut Page,
    widget: &str,
    item_id: &str,
    item_name: &str,
) -> Result<()> {
    page.trace_widget_line(format!("[widget] select id={widget} item={item_id}"));

    let refs = resolve_widget(&page.dom, widget);
    let (Some(value), Some(search)) = (refs.value, refs.search) else {
        page.warn(format!(
            "combobox: required elements missing for '{widget}'"
        ));
        return Ok(());
    };

    page.dom.set_value(value, item_id)?;
    page.dom.set_value(search, item_name)?;
    if let Some(name) = refs.name {
        page.dom.set_value(name, item_name)?;
    }

    if let Some(results) = refs.results {
        page.dom.add_class(results, HIDDEN_CLASS)?;
    }

    let auto_submit = page.dom.attr(search, SUBMIT_MARKER_ATTR).as_deref() == Some("true");
    if auto_submit {
        page.trace_widget_line(format!("[widget] auto-submit id={widget}"));
        if let Some(form) = page.dom.find_ancestor_by_tag(search, "form") {
            page.request_submit(form)?;
        }
    }

    Ok(())
}

fn wrap_matches(pattern: &Pattern, name: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len());
    let mut cursor = 0usize;
    for matched in pattern.find_all(name)? {
        if matched.as_str().is_empty() || matched.start() < cursor {
            continue;
        }
        out.push_str(&name[cursor..matched.start()]);
        out.push_str("<strong>");
        out.push_str(&escape_html_text_for_serialization(matched.as_str()));
        out.push_str("</strong>");
        cursor = matched.end();
    }
    out.push_str(&escape_html_text_for_serialization(&name[cursor..]));
    Ok(out)
}

#[derive(Debug, Clone, Copy, Default)]
struct WidgetRefs {
    value: Option<NodeId>,
    name: Option<NodeId>,
    search: Option<NodeId>,
    results: Option<NodeId>,
}

fn resolve_widget(dom: &Dom, widget: &str) -> WidgetRefs {
    WidgetRefs {
        value: dom.by_id(&value_field_id(widget)),
        name: dom.by_id(&name_field_id(widget)),
        search: dom.by_id(&search_field_id(widget)),
        results: dom.by_id(&results_container_id(widget)),
    }
}

pub(crate) fn value_field_id(widget: &str) -> String {
    format!("combobox-{widget}-value")
}

pub(crate) fn name_field_id(widget: &str) -> String {
    format!("combobox-{widget}-name")
}

pub(crate) fn search_field_id(widget: &str) -> String {
    format!("combobox-{widget}-search")
}

pub(crate) fn results_container_id(widget: &str) -> String {
    format!("combobox-{widget}-results")
}

impl Page {
    pub(crate) fn run_behavior(&mut self, behavior: &Behavior, event: &EventState) -> Result<()> {
        match behavior {
            Behavior::SyncSearchInput { widget } => {
                // The user is typing: mirror the text into the name field
                // and discard any prior selection.
                let text = self.dom.value(event.target)?;
                let refs = resolve_widget(&self.dom, widget);
                if let Some(name) = refs.name {
                    self.dom.set_value(name, &text)?;
                }
                if let Some(value) = refs.value {
                    self.dom.set_value(value, "")?;
                }
                Ok(())
            }
            Behavior::HideResultsOnBlur { widget, delay_ms } => {
                let container_id = results_container_id(widget);
                if self.dom.by_id(&container_id).is_none() {
                    return Ok(());
                }
                let timer = self.schedule_task(*delay_ms, TaskAction::HideResults { container_id });
                self.trace_widget_line(format!(
                    "[widget] blur id={widget} hide_timer={timer} delay_ms={delay_ms}"
                ));
                Ok(())
            }
            Behavior::SelectItem { widget } => {
                let row = event.current_target;
                let Some(item_id) = self.dom.attr(row, ITEM_ID_ATTR) else {
                    self.warn(format!(
                        "combobox: result row for '{widget}' has no item id"
                    ));
                    return Ok(());
                };
                // The display name sits on the row itself or on the label
                // element nested inside it.
                let label = if self.dom.attr(row, ITEM_NAME_ATTR).is_some() {
                    Some(row)
                } else {
                    self.dom
                        .descendants_with_attr(row, ITEM_NAME_ATTR)
                        .into_iter()
                        .next()
                };
                let item_name = label.and_then(|node| self.dom.attr(node, ITEM_NAME_ATTR));
                let Some(item_name) = item_name else {
                    self.warn(format!(
                        "combobox: result row for '{widget}' has no item name"
                    ));
                    return Ok(());
                };
                select_in_page(self, widget, &item_id, &item_name)
            }
        }
    }

    pub(crate) fn run_task_action(&mut self, action: &TaskAction) -> Result<()> {
        match action {
            TaskAction::HideResults { container_id } => {
                // Resolved by id at fire time: a container replaced by a
                // swap (or already hidden by a selection) stays untouched.
                let Some(container) = self.dom.by_id(container_id) else {
                    return Ok(());
                };
                self.dom.add_class(container, HIDDEN_CLASS)
            }
        }
    }
}
