use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

mod combobox;
mod dom;
mod html;
mod pattern;
mod selector;

pub use combobox::Combobox;

use combobox::{Behavior, TaskAction};
use dom::*;
use html::*;
use pattern::*;
use selector::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    Runtime(String),
    Pattern(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::Pattern(msg) => write!(f, "pattern error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::TypeMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {selector}: expected {expected}, actual {actual}"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

impl From<PatternError> for Error {
    fn from(value: PatternError) -> Self {
        Self::Pattern(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EventState {
    pub(crate) event_type: String,
    pub(crate) target: NodeId,
    pub(crate) current_target: NodeId,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Behavior>>>,
}

impl ListenerStore {
    // Attachment is deduplicated: wiring the same behavior twice onto a
    // node is a no-op, so re-running installation after fragment swaps
    // never stacks listeners.
    fn add(&mut self, node_id: NodeId, event: &str, behavior: Behavior) -> bool {
        let listeners = self
            .map
            .entry(node_id)
            .or_default()
            .entry(event.to_string())
            .or_default();
        if listeners.contains(&behavior) {
            return false;
        }
        listeners.push(behavior);
        true
    }

    fn get(&self, node_id: NodeId, event: &str) -> Vec<Behavior> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }

    fn count(&self, node_id: NodeId, event: &str) -> usize {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
struct ScheduledTask {
    id: i64,
    due_at: i64,
    order: i64,
    action: TaskAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitVia {
    FragmentExchange,
    Native,
}

impl fmt::Display for SubmitVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FragmentExchange => write!(f, "fragment-exchange"),
            Self::Native => write!(f, "native"),
        }
    }
}

/// What a form looked like at the moment it was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSnapshot {
    pub form_id: Option<String>,
    pub action: Option<String>,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

/// A recorded form submission. The transport itself is out of scope; the
/// record carries everything a transport would have sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub via: SubmitVia,
    pub form_id: Option<String>,
    pub action: Option<String>,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

/// How the page submits a form. Injected at `Page` construction: pages
/// with a fragment-exchange integration use [`FragmentSubmit`], everything
/// else falls back to [`NativeSubmit`].
pub trait SubmitStrategy: fmt::Debug {
    fn via(&self) -> SubmitVia;

    fn submit(&self, form: &FormSnapshot) -> Submission {
        Submission {
            via: self.via(),
            form_id: form.form_id.clone(),
            action: form.action.clone(),
            method: form.method.clone(),
            fields: form.fields.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentSubmit;

impl SubmitStrategy for FragmentSubmit {
    fn via(&self) -> SubmitVia {
        SubmitVia::FragmentExchange
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSubmit;

impl SubmitStrategy for NativeSubmit {
    fn via(&self) -> SubmitVia {
        SubmitVia::Native
    }
}

pub struct Page {
    pub(crate) dom: Dom,
    listeners: ListenerStore,
    task_queue: Vec<ScheduledTask>,
    active_element: Option<NodeId>,
    now_ms: i64,
    next_timer_id: i64,
    next_task_order: i64,
    submit: Box<dyn SubmitStrategy>,
    submissions: Vec<Submission>,
    warnings: Vec<String>,
    trace: bool,
    trace_events: bool,
    trace_timers: bool,
    trace_widgets: bool,
    trace_swaps: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        Self::with_submit(html, Box::new(NativeSubmit))
    }

    pub fn with_submit(html: &str, submit: Box<dyn SubmitStrategy>) -> Result<Self> {
        let dom = parse_fragment(html)?;
        Ok(Self {
            dom,
            listeners: ListenerStore::default(),
            task_queue: Vec::new(),
            active_element: None,
            now_ms: 0,
            next_timer_id: 1,
            next_task_order: 0,
            submit,
            submissions: Vec::new(),
            warnings: Vec::new(),
            trace: false,
            trace_events: true,
            trace_timers: true,
            trace_widgets: true,
            trace_swaps: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: false,
        })
    }

    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_timers(&mut self, enabled: bool) {
        self.trace_timers = enabled;
    }

    pub fn set_trace_widgets(&mut self, enabled: bool) {
        self.trace_widgets = enabled;
    }

    pub fn set_trace_swaps(&mut self, enabled: bool) {
        self.trace_swaps = enabled;
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Set a text control's value and fire its input event, as typing does.
    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        if self.dom.readonly(target) {
            return Ok(());
        }

        let tag = self
            .dom
            .tag_name(target)
            .ok_or_else(|| Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: "non-element".into(),
            })?
            .to_ascii_lowercase();

        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }

        self.dom.set_value(target, text)?;
        self.dispatch_event(target, "input")?;
        Ok(())
    }

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }

        self.dispatch_event(target, "click")?;

        if is_submit_control(&self.dom, target) {
            if let Some(form) = self.dom.find_ancestor_by_tag(target, "form") {
                self.request_submit(form)?;
            }
        }

        Ok(())
    }

    pub fn focus(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        if self.active_element == Some(target) {
            return Ok(());
        }
        if let Some(current) = self.active_element {
            self.blur_node(current)?;
        }
        self.active_element = Some(target);
        self.dispatch_event(target, "focus")?;
        Ok(())
    }

    pub fn blur(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.blur_node(target)
    }

    fn blur_node(&mut self, node: NodeId) -> Result<()> {
        if self.active_element != Some(node) {
            return Ok(());
        }
        self.dispatch_event(node, "blur")?;
        self.active_element = None;
        Ok(())
    }

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dispatch_event(target, event)?;
        Ok(())
    }

    /// Replace a container's content with an externally rendered fragment.
    /// Inserted markup is sanitized: `<script>` elements, `on*` attributes,
    /// and `javascript:` URLs are dropped. Re-run `Combobox::install`
    /// afterwards to wire anything the fragment brought in.
    pub fn swap_fragment(&mut self, selector: &str, html: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.set_inner_html(target, html)?;
        if self.trace && self.trace_swaps {
            let label = self.node_label(target);
            let line = format!("[swap] target={label} bytes={}", html.len());
            self.trace_line(line);
        }
        Ok(())
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance delta_ms={} from={} to={} ran_due={}",
            delta_ms, from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn advance_time_to(&mut self, target_ms: i64) -> Result<()> {
        if target_ms < self.now_ms {
            return Err(Error::Runtime(format!(
                "advance_time_to requires target >= now_ms (target={target_ms}, now_ms={})",
                self.now_ms
            )));
        }
        let from = self.now_ms;
        self.now_ms = target_ms;
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance_to from={} to={} ran_due={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    /// Run every pending task, advancing the clock to each task's due time.
    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms;
        let ran = self.run_timer_queue(None, true)?;
        self.trace_timer_line(format!(
            "[timer] flush from={} to={} ran={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .task_queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub fn listener_count(&self, selector: &str, event: &str) -> Result<usize> {
        let target = self.select_one(selector)?;
        Ok(self.listeners.count(target, event))
    }

    pub fn count_matches(&self, selector: &str) -> Result<usize> {
        Ok(self.dom.query_selector_all(selector)?.len())
    }

    pub fn inner_html(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.dom.inner_html(target)
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.attr(target, name))
    }

    pub fn set_attr(&mut self, selector: &str, name: &str, value: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.set_attr(target, name, value)
    }

    pub fn add_class(&mut self, selector: &str, class_name: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.add_class(target, class_name)
    }

    pub fn remove_class(&mut self, selector: &str, class_name: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.remove_class(target, class_name)
    }

    pub fn remove_attr(&mut self, selector: &str, name: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.remove_attr(target, name)
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_value(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.value(target)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_class(&self, selector: &str, class_name: &str, expected: bool) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.has_class(target, class_name);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("class '{class_name}' present={expected}"),
                actual: format!("present={actual}"),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub(crate) fn add_listener(&mut self, node: NodeId, event: &str, behavior: Behavior) -> bool {
        self.listeners.add(node, event, behavior)
    }

    pub(crate) fn schedule_task(&mut self, delay_ms: i64, action: TaskAction) -> i64 {
        let delay_ms = delay_ms.max(0);
        let due_at = self.now_ms.saturating_add(delay_ms);
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let order = self.next_task_order;
        self.next_task_order += 1;
        self.task_queue.push(ScheduledTask {
            id,
            due_at,
            order,
            action,
        });
        self.trace_timer_line(format!(
            "[timer] schedule id={id} due_at={due_at} delay_ms={delay_ms}"
        ));
        id
    }

    fn run_due_timers_internal(&mut self) -> Result<usize> {
        self.run_timer_queue(Some(self.now_ms), false)
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>, advance_clock: bool) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(next_idx) = self.next_task_index(due_limit) {
            steps += 1;
            let task = self.task_queue.remove(next_idx);
            if advance_clock && task.due_at > self.now_ms {
                self.now_ms = task.due_at;
            }
            self.trace_timer_line(format!(
                "[timer] run id={} due_at={} now_ms={}",
                task.id, task.due_at, self.now_ms
            ));
            self.run_task_action(&task.action)?;
        }
        Ok(steps)
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        self.task_queue
            .iter()
            .enumerate()
            .filter(|(_, task)| {
                if let Some(limit) = due_limit {
                    task.due_at <= limit
                } else {
                    true
                }
            })
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)
    }

    pub(crate) fn request_submit(&mut self, form: NodeId) -> Result<()> {
        let snapshot = self.form_snapshot(form)?;
        let submission = self.submit.submit(&snapshot);
        if self.trace {
            let line = format!(
                "[submit] via={} form={} fields={}",
                submission.via,
                submission.form_id.as_deref().unwrap_or("<anonymous>"),
                submission.fields.len()
            );
            self.trace_line(line);
        }
        self.submissions.push(submission);
        Ok(())
    }

    fn form_snapshot(&self, form: NodeId) -> Result<FormSnapshot> {
        let tag = self
            .dom
            .tag_name(form)
            .ok_or_else(|| Error::Runtime("submit target is not an element".into()))?;
        if !tag.eq_ignore_ascii_case("form") {
            return Err(Error::Runtime("submit target is not a form".into()));
        }

        let mut fields = Vec::new();
        self.collect_form_fields(form, &mut fields)?;

        Ok(FormSnapshot {
            form_id: self.dom.attr(form, "id"),
            action: self.dom.attr(form, "action"),
            method: self
                .dom
                .attr(form, "method")
                .unwrap_or_else(|| "get".into())
                .to_ascii_lowercase(),
            fields,
        })
    }

    fn collect_form_fields(&self, node: NodeId, out: &mut Vec<(String, String)>) -> Result<()> {
        for child in self.dom.nodes[node.0].children.clone() {
            if self.is_successful_form_field(child)? {
                let name = self.dom.attr(child, "name").unwrap_or_default();
                let mut value = self.dom.value(child)?;
                if value.is_empty()
                    && (is_checkbox_input(&self.dom, child) || is_radio_input(&self.dom, child))
                {
                    value = "on".into();
                }
                out.push((name, value));
            }
            self.collect_form_fields(child, out)?;
        }
        Ok(())
    }

    fn is_successful_form_field(&self, control: NodeId) -> Result<bool> {
        let Some(tag) = self.dom.tag_name(control) else {
            return Ok(false);
        };
        let tag = tag.to_ascii_lowercase();
        if tag != "input" && tag != "textarea" {
            return Ok(false);
        }
        if self.dom.disabled(control) {
            return Ok(false);
        }
        let name = self.dom.attr(control, "name").unwrap_or_default();
        if name.is_empty() {
            return Ok(false);
        }

        if tag == "input" {
            let kind = self
                .dom
                .attr(control, "type")
                .unwrap_or_else(|| "text".into())
                .to_ascii_lowercase();
            if matches!(
                kind.as_str(),
                "button" | "submit" | "reset" | "file" | "image"
            ) {
                return Ok(false);
            }
            if kind == "checkbox" || kind == "radio" {
                return Ok(self.dom.attr(control, "checked").is_some());
            }
        }

        Ok(true)
    }

    fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        // Target first, then bubble through ancestors.
        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }

        for node in path {
            event.current_target = node;
            let behaviors = self.listeners.get(node, &event.event_type);
            for behavior in behaviors {
                if self.trace && self.trace_events {
                    let target_label = self.node_label(event.target);
                    let current_label = self.node_label(node);
                    let line = format!(
                        "[event] {} target={target_label} current={current_label}",
                        event.event_type
                    );
                    self.trace_line(line);
                }
                self.run_behavior(&behavior, &event)?;
            }
        }

        Ok(event)
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    fn node_label(&self, node_id: NodeId) -> String {
        let Some(tag) = self.dom.tag_name(node_id) else {
            return "#document".into();
        };
        match self.dom.attr(node_id, "id") {
            Some(id) if !id.is_empty() => format!("{tag}#{id}"),
            _ => tag.to_string(),
        }
    }

    pub(crate) fn warn(&mut self, line: String) {
        if self.trace {
            let traced = format!("[warn] {line}");
            self.trace_line(traced);
        }
        self.warnings.push(line);
    }

    pub(crate) fn trace_widget_line(&mut self, line: String) {
        if self.trace && self.trace_widgets {
            self.trace_line(line);
        }
    }

    fn trace_timer_line(&mut self, line: String) {
        if self.trace && self.trace_timers {
            self.trace_line(line);
        }
    }

    fn trace_line(&mut self, line: String) {
        if self.trace {
            if self.trace_to_stderr {
                eprintln!("{line}");
            }
            if self.trace_logs.len() >= self.trace_log_limit {
                self.trace_logs.remove(0);
            }
            self.trace_logs.push(line);
        }
    }
}

fn is_submit_control(dom: &Dom, node: NodeId) -> bool {
    let Some(tag) = dom.tag_name(node) else {
        return false;
    };
    if tag.eq_ignore_ascii_case("button") {
        let kind = dom
            .attr(node, "type")
            .unwrap_or_else(|| "submit".into())
            .to_ascii_lowercase();
        return kind == "submit";
    }
    if tag.eq_ignore_ascii_case("input") {
        let kind = dom.attr(node, "type").unwrap_or_default().to_ascii_lowercase();
        return kind == "submit" || kind == "image";
    }
    false
}

fn is_checkbox_input(dom: &Dom, node: NodeId) -> bool {
    input_type_is(dom, node, "checkbox")
}

fn is_radio_input(dom: &Dom, node: NodeId) -> bool {
    input_type_is(dom, node, "radio")
}

fn input_type_is(dom: &Dom, node: NodeId, expected: &str) -> bool {
    dom.tag_name(node)
        .map(|tag| tag.eq_ignore_ascii_case("input"))
        .unwrap_or(false)
        && dom
            .attr(node, "type")
            .map(|kind| kind.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDGET_HTML: &str = r#"
        <form id='search-form' action='/search' method='get'>
          <input type='hidden' name='country_id' id='combobox-country-value'>
          <input type='hidden' name='country_name' id='combobox-country-name'>
          <input type='text' name='q' id='combobox-country-search' data-combobox='country'>
          <div id='combobox-country-results'></div>
        </form>
        "#;

    const RESULTS_HTML: &str = r#"
        <ul>
          <li data-combobox-select='country' data-combobox-item-id='7'>
            <span id='label-ca' data-combobox-item-name='Canada'>Canada</span>
          </li>
          <li data-combobox-select='country' data-combobox-item-id='11'>
            <span id='label-kh' data-combobox-item-name='Cambodia'>Cambodia</span>
          </li>
        </ul>
        "#;

    fn wired_page() -> Result<(Page, Combobox)> {
        let mut page = Page::from_html(WIDGET_HTML)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;
        Ok((page, combobox))
    }

    #[test]
    fn select_populates_fields_and_hides_results() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.select(&mut page, "country", "7", "Canada")?;

        page.assert_value("#combobox-country-value", "7")?;
        page.assert_value("#combobox-country-search", "Canada")?;
        page.assert_value("#combobox-country-name", "Canada")?;
        page.assert_class("#combobox-country-results", "hidden", true)?;
        assert!(page.warnings().is_empty());
        Ok(())
    }

    #[test]
    fn select_tolerates_missing_name_field_and_results() -> Result<()> {
        let html = r#"
            <input type='hidden' id='combobox-tag-value'>
            <input type='text' id='combobox-tag-search' data-combobox='tag'>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;

        combobox.select(&mut page, "tag", "3", "rust")?;
        page.assert_value("#combobox-tag-value", "3")?;
        page.assert_value("#combobox-tag-search", "rust")?;
        assert!(page.warnings().is_empty());
        Ok(())
    }

    #[test]
    fn select_without_required_fields_warns_and_mutates_nothing() -> Result<()> {
        let html = r#"
            <input type='text' id='combobox-orphan-search' data-combobox='orphan' value='typed'>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;

        combobox.select(&mut page, "orphan", "1", "x")?;
        page.assert_value("#combobox-orphan-search", "typed")?;
        let warnings = page.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("orphan"));
        Ok(())
    }

    #[test]
    fn select_for_unknown_widget_is_a_warned_noop() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.select(&mut page, "missing", "1", "x")?;
        assert_eq!(page.warnings().len(), 1);
        page.assert_value("#combobox-country-value", "")?;
        Ok(())
    }

    #[test]
    fn clear_resets_fields_but_not_results_visibility() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.select(&mut page, "country", "7", "Canada")?;
        combobox.clear(&mut page, "country")?;

        page.assert_value("#combobox-country-value", "")?;
        page.assert_value("#combobox-country-name", "")?;
        page.assert_value("#combobox-country-search", "")?;
        page.assert_class("#combobox-country-results", "hidden", true)?;
        Ok(())
    }

    #[test]
    fn clear_with_no_fields_is_a_noop() -> Result<()> {
        let mut page = Page::from_html("<p id='p'>x</p>")?;
        let combobox = Combobox::new();
        combobox.clear(&mut page, "ghost")?;
        assert!(page.warnings().is_empty());
        Ok(())
    }

    #[test]
    fn typing_syncs_name_field_and_clears_value_field() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.select(&mut page, "country", "7", "Canada")?;

        page.type_text("#combobox-country-search", "ca")?;
        page.assert_value("#combobox-country-name", "ca")?;
        page.assert_value("#combobox-country-value", "")?;

        page.type_text("#combobox-country-search", "cam")?;
        page.assert_value("#combobox-country-name", "cam")?;
        page.assert_value("#combobox-country-value", "")?;
        Ok(())
    }

    #[test]
    fn selecting_again_after_reshowing_results_rehides_them() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.select(&mut page, "country", "7", "Canada")?;
        page.assert_class("#combobox-country-results", "hidden", true)?;

        page.remove_class("#combobox-country-results", "hidden")?;
        page.assert_class("#combobox-country-results", "hidden", false)?;

        combobox.select(&mut page, "country", "11", "Cambodia")?;
        page.assert_class("#combobox-country-results", "hidden", true)?;
        Ok(())
    }

    #[test]
    fn blur_hides_results_only_after_the_delay() -> Result<()> {
        let (mut page, _combobox) = wired_page()?;
        page.focus("#combobox-country-search")?;
        page.blur("#combobox-country-search")?;

        page.assert_class("#combobox-country-results", "hidden", false)?;
        page.advance_time(199)?;
        page.assert_class("#combobox-country-results", "hidden", false)?;
        page.advance_time(1)?;
        page.assert_class("#combobox-country-results", "hidden", true)?;
        Ok(())
    }

    #[test]
    fn blur_without_prior_focus_schedules_nothing() -> Result<()> {
        let (mut page, _combobox) = wired_page()?;
        page.blur("#combobox-country-search")?;
        assert!(page.pending_timers().is_empty());
        Ok(())
    }

    #[test]
    fn row_click_selects_before_the_delayed_hide_fires() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.swap_fragment("#combobox-country-results", RESULTS_HTML)?;
        combobox.install(&mut page)?;

        page.focus("#combobox-country-search")?;
        page.blur("#combobox-country-search")?;
        page.click("[data-combobox-item-id='7']")?;

        page.assert_value("#combobox-country-value", "7")?;
        page.assert_value("#combobox-country-search", "Canada")?;
        page.assert_class("#combobox-country-results", "hidden", true)?;

        // The pending hide still fires; it must not disturb the selection.
        page.flush()?;
        page.assert_value("#combobox-country-value", "7")?;
        page.assert_class("#combobox-country-results", "hidden", true)?;
        Ok(())
    }

    #[test]
    fn flat_rows_carry_their_own_label() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.swap_fragment(
            "#combobox-country-results",
            r#"
            <div data-combobox-select='country' data-combobox-item-id='9'
                 data-combobox-item-name='Chile'>Chile</div>
            "#,
        )?;
        combobox.install(&mut page)?;

        page.click("[data-combobox-item-id='9']")?;
        page.assert_value("#combobox-country-value", "9")?;
        page.assert_value("#combobox-country-search", "Chile")?;
        Ok(())
    }

    #[test]
    fn row_without_item_attributes_warns_instead_of_selecting() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.swap_fragment(
            "#combobox-country-results",
            "<div data-combobox-select='country'>broken</div>",
        )?;
        combobox.install(&mut page)?;

        page.click("[data-combobox-select='country']")?;
        assert_eq!(page.warnings().len(), 1);
        page.assert_value("#combobox-country-value", "")?;
        Ok(())
    }

    #[test]
    fn auto_submit_uses_the_native_strategy_exactly_once() -> Result<()> {
        let html = r#"
            <form id='f' action='/search' method='post'>
              <input type='hidden' name='country_id' id='combobox-country-value'>
              <input type='hidden' name='country_name' id='combobox-country-name'>
              <input type='text' name='q' id='combobox-country-search'
                     data-combobox='country' data-combobox-submit='true'>
            </form>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;

        combobox.select(&mut page, "country", "7", "Canada")?;

        let submissions = page.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].via, SubmitVia::Native);
        assert_eq!(submissions[0].form_id.as_deref(), Some("f"));
        assert_eq!(submissions[0].action.as_deref(), Some("/search"));
        assert_eq!(submissions[0].method, "post");
        assert_eq!(
            submissions[0].fields,
            vec![
                ("country_id".to_string(), "7".to_string()),
                ("country_name".to_string(), "Canada".to_string()),
                ("q".to_string(), "Canada".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn auto_submit_prefers_the_injected_fragment_strategy() -> Result<()> {
        let html = r#"
            <form id='f'>
              <input type='hidden' id='combobox-city-value' name='city_id'>
              <input type='text' id='combobox-city-search' name='q'
                     data-combobox='city' data-combobox-submit='true'>
            </form>
            "#;
        let mut page = Page::with_submit(html, Box::new(FragmentSubmit))?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;

        combobox.select(&mut page, "city", "42", "Oslo")?;
        assert_eq!(page.submissions().len(), 1);
        assert_eq!(page.submissions()[0].via, SubmitVia::FragmentExchange);
        Ok(())
    }

    #[test]
    fn select_without_submit_marker_does_not_submit() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.select(&mut page, "country", "7", "Canada")?;
        assert!(page.submissions().is_empty());
        Ok(())
    }

    #[test]
    fn select_with_submit_marker_but_no_form_is_tolerated() -> Result<()> {
        let html = r#"
            <input type='hidden' id='combobox-tag-value'>
            <input type='text' id='combobox-tag-search' data-combobox='tag'
                   data-combobox-submit='true'>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;
        combobox.select(&mut page, "tag", "3", "rust")?;
        assert!(page.submissions().is_empty());
        page.assert_value("#combobox-tag-value", "3")?;
        Ok(())
    }

    #[test]
    fn submit_marker_is_read_at_selection_time() -> Result<()> {
        let html = r#"
            <form id='f'>
              <input type='hidden' id='combobox-tag-value' name='tag_id'>
              <input type='text' id='combobox-tag-search' name='q' data-combobox='tag'>
            </form>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;

        combobox.select(&mut page, "tag", "1", "rust")?;
        assert!(page.submissions().is_empty());

        page.set_attr("#combobox-tag-search", "data-combobox-submit", "true")?;
        combobox.select(&mut page, "tag", "2", "tokio")?;
        assert_eq!(page.submissions().len(), 1);

        page.remove_attr("#combobox-tag-search", "data-combobox-submit")?;
        combobox.select(&mut page, "tag", "3", "serde")?;
        assert_eq!(page.submissions().len(), 1);
        Ok(())
    }

    #[test]
    fn install_is_idempotent_per_element() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.install(&mut page)?;
        combobox.install(&mut page)?;

        assert_eq!(page.listener_count("#combobox-country-search", "input")?, 1);
        assert_eq!(page.listener_count("#combobox-country-search", "blur")?, 1);

        page.focus("#combobox-country-search")?;
        page.blur("#combobox-country-search")?;
        assert_eq!(page.pending_timers().len(), 1);
        Ok(())
    }

    #[test]
    fn install_reports_the_number_of_widgets_found() -> Result<()> {
        let html = r#"
            <input id='combobox-a-search' data-combobox='a'>
            <input id='combobox-b-search' data-combobox='b'>
            <input id='plain'>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        assert_eq!(combobox.install(&mut page)?, 2);
        Ok(())
    }

    #[test]
    fn swap_then_reinstall_wires_fragment_widgets() -> Result<()> {
        let html = r#"
            <div id='panel'></div>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        assert_eq!(combobox.install(&mut page)?, 0);

        page.swap_fragment(
            "#panel",
            r#"
            <input type='hidden' id='combobox-city-value'>
            <input type='hidden' id='combobox-city-name'>
            <input type='text' id='combobox-city-search' data-combobox='city'>
            "#,
        )?;
        assert_eq!(combobox.install(&mut page)?, 1);

        page.type_text("#combobox-city-search", "os")?;
        page.assert_value("#combobox-city-name", "os")?;
        Ok(())
    }

    #[test]
    fn highlight_wraps_matches_preserving_original_case() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.swap_fragment(
            "#combobox-country-results",
            "<span id='label' data-combobox-item-name='Abacus'>Abacus</span>",
        )?;
        combobox.highlight_query(&mut page, "combobox-country-results", "ab")?;
        assert_eq!(page.inner_html("#label")?, "<strong>Ab</strong>acus");
        Ok(())
    }

    #[test]
    fn highlight_wraps_every_occurrence() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.swap_fragment(
            "#combobox-country-results",
            "<span id='label' data-combobox-item-name='banana'>banana</span>",
        )?;
        combobox.highlight_query(&mut page, "combobox-country-results", "an")?;
        assert_eq!(
            page.inner_html("#label")?,
            "b<strong>an</strong><strong>an</strong>a"
        );
        Ok(())
    }

    #[test]
    fn highlight_treats_metacharacters_literally() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.swap_fragment(
            "#combobox-country-results",
            "<span id='label' data-combobox-item-name='a.b and axb'>a.b and axb</span>",
        )?;
        combobox.highlight_query(&mut page, "combobox-country-results", "a.b")?;
        assert_eq!(page.inner_html("#label")?, "<strong>a.b</strong> and axb");
        Ok(())
    }

    #[test]
    fn highlight_is_idempotent_across_queries() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.swap_fragment(
            "#combobox-country-results",
            "<span id='label' data-combobox-item-name='Cameroon'>Cameroon</span>",
        )?;
        combobox.highlight_query(&mut page, "combobox-country-results", "cam")?;
        combobox.highlight_query(&mut page, "combobox-country-results", "roo")?;
        assert_eq!(page.inner_html("#label")?, "Came<strong>roo</strong>n");
        Ok(())
    }

    #[test]
    fn highlight_with_missing_container_or_empty_query_is_a_noop() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.highlight_query(&mut page, "no-such-container", "ab")?;
        combobox.highlight_query(&mut page, "combobox-country-results", "")?;
        assert!(page.warnings().is_empty());
        Ok(())
    }

    #[test]
    fn submit_button_click_records_one_submission() -> Result<()> {
        let html = r#"
            <form id='f' action='/go'>
              <input type='text' name='q' id='q' value='hi'>
              <button id='go' type='submit'>Go</button>
            </form>
            "#;
        let mut page = Page::from_html(html)?;
        page.click("#go")?;
        assert_eq!(page.submissions().len(), 1);
        assert_eq!(
            page.submissions()[0].fields,
            vec![("q".to_string(), "hi".to_string())]
        );
        Ok(())
    }

    #[test]
    fn typing_into_a_non_control_is_a_type_mismatch() -> Result<()> {
        let mut page = Page::from_html("<div id='d'>x</div>")?;
        let err = page
            .type_text("#d", "oops")
            .expect_err("typing into a div should fail");
        assert!(matches!(err, Error::TypeMismatch { .. }));
        Ok(())
    }

    #[test]
    fn disabled_and_readonly_inputs_ignore_typing() -> Result<()> {
        let html = r#"
            <input id='a' disabled value='keep'>
            <input id='b' readonly value='keep'>
            "#;
        let mut page = Page::from_html(html)?;
        page.type_text("#a", "changed")?;
        page.type_text("#b", "changed")?;
        page.assert_value("#a", "keep")?;
        page.assert_value("#b", "keep")?;
        Ok(())
    }

    #[test]
    fn trace_captures_widget_operations_when_enabled() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        page.set_trace(true);
        combobox.select(&mut page, "country", "7", "Canada")?;
        let logs = page.take_trace_logs();
        assert!(logs.iter().any(|line| line.contains("[widget] select")));
        Ok(())
    }

    #[test]
    fn trace_is_disabled_by_default() -> Result<()> {
        let (mut page, combobox) = wired_page()?;
        combobox.select(&mut page, "country", "7", "Canada")?;
        assert!(page.take_trace_logs().is_empty());
        Ok(())
    }

    #[test]
    fn widgets_are_independent() -> Result<()> {
        let html = r#"
            <input type='hidden' id='combobox-a-value'>
            <input type='text' id='combobox-a-search' data-combobox='a'>
            <input type='hidden' id='combobox-b-value'>
            <input type='text' id='combobox-b-search' data-combobox='b'>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;

        combobox.select(&mut page, "a", "1", "one")?;
        page.assert_value("#combobox-a-value", "1")?;
        page.assert_value("#combobox-b-value", "")?;
        page.assert_value("#combobox-b-search", "")?;
        Ok(())
    }

    #[test]
    fn custom_hide_delay_is_respected() -> Result<()> {
        let html = r#"
            <input type='text' id='combobox-x-search' data-combobox='x'>
            <div id='combobox-x-results'></div>
            "#;
        let mut page = Page::from_html(html)?;
        let mut combobox = Combobox::new();
        combobox.set_hide_delay_ms(50);
        combobox.install(&mut page)?;

        page.focus("#combobox-x-search")?;
        page.blur("#combobox-x-search")?;
        page.advance_time(49)?;
        page.assert_class("#combobox-x-results", "hidden", false)?;
        page.advance_time(1)?;
        page.assert_class("#combobox-x-results", "hidden", true)?;
        Ok(())
    }

    #[test]
    fn delayed_hide_tolerates_a_container_removed_by_a_swap() -> Result<()> {
        let html = r#"
            <div id='panel'>
              <input type='text' id='combobox-x-search' data-combobox='x'>
              <div id='combobox-x-results'></div>
            </div>
            "#;
        let mut page = Page::from_html(html)?;
        let combobox = Combobox::new();
        combobox.install(&mut page)?;

        page.focus("#combobox-x-search")?;
        page.blur("#combobox-x-search")?;
        page.swap_fragment("#panel", "<p id='empty'>gone</p>")?;
        page.flush()?;
        page.assert_text("#empty", "gone")?;
        Ok(())
    }
}
