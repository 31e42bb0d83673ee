//! Interpreting model responses: labels, completion markers, todo lists,
//! and tool invocations.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Marker meaning more work remains. Wins over [`ANSWER_READY_MARKER`].
pub const NEXT_TASK_MARKER: &str = "<next_task_required/>";
/// Marker meaning the model can answer now.
pub const ANSWER_READY_MARKER: &str = "<final_answer_ready/>";
/// Tool that receives fenced python blocks.
pub const CODE_TOOL: &str = "code_executor";

/// Recorded when an action looks like a tool call but does not parse.
pub const UNPARSEABLE_ACTION: &str = "Failed to parse tool from action - check JSON format";

const LABELS: &[&str] = &[
    "Planning:",
    "Thought:",
    "Action:",
    "Observation:",
    "Final Answer:",
    "Your planning:",
    "Your action:",
    "Your observation:",
    "Your final answer:",
];

static TODO_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```markdown\s*\n(.*?)\n\s*```").expect("valid regex"));
static TODO_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s*\[[ xX]\]").expect("valid regex"));
static TOOL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*tool:\s*([A-Za-z0-9_\-]+)").expect("valid regex"));
static TOOL_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:parameters|input|args):\s*(\{.*\})").expect("valid regex")
});

/// Whether the response asks for a final answer next.
pub fn answer_ready(text: &str) -> bool {
    text.contains(ANSWER_READY_MARKER) && !text.contains(NEXT_TASK_MARKER)
}

/// Trim, drop completion markers, and strip one leading step label.
pub fn clean_response(text: &str) -> String {
    let without_markers = text
        .replace(NEXT_TASK_MARKER, "")
        .replace(ANSWER_READY_MARKER, "");
    let trimmed = without_markers.trim();
    for label in LABELS {
        if let Some(rest) = trimmed.strip_prefix(label) {
            return rest.trim().to_owned();
        }
    }
    trimmed.to_owned()
}

/// Pull a markdown checklist out of a planning response.
///
/// A fenced ```` ```markdown ```` block wins. Otherwise the first run of
/// `- [ ]` / `- [x]` lines is taken, continuing until a blank line.
pub fn extract_todo(text: &str) -> Option<String> {
    if let Some(caps) = TODO_FENCE.captures(text) {
        let block = caps[1].trim();
        if !block.is_empty() {
            return Some(block.to_owned());
        }
    }

    let mut lines = Vec::new();
    for line in text.lines() {
        if TODO_ITEM.is_match(line) {
            lines.push(line);
        } else if lines.is_empty() {
            continue;
        } else if line.trim().is_empty() {
            break;
        } else {
            lines.push(line);
        }
    }

    let todo = lines.join("\n");
    let todo = todo.trim();
    (!todo.is_empty()).then(|| todo.to_owned())
}

/// What the action response asked for.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedAction {
    /// Tool to execute, `None` for a non-tool action.
    pub tool: Option<String>,
    /// Arguments for the tool (an object, possibly empty).
    pub input: Value,
    /// Set when the text looked like a tool call that could not be read.
    pub parse_error: Option<String>,
}

impl ParsedAction {
    fn tool(name: impl Into<String>, input: Value) -> Self {
        Self {
            tool: Some(name.into()),
            input,
            parse_error: None,
        }
    }

    fn none() -> Self {
        Self {
            tool: None,
            input: Value::Object(Map::new()),
            parse_error: None,
        }
    }
}

enum JsonAction {
    Tool(String, Value),
    NonTool,
}

/// Parse a tool invocation out of an action response.
///
/// Tried in order: a fenced python block (routed to [`CODE_TOOL`]), a JSON
/// object with `tool`/`parameters` (fenced, embedded in prose, or truncated),
/// a `tool: name` line, and finally any of `known_tools` mentioned in the text.
pub fn parse_action(text: &str, known_tools: &[String]) -> ParsedAction {
    let text = text.trim();

    if let Some(code) = python_block(text) {
        return ParsedAction::tool(CODE_TOOL, serde_json::json!({ "code": code }));
    }

    let body = strip_fences(text);
    match parse_json_action(body) {
        Some(JsonAction::Tool(name, input)) => return ParsedAction::tool(name, input),
        Some(JsonAction::NonTool) => return ParsedAction::none(),
        None => {}
    }

    if let Some(caps) = TOOL_LINE.captures(body) {
        let name = caps[1].to_owned();
        let input = TOOL_ARGS
            .captures(body)
            .and_then(|args| args.get(1))
            .and_then(|m| first_object(m.as_str()))
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new()));
        return ParsedAction::tool(name, input);
    }

    let lower = text.to_lowercase();
    if let Some(name) = known_tools
        .iter()
        .find(|name| lower.contains(&name.to_lowercase()))
    {
        return ParsedAction::tool(name.clone(), Value::Object(Map::new()));
    }

    let mut parsed = ParsedAction::none();
    if lower.contains("tool") && text.contains('{') {
        parsed.parse_error = Some(UNPARSEABLE_ACTION.to_owned());
    }
    parsed
}

fn python_block(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```python")?;
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    Some(rest.trim())
}

fn strip_fences(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

fn parse_json_action(body: &str) -> Option<JsonAction> {
    let value = parse_lenient(body)?;
    let object = value.as_object()?;
    if let Some(tool) = object.get("tool").and_then(Value::as_str) {
        let input = match object.get("parameters") {
            Some(params @ Value::Object(_)) => params.clone(),
            _ => Value::Object(Map::new()),
        };
        return Some(JsonAction::Tool(tool.to_owned(), input));
    }
    object.contains_key("action").then_some(JsonAction::NonTool)
}

/// Parse `body` as JSON, recovering from surrounding prose or truncation.
fn parse_lenient(body: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Some(value);
    }
    let start = body.find('{')?;
    let candidate = &body[start..];
    if let Some(object) = first_object(candidate) {
        if let Ok(value) = serde_json::from_str::<Value>(object) {
            return Some(value);
        }
    }
    // Truncated output usually loses only the closing braces.
    ["}", "}}"].iter().find_map(|suffix| {
        serde_json::from_str::<Value>(&format!("{}{suffix}", candidate.trim_end())).ok()
    })
}

/// The first balanced `{...}` span, ignoring braces inside strings.
fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
