//! The Prompt-Engineering streaming state machine: an explicit state record
//! plus a transition function, not a generator, so cancellation and
//! arbitrary chunk boundaries are trivial to reason about.

use uuid::Uuid;

use super::{EngineWarning, ToolCallStreamUpdate};
use crate::tool::ToolCall;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    PossibleTagStart,
    CollectingToolCall,
    PossibleTagEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamsPhase {
    Seeking,
    InValue,
    Done,
}

#[derive(Debug, Clone)]
struct InProgressCall {
    id: String,
    name: Option<String>,
    /// Raw text of the call body collected so far (used for name/parameters
    /// detection and as the JSON-repair source on truncation).
    raw: String,
    arguments: String,
    phase: ParamsPhase,
    depth: u32,
    in_string: bool,
    escape: bool,
}

impl InProgressCall {
    fn new() -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: None,
            raw: String::new(),
            arguments: String::new(),
            phase: ParamsPhase::Seeking,
            depth: 0,
            in_string: false,
            escape: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Open,
    Param,
    Complete,
}

#[derive(Debug, Clone)]
struct RawEvent {
    id: String,
    name: String,
    delta: String,
    is_complete: bool,
    kind: Kind,
}

/// Output of one `feed` call: plain text destined for
/// `assistant_streaming_message`, plus any tool-call updates, already
/// coalesced.
#[derive(Debug, Clone, Default)]
pub struct ParserOutput {
    pub text: String,
    pub tool_calls: Vec<ToolCallStreamUpdate>,
}

#[derive(Debug)]
pub struct ToolCallParser {
    state: State,
    tag_buf: String,
    current: Option<InProgressCall>,
    finalized: Vec<ToolCall>,
    /// The unmodified concatenation of every chunk ever fed, tags included —
    /// the source for `buildHistoricalAssistantMessage`'s raw-text replay.
    raw: String,
}

impl Default for ToolCallParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallParser {
    pub fn new() -> Self {
        Self { state: State::Normal, tag_buf: String::new(), current: None, finalized: Vec::new(), raw: String::new() }
    }

    /// Feed one chunk of raw assistant text through the parser, returning
    /// the plain-text runs and any (already-coalesced) tool-call updates.
    pub fn feed(&mut self, chunk: &str) -> ParserOutput {
        self.raw.push_str(chunk);
        let mut raw_events = Vec::new();
        let mut text = String::new();
        for c in chunk.chars() {
            self.feed_char(c, &mut text, &mut raw_events);
        }
        ParserOutput { text, tool_calls: coalesce(raw_events) }
    }

    /// The full raw text seen so far, tags and all.
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    fn feed_char(&mut self, c: char, text: &mut String, out: &mut Vec<RawEvent>) {
        match self.state {
            State::Normal => {
                if c == '<' {
                    self.tag_buf.clear();
                    self.tag_buf.push(c);
                    self.state = State::PossibleTagStart;
                } else {
                    text.push(c);
                }
            }
            State::PossibleTagStart => {
                self.tag_buf.push(c);
                if self.tag_buf == OPEN_TAG {
                    self.state = State::CollectingToolCall;
                    self.current = Some(InProgressCall::new());
                    self.tag_buf.clear();
                } else if OPEN_TAG.starts_with(self.tag_buf.as_str()) {
                    // still a candidate prefix; keep accumulating
                } else {
                    let buf = std::mem::take(&mut self.tag_buf);
                    let (flush, restart) = split_on_trailing_restart(&buf);
                    text.push_str(flush);
                    match restart {
                        Some(tag_buf) => self.tag_buf = tag_buf,
                        None => self.state = State::Normal,
                    }
                }
            }
            State::CollectingToolCall => {
                if c == '<' {
                    self.tag_buf.clear();
                    self.tag_buf.push(c);
                    self.state = State::PossibleTagEnd;
                } else {
                    self.push_call_char(c, out);
                }
            }
            State::PossibleTagEnd => {
                self.tag_buf.push(c);
                if self.tag_buf == CLOSE_TAG {
                    self.finalize_current(out);
                    self.state = State::Normal;
                    self.tag_buf.clear();
                } else if CLOSE_TAG.starts_with(self.tag_buf.as_str()) {
                    // still a candidate prefix; keep accumulating
                } else {
                    let buf = std::mem::take(&mut self.tag_buf);
                    let (flush, restart) = split_on_trailing_restart(&buf);
                    for ch in flush.chars() {
                        self.push_call_char(ch, out);
                    }
                    match restart {
                        Some(tag_buf) => self.tag_buf = tag_buf,
                        None => self.state = State::CollectingToolCall,
                    }
                }
            }
        }
    }

    fn push_call_char(&mut self, c: char, out: &mut Vec<RawEvent>) {
        let call = self.current.as_mut().expect("CollectingToolCall always has a current call");
        call.raw.push(c);

        if call.name.is_none() {
            if let Some(name) = try_extract_name(&call.raw) {
                call.name = Some(name.clone());
                out.push(RawEvent { id: call.id.clone(), name, delta: String::new(), is_complete: false, kind: Kind::Open });
            }
            return;
        }

        match call.phase {
            ParamsPhase::Seeking => {
                if let Some(idx) = locate_parameters_start(&call.raw) {
                    if idx == call.raw.len() - c.len_utf8() {
                        call.phase = ParamsPhase::InValue;
                        call.depth = 1;
                        call.arguments.push(c);
                        out.push(RawEvent {
                            id: call.id.clone(),
                            name: call.name.clone().unwrap(),
                            delta: c.to_string(),
                            is_complete: false,
                            kind: Kind::Param,
                        });
                    }
                }
            }
            ParamsPhase::InValue => {
                if call.escape {
                    call.escape = false;
                } else if call.in_string {
                    if c == '\\' {
                        call.escape = true;
                    } else if c == '"' {
                        call.in_string = false;
                    }
                } else {
                    match c {
                        '"' => call.in_string = true,
                        '{' => call.depth += 1,
                        '}' => call.depth -= 1,
                        _ => {}
                    }
                }

                call.arguments.push(c);
                out.push(RawEvent {
                    id: call.id.clone(),
                    name: call.name.clone().unwrap(),
                    delta: c.to_string(),
                    is_complete: false,
                    kind: Kind::Param,
                });

                if call.depth == 0 {
                    call.phase = ParamsPhase::Done;
                }
            }
            ParamsPhase::Done => {}
        }
    }

    fn finalize_current(&mut self, out: &mut Vec<RawEvent>) {
        let Some(call) = self.current.take() else { return };
        let Some(name) = call.name else {
            // No name ever resolved: nothing to finalize, nothing to emit.
            return;
        };
        out.push(RawEvent { id: call.id.clone(), name: name.clone(), delta: String::new(), is_complete: true, kind: Kind::Complete });
        let tool_call = ToolCall { id: call.id, name, arguments: call.arguments };
        self.finalized.push(tool_call);
    }

    /// Whether the stream ended mid-block (truncated by a stop sequence).
    pub fn is_truncated(&self) -> bool {
        self.current.is_some()
    }

    /// Recovery: complete a truncated call's JSON by appending missing
    /// closing braces, validate, and finalize if it parses and carries a
    /// name. Only called when the parser produced no other calls for this
    /// stream and ended mid-block.
    pub fn recover_truncated(&mut self) -> (Option<ToolCall>, Vec<EngineWarning>) {
        let Some(call) = self.current.take() else {
            return (None, Vec::new());
        };
        let Some(name) = call.name else {
            return (None, vec![EngineWarning { message: "truncated tool call had no resolvable name".to_string(), is_error: false }]);
        };

        let open = call.arguments.matches('{').count();
        let close = call.arguments.matches('}').count();
        let missing = open.saturating_sub(close);
        let mut repaired = call.arguments.clone();
        repaired.push_str(&"}".repeat(missing));

        match serde_json::from_str::<serde_json::Value>(&repaired) {
            Ok(serde_json::Value::Object(_)) => {
                let warning = EngineWarning { message: format!("repaired truncated tool call '{name}' by appending {missing} closing brace(s)"), is_error: false };
                (Some(ToolCall { id: call.id, name, arguments: repaired }), vec![warning])
            }
            _ => (None, vec![EngineWarning { message: format!("dropped truncated tool call '{name}': JSON repair failed"), is_error: false }]),
        }
    }

    pub fn take_finalized(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.finalized)
    }
}

/// A mismatched tag buffer always has the form `<` + (a valid prefix with no
/// embedded `<`) + one extra character that broke the match — the keyword
/// itself contains `<` only at position 0, so the only place a *new*
/// candidate tag can start is the final character. Splits `buf` into the
/// text to flush and, if the last character is itself `<`, a restart buffer
/// for the state the caller should re-enter.
fn split_on_trailing_restart(buf: &str) -> (&str, Option<String>) {
    if buf.ends_with('<') && buf.len() > 1 {
        let split_at = buf.len() - 1;
        (&buf[..split_at], Some(buf[split_at..].to_string()))
    } else {
        (buf, None)
    }
}

fn coalesce(events: Vec<RawEvent>) -> Vec<ToolCallStreamUpdate> {
    let mut out: Vec<ToolCallStreamUpdate> = Vec::new();
    for event in events {
        match event.kind {
            Kind::Param => {
                if let Some(last) = out.last_mut() {
                    if !last.is_complete && last.tool_call_id == event.id {
                        last.arguments_delta.push_str(&event.delta);
                        continue;
                    }
                }
                out.push(ToolCallStreamUpdate { tool_call_id: event.id, tool_name: event.name, arguments_delta: event.delta, is_complete: false });
            }
            Kind::Open | Kind::Complete => {
                out.push(ToolCallStreamUpdate {
                    tool_call_id: event.id,
                    tool_name: event.name,
                    arguments_delta: event.delta,
                    is_complete: matches!(event.kind, Kind::Complete),
                });
            }
        }
    }
    out
}

fn try_extract_name(raw: &str) -> Option<String> {
    let idx = raw.find("\"name\"")?;
    let after = &raw[idx + 6..];
    let colon = after.find(':')?;
    let after_colon = after[colon + 1..].trim_start();
    let quoted = after_colon.strip_prefix('"')?;

    let mut escape = false;
    for (i, c) in quoted.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => return Some(quoted[..i].to_string()),
            _ => {}
        }
    }
    None
}

/// Returns the byte offset (within `raw`) of the `{` that opens the
/// `"parameters"` value, once that much of the stream has arrived.
fn locate_parameters_start(raw: &str) -> Option<usize> {
    let idx = raw.find("\"parameters\"")?;
    let after = &raw[idx + 12..];
    let colon_rel = after.find(':')?;
    let after_colon = &after[colon_rel + 1..];
    let trimmed = after_colon.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let ws_skipped = after_colon.len() - trimmed.len();
    Some(idx + 12 + colon_rel + 1 + ws_skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through_untouched() {
        let mut parser = ToolCallParser::new();
        let out = parser.feed("Hello, world");
        assert_eq!(out.text, "Hello, world");
        assert!(out.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_split_across_two_chunks_emits_no_leaked_tag_text() {
        let mut parser = ToolCallParser::new();
        let first = parser.feed("Sure.<tool_");
        assert_eq!(first.text, "Sure.");
        assert!(first.tool_calls.is_empty());

        let second = parser.feed("call>\n{\"name\":\"echo\",\"parameters\":{\"x\":1}}\n</tool_call>");
        assert!(second.text.is_empty());

        let calls = parser.take_finalized();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, "{\"x\":1}");
    }

    #[test]
    fn prefix_safety_holds_for_byte_by_byte_feeding() {
        let whole = "before<tool_call>\n{\"name\":\"ls\",\"parameters\":{\"path\":\"/tmp\"}}\n</tool_call>after";

        let mut one_shot = ToolCallParser::new();
        let out = one_shot.feed(whole);

        let mut piecemeal = ToolCallParser::new();
        let mut text = String::new();
        for ch in whole.chars() {
            text.push_str(&piecemeal.feed(&ch.to_string()).text);
        }

        assert_eq!(out.text, "beforeafter");
        assert_eq!(text, out.text);
        assert_eq!(one_shot.finalized.len(), piecemeal.finalized.len());
        assert_eq!(one_shot.finalized[0].arguments, piecemeal.finalized[0].arguments);
    }

    #[test]
    fn nested_braces_and_strings_in_parameters_are_tracked() {
        let mut parser = ToolCallParser::new();
        parser.feed("<tool_call>\n{\"name\":\"f\",\"parameters\":{\"obj\":{\"a\":1},\"s\":\"a}b\"}}\n</tool_call>");
        let calls = parser.take_finalized();
        assert_eq!(calls[0].arguments, "{\"obj\":{\"a\":1},\"s\":\"a}b\"}");
    }

    #[test]
    fn truncated_stream_is_recoverable() {
        let mut parser = ToolCallParser::new();
        parser.feed("<tool_call>\n{\"name\":\"ls\",\"parameters\":{\"path\":\"/\"");
        assert!(parser.is_truncated());

        let (recovered, warnings) = parser.recover_truncated();
        let call = recovered.expect("recovery should succeed");
        assert_eq!(call.name, "ls");
        assert_eq!(call.arguments, "{\"path\":\"/\"}");
        assert!(!warnings.is_empty());
    }

    #[test]
    fn lone_angle_brackets_do_not_start_a_tool_call() {
        let mut parser = ToolCallParser::new();
        let out = parser.feed("a < b <> c");
        assert_eq!(out.text, "a < b <> c");
        assert!(parser.finalized.is_empty());
    }

    #[test]
    fn back_to_back_angle_brackets_restart_matching_without_looping() {
        let mut parser = ToolCallParser::new();
        let out = parser.feed("x<<tool_call>\n{\"name\":\"f\",\"parameters\":{}}\n</tool_call>y");
        assert_eq!(out.text, "x<y");
        let calls = parser.take_finalized();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "f");
    }

    #[test]
    fn unresolvable_truncation_is_dropped_with_warning() {
        let mut parser = ToolCallParser::new();
        parser.feed("<tool_call>\n{\"name\":\"ls\"");
        let (recovered, warnings) = parser.recover_truncated();
        assert!(recovered.is_none());
        assert!(!warnings.is_empty());
    }
}
