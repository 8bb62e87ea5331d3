use serde::{Deserialize, Serialize};

pub const BOLD_MARKER: &str = "**";
pub const UNKNOWN_BEHAVIOR_TYPE: &str = "Unknown";

const QUOTE_CHARS: &[char] = &['"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Intent,
    BehaviorType,
    Reply,
}

// Checked in order; the first header that matches a fragment claims it.
const FIELD_HEADERS: &[(&str, Field)] = &[
    ("hidden intent", Field::Intent),
    ("behavior type", Field::BehaviorType),
    ("strategic reply", Field::Reply),
];

/// Structured view of an analysis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFields {
    pub intent: String,
    pub reply: String,
    pub behavior_type: String,
    pub selected_messages: Vec<String>,
}

impl Default for ParsedFields {
    fn default() -> Self {
        Self {
            intent: String::new(),
            reply: String::new(),
            behavior_type: UNKNOWN_BEHAVIOR_TYPE.to_string(),
            selected_messages: Vec::new(),
        }
    }
}

/// Extract intent, behavior type and reply from the analyze endpoint's text.
///
/// The text is split on `**`; a fragment whose lower-cased form names one of
/// the known headers takes the following fragment as that field's value.
/// Later headers overwrite earlier ones, unmatched fragments are ignored, and
/// missing fields keep their defaults. This never fails.
pub fn parse_analysis(combined: &str) -> ParsedFields {
    let mut intent: Option<String> = None;
    let mut reply: Option<String> = None;
    let mut behavior_type: Option<String> = None;

    let sections: Vec<&str> = combined.split(BOLD_MARKER).collect();
    for (idx, section) in sections.iter().enumerate() {
        let header = section.trim().to_lowercase();
        let Some(field) = FIELD_HEADERS
            .iter()
            .find(|(needle, _)| header.contains(needle))
            .map(|(_, field)| *field)
        else {
            continue;
        };
        let Some(next) = sections.get(idx + 1).filter(|value| !value.is_empty()) else {
            continue;
        };
        let value = strip_header_colon(next);
        match field {
            Field::Intent => intent = Some(value),
            Field::BehaviorType => behavior_type = Some(value),
            Field::Reply => reply = Some(value),
        }
    }

    ParsedFields {
        intent: intent.map(|value| strip_quotes(&value)).unwrap_or_default(),
        reply: reply.map(|value| strip_quotes(&value)).unwrap_or_default(),
        behavior_type: behavior_type
            .map(|value| strip_quotes(&value))
            .unwrap_or_else(|| UNKNOWN_BEHAVIOR_TYPE.to_string()),
        selected_messages: Vec::new(),
    }
}

fn strip_header_colon(fragment: &str) -> String {
    fragment
        .strip_prefix(':')
        .unwrap_or(fragment)
        .trim()
        .to_string()
}

fn strip_quotes(value: &str) -> String {
    let mut out = value;
    if let Some(first) = out.chars().next().filter(|ch| QUOTE_CHARS.contains(ch)) {
        out = &out[first.len_utf8()..];
    }
    if let Some(last) = out.chars().last().filter(|ch| QUOTE_CHARS.contains(ch)) {
        out = &out[..out.len() - last.len_utf8()];
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{parse_analysis, ParsedFields, UNKNOWN_BEHAVIOR_TYPE};

    #[test]
    fn parses_inline_headers() {
        let parsed = parse_analysis(
            "**Hidden Intent:** wants attention **Behavior Type:** ATTENTION-SEEKING **Strategic Reply:** \"I'm busy tonight\"",
        );
        assert_eq!(parsed.intent, "wants attention");
        assert_eq!(parsed.behavior_type, "ATTENTION-SEEKING");
        assert_eq!(parsed.reply, "I'm busy tonight");
    }

    #[test]
    fn parses_multiline_headers_in_any_order() {
        let text = "**Strategic Reply:**\n'Sounds good, talk soon'\n\n**Behavior Type:**\nCONTROLLING\n\n**Hidden Intent:**\nWants to know where you are.\n";
        let parsed = parse_analysis(text);
        assert_eq!(parsed.reply, "Sounds good, talk soon");
        assert_eq!(parsed.behavior_type, "CONTROLLING");
        assert_eq!(parsed.intent, "Wants to know where you are.");
    }

    #[test]
    fn colon_outside_bold_is_stripped() {
        let parsed = parse_analysis("**Hidden Intent**: needs reassurance");
        assert_eq!(parsed.intent, "needs reassurance");
    }

    #[test]
    fn strips_curly_quotes_once() {
        let parsed = parse_analysis("**Strategic Reply:** \u{201C}\"Not tonight\"\u{201D}");
        assert_eq!(parsed.reply, "\"Not tonight\"");
    }

    #[test]
    fn missing_markers_keep_defaults() {
        let parsed = parse_analysis("The model ignored the format entirely.");
        assert_eq!(parsed, ParsedFields::default());
        assert_eq!(parsed.intent, "");
        assert_eq!(parsed.reply, "");
        assert_eq!(parsed.behavior_type, UNKNOWN_BEHAVIOR_TYPE);
    }

    #[test]
    fn partial_markers_fill_only_found_fields() {
        let parsed = parse_analysis("**Hidden Intent:** testing loyalty");
        assert_eq!(parsed.intent, "testing loyalty");
        assert_eq!(parsed.reply, "");
        assert_eq!(parsed.behavior_type, "Unknown");
    }

    #[test]
    fn extra_bold_sections_are_ignored() {
        let text = "**Analysis Summary**\nSome preamble.\n**Hidden Intent:** guilt **Confidence:** high **Behavior Type:** GUILT-TRIPPING";
        let parsed = parse_analysis(text);
        assert_eq!(parsed.intent, "guilt");
        assert_eq!(parsed.behavior_type, "GUILT-TRIPPING");
        assert_eq!(parsed.reply, "");
    }

    #[test]
    fn trailing_header_without_value_is_ignored() {
        let parsed = parse_analysis("**Behavior Type:** MANIPULATIVE **Strategic Reply:**");
        assert_eq!(parsed.behavior_type, "MANIPULATIVE");
        assert_eq!(parsed.reply, "");
    }

    #[test]
    fn later_header_overwrites_earlier() {
        let parsed = parse_analysis("**Hidden Intent:** first **Hidden Intent:** second");
        assert_eq!(parsed.intent, "second");
    }

    #[test]
    fn parse_is_idempotent() {
        let text = "**Hidden Intent:** x **Behavior Type:** Y **Strategic Reply:** 'z'";
        assert_eq!(parse_analysis(text), parse_analysis(text));
    }

    #[test]
    fn empty_input_yields_defaults() {
        assert_eq!(parse_analysis(""), ParsedFields::default());
    }
}
