//! CAPSULE.md parser.
//!
//! Parses `CAPSULE.md` files with an optional header delimited by `---`.
//! The header is a hand-parsed YAML subset (no external YAML dependency):
//! key-value pairs, quoted strings, and inline or multi-line string arrays.

/// Parsed header fields of a CAPSULE.md file.
#[derive(Debug, Clone, Default)]
pub struct CapsuleHeader {
    /// Stable manifest identifier.
    pub id: Option<String>,
    /// Trigger description: what kind of task this capability serves.
    pub trigger: Option<String>,
    /// Sibling files promotable at the Reference level.
    pub references: Vec<String>,
}

/// Result of parsing a CAPSULE.md file.
#[derive(Debug, Clone)]
pub struct ParsedCapsule {
    /// Header fields (defaults if no header present).
    pub header: CapsuleHeader,
    /// Instruction body after the header.
    pub body: String,
}

/// Parse a CAPSULE.md file's raw content.
#[must_use]
pub fn parse_capsule(raw: &str) -> ParsedCapsule {
    let (header_text, body) = split_header(raw);
    let header = match header_text {
        Some(text) => parse_header(&text),
        None => CapsuleHeader::default(),
    };
    ParsedCapsule { header, body }
}

/// Fallback trigger when the header omits one: the first non-header,
/// non-empty body line, truncated to 200 characters.
#[must_use]
pub fn fallback_trigger(body: &str) -> String {
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || is_rule_line(trimmed) {
            continue;
        }
        // Char-wise so a multibyte first line cannot split a boundary.
        return trimmed.chars().take(200).collect();
    }
    String::new()
}

/// Split the `---`-delimited header from the body.
fn split_header(content: &str) -> (Option<String>, String) {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return (None, content.to_string());
    }

    let after_open = &trimmed[3..];
    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);

    let Some(close) = after_open.find("\n---") else {
        // No closing delimiter: no header, whole content is the body.
        return (None, content.to_string());
    };

    let header = after_open[..close].to_string();
    let rest = &after_open[close + 4..];
    let body = rest.strip_prefix('\n').unwrap_or(rest).to_string();
    (Some(header), body)
}

fn parse_header(header: &str) -> CapsuleHeader {
    let mut parsed = CapsuleHeader::default();
    let lines: Vec<&str> = header.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "id" => parsed.id = Some(unquote(value)),
            "trigger" => parsed.trigger = Some(unquote(value)),
            "references" => parsed.references = parse_array(value, &lines, &mut i),
            _ => {}
        }
    }

    parsed
}

/// Parse an array value, either inline `[a, b]` or multi-line `- item`.
fn parse_array(value: &str, lines: &[&str], i: &mut usize) -> Vec<String> {
    if value.starts_with('[') {
        let inner = value.trim_start_matches('[').trim_end_matches(']').trim();
        if inner.is_empty() {
            return Vec::new();
        }
        return inner.split(',').map(|s| unquote(s.trim())).collect();
    }

    if !value.is_empty() {
        return vec![unquote(value)];
    }

    let mut items = Vec::new();
    while *i < lines.len() {
        let trimmed = lines[*i].trim();
        if let Some(item) = trimmed.strip_prefix('-') {
            items.push(unquote(item.trim()));
            *i += 1;
        } else {
            break;
        }
    }
    items
}

/// Remove surrounding quotes from a value.
fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// A markdown horizontal rule (3+ repeated `-`, `*`, or `_`).
fn is_rule_line(line: &str) -> bool {
    if line.len() < 3 {
        return false;
    }
    let mut chars = line.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first != '-' && first != '*' && first != '_' {
        return false;
    }
    chars.all(|c| c == first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_header() {
        let content = "---\nid: pdf-tools\ntrigger: working with PDF files\nreferences: [forms.md, tables.md]\n---\n# PDF Tools\n\nUse the helpers below.";
        let parsed = parse_capsule(content);
        assert_eq!(parsed.header.id.as_deref(), Some("pdf-tools"));
        assert_eq!(
            parsed.header.trigger.as_deref(),
            Some("working with PDF files")
        );
        assert_eq!(parsed.header.references, vec!["forms.md", "tables.md"]);
        assert!(parsed.body.contains("Use the helpers below."));
    }

    #[test]
    fn test_parse_multiline_references() {
        let content = "---\nid: x\nreferences:\n  - a.md\n  - b.md\n---\nBody";
        let parsed = parse_capsule(content);
        assert_eq!(parsed.header.references, vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_parse_no_header() {
        let content = "# Title\n\nJust a body.";
        let parsed = parse_capsule(content);
        assert!(parsed.header.id.is_none());
        assert_eq!(parsed.body, content);
    }

    #[test]
    fn test_parse_unclosed_header_is_body() {
        let content = "---\nid: incomplete\nno closing delimiter";
        let parsed = parse_capsule(content);
        assert!(parsed.header.id.is_none());
        assert_eq!(parsed.body, content);
    }

    #[test]
    fn test_parse_quoted_values() {
        let content = "---\nid: \"quoted-id\"\ntrigger: 'single quoted'\n---\nBody";
        let parsed = parse_capsule(content);
        assert_eq!(parsed.header.id.as_deref(), Some("quoted-id"));
        assert_eq!(parsed.header.trigger.as_deref(), Some("single quoted"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let content = "---\nid: x\nfutureKey: whatever\n---\nBody";
        let parsed = parse_capsule(content);
        assert_eq!(parsed.header.id.as_deref(), Some("x"));
    }

    #[test]
    fn test_empty_inline_array() {
        let content = "---\nid: x\nreferences: []\n---\nBody";
        let parsed = parse_capsule(content);
        assert!(parsed.header.references.is_empty());
    }

    #[test]
    fn test_fallback_trigger_skips_headers_and_rules() {
        let body = "# Title\n---\n\nActual first line of content.\nSecond line.";
        assert_eq!(fallback_trigger(body), "Actual first line of content.");
    }

    #[test]
    fn test_fallback_trigger_truncates() {
        let body = "x".repeat(300);
        assert_eq!(fallback_trigger(&body).len(), 200);
    }

    #[test]
    fn test_fallback_trigger_truncates_multibyte_on_char_boundary() {
        let body = "あ".repeat(300);
        let trigger = fallback_trigger(&body);
        assert_eq!(trigger.chars().count(), 200);
        assert!(trigger.chars().all(|c| c == 'あ'));
    }

    #[test]
    fn test_fallback_trigger_empty_body() {
        assert_eq!(fallback_trigger(""), "");
    }
}
