//! Minimal reader and writer for `key=value` property files.
//!
//! The format is compatible with Java properties for the values we store:
//! `\`, `:` and `=` are backslash-escaped, `#` and `!` start comments.

use std::collections::BTreeMap;

/// Parse property file text into a sorted map. Later keys win.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let (key, value) = split_entry(line);
        properties.insert(unescape(key.trim_end()), unescape(value.trim_start()));
    }

    properties
}

/// Render properties, one per line, preceded by a comment header.
pub fn render(header: &str, properties: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for line in header.lines() {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    for (key, value) in properties {
        out.push_str(&escape(key));
        out.push('=');
        out.push_str(&escape(value));
        out.push('\n');
    }
    out
}

/// Split at the first unescaped `=` or `:`.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '=' | ':' => return (&line[..i], &line[i + 1..]),
            _ => {}
        }
    }
    (line, "")
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ':' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_escapes_separators() {
        let props = BTreeMap::from([
            ("lsnMax".to_string(), "0/16B3748".to_string()),
            ("timestamp".to_string(), "2024-03-01T12:30:05Z".to_string()),
        ]);

        let text = render("replication state", &props);
        assert_eq!(
            text,
            "# replication state\nlsnMax=0/16B3748\ntimestamp=2024-03-01T12\\:30\\:05Z\n"
        );
        assert_eq!(parse(&text), props);
    }

    #[test]
    fn test_parse_java_style_file() {
        let text = "#Fri Mar 01 12:30:06 UTC 2024\n\
                    sequenceNumber=42\n\
                    timestamp=2024-03-01T12\\:30\\:05Z\n\
                    \n\
                    ! another comment\n\
                    slotName : osmosis\n";

        let props = parse(text);
        assert_eq!(props.len(), 3);
        assert_eq!(props["sequenceNumber"], "42");
        assert_eq!(props["timestamp"], "2024-03-01T12:30:05Z");
        assert_eq!(props["slotName"], "osmosis");
    }

    #[test]
    fn test_parse_key_without_value() {
        let props = parse("emptyKey\nother=\n");
        assert_eq!(props["emptyKey"], "");
        assert_eq!(props["other"], "");
    }
}
