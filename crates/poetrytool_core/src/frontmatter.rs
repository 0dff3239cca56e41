pub const DELIMITER: &str = "---";

/// Ordered `key: value` header of a poem file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    entries: Vec<(String, String)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Non-empty value for `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    /// Replace the value in place when the key exists, otherwise append.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Header
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (key, value) in iter {
            header.insert(key, value);
        }
        header
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub header: Header,
    pub body: String,
    pub has_header: bool,
}

/// Split a poem file into header and body. Never fails: text without a closed
/// header block is returned whole as the body.
pub fn parse(raw: &str) -> ParsedDocument {
    let content = raw.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    let mut segments = content.split_inclusive('\n');

    let Some(first) = segments.next() else {
        return headerless(raw);
    };
    if first.trim_end() != DELIMITER {
        return headerless(raw);
    }

    let mut offset = first.len();
    let mut header_lines = Vec::new();
    for segment in segments {
        offset += segment.len();
        let line = segment.trim_end_matches(['\n', '\r']);
        if line.trim_end() == DELIMITER {
            return ParsedDocument {
                header: parse_header_lines(&header_lines),
                body: content[offset..].to_string(),
                has_header: true,
            };
        }
        header_lines.push(line);
    }

    headerless(raw)
}

fn headerless(raw: &str) -> ParsedDocument {
    ParsedDocument {
        header: Header::new(),
        body: raw.to_string(),
        has_header: false,
    }
}

fn parse_header_lines(lines: &[&str]) -> Header {
    let mut header = Header::new();
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        header.insert(key, unquote(value.trim()));
    }
    header
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.trim_matches(['"', '\'']).to_string()
}

/// Render a header block with double-quoted values followed by the body verbatim.
pub fn serialize(header: &Header, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + header.len() * 24 + 8);
    out.push_str(DELIMITER);
    out.push('\n');
    for (key, value) in header.iter() {
        out.push_str(key);
        out.push_str(": \"");
        out.push_str(value);
        out.push_str("\"\n");
    }
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_header_and_body() {
        let raw = "---\ntitle: \"Jupiter Shone Different\"\nauthor: 'Manas Pandey'\nform: Sonnet\n---\nFirst line\nSecond line\n";
        let parsed = parse(raw);
        assert!(parsed.has_header);
        assert_eq!(parsed.header.get("title"), Some("Jupiter Shone Different"));
        assert_eq!(parsed.header.get("author"), Some("Manas Pandey"));
        assert_eq!(parsed.header.get("form"), Some("Sonnet"));
        assert_eq!(parsed.body, "First line\nSecond line\n");
    }

    #[test]
    fn missing_closing_delimiter_keeps_everything_as_body() {
        let raw = "---\ntitle: \"Unclosed\"\nbody text";
        let parsed = parse(raw);
        assert!(!parsed.has_header);
        assert!(parsed.header.is_empty());
        assert_eq!(parsed.body, raw);
    }

    #[test]
    fn text_without_header_is_body() {
        let parsed = parse("just a poem\n");
        assert!(!parsed.has_header);
        assert_eq!(parsed.body, "just a poem\n");
    }

    #[test]
    fn leading_whitespace_before_header_is_allowed() {
        let parsed = parse("\n\n  ---\ntitle: \"Late Start\"\n---\nbody");
        assert!(parsed.has_header);
        assert_eq!(parsed.header.get("title"), Some("Late Start"));
        assert_eq!(parsed.body, "body");
    }

    #[test]
    fn duplicate_keys_last_wins_in_first_position() {
        let parsed = parse("---\ntitle: \"One\"\nauthor: \"A\"\ntitle: \"Two\"\n---\n");
        let keys: Vec<&str> = parsed.header.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["title", "author"]);
        assert_eq!(parsed.header.get("title"), Some("Two"));
    }

    #[test]
    fn lines_without_colon_are_ignored() {
        let parsed = parse("---\nnot a pair\ntitle: \"Kept\"\n---\nbody");
        assert_eq!(parsed.header.len(), 1);
        assert_eq!(parsed.header.get("title"), Some("Kept"));
    }

    #[test]
    fn handles_crlf_line_endings() {
        let parsed = parse("---\r\ntitle: \"Windows\"\r\n---\r\nline\r\n");
        assert!(parsed.has_header);
        assert_eq!(parsed.header.get("title"), Some("Windows"));
        assert_eq!(parsed.body, "line\r\n");
    }

    #[test]
    fn values_keep_inner_quotes_and_colons() {
        let parsed = parse("---\ntitle: \"Time: a \"long\" wait\"\n---\n");
        assert_eq!(parsed.header.get("title"), Some("Time: a \"long\" wait"));
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let header: Header = [
            ("title", "Rain at Dusk"),
            ("author", "Manas Pandey"),
            ("language", "en"),
            ("image", ""),
        ]
        .into_iter()
        .collect();
        let body = "Rain falls\n\non the tin roof\n";
        let rendered = serialize(&header, body);
        assert!(rendered.starts_with("---\ntitle: \"Rain at Dusk\"\n"));

        let parsed = parse(&rendered);
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.body, body);
    }

    #[test]
    fn header_insert_replaces_in_place_and_remove_drops() {
        let mut header: Header = [("title", "A"), ("image", "x.png"), ("form", "Sonnet")]
            .into_iter()
            .collect();
        header.insert("image", "image001.png");
        assert_eq!(header.get("image"), Some("image001.png"));
        assert_eq!(header.remove("image"), Some("image001.png".to_string()));
        assert!(!header.contains_key("image"));
        assert_eq!(header.value("title"), Some("A"));
    }
}
