//! Allowlist HTML sanitizer.
//!
//! Output is canonical: text is entity-decoded then re-escaped, allowed tags
//! are re-serialized with lowercase names and double-quoted attributes, and
//! everything else is dropped. Running the sanitizer over its own output
//! therefore reproduces it exactly.

use std::borrow::Cow;
use std::fmt;

/// Markup that has been through [`sanitize`]. Only constructible here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafeHtml(String);

impl SafeHtml {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Readable text for views that cannot display HTML.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut pre_depth = 0usize;
        for token in Tokenizer::new(&self.0) {
            match token {
                Token::Text(text) => {
                    let text = decode_entities(text);
                    if pre_depth > 0 {
                        out.push_str(&text);
                    } else {
                        let flat = text.replace('\n', " ");
                        if out.is_empty() || out.ends_with('\n') {
                            out.push_str(flat.trim_start());
                        } else {
                            out.push_str(&flat);
                        }
                    }
                }
                Token::Start { name, .. } => match name.as_str() {
                    "br" => out.push('\n'),
                    "hr" => {
                        end_line(&mut out, 2);
                        out.push_str("---");
                        end_line(&mut out, 2);
                    }
                    "li" => out.push_str("• "),
                    "input" => out.push_str("[ ] "),
                    "pre" => pre_depth += 1,
                    _ => {}
                },
                Token::End { name } => match name.as_str() {
                    "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "table" => {
                        end_line(&mut out, 2)
                    }
                    "pre" => {
                        pre_depth = pre_depth.saturating_sub(1);
                        end_line(&mut out, 2);
                    }
                    "li" | "tr" | "div" => end_line(&mut out, 1),
                    "td" | "th" => out.push('\t'),
                    _ => {}
                },
                Token::Markup => {}
            }
        }
        out.trim().to_string()
    }
}

impl fmt::Display for SafeHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeHtml {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Elements removed together with everything inside them.
const DROP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "svg", "math",
    "frameset", "noembed", "xmp",
];

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input"];

const ALLOWED_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "br", "hr", "blockquote", "pre", "code", "em",
    "strong", "del", "s", "ul", "ol", "li", "table", "thead", "tbody", "tr", "th", "td", "a",
    "img", "sup", "sub", "span", "div", "input",
];

const LINK_SCHEMES: &[&str] = &["http", "https", "mailto"];
const IMAGE_SCHEMES: &[&str] = &["http", "https"];

pub fn sanitize(input: &str) -> SafeHtml {
    let mut out = String::with_capacity(input.len());
    let mut tokens = Tokenizer::new(input);

    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) => escape_text_into(&mut out, &decode_entities(text)),
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                if DROP_WITH_CONTENT.contains(&name.as_str()) {
                    if !self_closing {
                        tokens.skip_past_end_tag(&name);
                    }
                } else if ALLOWED_TAGS.contains(&name.as_str()) {
                    write_start_tag(&mut out, &name, &attrs);
                }
            }
            Token::End { name } => {
                if ALLOWED_TAGS.contains(&name.as_str()) && !VOID_ELEMENTS.contains(&name.as_str()) {
                    out.push_str("</");
                    out.push_str(&name);
                    out.push('>');
                }
            }
            Token::Markup => {}
        }
    }

    SafeHtml(out)
}

/// Escapes plain text so it renders verbatim inside HTML.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_text_into(&mut out, text);
    out
}

fn write_start_tag(out: &mut String, name: &str, attrs: &[(String, String)]) {
    let kept = filter_attributes(name, attrs);
    if name == "input" && !kept.iter().any(|(attr, _)| attr == "type") {
        return;
    }

    out.push('<');
    out.push_str(name);
    for (attr, value) in kept {
        out.push(' ');
        out.push_str(&attr);
        out.push_str("=\"");
        escape_attr_into(out, &value);
        out.push('"');
    }
    if VOID_ELEMENTS.contains(&name) {
        out.push_str(" />");
    } else {
        out.push('>');
    }
}

fn filter_attributes(tag: &str, attrs: &[(String, String)]) -> Vec<(String, String)> {
    let mut seen: Vec<&str> = Vec::new();
    let mut kept: Vec<(String, String)> = Vec::new();
    for (attr, value) in attrs {
        // the first occurrence of an attribute wins, as in browsers
        if seen.contains(&attr.as_str()) {
            continue;
        }
        seen.push(attr);
        if let Some(value) = allowed_attribute(tag, attr, value) {
            kept.push((attr.clone(), value));
        }
    }
    kept
}

fn allowed_attribute(tag: &str, attr: &str, value: &str) -> Option<String> {
    let keep = |ok: bool| ok.then(|| value.to_string());
    match (tag, attr) {
        ("a", "href") => keep(url_allowed(value, LINK_SCHEMES)),
        ("img", "src") => keep(url_allowed(value, IMAGE_SCHEMES)),
        ("a" | "img", "title") | ("img", "alt") => keep(true),
        ("ol", "start") => keep(!value.is_empty() && value.len() <= 9 && value.bytes().all(|b| b.is_ascii_digit())),
        ("th" | "td", "style") => text_align(value).map(|align| format!("text-align: {align}")),
        ("code" | "span" | "sup" | "div", "class") => keep(is_token_list(value)),
        ("div", "id") => keep(is_token_list(value) && !value.contains(' ')),
        ("input", "type") => keep(value.eq_ignore_ascii_case("checkbox")).map(|_| "checkbox".to_string()),
        ("input", "checked" | "disabled") => Some(String::new()),
        _ => None,
    }
}

fn text_align(style: &str) -> Option<&'static str> {
    let (property, value) = style.trim().trim_end_matches(';').split_once(':')?;
    if !property.trim().eq_ignore_ascii_case("text-align") {
        return None;
    }
    match value.trim().to_ascii_lowercase().as_str() {
        "left" => Some("left"),
        "center" => Some("center"),
        "right" => Some("right"),
        _ => None,
    }
}

fn is_token_list(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' '))
}

/// Relative URLs pass; absolute ones need an allowed scheme.
fn url_allowed(url: &str, schemes: &[&str]) -> bool {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    let Some(colon) = compact.find(':') else {
        return true;
    };
    if compact[..colon].contains(&['/', '?', '#'][..]) {
        return true;
    }
    schemes.contains(&&compact[..colon])
}

fn escape_text_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

/// Decodes the entities the escapers emit plus the common named and numeric
/// forms. Anything unrecognised is left as literal text.
fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest[1..]
            .find(';')
            .filter(|&semi| semi > 0 && semi <= 32)
            .and_then(|semi| decode_entity(&rest[1..1 + semi]).map(|c| (c, semi + 2)));

        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    let numeric = |digits: &str, radix: u32| {
        if digits.is_empty() || digits.len() > 8 {
            return None;
        }
        let value = u32::from_str_radix(digits, radix).ok()?;
        Some(match char::from_u32(value) {
            Some(c) if value != 0 => c,
            _ => '\u{FFFD}',
        })
    };

    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{A0}'),
        _ => {
            let number = name.strip_prefix('#')?;
            match number.strip_prefix(&['x', 'X'][..]) {
                Some(hex) => numeric(hex, 16),
                None => numeric(number, 10),
            }
        }
    }
}

/// Ensures `out` ends with at least `count` newlines, unless it is empty.
fn end_line(out: &mut String, count: usize) {
    if out.is_empty() {
        return;
    }
    let trailing = out.chars().rev().take_while(|&c| c == '\n').count();
    for _ in trailing..count {
        out.push('\n');
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End {
        name: String,
    },
    /// Comments, doctypes and processing instructions.
    Markup,
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Tokenizer { src, pos: 0 }
    }

    /// Moves past `</name ...>`, or to the end of input when there is none.
    fn skip_past_end_tag(&mut self, name: &str) {
        let rest = &self.src[self.pos..];
        // ASCII lowercasing keeps byte offsets aligned with `rest`.
        let lower = rest.to_ascii_lowercase();
        let needle = format!("</{name}");
        let mut search = 0;
        while let Some(found) = lower[search..].find(&needle) {
            let after = search + found + needle.len();
            let boundary = lower[after..]
                .chars()
                .next()
                .map_or(true, |c| !is_name_char(c));
            if boundary {
                self.pos += match lower[after..].find('>') {
                    Some(close) => after + close + 1,
                    None => rest.len(),
                };
                return;
            }
            search = after;
        }
        self.pos = self.src.len();
    }

    fn parse_markup(&self, start: usize) -> Option<(Token<'a>, usize)> {
        let bytes = self.src.as_bytes();
        let next = *bytes.get(start + 1)?;

        if self.src[start..].starts_with("<!--") {
            let close = self.src[start + 4..].find("-->")?;
            return Some((Token::Markup, start + 4 + close + 3));
        }
        if next == b'!' || next == b'?' {
            let close = self.src[start..].find('>')?;
            return Some((Token::Markup, start + close + 1));
        }
        if next == b'/' {
            let name_start = start + 2;
            if !bytes.get(name_start)?.is_ascii_alphabetic() {
                return None;
            }
            let name_end = self.scan_name(name_start);
            let close = self.src[name_end..].find('>')?;
            let name = self.src[name_start..name_end].to_ascii_lowercase();
            return Some((Token::End { name }, name_end + close + 1));
        }
        if next.is_ascii_alphabetic() {
            return self.parse_start_tag(start + 1);
        }
        None
    }

    fn scan_name(&self, from: usize) -> usize {
        self.src[from..]
            .find(|c: char| !is_name_char(c))
            .map_or(self.src.len(), |offset| from + offset)
    }

    fn parse_start_tag(&self, name_start: usize) -> Option<(Token<'a>, usize)> {
        let bytes = self.src.as_bytes();
        let name_end = self.scan_name(name_start);
        let name = self.src[name_start..name_end].to_ascii_lowercase();
        let mut attrs = Vec::new();
        let mut i = name_end;
        let mut self_closing = false;

        loop {
            while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
                self_closing = bytes[i] == b'/';
                i += 1;
            }
            match *bytes.get(i)? {
                b'>' => {
                    return Some((
                        Token::Start {
                            name,
                            attrs,
                            self_closing,
                        },
                        i + 1,
                    ))
                }
                _ => self_closing = false,
            }

            let attr_start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>' | b'/')
            {
                i += 1;
            }
            if i == attr_start {
                // a stray '=' with no name
                i += 1;
                continue;
            }
            let attr = self.src[attr_start..i].to_ascii_lowercase();

            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let mut value = String::new();
            if bytes.get(i) == Some(&b'=') {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                match *bytes.get(i)? {
                    quote @ (b'"' | b'\'') => {
                        let close = self.src[i + 1..].find(quote as char)?;
                        value = decode_entities(&self.src[i + 1..i + 1 + close]).into_owned();
                        i += close + 2;
                    }
                    _ => {
                        let value_start = i;
                        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                            i += 1;
                        }
                        value = decode_entities(&self.src[value_start..i]).into_owned();
                    }
                }
            }
            attrs.push((attr, value));
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == ':'
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if self.pos >= self.src.len() {
            return None;
        }

        let start = self.pos;
        if self.src.as_bytes()[start] == b'<' {
            if let Some((token, end)) = self.parse_markup(start) {
                self.pos = end;
                return Some(token);
            }
            self.pos = start + 1;
            return Some(Token::Text(&self.src[start..start + 1]));
        }

        let end = self.src[start..]
            .find('<')
            .map_or(self.src.len(), |offset| start + offset);
        self.pos = end;
        Some(Token::Text(&self.src[start..end]))
    }
}
