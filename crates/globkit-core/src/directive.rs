//! `import.meta.glob` directive scanning and argument parsing.
//!
//! Scans JavaScript/TypeScript source for glob directives without full parsing.
//! Occurrences inside comments and string literals are ignored. Arguments must be
//! literals: a string or array of strings, optionally followed by an options object.

use crate::error::{GlobError, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};

const DIRECTIVE: &str = "import.meta.glob";
const LEGACY_EAGER_SUFFIX: &str = "Eager";

/// How matched files are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportAs {
    /// Transformed module (eager binding or lazy accessor).
    #[default]
    #[serde(skip_deserializing)]
    Module,
    /// Verbatim file text as a string literal.
    Raw,
    /// Root-relative URL string.
    Url,
}

/// Options from the directive's second argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobOptions {
    /// Inline matched modules with static imports.
    #[serde(default)]
    pub eager: bool,
    /// Load mode override.
    #[serde(default, rename = "as")]
    pub as_: ImportAs,
    /// Restrict each module's export surface to one named export.
    #[serde(default)]
    pub import: Option<String>,
}

/// Stable identity of one directive occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirectiveId(String);

impl DirectiveId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for DirectiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One parsed `import.meta.glob(...)` occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobDirective {
    pub id: DirectiveId,
    /// Patterns as written; order decides which pattern names a file first.
    pub patterns: Vec<String>,
    pub declaring_file: PathBuf,
    pub options: GlobOptions,
    /// Position among the file's directives.
    pub index: usize,
    /// Byte range of the whole call expression.
    pub span: Range<usize>,
    /// The call's result is not bound to anything.
    pub side_effect_only: bool,
}

impl GlobDirective {
    /// Directory patterns are anchored at.
    #[must_use]
    pub fn declaring_dir(&self) -> &Path {
        self.declaring_file.parent().unwrap_or(Path::new("/"))
    }

    /// Binding name for the `i`-th eager entry of this directive.
    #[must_use]
    pub fn binding_name(&self, i: usize) -> String {
        format!("__glob_{}_{}", self.index, i)
    }
}

/// Parse the first glob directive in `source`, if any.
pub fn parse_directive(source: &str, declaring_file: &Path) -> Result<Option<GlobDirective>> {
    Ok(parse_directives(source, declaring_file)?.into_iter().next())
}

/// Parse every glob directive in `source`, in declaration order.
pub fn parse_directives(source: &str, declaring_file: &Path) -> Result<Vec<GlobDirective>> {
    let declaring_file = globkit_util::path::normalize(declaring_file);
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut directives: Vec<GlobDirective> = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    let mut i = 0;
    // End of the last token outside comments, and whether a line break follows it.
    let mut last_token: Option<usize> = None;
    let mut line_break = false;

    while i < len {
        match bytes[i] {
            b'/' if i + 1 < len && bytes[i + 1] == b'/' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                let start = i;
                i += 2;
                while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(len);
                line_break |= bytes[start..i].contains(&b'\n');
            }
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i);
                last_token = Some(i);
                line_break = false;
            }
            b'i' if source[i..].starts_with(DIRECTIVE) && is_word_start(bytes, i) => {
                let start = i;
                let mut j = i + DIRECTIVE.len();
                let legacy_eager = source[j..].starts_with(LEGACY_EAGER_SUFFIX);
                if legacy_eager {
                    j += LEGACY_EAGER_SUFFIX.len();
                }
                let open = skip_whitespace(bytes, j);
                if (j < len && is_ident_byte(bytes[j])) || open >= len || bytes[open] != b'(' {
                    i = j;
                    last_token = Some(j);
                    line_break = false;
                    continue;
                }

                let (patterns, options, end) =
                    parse_arguments(source, open + 1, legacy_eager, &declaring_file)?;

                let key = serde_json::json!({ "patterns": patterns, "options": options }).to_string();
                let ordinal = keys.iter().filter(|k| **k == key).count();
                let id = DirectiveId(globkit_util::hash::short_digest(&[
                    &globkit_util::path::to_slash(&declaring_file),
                    &key,
                    &ordinal.to_string(),
                ]));
                keys.push(key);

                directives.push(GlobDirective {
                    id,
                    patterns,
                    declaring_file: declaring_file.clone(),
                    options,
                    index: directives.len(),
                    span: start..end,
                    side_effect_only: starts_statement(bytes, last_token, line_break),
                });
                i = end;
                last_token = Some(end);
                line_break = false;
            }
            b'\n' => {
                line_break = true;
                i += 1;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                i += 1;
                last_token = Some(i);
                line_break = false;
            }
        }
    }

    Ok(directives)
}

/// Parse `patterns[, options][,])` starting just after the opening paren.
///
/// Returns the patterns, options and the byte offset just past the closing paren.
fn parse_arguments(
    source: &str,
    start: usize,
    legacy_eager: bool,
    file: &Path,
) -> Result<(Vec<String>, GlobOptions, usize)> {
    let invalid = |message: String| GlobError::InvalidDirective {
        file: file.to_path_buf(),
        message,
    };

    let mut parser = LiteralParser::new(source, start);
    let first = parser.parse_value().map_err(&invalid)?;
    let patterns = match first {
        serde_json::Value::String(s) => vec![s],
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s),
                other => Err(invalid(format!("patterns must be string literals, got {other}"))),
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(invalid(format!(
                "first argument must be a string or an array of strings, got {other}"
            )))
        }
    };
    if patterns.is_empty() {
        return Err(invalid("at least one pattern is required".to_string()));
    }

    let mut options = GlobOptions::default();
    parser.skip_trivia();
    if parser.eat(b',') {
        parser.skip_trivia();
        if parser.peek() != Some(b')') {
            let value = parser.parse_value().map_err(&invalid)?;
            if !value.is_object() {
                return Err(invalid(format!("options must be an object literal, got {value}")));
            }
            options = serde_json::from_value(value)
                .map_err(|e| invalid(format!("invalid options: {e}")))?;
            parser.skip_trivia();
            parser.eat(b',');
            parser.skip_trivia();
        }
    }
    if !parser.eat(b')') {
        return Err(invalid("expected ')' after arguments".to_string()));
    }

    if legacy_eager {
        options.eager = true;
    }
    if options.import.is_some() && options.as_ != ImportAs::Module {
        return Err(invalid(
            "'import' cannot be combined with 'as'".to_string(),
        ));
    }

    Ok((patterns, options, parser.pos))
}

pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn is_word_start(bytes: &[u8], pos: usize) -> bool {
    pos == 0 || !(is_ident_byte(bytes[pos - 1]) || bytes[pos - 1] == b'.')
}

pub(crate) fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Skip a string or template literal starting at `start`; returns the offset past its end.
pub(crate) fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            b'\n' if quote != b'`' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Whether an expression starting after `last_token` begins a statement, so its
/// value is discarded.
///
/// `last_token` is the end of the previous token with comments skipped. A line
/// break ends the previous statement unless that line ends in an operator or an
/// opening bracket.
fn starts_statement(bytes: &[u8], last_token: Option<usize>, line_break: bool) -> bool {
    let Some(end) = last_token else {
        return true;
    };
    let prev = bytes[end - 1];
    if matches!(prev, b';' | b'{' | b'}' | b')') {
        return true;
    }
    if is_ident_byte(prev) {
        let mut start = end;
        while start > 0 && is_ident_byte(bytes[start - 1]) {
            start -= 1;
        }
        let word = &bytes[start..end];
        if word == b"else" || word == b"do" {
            return true;
        }
    }
    line_break && !CONTINUES_EXPRESSION.contains(&prev)
}

fn decode_code_point(digits: &str) -> std::result::Result<char, String> {
    u32::from_str_radix(digits, 16)
        .ok()
        .filter(|_| !digits.is_empty() && !digits.starts_with('+'))
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid code point escape '{digits}'"))
}

/// Line-final bytes after which the next line continues the same expression.
pub(crate) const CONTINUES_EXPRESSION: &[u8] = b"([,=:?+-*/%&|^!~<>.";

/// Parser for the literal subset allowed in directive arguments.
///
/// Handles: unquoted keys, single/double/backtick strings (no interpolation),
/// trailing commas, nested objects, arrays, numbers, booleans, null and comments.
struct LiteralParser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.pos = skip_whitespace(self.bytes, self.pos);
            let rest = &self.src[self.pos..];
            if rest.starts_with("//") {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else if rest.starts_with("/*") {
                match rest[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => self.pos = self.bytes.len(),
                }
            } else {
                return;
            }
        }
    }

    fn parse_value(&mut self) -> std::result::Result<serde_json::Value, String> {
        self.skip_trivia();
        match self.peek() {
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"' | b'\'' | b'`') => self.parse_string().map(serde_json::Value::String),
            Some(b) if b == b'-' || b.is_ascii_digit() => self.parse_number(),
            Some(b't' | b'f') => self.parse_keyword(),
            Some(b'n') => self.parse_keyword(),
            Some(_) => Err(format!(
                "unsupported expression starting at '{}'",
                self.snippet()
            )),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn parse_object(&mut self) -> std::result::Result<serde_json::Value, String> {
        self.pos += 1;
        let mut map = serde_json::Map::new();

        loop {
            self.skip_trivia();
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(serde_json::Value::Object(map));
                }
                None => return Err("unterminated object".to_string()),
                _ => {}
            }

            let key = self.parse_key()?;
            self.skip_trivia();
            if !self.eat(b':') {
                return Err(format!("expected ':' after key '{key}'"));
            }
            let value = self.parse_value()?;
            map.insert(key, value);

            self.skip_trivia();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                None => return Err("unterminated object".to_string()),
                Some(_) => return Err(format!("expected ',' or '}}' at '{}'", self.snippet())),
            }
        }
    }

    fn parse_array(&mut self) -> std::result::Result<serde_json::Value, String> {
        self.pos += 1;
        let mut arr = Vec::new();

        loop {
            self.skip_trivia();
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    return Ok(serde_json::Value::Array(arr));
                }
                None => return Err("unterminated array".to_string()),
                _ => {}
            }

            arr.push(self.parse_value()?);

            self.skip_trivia();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {}
                None => return Err("unterminated array".to_string()),
                Some(_) => return Err(format!("expected ',' or ']' at '{}'", self.snippet())),
            }
        }
    }

    fn parse_key(&mut self) -> std::result::Result<String, String> {
        match self.peek() {
            Some(b'"' | b'\'') => self.parse_string(),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' || b == b'$' => {
                let start = self.pos;
                while self.peek().is_some_and(is_ident_byte) {
                    self.pos += 1;
                }
                Ok(self.src[start..self.pos].to_string())
            }
            _ => Err(format!("expected object key at '{}'", self.snippet())),
        }
    }

    fn parse_string(&mut self) -> std::result::Result<String, String> {
        let quote = self.bytes[self.pos];
        self.pos += 1;
        let mut s = String::new();

        loop {
            let Some(ch) = self.src[self.pos..].chars().next() else {
                return Err("unterminated string".to_string());
            };
            self.pos += ch.len_utf8();
            match ch {
                c if c as u32 == u32::from(quote) => return Ok(s),
                '$' if quote == b'`' && self.peek() == Some(b'{') => {
                    return Err("template literals with interpolation are not supported".to_string())
                }
                '\n' if quote != b'`' => return Err("unterminated string".to_string()),
                '\\' => {
                    let Some(escaped) = self.src[self.pos..].chars().next() else {
                        return Err("unterminated string escape".to_string());
                    };
                    self.pos += escaped.len_utf8();
                    match escaped {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        'r' => s.push('\r'),
                        'b' => s.push('\u{8}'),
                        'f' => s.push('\u{c}'),
                        'v' => s.push('\u{b}'),
                        '0' if !self.peek().is_some_and(|b| b.is_ascii_digit()) => s.push('\0'),
                        'x' => s.push(self.parse_hex_escape(2)?),
                        'u' if self.eat(b'{') => {
                            let Some(close) = self.src[self.pos..].find('}') else {
                                return Err("unterminated \\u{...} escape".to_string());
                            };
                            let digits = &self.src[self.pos..self.pos + close];
                            self.pos += close + 1;
                            s.push(decode_code_point(digits)?);
                        }
                        'u' => s.push(self.parse_hex_escape(4)?),
                        '\n' => {}
                        c if c.is_ascii_digit() => {
                            return Err(format!("octal escape '\\{c}' is not supported"))
                        }
                        other => s.push(other),
                    }
                }
                c => s.push(c),
            }
        }
    }

    /// Read exactly `n` hex digits of a `\x` or `\u` escape.
    fn parse_hex_escape(&mut self, n: usize) -> std::result::Result<char, String> {
        let digits = self
            .src
            .get(self.pos..self.pos + n)
            .ok_or_else(|| "truncated escape sequence".to_string())?;
        self.pos += n;
        if digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            decode_code_point(digits)
        } else {
            Err(format!("invalid escape digits '{digits}'"))
        }
    }

    fn parse_number(&mut self) -> std::result::Result<serde_json::Value, String> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'.') {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        serde_json::from_str(text).map_err(|e| format!("invalid number '{text}': {e}"))
    }

    fn parse_keyword(&mut self) -> std::result::Result<serde_json::Value, String> {
        for (word, value) in [
            ("true", serde_json::Value::Bool(true)),
            ("false", serde_json::Value::Bool(false)),
            ("null", serde_json::Value::Null),
        ] {
            let end = self.pos + word.len();
            if self.src[self.pos..].starts_with(word)
                && self.bytes.get(end).map_or(true, |b| !is_ident_byte(*b))
            {
                self.pos = end;
                return Ok(value);
            }
        }
        Err(format!("unsupported expression starting at '{}'", self.snippet()))
    }

    fn snippet(&self) -> String {
        self.src[self.pos..].chars().take(16).collect()
    }
}
