//! Reads the exported object of a JavaScript/TypeScript config file without evaluating it.
//!
//! Plain literals (objects, arrays, strings, numbers, booleans, null) become structured
//! values. Anything else in value position (functions, calls, identifiers, interpolated
//! templates) is captured verbatim as a [`CodeFragment`] so it can be written back unchanged.

use std::ops::Range;

use serde_json::Number;

use crate::config_codec::{normalize_number, CodeFragment, ConfigObject, ConfigValue};

pub type ParseResult<T> = Result<T, String>;

/// Parses the value exported by `module.exports = ...` or `export default ...`.
///
/// A source with no export statement yields an empty object.
pub fn parse_config_source(source: &str) -> ParseResult<ConfigObject> {
    parse_config_document(source).map(|(config, _)| config)
}

/// Like [`parse_config_source`], also returning the byte range of the object literal the
/// config was read from. The range is `None` when the source has no export statement.
pub fn parse_config_document(source: &str) -> ParseResult<(ConfigObject, Option<Range<usize>>)> {
    let mut scanner = Scanner::new(source);
    let Some(start) = scanner.find_export()? else {
        return Ok((ConfigObject::new(), None));
    };
    scanner.pos = start;
    match scanner.parse_exported_value()? {
        ConfigValue::Object(object) => Ok((object, literal_span(source, start))),
        ConfigValue::Fragment(fragment) if is_identifier(fragment.source()) => {
            let name = fragment.source().to_owned();
            let declaration = scanner.find_declaration(&name)?.ok_or_else(|| {
                scanner.error(&format!("exported identifier `{name}` has no top-level declaration"))
            })?;
            scanner.pos = declaration;
            match scanner.parse_exported_value()? {
                ConfigValue::Object(object) => Ok((object, literal_span(source, declaration))),
                _ => Err(scanner.error(&format!("`{name}` is not initialised with an object literal"))),
            }
        }
        _ => Err(scanner.error("exported value is not an object literal")),
    }
}

/// The exported value already parsed as an object, so the first code brace opens it.
fn literal_span(source: &str, value_start: usize) -> Option<Range<usize>> {
    let open = find_code_byte(source, value_start, b'{')?;
    Some(open..matching_close(source, open)?)
}

/// Index of the first `target` byte at or after `from` that sits outside strings,
/// templates and comments.
pub fn find_code_byte(source: &str, from: usize, target: u8) -> Option<usize> {
    let mut scanner = Scanner::new(source);
    scanner.pos = from;
    loop {
        scanner.skip_trivia();
        let byte = scanner.peek()?;
        match byte {
            _ if byte == target => return Some(scanner.pos),
            b'"' | b'\'' => scanner.skip_quoted(byte).ok()?,
            b'`' => scanner.skip_template().ok()?,
            _ => scanner.pos += 1,
        }
    }
}

/// Index just past the bracket that closes the one opened at `open`, or `None` when the
/// source ends first.
pub fn matching_close(source: &str, open: usize) -> Option<usize> {
    let byte = *source.as_bytes().get(open)?;
    if !matches!(byte, b'(' | b'[' | b'{') {
        return None;
    }
    let mut scanner = Scanner::new(source);
    scanner.pos = open + 1;
    scanner.skip_until_close(closer_for(byte)).ok()?;
    Some(scanner.pos)
}

/// Byte ranges of the top-level arguments of the call whose `(` sits at `open`, without
/// surrounding whitespace or comments. `None` when the argument list is unbalanced.
pub fn call_arguments(source: &str, open: usize) -> Option<Vec<Range<usize>>> {
    if source.as_bytes().get(open) != Some(&b'(') {
        return None;
    }
    let mut scanner = Scanner::new(source);
    scanner.pos = open + 1;
    let mut arguments = Vec::new();
    let mut start = None;
    let mut end = scanner.pos;
    loop {
        scanner.skip_trivia();
        let byte = scanner.peek()?;
        if matches!(byte, b',' | b')') {
            if let Some(begin) = start.take() {
                arguments.push(begin..end);
            }
            scanner.pos += 1;
            if byte == b')' {
                return Some(arguments);
            }
            continue;
        }
        start.get_or_insert(scanner.pos);
        match byte {
            b'"' | b'\'' => scanner.skip_quoted(byte).ok()?,
            b'`' => scanner.skip_template().ok()?,
            b'(' | b'[' | b'{' => {
                scanner.pos += 1;
                scanner.skip_until_close(closer_for(byte)).ok()?;
            }
            b']' | b'}' => return None,
            _ => scanner.pos += 1,
        }
        end = scanner.pos;
    }
}

pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' || byte >= 0x80
}

fn is_ident_start(byte: u8) -> bool {
    is_ident_byte(byte) && !byte.is_ascii_digit()
}

fn is_value_terminator(byte: u8) -> bool {
    matches!(byte, b',' | b'}' | b']' | b')' | b';')
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        let pos = if src.starts_with('\u{feff}') { 3 } else { 0 };
        Self {
            src,
            bytes: src.as_bytes(),
            pos,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn starts_with(&self, needle: &str) -> bool {
        self.bytes[self.pos.min(self.bytes.len())..].starts_with(needle.as_bytes())
    }

    fn slice(&self, start: usize, end: usize) -> ParseResult<&'a str> {
        self.src
            .get(start..end)
            .ok_or_else(|| self.error("source slice is not on a character boundary"))
    }

    fn error(&self, message: &str) -> String {
        let consumed = &self.bytes[..self.pos.min(self.bytes.len())];
        let line = consumed.iter().filter(|byte| **byte == b'\n').count() + 1;
        let column = consumed
            .iter()
            .rev()
            .take_while(|byte| **byte != b'\n')
            .count()
            + 1;
        format!("{message} at line {line}, column {column}")
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(byte) if byte.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    loop {
                        match self.peek() {
                            None => break,
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn read_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        self.src.get(start..self.pos).unwrap_or_default()
    }

    /// Reads `a.b.c` style member paths.
    fn read_identifier_path(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|byte| is_ident_byte(byte) || byte == b'.') {
            self.pos += 1;
        }
        self.src.get(start..self.pos).unwrap_or_default()
    }

    /// Finds the position right after `module.exports =` or `export default`.
    fn find_export(&mut self) -> ParseResult<Option<usize>> {
        self.scan_top_level(|scanner, word| match word {
            "module.exports" => {
                scanner.skip_trivia();
                if scanner.peek() == Some(b'=') && scanner.peek_at(1) != Some(b'=') {
                    return Some(scanner.pos + 1);
                }
                None
            }
            "export" => {
                scanner.skip_trivia();
                let resume = scanner.pos;
                if scanner.read_identifier() == "default" {
                    return Some(scanner.pos);
                }
                scanner.pos = resume;
                None
            }
            _ => None,
        })
    }

    /// Finds the initialiser of `const|let|var <name> =`.
    fn find_declaration(&mut self, name: &str) -> ParseResult<Option<usize>> {
        self.scan_top_level(|scanner, word| {
            if !matches!(word, "const" | "let" | "var") {
                return None;
            }
            scanner.skip_trivia();
            let resume = scanner.pos;
            if scanner.read_identifier() == name {
                scanner.skip_trivia();
                if scanner.peek() == Some(b'=') && scanner.peek_at(1) != Some(b'=') {
                    return Some(scanner.pos + 1);
                }
            }
            scanner.pos = resume;
            None
        })
    }

    fn scan_top_level<F>(&mut self, mut on_word: F) -> ParseResult<Option<usize>>
    where
        F: FnMut(&mut Self, &str) -> Option<usize>,
    {
        self.pos = if self.src.starts_with('\u{feff}') { 3 } else { 0 };
        loop {
            self.skip_trivia();
            let Some(byte) = self.peek() else {
                return Ok(None);
            };
            match byte {
                b'"' | b'\'' => self.skip_quoted(byte)?,
                b'`' => self.skip_template()?,
                _ if is_ident_start(byte) => {
                    let word = self.read_identifier_path();
                    if let Some(found) = on_word(self, word) {
                        return Ok(Some(found));
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_quoted(&mut self, quote: u8) -> ParseResult<()> {
        self.pos += 1;
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(self.error("unterminated string literal")),
                Some(b'\\') => self.pos += 2,
                Some(byte) if byte == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn skip_template(&mut self) -> ParseResult<()> {
        self.pos += 1;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated template literal")),
                Some(b'\\') => self.pos += 2,
                Some(b'`') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'$') if self.peek_at(1) == Some(b'{') => {
                    self.pos += 2;
                    self.skip_until_close(b'}')?;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Consumes code up to and including the bracket that closes an already opened `close`.
    fn skip_until_close(&mut self, close: u8) -> ParseResult<()> {
        let mut stack = vec![close];
        loop {
            self.skip_trivia();
            let Some(byte) = self.peek() else {
                return Err(self.error("unbalanced brackets"));
            };
            match byte {
                b'"' | b'\'' => self.skip_quoted(byte)?,
                b'`' => self.skip_template()?,
                b'(' | b'[' | b'{' => {
                    stack.push(closer_for(byte));
                    self.pos += 1;
                }
                b')' | b']' | b'}' => {
                    if stack.pop() != Some(byte) {
                        return Err(self.error("mismatched closing bracket"));
                    }
                    self.pos += 1;
                    if stack.is_empty() {
                        return Ok(());
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Captures raw source from `start` up to the next top-level value terminator.
    fn capture_fragment(&mut self, start: usize) -> ParseResult<ConfigValue> {
        self.pos = start;
        let mut stack = Vec::new();
        let mut end = start;
        loop {
            self.skip_trivia();
            let Some(byte) = self.peek() else {
                if stack.is_empty() {
                    break;
                }
                return Err(self.error("unbalanced brackets"));
            };
            if stack.is_empty() && is_value_terminator(byte) {
                break;
            }
            match byte {
                b'"' | b'\'' => self.skip_quoted(byte)?,
                b'`' => self.skip_template()?,
                b'(' | b'[' | b'{' => {
                    stack.push(closer_for(byte));
                    self.pos += 1;
                }
                b')' | b']' | b'}' => {
                    if stack.pop() != Some(byte) {
                        return Err(self.error("mismatched closing bracket"));
                    }
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
            end = self.pos;
        }
        let text = self.slice(start, end)?.trim();
        if text.is_empty() {
            return Err(self.error("expected a value"));
        }
        Ok(ConfigValue::Fragment(CodeFragment::new(text)))
    }

    /// Parses the exported expression, unwrapping a single wrapper call such as
    /// `defineConfig({...})`.
    fn parse_exported_value(&mut self) -> ParseResult<ConfigValue> {
        self.skip_trivia();
        let start = self.pos;
        let callee = self.read_identifier_path();
        if !callee.is_empty() && !matches!(callee, "function" | "async" | "require" | "new") {
            self.skip_trivia();
            if self.peek() == Some(b'(') {
                self.pos += 1;
                self.depth += 1;
                let inner = self.parse_value();
                self.depth -= 1;
                let inner = inner?;
                self.skip_trivia();
                if self.peek() != Some(b')') {
                    return Err(self.error(&format!("expected `)` closing {callee}(...)")));
                }
                self.pos += 1;
                return Ok(inner);
            }
        }
        self.pos = start;
        self.parse_value()
    }

    fn parse_value(&mut self) -> ParseResult<ConfigValue> {
        self.skip_trivia();
        let start = self.pos;
        let Some(byte) = self.peek() else {
            return Err(self.error("expected a value"));
        };
        let parsed = match byte {
            b'{' => self.parse_object().map(ConfigValue::Object),
            b'[' => self.parse_array().map(ConfigValue::List),
            b'"' | b'\'' => self.parse_string(byte).map(ConfigValue::String),
            b'`' => self.parse_string(b'`').map(ConfigValue::String),
            b'-' | b'+' | b'.' | b'0'..=b'9' => self.parse_number().map(ConfigValue::Number),
            _ if is_ident_start(byte) => self.parse_keyword(),
            _ => Err(String::new()),
        };
        match parsed {
            Ok(value) => self.finish_value(start, value),
            // An empty error means "not a plain literal": keep the source as a fragment.
            Err(err) => match self.capture_fragment(start) {
                Ok(fragment) => Ok(fragment),
                Err(capture_err) if err.is_empty() => Err(capture_err),
                Err(_) => Err(err),
            },
        }
    }

    /// A literal followed by more expression (`"a" + b`, `1 * 2`) is really a fragment.
    fn finish_value(&mut self, start: usize, value: ConfigValue) -> ParseResult<ConfigValue> {
        let before = self.pos;
        self.skip_trivia();
        let crossed_newline = self.bytes[before..self.pos].contains(&b'\n');
        match self.peek() {
            None => Ok(value),
            Some(byte) if is_value_terminator(byte) => Ok(value),
            Some(_) if self.depth == 0 && crossed_newline => Ok(value),
            Some(_) => self.capture_fragment(start),
        }
    }

    fn parse_keyword(&mut self) -> ParseResult<ConfigValue> {
        match self.read_identifier() {
            "true" => Ok(ConfigValue::Bool(true)),
            "false" => Ok(ConfigValue::Bool(false)),
            "null" => Ok(ConfigValue::Null),
            _ => Err(String::new()),
        }
    }

    fn parse_object(&mut self) -> ParseResult<ConfigObject> {
        self.pos += 1;
        self.depth += 1;
        let result = self.parse_object_members();
        self.depth -= 1;
        result
    }

    fn parse_object_members(&mut self) -> ParseResult<ConfigObject> {
        let mut object = ConfigObject::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.error("unterminated object literal")),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(object);
                }
                Some(_) => {}
            }
            let (key, value) = self.parse_member()?;
            object.insert(key, value);
            self.skip_trivia();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(object);
                }
                None => return Err(self.error("unterminated object literal")),
                Some(_) => return Err(self.error("expected `,` or `}` in object literal")),
            }
        }
    }

    fn parse_member(&mut self) -> ParseResult<(String, ConfigValue)> {
        if self.starts_with("...") {
            return Err(self.error("spread properties are not supported"));
        }
        let mut key = self.parse_key()?;
        self.skip_trivia();
        let mut is_async = false;
        if key == "async" && self.peek().is_some_and(|byte| is_ident_start(byte) || byte == b'"' || byte == b'\'') {
            is_async = true;
            key = self.parse_key()?;
            self.skip_trivia();
        }
        match self.peek() {
            Some(b':') if !is_async => {
                self.pos += 1;
                let value = self.parse_value()?;
                Ok((key, value))
            }
            Some(b'(') => {
                let fragment = self.parse_method(&key, is_async)?;
                Ok((key, fragment))
            }
            Some(b',') | Some(b'}') if !is_async && is_identifier(&key) => {
                let fragment = ConfigValue::Fragment(CodeFragment::new(key.clone()));
                Ok((key, fragment))
            }
            _ => Err(self.error(&format!("expected `:` after key `{key}`"))),
        }
    }

    /// Method shorthand `name(args) { body }` becomes `function name(args) { body }`.
    fn parse_method(&mut self, name: &str, is_async: bool) -> ParseResult<ConfigValue> {
        let params_start = self.pos;
        self.pos += 1;
        self.skip_until_close(b')')?;
        self.skip_trivia();
        if self.peek() != Some(b'{') {
            return Err(self.error(&format!("expected body for method `{name}`")));
        }
        self.pos += 1;
        self.skip_until_close(b'}')?;
        let rest = self.slice(params_start, self.pos)?;
        let prefix = if is_async { "async function" } else { "function" };
        let source = if is_identifier(name) {
            format!("{prefix} {name}{rest}")
        } else {
            format!("{prefix} {rest}")
        };
        Ok(ConfigValue::Fragment(CodeFragment::new(source)))
    }

    fn parse_key(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(quote @ (b'"' | b'\'')) => self.parse_string(quote),
            Some(b'[') => Err(self.error("computed keys are not supported")),
            Some(byte) if byte.is_ascii_digit() => {
                let number = self.parse_number()?;
                Ok(number.to_string())
            }
            Some(byte) if is_ident_start(byte) => Ok(self.read_identifier().to_owned()),
            _ => Err(self.error("expected a property key")),
        }
    }

    fn parse_array(&mut self) -> ParseResult<Vec<ConfigValue>> {
        self.pos += 1;
        self.depth += 1;
        let result = self.parse_array_items();
        self.depth -= 1;
        result
    }

    fn parse_array_items(&mut self) -> ParseResult<Vec<ConfigValue>> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.error("unterminated array literal")),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(b',') => return Err(self.error("array holes are not supported")),
                Some(_) => {}
            }
            if self.starts_with("...") {
                return Err(self.error("spread elements are not supported"));
            }
            items.push(self.parse_value()?);
            self.skip_trivia();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(items);
                }
                None => return Err(self.error("unterminated array literal")),
                Some(_) => return Err(self.error("expected `,` or `]` in array literal")),
            }
        }
    }

    /// Decodes a quoted string. Templates with `${` interpolation are rejected with an
    /// empty error so the caller keeps them as fragments.
    fn parse_string(&mut self, quote: u8) -> ParseResult<String> {
        let is_template = quote == b'`';
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(ch) = self.src.get(self.pos..).and_then(|rest| rest.chars().next()) else {
                return Err(self.error("unterminated string literal"));
            };
            self.pos += ch.len_utf8();
            match ch {
                _ if ch == quote as char => return Ok(out),
                '\n' | '\r' if !is_template => {
                    return Err(self.error("unterminated string literal"));
                }
                '$' if is_template && self.peek() == Some(b'{') => return Err(String::new()),
                '\\' => self.parse_escape(&mut out)?,
                _ => out.push(ch),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> ParseResult<()> {
        let Some(ch) = self.src.get(self.pos..).and_then(|rest| rest.chars().next()) else {
            return Err(self.error("unterminated escape sequence"));
        };
        self.pos += ch.len_utf8();
        match ch {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek().is_some_and(|byte| byte.is_ascii_digit()) => out.push('\0'),
            'x' => {
                let code = self.read_hex(2)?;
                out.push(char::from_u32(code).ok_or_else(|| self.error("invalid \\x escape"))?);
            }
            'u' => {
                let code = self.read_unicode_escape()?;
                let decoded = if (0xD800..0xDC00).contains(&code) && self.starts_with("\\u") {
                    self.pos += 2;
                    let low = self.read_unicode_escape()?;
                    0x10000 + ((code - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF)
                } else {
                    code
                };
                out.push(char::from_u32(decoded).ok_or_else(|| self.error("invalid \\u escape"))?);
            }
            '\r' => {
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => out.push(other),
        }
        Ok(())
    }

    fn read_unicode_escape(&mut self) -> ParseResult<u32> {
        if self.peek() == Some(b'{') {
            self.pos += 1;
            let start = self.pos;
            while self.peek().is_some_and(|byte| byte.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = self.slice(start, self.pos)?;
            if self.peek() != Some(b'}') || digits.is_empty() {
                return Err(self.error("invalid \\u{...} escape"));
            }
            self.pos += 1;
            return u32::from_str_radix(digits, 16).map_err(|_| self.error("invalid \\u{...} escape"));
        }
        self.read_hex(4)
    }

    fn read_hex(&mut self, len: usize) -> ParseResult<u32> {
        let end = self.pos + len;
        let digits = self
            .src
            .get(self.pos..end)
            .filter(|digits| digits.bytes().all(|byte| byte.is_ascii_hexdigit()))
            .ok_or_else(|| self.error("invalid hex escape"))?;
        self.pos = end;
        u32::from_str_radix(digits, 16).map_err(|_| self.error("invalid hex escape"))
    }

    /// Numbers that do not fit a JSON number (Infinity, NaN, bigint) are rejected with an
    /// empty error and end up as fragments.
    fn parse_number(&mut self) -> ParseResult<Number> {
        let negative = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                true
            }
            Some(b'+') => {
                self.pos += 1;
                false
            }
            _ => false,
        };
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let start = self.pos;
            while self.peek().is_some_and(|byte| byte.is_ascii_hexdigit() || byte == b'_') {
                self.pos += 1;
            }
            let digits = self.slice(start, self.pos)?.replace('_', "");
            let value = i64::from_str_radix(&digits, 16).map_err(|_| String::new())?;
            return Ok(Number::from(if negative { -value } else { value }));
        }

        let start = self.pos;
        let mut is_float = false;
        self.skip_digits();
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            self.skip_digits();
        }
        let digits = self.slice(start, self.pos)?.replace('_', "");
        if !digits.bytes().any(|byte| byte.is_ascii_digit()) {
            return Err(String::new());
        }
        let text = if negative { format!("-{digits}") } else { digits };
        if !is_float {
            if let Ok(value) = text.parse::<i64>() {
                return Ok(Number::from(value));
            }
        }
        let value = text.parse::<f64>().map_err(|_| String::new())?;
        normalize_number(value).ok_or_else(String::new)
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_digit() || byte == b'_') {
            self.pos += 1;
        }
    }
}

fn closer_for(open: u8) -> u8 {
    match open {
        b'(' => b')',
        b'[' => b']',
        _ => b'}',
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        call_arguments, find_code_byte, is_identifier, matching_close, parse_config_document,
        parse_config_source,
    };
    use crate::config_codec::{CodeFragment, ConfigValue};

    #[test]
    fn parses_plain_commonjs_literal_with_comments_and_trailing_commas() {
        let source = r#"
// generated
module.exports = {
  e2e: {
    baseUrl: 'http://localhost:8080', // dev server
    /* retries */
    retries: { runMode: 2, openMode: 0, },
    specPattern: ["cypress/e2e/**/*.cy.{js,ts}"],
  },
  "video": false,
  viewportWidth: 1_280,
  ratio: -0.5,
  mask: 0x10,
  label: `plain template`,
};
"#;
        let config = parse_config_source(source).expect("parse");
        assert_eq!(
            config.to_json(),
            json!({
                "e2e": {
                    "baseUrl": "http://localhost:8080",
                    "retries": { "runMode": 2, "openMode": 0 },
                    "specPattern": ["cypress/e2e/**/*.cy.{js,ts}"]
                },
                "video": false,
                "viewportWidth": 1280,
                "ratio": -0.5,
                "mask": 16,
                "label": "plain template"
            })
        );
    }

    #[test]
    fn executable_values_are_kept_verbatim() {
        let source = r#"const { defineConfig } = require("cypress");

module.exports = defineConfig({
  e2e: {
    setupNodeEvents(on, config) {
      on("task", { log(message) { console.log(message); return null; } });
      return config;
    },
    baseUrl: process.env.BASE_URL || "http://localhost:3000",
    greeting: `hello ${name}`,
    handler: async (on) => { await on("x"); },
  },
});
"#;
        let config = parse_config_source(source).expect("parse");
        let e2e = config.get("e2e").and_then(ConfigValue::as_object).expect("e2e");
        assert_eq!(
            e2e.get("setupNodeEvents"),
            Some(&ConfigValue::Fragment(CodeFragment::new(
                "function setupNodeEvents(on, config) {\n      on(\"task\", { log(message) { console.log(message); return null; } });\n      return config;\n    }"
            )))
        );
        assert_eq!(
            e2e.get("baseUrl"),
            Some(&ConfigValue::Fragment(CodeFragment::new(
                "process.env.BASE_URL || \"http://localhost:3000\""
            )))
        );
        assert_eq!(
            e2e.get("greeting"),
            Some(&ConfigValue::Fragment(CodeFragment::new("`hello ${name}`")))
        );
        assert_eq!(
            e2e.get("handler"),
            Some(&ConfigValue::Fragment(CodeFragment::new(
                "async (on) => { await on(\"x\"); }"
            )))
        );
    }

    #[test]
    fn follows_exported_identifier_to_its_declaration() {
        let source = "const config = {\n  video: true,\n};\n\nexport default config;\n";
        let config = parse_config_source(source).expect("parse");
        assert_eq!(config.to_json(), json!({ "video": true }));
    }

    #[test]
    fn missing_export_reads_as_empty_object() {
        let config = parse_config_source("// nothing exported yet\nconst a = 1;\n").expect("parse");
        assert!(config.is_empty());
    }

    #[test]
    fn export_keywords_inside_strings_and_comments_are_ignored() {
        let source = "const note = 'module.exports = 1';\n// export default nope\nmodule.exports = { ok: true };\n";
        let config = parse_config_source(source).expect("parse");
        assert_eq!(config.to_json(), json!({ "ok": true }));
    }

    #[test]
    fn malformed_exports_are_errors() {
        for source in [
            "module.exports = {\n  e2e: {\n",
            "module.exports = { a: 'unterminated };",
            "module.exports = 42;",
            "module.exports = { ...base, a: 1 };",
            "module.exports = { a: 1, b: };",
        ] {
            let err = parse_config_source(source).expect_err(source);
            assert!(err.contains("line"), "{source}: {err}");
        }
    }

    #[test]
    fn shorthand_properties_and_escapes() {
        let source = "module.exports = { baseUrl, note: \"tab\\tquote\\\"\\u00e9\\u{1F600}\" };";
        let config = parse_config_source(source).expect("parse");
        assert_eq!(
            config.get("baseUrl"),
            Some(&ConfigValue::Fragment(CodeFragment::new("baseUrl")))
        );
        assert_eq!(
            config.get("note"),
            Some(&ConfigValue::String("tab\tquote\"\u{e9}\u{1F600}".to_owned()))
        );
    }

    #[test]
    fn identifier_check() {
        assert!(is_identifier("config"));
        assert!(is_identifier("$base_1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn brace_scanning_skips_strings_and_comments() {
        let source = "describe(\"{x}\", /* { */ () => { it('}', () => {}); });";
        let open = find_code_byte(source, 0, b'{').expect("open brace");
        assert_eq!(&source[open..open + 3], "{ i");
        let close = matching_close(source, open).expect("balanced");
        assert_eq!(&source[open..close], "{ it('}', () => {}); }");
        assert_eq!(&source[close..], ");");
        assert_eq!(matching_close("describe('a', () => {", 20), None);
    }

    #[test]
    fn call_arguments_split_on_top_level_commas() {
        let source = "describe(\"a, b\", { tags: [\"@x\", \"@y\"] }, /* c */ () => {});";
        let arguments = call_arguments(source, 8)
            .expect("balanced")
            .into_iter()
            .map(|range| &source[range])
            .collect::<Vec<_>>();
        assert_eq!(arguments, vec!["\"a, b\"", "{ tags: [\"@x\", \"@y\"] }", "() => {}"]);
        assert_eq!(call_arguments("describe('a', () => {", 8), None);
        assert_eq!(call_arguments("describe()", 8), Some(Vec::new()));
    }

    #[test]
    fn document_span_covers_the_exported_literal() {
        let source = "const base = require('./base');\nexport default defineConfig({ e2e: {} });\n";
        let (_, span) = parse_config_document(source).expect("parse");
        assert_eq!(&source[span.expect("span")], "{ e2e: {} }");

        let source = "const config = { retries: 1 };\nmodule.exports = config;\n";
        let (_, span) = parse_config_document(source).expect("parse");
        assert_eq!(&source[span.expect("span")], "{ retries: 1 }");

        let (_, span) = parse_config_document("// nothing exported\n").expect("parse");
        assert_eq!(span, None);
    }
}
