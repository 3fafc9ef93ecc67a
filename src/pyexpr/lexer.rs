use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Imaginary(f64),
    Str(String),
    Bytes(Vec<u8>),
    FString(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    EndOfFile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

// Longest operators first so that greedy matching works.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", "**", "//", "<<", ">>", "<=", ">=", "==", "!=",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", ":=", "+", "-", "*", "/", "%", "@",
    "&", "|", "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=",
];

enum StrKind {
    Text,
    Bytes,
    Formatted,
}

pub struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
    line_start: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            line: 1,
            line_start: 0,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                // blank and comment-only lines leave us at the start of the next line
                at_line_start = self.handle_indentation()?;
                if at_line_start {
                    continue;
                }
            }

            let c = self.current();
            match c {
                ' ' | '\t' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' => {
                    // explicit line continuation
                    self.pos += 1;
                    if self.peek_is('\r') {
                        self.pos += 1;
                    }
                    if !self.peek_is('\n') {
                        return Err(self.error("unexpected character after line continuation"));
                    }
                    self.pos += 1;
                    self.new_line();
                }
                '\r' | '\n' => {
                    if c == '\r' && self.peek_at(1) == Some('\n') {
                        self.pos += 1;
                    }
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        at_line_start = true;
                    }
                    self.new_line();
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    self.lex_number()?
                }
                c if c == '_' || c.is_alphabetic() => self.lex_name_or_string()?,
                '\'' | '"' => self.lex_string("")?,
                _ => self.lex_operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::EndOfFile);
        Ok(self.tokens)
    }

    /// Measures leading whitespace. Returns true when the line was blank or
    /// comment-only and has been consumed.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0;
        while self.pos < self.chars.len() {
            match self.current() {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }

        if self.pos >= self.chars.len() {
            return Ok(true);
        }
        match self.current() {
            '#' => {
                self.skip_comment();
                self.skip_line_end();
                Ok(true)
            }
            '\r' | '\n' => {
                self.skip_line_end();
                Ok(true)
            }
            _ => {
                let current = *self.indents.last().unwrap_or(&0);
                if width > current {
                    self.indents.push(width);
                    self.push(Tok::Indent);
                } else {
                    while width < *self.indents.last().unwrap_or(&0) {
                        self.indents.pop();
                        self.push(Tok::Dedent);
                    }
                    if width != *self.indents.last().unwrap_or(&0) {
                        return Err(self.error("unindent does not match any outer level"));
                    }
                }
                Ok(false)
            }
        }
    }

    fn skip_comment(&mut self) {
        while self.pos < self.chars.len() && !matches!(self.current(), '\r' | '\n') {
            self.pos += 1;
        }
    }

    fn skip_line_end(&mut self) {
        if self.peek_is('\r') {
            self.pos += 1;
        }
        if self.peek_is('\n') {
            self.pos += 1;
        }
        self.new_line();
    }

    fn lex_name_or_string(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        while self.pos < self.chars.len() {
            let c = self.current();
            if c == '_' || c.is_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word = self.slice(start, self.pos);

        if self.peek_is('\'') || self.peek_is('"') {
            let prefix = word.to_ascii_lowercase();
            if matches!(
                prefix.as_str(),
                "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
            ) {
                return self.lex_string(&prefix);
            }
        }

        let column = start - self.line_start;
        self.tokens.push(Token {
            tok: Tok::Name(word.to_string()),
            line: self.line,
            column,
        });
        Ok(())
    }

    fn lex_string(&mut self, prefix: &str) -> Result<(), ParseError> {
        let line = self.line;
        let column = self.pos - self.line_start;
        let raw = prefix.contains('r');
        let kind = if prefix.contains('b') {
            StrKind::Bytes
        } else if prefix.contains('f') {
            StrKind::Formatted
        } else {
            StrKind::Text
        };

        let quote = self.current();
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut value = String::new();
        loop {
            if self.pos >= self.chars.len() {
                return Err(ParseError::new(line, column, "unterminated string literal"));
            }
            let c = self.current();

            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }

            match c {
                '\n' if !triple => {
                    return Err(ParseError::new(line, column, "unterminated string literal"));
                }
                '\n' => {
                    value.push('\n');
                    self.pos += 1;
                    self.new_line();
                }
                '\\' => {
                    self.pos += 1;
                    if self.pos >= self.chars.len() {
                        return Err(ParseError::new(line, column, "unterminated string literal"));
                    }
                    if raw || matches!(kind, StrKind::Formatted) {
                        // raw and f-strings keep the escape sequence verbatim
                        let escaped = self.current();
                        value.push('\\');
                        value.push(escaped);
                        self.pos += 1;
                        if escaped == '\n' {
                            self.new_line();
                        }
                    } else {
                        self.lex_escape(&mut value, matches!(kind, StrKind::Bytes))?;
                    }
                }
                _ => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }

        let tok = match kind {
            StrKind::Text => Tok::Str(value),
            StrKind::Formatted => Tok::FString(value),
            StrKind::Bytes => {
                let mut bytes = Vec::with_capacity(value.len());
                for ch in value.chars() {
                    let code = ch as u32;
                    if code > 0xff {
                        return Err(ParseError::new(
                            line,
                            column,
                            "bytes can only contain ASCII literal characters",
                        ));
                    }
                    bytes.push(code as u8);
                }
                Tok::Bytes(bytes)
            }
        };
        self.tokens.push(Token { tok, line, column });
        Ok(())
    }

    fn lex_escape(&mut self, value: &mut String, bytes: bool) -> Result<(), ParseError> {
        let c = self.current();
        self.pos += 1;
        match c {
            '\n' => self.new_line(),
            '\r' => {
                if self.peek_is('\n') {
                    self.pos += 1;
                }
                self.new_line();
            }
            '\\' => value.push('\\'),
            '\'' => value.push('\''),
            '"' => value.push('"'),
            'a' => value.push('\x07'),
            'b' => value.push('\x08'),
            'f' => value.push('\x0c'),
            'n' => value.push('\n'),
            'r' => value.push('\r'),
            't' => value.push('\t'),
            'v' => value.push('\x0b'),
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.chars.get(self.pos).and_then(|&(_, d)| d.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            self.pos += 1;
                        }
                        None => break,
                    }
                }
                value.push(self.code_point(code)?);
            }
            'x' => {
                let code = self.hex_digits(2)?;
                value.push(self.code_point(code)?);
            }
            'u' if !bytes => {
                let code = self.hex_digits(4)?;
                value.push(self.code_point(code)?);
            }
            'U' if !bytes => {
                let code = self.hex_digits(8)?;
                value.push(self.code_point(code)?);
            }
            other => {
                // unknown escapes are kept as-is
                value.push('\\');
                value.push(other);
            }
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, ParseError> {
        let mut code = 0u32;
        for _ in 0..count {
            let digit = self
                .chars
                .get(self.pos)
                .and_then(|&(_, d)| d.to_digit(16))
                .ok_or_else(|| self.error("truncated escape sequence"))?;
            code = code * 16 + digit;
            self.pos += 1;
        }
        Ok(code)
    }

    fn code_point(&self, code: u32) -> Result<char, ParseError> {
        char::from_u32(code).ok_or_else(|| self.error("invalid escape code point"))
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let line = self.line;
        let column = start - self.line_start;

        let radix = if self.current() == '0' {
            match self.peek_at(1).map(|c| c.to_ascii_lowercase()) {
                Some('x') => Some(16),
                Some('o') => Some(8),
                Some('b') => Some(2),
                _ => None,
            }
        } else {
            None
        };

        if let Some(radix) = radix {
            self.pos += 2;
            let digits_start = self.pos;
            while self.pos < self.chars.len()
                && (self.current() == '_' || self.current().is_digit(radix))
            {
                self.pos += 1;
            }
            let digits = self.slice(digits_start, self.pos).replace('_', "");
            let tok = match i64::from_str_radix(&digits, radix) {
                Ok(value) => Tok::Int(value),
                Err(_) if !digits.is_empty() => Tok::Float(big_to_float(&digits, radix)),
                Err(_) => return Err(ParseError::new(line, column, "invalid number literal")),
            };
            self.tokens.push(Token { tok, line, column });
            return Ok(());
        }

        let mut is_float = false;
        self.eat_digits();
        if self.peek_is('.') {
            is_float = true;
            self.pos += 1;
            self.eat_digits();
        }
        if self.peek_is('e') || self.peek_is('E') {
            let sign = self.peek_at(1);
            let digit_at = if matches!(sign, Some('+') | Some('-')) { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                self.eat_digits();
            }
        }

        let text = self.slice(start, self.pos).replace('_', "");
        let imaginary = self.peek_is('j') || self.peek_is('J');
        if imaginary {
            self.pos += 1;
        }
        if self.pos < self.chars.len() && (self.current().is_alphanumeric() || self.current() == '_')
        {
            return Err(ParseError::new(line, column, "invalid number literal"));
        }

        let float = || {
            text.parse::<f64>()
                .map_err(|_| ParseError::new(line, column, "invalid number literal"))
        };
        let tok = if imaginary {
            Tok::Imaginary(float()?)
        } else if is_float {
            Tok::Float(float()?)
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(ParseError::new(
                    line,
                    column,
                    "leading zeros in decimal integer literals are not permitted",
                ));
            }
            match text.parse::<i64>() {
                Ok(value) => Tok::Int(value),
                // out of i64 range: keep the magnitude as a float
                Err(_) => Tok::Float(float()?),
            }
        };
        self.tokens.push(Token { tok, line, column });
        Ok(())
    }

    fn eat_digits(&mut self) {
        while self.pos < self.chars.len()
            && (self.current().is_ascii_digit() || self.current() == '_')
        {
            self.pos += 1;
        }
    }

    fn lex_operator(&mut self) -> Result<(), ParseError> {
        let rest = &self.src[self.chars[self.pos].0..];
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .copied()
            .ok_or_else(|| self.error(&format!("invalid character '{}'", self.current())))?;

        match op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => {
                if self.depth == 0 {
                    return Err(self.error(&format!("unmatched '{}'", op)));
                }
                self.depth -= 1;
            }
            _ => {}
        }

        self.push(Tok::Op(op));
        self.pos += op.chars().count();
        Ok(())
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
            column: self.pos.saturating_sub(self.line_start),
        });
    }

    fn new_line(&mut self) {
        self.line += 1;
        self.line_start = self.pos;
    }

    fn current(&self) -> char {
        self.chars[self.pos].1
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|&(_, c)| c)
    }

    fn peek_is(&self, c: char) -> bool {
        self.peek_at(0) == Some(c)
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        let from = self.chars.get(start).map(|&(o, _)| o).unwrap_or(self.src.len());
        let to = self.chars.get(end).map(|&(o, _)| o).unwrap_or(self.src.len());
        &self.src[from..to]
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError::new(self.line, self.pos.saturating_sub(self.line_start), message)
    }
}

fn big_to_float(digits: &str, radix: u32) -> f64 {
    digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_simple_call_tokens() {
        assert_eq!(
            toks("update_ui(action='FILTER')"),
            vec![
                Tok::Name("update_ui".to_string()),
                Tok::Op("("),
                Tok::Name("action".to_string()),
                Tok::Op("="),
                Tok::Str("FILTER".to_string()),
                Tok::Op(")"),
                Tok::Newline,
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            toks(r#""a\tb\n\x41\u00e9\'""#)[0],
            Tok::Str("a\tb\nAé'".to_string())
        );
        assert_eq!(toks(r"r'a\nb'")[0], Tok::Str("a\\nb".to_string()));
        assert_eq!(toks(r"'\d'")[0], Tok::Str("\\d".to_string()));
        assert_eq!(toks("b'ab'")[0], Tok::Bytes(b"ab".to_vec()));
        assert_eq!(toks("f'{x}'")[0], Tok::FString("{x}".to_string()));
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let tokens = toks("x = '''one\ntwo'''\ny = 1");
        assert_eq!(tokens[2], Tok::Str("one\ntwo".to_string()));
        assert_eq!(tokens[3], Tok::Newline);
        assert_eq!(tokens[4], Tok::Name("y".to_string()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("42")[0], Tok::Int(42));
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("0x1f")[0], Tok::Int(31));
        assert_eq!(toks("2.5")[0], Tok::Float(2.5));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
        assert_eq!(toks("1e3")[0], Tok::Float(1000.0));
        assert_eq!(toks("3j")[0], Tok::Imaginary(3.0));
        assert!(Lexer::new("012").tokenize().is_err());
    }

    #[test]
    fn test_indentation_tokens() {
        let tokens = toks("if x:\n    y()\nz()\n");
        assert!(tokens.contains(&Tok::Indent));
        assert!(tokens.contains(&Tok::Dedent));
        let indent = tokens.iter().position(|t| *t == Tok::Indent).unwrap();
        let dedent = tokens.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = toks("f(\n  a=1,\n  b=2\n)");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!tokens.contains(&Tok::Indent));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let tokens = toks("# leading\n\nx = 1  # trailing\n");
        assert_eq!(
            tokens,
            vec![
                Tok::Name("x".to_string()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::EndOfFile
            ]
        );
    }

    #[test]
    fn test_lexer_errors() {
        assert!(Lexer::new("'unterminated").tokenize().is_err());
        assert!(Lexer::new("a = $").tokenize().is_err());
        assert!(Lexer::new("f(a))").tokenize().is_err());
        assert!(Lexer::new("if x:\n    y\n  z\n").tokenize().is_err());
    }
}
