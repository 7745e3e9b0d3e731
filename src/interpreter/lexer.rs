//! Tokenizer for the sandboxed Python subset.
//!
//! Indentation-sensitive: emits `Indent`/`Dedent`/`Newline` tokens from a
//! classic indent stack. Newlines inside brackets and after a trailing
//! backslash are suppressed.

use super::InterpreterError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string with raw body; interpolations are parsed later
    FStr(String),
    Name(String),
    Keyword(Kw),
    Op(Op),
    Newline,
    Indent,
    Dedent,
    EndOfFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Not,
    And,
    Or,
    True,
    False,
    None,
    Break,
    Continue,
    Pass,
    Import,
    From,
    As,
    Class,
    Try,
    Except,
    Finally,
    Raise,
    With,
    Lambda,
    Del,
    Assert,
    Global,
    Is,
    Async,
    Await,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    At,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LShift,
    RShift,
    Lt,
    Gt,
    LtE,
    GtE,
    EqEq,
    NotEq,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
    DoubleStarAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Arrow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

fn keyword_of(word: &str) -> Option<Kw> {
    Some(match word {
        "def" => Kw::Def,
        "return" => Kw::Return,
        "if" => Kw::If,
        "elif" => Kw::Elif,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "not" => Kw::Not,
        "and" => Kw::And,
        "or" => Kw::Or,
        "True" => Kw::True,
        "False" => Kw::False,
        "None" => Kw::None,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "pass" => Kw::Pass,
        "import" => Kw::Import,
        "from" => Kw::From,
        "as" => Kw::As,
        "class" => Kw::Class,
        "try" => Kw::Try,
        "except" => Kw::Except,
        "finally" => Kw::Finally,
        "raise" => Kw::Raise,
        "with" => Kw::With,
        "lambda" => Kw::Lambda,
        "del" => Kw::Del,
        "assert" => Kw::Assert,
        "global" => Kw::Global,
        "is" => Kw::Is,
        "async" => Kw::Async,
        "await" => Kw::Await,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    indent_stack: Vec<usize>,
    bracket_depth: usize,
    tokens: Vec<Token>,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            indent_stack: vec![0],
            bracket_depth: 0,
            tokens: Vec::new(),
            at_line_start: true,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, InterpreterError> {
        while self.pos < self.src.len() {
            if self.at_line_start && self.bracket_depth == 0 {
                self.handle_indentation()?;
                if self.pos >= self.src.len() {
                    break;
                }
            }
            let c = self.src[self.pos];
            match c {
                b' ' | b'\t' | b'\r' => {
                    self.pos += 1;
                }
                b'#' => {
                    while self.pos < self.src.len() && self.src[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b'\\' if self.peek(1) == Some(b'\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                b'\n' => {
                    self.pos += 1;
                    if self.bracket_depth == 0 {
                        if !matches!(
                            self.tokens.last().map(|t| &t.tok),
                            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
                        ) {
                            self.push(Tok::Newline);
                        }
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                b'0'..=b'9' => self.lex_number()?,
                b'"' | b'\'' => {
                    let s = self.lex_string(false)?;
                    self.push(Tok::Str(s));
                }
                b'.' if matches!(self.peek(1), Some(b'0'..=b'9')) => self.lex_number()?,
                c if c == b'_' || c.is_ascii_alphabetic() => self.lex_word()?,
                _ => self.lex_operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::EndOfFile);
        Ok(self.tokens)
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn syntax_error(&self, message: impl Into<String>) -> InterpreterError {
        InterpreterError::syntax(self.line, message)
    }

    fn handle_indentation(&mut self) -> Result<(), InterpreterError> {
        loop {
            let mut width = 0usize;
            let start = self.pos;
            while let Some(c) = self.peek(0) {
                match c {
                    b' ' => width += 1,
                    b'\t' => width += 8 - width % 8,
                    _ => break,
                }
                self.pos += 1;
            }
            match self.peek(0) {
                // blank or comment-only line: no indentation significance
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                    continue;
                }
                Some(b'#') => {
                    while self.pos < self.src.len() && self.src[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                    continue;
                }
                Some(b'\r') => {
                    self.pos += 1;
                    continue;
                }
                None => {
                    self.pos = start.max(self.pos);
                    return Ok(());
                }
                _ => {}
            }

            let current = *self.indent_stack.last().unwrap();
            if width > current {
                self.indent_stack.push(width);
                self.push(Tok::Indent);
            } else if width < current {
                while *self.indent_stack.last().unwrap() > width {
                    self.indent_stack.pop();
                    self.push(Tok::Dedent);
                }
                if *self.indent_stack.last().unwrap() != width {
                    return Err(self.syntax_error("unindent does not match any outer indentation level"));
                }
            }
            self.at_line_start = false;
            return Ok(());
        }
    }

    fn lex_number(&mut self) -> Result<(), InterpreterError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            match c {
                b'0'..=b'9' | b'_' => self.pos += 1,
                b'.' if !is_float && !matches!(self.peek(1), Some(b'.')) => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E'
                    if matches!(self.peek(1), Some(b'0'..=b'9'))
                        || (matches!(self.peek(1), Some(b'+') | Some(b'-'))
                            && matches!(self.peek(2), Some(b'0'..=b'9'))) =>
                {
                    is_float = true;
                    self.pos += 2;
                }
                _ => break,
            }
        }
        let text: String = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .replace('_', "");
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.syntax_error(format!("invalid float literal: {text}")))?;
            self.push(Tok::Float(value));
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.push(Tok::Int(value)),
                // Integers beyond i64 degrade to floats.
                Err(_) => {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| self.syntax_error(format!("invalid int literal: {text}")))?;
                    self.push(Tok::Float(value));
                }
            }
        }
        Ok(())
    }

    fn lex_word(&mut self) -> Result<(), InterpreterError> {
        let start = self.pos;
        while let Some(c) = self.peek(0) {
            if c == b'_' || c.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("").to_string();

        // string prefixes: f"...", r"...", b"..." (b treated as plain)
        if matches!(self.peek(0), Some(b'"') | Some(b'\'')) {
            match word.as_str() {
                "f" | "F" => {
                    let s = self.lex_string(false)?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                "r" | "R" => {
                    let s = self.lex_string(true)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                "b" | "B" | "u" | "U" => {
                    let s = self.lex_string(false)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                _ => {}
            }
        }

        match keyword_of(&word) {
            Some(kw) => self.push(Tok::Keyword(kw)),
            None => self.push(Tok::Name(word)),
        }
        Ok(())
    }

    fn lex_string(&mut self, raw: bool) -> Result<String, InterpreterError> {
        let quote = self.src[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(self.syntax_error("unterminated string literal"));
            };
            if triple {
                if c == quote && self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            } else if c == quote {
                self.pos += 1;
                break;
            } else if c == b'\n' {
                return Err(self.syntax_error("unterminated string literal"));
            }

            if c == b'\\' && !raw {
                let esc = self
                    .peek(1)
                    .ok_or_else(|| self.syntax_error("unterminated string literal"))?;
                self.pos += 2;
                match esc {
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    b'r' => out.push('\r'),
                    b'0' => out.push('\0'),
                    b'\\' => out.push('\\'),
                    b'\'' => out.push('\''),
                    b'"' => out.push('"'),
                    b'\n' => {
                        self.line += 1;
                    }
                    b'x' => {
                        let h1 = self.peek(0);
                        let h2 = self.peek(1);
                        if let (Some(h1), Some(h2)) = (h1, h2) {
                            let hex = format!("{}{}", h1 as char, h2 as char);
                            if let Ok(code) = u8::from_str_radix(&hex, 16) {
                                out.push(code as char);
                                self.pos += 2;
                                continue;
                            }
                        }
                        return Err(self.syntax_error("invalid \\x escape"));
                    }
                    other => {
                        out.push('\\');
                        out.push(other as char);
                    }
                }
            } else {
                if c == b'\n' {
                    self.line += 1;
                }
                // handle multi-byte UTF-8 sequences as-is
                let char_len = utf8_len(c);
                let end = (self.pos + char_len).min(self.src.len());
                out.push_str(std::str::from_utf8(&self.src[self.pos..end]).unwrap_or("\u{fffd}"));
                self.pos = end;
            }
        }
        Ok(out)
    }

    fn lex_operator(&mut self) -> Result<(), InterpreterError> {
        use Op::*;
        let c = self.src[self.pos];
        let c1 = self.peek(1);
        let c2 = self.peek(2);

        let (op, len) = match (c, c1, c2) {
            (b'*', Some(b'*'), Some(b'=')) => (DoubleStarAssign, 3),
            (b'/', Some(b'/'), Some(b'=')) => (DoubleSlashAssign, 3),
            (b'*', Some(b'*'), _) => (DoubleStar, 2),
            (b'/', Some(b'/'), _) => (DoubleSlash, 2),
            (b'<', Some(b'<'), _) => (LShift, 2),
            (b'>', Some(b'>'), _) => (RShift, 2),
            (b'<', Some(b'='), _) => (LtE, 2),
            (b'>', Some(b'='), _) => (GtE, 2),
            (b'=', Some(b'='), _) => (EqEq, 2),
            (b'!', Some(b'='), _) => (NotEq, 2),
            (b'+', Some(b'='), _) => (PlusAssign, 2),
            (b'-', Some(b'='), _) => (MinusAssign, 2),
            (b'*', Some(b'='), _) => (StarAssign, 2),
            (b'/', Some(b'='), _) => (SlashAssign, 2),
            (b'%', Some(b'='), _) => (PercentAssign, 2),
            (b'&', Some(b'='), _) => (AmpAssign, 2),
            (b'|', Some(b'='), _) => (PipeAssign, 2),
            (b'^', Some(b'='), _) => (CaretAssign, 2),
            (b'-', Some(b'>'), _) => (Arrow, 2),
            (b'+', _, _) => (Plus, 1),
            (b'-', _, _) => (Minus, 1),
            (b'*', _, _) => (Star, 1),
            (b'/', _, _) => (Slash, 1),
            (b'%', _, _) => (Percent, 1),
            (b'@', _, _) => (At, 1),
            (b'&', _, _) => (Amp, 1),
            (b'|', _, _) => (Pipe, 1),
            (b'^', _, _) => (Caret, 1),
            (b'~', _, _) => (Tilde, 1),
            (b'<', _, _) => (Lt, 1),
            (b'>', _, _) => (Gt, 1),
            (b'=', _, _) => (Assign, 1),
            (b'(', _, _) => (LParen, 1),
            (b')', _, _) => (RParen, 1),
            (b'[', _, _) => (LBracket, 1),
            (b']', _, _) => (RBracket, 1),
            (b'{', _, _) => (LBrace, 1),
            (b'}', _, _) => (RBrace, 1),
            (b',', _, _) => (Comma, 1),
            (b':', _, _) => (Colon, 1),
            (b'.', _, _) => (Dot, 1),
            (b';', _, _) => (Semicolon, 1),
            _ => {
                return Err(self.syntax_error(format!("unexpected character: {:?}", c as char)));
            }
        };

        match op {
            LParen | LBracket | LBrace => self.bracket_depth += 1,
            RParen | RBracket | RBrace => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1)
            }
            _ => {}
        }
        self.pos += len;
        self.push(Tok::Op(op));
        Ok(())
    }
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
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
    fn test_simple_expression() {
        assert_eq!(
            toks("x = 1 + 2"),
            vec![
                Tok::Name("x".into()),
                Tok::Op(Op::Assign),
                Tok::Int(1),
                Tok::Op(Op::Plus),
                Tok::Int(2),
                Tok::Newline,
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_indentation_blocks() {
        let tokens = toks("if x:\n    y = 1\nz = 2\n");
        assert!(tokens.contains(&Tok::Indent));
        assert!(tokens.contains(&Tok::Dedent));
    }

    #[test]
    fn test_blank_lines_do_not_dedent() {
        let tokens = toks("if x:\n    y = 1\n\n    z = 2\n");
        let dedents = tokens.iter().filter(|t| **t == Tok::Dedent).count();
        assert_eq!(dedents, 1);
    }

    #[test]
    fn test_string_escapes_and_fstring() {
        assert_eq!(toks(r#"'a\nb'"#)[0], Tok::Str("a\nb".into()));
        assert_eq!(toks(r#"f"v={x}""#)[0], Tok::FStr("v={x}".into()));
        assert_eq!(toks("'''multi\nline'''")[0], Tok::Str("multi\nline".into()));
    }

    #[test]
    fn test_newlines_suppressed_in_brackets() {
        let tokens = toks("x = [1,\n     2]\n");
        let newlines = tokens.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_float_and_int_literals() {
        assert_eq!(toks("1.5")[0], Tok::Float(1.5));
        assert_eq!(toks("10_000")[0], Tok::Int(10000));
        assert_eq!(toks("2e3")[0], Tok::Float(2000.0));
    }
}
