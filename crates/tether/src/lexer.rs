//! Tokenizer for the supported Python subset.
//!
//! Produces a flat token list with explicit `Newline`, `Indent` and `Dedent` tokens, so
//! the parser never looks at whitespace. Newlines inside brackets and after a `\`
//! continuation are dropped, blank and comment-only lines produce nothing.

use std::{fmt, str::FromStr};

use num_bigint::BigInt;
use num_traits::{Num, ToPrimitive};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    exception_public::{CodeLoc, CodeRange},
    parse::ParseError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Keyword {
    #[strum(serialize = "False")]
    False,
    #[strum(serialize = "None")]
    None,
    #[strum(serialize = "True")]
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

/// Operators and delimiters; `Display` gives the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub(crate) enum Op {
    #[strum(serialize = "(")]
    LParen,
    #[strum(serialize = ")")]
    RParen,
    #[strum(serialize = "[")]
    LBracket,
    #[strum(serialize = "]")]
    RBracket,
    #[strum(serialize = "{")]
    LBrace,
    #[strum(serialize = "}")]
    RBrace,
    #[strum(serialize = ",")]
    Comma,
    #[strum(serialize = ":")]
    Colon,
    #[strum(serialize = ";")]
    Semicolon,
    #[strum(serialize = ".")]
    Dot,
    #[strum(serialize = "->")]
    Arrow,
    #[strum(serialize = "@")]
    At,
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = ":=")]
    Walrus,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "*")]
    Star,
    #[strum(serialize = "**")]
    DoubleStar,
    #[strum(serialize = "/")]
    Slash,
    #[strum(serialize = "//")]
    DoubleSlash,
    #[strum(serialize = "%")]
    Percent,
    #[strum(serialize = "&")]
    Amper,
    #[strum(serialize = "|")]
    Pipe,
    #[strum(serialize = "^")]
    Caret,
    #[strum(serialize = "~")]
    Tilde,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    LtE,
    #[strum(serialize = ">=")]
    GtE,
    #[strum(serialize = "==")]
    EqEq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "+=")]
    PlusEq,
    #[strum(serialize = "-=")]
    MinusEq,
    #[strum(serialize = "*=")]
    StarEq,
    #[strum(serialize = "**=")]
    DoubleStarEq,
    #[strum(serialize = "/=")]
    SlashEq,
    #[strum(serialize = "//=")]
    DoubleSlashEq,
    #[strum(serialize = "%=")]
    PercentEq,
    #[strum(serialize = "&=")]
    AmperEq,
    #[strum(serialize = "|=")]
    PipeEq,
    #[strum(serialize = "^=")]
    CaretEq,
    #[strum(serialize = "<<=")]
    LShiftEq,
    #[strum(serialize = ">>=")]
    RShiftEq,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.into())
    }
}

/// Longest first, so `**=` wins over `**` and `*`.
const OPERATORS: &[(&str, Op)] = &[
    ("**=", Op::DoubleStarEq),
    ("//=", Op::DoubleSlashEq),
    ("<<=", Op::LShiftEq),
    (">>=", Op::RShiftEq),
    ("**", Op::DoubleStar),
    ("//", Op::DoubleSlash),
    ("<<", Op::LShift),
    (">>", Op::RShift),
    ("<=", Op::LtE),
    (">=", Op::GtE),
    ("==", Op::EqEq),
    ("!=", Op::NotEq),
    ("->", Op::Arrow),
    (":=", Op::Walrus),
    ("+=", Op::PlusEq),
    ("-=", Op::MinusEq),
    ("*=", Op::StarEq),
    ("/=", Op::SlashEq),
    ("%=", Op::PercentEq),
    ("&=", Op::AmperEq),
    ("|=", Op::PipeEq),
    ("^=", Op::CaretEq),
    ("(", Op::LParen),
    (")", Op::RParen),
    ("[", Op::LBracket),
    ("]", Op::RBracket),
    ("{", Op::LBrace),
    ("}", Op::RBrace),
    (",", Op::Comma),
    (":", Op::Colon),
    (";", Op::Semicolon),
    (".", Op::Dot),
    ("@", Op::At),
    ("=", Op::Assign),
    ("+", Op::Plus),
    ("-", Op::Minus),
    ("*", Op::Star),
    ("/", Op::Slash),
    ("%", Op::Percent),
    ("&", Op::Amper),
    ("|", Op::Pipe),
    ("^", Op::Caret),
    ("~", Op::Tilde),
    ("<", Op::Lt),
    (">", Op::Gt),
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Name(String),
    Keyword(Keyword),
    Int(i64),
    LongInt(BigInt),
    Float(f64),
    /// A string literal with escapes already processed.
    Str(String),
    /// The raw text between the quotes of an f-string; the parser splits it.
    FString {
        content: String,
        raw: bool,
        /// Location of the first character after the opening quotes.
        content_start: CodeLoc,
    },
    Op(Op),
    Newline,
    Indent,
    Dedent,
    EndOfFile,
}

impl Tok {
    /// How the token is named in "invalid syntax" messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Name(name) => format!("'{name}'"),
            Self::Keyword(kw) => format!("'{kw}'"),
            Self::Int(_) | Self::LongInt(_) | Self::Float(_) => "number".to_owned(),
            Self::Str(_) | Self::FString { .. } => "string".to_owned(),
            Self::Op(op) => format!("'{op}'"),
            Self::Newline => "end of line".to_owned(),
            Self::Indent => "indent".to_owned(),
            Self::Dedent => "dedent".to_owned(),
            Self::EndOfFile => "end of file".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub tok: Tok,
    pub range: CodeRange,
}

/// Tokenizes a whole module.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source, CodeLoc::new(1, 1)).run()
}

/// Tokenizes a fragment of a larger source, e.g. an f-string replacement field.
///
/// Fragments are a single logical line, so leading whitespace is not indentation.
pub(crate) fn tokenize_at(source: &str, start: CodeLoc) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source, start);
    lexer.at_line_start = false;
    lexer.bracket_depth = 1;
    lexer.run()
}

/// Open brackets allowed at once.
const MAX_BRACKET_DEPTH: usize = 100;

/// Nested indented blocks allowed at once.
const MAX_INDENT_LEVELS: usize = 100;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    indent_stack: Vec<usize>,
    /// Open brackets; newlines and indentation are ignored while positive.
    bracket_depth: usize,
    at_line_start: bool,
}

impl Lexer {
    fn new(source: &str, start: CodeLoc) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: start.line,
            column: start.column,
            tokens: Vec::new(),
            indent_stack: vec![0],
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn loc(&self) -> CodeLoc {
        CodeLoc::new(self.line, self.column)
    }

    fn push(&mut self, tok: Tok, start: CodeLoc) {
        self.tokens.push(Token {
            tok,
            range: CodeRange::new(start, self.loc()),
        });
    }

    fn error(&self, msg: impl Into<String>, start: CodeLoc) -> ParseError {
        ParseError::syntax(msg.into(), CodeRange::new(start, self.loc()))
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline | Tok::Indent | Tok::Dedent)
        )
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
                continue;
            }
            let Some(c) = self.peek() else { break };
            let start = self.loc();
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.bump() != Some('\n') {
                        return Err(self.error("unexpected character after line continuation character", start));
                    }
                }
                '\n' => {
                    if self.bracket_depth == 0 && !self.last_is_newline() {
                        self.push(Tok::Newline, start);
                    }
                    self.bump();
                    if self.bracket_depth == 0 {
                        self.at_line_start = true;
                    }
                }
                '0'..='9' => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.lex_number()?,
                '\'' | '"' => self.lex_string(false, false, start)?,
                c if c == '_' || c.is_alphabetic() => self.lex_name()?,
                _ => self.lex_operator()?,
            }
        }

        let end = self.loc();
        if !self.last_is_newline() {
            self.push(Tok::Newline, end);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(Tok::Dedent, end);
        }
        self.push(Tok::EndOfFile, end);
        Ok(self.tokens)
    }

    /// Measures the indentation of a new logical line and emits indent/dedent tokens.
    ///
    /// Returns false at end of input.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0;
        loop {
            match self.peek() {
                Some(' ') => width += 1,
                Some('\t') => width = (width / 8 + 1) * 8,
                Some('\x0c' | '\r') => {}
                _ => break,
            }
            self.bump();
        }
        match self.peek() {
            None => return Ok(false),
            // blank and comment-only lines don't affect indentation
            Some('\n') => {
                self.bump();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            Some(_) => {}
        }
        self.at_line_start = false;
        let start = self.loc();
        let current = *self.indent_stack.last().unwrap_or(&0);
        if width > current {
            if self.tokens.is_empty() {
                return Err(self.error("unexpected indent", start));
            }
            if self.indent_stack.len() > MAX_INDENT_LEVELS {
                return Err(self.error("too many levels of indentation", start));
            }
            self.indent_stack.push(width);
            self.push(Tok::Indent, start);
        } else {
            while width < *self.indent_stack.last().unwrap_or(&0) {
                self.indent_stack.pop();
                self.push(Tok::Dedent, start);
            }
            if width != *self.indent_stack.last().unwrap_or(&0) {
                return Err(self.error("unindent does not match any outer indentation level", start));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.bump();
        }
    }

    fn lex_name(&mut self) -> Result<(), ParseError> {
        let start = self.loc();
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('\'' | '"')) {
            let prefix = name.to_ascii_lowercase();
            match prefix.as_str() {
                "r" | "u" => return self.lex_string(prefix == "r", false, start),
                "f" => return self.lex_string(false, true, start),
                "rf" | "fr" => return self.lex_string(true, true, start),
                "b" | "br" | "rb" => return Err(self.error("bytes literals are not supported", start)),
                _ => {}
            }
        }
        let tok = match Keyword::from_str(&name) {
            Ok(kw) => Tok::Keyword(kw),
            Err(_) => Tok::Name(name),
        };
        self.push(tok, start);
        Ok(())
    }

    fn lex_string(&mut self, raw: bool, fstring: bool, start: CodeLoc) -> Result<(), ParseError> {
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let content_start = self.loc();
        let mut content = String::new();
        loop {
            let Some(c) = self.peek() else {
                let msg = if triple {
                    format!("unterminated triple-quoted string literal (detected at line {})", self.line)
                } else {
                    format!("unterminated string literal (detected at line {})", start.line)
                };
                return Err(self.error(msg, start));
            };
            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
            } else if c == '\n' && !triple {
                return Err(self.error(
                    format!("unterminated string literal (detected at line {})", start.line),
                    start,
                ));
            } else if c == '\\' {
                // an escaped character never terminates the string, even in raw strings
                content.push(c);
                self.bump();
                if let Some(next) = self.bump() {
                    content.push(next);
                }
                continue;
            }
            content.push(c);
            self.bump();
        }

        let tok = if fstring {
            Tok::FString {
                content,
                raw,
                content_start,
            }
        } else if raw {
            Tok::Str(content)
        } else {
            Tok::Str(unescape(&content).map_err(|msg| self.error(msg, start))?)
        };
        self.push(tok, start);
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let start = self.loc();
        let radix = match (self.peek(), self.peek_at(1).map(|c| c.to_ascii_lowercase())) {
            (Some('0'), Some('x')) => Some(16),
            (Some('0'), Some('o')) => Some(8),
            (Some('0'), Some('b')) => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            self.bump();
            self.bump();
            let digits = self.take_digits(|c| c.is_digit(radix));
            if digits.is_empty() {
                return Err(self.error("invalid number literal", start));
            }
            let value = BigInt::from_str_radix(&digits, radix).map_err(|_| self.error("invalid number literal", start))?;
            return self.finish_int(value, start);
        }

        let mut text = self.take_digits(|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.bump();
                if sign_offset == 1 {
                    text.push(self.bump().unwrap_or('+'));
                }
                text.push_str(&self.take_digits(|c| c.is_ascii_digit()));
            }
        }
        if matches!(self.peek(), Some('j' | 'J')) {
            return Err(self.error("complex numbers are not supported", start));
        }
        if is_float {
            let value: f64 = text.parse().map_err(|_| self.error("invalid float literal", start))?;
            self.check_number_end(start)?;
            self.push(Tok::Float(value), start);
            return Ok(());
        }
        if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
            return Err(self.error(
                "leading zeros in decimal integer literals are not permitted; use an 0o prefix for octal integers",
                start,
            ));
        }
        let value = BigInt::from_str(&text).map_err(|_| self.error("invalid decimal literal", start))?;
        self.finish_int(value, start)
    }

    fn finish_int(&mut self, value: BigInt, start: CodeLoc) -> Result<(), ParseError> {
        self.check_number_end(start)?;
        let tok = match value.to_i64() {
            Some(i) => Tok::Int(i),
            None => Tok::LongInt(value),
        };
        self.push(tok, start);
        Ok(())
    }

    fn check_number_end(&self, start: CodeLoc) -> Result<(), ParseError> {
        if self.peek().is_some_and(|c| c == '_' || c.is_alphanumeric()) {
            Err(self.error("invalid decimal literal", start))
        } else {
            Ok(())
        }
    }

    /// Digits accepted by `is_digit`, with single `_` separators between them removed.
    fn take_digits(&mut self, is_digit: impl Fn(char) -> bool) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if is_digit(c) {
                digits.push(c);
            } else if c == '_' && !digits.is_empty() && self.peek_at(1).is_some_and(&is_digit) {
                // separator
            } else {
                break;
            }
            self.bump();
        }
        digits
    }

    fn lex_operator(&mut self) -> Result<(), ParseError> {
        let start = self.loc();
        for (text, op) in OPERATORS {
            let matches = text.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                for _ in 0..text.len() {
                    self.bump();
                }
                match op {
                    Op::LParen | Op::LBracket | Op::LBrace => {
                        self.bracket_depth += 1;
                        if self.bracket_depth > MAX_BRACKET_DEPTH {
                            return Err(self.error("too many nested parentheses", start));
                        }
                    }
                    Op::RParen | Op::RBracket | Op::RBrace => {
                        self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    }
                    _ => {}
                }
                self.push(Tok::Op(*op), start);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{c}' (U+{:04X})", u32::from(c)), start))
    }
}

/// Processes backslash escapes in the text of a string literal.
///
/// Unknown escapes keep their backslash, as Python does.
pub(crate) fn unescape(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escaped) = chars.next() else {
            out.push('\\');
            break;
        };
        match escaped {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(escaped),
            'N' => return Err("(unicode error) \\N{...} escapes are not supported".to_owned()),
            'x' | 'u' | 'U' => {
                let len = match escaped {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = (0..len).filter_map(|_| chars.next()).collect();
                let code = (hex.len() == len)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .ok_or_else(|| format!("(unicode error) truncated \\{escaped} escape"))?;
                let ch = char::from_u32(code).ok_or_else(|| "(unicode error) illegal Unicode character".to_owned())?;
                out.push(ch);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn indentation_produces_block_tokens() {
        let source = "if x:\n    y = 1\n\n    # comment\nz\n";
        assert_eq!(
            toks(source),
            vec![
                Tok::Keyword(Keyword::If),
                Tok::Name("x".to_owned()),
                Tok::Op(Op::Colon),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".to_owned()),
                Tok::Op(Op::Assign),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".to_owned()),
                Tok::Newline,
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn brackets_join_lines() {
        assert_eq!(
            toks("f(1,\n  2)"),
            vec![
                Tok::Name("f".to_owned()),
                Tok::Op(Op::LParen),
                Tok::Int(1),
                Tok::Op(Op::Comma),
                Tok::Int(2),
                Tok::Op(Op::RParen),
                Tok::Newline,
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("0x_ff")[0], Tok::Int(255));
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("1.5e3")[0], Tok::Float(1500.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
        assert!(matches!(toks("99999999999999999999")[0], Tok::LongInt(_)));
        assert!(tokenize("012").is_err());
        assert!(tokenize("1j").is_err());
    }

    #[test]
    fn strings() {
        assert_eq!(toks(r#"'a\tb\x41\u00e9'"#)[0], Tok::Str("a\tbA\u{e9}".to_owned()));
        assert_eq!(toks(r"r'a\n'")[0], Tok::Str("a\\n".to_owned()));
        assert_eq!(toks("'''a\nb'''")[0], Tok::Str("a\nb".to_owned()));
        assert_eq!(
            toks("f'{x!r}'")[0],
            Tok::FString {
                content: "{x!r}".to_owned(),
                raw: false,
                content_start: CodeLoc::new(1, 3),
            }
        );
        let err = tokenize("x = 'abc").unwrap_err();
        assert!(err.message().starts_with("unterminated string literal"));
        assert!(tokenize("b'x'").is_err());
    }

    #[test]
    fn named_unicode_escapes_are_rejected() {
        let err = tokenize(r"x = '\N{EM DASH}'").unwrap_err();
        assert_eq!(err.message(), r"(unicode error) \N{...} escapes are not supported");
        assert_eq!(toks(r"r'\N{EM DASH}'")[0], Tok::Str(r"\N{EM DASH}".to_owned()));
    }

    #[test]
    fn braces_display_as_source_text() {
        assert_eq!(Op::LBrace.to_string(), "{");
        assert_eq!(Op::RBrace.to_string(), "}");
        assert_eq!(format!("{}", Op::DoubleStarEq), "**=");
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n    a\n  b\n").unwrap_err();
        assert_eq!(err.message(), "unindent does not match any outer indentation level");
    }
}
