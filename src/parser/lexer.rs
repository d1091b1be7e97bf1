//! Tokenizer for the statement language. Keywords are case-insensitive;
//! identifiers may be back-quoted to escape keywords and punctuation.

use crate::error::{EngineError, ErrorKind, SourceLocation};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    QuotedIdentifier(String),
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    Variable(String),
    EnvVar(String),
    RuntimeInfo(String),
    Flag(String),
    Symbol(Symbol),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    LeftParen,
    RightParen,
    Comma,
    Dot,
    Semicolon,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Identical,
    Concat,
    Assign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: SourceLocation,
}

impl Token {
    /// Uppercased text for keyword matching; empty for non-words.
    pub fn keyword(&self) -> String {
        match &self.kind {
            TokenKind::Identifier(s) => s.to_ascii_uppercase(),
            _ => String::new(),
        }
    }
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }

    fn error(&self, message: String) -> EngineError {
        EngineError::new(ErrorKind::Syntax, message).with_location(self.location())
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), EngineError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = self.location();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(EngineError::new(
                                    ErrorKind::Syntax,
                                    "block comment is not terminated",
                                )
                                .with_location(start));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn scan_string(&mut self, quote: u8) -> Result<String, EngineError> {
        let start = self.location();
        self.bump();
        let mut out = Vec::new();
        loop {
            match self.bump() {
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push(b'\n'),
                    Some(b't') => out.push(b'\t'),
                    Some(b'r') => out.push(b'\r'),
                    Some(b) => out.push(b),
                    None => {
                        return Err(EngineError::new(
                            ErrorKind::Syntax,
                            "string literal is not terminated",
                        )
                        .with_location(start));
                    }
                },
                Some(b) if b == quote => {
                    // A doubled quote is a literal quote character.
                    if self.peek() == Some(quote) {
                        out.push(quote);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Some(b) => out.push(b),
                None => {
                    return Err(EngineError::new(
                        ErrorKind::Syntax,
                        "string literal is not terminated",
                    )
                    .with_location(start));
                }
            }
        }
        String::from_utf8(out).map_err(|_| {
            EngineError::new(ErrorKind::Syntax, "string literal is not valid utf-8")
                .with_location(start)
        })
    }

    fn scan_word(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn scan_number(&mut self) -> Result<TokenKind, EngineError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => {
                    self.bump();
                }
                b'.' if !is_float && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => {
                    is_float = true;
                    self.bump();
                }
                b'e' | b'E'
                    if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit())
                        || (matches!(self.peek_at(1), Some(b'+') | Some(b'-'))
                            && matches!(self.peek_at(2), Some(d) if d.is_ascii_digit())) =>
                {
                    is_float = true;
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::FloatLiteral)
                .map_err(|_| self.error(format!("invalid numeric literal {text}")))
        } else {
            match text.parse::<i64>() {
                Ok(i) => Ok(TokenKind::IntegerLiteral(i)),
                // Out-of-range integer literals widen to floats.
                Err(_) => text
                    .parse::<f64>()
                    .map(TokenKind::FloatLiteral)
                    .map_err(|_| self.error(format!("invalid numeric literal {text}"))),
            }
        }
    }
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, EngineError> {
    let mut scanner = Scanner::new(src);
    let mut tokens = Vec::new();
    loop {
        scanner.skip_whitespace_and_comments()?;
        let loc = scanner.location();
        let Some(b) = scanner.peek() else {
            tokens.push(Token {
                kind: TokenKind::Eof,
                loc,
            });
            return Ok(tokens);
        };
        let kind = match b {
            b'\'' | b'"' => TokenKind::StringLiteral(scanner.scan_string(b)?),
            b'`' => {
                let text = scanner.scan_string(b'`')?;
                TokenKind::QuotedIdentifier(text)
            }
            b'0'..=b'9' => scanner.scan_number()?,
            b'@' => {
                scanner.bump();
                match scanner.peek() {
                    Some(b'@') => {
                        scanner.bump();
                        TokenKind::Flag(scanner.scan_word())
                    }
                    Some(b'%') => {
                        scanner.bump();
                        if scanner.peek() == Some(b'`') {
                            TokenKind::EnvVar(scanner.scan_string(b'`')?)
                        } else {
                            TokenKind::EnvVar(scanner.scan_word())
                        }
                    }
                    Some(b'#') => {
                        scanner.bump();
                        TokenKind::RuntimeInfo(scanner.scan_word())
                    }
                    _ => {
                        let name = scanner.scan_word();
                        if name.is_empty() {
                            return Err(scanner.error("variable name is missing".to_string()));
                        }
                        TokenKind::Variable(name)
                    }
                }
            }
            b'(' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::LeftParen)
            }
            b')' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::RightParen)
            }
            b',' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Comma)
            }
            b'.' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Dot)
            }
            b';' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Semicolon)
            }
            b'+' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Plus)
            }
            b'-' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Minus)
            }
            b'*' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Asterisk)
            }
            b'/' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Slash)
            }
            b'%' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Percent)
            }
            b'=' => {
                scanner.bump();
                TokenKind::Symbol(Symbol::Equal)
            }
            b'!' => {
                scanner.bump();
                if scanner.peek() == Some(b'=') {
                    scanner.bump();
                    TokenKind::Symbol(Symbol::NotEqual)
                } else {
                    return Err(scanner.error("unexpected character '!'".to_string()));
                }
            }
            b'<' => {
                scanner.bump();
                match scanner.peek() {
                    Some(b'=') => {
                        scanner.bump();
                        if scanner.peek() == Some(b'>') {
                            scanner.bump();
                            TokenKind::Symbol(Symbol::Identical)
                        } else {
                            TokenKind::Symbol(Symbol::LessOrEqual)
                        }
                    }
                    Some(b'>') => {
                        scanner.bump();
                        TokenKind::Symbol(Symbol::NotEqual)
                    }
                    _ => TokenKind::Symbol(Symbol::Less),
                }
            }
            b'>' => {
                scanner.bump();
                if scanner.peek() == Some(b'=') {
                    scanner.bump();
                    TokenKind::Symbol(Symbol::GreaterOrEqual)
                } else {
                    TokenKind::Symbol(Symbol::Greater)
                }
            }
            b'|' => {
                scanner.bump();
                if scanner.peek() == Some(b'|') {
                    scanner.bump();
                    TokenKind::Symbol(Symbol::Concat)
                } else {
                    return Err(scanner.error("unexpected character '|'".to_string()));
                }
            }
            b':' => {
                scanner.bump();
                if scanner.peek() == Some(b'=') {
                    scanner.bump();
                    TokenKind::Symbol(Symbol::Assign)
                } else {
                    return Err(scanner.error("unexpected character ':'".to_string()));
                }
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let word = scanner.scan_word();
                TokenKind::Identifier(word)
            }
            other => {
                // Multi-byte identifiers (file names, column names) pass
                // through as identifier text up to the next delimiter.
                if other >= 0x80 {
                    let start = scanner.pos;
                    while let Some(b) = scanner.peek() {
                        if b >= 0x80 || b.is_ascii_alphanumeric() || b == b'_' {
                            scanner.bump();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Identifier(
                        String::from_utf8_lossy(&scanner.src[start..scanner.pos]).into_owned(),
                    )
                } else {
                    return Err(
                        scanner.error(format!("unexpected character '{}'", other as char))
                    );
                }
            }
        };
        tokens.push(Token { kind, loc });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_select_tokens() {
        let tokens = kinds("SELECT id, name FROM users;");
        assert_eq!(tokens[0], TokenKind::Identifier("SELECT".into()));
        assert_eq!(tokens[1], TokenKind::Identifier("id".into()));
        assert_eq!(tokens[2], TokenKind::Symbol(Symbol::Comma));
        assert_eq!(tokens[6], TokenKind::Symbol(Symbol::Semicolon));
    }

    #[test]
    fn scans_variables_and_flags() {
        let tokens = kinds("@id := @%HOME || @@REPOSITORY @#VERSION");
        assert_eq!(tokens[0], TokenKind::Variable("id".into()));
        assert_eq!(tokens[1], TokenKind::Symbol(Symbol::Assign));
        assert_eq!(tokens[2], TokenKind::EnvVar("HOME".into()));
        assert_eq!(tokens[3], TokenKind::Symbol(Symbol::Concat));
        assert_eq!(tokens[4], TokenKind::Flag("REPOSITORY".into()));
        assert_eq!(tokens[5], TokenKind::RuntimeInfo("VERSION".into()));
    }

    #[test]
    fn scans_numbers() {
        assert_eq!(kinds("42")[0], TokenKind::IntegerLiteral(42));
        assert_eq!(kinds("1.5")[0], TokenKind::FloatLiteral(1.5));
        assert_eq!(kinds("1e3")[0], TokenKind::FloatLiteral(1000.0));
        // Dot not followed by a digit is member access, not a float.
        let tokens = kinds("t.1x");
        assert_eq!(tokens[1], TokenKind::Symbol(Symbol::Dot));
    }

    #[test]
    fn string_escapes_and_doubling() {
        assert_eq!(
            kinds(r"'it''s'")[0],
            TokenKind::StringLiteral("it's".into())
        );
        assert_eq!(
            kinds(r"'a\nb'")[0],
            TokenKind::StringLiteral("a\nb".into())
        );
    }

    #[test]
    fn comparison_operators() {
        let tokens = kinds("<= >= <> != <=> =");
        assert_eq!(tokens[0], TokenKind::Symbol(Symbol::LessOrEqual));
        assert_eq!(tokens[1], TokenKind::Symbol(Symbol::GreaterOrEqual));
        assert_eq!(tokens[2], TokenKind::Symbol(Symbol::NotEqual));
        assert_eq!(tokens[3], TokenKind::Symbol(Symbol::NotEqual));
        assert_eq!(tokens[4], TokenKind::Symbol(Symbol::Identical));
        assert_eq!(tokens[5], TokenKind::Symbol(Symbol::Equal));
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = kinds("SELECT -- trailing\n 1 /* block */ ;");
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn tracks_line_and_column() {
        let tokens = tokenize("SELECT\n  name").unwrap();
        assert_eq!(tokens[1].loc, SourceLocation::new(2, 3));
    }
}
