//! Lexer for the Swell language
//!
//! Converts source text into tokens. Newlines are significant (they
//! terminate statements) and are emitted as tokens; runs of blank lines
//! collapse into the statement separators the parser expects. `//`
//! comments run to end of line.

use crate::token::{Token, TokenKind};
use swell_error::{
    span::{Position, Span},
    Diagnostic, ErrorCode, Result,
};

/// The Swell lexer
pub struct Lexer {
    /// Characters of the source being scanned
    chars: Vec<char>,
    /// Index into `chars`
    pos: usize,
    /// Current line (1-indexed)
    line: u32,
    /// Current column (1-indexed)
    column: u32,
    /// Byte offset into the source
    offset: usize,
    /// Source file ID for spans
    file_id: u32,
}

impl Lexer {
    pub fn new(source: &str, file_id: u32) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            offset: 0,
            file_id,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        self.offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn current_position(&self) -> Position {
        Position::new(self.line, self.column, self.offset)
    }

    fn make_span(&self, start: Position) -> Span {
        Span::new(start, self.current_position(), self.file_id)
    }

    /// Skips spaces, tabs, carriage returns and `//` comments
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_number(&mut self) -> Result<Token> {
        let start = self.current_position();
        let mut digits = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let value: i64 = digits.parse().map_err(|_| {
            Diagnostic::error(format!("integer literal {} is out of range", digits))
                .with_code(ErrorCode::INVALID_NUMBER)
                .with_label(self.make_span(start), "does not fit in 64 bits")
        })?;

        Ok(Token::new(TokenKind::IntLit(value), self.make_span(start)))
    }

    fn read_string(&mut self) -> Result<Token> {
        let start = self.current_position();
        self.advance(); // opening quote

        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(Diagnostic::error("unterminated string literal")
                        .with_code(ErrorCode::UNTERMINATED_STRING)
                        .with_label(self.make_span(start), "string starts here")
                        .with_help("add a closing `\"` before the end of the line"));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        other => {
                            return Err(Diagnostic::error(format!(
                                "unknown escape sequence \\{}",
                                other.map(String::from).unwrap_or_default()
                            ))
                            .with_code(ErrorCode::UNEXPECTED_CHAR)
                            .with_label(self.make_span(start), "inside this string"));
                        }
                    };
                    value.push(escaped);
                    self.advance();
                }
                Some(ch) => {
                    value.push(ch);
                    self.advance();
                }
            }
        }

        Ok(Token::new(TokenKind::StringLit(value), self.make_span(start)))
    }

    fn read_ident(&mut self) -> Token {
        let start = self.current_position();
        let mut name = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = TokenKind::keyword(&name).unwrap_or(TokenKind::Ident(name));
        Token::new(kind, self.make_span(start))
    }

    /// Tokenizes the whole source, ending with `Eof`
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();

            let start = self.current_position();
            let Some(ch) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, Span::point(start, self.file_id)));
                return Ok(tokens);
            };

            match ch {
                '\n' => {
                    self.advance();
                    // Collapse runs of blank lines into one separator.
                    if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Newline) | None) {
                        tokens.push(Token::new(TokenKind::Newline, self.make_span(start)));
                    }
                }
                '"' => tokens.push(self.read_string()?),
                c if c.is_ascii_digit() => tokens.push(self.read_number()?),
                c if c.is_ascii_alphabetic() => tokens.push(self.read_ident()),
                _ => {
                    self.advance();
                    let kind = match ch {
                        '(' => TokenKind::LParen,
                        ')' => TokenKind::RParen,
                        '{' => TokenKind::LBrace,
                        '}' => TokenKind::RBrace,
                        '[' => TokenKind::LBracket,
                        ']' => TokenKind::RBracket,
                        ',' => TokenKind::Comma,
                        ':' => TokenKind::Colon,
                        '&' => TokenKind::Amp,
                        '+' => TokenKind::Plus,
                        '=' => TokenKind::Eq,
                        '<' => {
                            if self.peek() == Some('=') {
                                self.advance();
                                TokenKind::Le
                            } else {
                                TokenKind::Lt
                            }
                        }
                        '>' => {
                            if self.peek() == Some('=') {
                                self.advance();
                                TokenKind::Ge
                            } else {
                                TokenKind::Gt
                            }
                        }
                        other => {
                            return Err(Diagnostic::error(format!(
                                "unexpected character `{}`",
                                other
                            ))
                            .with_code(ErrorCode::UNEXPECTED_CHAR)
                            .with_label(self.make_span(start), "not valid in Swell source"));
                        }
                    };
                    tokens.push(Token::new(kind, self.make_span(start)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, 0)
            .tokenize()
            .expect("lexes")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_a_function_header() {
        let toks = kinds("func main(c: Clock): Clock {\n}\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Func,
                TokenKind::Ident("main".into()),
                TokenKind::LParen,
                TokenKind::Ident("c".into()),
                TokenKind::Colon,
                TokenKind::Ident("Clock".into()),
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Ident("Clock".into()),
                TokenKind::LBrace,
                TokenKind::Newline,
                TokenKind::RBrace,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn collapses_blank_lines_and_comments() {
        let toks = kinds("let x = 1\n\n\n// trailing comment\nset x = 2\n");
        let newlines = toks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("a <= b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Le,
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let toks = kinds(r#"let s = "a\"b\n""#);
        assert!(toks.contains(&TokenKind::StringLit("a\"b\n".into())));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("let s = \"oops\n", 0).tokenize().unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNTERMINATED_STRING));
    }

    #[test]
    fn rejects_stray_characters() {
        let err = Lexer::new("let x = 1 ; 2", 0).tokenize().unwrap_err();
        assert_eq!(err.code, Some(ErrorCode::UNEXPECTED_CHAR));
    }
}
