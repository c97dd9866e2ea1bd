//! Lexer for Vortex
//!
//! Converts source code into a stream of tokens.

use crate::error::{Result, VortexError};
use crate::token::{lookup_keyword, Span, Token, TokenKind};

/// The lexer state
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
    /// Line and column of the last consumed character.
    last: (usize, usize),
    /// The previous token was `import`.
    after_import: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source code
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            last: (1, 1),
            after_import: false,
        }
    }

    /// Tokenize the entire source
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            self.after_import = token.kind == TokenKind::Import;
            tokens.push(token);
        }

        let here = (self.line, self.column);
        tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.current_pos, self.current_pos, here, here),
            String::new(),
        ));

        Ok(tokens)
    }

    /// Get the next token
    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace_and_comments();

        let Some(&(start_pos, ch)) = self.chars.peek() else {
            return Ok(None);
        };

        let start = (self.line, self.column);

        let kind = match ch {
            '.' | '@' if self.after_import => self.scan_import_path(),

            '(' => { self.advance(); TokenKind::LeftParen }
            ')' => { self.advance(); TokenKind::RightParen }
            '{' => { self.advance(); TokenKind::LeftBrace }
            '}' => { self.advance(); TokenKind::RightBrace }
            '[' => { self.advance(); TokenKind::LeftBracket }
            ']' => { self.advance(); TokenKind::RightBracket }
            ',' => { self.advance(); TokenKind::Comma }
            ';' => { self.advance(); TokenKind::Semicolon }
            '.' => { self.advance(); TokenKind::Dot }

            ':' => {
                self.advance();
                self.pick(&[("=", TokenKind::ColonEqual)], TokenKind::Colon)
            }
            '+' => {
                self.advance();
                self.pick(
                    &[
                        ("+=", TokenKind::PlusPlusEqual),
                        ("+", TokenKind::PlusPlus),
                        ("=", TokenKind::PlusEqual),
                    ],
                    TokenKind::Plus,
                )
            }
            '-' => {
                self.advance();
                self.pick(
                    &[("-", TokenKind::MinusMinus), ("=", TokenKind::MinusEqual)],
                    TokenKind::Minus,
                )
            }
            '*' => {
                self.advance();
                self.pick(
                    &[
                        ("*=", TokenKind::StarStarEqual),
                        ("*", TokenKind::StarStar),
                        ("=", TokenKind::StarEqual),
                    ],
                    TokenKind::Star,
                )
            }
            '/' => {
                self.advance();
                self.pick(&[("=", TokenKind::SlashEqual)], TokenKind::Slash)
            }
            '%' => {
                self.advance();
                self.pick(&[("=", TokenKind::PercentEqual)], TokenKind::Percent)
            }
            '&' => {
                self.advance();
                self.pick(
                    &[
                        ("&=", TokenKind::AmpAmpEqual),
                        ("&", TokenKind::AmpAmp),
                        ("=", TokenKind::AmpEqual),
                    ],
                    TokenKind::Amp,
                )
            }
            '|' => {
                self.advance();
                self.pick(
                    &[
                        ("|=", TokenKind::PipePipeEqual),
                        ("|", TokenKind::PipePipe),
                        ("=", TokenKind::PipeEqual),
                    ],
                    TokenKind::Pipe,
                )
            }
            '^' => {
                self.advance();
                self.pick(&[("=", TokenKind::CaretEqual)], TokenKind::Caret)
            }
            '=' => {
                self.advance();
                self.pick(
                    &[("=", TokenKind::EqualEqual), (">", TokenKind::FatArrow)],
                    TokenKind::Equal,
                )
            }
            '!' => {
                self.advance();
                self.pick(&[("=", TokenKind::BangEqual)], TokenKind::Bang)
            }
            '<' => {
                self.advance();
                self.pick(
                    &[
                        ("<=", TokenKind::ShlEqual),
                        ("<", TokenKind::Shl),
                        ("=", TokenKind::LessEqual),
                    ],
                    TokenKind::Less,
                )
            }
            '>' => {
                self.advance();
                self.pick(
                    &[
                        (">=", TokenKind::ShrEqual),
                        (">", TokenKind::Shr),
                        ("=", TokenKind::GreaterEqual),
                    ],
                    TokenKind::Greater,
                )
            }

            '\'' | '"' => self.scan_string(ch)?,

            c if c.is_ascii_digit() => self.scan_number()?,

            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            _ => {
                self.advance();
                return Err(VortexError::syntax(
                    format!("unexpected character '{}'", ch),
                    Span::new(start_pos, self.current_pos, start, start),
                ));
            }
        };

        let lexeme = self.source[start_pos..self.current_pos].to_string();

        Ok(Some(Token::new(
            kind,
            Span::new(start_pos, self.current_pos, start, self.last),
            lexeme,
        )))
    }

    /// Consume the first continuation in `options` that matches, longest
    /// options first.
    fn pick(&mut self, options: &[(&str, TokenKind)], otherwise: TokenKind) -> TokenKind {
        for (rest, kind) in options {
            if self.source[self.current_pos..].starts_with(rest) {
                for _ in rest.chars() {
                    self.advance();
                }
                return kind.clone();
            }
        }
        otherwise
    }

    /// Advance and return the current character
    fn advance(&mut self) -> Option<char> {
        let (pos, ch) = self.chars.next()?;
        self.current_pos = pos + ch.len_utf8();
        self.last = (self.line, self.column);
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    /// Peek at the next character without advancing
    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, ch)| ch)
    }

    /// Skip whitespace and comments
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            match ch {
                c if c.is_whitespace() => {
                    self.advance();
                }

                '/' if self.source[self.current_pos..].starts_with("//") => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }

                _ => break,
            }
        }
    }

    /// Scan a string literal delimited by `quote`
    fn scan_string(&mut self, quote: char) -> Result<TokenKind> {
        let start = (self.line, self.column);
        let start_pos = self.current_pos;

        // Consume opening quote
        self.advance();

        let mut value = String::new();

        loop {
            match self.peek_char() {
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(TokenKind::String(value));
                }
                Some('\\') => {
                    self.advance();
                    match self.advance() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('0') => value.push('\0'),
                        Some(c) => value.push(c),
                        None => break,
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
                None => break,
            }
        }

        Err(VortexError::syntax(
            "unterminated string",
            Span::new(start_pos, self.current_pos, start, self.last),
        ))
    }

    /// Scan an unquoted import path up to whitespace, `;` or `)`.
    fn scan_import_path(&mut self) -> TokenKind {
        let start = self.current_pos;
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || c == ';' || c == ')' {
                break;
            }
            self.advance();
        }
        TokenKind::ImportPath(self.source[start..self.current_pos].to_string())
    }

    /// Scan a number literal
    fn scan_number(&mut self) -> Result<TokenKind> {
        let start = self.current_pos;
        let from = (self.line, self.column);

        self.consume_digits();

        // A dot only belongs to the number if a digit follows it.
        if self.source[self.current_pos..].starts_with('.')
            && self.source[self.current_pos + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
        {
            self.advance();
            self.consume_digits();
        }

        if matches!(self.peek_char(), Some('e' | 'E')) {
            let rest = &self.source[self.current_pos + 1..];
            let digits = rest.strip_prefix(['+', '-']).unwrap_or(rest);
            if digits.starts_with(|c: char| c.is_ascii_digit()) {
                self.advance();
                if matches!(self.peek_char(), Some('+' | '-')) {
                    self.advance();
                }
                self.consume_digits();
            }
        }

        let text = &self.source[start..self.current_pos];
        text.parse::<f64>().map(TokenKind::Number).map_err(|_| {
            VortexError::syntax(
                format!("invalid number '{}'", text),
                Span::new(start, self.current_pos, from, self.last),
            )
        })
    }

    fn consume_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    /// Scan an identifier or keyword
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.current_pos;

        while self.peek_char().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }

        let text = &self.source[start..self.current_pos];
        lookup_keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        lexer
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| !matches!(k, TokenKind::Eof))
            .collect()
    }

    #[test]
    fn test_keywords() {
        let tokens = tokenize("func return if else for of import from");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Func,
                TokenKind::Return,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::For,
                TokenKind::Of,
                TokenKind::Import,
                TokenKind::From,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize(":= = ++ ++= ** **= << <<= >> >= && || => :");
        assert_eq!(
            tokens,
            vec![
                TokenKind::ColonEqual,
                TokenKind::Equal,
                TokenKind::PlusPlus,
                TokenKind::PlusPlusEqual,
                TokenKind::StarStar,
                TokenKind::StarStarEqual,
                TokenKind::Shl,
                TokenKind::ShlEqual,
                TokenKind::Shr,
                TokenKind::GreaterEqual,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::FatArrow,
                TokenKind::Colon,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 3.14 0 1e3 2.5e-1");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(3.14),
                TokenKind::Number(0.0),
                TokenKind::Number(1000.0),
                TokenKind::Number(0.25),
            ]
        );
    }

    #[test]
    fn test_member_after_number_is_not_fraction() {
        let tokens = tokenize("x[0].y");
        assert_eq!(tokens[3], TokenKind::RightBracket);
        assert_eq!(tokens[4], TokenKind::Dot);
    }

    #[test]
    fn test_strings() {
        let tokens = tokenize(r#"'it\'s' "say \"hi\"""#);
        assert_eq!(
            tokens,
            vec![
                TokenKind::String("it's".to_string()),
                TokenKind::String("say \"hi\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = tokenize("x // the x\n;");
        assert_eq!(
            tokens,
            vec![TokenKind::Ident("x".to_string()), TokenKind::Semicolon]
        );
    }

    #[test]
    fn test_spans_track_lines() {
        let mut lexer = Lexer::new("a\n  bcd");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!((tokens[1].span.line, tokens[1].span.column), (2, 3));
        assert_eq!((tokens[1].span.end_line, tokens[1].span.end_column), (2, 5));
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("'abc");
        assert!(lexer.tokenize().is_err());
    }

    #[test]
    fn test_import_path_after_import_only() {
        let tokens = tokenize("import ./lib/messages.vx; (import @/a.vx).x; a.b");
        assert_eq!(tokens[0], TokenKind::Import);
        assert_eq!(tokens[1], TokenKind::ImportPath("./lib/messages.vx".into()));
        assert_eq!(tokens[2], TokenKind::Semicolon);
        assert_eq!(tokens[5], TokenKind::ImportPath("@/a.vx".into()));
        assert_eq!(tokens[6], TokenKind::RightParen);
        assert_eq!(tokens[7], TokenKind::Dot);
        assert_eq!(tokens[11], TokenKind::Dot);
    }
}
