use std::io::BufRead;

use crate::token::{SourceLocation, Token, KEYWORDS};

/// The K lexer.
///
/// ## Implementation Remarks
///
/// Input is pulled one byte at a time so the same lexer drives both file
/// compilation and an interactive stream; nothing is buffered beyond the
/// single lookahead byte. The lookahead starts as a space, which the
/// whitespace skip consumes on the first call.
///
/// Once the source is exhausted, [`Lexer::next_token`] returns
/// [`Token::Eof`] forever. A read error is treated like end of stream.
pub struct Lexer<R> {
    input: R,
    last_char: Option<u8>,
    location: SourceLocation,
    token_location: SourceLocation,
}

impl<R: BufRead> Lexer<R> {
    pub fn new(input: R) -> Lexer<R> {
        Lexer {
            input,
            last_char: Some(b' '),
            location: SourceLocation::start(),
            token_location: SourceLocation::start(),
        }
    }

    /// The position of the next unconsumed byte (post-advance).
    pub fn location(&self) -> SourceLocation {
        self.location
    }

    /// The position of the first byte of the most recently returned
    /// token. The parser snapshots this before it consumes the token.
    pub fn token_location(&self) -> SourceLocation {
        self.token_location
    }

    /// Scans and returns the next token.
    pub fn next_token(&mut self) -> Token {
        while matches!(self.last_char, Some(c) if c.is_ascii_whitespace()) {
            self.advance();
        }

        self.token_location = self.location;

        let c = match self.last_char {
            Some(c) => c,
            None => return Token::Eof,
        };

        if c.is_ascii_alphabetic() {
            self.identifier_or_keyword(c)
        } else if c.is_ascii_digit() || c == b'.' {
            self.number(c)
        } else if c == b'#' {
            self.discard_line();
            self.next_token()
        } else {
            self.advance();
            Token::Char(c)
        }
    }

    /// `[A-Za-z][A-Za-z0-9]*`, resolved against the keyword table.
    fn identifier_or_keyword(&mut self, first: u8) -> Token {
        let mut ident = String::new();
        ident.push(first as char);

        loop {
            self.advance();
            match self.last_char {
                Some(c) if c.is_ascii_alphanumeric() => ident.push(c as char),
                _ => break,
            }
        }

        match KEYWORDS.get(ident.as_str()) {
            Some(&kw) => Token::Keyword(kw),
            None => Token::Identifier(ident),
        }
    }

    /// `[0-9.]+`. The grammar deliberately admits malformed numerals
    /// like `1.2.3`; whatever prefix the float parser accepts wins.
    fn number(&mut self, first: u8) -> Token {
        let mut digits = String::new();
        digits.push(first as char);

        loop {
            self.advance();
            match self.last_char {
                Some(c) if c.is_ascii_digit() || c == b'.' => digits.push(c as char),
                _ => break,
            }
        }

        Token::Number(parse_numeral(&digits))
    }

    /// Consumes through the end of the current line (comment bodies).
    fn discard_line(&mut self) {
        loop {
            match self.read_byte() {
                Some(b'\n') | None => break,
                Some(_) => {}
            }
        }
        self.location.advance_line();
        self.last_char = self.read_byte();
        if let Some(c) = self.last_char {
            self.location.advance(c);
        }
    }

    /// Replaces the lookahead with the next input byte, keeping the
    /// location in step: the location always names the lookahead byte.
    fn advance(&mut self) {
        self.last_char = self.read_byte();
        if let Some(c) = self.last_char {
            self.location.advance(c);
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.input.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        }
    }
}

/// Parses the longest valid float prefix of `digits`, so `1.2.3`
/// yields `1.2` and a bare `.` yields `0.0`.
fn parse_numeral(digits: &str) -> f64 {
    if let Ok(v) = digits.parse::<f64>() {
        return v;
    }
    for end in (1..digits.len()).rev() {
        if let Ok(v) = digits[..end].parse::<f64>() {
            return v;
        }
    }
    0.0
}
