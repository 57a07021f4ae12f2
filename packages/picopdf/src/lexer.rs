//! PDF tokenizer - lexical analysis over an input device
//!
//! Splits the byte stream into the PDF token kinds and provides the
//! specialized number/string/name readers used by the object parser. One
//! lexer (and its scratch buffer) is shared by the xref parser, the value
//! parser and the object-stream parser within a single parse; a returned
//! token view is only valid until the next read.

use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::object::Name;
use std::io::SeekFrom;

/// PDF token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Contiguous run of regular characters: numbers and keywords
    Literal,
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// `{`
    BraceOpen,
    /// `}`
    BraceClose,
    /// `<`
    AngleOpen,
    /// `>`
    AngleClose,
    /// `<<`
    DoubleAngleOpen,
    /// `>>`
    DoubleAngleClose,
    /// `[`
    SquareOpen,
    /// `]`
    SquareClose,
    /// `/`
    Slash,
}

/// A token view borrowing the lexer's scratch buffer
#[derive(Debug, Clone, Copy)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub bytes: &'a [u8],
}

impl Token<'_> {
    /// Check for a specific keyword literal.
    pub fn is_literal(&self, keyword: &[u8]) -> bool {
        self.kind == TokenKind::Literal && self.bytes == keyword
    }
}

/// A parsed numeric token
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Real(f64),
}

/// PDF whitespace: NUL, tab, line feed, form feed, carriage return, space
pub fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

/// PDF delimiters
pub fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_regular(ch: u8) -> bool {
    !is_whitespace(ch) && !is_delimiter(ch)
}

/// Tokenizer with a reusable scratch buffer
pub struct Lexer {
    scratch: Vec<u8>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Self {
            scratch: Vec::with_capacity(256),
        }
    }

    /// Skip whitespace and `%` comments. Comments run to the next EOL and
    /// are treated like whitespace everywhere outside strings.
    pub fn skip_whitespace(&mut self, device: &mut dyn Device) -> Result<()> {
        while let Some(ch) = device.peek()? {
            if is_whitespace(ch) {
                device.read_byte()?;
            } else if ch == b'%' {
                device.read_byte()?;
                while let Some(c) = device.peek()? {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                    device.read_byte()?;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Read the next token, or `None` at clean end of input.
    pub fn try_read_token(&mut self, device: &mut dyn Device) -> Result<Option<Token<'_>>> {
        match self.read_token_inner(device)? {
            Some(kind) => Ok(Some(Token {
                kind,
                bytes: &self.scratch,
            })),
            None => Ok(None),
        }
    }

    /// Non-consuming variant of [`try_read_token`](Self::try_read_token).
    pub fn try_peek_token(&mut self, device: &mut dyn Device) -> Result<Option<Token<'_>>> {
        let start = device.position();
        let kind = self.read_token_inner(device)?;
        device.seek(SeekFrom::Start(start))?;
        match kind {
            Some(kind) => Ok(Some(Token {
                kind,
                bytes: &self.scratch,
            })),
            None => Ok(None),
        }
    }

    fn read_token_inner(&mut self, device: &mut dyn Device) -> Result<Option<TokenKind>> {
        self.skip_whitespace(device)?;
        self.scratch.clear();

        let ch = match device.peek()? {
            Some(ch) => ch,
            None => return Ok(None),
        };

        let kind = match ch {
            b'[' => self.single(device, TokenKind::SquareOpen)?,
            b']' => self.single(device, TokenKind::SquareClose)?,
            b'{' => self.single(device, TokenKind::BraceOpen)?,
            b'}' => self.single(device, TokenKind::BraceClose)?,
            b'/' => self.single(device, TokenKind::Slash)?,
            b'(' => self.single(device, TokenKind::ParenOpen)?,
            b')' => self.single(device, TokenKind::ParenClose)?,
            b'<' => {
                device.read_byte()?;
                self.scratch.push(b'<');
                if device.peek()? == Some(b'<') {
                    device.read_byte()?;
                    self.scratch.push(b'<');
                    TokenKind::DoubleAngleOpen
                } else {
                    TokenKind::AngleOpen
                }
            }
            b'>' => {
                device.read_byte()?;
                self.scratch.push(b'>');
                if device.peek()? == Some(b'>') {
                    device.read_byte()?;
                    self.scratch.push(b'>');
                    TokenKind::DoubleAngleClose
                } else {
                    TokenKind::AngleClose
                }
            }
            _ => {
                while let Some(c) = device.peek()? {
                    if !is_regular(c) {
                        break;
                    }
                    device.read_byte()?;
                    self.scratch.push(c);
                }
                TokenKind::Literal
            }
        };

        Ok(Some(kind))
    }

    fn single(&mut self, device: &mut dyn Device, kind: TokenKind) -> Result<TokenKind> {
        let ch = device.read_byte()?.ok_or(ErrorKind::UnexpectedEof)?;
        self.scratch.push(ch);
        Ok(kind)
    }

    /// Read a number token. Fails with `InvalidNumber` when the first
    /// non-whitespace byte is not a sign, digit or decimal point.
    pub fn read_number(&mut self, device: &mut dyn Device) -> Result<Number> {
        self.skip_whitespace(device)?;
        self.scratch.clear();

        match device.peek()? {
            Some(ch) if ch == b'+' || ch == b'-' || ch == b'.' || ch.is_ascii_digit() => {}
            Some(ch) => {
                return Err(Error::with_message(
                    ErrorKind::InvalidNumber,
                    format!("unexpected byte 0x{ch:02x} at start of number"),
                ))
            }
            None => return Err(Error::new(ErrorKind::UnexpectedEof)),
        }

        let mut is_real = false;
        while let Some(ch) = device.peek()? {
            match ch {
                b'0'..=b'9' => self.scratch.push(ch),
                b'+' | b'-' if self.scratch.is_empty() => self.scratch.push(ch),
                b'.' if !is_real => {
                    is_real = true;
                    self.scratch.push(ch);
                }
                _ => break,
            }
            device.read_byte()?;
        }

        let text = std::str::from_utf8(&self.scratch).expect("scratch holds ASCII");
        if is_real {
            text.parse::<f64>()
                .map(Number::Real)
                .map_err(|_| Error::with_message(ErrorKind::InvalidNumber, text.to_string()))
        } else {
            text.parse::<i64>()
                .map(Number::Int)
                .map_err(|_| Error::with_message(ErrorKind::InvalidNumber, text.to_string()))
        }
    }

    /// Read an integer, rejecting reals.
    pub fn read_integer(&mut self, device: &mut dyn Device) -> Result<i64> {
        match self.read_number(device)? {
            Number::Int(i) => Ok(i),
            Number::Real(r) => Err(Error::with_message(
                ErrorKind::InvalidNumber,
                format!("expected integer, found {r}"),
            )),
        }
    }

    /// Read a literal string. The device must be positioned just after the
    /// opening parenthesis.
    pub fn read_string(&mut self, device: &mut dyn Device) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut depth = 1usize;

        loop {
            let ch = device
                .read_byte()?
                .ok_or_else(|| Error::with_message(ErrorKind::UnexpectedEof, "unterminated string"))?;

            match ch {
                b'(' => {
                    depth += 1;
                    out.push(b'(');
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(b')');
                }
                b'\\' => {
                    let next = device.read_byte()?.ok_or_else(|| {
                        Error::with_message(ErrorKind::UnexpectedEof, "unterminated escape")
                    })?;
                    match next {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0C),
                        b'(' => out.push(b'('),
                        b')' => out.push(b')'),
                        b'\\' => out.push(b'\\'),
                        b'0'..=b'7' => {
                            let mut value = (next - b'0') as u16;
                            for _ in 0..2 {
                                match device.peek()? {
                                    Some(c @ b'0'..=b'7') => {
                                        device.read_byte()?;
                                        value = value * 8 + (c - b'0') as u16;
                                    }
                                    _ => break,
                                }
                            }
                            out.push(value as u8);
                        }
                        b'\r' => {
                            // Line continuation, optionally \r\n
                            if device.peek()? == Some(b'\n') {
                                device.read_byte()?;
                            }
                        }
                        b'\n' => {}
                        // A backslash before any other character is dropped
                        other => out.push(other),
                    }
                }
                _ => out.push(ch),
            }
        }

        Ok(out)
    }

    /// Read a hex string. The device must be positioned just after the
    /// opening angle bracket. An odd trailing digit is padded with zero.
    pub fn read_hex_string(&mut self, device: &mut dyn Device) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;

        loop {
            let ch = device.read_byte()?.ok_or_else(|| {
                Error::with_message(ErrorKind::UnexpectedEof, "unterminated hex string")
            })?;

            if ch == b'>' {
                break;
            }
            if is_whitespace(ch) {
                continue;
            }

            let digit = match ch {
                b'0'..=b'9' => ch - b'0',
                b'a'..=b'f' => ch - b'a' + 10,
                b'A'..=b'F' => ch - b'A' + 10,
                _ => {
                    return Err(Error::with_message(
                        ErrorKind::InvalidDataType,
                        format!("invalid hex digit 0x{ch:02x}"),
                    ))
                }
            };

            match pending.take() {
                Some(high) => out.push(high << 4 | digit),
                None => pending = Some(digit),
            }
        }

        if let Some(high) = pending {
            out.push(high << 4);
        }

        Ok(out)
    }

    /// Read a name. The device must be positioned just after the slash.
    /// `#hh` sequences decode to the escaped byte.
    pub fn read_name(&mut self, device: &mut dyn Device) -> Result<Name> {
        self.scratch.clear();

        while let Some(ch) = device.peek()? {
            if !is_regular(ch) {
                break;
            }
            device.read_byte()?;

            if ch == b'#' {
                let mut value = 0u8;
                for _ in 0..2 {
                    let digit = match device.read_byte()? {
                        Some(c @ b'0'..=b'9') => c - b'0',
                        Some(c @ b'a'..=b'f') => c - b'a' + 10,
                        Some(c @ b'A'..=b'F') => c - b'A' + 10,
                        Some(c) => {
                            return Err(Error::with_message(
                                ErrorKind::InvalidName,
                                format!("invalid hex digit 0x{c:02x} in name escape"),
                            ))
                        }
                        None => return Err(Error::new(ErrorKind::UnexpectedEof)),
                    };
                    value = value << 4 | digit;
                }
                self.scratch.push(value);
            } else {
                self.scratch.push(ch);
            }
        }

        let text: String = self.scratch.iter().map(|&b| b as char).collect();
        Ok(Name::from_string(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    fn lex_kinds(data: &[u8]) -> Vec<TokenKind> {
        let mut dev = MemoryDevice::new(data.to_vec());
        let mut lexer = Lexer::new();
        let mut kinds = Vec::new();
        while let Some(token) = lexer.try_read_token(&mut dev).unwrap() {
            kinds.push(token.kind);
        }
        kinds
    }

    #[test]
    fn test_delimiter_tokens() {
        assert_eq!(
            lex_kinds(b"[ ] << >> < > ( ) { } /"),
            [
                TokenKind::SquareOpen,
                TokenKind::SquareClose,
                TokenKind::DoubleAngleOpen,
                TokenKind::DoubleAngleClose,
                TokenKind::AngleOpen,
                TokenKind::AngleClose,
                TokenKind::ParenOpen,
                TokenKind::ParenClose,
                TokenKind::BraceOpen,
                TokenKind::BraceClose,
                TokenKind::Slash,
            ]
        );
    }

    #[test]
    fn test_literal_tokens() {
        let mut dev = MemoryDevice::new(&b"obj 42 endobj"[..]);
        let mut lexer = Lexer::new();
        let t = lexer.try_read_token(&mut dev).unwrap().unwrap();
        assert!(t.is_literal(b"obj"));
        let t = lexer.try_read_token(&mut dev).unwrap().unwrap();
        assert_eq!(t.bytes, b"42");
        let t = lexer.try_read_token(&mut dev).unwrap().unwrap();
        assert!(t.is_literal(b"endobj"));
        assert!(lexer.try_read_token(&mut dev).unwrap().is_none());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut dev = MemoryDevice::new(&b"trailer"[..]);
        let mut lexer = Lexer::new();
        let t = lexer.try_peek_token(&mut dev).unwrap().unwrap();
        assert!(t.is_literal(b"trailer"));
        assert_eq!(dev.position(), 0);
        let t = lexer.try_read_token(&mut dev).unwrap().unwrap();
        assert!(t.is_literal(b"trailer"));
    }

    #[test]
    fn test_comments_skipped() {
        let mut dev = MemoryDevice::new(&b"% header comment\n123"[..]);
        let mut lexer = Lexer::new();
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Int(123));
    }

    #[test]
    fn test_read_number() {
        let mut dev = MemoryDevice::new(&b"123 -456 +789 3.25 -0.5 .5 4."[..]);
        let mut lexer = Lexer::new();
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Int(123));
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Int(-456));
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Int(789));
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Real(3.25));
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Real(-0.5));
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Real(0.5));
        assert_eq!(lexer.read_number(&mut dev).unwrap(), Number::Real(4.0));
    }

    #[test]
    fn test_read_number_rejects_garbage() {
        let mut dev = MemoryDevice::new(&b"xref"[..]);
        let mut lexer = Lexer::new();
        let err = lexer.read_number(&mut dev).unwrap_err();
        assert!(err.is(ErrorKind::InvalidNumber));
    }

    #[test]
    fn test_read_string_escapes() {
        let mut dev = MemoryDevice::new(&b"Line\\nBreak\\tTab\\050\\))"[..]);
        let mut lexer = Lexer::new();
        let s = lexer.read_string(&mut dev).unwrap();
        assert_eq!(s, b"Line\nBreak\tTab()".to_vec());
    }

    #[test]
    fn test_read_string_balanced_parens() {
        let mut dev = MemoryDevice::new(&b"outer (inner) tail)"[..]);
        let mut lexer = Lexer::new();
        let s = lexer.read_string(&mut dev).unwrap();
        assert_eq!(s, b"outer (inner) tail".to_vec());
    }

    #[test]
    fn test_read_string_line_continuation() {
        let mut dev = MemoryDevice::new(&b"one\\\ntwo)"[..]);
        let mut lexer = Lexer::new();
        let s = lexer.read_string(&mut dev).unwrap();
        assert_eq!(s, b"onetwo".to_vec());
    }

    #[test]
    fn test_read_string_unterminated() {
        let mut dev = MemoryDevice::new(&b"never closed"[..]);
        let mut lexer = Lexer::new();
        let err = lexer.read_string(&mut dev).unwrap_err();
        assert!(err.is(ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_read_hex_string() {
        let mut dev = MemoryDevice::new(&b"48 65 6C 6C 6F>"[..]);
        let mut lexer = Lexer::new();
        assert_eq!(lexer.read_hex_string(&mut dev).unwrap(), b"Hello".to_vec());
    }

    #[test]
    fn test_read_hex_string_odd_padded() {
        let mut dev = MemoryDevice::new(&b"901fa>"[..]);
        let mut lexer = Lexer::new();
        assert_eq!(
            lexer.read_hex_string(&mut dev).unwrap(),
            vec![0x90, 0x1f, 0xa0]
        );
    }

    #[test]
    fn test_read_name_with_escape() {
        let mut dev = MemoryDevice::new(&b"Adobe#20Green "[..]);
        let mut lexer = Lexer::new();
        let name = lexer.read_name(&mut dev).unwrap();
        assert_eq!(name.as_str(), "Adobe Green");
    }

    #[test]
    fn test_readers_leave_position_after_token() {
        let mut dev = MemoryDevice::new(&b"12 /Name(x)tail"[..]);
        let mut lexer = Lexer::new();
        lexer.read_number(&mut dev).unwrap();
        assert_eq!(dev.position(), 2);
        // consume the slash token, then the name
        lexer.try_read_token(&mut dev).unwrap();
        lexer.read_name(&mut dev).unwrap();
        assert_eq!(dev.position(), 8);
    }
}
