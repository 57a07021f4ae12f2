//! Object parser - tokens to in-memory PDF values
//!
//! Recursive-descent materialization of the value union, plus the
//! indirect-object reader used by the xref walker and the object-stream
//! decoder. Recursion depth is tracked; exceeding the configured cap fails with
//! `RecursionLimit` instead of overflowing the stack.

use crate::crypt::Decryptor;
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::lexer::{Lexer, Number, TokenKind};
use crate::object::{Dict, Object, PdfString, Ref, MAX_GENERATION};
use log::warn;
use std::io::SeekFrom;

/// Location of a stream body in the source device
///
/// `end` stays unresolved while `/Length` is an indirect reference; it is
/// settled on first read.
#[derive(Debug, Clone, Copy)]
pub struct StreamSpan {
    pub begin: u64,
    pub end: Option<u64>,
}

/// Recursive-descent parser over a device + shared lexer
pub struct ObjectParser<'a> {
    device: &'a mut dyn Device,
    lexer: &'a mut Lexer,
    recursion_limit: u16,
    strict: bool,
    decryptor: Option<&'a dyn Decryptor>,
}

impl<'a> ObjectParser<'a> {
    pub fn new(
        device: &'a mut dyn Device,
        lexer: &'a mut Lexer,
        recursion_limit: u16,
        strict: bool,
    ) -> Self {
        Self {
            device,
            lexer,
            recursion_limit,
            strict,
            decryptor: None,
        }
    }

    /// Decrypt strings (and let the caller decrypt stream bodies) through
    /// the given per-object decryptor.
    pub fn with_decryptor(mut self, decryptor: Option<&'a dyn Decryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    /// Read one value at the current device position.
    pub fn read_value(&mut self) -> Result<Object> {
        self.read_value_at_depth(0)
    }

    fn read_value_at_depth(&mut self, depth: u16) -> Result<Object> {
        if depth >= self.recursion_limit {
            return Err(Error::with_message(
                ErrorKind::RecursionLimit,
                format!("nesting deeper than {}", self.recursion_limit),
            ));
        }

        let token = self
            .lexer
            .try_read_token(self.device)?
            .ok_or_else(|| Error::with_message(ErrorKind::UnexpectedEof, "expected a value"))?;

        match token.kind {
            TokenKind::Literal => {
                let bytes = token.bytes.to_vec();
                self.read_literal_value(&bytes)
            }
            TokenKind::Slash => Ok(Object::Name(self.lexer.read_name(self.device)?)),
            TokenKind::ParenOpen => {
                let raw = self.lexer.read_string(self.device)?;
                Ok(Object::String(PdfString::literal(self.decrypt(raw)?)))
            }
            TokenKind::AngleOpen => {
                let raw = self.lexer.read_hex_string(self.device)?;
                Ok(Object::String(PdfString::hex(self.decrypt(raw)?)))
            }
            TokenKind::DoubleAngleOpen => self.read_dict_body(depth).map(Object::Dict),
            TokenKind::SquareOpen => {
                let mut array = Vec::new();
                loop {
                    let peeked = self.lexer.try_peek_token(self.device)?.ok_or_else(|| {
                        Error::with_message(ErrorKind::UnexpectedEof, "unterminated array")
                    })?;
                    if peeked.kind == TokenKind::SquareClose {
                        self.lexer.try_read_token(self.device)?;
                        break;
                    }
                    array.push(self.read_value_at_depth(depth + 1)?);
                }
                Ok(Object::Array(array))
            }
            other => Err(Error::with_message(
                ErrorKind::InvalidDataType,
                format!("unexpected token {other:?} at start of value"),
            )),
        }
    }

    /// Dictionary body, after `<<` has been consumed.
    fn read_dict_body(&mut self, depth: u16) -> Result<Dict> {
        let mut dict = Dict::new();
        loop {
            let token = self.lexer.try_read_token(self.device)?.ok_or_else(|| {
                Error::with_message(ErrorKind::UnexpectedEof, "unterminated dictionary")
            })?;
            match token.kind {
                TokenKind::DoubleAngleClose => break,
                TokenKind::Slash => {
                    let key = self.lexer.read_name(self.device)?;
                    let value = self.read_value_at_depth(depth + 1)?;
                    dict.insert(key, value);
                }
                other => {
                    return Err(Error::with_message(
                        ErrorKind::InvalidDataType,
                        format!("dictionary key must be a name, found {other:?}"),
                    ))
                }
            }
        }
        Ok(dict)
    }

    fn read_literal_value(&mut self, bytes: &[u8]) -> Result<Object> {
        match bytes {
            b"true" => return Ok(Object::Bool(true)),
            b"false" => return Ok(Object::Bool(false)),
            b"null" => return Ok(Object::Null),
            _ => {}
        }

        match parse_number_literal(bytes) {
            Some(Number::Int(num)) => {
                if num > 0 && num <= u32::MAX as i64 {
                    if let Some(reference) = self.try_read_reference_tail(num as u32)? {
                        return Ok(Object::Reference(reference));
                    }
                }
                Ok(Object::Int(num))
            }
            Some(Number::Real(real)) => Ok(Object::Real(real)),
            None => Err(Error::with_message(
                ErrorKind::InvalidDataType,
                format!("unexpected keyword {}", String::from_utf8_lossy(bytes)),
            )),
        }
    }

    /// After an integer: check for `<gen> R` and rewind when absent.
    fn try_read_reference_tail(&mut self, num: u32) -> Result<Option<Ref>> {
        let saved = self.device.position();

        let looks_like_ref = (|| -> Result<Option<u16>> {
            let token = match self.lexer.try_read_token(self.device)? {
                Some(t) if t.kind == TokenKind::Literal => t,
                _ => return Ok(None),
            };
            let gen = match parse_number_literal(token.bytes) {
                Some(Number::Int(g)) if (0..=MAX_GENERATION as i64).contains(&g) => g as u16,
                _ => return Ok(None),
            };
            match self.lexer.try_read_token(self.device)? {
                Some(t) if t.is_literal(b"R") => Ok(Some(gen)),
                _ => Ok(None),
            }
        })()?;

        match looks_like_ref {
            Some(gen) => Ok(Some(Ref::new(num, gen))),
            None => {
                self.device.seek(SeekFrom::Start(saved))?;
                Ok(None)
            }
        }
    }

    /// Read a full indirect object: `<num> <gen> obj ... endobj`.
    ///
    /// Returns the header reference, the value, and the stream span when the
    /// object carries one. Empty objects (`obj` directly followed by
    /// `endobj`) yield `Null`.
    pub fn read_indirect(&mut self) -> Result<(Ref, Object, Option<StreamSpan>)> {
        let id = self.read_indirect_header()?;

        let peeked = self.lexer.try_peek_token(self.device)?.ok_or_else(|| {
            Error::with_message(ErrorKind::UnexpectedEof, "expected value or endobj")
        })?;
        if peeked.is_literal(b"endobj") {
            self.lexer.try_read_token(self.device)?;
            return Ok((id, Object::Null, None));
        }

        let value = self.read_value()?;

        let token = self.lexer.try_read_token(self.device)?.ok_or_else(|| {
            Error::with_message(
                ErrorKind::UnexpectedEof,
                "expected 'endobj' or 'stream', got EOF",
            )
        })?;

        if token.is_literal(b"endobj") {
            return Ok((id, value, None));
        }

        if token.is_literal(b"stream") {
            let span = match &value {
                Object::Dict(dict) => self.read_stream_span(dict)?,
                _ => {
                    return Err(Error::with_message(
                        ErrorKind::InvalidObject,
                        format!("stream keyword after non-dictionary in {id}"),
                    ))
                }
            };
            self.expect_endobj(id)?;
            return Ok((id, value, Some(span)));
        }

        let found = String::from_utf8_lossy(token.bytes).into_owned();
        if self.strict {
            return Err(Error::with_message(
                ErrorKind::InvalidObject,
                format!("unexpected token {found:?} after value of {id}"),
            ));
        }
        warn!("missing 'endobj' after {id}, found {found:?}");
        let len = token.bytes.len() as i64;
        self.device.seek(SeekFrom::Current(-len))?;
        Ok((id, value, None))
    }

    /// Read `<num> <gen> obj`.
    pub fn read_indirect_header(&mut self) -> Result<Ref> {
        let num = self.lexer.read_integer(self.device)?;
        let gen = self.lexer.read_integer(self.device)?;
        if num <= 0 || num > u32::MAX as i64 {
            return Err(Error::with_message(
                ErrorKind::InvalidObject,
                format!("object number {num} out of range"),
            ));
        }
        if !(0..=MAX_GENERATION as i64).contains(&gen) {
            return Err(Error::with_message(
                ErrorKind::InvalidObject,
                format!("generation number {gen} out of range"),
            ));
        }

        let token = self
            .lexer
            .try_read_token(self.device)?
            .ok_or(ErrorKind::UnexpectedEof)?;
        if !token.is_literal(b"obj") {
            return Err(Error::with_message(
                ErrorKind::InvalidObject,
                format!("next token after {num} {gen} is not 'obj'"),
            ));
        }

        Ok(Ref::new(num as u32, gen as u16))
    }

    /// Handle the EOL after the `stream` keyword and compute the body span.
    fn read_stream_span(&mut self, dict: &Dict) -> Result<StreamSpan> {
        // Tolerate spaces and tabs before the EOL, and a lone \r not
        // followed by \n.
        loop {
            match self.device.peek()? {
                Some(b' ') | Some(b'\t') => {
                    self.device.read_byte()?;
                }
                Some(b'\r') => {
                    self.device.read_byte()?;
                    if self.device.peek()? == Some(b'\n') {
                        self.device.read_byte()?;
                    }
                    break;
                }
                Some(b'\n') => {
                    self.device.read_byte()?;
                    break;
                }
                Some(_) => break,
                None => return Err(Error::new(ErrorKind::UnexpectedEof)),
            }
        }

        let begin = self.device.position();

        match dict.get("Length").and_then(Object::as_int) {
            Some(len) if len >= 0 => {
                let end = begin + len as u64;
                self.device.seek(SeekFrom::Start(end))?;
                match self.lexer.try_read_token(self.device)? {
                    Some(token) if token.is_literal(b"endstream") => {
                        Ok(StreamSpan {
                            begin,
                            end: Some(end),
                        })
                    }
                    _ => {
                        if self.strict {
                            return Err(Error::with_message(
                                ErrorKind::InvalidObject,
                                format!("/Length {len} does not land on 'endstream'"),
                            ));
                        }
                        warn!("stream /Length {len} does not land on 'endstream', rescanning");
                        let end = determine_stream_end(self.device, begin)?;
                        self.skip_past_endstream(end)?;
                        Ok(StreamSpan {
                            begin,
                            end: Some(end),
                        })
                    }
                }
            }
            _ => {
                // /Length missing or an indirect reference. Scan for the
                // terminator so parsing can continue; the recorded end stays
                // open when the length is a reference resolved later.
                let end = determine_stream_end(self.device, begin)?;
                self.skip_past_endstream(end)?;
                let deferred = matches!(dict.get("Length"), Some(Object::Reference(_)));
                Ok(StreamSpan {
                    begin,
                    end: if deferred { None } else { Some(end) },
                })
            }
        }
    }

    fn skip_past_endstream(&mut self, end: u64) -> Result<()> {
        self.device.seek(SeekFrom::Start(end))?;
        if let Some(token) = self.lexer.try_read_token(self.device)? {
            if !token.is_literal(b"endstream") {
                // The scan stripped the EOL; the next token must be the
                // terminator unless the stream ran straight into endobj.
                let bytes = token.bytes.to_vec();
                self.device
                    .seek(SeekFrom::Current(-(bytes.len() as i64)))?;
            }
        }
        Ok(())
    }

    fn expect_endobj(&mut self, id: Ref) -> Result<()> {
        match self.lexer.try_read_token(self.device)? {
            Some(token) if token.is_literal(b"endobj") => Ok(()),
            other => {
                let found = other
                    .map(|t| String::from_utf8_lossy(t.bytes).into_owned())
                    .unwrap_or_else(|| "EOF".into());
                if self.strict {
                    Err(Error::with_message(
                        ErrorKind::InvalidObject,
                        format!("expected 'endobj' after {id}, found {found}"),
                    ))
                } else {
                    warn!("missing 'endobj' after {id}, found {found}");
                    Ok(())
                }
            }
        }
    }

    fn decrypt(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        match self.decryptor {
            Some(decryptor) => decryptor.decrypt(&data),
            None => Ok(data),
        }
    }
}

/// Parse a standalone numeric literal: sign, digits, at most one dot.
pub(crate) fn parse_number_literal(bytes: &[u8]) -> Option<Number> {
    let first = *bytes.first()?;
    if !(first == b'+' || first == b'-' || first == b'.' || first.is_ascii_digit()) {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    if text.contains('.') {
        text.parse::<f64>().ok().map(Number::Real)
    } else {
        text.parse::<i64>().ok().map(Number::Int)
    }
}

/// Scan forward from `begin` for the stream terminator and return the byte
/// offset where the body ends (EOL before the terminator stripped).
pub fn determine_stream_end(device: &mut dyn Device, begin: u64) -> Result<u64> {
    const CHUNK: usize = 4096;
    const OVERLAP: usize = 16;

    device.seek(SeekFrom::Start(begin))?;
    let mut window = vec![0u8; CHUNK + OVERLAP];
    let mut window_start = begin;
    let mut carry = 0usize;

    loop {
        let n = device.read(&mut window[carry..])?;
        let filled = carry + n;
        if filled == 0 {
            return Err(Error::with_message(
                ErrorKind::InvalidObject,
                "unable to determine stream size",
            ));
        }

        let haystack = &window[..filled];
        let hit = find_needle(haystack, b"endstream").or_else(|| find_needle(haystack, b"endobj"));

        if let Some(idx) = hit {
            let mut end = window_start + idx as u64;
            // Strip the EOL that separates body from terminator
            end = strip_trailing_eol(device, begin, end)?;
            return Ok(end);
        }

        if n == 0 {
            return Err(Error::with_message(
                ErrorKind::InvalidObject,
                "stream terminator not found",
            ));
        }

        // Keep a tail so a terminator split across chunks still matches
        let keep = filled.min(OVERLAP);
        window.copy_within(filled - keep..filled, 0);
        window_start += (filled - keep) as u64;
        carry = keep;
    }
}

fn find_needle(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_trailing_eol(device: &mut dyn Device, begin: u64, end: u64) -> Result<u64> {
    let mut end = end;
    for _ in 0..2 {
        if end == begin {
            break;
        }
        device.seek(SeekFrom::Start(end - 1))?;
        match device.peek()? {
            Some(b'\n') | Some(b'\r') => end -= 1,
            _ => break,
        }
    }
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::object::StringEncoding;

    fn parse_value(data: &[u8]) -> Result<Object> {
        let mut dev = MemoryDevice::new(data.to_vec());
        let mut lexer = Lexer::new();
        ObjectParser::new(&mut dev, &mut lexer, 500, false).read_value()
    }

    #[test]
    fn test_parse_scalars() {
        assert!(matches!(parse_value(b"true").unwrap(), Object::Bool(true)));
        assert!(matches!(
            parse_value(b"false").unwrap(),
            Object::Bool(false)
        ));
        assert!(parse_value(b"null").unwrap().is_null());
        assert_eq!(parse_value(b"42").unwrap().as_int(), Some(42));
        assert_eq!(parse_value(b"-17").unwrap().as_int(), Some(-17));
        assert_eq!(parse_value(b"3.5").unwrap().as_real(), Some(3.5));
    }

    #[test]
    fn test_parse_name() {
        let obj = parse_value(b"/Type").unwrap();
        assert_eq!(obj.as_name().unwrap().as_str(), "Type");
    }

    #[test]
    fn test_parse_strings() {
        let obj = parse_value(b"(hello)").unwrap();
        let s = obj.as_string().unwrap();
        assert_eq!(s.as_bytes(), b"hello");
        assert_eq!(s.encoding(), StringEncoding::Literal);

        let obj = parse_value(b"<4869>").unwrap();
        let s = obj.as_string().unwrap();
        assert_eq!(s.as_bytes(), b"Hi");
        assert_eq!(s.encoding(), StringEncoding::Hex);
    }

    #[test]
    fn test_parse_reference() {
        let obj = parse_value(b"12 0 R").unwrap();
        assert_eq!(obj.as_reference(), Some(Ref::new(12, 0)));
    }

    #[test]
    fn test_integer_not_reference() {
        // Three plain integers; the first must stay an Int and the device
        // must rewind so the rest parse normally.
        let mut dev = MemoryDevice::new(&b"1 2 3"[..]);
        let mut lexer = Lexer::new();
        let mut parser = ObjectParser::new(&mut dev, &mut lexer, 500, false);
        assert_eq!(parser.read_value().unwrap().as_int(), Some(1));
        assert_eq!(parser.read_value().unwrap().as_int(), Some(2));
        assert_eq!(parser.read_value().unwrap().as_int(), Some(3));
    }

    #[test]
    fn test_parse_array() {
        let obj = parse_value(b"[1 (two) /Three 4 0 R]").unwrap();
        let array = obj.as_array().unwrap();
        assert_eq!(array.len(), 4);
        assert_eq!(array[0].as_int(), Some(1));
        assert_eq!(array[1].as_string().unwrap().as_bytes(), b"two");
        assert_eq!(array[2].as_name().unwrap().as_str(), "Three");
        assert_eq!(array[3].as_reference(), Some(Ref::new(4, 0)));
    }

    #[test]
    fn test_parse_dict() {
        let obj = parse_value(b"<< /Type /Page /Parent 2 0 R /Count 3 >>").unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Type").unwrap().as_name().unwrap().as_str(), "Page");
        assert_eq!(dict.get("Parent").unwrap().as_reference(), Some(Ref::new(2, 0)));
        assert_eq!(dict.get("Count").unwrap().as_int(), Some(3));
    }

    #[test]
    fn test_parse_nested() {
        let obj = parse_value(b"<< /Kids [<< /Deep [1 [2 [3]]] >>] >>").unwrap();
        assert!(obj.as_dict().is_some());
    }

    #[test]
    fn test_recursion_limit() {
        let mut data = vec![b'['; 600];
        data.extend(vec![b']'; 600]);
        let mut dev = MemoryDevice::new(data);
        let mut lexer = Lexer::new();
        let err = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_value()
            .unwrap_err();
        assert!(err.is(ErrorKind::RecursionLimit));
    }

    #[test]
    fn test_read_indirect_plain() {
        let mut dev = MemoryDevice::new(&b"7 0 obj\n<< /Kind /Widget >>\nendobj"[..]);
        let mut lexer = Lexer::new();
        let (id, value, span) = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_indirect()
            .unwrap();
        assert_eq!(id, Ref::new(7, 0));
        assert!(value.as_dict().is_some());
        assert!(span.is_none());
    }

    #[test]
    fn test_read_indirect_empty_object() {
        let mut dev = MemoryDevice::new(&b"13 0 obj\nendobj"[..]);
        let mut lexer = Lexer::new();
        let (id, value, span) = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_indirect()
            .unwrap();
        assert_eq!(id, Ref::new(13, 0));
        assert!(value.is_null());
        assert!(span.is_none());
    }

    #[test]
    fn test_read_indirect_stream_with_length() {
        let data = b"5 0 obj\n<< /Length 11 >>\nstream\nhello world\nendstream\nendobj";
        let mut dev = MemoryDevice::new(data.to_vec());
        let mut lexer = Lexer::new();
        let (id, value, span) = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_indirect()
            .unwrap();
        assert_eq!(id, Ref::new(5, 0));
        assert_eq!(value.as_dict().unwrap().get("Length").unwrap().as_int(), Some(11));
        let span = span.unwrap();
        assert_eq!(span.end, Some(span.begin + 11));
        let begin = span.begin as usize;
        assert_eq!(&data[begin..begin + 11], b"hello world");
    }

    #[test]
    fn test_read_indirect_stream_without_length_scans() {
        let data = b"5 0 obj\n<< >>\nstream\npayload bytes\nendstream\nendobj";
        let mut dev = MemoryDevice::new(data.to_vec());
        let mut lexer = Lexer::new();
        let (_, _, span) = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_indirect()
            .unwrap();
        let span = span.unwrap();
        let begin = span.begin as usize;
        let end = span.end.unwrap() as usize;
        assert_eq!(&data[begin..end], b"payload bytes");
    }

    #[test]
    fn test_read_indirect_stream_indirect_length_defers_end() {
        let data = b"5 0 obj\n<< /Length 6 0 R >>\nstream\nxyzzy\nendstream\nendobj";
        let mut dev = MemoryDevice::new(data.to_vec());
        let mut lexer = Lexer::new();
        let (_, _, span) = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_indirect()
            .unwrap();
        let span = span.unwrap();
        assert!(span.end.is_none());
    }

    #[test]
    fn test_missing_endobj_strict_vs_lenient() {
        let data = b"5 0 obj\n42\ntrailer";
        let mut dev = MemoryDevice::new(data.to_vec());
        let mut lexer = Lexer::new();
        let err = ObjectParser::new(&mut dev, &mut lexer, 500, true)
            .read_indirect()
            .unwrap_err();
        assert!(err.is(ErrorKind::InvalidObject));

        // Lenient mode downgrades to a warning and leaves the stray token
        // unconsumed.
        let mut dev = MemoryDevice::new(data.to_vec());
        let mut lexer = Lexer::new();
        let (id, value, _) = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_indirect()
            .unwrap();
        assert_eq!(id, Ref::new(5, 0));
        assert_eq!(value.as_int(), Some(42));
        let token = lexer.try_read_token(&mut dev).unwrap().unwrap();
        assert!(token.is_literal(b"trailer"));
    }

    #[test]
    fn test_bad_header() {
        let mut dev = MemoryDevice::new(&b"0 0 obj 1 endobj"[..]);
        let mut lexer = Lexer::new();
        let err = ObjectParser::new(&mut dev, &mut lexer, 500, false)
            .read_indirect()
            .unwrap_err();
        assert!(err.is(ErrorKind::InvalidObject));
    }

    #[test]
    fn test_determine_stream_end_strips_eol() {
        let data = b"body\r\nendstream";
        let mut dev = MemoryDevice::new(data.to_vec());
        let end = determine_stream_end(&mut dev, 0).unwrap();
        assert_eq!(end, 4);
    }
}
