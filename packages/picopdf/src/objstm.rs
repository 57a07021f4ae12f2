//! Compressed object-stream decoder
//!
//! PDF 1.5 object streams pack several small objects into one filtered
//! stream. The decoded buffer starts with `N` pairs of integers
//! `(object number, relative offset)`; the object data region begins at
//! `/First`. Values are read bare, with no `obj`/`endobj` wrappers, and
//! never carry their own encryption.

use crate::device::{Device, MemoryDevice};
use crate::error::{Error, ErrorKind, Result};
use crate::lexer::Lexer;
use crate::object::{Dict, Indirect, Object, Ref};
use crate::parser::ObjectParser;
use crate::store::ObjectStore;
use log::warn;
use std::io::SeekFrom;

/// Parser for one decoded object stream
pub struct ObjectStreamParser<'a> {
    lexer: &'a mut Lexer,
    recursion_limit: u16,
    strict: bool,
}

impl<'a> ObjectStreamParser<'a> {
    pub fn new(lexer: &'a mut Lexer, recursion_limit: u16, strict: bool) -> Self {
        Self {
            lexer,
            recursion_limit,
            strict,
        }
    }

    /// Materialize objects from the decoded stream buffer into the store.
    ///
    /// `wanted` lists the object numbers whose xref entries point into this
    /// stream; an empty list materializes everything. Results are inserted
    /// with generation 0.
    pub fn parse(
        &mut self,
        container_dict: &Dict,
        decoded: &[u8],
        wanted: &[u32],
        store: &mut ObjectStore,
    ) -> Result<()> {
        match container_dict.get("Type").and_then(Object::as_name) {
            Some(name) if name.as_str() == "ObjStm" => {}
            other => {
                if self.strict {
                    return Err(Error::with_message(
                        ErrorKind::InvalidObject,
                        "object stream container is not /Type /ObjStm",
                    ));
                }
                warn!("object stream container has type {other:?}, continuing");
            }
        }

        let count = container_dict
            .get("N")
            .and_then(Object::as_int)
            .filter(|&n| n >= 0)
            .ok_or_else(|| {
                Error::with_message(ErrorKind::InvalidObject, "object stream missing /N")
            })?;
        let first = container_dict
            .get("First")
            .and_then(Object::as_int)
            .filter(|&f| f >= 0)
            .ok_or_else(|| {
                Error::with_message(ErrorKind::InvalidObject, "object stream missing /First")
            })?;

        let mut device = MemoryDevice::new(decoded.to_vec());

        // Prologue: N pairs of (object number, relative offset)
        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let num = self.lexer.read_integer(&mut device)?;
            let offset = self.lexer.read_integer(&mut device)?;
            if num <= 0 || num > u32::MAX as i64 || offset < 0 {
                return Err(Error::with_message(
                    ErrorKind::InvalidObject,
                    format!("invalid object stream prologue pair ({num}, {offset})"),
                ));
            }
            offsets.push((num as u32, offset as u64));
        }

        for (num, offset) in offsets {
            if !wanted.is_empty() && !wanted.contains(&num) {
                continue;
            }
            let begin = first as u64 + offset;
            if begin >= decoded.len() as u64 {
                if self.strict {
                    return Err(Error::with_message(
                        ErrorKind::InvalidObject,
                        format!("object {num} offset {begin} past end of object stream"),
                    ));
                }
                warn!("object {num} offset {begin} past end of object stream, skipping");
                continue;
            }

            device.seek(SeekFrom::Start(begin))?;
            let value = ObjectParser::new(&mut device, self.lexer, self.recursion_limit, self.strict)
                .read_value()
                .map_err(|e| e.context(format!("while reading object {num} 0 R from object stream")))?;

            store.push(Indirect::new(Ref::new(num, 0), value));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Name;

    fn container(n: i64, first: i64) -> Dict {
        let mut dict = Dict::new();
        dict.insert(Name::new("Type"), Object::Name(Name::new("ObjStm")));
        dict.insert(Name::new("N"), Object::Int(n));
        dict.insert(Name::new("First"), Object::Int(first));
        dict
    }

    #[test]
    fn test_parse_all_objects() {
        // Prologue of three pairs, then the object data region
        let decoded = b"11 0 12 3 13 10 42 (text) << /K /V >>";
        let dict = container(3, 16);
        let mut lexer = Lexer::new();
        let mut store = ObjectStore::new();

        ObjectStreamParser::new(&mut lexer, 500, false)
            .parse(&dict, decoded, &[], &mut store)
            .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(Ref::new(11, 0)).unwrap().value.as_int(), Some(42));
        assert_eq!(
            store
                .get(Ref::new(12, 0))
                .unwrap()
                .value
                .as_string()
                .unwrap()
                .as_bytes(),
            b"text"
        );
        assert!(store.get(Ref::new(13, 0)).unwrap().value.as_dict().is_some());
    }

    #[test]
    fn test_parse_only_wanted() {
        let decoded = b"11 0 12 2 1 2";
        let dict = container(2, 10);
        let mut lexer = Lexer::new();
        let mut store = ObjectStore::new();

        ObjectStreamParser::new(&mut lexer, 500, false)
            .parse(&dict, decoded, &[12], &mut store)
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(Ref::new(12, 0)).unwrap().value.as_int(), Some(2));
        assert!(store.get(Ref::new(11, 0)).is_none());
    }

    #[test]
    fn test_missing_n_rejected() {
        let mut dict = container(1, 4);
        dict.shift_remove(&Name::new("N"));
        let mut lexer = Lexer::new();
        let mut store = ObjectStore::new();
        let err = ObjectStreamParser::new(&mut lexer, 500, false)
            .parse(&dict, b"1 0 7", &[], &mut store)
            .unwrap_err();
        assert!(err.is(ErrorKind::InvalidObject));
    }

    #[test]
    fn test_wrong_type_strict() {
        let mut dict = container(1, 4);
        dict.insert(Name::new("Type"), Object::Name(Name::new("XRef")));
        let mut lexer = Lexer::new();
        let mut store = ObjectStore::new();
        let err = ObjectStreamParser::new(&mut lexer, 500, true)
            .parse(&dict, b"1 0 7", &[], &mut store)
            .unwrap_err();
        assert!(err.is(ErrorKind::InvalidObject));
    }

    #[test]
    fn test_offset_past_end_lenient_skips() {
        let decoded = b"11 99 ";
        let dict = container(1, 6);
        let mut lexer = Lexer::new();
        let mut store = ObjectStore::new();
        ObjectStreamParser::new(&mut lexer, 500, false)
            .parse(&dict, decoded, &[], &mut store)
            .unwrap();
        assert_eq!(store.len(), 0);
    }
}
