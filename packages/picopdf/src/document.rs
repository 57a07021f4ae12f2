//! Document parsing front-end
//!
//! Drives the whole pipeline: locate the header magic and the last
//! end-of-file marker, resolve the `startxref` anchor, walk the chain of
//! cross-reference sections (classical tables, xref streams and hybrid
//! files) across incremental updates, then materialize every reachable
//! object into the store, going through the encryption gate when the
//! trailer demands it.

use crate::crypt::{AuthResult, Authenticator, EncryptSession};
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result};
use crate::filter::{FilterPipeline, FlatePipeline};
use crate::lexer::Lexer;
use crate::object::{
    Dict, Indirect, Name, Object, PdfString, Ref, StreamBody, StreamData, MAX_GENERATION,
};
use crate::objstm::ObjectStreamParser;
use crate::parser::{determine_stream_end, ObjectParser, StreamSpan};
use crate::store::{ObjectStore, DEFAULT_MAX_OBJECT_COUNT};
use crate::xref::{XrefEntry, XrefTable};
use log::{error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::io::SeekFrom;
use std::sync::Arc;

const XREF_SEARCH_WINDOW: u64 = 512;
const MAX_XREF_SECTION_COUNT: u32 = 512;
const XREF_ENTRY_SIZE: usize = 20;
const HEADER_SEARCH_WINDOW: usize = 1024;
const EOF_MARKER: &[u8] = b"%%EOF";

/// PDF specification version declared by a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PdfVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
    V1_6,
    V1_7,
    V2_0,
}

impl PdfVersion {
    /// Parse the `X.Y` digits following `%PDF-`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"1.0" => Some(Self::V1_0),
            b"1.1" => Some(Self::V1_1),
            b"1.2" => Some(Self::V1_2),
            b"1.3" => Some(Self::V1_3),
            b"1.4" => Some(Self::V1_4),
            b"1.5" => Some(Self::V1_5),
            b"1.6" => Some(Self::V1_6),
            b"1.7" => Some(Self::V1_7),
            b"2.0" => Some(Self::V2_0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
            Self::V1_3 => "1.3",
            Self::V1_4 => "1.4",
            Self::V1_5 => "1.5",
            Self::V1_6 => "1.6",
            Self::V1_7 => "1.7",
            Self::V2_0 => "2.0",
        }
    }
}

impl std::fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs controlling one parse
#[derive(Clone)]
pub struct ParseOptions {
    /// Abort on any deviation from the specification instead of downgrading
    /// the known-common ones to warnings.
    pub strict: bool,
    /// Leave stream bodies unread until first access.
    pub load_on_demand: bool,
    /// Password tried against an encrypted file.
    pub password: Option<Vec<u8>>,
    /// In lenient mode, free the slot of an object that fails to load
    /// instead of aborting the parse.
    pub ignore_broken_objects: bool,
    /// Cap on object numbers.
    pub max_object_count: u32,
    /// Depth cap for every recursive descent.
    pub recursion_limit: u16,
    /// Treat more xref entries than the trailer `/Size` as an error rather
    /// than a warning.
    pub enforce_trailer_size: bool,
    /// In hybrid files, let `/XRefStm` entries take precedence over
    /// conflicting classical entries of the same section.
    pub hybrid_stream_first: bool,
    /// Encryption gate; required when the file is encrypted.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Filter boundary used to decode xref and object streams.
    pub pipeline: Arc<dyn FilterPipeline>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict: false,
            load_on_demand: false,
            password: None,
            ignore_broken_objects: true,
            max_object_count: DEFAULT_MAX_OBJECT_COUNT,
            recursion_limit: 500,
            enforce_trailer_size: false,
            hybrid_stream_first: false,
            authenticator: None,
            pipeline: Arc::new(FlatePipeline),
        }
    }
}

/// Parse a document in one call.
///
/// For the recoverable password flow keep a [`PdfParser`] instead: its state
/// survives an `InvalidPassword` failure, so a retry with a new password
/// resumes without re-reading the file structure.
pub fn parse<D: Device + 'static>(mut device: D, options: ParseOptions) -> Result<ParsedDoc> {
    let mut store = ObjectStore::with_limits(options.max_object_count, options.recursion_limit);
    let mut parser = PdfParser::new(options);
    parser.parse(&mut device, &mut store)?;
    Ok(parser.into_doc(Box::new(device), store))
}

/// Stateful parser for one document
pub struct PdfParser {
    options: ParseOptions,
    lexer: Lexer,
    entries: XrefTable,
    trailer: Option<Dict>,
    version: PdfVersion,
    magic_offset: u64,
    last_eof_offset: u64,
    xref_offset: u64,
    visited_xref_offsets: HashSet<u64>,
    incremental_updates: u32,
    has_xref_stream: bool,
    structure_read: bool,
    session: Option<Box<dyn EncryptSession>>,
}

impl PdfParser {
    pub fn new(options: ParseOptions) -> Self {
        let entries = XrefTable::new(options.max_object_count);
        Self {
            options,
            lexer: Lexer::new(),
            entries,
            trailer: None,
            version: PdfVersion::V1_4,
            magic_offset: 0,
            last_eof_offset: 0,
            xref_offset: 0,
            visited_xref_offsets: HashSet::new(),
            incremental_updates: 0,
            has_xref_stream: false,
            structure_read: false,
            session: None,
        }
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.trailer = None;
        self.version = PdfVersion::V1_4;
        self.magic_offset = 0;
        self.last_eof_offset = 0;
        self.xref_offset = 0;
        self.visited_xref_offsets.clear();
        self.incremental_updates = 0;
        self.has_xref_stream = false;
        self.structure_read = false;
        self.session = None;
    }

    /// Replace the password for the next [`parse`](Self::parse) attempt.
    pub fn set_password(&mut self, password: impl Into<Vec<u8>>) {
        self.options.password = Some(password.into());
    }

    pub fn version(&self) -> PdfVersion {
        self.version
    }

    pub fn incremental_update_count(&self) -> u32 {
        self.incremental_updates
    }

    pub fn has_xref_stream(&self) -> bool {
        self.has_xref_stream
    }

    pub fn trailer(&self) -> Option<&Dict> {
        self.trailer.as_ref()
    }

    /// Transfer the effective trailer out of the parser.
    pub fn take_trailer(&mut self) -> Option<Dict> {
        self.trailer.take()
    }

    /// Run the full parse into `store`.
    ///
    /// On `InvalidPassword` the xref entries and trailer are preserved; call
    /// [`set_password`](Self::set_password) and parse again to resume. Any
    /// other failure resets both the parser and the store.
    pub fn parse(&mut self, device: &mut dyn Device, store: &mut ObjectStore) -> Result<()> {
        let attempt = (|| -> Result<()> {
            if !self.structure_read {
                store.clear();
                self.reset();
                self.check_magic(device)?;
                self.read_document_structure(device, None, false)?;
                self.structure_read = true;
            }
            self.read_objects(device, store)?;
            if !self.options.load_on_demand {
                self.load_all_streams(device, store)?;
            }
            self.update_document_version(store)?;
            Ok(())
        })();

        match attempt {
            Ok(()) => Ok(()),
            Err(e) if e.is(ErrorKind::InvalidPassword) => Err(e),
            Err(e) => {
                store.clear();
                self.reset();
                Err(e.context("unable to load objects from file"))
            }
        }
    }

    /// Wrap up into a [`ParsedDoc`], consuming the parser.
    pub fn into_doc(self, device: Box<dyn Device>, store: ObjectStore) -> ParsedDoc {
        ParsedDoc {
            device,
            store,
            entries: self.entries,
            trailer: self.trailer,
            version: self.version,
            incremental_updates: self.incremental_updates,
            has_xref_stream: self.has_xref_stream,
            session: self.session,
            pipeline: self.options.pipeline,
        }
    }

    // ------------------------------------------------------------------
    // Header magic
    // ------------------------------------------------------------------

    fn check_magic(&mut self, device: &mut dyn Device) -> Result<()> {
        device.seek(SeekFrom::Start(0))?;
        let window = device.size().min(HEADER_SEARCH_WINDOW as u64) as usize;
        let mut buf = vec![0u8; window];
        let mut filled = 0;
        while filled < window {
            let n = device.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let idx = buf[..filled]
            .windows(5)
            .position(|w| w == b"%PDF-")
            .ok_or_else(|| {
                Error::with_message(ErrorKind::InvalidPdf, "header magic not found")
            })?;

        let version_bytes = buf
            .get(idx + 5..idx + 8)
            .ok_or_else(|| Error::with_message(ErrorKind::InvalidPdf, "truncated header"))?;
        self.version = PdfVersion::parse(version_bytes).ok_or_else(|| {
            Error::with_message(
                ErrorKind::InvalidPdf,
                format!(
                    "unknown version {:?}",
                    String::from_utf8_lossy(version_bytes)
                ),
            )
        })?;
        self.magic_offset = idx as u64;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structure discovery
    // ------------------------------------------------------------------

    /// Locate the EOF marker and `startxref` anchor, then walk the xref
    /// chain. `eof_search_offset` restricts the search to a prefix of the
    /// file (used when carving out earlier revisions); `skip_follow_prev`
    /// reads one revision without chasing `/Prev`.
    fn read_document_structure(
        &mut self,
        device: &mut dyn Device,
        eof_search_offset: Option<u64>,
        skip_follow_prev: bool,
    ) -> Result<()> {
        let search_end = match eof_search_offset {
            Some(offset) => device.seek(SeekFrom::Start(offset))?,
            None => device.seek(SeekFrom::End(0))?,
        };

        self.check_eof_marker(device, search_end)
            .map_err(|e| e.context("EOF marker could not be found"))?;

        self.find_xref_anchor(device)
            .map_err(|e| e.context("unable to find startxref entry in file"))?;

        self.read_xref_contents(device, self.xref_offset, skip_follow_prev, 0)
            .map_err(|e| e.context("unable to load xref entries"))?;

        if let Some(size) = self
            .trailer
            .as_ref()
            .and_then(|t| t.get("Size"))
            .and_then(Object::as_int)
        {
            if size >= 0 && self.entries.len() as i64 > size {
                if self.options.enforce_trailer_size {
                    return Err(Error::with_message(
                        ErrorKind::InvalidXref,
                        format!(
                            "{} xref entries exceed the trailer /Size of {size}",
                            self.entries.len()
                        ),
                    ));
                }
                warn!(
                    "there are more objects ({}) in this xref table than specified \
                     in the size key of the trailer directory ({size})",
                    self.entries.len()
                );
            }
        }

        Ok(())
    }

    fn check_eof_marker(&mut self, device: &mut dyn Device, search_end: u64) -> Result<()> {
        let marker_len = EOF_MARKER.len() as u64;
        if search_end < marker_len {
            return Err(Error::new(ErrorKind::InvalidEofToken));
        }

        if self.options.strict {
            // The marker must be exactly the last five bytes
            device.seek(SeekFrom::Start(search_end - marker_len))?;
            let mut buf = [0u8; 5];
            device.read_exact(&mut buf)?;
            if buf != EOF_MARKER {
                return Err(Error::new(ErrorKind::InvalidEofToken));
            }
            self.last_eof_offset = search_end - marker_len;
            return Ok(());
        }

        let mut pos = search_end - marker_len;
        loop {
            device.seek(SeekFrom::Start(pos))?;
            let mut buf = [0u8; 5];
            device.read_exact(&mut buf)?;
            if buf == EOF_MARKER {
                self.last_eof_offset = pos;
                if pos + marker_len != search_end {
                    warn!(
                        "{} bytes of garbage after %%EOF",
                        search_end - pos - marker_len
                    );
                }
                return Ok(());
            }
            if pos == 0 {
                return Err(Error::new(ErrorKind::InvalidEofToken));
            }
            pos -= 1;
        }
    }

    fn find_xref_anchor(&mut self, device: &mut dyn Device) -> Result<()> {
        let found = find_token_backward(
            device,
            b"startxref",
            XREF_SEARCH_WINDOW,
            self.last_eof_offset,
        )?;
        if !found {
            if self.options.strict {
                return Err(Error::with_message(
                    ErrorKind::InvalidXref,
                    "startxref keyword not found",
                ));
            }
            // Non-standard spelling seen in the wild
            let fallback =
                find_token_backward(device, b"startref", XREF_SEARCH_WINDOW, self.last_eof_offset)?;
            if !fallback {
                return Err(Error::with_message(
                    ErrorKind::InvalidXref,
                    "startxref keyword not found",
                ));
            }
            warn!("startxref misspelled as startref");
        }

        // Consume the keyword, then the offset number
        self.lexer.try_read_token(device)?;
        let offset = self.lexer.read_integer(device)?;
        if offset < 0 {
            return Err(Error::with_message(
                ErrorKind::InvalidXref,
                format!("negative startxref offset {offset}"),
            ));
        }
        self.xref_offset = offset as u64 + self.magic_offset;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Xref sections
    // ------------------------------------------------------------------

    fn read_xref_contents(
        &mut self,
        device: &mut dyn Device,
        offset: u64,
        skip_follow_prev: bool,
        depth: u16,
    ) -> Result<()> {
        if depth >= self.options.recursion_limit {
            return Err(Error::new(ErrorKind::RecursionLimit));
        }

        if !self.visited_xref_offsets.insert(offset) {
            return Err(Error::with_message(
                ErrorKind::InvalidXref,
                format!("cycle in xref structure, offset {offset} already visited"),
            ));
        }

        let file_size = device.size();
        let offset = if offset >= file_size {
            if self.options.strict {
                return Err(Error::with_message(
                    ErrorKind::InvalidXref,
                    format!("startxref offset {offset} is at or beyond EOF"),
                ));
            }
            warn!("startxref offset {offset} is at or beyond EOF, scanning for the xref keyword");
            let recovered = self.recover_xref_offset(device)?;
            self.xref_offset = recovered;
            recovered
        } else {
            offset
        };

        device.seek(SeekFrom::Start(offset))?;
        let is_classical = match self.lexer.try_peek_token(device)? {
            Some(token) => token.is_literal(b"xref"),
            None => return Err(Error::new(ErrorKind::InvalidXref)),
        };

        if is_classical {
            self.read_classical_section(device, skip_follow_prev, depth)
        } else {
            self.has_xref_stream = true;
            self.read_xref_stream_contents(device, offset, skip_follow_prev, depth)
        }
    }

    /// Backward scan for a real `xref` keyword when the recorded offset is
    /// unusable. Matches inside `startxref` don't count.
    fn recover_xref_offset(&mut self, device: &mut dyn Device) -> Result<u64> {
        let window = (XREF_SEARCH_WINDOW * 4).min(self.last_eof_offset);
        let start = self.last_eof_offset - window;
        device.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; window as usize];
        device.read_exact(&mut buf)?;

        let mut candidate = None;
        let mut idx = 0usize;
        while let Some(found) = buf[idx..].windows(4).position(|w| w == b"xref") {
            let absolute = idx + found;
            let preceded_by_start = absolute >= 5 && &buf[absolute - 5..absolute] == b"start";
            if !preceded_by_start {
                candidate = Some(start + absolute as u64);
            }
            idx = absolute + 1;
        }

        candidate.ok_or_else(|| {
            Error::with_message(ErrorKind::InvalidXref, "no xref keyword found in file tail")
        })
    }

    fn read_classical_section(
        &mut self,
        device: &mut dyn Device,
        skip_follow_prev: bool,
        depth: u16,
    ) -> Result<()> {
        // Consume the xref keyword
        self.lexer.try_read_token(device)?;

        // Collect entries first so hybrid precedence can reorder their
        // application against an /XRefStm section.
        let mut collected: Vec<(u32, XrefEntry)> = Vec::new();

        for section_count in 0u32.. {
            if section_count == MAX_XREF_SECTION_COUNT {
                return Err(Error::with_message(
                    ErrorKind::InvalidEofToken,
                    "too many xref subsections",
                ));
            }

            match self.lexer.try_peek_token(device)? {
                Some(token) if token.is_literal(b"trailer") => break,
                Some(_) => {}
                None => return Err(Error::new(ErrorKind::InvalidXref)),
            }

            let subsection = (|| -> Result<()> {
                let first = self.lexer.read_integer(device)?;
                let count = self.lexer.read_integer(device)?;
                self.read_xref_subsection(device, first, count, &mut collected)
            })();

            if let Err(e) = subsection {
                match e.kind() {
                    ErrorKind::InvalidNumber | ErrorKind::InvalidXref | ErrorKind::UnexpectedEof
                        if !self.options.strict =>
                    {
                        warn!("xref subsection truncated ({e}), continuing to trailer");
                        break;
                    }
                    _ => return Err(e.context("while reading xref subsection")),
                }
            }
        }

        self.read_next_trailer(device, collected, skip_follow_prev, depth)
    }

    fn read_xref_subsection(
        &mut self,
        device: &mut dyn Device,
        first: i64,
        count: i64,
        out: &mut Vec<(u32, XrefEntry)>,
    ) -> Result<()> {
        if first < 0 || count < 0 {
            return Err(Error::with_message(
                ErrorKind::InvalidXref,
                "negative subsection header",
            ));
        }
        let new_size = first
            .checked_add(count)
            .filter(|&n| n <= u32::MAX as i64)
            .ok_or_else(|| {
                Error::with_message(
                    ErrorKind::ValueOutOfRange,
                    "object count has reached maximum allowed size",
                )
            })?;
        self.entries.enlarge(new_size as u32)?;

        // Consume the whitespace between the header and the entry grid
        while let Some(ch) = device.peek()? {
            if !crate::lexer::is_whitespace(ch) {
                break;
            }
            device.read_byte()?;
        }

        let mut record = [0u8; XREF_ENTRY_SIZE];
        for index in 0..count {
            device.read_exact(&mut record)?;

            let num = (first + index) as u32;
            let entry = parse_classical_entry(&record, self.magic_offset)?;
            out.push((num, entry));
        }
        Ok(())
    }

    fn read_next_trailer(
        &mut self,
        device: &mut dyn Device,
        collected: Vec<(u32, XrefEntry)>,
        skip_follow_prev: bool,
        depth: u16,
    ) -> Result<()> {
        match self.lexer.try_read_token(device)? {
            Some(token) if token.is_literal(b"trailer") => {}
            _ => return Err(Error::new(ErrorKind::InvalidTrailer)),
        }

        let value = ObjectParser::new(
            device,
            &mut self.lexer,
            self.options.recursion_limit,
            self.options.strict,
        )
        .read_value()
        .map_err(|e| e.context("while reading trailer dictionary"))?;
        let dict = match value {
            Object::Dict(dict) => dict,
            _ => {
                return Err(Error::with_message(
                    ErrorKind::InvalidTrailer,
                    "trailer is not a dictionary",
                ))
            }
        };

        self.merge_trailer(&dict);

        let xref_stm = dict
            .get("XRefStm")
            .and_then(Object::as_int)
            .filter(|&o| o > 0)
            .map(|o| o as u64 + self.magic_offset);

        // Hybrid file: the configured precedence decides whether the stream
        // section or the classical section claims contested slots first.
        if self.options.hybrid_stream_first {
            if let Some(stm_offset) = xref_stm {
                self.read_hybrid_stream(device, stm_offset, skip_follow_prev, depth)?;
            }
            self.apply_entries(collected)?;
        } else {
            self.apply_entries(collected)?;
            if let Some(stm_offset) = xref_stm {
                self.read_hybrid_stream(device, stm_offset, skip_follow_prev, depth)?;
            }
        }

        self.follow_prev(device, &dict, skip_follow_prev, depth)
    }

    fn read_hybrid_stream(
        &mut self,
        device: &mut dyn Device,
        offset: u64,
        skip_follow_prev: bool,
        depth: u16,
    ) -> Result<()> {
        self.has_xref_stream = true;
        device.seek(SeekFrom::Start(offset))?;
        self.read_xref_stream_contents(device, offset, skip_follow_prev, depth + 1)
            .map_err(|e| e.context("unable to load /XRefStm xref stream"))
    }

    fn apply_entries(&mut self, collected: Vec<(u32, XrefEntry)>) -> Result<()> {
        for (num, entry) in collected {
            self.entries.set(num, entry)?;
        }
        Ok(())
    }

    fn follow_prev(
        &mut self,
        device: &mut dyn Device,
        dict: &Dict,
        skip_follow_prev: bool,
        depth: u16,
    ) -> Result<()> {
        let prev = match dict.get("Prev").and_then(Object::as_int) {
            Some(offset) => offset,
            None => return Ok(()),
        };
        if prev <= 0 {
            warn!("xref /Prev offset {prev} is invalid, skipping the read");
            return Ok(());
        }
        let prev = prev as u64 + self.magic_offset;

        if self.visited_xref_offsets.contains(&prev) {
            return Err(Error::with_message(
                ErrorKind::InvalidXref,
                format!("cycle in xref structure, /Prev offset {prev} already visited"),
            ));
        }

        // A Prev key means the file carries an incremental update
        self.incremental_updates += 1;

        if skip_follow_prev {
            return Ok(());
        }
        self.read_xref_contents(device, prev, false, depth + 1)
    }

    fn read_xref_stream_contents(
        &mut self,
        device: &mut dyn Device,
        offset: u64,
        skip_follow_prev: bool,
        depth: u16,
    ) -> Result<()> {
        device.seek(SeekFrom::Start(offset))?;

        // The xref stream object is parsed without any decryption
        let (id, value, span) = ObjectParser::new(
            device,
            &mut self.lexer,
            self.options.recursion_limit,
            self.options.strict,
        )
        .read_indirect()
        .map_err(|e| e.context("the trailer was found in the file, but contains errors"))?;

        let dict = match value {
            Object::Dict(dict) => dict,
            _ => {
                return Err(Error::with_message(
                    ErrorKind::InvalidXref,
                    format!("xref stream object {id} is not a dictionary"),
                ))
            }
        };
        let span = span.ok_or_else(|| {
            Error::with_message(
                ErrorKind::InvalidXref,
                format!("xref stream object {id} has no stream"),
            )
        })?;

        match dict.get("Type").and_then(Object::as_name) {
            Some(name) if name.as_str() == "XRef" => {}
            other => {
                if self.options.strict {
                    return Err(Error::with_message(
                        ErrorKind::InvalidXref,
                        "xref stream is not /Type /XRef",
                    ));
                }
                warn!("xref stream has type {other:?}, continuing");
            }
        }

        let raw = read_span(device, span)?;
        let decoded = self
            .options
            .pipeline
            .decode(&dict, &raw)
            .map_err(|e| e.context("while decoding xref stream"))?;

        self.apply_xref_stream_entries(&dict, &decoded)?;
        self.merge_trailer(&dict);

        self.follow_prev(device, &dict, skip_follow_prev, depth)
    }

    fn apply_xref_stream_entries(&mut self, dict: &Dict, decoded: &[u8]) -> Result<()> {
        let widths = dict
            .get("W")
            .and_then(Object::as_array)
            .ok_or_else(|| Error::with_message(ErrorKind::InvalidXref, "missing /W array"))?;
        if widths.len() < 3 {
            return Err(Error::with_message(
                ErrorKind::InvalidXref,
                "/W array must have three elements",
            ));
        }
        let w: Vec<usize> = widths
            .iter()
            .take(3)
            .map(|v| v.as_int().filter(|&x| x >= 0).map(|x| x as usize))
            .collect::<Option<_>>()
            .ok_or_else(|| {
                Error::with_message(ErrorKind::InvalidXref, "/W array holds a non-integer")
            })?;
        let entry_size: usize = w.iter().sum();
        if entry_size == 0 || entry_size > 255 {
            return Err(Error::with_message(
                ErrorKind::InvalidXref,
                format!("invalid /W field widths summing to {entry_size}"),
            ));
        }

        let size = dict
            .get("Size")
            .and_then(Object::as_int)
            .filter(|&s| s >= 0)
            .ok_or_else(|| Error::with_message(ErrorKind::InvalidXref, "missing /Size"))?;

        let index: Vec<i64> = match dict.get("Index").and_then(Object::as_array) {
            Some(array) => array
                .iter()
                .map(Object::as_int)
                .collect::<Option<_>>()
                .ok_or_else(|| {
                    Error::with_message(ErrorKind::InvalidXref, "/Index holds a non-integer")
                })?,
            None => vec![0, size],
        };
        if index.len() % 2 != 0 {
            return Err(Error::with_message(
                ErrorKind::InvalidXref,
                "/Index must hold pairs",
            ));
        }

        let mut cursor = 0usize;
        for range in index.chunks(2) {
            let (first, count) = (range[0], range[1]);
            if first < 0 || count < 0 {
                return Err(Error::with_message(
                    ErrorKind::InvalidXref,
                    "negative /Index range",
                ));
            }
            for i in 0..count {
                if cursor + entry_size > decoded.len() {
                    if self.options.strict {
                        return Err(Error::with_message(
                            ErrorKind::InvalidXref,
                            "xref stream data shorter than /Index ranges",
                        ));
                    }
                    warn!("xref stream data shorter than /Index ranges, truncating");
                    return Ok(());
                }
                let record = &decoded[cursor..cursor + entry_size];
                cursor += entry_size;

                let field1 = if w[0] == 0 { 1 } else { read_be(&record[..w[0]]) };
                let field2 = read_be(&record[w[0]..w[0] + w[1]]);
                let field3_raw = read_be(&record[w[0] + w[1]..]);

                let num = (first + i) as u32;
                let entry = match field1 {
                    0 => XrefEntry::Free {
                        next_free: field2 as u32,
                        next_gen: if w[2] == 0 {
                            MAX_GENERATION
                        } else {
                            field3_raw as u16
                        },
                    },
                    1 => XrefEntry::InUse {
                        offset: field2 + self.magic_offset,
                        gen: field3_raw as u16,
                    },
                    2 => XrefEntry::Compressed {
                        stream_num: field2 as u32,
                        index: field3_raw as u32,
                    },
                    _ => XrefEntry::Free {
                        next_free: 0,
                        next_gen: 0,
                    },
                };
                self.entries.set(num, entry)?;
            }
        }
        Ok(())
    }

    /// Keep the newest revision's value for each of the trailer keys that
    /// make up the effective trailer.
    fn merge_trailer(&mut self, dict: &Dict) {
        match &mut self.trailer {
            None => self.trailer = Some(dict.clone()),
            Some(trailer) => {
                for key in ["Size", "Root", "Encrypt", "Info", "ID"] {
                    if !trailer.contains_key(key) {
                        if let Some(value) = dict.get(key) {
                            trailer.insert(Name::new(key), value.clone());
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Object loading
    // ------------------------------------------------------------------

    fn read_objects(&mut self, device: &mut dyn Device, store: &mut ObjectStore) -> Result<()> {
        let trailer = self
            .trailer
            .as_ref()
            .ok_or(ErrorKind::InvalidTrailer)?
            .clone();

        let encrypt_ref = self.setup_encryption(device, &trailer)?;

        let snapshot: Vec<(u32, XrefEntry)> = self.entries.iter().collect();
        let mut compressed: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

        for (num, entry) in snapshot {
            if Some(num) == encrypt_ref.map(|r| r.num) {
                // The encryption dictionary never enters the store
                store.add_free(Ref::new(num, 1));
                continue;
            }

            match entry {
                XrefEntry::InUse { offset, gen } if offset > 0 => {
                    if num == 0 {
                        if self.options.strict {
                            return Err(Error::with_message(
                                ErrorKind::InvalidXref,
                                "object 0 marked in-use",
                            ));
                        }
                        warn!("object 0 marked in-use, treating as the free-list head");
                        continue;
                    }
                    let id = Ref::new(num, gen);
                    if let Err(e) = self.load_object(device, store, id, offset) {
                        if self.options.ignore_broken_objects {
                            error!("error while loading object {id}, offset={offset}: {e}");
                            store.safe_add_free(id);
                        } else {
                            return Err(e.context(format!(
                                "error while loading object {id}, offset={offset}"
                            )));
                        }
                    }
                }
                XrefEntry::InUse { offset: 0, gen: 0 } => {
                    // Some producers write free objects as 'n' with offset 0
                    if self.options.strict {
                        return Err(Error::with_message(
                            ErrorKind::InvalidXref,
                            "found object with 0 offset which should be 'f' instead of 'n'",
                        ));
                    }
                    warn!("treating object {num} 0 R as a free object");
                    store.add_free(Ref::new(num, 1));
                }
                XrefEntry::InUse { .. } => {}
                XrefEntry::Free { next_gen, .. } => {
                    if num != 0 {
                        store.safe_add_free(Ref::new(num, next_gen));
                    }
                }
                XrefEntry::Compressed { stream_num, .. } => {
                    compressed.entry(stream_num).or_default().push(num);
                }
                XrefEntry::Unparsed => {
                    if num != 0 {
                        store.add_free(Ref::new(num, 1));
                    }
                }
            }
        }

        // All plain objects are in; compressed ones can be expanded now
        for (stream_num, members) in compressed {
            if let Err(e) = self.expand_object_stream(device, store, stream_num, &members) {
                if self.options.ignore_broken_objects {
                    error!("loading of object stream {stream_num} 0 R failed: {e}");
                } else {
                    return Err(
                        e.context(format!("loading of object stream {stream_num} 0 R failed"))
                    );
                }
            }
            store.add_compressed_stream(stream_num);
        }

        store.audit_free_list();
        Ok(())
    }

    /// Parse the `/Encrypt` dictionary (always unencrypted), open a session
    /// and authenticate. Returns the reference of the encryption dictionary
    /// so the object loop skips it.
    fn setup_encryption(
        &mut self,
        device: &mut dyn Device,
        trailer: &Dict,
    ) -> Result<Option<Ref>> {
        let encrypt_obj = match trailer.get("Encrypt") {
            Some(obj) if !obj.is_null() => obj.clone(),
            _ => return Ok(None),
        };

        let (encrypt_dict, encrypt_ref) = match encrypt_obj {
            Object::Reference(id) => {
                let entry = self.entries.get(id.num);
                let offset = match entry {
                    XrefEntry::InUse { offset, .. } if offset > 0 => offset,
                    _ => {
                        return Err(Error::with_message(
                            ErrorKind::InvalidEncryptionDict,
                            format!("encryption dictionary references a nonexistent object {id}"),
                        ))
                    }
                };
                device.seek(SeekFrom::Start(offset))?;
                let (_, value, _) = ObjectParser::new(
                    device,
                    &mut self.lexer,
                    self.options.recursion_limit,
                    self.options.strict,
                )
                .read_indirect()
                .map_err(|e| e.context(format!("error while loading object {id}")))?;
                match value {
                    Object::Dict(dict) => (dict, Some(id)),
                    _ => {
                        return Err(Error::with_message(
                            ErrorKind::InvalidEncryptionDict,
                            "encryption object is not a dictionary",
                        ))
                    }
                }
            }
            Object::Dict(dict) => (dict, None),
            _ => {
                return Err(Error::with_message(
                    ErrorKind::InvalidEncryptionDict,
                    "the encryption entry in the trailer is neither an object nor a reference",
                ))
            }
        };

        let doc_id = document_id(trailer).ok_or_else(|| {
            Error::with_message(ErrorKind::InvalidEncryptionDict, "no document ID found in trailer")
        })?;

        let authenticator = self.options.authenticator.clone().ok_or_else(|| {
            Error::with_message(
                ErrorKind::InvalidEncryptionDict,
                "file is encrypted but no authenticator is configured",
            )
        })?;

        let mut session = authenticator.open_session(&encrypt_dict, &doc_id)?;
        let password = self.options.password.clone().unwrap_or_default();
        match session.authenticate(&password, &doc_id)? {
            AuthResult::Owner | AuthResult::User => {
                self.session = Some(session);
                Ok(encrypt_ref)
            }
            AuthResult::Failed => Err(Error::with_message(
                ErrorKind::InvalidPassword,
                "a password is required to read this PDF file",
            )),
        }
    }

    fn load_object(
        &mut self,
        device: &mut dyn Device,
        store: &mut ObjectStore,
        id: Ref,
        offset: u64,
    ) -> Result<()> {
        device.seek(SeekFrom::Start(offset))?;

        let decryptor = match &self.session {
            Some(session) => Some(session.decryptor_for(id)?),
            None => None,
        };

        let (header_id, mut value, mut span) = ObjectParser::new(
            device,
            &mut self.lexer,
            self.options.recursion_limit,
            self.options.strict,
        )
        .with_decryptor(decryptor.as_deref())
        .read_indirect()?;

        if header_id != id {
            if self.options.strict {
                return Err(Error::with_message(
                    ErrorKind::InvalidObject,
                    format!("found object with reference {header_id} different than reported {id} in xref sections"),
                ));
            }
            warn!(
                "found object with reference {header_id} different than reported {id} in xref sections"
            );
        }

        // Xref streams are never encrypted; reparse without the decryptor
        // when one was applied.
        if decryptor.is_some() && is_xref_stream(&value) {
            device.seek(SeekFrom::Start(offset))?;
            let reparsed = ObjectParser::new(
                device,
                &mut self.lexer,
                self.options.recursion_limit,
                self.options.strict,
            )
            .read_indirect()?;
            value = reparsed.1;
            span = reparsed.2;
        }

        let obj = match span {
            Some(StreamSpan { begin, end }) => {
                Indirect::with_stream(id, value, StreamData::pending(begin, end))
            }
            None => Indirect::new(id, value),
        };
        store.push(obj);
        Ok(())
    }

    fn expand_object_stream(
        &mut self,
        device: &mut dyn Device,
        store: &mut ObjectStore,
        stream_num: u32,
        members: &[u32],
    ) -> Result<()> {
        let container_id = Ref::new(stream_num, 0);
        if store.get(container_id).is_none() {
            return Err(Error::with_message(
                ErrorKind::InvalidObject,
                format!("object stream container {container_id} was never loaded"),
            ));
        }

        self.load_stream_body(device, store, container_id)?;

        let container = store.must_get(container_id)?;
        let dict = container
            .dict()
            .ok_or_else(|| {
                Error::with_message(
                    ErrorKind::InvalidObject,
                    format!("object stream container {container_id} is not a dictionary"),
                )
            })?
            .clone();
        let body = container
            .stream
            .as_ref()
            .and_then(|s| s.data())
            .ok_or_else(|| {
                Error::with_message(
                    ErrorKind::InvalidObject,
                    format!("object stream container {container_id} has no stream body"),
                )
            })?
            .to_vec();

        let decoded = self
            .options
            .pipeline
            .decode(&dict, &body)
            .map_err(|e| e.context("while decoding object stream"))?;

        ObjectStreamParser::new(
            &mut self.lexer,
            self.options.recursion_limit,
            self.options.strict,
        )
        .parse(&dict, &decoded, members, store)
    }

    fn load_all_streams(&mut self, device: &mut dyn Device, store: &mut ObjectStore) -> Result<()> {
        // Second pass: /Length may reference objects that were read later
        // than their streams.
        let pending: Vec<Ref> = store
            .iter()
            .filter(|obj| obj.stream.as_ref().is_some_and(|s| !s.is_loaded()))
            .map(|obj| obj.id())
            .collect();
        for id in pending {
            if let Err(e) = self.load_stream_body(device, store, id) {
                if self.options.ignore_broken_objects {
                    error!("unable to parse the stream for object {id}: {e}");
                } else {
                    return Err(e.context(format!("unable to parse the stream for object {id}")));
                }
            }
        }
        Ok(())
    }

    fn load_stream_body(
        &mut self,
        device: &mut dyn Device,
        store: &mut ObjectStore,
        id: Ref,
    ) -> Result<()> {
        load_stream_body(
            device,
            store,
            self.session.as_deref(),
            id,
            self.options.strict,
        )
    }

    /// The catalog may carry a `/Version` newer than the header.
    fn update_document_version(&mut self, store: &ObjectStore) -> Result<()> {
        let root = self
            .trailer
            .as_ref()
            .and_then(|t| t.get("Root"))
            .and_then(Object::as_reference);
        let catalog = match root.and_then(|id| store.get(id)) {
            Some(obj) => obj,
            None => return Ok(()),
        };
        let version_obj = match catalog.dict().and_then(|d| d.get("Version")) {
            Some(obj) => obj,
            None => return Ok(()),
        };

        match version_obj.as_name() {
            Some(name) => {
                if let Some(version) = PdfVersion::parse(name.as_str().as_bytes()) {
                    info!("updating version from {} to {version}", self.version);
                    self.version = version;
                }
            }
            None if self.options.strict => {
                return Err(Error::with_message(
                    ErrorKind::InvalidName,
                    "catalog /Version must be a name",
                ));
            }
            None => warn!("catalog /Version is not a name, ignoring"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Revision boundaries
    // ------------------------------------------------------------------

    /// Parse the revision anchored at `offset` without following `/Prev`
    /// and report the lowest in-use offset, which bounds the previous
    /// revision's bytes. `None` when the revision is not an incremental
    /// update.
    pub fn previous_revision_eof(
        device: &mut dyn Device,
        options: &ParseOptions,
        offset: u64,
    ) -> Result<Option<u64>> {
        let mut parser = PdfParser::new(options.clone());
        parser.check_magic(device)?;
        parser.read_document_structure(device, Some(offset), true)?;
        if parser.incremental_updates == 0 {
            return Ok(None);
        }

        let min_offset = parser
            .entries
            .iter()
            .filter_map(|(_, entry)| match entry {
                XrefEntry::InUse { offset, .. } => Some(offset),
                _ => None,
            })
            .min();
        Ok(min_offset)
    }
}

/// Materialize a pending stream body: resolve `/Length` (possibly an
/// indirect reference), read the raw span and decrypt it when a session is
/// active. Xref streams are exempt from decryption.
fn load_stream_body(
    device: &mut dyn Device,
    store: &mut ObjectStore,
    session: Option<&dyn EncryptSession>,
    id: Ref,
    strict: bool,
) -> Result<()> {
    let obj = store.must_get(id)?;
    let (begin, end) = match obj.stream.as_ref().map(|s| s.body()) {
        Some(StreamBody::Pending { begin, end }) => (*begin, *end),
        Some(StreamBody::Owned(_)) | None => return Ok(()),
    };
    let exempt = is_xref_stream(&obj.value);

    let end = match end {
        Some(end) => end,
        None => {
            let length = obj
                .dict()
                .and_then(|d| d.get("Length"))
                .map(|v| store.resolve(v).clone());
            match length.and_then(|v| v.as_int()).filter(|&l| l >= 0) {
                Some(length) => begin + length as u64,
                None => {
                    if strict {
                        return Err(Error::with_message(
                            ErrorKind::InvalidObject,
                            format!("invalid stream length for {id}"),
                        ));
                    }
                    determine_stream_end(device, begin)?
                }
            }
        }
    };

    device.seek(SeekFrom::Start(begin))?;
    let mut data = vec![0u8; end.saturating_sub(begin) as usize];
    device.read_exact(&mut data)?;

    if let Some(session) = session {
        if !exempt {
            data = session.decryptor_for(id)?.decrypt(&data)?;
        }
    }

    if let Some(obj) = store.get_mut(id) {
        if let Some(stream) = obj.stream.as_mut() {
            stream.set_data(data);
        }
    }
    Ok(())
}

fn is_xref_stream(value: &Object) -> bool {
    value
        .as_dict()
        .and_then(|d| d.get("Type"))
        .and_then(Object::as_name)
        .map(|n| n.as_str() == "XRef")
        .unwrap_or(false)
}

fn document_id(trailer: &Dict) -> Option<Vec<u8>> {
    trailer
        .get("ID")
        .and_then(Object::as_array)
        .and_then(|a| a.first())
        .and_then(Object::as_string)
        .map(PdfString::as_bytes)
        .map(<[u8]>::to_vec)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| acc << 8 | b as u64)
}

fn read_span(device: &mut dyn Device, span: StreamSpan) -> Result<Vec<u8>> {
    let begin = span.begin;
    let end = match span.end {
        Some(end) => end,
        None => determine_stream_end(device, begin)?,
    };
    device.seek(SeekFrom::Start(begin))?;
    let mut data = vec![0u8; end.saturating_sub(begin) as usize];
    device.read_exact(&mut data)?;
    Ok(data)
}

/// Parse one 20-byte classical xref record: `nnnnnnnnnn ggggg t EE`.
fn parse_classical_entry(record: &[u8; XREF_ENTRY_SIZE], magic_offset: u64) -> Result<XrefEntry> {
    let field = |range: std::ops::Range<usize>| -> Result<u64> {
        let text = std::str::from_utf8(&record[range])
            .map_err(|_| Error::new(ErrorKind::InvalidXref))?
            .trim();
        text.parse::<u64>()
            .map_err(|_| Error::with_message(ErrorKind::InvalidXref, format!("bad field {text:?}")))
    };

    let variant = field(0..10)?;
    let gen = field(11..16)?;
    if gen > MAX_GENERATION as u64 {
        return Err(Error::with_message(
            ErrorKind::InvalidXref,
            format!("generation {gen} out of range"),
        ));
    }

    let kind = record[17];
    let (e1, e2) = (record[18], record[19]);
    if !check_entry_eol(e1, e2) {
        return Err(Error::with_message(
            ErrorKind::InvalidXref,
            "malformed xref entry terminator",
        ));
    }

    match kind {
        b'n' => Ok(XrefEntry::InUse {
            offset: variant + magic_offset,
            gen: gen as u16,
        }),
        b'f' => Ok(XrefEntry::Free {
            next_free: variant.min(u32::MAX as u64) as u32,
            next_gen: gen as u16,
        }),
        _ => Err(Error::with_message(
            ErrorKind::InvalidXref,
            "invalid used keyword, must be either 'n' or 'f'",
        )),
    }
}

/// A single-character EOL is preceded by a space; a two-character EOL fills
/// both slots.
fn check_entry_eol(e1: u8, e2: u8) -> bool {
    (e1 == b'\r' && e2 == b'\n')
        || (e1 == b'\n' && e2 == b'\r')
        || (e1 == b' ' && (e2 == b'\r' || e2 == b'\n'))
}

/// Position the device at the start of the last occurrence of `token`
/// within `range` bytes before `search_end`. Returns whether it was found.
fn find_token_backward(
    device: &mut dyn Device,
    token: &[u8],
    range: u64,
    search_end: u64,
) -> Result<bool> {
    let window = range.min(search_end);
    let start = search_end - window;
    device.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; window as usize];
    device.read_exact(&mut buf)?;

    // Scan backward; the window may contain NUL bytes from binary streams
    let positions = buf
        .windows(token.len())
        .enumerate()
        .filter(|(_, w)| *w == token)
        .map(|(i, _)| i)
        .last();

    match positions {
        Some(idx) => {
            device.seek(SeekFrom::Start(start + idx as u64))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

// ============================================================================
// Parsed document
// ============================================================================

/// The outcome of a successful parse
pub struct ParsedDoc {
    device: Box<dyn Device>,
    store: ObjectStore,
    entries: XrefTable,
    trailer: Option<Dict>,
    version: PdfVersion,
    incremental_updates: u32,
    has_xref_stream: bool,
    session: Option<Box<dyn EncryptSession>>,
    pipeline: Arc<dyn FilterPipeline>,
}

impl std::fmt::Debug for ParsedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedDoc")
            .field("version", &self.version)
            .field("objects", &self.store.len())
            .field("incremental_updates", &self.incremental_updates)
            .field("has_xref_stream", &self.has_xref_stream)
            .field("encrypted", &self.session.is_some())
            .finish()
    }
}

impl ParsedDoc {
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ObjectStore {
        &mut self.store
    }

    pub fn trailer(&self) -> Option<&Dict> {
        self.trailer.as_ref()
    }

    /// Transfer the effective trailer out of the document.
    pub fn take_trailer(&mut self) -> Option<Dict> {
        self.trailer.take()
    }

    pub fn version(&self) -> PdfVersion {
        self.version
    }

    pub fn incremental_update_count(&self) -> u32 {
        self.incremental_updates
    }

    pub fn has_xref_stream(&self) -> bool {
        self.has_xref_stream
    }

    /// The resolved cross-reference table.
    pub fn xref(&self) -> &XrefTable {
        &self.entries
    }

    /// The raw (still filtered, already decrypted) body of a stream object,
    /// loading it on first access.
    pub fn stream_data(&mut self, id: Ref) -> Result<&[u8]> {
        self.ensure_stream_loaded(id)?;
        self.store
            .must_get(id)?
            .stream
            .as_ref()
            .and_then(|s| s.data())
            .ok_or_else(|| {
                Error::with_message(ErrorKind::InvalidObject, format!("{id} has no stream"))
            })
    }

    /// The decoded body of a stream object, run through the filter pipeline.
    pub fn decoded_stream_data(&mut self, id: Ref) -> Result<Vec<u8>> {
        self.ensure_stream_loaded(id)?;
        let obj = self.store.must_get(id)?;
        let dict = obj.dict().cloned().unwrap_or_default();
        let body = obj.stream.as_ref().and_then(|s| s.data()).ok_or_else(|| {
            Error::with_message(ErrorKind::InvalidObject, format!("{id} has no stream"))
        })?;
        self.pipeline.decode(&dict, body)
    }

    fn ensure_stream_loaded(&mut self, id: Ref) -> Result<()> {
        load_stream_body(
            self.device.as_mut(),
            &mut self.store,
            self.session.as_deref(),
            id,
            false,
        )
    }

    /// Free every object unreachable from the trailer.
    pub fn collect_garbage(&mut self) -> Result<()> {
        let trailer = self.trailer.clone().unwrap_or_default();
        self.store.collect_garbage(&trailer)
    }

    /// Lowest in-use offset of the revision anchored at `offset`; bounds
    /// the previous revision's bytes.
    pub fn previous_revision_eof(
        &mut self,
        options: &ParseOptions,
        offset: u64,
    ) -> Result<Option<u64>> {
        PdfParser::previous_revision_eof(self.device.as_mut(), options, offset)
    }
}
