//! Shared fixtures: synthetic PDF builders and a mock encryption gate.
#![allow(dead_code)]

use picopdf::{AuthResult, Authenticator, Decryptor, Dict, EncryptSession, Ref};

/// Append an indirect object, returning its byte offset.
pub fn push_obj(pdf: &mut Vec<u8>, num: u32, body: &str) -> u64 {
    let offset = pdf.len() as u64;
    pdf.extend_from_slice(format!("{num} 0 obj\n{body}\nendobj\n").as_bytes());
    offset
}

/// Append a stream object with a correct `/Length`, returning its offset.
/// `dict_extra` lands inside the dictionary, after the length.
pub fn push_stream_obj(pdf: &mut Vec<u8>, num: u32, dict_extra: &str, data: &[u8]) -> u64 {
    let offset = pdf.len() as u64;
    pdf.extend_from_slice(
        format!("{num} 0 obj\n<< /Length {} {dict_extra} >>\nstream\n", data.len()).as_bytes(),
    );
    pdf.extend_from_slice(data);
    pdf.extend_from_slice(b"\nendstream\nendobj\n");
    offset
}

/// A 20-byte in-use entry line.
pub fn entry_in_use(offset: u64, gen: u16) -> String {
    format!("{offset:010} {gen:05} n \n")
}

/// A 20-byte free entry line.
pub fn entry_free(next_free: u32, gen: u16) -> String {
    format!("{next_free:010} {gen:05} f \n")
}

/// Append a classical xref section plus trailer, returning the offset of
/// the `xref` keyword. Each subsection is `(first, entry lines)`.
pub fn push_xref_table(
    pdf: &mut Vec<u8>,
    subsections: &[(u32, Vec<String>)],
    trailer: &str,
) -> u64 {
    let offset = pdf.len() as u64;
    pdf.extend_from_slice(b"xref\n");
    for (first, entries) in subsections {
        pdf.extend_from_slice(format!("{first} {}\n", entries.len()).as_bytes());
        for entry in entries {
            pdf.extend_from_slice(entry.as_bytes());
        }
    }
    pdf.extend_from_slice(format!("trailer\n{trailer}\n").as_bytes());
    offset
}

/// Append `startxref` and the EOF marker.
pub fn push_footer(pdf: &mut Vec<u8>, xref_offset: u64) {
    pdf.extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF").as_bytes());
}

/// One fixed-width xref-stream record.
pub fn xref_stream_record(w: (usize, usize, usize), f1: u64, f2: u64, f3: u64) -> Vec<u8> {
    let mut out = Vec::new();
    for (width, value) in [(w.0, f1), (w.1, f2), (w.2, f3)] {
        for shift in (0..width).rev() {
            out.push((value >> (shift * 8)) as u8);
        }
    }
    out
}

/// The minimal one-page document: Catalog -> Pages -> Page.
pub fn minimal_pdf() -> Vec<u8> {
    let mut pdf = b"%PDF-1.4\n".to_vec();
    let off1 = push_obj(&mut pdf, 1, "<< /Type /Catalog /Pages 2 0 R >>");
    let off2 = push_obj(&mut pdf, 2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    let off3 = push_obj(&mut pdf, 3, "<< /Type /Page /Parent 2 0 R /Contents [] >>");
    let xref = push_xref_table(
        &mut pdf,
        &[(
            0,
            vec![
                entry_free(0, 65535),
                entry_in_use(off1, 0),
                entry_in_use(off2, 0),
                entry_in_use(off3, 0),
            ],
        )],
        "<< /Size 4 /Root 1 0 R >>",
    );
    push_footer(&mut pdf, xref);
    pdf
}

// ============================================================================
// Mock encryption gate: XOR keyed by object number
// ============================================================================

pub struct XorAuthenticator;

pub struct XorSession;

pub struct XorDecryptor {
    key: u8,
}

pub fn xor_key(id: Ref) -> u8 {
    (id.num as u8) ^ 0x5A
}

impl Authenticator for XorAuthenticator {
    fn open_session(
        &self,
        _encrypt: &Dict,
        _doc_id: &[u8],
    ) -> picopdf::Result<Box<dyn EncryptSession>> {
        Ok(Box::new(XorSession))
    }
}

impl EncryptSession for XorSession {
    fn authenticate(&mut self, password: &[u8], _doc_id: &[u8]) -> picopdf::Result<AuthResult> {
        match password {
            b"owner" => Ok(AuthResult::Owner),
            b"user" => Ok(AuthResult::User),
            _ => Ok(AuthResult::Failed),
        }
    }

    fn decryptor_for(&self, id: Ref) -> picopdf::Result<Box<dyn Decryptor>> {
        Ok(Box::new(XorDecryptor { key: xor_key(id) }))
    }
}

impl Decryptor for XorDecryptor {
    fn decrypt(&self, data: &[u8]) -> picopdf::Result<Vec<u8>> {
        Ok(data.iter().map(|b| b ^ self.key).collect())
    }
}
