//! Filter pipeline boundary
//!
//! The core consumes decoded byte spans; filter implementations live behind
//! the [`FilterPipeline`] trait. The built-in [`FlatePipeline`] handles
//! `FlateDecode` (with PNG and TIFF predictors) so cross-reference streams
//! and object streams decode without external help, and passes unfiltered
//! streams through untouched. Anything else is for a caller-supplied
//! pipeline.

use crate::error::{Error, ErrorKind, Result};
use crate::object::{Dict, Object};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Decodes stream bodies according to the stream dictionary
pub trait FilterPipeline {
    /// Apply the `/Filter` chain described by `dict` to `data`.
    fn decode(&self, dict: &Dict, data: &[u8]) -> Result<Vec<u8>>;
}

/// Built-in pipeline: identity for unfiltered streams, `FlateDecode` with
/// predictor support for everything the xref machinery needs
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatePipeline;

impl FilterPipeline for FlatePipeline {
    fn decode(&self, dict: &Dict, data: &[u8]) -> Result<Vec<u8>> {
        let filters = filter_names(dict);
        if filters.is_empty() {
            return Ok(data.to_vec());
        }
        if filters.len() > 1 {
            return Err(Error::with_message(
                ErrorKind::InvalidDataType,
                "filter chains are not supported by the built-in pipeline",
            ));
        }
        match filters[0].as_str() {
            "FlateDecode" | "Fl" => {
                let inflated = inflate(data)?;
                match decode_parms(dict) {
                    Some(parms) => apply_predictor(&inflated, &parms),
                    None => Ok(inflated),
                }
            }
            other => Err(Error::with_message(
                ErrorKind::InvalidDataType,
                format!("unsupported filter /{other}"),
            )),
        }
    }
}

fn filter_names(dict: &Dict) -> Vec<String> {
    match dict.get("Filter") {
        Some(Object::Name(name)) => vec![name.as_str().to_string()],
        Some(Object::Array(array)) => array
            .iter()
            .filter_map(Object::as_name)
            .map(|n| n.as_str().to_string())
            .collect(),
        _ => Vec::new(),
    }
}

/// Flate predictor parameters from `/DecodeParms`
#[derive(Debug, Clone, Copy)]
struct PredictorParams {
    predictor: i64,
    colors: usize,
    bits_per_component: usize,
    columns: usize,
}

fn decode_parms(dict: &Dict) -> Option<PredictorParams> {
    let parms = match dict.get("DecodeParms") {
        Some(Object::Dict(d)) => d,
        Some(Object::Array(array)) => array.iter().find_map(Object::as_dict)?,
        _ => return None,
    };
    let predictor = parms.get("Predictor").and_then(Object::as_int).unwrap_or(1);
    if predictor <= 1 {
        return None;
    }
    Some(PredictorParams {
        predictor,
        colors: parms.get("Colors").and_then(Object::as_int).unwrap_or(1) as usize,
        bits_per_component: parms
            .get("BitsPerComponent")
            .and_then(Object::as_int)
            .unwrap_or(8) as usize,
        columns: parms.get("Columns").and_then(Object::as_int).unwrap_or(1) as usize,
    })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::with_message(ErrorKind::InvalidDataType, format!("inflate: {e}")))?;
    Ok(out)
}

fn apply_predictor(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    let colors = params.colors.max(1);
    let bits = params.bits_per_component.max(1);
    let columns = params.columns.max(1);
    let bytes_per_pixel = (colors * bits).div_ceil(8).max(1);
    let bytes_per_row = (colors * bits * columns).div_ceil(8);

    match params.predictor {
        2 => Ok(tiff_predictor(data, bytes_per_row, bytes_per_pixel)),
        10..=15 => png_predictor(data, bytes_per_row, bytes_per_pixel),
        other => Err(Error::with_message(
            ErrorKind::InvalidDataType,
            format!("unsupported predictor {other}"),
        )),
    }
}

fn tiff_predictor(data: &[u8], bytes_per_row: usize, bytes_per_pixel: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for row in data.chunks(bytes_per_row) {
        let row_start = out.len();
        for (i, &byte) in row.iter().enumerate() {
            let left = if i >= bytes_per_pixel {
                out[row_start + i - bytes_per_pixel]
            } else {
                0
            };
            out.push(byte.wrapping_add(left));
        }
    }
    out
}

fn png_predictor(data: &[u8], bytes_per_row: usize, bytes_per_pixel: usize) -> Result<Vec<u8>> {
    // Each row is prefixed with one PNG filter-type byte
    let row_size = bytes_per_row + 1;
    let mut out = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; bytes_per_row];

    for row_data in data.chunks(row_size) {
        let (&filter_type, row) = match row_data.split_first() {
            Some(split) => split,
            None => continue,
        };
        let mut decoded = Vec::with_capacity(bytes_per_row);

        for (i, &byte) in row.iter().enumerate() {
            let left = if i >= bytes_per_pixel {
                decoded[i - bytes_per_pixel]
            } else {
                0
            };
            let up = prev_row.get(i).copied().unwrap_or(0);
            let up_left = if i >= bytes_per_pixel {
                prev_row.get(i - bytes_per_pixel).copied().unwrap_or(0)
            } else {
                0
            };

            let value = match filter_type {
                0 => byte,
                1 => byte.wrapping_add(left),
                2 => byte.wrapping_add(up),
                3 => byte.wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => byte.wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(Error::with_message(
                        ErrorKind::InvalidDataType,
                        format!("invalid PNG filter type {other}"),
                    ))
                }
            };
            decoded.push(value);
        }

        out.extend_from_slice(&decoded);
        prev_row.resize(decoded.len(), 0);
        prev_row.copy_from_slice(&decoded);
    }

    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
