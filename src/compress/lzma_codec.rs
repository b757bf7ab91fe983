//! Raw LZMA1 coder backed by liblzma.
//!
//! Properties are the classic 5-byte LZMA header: one byte packing `lc`, `lp` and `pb` as
//! `(pb * 5 + lp) * 9 + lc`, followed by the dictionary size as a little-endian `u32`.
//! liblzma always terminates a raw LZMA1 payload with an end marker. SDK encoders usually
//! omit it, so decoding stops at the stored length and never reads past it.

use std::io::{self, Read, Write};

use liblzma::stream::{Filters, LzmaOptions, Stream};

use super::{copy_decoded, EntropyCoder};
use crate::PackError;

pub const LZMA_PROPERTIES_LEN: usize = 5;

const DEFAULT_PRESET: u32 = 6;
const LITERAL_CONTEXT_BITS: u32 = 3;
const LITERAL_POSITION_BITS: u32 = 0;
const POSITION_BITS: u32 = 2;
const MIN_DICT_SIZE: u32 = 4096;

/// Dictionary size liblzma uses for each preset level.
fn preset_dict_size(preset: u32) -> u32 {
    match preset {
        0 => 256 << 10,
        1 => 1 << 20,
        2 => 2 << 20,
        3 | 4 => 4 << 20,
        5 | 6 => 8 << 20,
        7 => 16 << 20,
        8 => 32 << 20,
        _ => 64 << 20,
    }
}

fn lzma_error(e: liblzma::stream::Error) -> PackError {
    PackError::Codec(format!("liblzma: {e}"))
}

/// LZMA coder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaCoder {
    preset: u32,
    dict_size: u32,
}

impl Default for LzmaCoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LzmaCoder {
    pub fn new() -> Self {
        Self { preset: DEFAULT_PRESET, dict_size: preset_dict_size(DEFAULT_PRESET) }
    }

    /// LZMA with the given compression preset (0-9).
    pub fn with_preset(preset: u32) -> Result<Self, PackError> {
        if preset > 9 {
            return Err(PackError::Codec(format!("LZMA preset must be 0-9, got {preset}")));
        }
        Ok(Self { preset, dict_size: preset_dict_size(preset) })
    }

    /// Overrides the dictionary size (clamped to at least 4 KiB).
    pub fn dict_size(mut self, dict_size: u32) -> Self {
        self.dict_size = dict_size.max(MIN_DICT_SIZE);
        self
    }

    fn filters(preset: u32, props: &LzmaProperties) -> Result<Filters, PackError> {
        let mut options = LzmaOptions::new_preset(preset).map_err(lzma_error)?;
        options
            .literal_context_bits(props.lc)
            .literal_position_bits(props.lp)
            .position_bits(props.pb)
            .dict_size(props.dict_size);
        let mut filters = Filters::new();
        filters.lzma1(&options);
        Ok(filters)
    }

    fn own_properties(&self) -> LzmaProperties {
        LzmaProperties {
            lc: LITERAL_CONTEXT_BITS,
            lp: LITERAL_POSITION_BITS,
            pb: POSITION_BITS,
            dict_size: self.dict_size,
        }
    }
}

/// Decoded form of the 5-byte properties header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LzmaProperties {
    pub(crate) lc: u32,
    pub(crate) lp: u32,
    pub(crate) pb: u32,
    pub(crate) dict_size: u32,
}

impl LzmaProperties {
    pub(crate) fn to_bytes(self) -> [u8; LZMA_PROPERTIES_LEN] {
        let mut out = [0u8; LZMA_PROPERTIES_LEN];
        out[0] = ((self.pb * 5 + self.lp) * 9 + self.lc) as u8;
        out[1..].copy_from_slice(&self.dict_size.to_le_bytes());
        out
    }

    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, PackError> {
        if bytes.len() != LZMA_PROPERTIES_LEN {
            return Err(PackError::Codec(format!("LZMA properties must be {LZMA_PROPERTIES_LEN} bytes")));
        }
        let mut d = u32::from(bytes[0]);
        if d >= 9 * 5 * 5 {
            return Err(PackError::Codec(format!("invalid LZMA properties byte 0x{:02x}", bytes[0])));
        }
        let lc = d % 9;
        d /= 9;
        let lp = d % 5;
        let pb = d / 5;
        let dict_size = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]).max(MIN_DICT_SIZE);
        Ok(Self { lc, lp, pb, dict_size })
    }
}

impl EntropyCoder for LzmaCoder {
    fn name(&self) -> &'static str {
        "lzma"
    }

    fn properties(&self) -> Vec<u8> {
        self.own_properties().to_bytes().to_vec()
    }

    fn properties_len(&self) -> usize {
        LZMA_PROPERTIES_LEN
    }

    fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<(), PackError> {
        let filters = Self::filters(self.preset, &self.own_properties())?;
        let stream = Stream::new_raw_encoder(&filters).map_err(lzma_error)?;
        let mut encoder = liblzma::write::XzEncoder::new_stream(output, stream);
        io::copy(input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    }

    fn decode(&self, properties: &[u8], input: &mut dyn Read, output: &mut dyn Write, length: u64) -> Result<(), PackError> {
        let props = LzmaProperties::parse(properties)?;
        let filters = Self::filters(DEFAULT_PRESET, &props)?;
        let stream = Stream::new_raw_decoder(&filters).map_err(lzma_error)?;
        let mut decoder = liblzma::read::XzDecoder::new_stream(input, stream);
        copy_decoded(&mut decoder, output, length, false)
    }
}
