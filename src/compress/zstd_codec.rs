//! Zstandard coder. The 4-byte property block records the level the blob was written with;
//! decoding does not need it.

use std::io::{self, Read, Write};

use super::{copy_decoded, decode_error, EntropyCoder};
use crate::PackError;

const DEFAULT_LEVEL: i32 = 3;
const MAX_LEVEL: u32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdCoder {
    level: i32,
}

impl Default for ZstdCoder {
    fn default() -> Self {
        Self { level: DEFAULT_LEVEL }
    }
}

impl ZstdCoder {
    /// Zstandard compression level (1-22). Higher levels offer better compression at the cost of speed.
    pub fn with_level(level: u32) -> Result<Self, PackError> {
        if !(1..=MAX_LEVEL).contains(&level) {
            return Err(PackError::Codec(format!("zstd level must be 1-{MAX_LEVEL}, got {level}")));
        }
        Ok(Self { level: level as i32 })
    }
}

impl EntropyCoder for ZstdCoder {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn properties(&self) -> Vec<u8> {
        self.level.to_le_bytes().to_vec()
    }

    fn properties_len(&self) -> usize {
        4
    }

    fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<(), PackError> {
        let mut encoder = zstd::stream::Encoder::new(output, self.level)?;
        encoder.include_checksum(true)?;
        io::copy(input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    }

    fn decode(&self, _properties: &[u8], input: &mut dyn Read, output: &mut dyn Write, length: u64) -> Result<(), PackError> {
        let mut decoder = zstd::stream::Decoder::new(input).map_err(decode_error)?;
        copy_decoded(&mut decoder, output, length, true)
    }
}
