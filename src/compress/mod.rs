//! # Block Codec
//!
//! Wraps an entropy coder behind the compressed-blob envelope shipped between machines:
//!
//! ```text
//! [ coder properties (coder-defined length) ][ original length: u64 LE ][ coded payload ]
//! ```
//!
//! The coder itself is injected through [`EntropyCoder`]; the envelope logic here (length
//! prefix, exact-length decoding, overrun/underrun detection) does not depend on which coder
//! is plugged in. LZMA payloads may lack an end marker, so for them decoding simply stops at
//! the stored length and trailing data goes unnoticed. [`LzmaCoder`] produces the same layout as the LZMA SDK's
//! `WriteCoderProperties` + 8-byte size + payload, and is the default.

mod lzma_codec;
mod zstd_codec;

use std::io::{self, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

use crate::PackError;
pub use lzma_codec::{LzmaCoder, LZMA_PROPERTIES_LEN};
pub use zstd_codec::ZstdCoder;

/// Width of the original-length field that follows the coder properties.
pub const LENGTH_PREFIX_SIZE: usize = 8;

const COPY_BUF_SIZE: usize = 1 << 20; // 1 MiB

/// Defines the available compression formats.
#[derive(Serialize, Deserialize, clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    /// LZMA, compatible with archives produced by the LZMA SDK. The default.
    #[default]
    Lzma,
    /// Zstandard. Faster, not readable by LZMA-only consumers.
    Zstd,
    /// Plain storage without any compression.
    Store,
}

impl CompressionFormat {
    /// Builds a codec for this format. `level` is the LZMA preset (0-9) or the zstd level (1-22).
    pub fn codec(self, level: Option<u32>) -> Result<BlockCodec, PackError> {
        Ok(match self {
            CompressionFormat::Lzma => match level {
                Some(preset) => BlockCodec::new(LzmaCoder::with_preset(preset)?),
                None => BlockCodec::new(LzmaCoder::new()),
            },
            CompressionFormat::Zstd => match level {
                Some(level) => BlockCodec::new(ZstdCoder::with_level(level)?),
                None => BlockCodec::new(ZstdCoder::default()),
            },
            CompressionFormat::Store => BlockCodec::new(StoreCoder),
        })
    }
}

/// An entropy coder that can be plugged into a [`BlockCodec`].
pub trait EntropyCoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Parameters written at the start of the blob. Must be `properties_len()` bytes long.
    fn properties(&self) -> Vec<u8>;

    fn properties_len(&self) -> usize;

    /// Encodes all of `input` into `output`.
    fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<(), PackError>;

    /// Decodes `length` bytes from `input` into `output`, using the stored `properties`.
    fn decode(&self, properties: &[u8], input: &mut dyn Read, output: &mut dyn Write, length: u64) -> Result<(), PackError>;
}

/// The parsed head of a compressed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    pub properties: Vec<u8>,
    pub original_length: u64,
}

/// Compresses and decompresses whole streams inside the length-prefixed envelope.
pub struct BlockCodec {
    coder: Box<dyn EntropyCoder>,
}

impl Default for BlockCodec {
    fn default() -> Self {
        Self::new(LzmaCoder::new())
    }
}

impl std::fmt::Debug for BlockCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCodec").field("coder", &self.coder.name()).finish()
    }
}

impl BlockCodec {
    pub fn new<C: EntropyCoder + 'static>(coder: C) -> Self {
        Self { coder: Box::new(coder) }
    }

    pub fn coder_name(&self) -> &'static str {
        self.coder.name()
    }

    /// Size of the envelope head (properties plus length prefix) in bytes.
    pub fn header_len(&self) -> usize {
        self.coder.properties_len() + LENGTH_PREFIX_SIZE
    }

    /// Compresses everything from the current position of `input` to its end.
    ///
    /// Returns the original length stored in the header.
    pub fn compress<R, W>(&self, input: &mut R, output: &mut W) -> Result<u64, PackError>
    where
        R: Read + Seek,
        W: Write,
    {
        let start = input.stream_position()?;
        let end = input.seek(SeekFrom::End(0))?;
        input.seek(SeekFrom::Start(start))?;
        let length = end.saturating_sub(start);

        let properties = self.coder.properties();
        if properties.len() != self.coder.properties_len() {
            return Err(PackError::Codec(format!(
                "{} coder produced {} property bytes, expected {}",
                self.coder.name(),
                properties.len(),
                self.coder.properties_len()
            )));
        }
        output.write_all(&properties)?;
        output.write_all(&length.to_le_bytes())?;

        let mut counted = CountingReader { inner: (&mut *input).take(length), count: 0 };
        self.coder.encode(&mut counted, &mut *output)?;
        if counted.count != length {
            return Err(PackError::Codec(format!(
                "input changed during compression: header says {length} bytes, encoded {}",
                counted.count
            )));
        }
        output.flush()?;
        Ok(length)
    }

    /// Reads the coder properties and the stored original length.
    pub fn read_header<R: Read>(&self, input: &mut R) -> Result<BlobHeader, PackError> {
        let mut properties = vec![0u8; self.coder.properties_len()];
        input.read_exact(&mut properties).map_err(short_header)?;
        let mut length = [0u8; LENGTH_PREFIX_SIZE];
        input.read_exact(&mut length).map_err(short_header)?;
        Ok(BlobHeader { properties, original_length: u64::from_le_bytes(length) })
    }

    /// Decompresses a blob whose original length is known to be `expected_length`.
    ///
    /// Fails with `Codec` if the stored length differs or the payload does not decode to
    /// exactly that many bytes.
    pub fn decompress<R, W>(&self, input: &mut R, expected_length: u64, output: &mut W) -> Result<(), PackError>
    where
        R: Read,
        W: Write,
    {
        let header = self.read_header(input)?;
        if header.original_length != expected_length {
            return Err(PackError::Codec(format!(
                "stored length {} does not match expected length {expected_length}",
                header.original_length
            )));
        }
        self.decode_payload(&header, input, output)
    }

    /// Decompresses a blob using the length stored in its own header. Returns that length.
    pub fn decompress_stored<R, W>(&self, input: &mut R, output: &mut W) -> Result<u64, PackError>
    where
        R: Read,
        W: Write,
    {
        let header = self.read_header(input)?;
        self.decode_payload(&header, input, output)?;
        Ok(header.original_length)
    }

    fn decode_payload<R, W>(&self, header: &BlobHeader, input: &mut R, output: &mut W) -> Result<(), PackError>
    where
        R: Read,
        W: Write,
    {
        let length = header.original_length;
        let mut bounded = BoundedWriter { inner: output, limit: length, written: 0, overrun: false };
        let result = self.coder.decode(&header.properties, input, &mut bounded, length);
        if bounded.overrun {
            return Err(PackError::Codec(format!("payload decodes to more than {length} bytes")));
        }
        result?;
        if bounded.written != length {
            return Err(PackError::Codec(format!(
                "payload decoded to {} bytes, expected {length}",
                bounded.written
            )));
        }
        bounded.flush()?;
        Ok(())
    }
}

fn short_header(e: io::Error) -> PackError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PackError::Codec("blob is shorter than its header".into())
    } else {
        PackError::from(e)
    }
}

pub(crate) fn decode_error(e: io::Error) -> PackError {
    PackError::Codec(format!("payload could not be decoded: {e}"))
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Refuses writes past `limit`, remembering that it did so.
struct BoundedWriter<'a, W: Write> {
    inner: &'a mut W,
    limit: u64,
    written: u64,
    overrun: bool,
}

impl<'a, W: Write> Write for BoundedWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.limit {
            self.overrun = true;
            return Err(io::Error::new(io::ErrorKind::InvalidData, "decoded data exceeds stored length"));
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copies exactly `length` decoded bytes from `decoder` to `output`.
///
/// With `check_trailing`, the decoder must then be exhausted. Without it, decoding stops at
/// `length` and whatever follows is never read; LZMA payloads without an end marker end in
/// range-coder flush bytes that a raw decoder would turn into spurious output.
pub(crate) fn copy_decoded(
    decoder: &mut dyn Read,
    output: &mut dyn Write,
    length: u64,
    check_trailing: bool,
) -> Result<(), PackError> {
    let mut buf = vec![0u8; length.clamp(1, COPY_BUF_SIZE as u64) as usize];
    let mut remaining = length;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match decoder.read(&mut buf[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(decode_error(e)),
        };
        if n == 0 {
            return Err(PackError::Codec(format!(
                "payload ended after {} of {length} bytes",
                length - remaining
            )));
        }
        output.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    if !check_trailing {
        return Ok(());
    }
    let mut extra = [0u8; 1];
    loop {
        match decoder.read(&mut extra) {
            Ok(0) => return Ok(()),
            Ok(_) => return Err(PackError::Codec(format!("payload decodes to more than {length} bytes"))),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(decode_error(e)),
        }
    }
}

/// Identity coder: the payload is the original bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCoder;

impl EntropyCoder for StoreCoder {
    fn name(&self) -> &'static str {
        "store"
    }

    fn properties(&self) -> Vec<u8> {
        Vec::new()
    }

    fn properties_len(&self) -> usize {
        0
    }

    fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<(), PackError> {
        io::copy(input, output)?;
        Ok(())
    }

    fn decode(&self, _properties: &[u8], input: &mut dyn Read, output: &mut dyn Write, length: u64) -> Result<(), PackError> {
        copy_decoded(input, output, length, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn compress_bytes(codec: &BlockCodec, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let len = codec.compress(&mut Cursor::new(data), &mut out).unwrap();
        assert_eq!(len, data.len() as u64);
        out
    }

    #[test]
    fn store_envelope_layout() {
        let codec = BlockCodec::new(StoreCoder);
        let blob = compress_bytes(&codec, b"hello");
        assert_eq!(&blob[..8], &5u64.to_le_bytes());
        assert_eq!(&blob[8..], b"hello");
        assert_eq!(codec.header_len(), 8);
    }

    #[test]
    fn compress_starts_at_current_position() {
        let codec = BlockCodec::new(StoreCoder);
        let mut input = Cursor::new(b"skipDATA".to_vec());
        input.set_position(4);
        let mut blob = Vec::new();
        assert_eq!(codec.compress(&mut input, &mut blob).unwrap(), 4);
        assert_eq!(&blob[8..], b"DATA");
    }

    #[test]
    fn wrong_expected_length_is_a_codec_error() {
        let codec = BlockCodec::new(StoreCoder);
        let blob = compress_bytes(&codec, b"hello");
        let err = codec.decompress(&mut &blob[..], 4, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PackError::Codec(_)));
        let mut out = Vec::new();
        codec.decompress(&mut &blob[..], 5, &mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn underrun_and_overrun_are_codec_errors() {
        let codec = BlockCodec::new(StoreCoder);
        let blob = compress_bytes(&codec, b"hello");

        let short = &blob[..blob.len() - 1];
        assert!(matches!(codec.decompress_stored(&mut &short[..], &mut Vec::new()), Err(PackError::Codec(_))));

        let mut long = blob.clone();
        long.push(b'!');
        assert!(matches!(codec.decompress_stored(&mut &long[..], &mut Vec::new()), Err(PackError::Codec(_))));
    }

    #[test]
    fn truncated_header_is_a_codec_error() {
        let codec = BlockCodec::default();
        assert!(matches!(codec.read_header(&mut &[0x5d, 0, 0][..]), Err(PackError::Codec(_))));
    }

    /// A coder that emits twice the bytes it should, to prove the envelope catches it.
    struct Doubling;

    impl EntropyCoder for Doubling {
        fn name(&self) -> &'static str {
            "doubling"
        }
        fn properties(&self) -> Vec<u8> {
            vec![7]
        }
        fn properties_len(&self) -> usize {
            1
        }
        fn encode(&self, input: &mut dyn Read, output: &mut dyn Write) -> Result<(), PackError> {
            io::copy(input, output)?;
            Ok(())
        }
        fn decode(&self, properties: &[u8], input: &mut dyn Read, output: &mut dyn Write, _length: u64) -> Result<(), PackError> {
            assert_eq!(properties, &[7]);
            let mut data = Vec::new();
            input.read_to_end(&mut data)?;
            output.write_all(&data)?;
            output.write_all(&data)?;
            Ok(())
        }
    }

    #[test]
    fn envelope_rejects_misbehaving_coder() {
        let codec = BlockCodec::new(Doubling);
        let blob = compress_bytes(&codec, b"abc");
        assert_eq!(blob[0], 7);
        let err = codec.decompress_stored(&mut &blob[..], &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PackError::Codec(msg) if msg.contains("more than 3")));
    }

    #[test]
    fn every_format_round_trips() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        for format in [CompressionFormat::Lzma, CompressionFormat::Zstd, CompressionFormat::Store] {
            let codec = format.codec(None).unwrap();
            let blob = compress_bytes(&codec, &data);
            let mut out = Vec::new();
            codec.decompress(&mut &blob[..], data.len() as u64, &mut out).unwrap();
            assert_eq!(out, data, "{format:?}");
        }
    }

    #[test]
    fn empty_input_round_trips() {
        for format in [CompressionFormat::Lzma, CompressionFormat::Zstd, CompressionFormat::Store] {
            let codec = format.codec(None).unwrap();
            let blob = compress_bytes(&codec, b"");
            let mut out = Vec::new();
            assert_eq!(codec.decompress_stored(&mut &blob[..], &mut out).unwrap(), 0);
            assert!(out.is_empty());
        }
    }

    #[test]
    fn format_names_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&CompressionFormat::Lzma).unwrap(), "\"lzma\"");
        assert_eq!(CompressionFormat::default(), CompressionFormat::Lzma);
    }
}
