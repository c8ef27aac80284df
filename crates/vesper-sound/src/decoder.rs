//! Sound data decoders.
//!
//! Playback requests hand the engine raw bytes plus a [`SoundFormat`] tag.
//! Raw PCM passes through untouched; legacy Creative Voice (VOC) assets are
//! unpacked here into 8-bit unsigned PCM. Decoding is pure and synchronous,
//! with no state retained across calls.

use std::borrow::Cow;

use thiserror::Error;
use tracing::debug;

/// VOC files open with this signature.
const VOC_MAGIC: &[u8] = b"Creative Voice File\x1a";

/// Format tag attached to the raw bytes of a playback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundFormat {
    /// Already-decoded PCM matching the request's sample description.
    Raw,
    /// Creative Voice File container (legacy speech/sfx assets).
    Voc,
}

/// Decoder failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The data does not carry the Creative Voice File signature.
    #[error("data is not a Creative Voice file")]
    NotVoc,

    /// A block header or payload ran past the end of the data.
    #[error("truncated VOC data at offset {0}")]
    Truncated(usize),

    /// The sound data uses a compressed codec this engine does not ship.
    #[error("unsupported VOC codec {0:#04x}")]
    UnsupportedCodec(u8),

    /// The container held no sound data blocks at all.
    #[error("VOC file contains no sound data")]
    NoSoundData,
}

/// Decoded PCM plus any sample-rate override the container dictates.
#[derive(Debug)]
pub struct DecodedSound<'a> {
    /// PCM bytes; borrowed for raw input, owned for decoded containers.
    pub pcm: Cow<'a, [u8]>,
    /// Sample rate read from the container, if it carries one.
    pub sample_rate: Option<u32>,
}

/// Decodes `data` according to its format tag.
pub fn decode(data: &[u8], format: SoundFormat) -> Result<DecodedSound<'_>, DecodeError> {
    match format {
        SoundFormat::Raw => Ok(DecodedSound {
            pcm: Cow::Borrowed(data),
            sample_rate: None,
        }),
        SoundFormat::Voc => {
            let (pcm, sample_rate) = decode_voc(data)?;
            Ok(DecodedSound {
                pcm: Cow::Owned(pcm),
                sample_rate: Some(sample_rate),
            })
        },
    }
}

/// Unpacks a Creative Voice File into 8-bit unsigned PCM.
///
/// Handles block type 1 (sound data), type 2 (continuation), and type 0
/// (terminator); silence, markers, text, and repeat blocks are skipped. Only
/// codec 0 (uncompressed 8-bit) is supported. The sample rate comes from the
/// first sound-data block: `1_000_000 / (256 - rate_byte)`.
fn decode_voc(data: &[u8]) -> Result<(Vec<u8>, u32), DecodeError> {
    if data.len() < VOC_MAGIC.len() + 2 || !data.starts_with(VOC_MAGIC) {
        return Err(DecodeError::NotVoc);
    }

    let offset = VOC_MAGIC.len();
    let header_size = usize::from(u16::from_le_bytes([data[offset], data[offset + 1]]));
    if header_size < offset + 2 || header_size > data.len() {
        return Err(DecodeError::Truncated(offset));
    }

    let mut pcm = Vec::new();
    let mut sample_rate = None;
    let mut cursor = header_size;

    while cursor < data.len() {
        let block_type = data[cursor];
        cursor += 1;

        if block_type == 0 {
            break;
        }

        if cursor + 3 > data.len() {
            return Err(DecodeError::Truncated(cursor));
        }
        let block_len = usize::from(data[cursor])
            | usize::from(data[cursor + 1]) << 8
            | usize::from(data[cursor + 2]) << 16;
        cursor += 3;

        if cursor + block_len > data.len() {
            return Err(DecodeError::Truncated(cursor));
        }
        let block = &data[cursor..cursor + block_len];
        cursor += block_len;

        match block_type {
            // Sound data: rate byte, codec byte, then samples.
            1 => {
                if block.len() < 2 {
                    return Err(DecodeError::Truncated(cursor));
                }
                let rate_byte = block[0];
                let codec = block[1];
                if codec != 0 {
                    return Err(DecodeError::UnsupportedCodec(codec));
                }
                if sample_rate.is_none() {
                    sample_rate = Some(1_000_000 / (256 - u32::from(rate_byte)));
                }
                pcm.extend_from_slice(&block[2..]);
            },
            // Continuation of the previous sound data block.
            2 => pcm.extend_from_slice(block),
            // Silence, markers, text, repeats: nothing to render.
            other => debug!(block_type = other, "skipping VOC block"),
        }
    }

    match sample_rate {
        Some(rate) if !pcm.is_empty() => Ok((pcm, rate)),
        _ => Err(DecodeError::NoSoundData),
    }
}
