//! Layer codec registry: the closed set of RLE schemes used by slice-file
//! containers.
//!
//! # Identity rules
//! Every codec is identified by a [`CodecId`] and a one-byte wire tag.  The
//! tag is what container layer records carry; a reader that encounters a tag
//! not in this registry MUST fail immediately — there is no negotiation and
//! no fallback codec.
//!
//! # Statelessness
//! Codecs retain no state across layers.  Every decode/encode call receives
//! an explicit [`LayerContext`] (resolution, antialias configuration) instead
//! of a back pointer to the owning container, and operates on exclusively
//! owned buffers.
//!
//! # Lossy bit depth
//! Several codecs store fewer than 8 bits per sample.  The decoded buffer is
//! the canonical reconstructed value: re-encoding a decoded bitmap always
//! reproduces the same bytes, but the discarded low bits of the pre-encode
//! source never round-trip and must not be assumed to.

pub mod bitplane;
pub mod diffchunk;
pub mod grey7;
pub mod nibble;
pub mod rgb15;

use thiserror::Error;

use crate::bitmap::LayerBitmap;

// ── Wire tags ────────────────────────────────────────────────────────────────
//
// These values are permanent; a tag is never reused.

pub const TAG_GREY7:     u8 = 0x01;
pub const TAG_BITPLANE:  u8 = 0x02;
pub const TAG_DIFFCHUNK: u8 = 0x03;
pub const TAG_NIBBLE:    u8 = 0x04;

// ── CodecId ──────────────────────────────────────────────────────────────────

/// Runtime discriminant for the layer codecs.
///
/// The preview codec ([`rgb15`]) is not listed here: it operates on RGB
/// thumbnails, never on layer greymaps, and is dispatched statically by the
/// format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// 7-bit-extend variable-length RLE.
    Grey7,
    /// N stacked 1-bit planes summed at decode time.
    Bitplane,
    /// Chunk-typed RLE with a magic byte and complement-of-sum checksum.
    DiffChunk,
    /// Nibble-packed RLE with a CRC-16 trailer.
    Nibble,
}

impl CodecId {
    /// The one-byte wire tag written into layer records.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            CodecId::Grey7     => TAG_GREY7,
            CodecId::Bitplane  => TAG_BITPLANE,
            CodecId::DiffChunk => TAG_DIFFCHUNK,
            CodecId::Nibble    => TAG_NIBBLE,
        }
    }

    /// Resolve a wire tag.  Unknown tags are an error, not a skip.
    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            TAG_GREY7     => Ok(CodecId::Grey7),
            TAG_BITPLANE  => Ok(CodecId::Bitplane),
            TAG_DIFFCHUNK => Ok(CodecId::DiffChunk),
            TAG_NIBBLE    => Ok(CodecId::Nibble),
            _             => Err(CodecError::UnsupportedVariant { tag }),
        }
    }

    /// Human-readable name (diagnostics only — never parsed back).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Grey7     => "grey7",
            CodecId::Bitplane  => "bitplane",
            CodecId::DiffChunk => "diffchunk",
            CodecId::Nibble    => "nibble",
        }
    }
}

// ── LayerContext ─────────────────────────────────────────────────────────────

/// Which threshold formula the bitplane encoder applies when splitting one
/// greymap into N binary exposures.  A container format declares this at the
/// header level; it is never chosen per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdRule {
    /// `256 / N * plane - 1` (wrapping), planes indexed from 0.
    Legacy,
    /// `255 * level / (N + 1) + 1`, levels indexed from 1.
    Scaled,
}

/// Immutable per-call context handed to every codec.
///
/// This replaces the owning-container back pointer the layer records would
/// otherwise need: everything a codec can legitimately depend on is here.
#[derive(Debug, Clone, Copy)]
pub struct LayerContext {
    pub width:     u32,
    pub height:    u32,
    /// Number of stacked binary exposures for the bitplane codec.  Must be a
    /// power of two between 1 and 16; other codecs ignore it.
    pub antialias: u8,
    pub threshold: ThresholdRule,
}

impl LayerContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, antialias: 1, threshold: ThresholdRule::Legacy }
    }

    pub fn with_antialias(mut self, level: u8, rule: ThresholdRule) -> Self {
        self.antialias = level.max(1);
        self.threshold = rule;
        self
    }

    /// Declared pixel count for one layer.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

/// Codec failure taxonomy.  Every variant is fatal for the file being
/// processed: the load/save aborts and nothing is retried.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Malformed RLE structure: bad magic, illegal leading-bit pattern, or a
    /// stream that ends before producing the declared pixel count.
    #[error("corrupted RLE stream at byte {offset}: {reason}")]
    CorruptedStream { offset: usize, reason: &'static str },

    /// An inline or trailing checksum did not match the recomputed value.
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    /// A layer record carries a data-type tag this build does not implement.
    #[error("unsupported layer data variant {tag:#04x}")]
    UnsupportedVariant { tag: u8 },

    /// Decode tried to write past the declared pixel count.  The destination
    /// buffer is never actually overrun; the write is refused and the decode
    /// aborted.
    #[error("decode overran the declared pixel count ({declared} pixels, write would reach {attempted})")]
    BufferOverrun { declared: usize, attempted: usize },
}

// ── Codec trait ──────────────────────────────────────────────────────────────

/// A layer codec: pixel buffer ⇄ byte sequence, both directions pure
/// functions of their inputs.
pub trait LayerCodec: Send + Sync {
    fn id(&self) -> CodecId;

    /// Decode `blob` into a bitmap of exactly `ctx.pixel_count()` samples.
    /// Any mismatch between the stream and the declared count is corruption.
    fn decode(&self, blob: &[u8], ctx: &LayerContext) -> Result<LayerBitmap, CodecError>;

    /// Encode a bitmap.  The output is byte-deterministic: identical inputs
    /// always produce identical bytes (required for deduplication).
    fn encode(&self, bitmap: &LayerBitmap, ctx: &LayerContext) -> Result<Vec<u8>, CodecError>;
}

/// Resolve a [`CodecId`] to its implementation.
pub fn get_codec(id: CodecId) -> Box<dyn LayerCodec> {
    match id {
        CodecId::Grey7     => Box::new(grey7::Grey7Codec),
        CodecId::Bitplane  => Box::new(bitplane::BitplaneCodec),
        CodecId::DiffChunk => Box::new(diffchunk::DiffChunkCodec::default()),
        CodecId::Nibble    => Box::new(nibble::NibbleCodec),
    }
}

/// Resolve a wire tag to its implementation, failing hard on unknown tags.
pub fn get_codec_by_tag(tag: u8) -> Result<Box<dyn LayerCodec>, CodecError> {
    Ok(get_codec(CodecId::from_tag(tag)?))
}
