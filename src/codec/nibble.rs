//! Nibble-packed RLE with a CRC-16 trailer.
//!
//! Each byte packs a 4-bit quantized colour in the high nibble and a repeat
//! count in the low nibble.  Colours `0x0` and `0xF` (pure black/white)
//! escape to a two-byte token whose low 12 bits are the repeat count, capped
//! at 4095.  Every other colour replicates the nibble into both halves of
//! the sample (`(c << 4) | c`) and is capped at 15 repeats per token.
//!
//! Encode appends a big-endian CRC-16 trailer (see [`crate::checksum::crc16`])
//! computed over the payload.  Decode does NOT verify the trailer — the
//! asymmetry is part of the observed wire behaviour and deliberately kept;
//! strict validation here would reject files the originating slicers accept.
//!
//! A black/white token truncated by the end of the payload fills the
//! remainder of the image; that quirk is also load-bearing in real files.

use byteorder::{BigEndian, ByteOrder};

use crate::bitmap::LayerBitmap;
use crate::checksum::crc16;
use crate::codec::{CodecError, CodecId, LayerCodec, LayerContext};

/// Longest black/white run a single two-byte token can carry.
pub const RUN_LIMIT: u16 = 0xfff;

/// Byte length of the CRC-16 trailer appended on encode.
pub const TRAILER_LEN: usize = 2;

/// Apply the codec's 4-bit quantization exactly once.
#[inline]
pub fn canonical_sample(sample: u8) -> u8 {
    match sample >> 4 {
        0x0 => 0x00,
        0xf => 0xff,
        c => (c << 4) | c,
    }
}

pub struct NibbleCodec;

impl LayerCodec for NibbleCodec {
    fn id(&self) -> CodecId { CodecId::Nibble }

    fn decode(&self, blob: &[u8], ctx: &LayerContext) -> Result<LayerBitmap, CodecError> {
        let declared = ctx.pixel_count();
        let mut bitmap = LayerBitmap::new(ctx.width, ctx.height);

        // The payload ends where the (unverified) CRC trailer begins.
        let data = &blob[..blob.len().saturating_sub(TRAILER_LEN)];

        let mut pixel = 0usize;
        let mut i = 0usize;
        while i < data.len() {
            let b = data[i];
            let code = b >> 4;
            let mut repeat = (b & 0xf) as usize;
            let colour = match code {
                0x0 | 0xf => {
                    i += 1;
                    if i >= data.len() {
                        // Truncated long token: fill the rest of the image.
                        repeat = declared - pixel;
                    } else {
                        repeat = (repeat << 8) + data[i] as usize;
                    }
                    if code == 0 { 0x00 } else { 0xff }
                }
                c => (c << 4) | c,
            };

            if !bitmap.fill_span(&mut pixel, repeat, colour) {
                return Err(CodecError::BufferOverrun {
                    declared,
                    attempted: pixel + repeat,
                });
            }
            i += 1;
            if pixel == declared {
                break;
            }
        }

        if pixel > 0 && pixel != declared {
            return Err(CodecError::CorruptedStream {
                offset: i,
                reason: "stream ended before the declared pixel count",
            });
        }
        Ok(bitmap)
    }

    fn encode(&self, bitmap: &LayerBitmap, _ctx: &LayerContext) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        let mut last_colour: i32 = -1;
        let mut reps: u32 = 0;

        let put_reps = |out: &mut Vec<u8>, colour: i32, mut reps: u32| {
            while reps > 0 {
                let done;
                if colour == 0x0 || colour == 0xf {
                    done = reps.min(RUN_LIMIT as u32);
                    let token = (done as u16) | ((colour as u16) << 12);
                    let mut bytes = [0u8; 2];
                    BigEndian::write_u16(&mut bytes, token);
                    out.extend_from_slice(&bytes);
                } else {
                    done = reps.min(0xf);
                    out.push(done as u8 | (colour as u8) << 4);
                }
                reps -= done;
            }
        };

        for &sample in bitmap.samples() {
            let colour = (sample >> 4) as i32;
            if colour == last_colour {
                reps += 1;
            } else {
                put_reps(&mut out, last_colour, reps);
                last_colour = colour;
                reps = 1;
            }
        }
        put_reps(&mut out, last_colour, reps);

        let crc = crc16(&out);
        let mut trailer = [0u8; 2];
        BigEndian::write_u16(&mut trailer, crc);
        out.extend_from_slice(&trailer);
        Ok(out)
    }
}
