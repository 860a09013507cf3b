//! 7-bit-extend variable-length RLE.
//!
//! Runs are `(colour, length)` pairs.  The colour byte carries the top 7 bits
//! of the sample (`sample >> 1`); bit 7 marks a run of length ≥ 2, in which
//! case 1–4 length bytes follow, selected by their leading bit pattern:
//!
//! ```text
//! 0xxxxxxx                      7-bit length
//! 10xxxxxx B                   14-bit length
//! 110xxxxx B B                 21-bit length
//! 1110xxxx B B B               28-bit length
//! ```
//!
//! Decode reconstructs non-zero colours as `(colour << 1) | 1`.  The mapping
//! is intentionally lossy and idempotent: the discarded LSB never
//! round-trips, and re-encoding a decoded bitmap reproduces the same colour
//! byte as encoding the original.

use crate::bitmap::LayerBitmap;
use crate::codec::{CodecError, CodecId, LayerCodec, LayerContext};

/// Apply the codec's documented bit-depth reduction exactly once.
/// `decode(encode(x)) == canonical_sample(x)` for every sample.
#[inline]
pub fn canonical_sample(sample: u8) -> u8 {
    let colour = sample >> 1;
    if colour != 0 { (colour << 1) | 1 } else { 0 }
}

pub struct Grey7Codec;

impl LayerCodec for Grey7Codec {
    fn id(&self) -> CodecId { CodecId::Grey7 }

    fn decode(&self, blob: &[u8], ctx: &LayerContext) -> Result<LayerBitmap, CodecError> {
        let declared = ctx.pixel_count();
        let mut bitmap = LayerBitmap::new(ctx.width, ctx.height);
        let mut pixel = 0usize;

        let mut n = 0usize;
        while n < blob.len() {
            let mut code = blob[n];
            let mut stride = 1usize;

            if code & 0x80 == 0x80 {
                // It's a run; the colour is in the low 7 bits.
                code &= 0x7f;
                n += 1;
                let slen = *blob.get(n).ok_or(CodecError::CorruptedStream {
                    offset: n,
                    reason: "run token truncated before length byte",
                })?;

                if slen & 0x80 == 0 {
                    stride = slen as usize;
                } else if slen & 0xc0 == 0x80 {
                    let b = fetch(blob, n + 1)?;
                    stride = ((slen as usize & 0x3f) << 8) + b as usize;
                    n += 1;
                } else if slen & 0xe0 == 0xc0 {
                    let b1 = fetch(blob, n + 1)?;
                    let b2 = fetch(blob, n + 2)?;
                    stride = ((slen as usize & 0x1f) << 16)
                        + ((b1 as usize) << 8)
                        + b2 as usize;
                    n += 2;
                } else if slen & 0xf0 == 0xe0 {
                    let b1 = fetch(blob, n + 1)?;
                    let b2 = fetch(blob, n + 2)?;
                    let b3 = fetch(blob, n + 3)?;
                    stride = ((slen as usize & 0x0f) << 24)
                        + ((b1 as usize) << 16)
                        + ((b2 as usize) << 8)
                        + b3 as usize;
                    n += 3;
                } else {
                    return Err(CodecError::CorruptedStream {
                        offset: n,
                        reason: "illegal leading bits in run length byte",
                    });
                }
            }

            // Bit-extend from the 7-bit greymap back to 8 bits.
            if code != 0 {
                code = (code << 1) | 1;
            }

            if !bitmap.fill_span(&mut pixel, stride, code) {
                return Err(CodecError::BufferOverrun {
                    declared,
                    attempted: pixel + stride,
                });
            }
            n += 1;
        }

        if pixel != declared {
            return Err(CodecError::CorruptedStream {
                offset: blob.len(),
                reason: "stream ended before the declared pixel count",
            });
        }
        Ok(bitmap)
    }

    fn encode(&self, bitmap: &LayerBitmap, _ctx: &LayerContext) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        let mut colour: u8 = u8::MAX >> 1;
        let mut stride: u64 = 0;

        for &sample in bitmap.samples() {
            let grey7 = sample >> 1;
            if grey7 == colour {
                stride += 1;
            } else {
                push_run(&mut out, colour, stride);
                colour = grey7;
                stride = 1;
            }
        }
        push_run(&mut out, colour, stride);
        Ok(out)
    }
}

#[inline]
fn fetch(blob: &[u8], at: usize) -> Result<u8, CodecError> {
    blob.get(at).copied().ok_or(CodecError::CorruptedStream {
        offset: at,
        reason: "run length bytes truncated",
    })
}

fn push_run(out: &mut Vec<u8>, colour: u8, mut stride: u64) {
    while stride > 0 {
        // A single token holds at most a 28-bit length.
        let chunk = stride.min(0x0fff_ffff);
        stride -= chunk;

        let mut lead = colour;
        if chunk > 1 {
            lead |= 0x80;
        }
        out.push(lead);

        if chunk <= 1 {
            continue; // no length byte needed
        }
        if chunk <= 0x7f {
            out.push(chunk as u8);
        } else if chunk <= 0x3fff {
            out.push((chunk >> 8) as u8 | 0x80);
            out.push(chunk as u8);
        } else if chunk <= 0x1f_ffff {
            out.push((chunk >> 16) as u8 | 0xc0);
            out.push((chunk >> 8) as u8);
            out.push(chunk as u8);
        } else {
            out.push((chunk >> 24) as u8 | 0xe0);
            out.push((chunk >> 16) as u8);
            out.push((chunk >> 8) as u8);
            out.push(chunk as u8);
        }
    }
}
