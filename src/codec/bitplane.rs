//! Multi-bitplane 1-bit RLE — antialiasing via stacked exposures.
//!
//! "Antialias level N" means the greymap is stored as N independent binary
//! exposures at N thresholds.  Each token is one byte: bit 7 is the pixel
//! state, bits 0–6 the run length (max 125).  There is no multi-byte length
//! extension in this scheme.
//!
//! Decode sums the per-plane hits and maps the count back to grey:
//! `sample = sum * (256 / N)`, minus one when positive.  The threshold rule
//! used on encode is declared by the container format (see
//! [`ThresholdRule`]), never chosen per call.

use crate::bitmap::LayerBitmap;
use crate::codec::{CodecError, CodecId, LayerCodec, LayerContext, ThresholdRule};

/// Longest run a single token can carry.
pub const RUN_LIMIT: u8 = 0x7d;

/// The encode threshold for one plane under the given rule.
///
/// `plane` is 0-based; the `Scaled` rule internally uses the 1-based level.
#[inline]
pub fn plane_threshold(rule: ThresholdRule, antialias: u8, plane: u8) -> u8 {
    match rule {
        ThresholdRule::Legacy => ((256 / antialias as i32) * plane as i32 - 1) as u8,
        ThresholdRule::Scaled => (255 * (plane as i32 + 1) / (antialias as i32 + 1) + 1) as u8,
    }
}

/// Apply the codec's lossy reduction exactly once: count the planes whose
/// threshold the sample reaches, then reconstruct the decode-side grey.
pub fn canonical_sample(sample: u8, antialias: u8, rule: ThresholdRule) -> u8 {
    let mut hits = 0u16;
    for plane in 0..antialias {
        if sample >= plane_threshold(rule, antialias, plane) {
            hits += 1;
        }
    }
    let grey = hits * (256 / antialias as u16);
    if grey > 0 { (grey - 1) as u8 } else { 0 }
}

pub struct BitplaneCodec;

impl LayerCodec for BitplaneCodec {
    fn id(&self) -> CodecId { CodecId::Bitplane }

    fn decode(&self, blob: &[u8], ctx: &LayerContext) -> Result<LayerBitmap, CodecError> {
        let declared = ctx.pixel_count();
        let antialias = ctx.antialias.max(1);
        let mut bitmap = LayerBitmap::new(ctx.width, ctx.height);

        if declared == 0 {
            if !blob.is_empty() {
                return Err(CodecError::CorruptedStream {
                    offset: 0,
                    reason: "trailing bytes after the final plane",
                });
            }
            return Ok(bitmap);
        }
        let span = bitmap.samples_mut();

        let mut index = 0usize;
        for _plane in 0..antialias {
            let mut pixel = 0usize;
            loop {
                let Some(&token) = blob.get(index) else {
                    return Err(CodecError::CorruptedStream {
                        offset: index,
                        reason: "plane ended before the declared pixel count",
                    });
                };
                index += 1;

                let reps = (token & 0x7f) as usize;
                let end = pixel + reps;
                if end > declared {
                    return Err(CodecError::BufferOverrun { declared, attempted: end });
                }
                // Only the set pixels accumulate hits.
                if token & 0x80 != 0 {
                    for s in &mut span[pixel..end] {
                        *s += 1;
                    }
                }
                pixel = end;
                if pixel == declared {
                    break;
                }
            }
        }
        if index != blob.len() {
            return Err(CodecError::CorruptedStream {
                offset: index,
                reason: "trailing bytes after the final plane",
            });
        }

        let scale = 256 / antialias as u16;
        for s in span.iter_mut() {
            let grey = *s as u16 * scale;
            *s = if grey > 0 { (grey - 1) as u8 } else { 0 };
        }
        Ok(bitmap)
    }

    fn encode(&self, bitmap: &LayerBitmap, ctx: &LayerContext) -> Result<Vec<u8>, CodecError> {
        let antialias = ctx.antialias.max(1);
        let mut out = Vec::new();

        for plane in 0..antialias {
            let threshold = plane_threshold(ctx.threshold, antialias, plane);
            let mut state = false;
            let mut rep = 0u8;

            for &sample in bitmap.samples() {
                let bit = sample >= threshold;
                if bit == state {
                    rep += 1;
                    if rep == RUN_LIMIT {
                        push_token(&mut out, state, rep);
                        rep = 0;
                    }
                } else {
                    push_token(&mut out, state, rep);
                    state = bit;
                    rep = 1;
                }
            }
            // Collect stragglers.
            push_token(&mut out, state, rep);
        }
        Ok(out)
    }
}

#[inline]
fn push_token(out: &mut Vec<u8>, state: bool, rep: u8) {
    if rep == 0 {
        return;
    }
    out.push(if state { rep | 0x80 } else { rep });
}
