//! RGB15/565 colour RLE — preview thumbnails only.
//!
//! Each pixel is packed into a 15-bit word stored little-endian: 5 bits per
//! channel at bits 11 (red), 6 (green) and 0 (blue).  Bit 5 of the low byte
//! is the repeat flag; when set, a trailing little-endian u16 carries
//! `repeat - 1` in its low 12 bits (the 0x3000 marker occupies the top
//! nibble), giving runs of up to 4096 pixels before a forced flush.  Runs of
//! one or two pixels are emitted as bare colour words without the flag.

use byteorder::{ByteOrder, LittleEndian};

use crate::bitmap::RgbBitmap;
use crate::codec::CodecError;

/// Bit 5 of the low byte marks a run.
pub const REPEAT_MASK: u16 = 0x20;

/// Forced flush threshold: a run never exceeds 4096 pixels.
pub const RUN_LIMIT: u32 = 0x1000;

/// Quantize one 8-bit channel to the 5 bits the wire format keeps.
#[inline]
pub fn canonical_channel(c: u8) -> u8 {
    (c >> 3) << 3
}

/// Decode a preview blob into an RGB888 bitmap of exactly `width × height`
/// pixels.
pub fn decode(blob: &[u8], width: u32, height: u32) -> Result<RgbBitmap, CodecError> {
    let total = width as usize * height as usize;
    let mut bitmap = RgbBitmap::new(width, height);
    let out = bitmap.samples_mut();

    let mut pixel = 0usize;
    let mut n = 0usize;
    while n < blob.len() {
        if n + 1 >= blob.len() {
            return Err(CodecError::CorruptedStream {
                offset: n,
                reason: "colour word truncated",
            });
        }
        let dot = LittleEndian::read_u16(&blob[n..n + 2]);
        n += 2;

        let red = (((dot >> 11) & 0x1f) << 3) as u8;
        let green = (((dot >> 6) & 0x1f) << 3) as u8;
        let blue = ((dot & 0x1f) << 3) as u8;

        let mut repeat = 1usize;
        if dot & REPEAT_MASK != 0 {
            if n + 1 >= blob.len() {
                return Err(CodecError::CorruptedStream {
                    offset: n,
                    reason: "run word truncated",
                });
            }
            repeat += blob[n] as usize | ((blob[n + 1] as usize & 0x0f) << 8);
            n += 2;
        }

        let end = pixel + repeat;
        if end > total {
            return Err(CodecError::BufferOverrun { declared: total, attempted: end });
        }
        for p in pixel..end {
            out[p * 3] = red;
            out[p * 3 + 1] = green;
            out[p * 3 + 2] = blue;
        }
        pixel = end;
    }

    if pixel != total {
        return Err(CodecError::CorruptedStream {
            offset: blob.len(),
            reason: "stream ended before the declared pixel count",
        });
    }
    Ok(bitmap)
}

/// Encode an RGB888 bitmap into the preview wire format.
pub fn encode(bitmap: &RgbBitmap) -> Vec<u8> {
    let mut out = Vec::new();
    let mut colour15: u16 = 0;
    let mut rep: u32 = 0;

    for px in bitmap.samples().chunks_exact(3) {
        let ncolour15 = ((px[0] as u16 >> 3) << 11)
            | ((px[1] as u16 >> 2) << 5)
            | (px[2] as u16 >> 3);

        if ncolour15 == colour15 {
            rep += 1;
            if rep == RUN_LIMIT {
                flush_run(&mut out, colour15, rep);
                rep = 0;
            }
        } else {
            flush_run(&mut out, colour15, rep);
            colour15 = ncolour15;
            rep = 1;
        }
    }
    flush_run(&mut out, colour15, rep);
    out
}

fn flush_run(out: &mut Vec<u8>, colour15: u16, rep: u32) {
    match rep {
        0 => {}
        1 => push_word(out, colour15 & !REPEAT_MASK),
        2 => {
            push_word(out, colour15 & !REPEAT_MASK);
            push_word(out, colour15 & !REPEAT_MASK);
        }
        _ => {
            push_word(out, colour15 | REPEAT_MASK);
            push_word(out, (rep as u16 - 1) | 0x3000);
        }
    }
}

#[inline]
fn push_word(out: &mut Vec<u8>, word: u16) {
    let mut bytes = [0u8; 2];
    LittleEndian::write_u16(&mut bytes, word);
    out.extend_from_slice(&bytes);
}
