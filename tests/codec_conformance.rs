//! Cross-codec conformance: canonical round-trips, size-class boundaries,
//! and the cipher/checksum properties every wire format depends on.

use proptest::prelude::*;

use reslice::checksum::{crc16, crc32};
use reslice::codec::{
    bitplane, diffchunk, get_codec, grey7, nibble, CodecError, CodecId, LayerCodec,
    LayerContext, ThresholdRule,
};
use reslice::crypto::{crypt_layer, KEYRING_CTB, KEYRING_PHZ};
use reslice::LayerBitmap;

fn ramp_bitmap(width: u32, height: u32) -> LayerBitmap {
    let data: Vec<u8> = (0..width as u64 * height as u64)
        .map(|i| (i * 7 % 256) as u8)
        .collect();
    LayerBitmap::from_raw(width, height, data).unwrap()
}

fn canonicalize(id: CodecId, ctx: &LayerContext, samples: &[u8]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| match id {
            CodecId::Grey7 => grey7::canonical_sample(s),
            CodecId::Bitplane => bitplane::canonical_sample(s, ctx.antialias, ctx.threshold),
            CodecId::DiffChunk => s,
            CodecId::Nibble => nibble::canonical_sample(s),
        })
        .collect()
}

#[test]
fn every_codec_roundtrips_its_canonical_form() {
    for id in [CodecId::Grey7, CodecId::Bitplane, CodecId::DiffChunk, CodecId::Nibble] {
        let ctx = LayerContext::new(64, 48).with_antialias(4, ThresholdRule::Legacy);
        let codec = get_codec(id);
        let bitmap = ramp_bitmap(64, 48);
        let canonical = canonicalize(id, &ctx, bitmap.samples());

        let blob = codec.encode(&bitmap, &ctx).unwrap();
        let decoded = codec.decode(&blob, &ctx).unwrap();
        assert_eq!(decoded.samples(), &canonical[..], "{}", id.name());

        // canonicalize is idempotent: a second generation is byte-identical.
        let blob2 = codec.encode(&decoded, &ctx).unwrap();
        assert_eq!(blob, blob2, "{}", id.name());
    }
}

#[test]
fn declared_length_overrun_never_writes_past_the_buffer() {
    // Each blob legitimately decodes 64 pixels; declaring a 4×4 layer makes
    // the same stream an overrun, and must fail rather than truncate.
    let big = LayerBitmap::from_raw(8, 8, vec![0x55; 64]).unwrap();
    for id in [CodecId::Grey7, CodecId::Bitplane, CodecId::DiffChunk, CodecId::Nibble] {
        let codec = get_codec(id);
        let big_ctx = LayerContext::new(8, 8).with_antialias(2, ThresholdRule::Legacy);
        let small_ctx = LayerContext::new(4, 4).with_antialias(2, ThresholdRule::Legacy);

        let blob = codec.encode(&big, &big_ctx).unwrap();
        let err = codec.decode(&blob, &small_ctx).unwrap_err();
        assert!(
            matches!(err, CodecError::BufferOverrun { declared: 16, .. }),
            "{}: {err}",
            id.name()
        );
    }
}

#[test]
fn grey7_all_zero_scenario() {
    // 16×16 all-zero → one token, 14-bit size class carrying 256.
    let ctx = LayerContext::new(16, 16);
    let blob = get_codec(CodecId::Grey7)
        .encode(&LayerBitmap::new(16, 16), &ctx)
        .unwrap();
    assert_eq!(blob, vec![0x80, 0x81, 0x00]);
}

#[test]
fn unknown_wire_tag_is_unsupported_variant() {
    let err = CodecId::from_tag(0x7e).unwrap_err();
    assert!(matches!(err, CodecError::UnsupportedVariant { tag: 0x7e }));
}

#[test]
fn cipher_composes_with_codecs() {
    // encode → cipher → decipher → decode is the identity on canonical data.
    let ctx = LayerContext::new(32, 32);
    let codec = get_codec(CodecId::Grey7);
    let bitmap = ramp_bitmap(32, 32);
    let canonical = canonicalize(CodecId::Grey7, &ctx, bitmap.samples());

    let mut blob = codec.encode(&bitmap, &ctx).unwrap();
    let clear = blob.clone();
    crypt_layer(&KEYRING_CTB, 0xbeef, 3, &mut blob);
    assert_ne!(blob, clear);
    crypt_layer(&KEYRING_CTB, 0xbeef, 3, &mut blob);
    assert_eq!(blob, clear);
    let decoded = codec.decode(&blob, &ctx).unwrap();
    assert_eq!(decoded.samples(), &canonical[..]);
}

proptest! {
    #[test]
    fn keystream_is_self_inverse(
        seed in any::<u32>(),
        layer in any::<u32>(),
        data in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        for profile in [&KEYRING_CTB, &KEYRING_PHZ] {
            let mut buf = data.clone();
            crypt_layer(profile, seed, layer, &mut buf);
            crypt_layer(profile, seed, layer, &mut buf);
            prop_assert_eq!(&buf, &data);
        }
    }

    #[test]
    fn crc32_detects_single_byte_mutation(
        data in proptest::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
        mask in 1u8..,
    ) {
        let i = index.index(data.len());
        let mut mutated = data.clone();
        mutated[i] ^= mask;
        prop_assert_ne!(crc32(&mutated), crc32(&data));
    }

    #[test]
    fn grey7_roundtrip_arbitrary(data in proptest::collection::vec(any::<u8>(), 256)) {
        let ctx = LayerContext::new(16, 16);
        let codec = get_codec(CodecId::Grey7);
        let canonical: Vec<u8> = data.iter().map(|&s| grey7::canonical_sample(s)).collect();
        let bitmap = LayerBitmap::from_raw(16, 16, data).unwrap();
        let blob = codec.encode(&bitmap, &ctx).unwrap();
        let decoded = codec.decode(&blob, &ctx).unwrap();
        prop_assert_eq!(decoded.samples(), &canonical[..]);
    }

    #[test]
    fn diffchunk_trailing_checksum_matches_definition(
        data in proptest::collection::vec(any::<u8>(), 64),
    ) {
        let ctx = LayerContext::new(8, 8);
        let bitmap = LayerBitmap::from_raw(8, 8, data).unwrap();
        let blob = diffchunk::DiffChunkCodec::default().encode(&bitmap, &ctx).unwrap();
        let sum = blob[1..blob.len() - 1].iter().fold(0u8, |a, &b| a.wrapping_add(b));
        prop_assert_eq!(*blob.last().unwrap(), !sum);
    }
}

#[test]
fn nibble_crc_trailer_matches_crc16_of_payload() {
    let ctx = LayerContext::new(16, 16);
    let bitmap = ramp_bitmap(16, 16);
    let blob = get_codec(CodecId::Nibble).encode(&bitmap, &ctx).unwrap();
    let payload = &blob[..blob.len() - 2];
    let crc = crc16(payload);
    assert_eq!(blob[blob.len() - 2], (crc >> 8) as u8);
    assert_eq!(blob[blob.len() - 1], crc as u8);
}
