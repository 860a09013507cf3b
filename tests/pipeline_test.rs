//! Orchestrator tests: batched decode/encode over an in-memory container,
//! deduplication, cancellation, header-only mode, and the defective-layer
//! recovery path.

use std::io::Cursor;

use reslice::codec::grey7;
use reslice::format::FormatKind;
use reslice::pipeline::{
    decode_layers, encode_layers, CancelToken, DecodeMode, LayerManifest, LayerTableEntry,
    PipelineOptions, ProgressCounter,
};
use reslice::LayerBitmap;

const W: u32 = 16;
const H: u32 = 16;

fn test_bitmaps(count: usize) -> Vec<LayerBitmap> {
    (0..count)
        .map(|n| {
            let data: Vec<u8> = (0..W as usize * H as usize)
                .map(|i| ((i * 3 + n * 41) % 256) as u8)
                .collect();
            LayerBitmap::from_raw(W, H, data).unwrap()
        })
        .collect()
}

fn canonical(bitmap: &LayerBitmap) -> Vec<u8> {
    bitmap.samples().iter().map(|&s| grey7::canonical_sample(s)).collect()
}

/// Encode bitmaps and lay the fresh blobs out in one contiguous buffer,
/// returning the buffer and the matching layer table.
fn build_container(
    bitmaps: &[LayerBitmap],
    kind: FormatKind,
    opts: &PipelineOptions,
) -> (Vec<u8>, Vec<LayerTableEntry>) {
    let outcome = encode_layers(
        bitmaps,
        kind.descriptor(),
        opts,
        0,
        true,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();

    let mut file = Vec::new();
    let mut table = Vec::new();
    for layer in &outcome.layers {
        if let Some(data) = &layer.data {
            assert_eq!(layer.offset, file.len() as u64);
            file.extend_from_slice(data);
        }
        table.push(LayerTableEntry {
            offset: layer.offset,
            length: layer.length,
            params: Default::default(),
            encrypted_window: None,
        });
    }
    (file, table)
}

#[test]
fn full_roundtrip_with_cipher() {
    let bitmaps = test_bitmaps(5);
    let opts = PipelineOptions { seed: 0x1234, ..Default::default() };
    let (file, table) = build_container(&bitmaps, FormatKind::Ctb, &opts);

    let progress = ProgressCounter::new();
    let outcome = decode_layers(
        &mut Cursor::new(&file),
        &table,
        FormatKind::Ctb.descriptor(),
        (W, H),
        &opts,
        &CancelToken::new(),
        &progress,
    )
    .unwrap();

    assert_eq!(outcome.layers.len(), 5);
    assert!(outcome.recovery.is_clean());
    assert_eq!(progress.completed(), 5);
    for (layer, bitmap) in outcome.layers.iter().zip(&bitmaps) {
        assert!(!layer.recovered);
        assert_eq!(layer.bitmap.as_ref().unwrap().samples(), &canonical(bitmap)[..]);
    }
}

#[test]
fn roundtrip_survives_tiny_batches() {
    let bitmaps = test_bitmaps(7);
    let opts = PipelineOptions { seed: 9, batch_size: Some(2), ..Default::default() };
    let (file, table) = build_container(&bitmaps, FormatKind::Ctb, &opts);

    let outcome = decode_layers(
        &mut Cursor::new(&file),
        &table,
        FormatKind::Ctb.descriptor(),
        (W, H),
        &opts,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();
    for (layer, bitmap) in outcome.layers.iter().zip(&bitmaps) {
        assert_eq!(layer.bitmap.as_ref().unwrap().samples(), &canonical(bitmap)[..]);
    }
}

#[test]
fn dedup_reuses_the_first_occurrence() {
    let distinct = test_bitmaps(2);
    let bitmaps = vec![distinct[0].clone(), distinct[1].clone(), distinct[0].clone()];
    let opts = PipelineOptions::default();

    let outcome = encode_layers(
        &bitmaps,
        FormatKind::Ctb.descriptor(),
        &opts,
        0,
        true,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();

    let first = &outcome.layers[0];
    let third = &outcome.layers[2];
    assert!(!first.reused);
    assert!(third.reused);
    assert!(third.data.is_none());
    assert_eq!(third.offset, first.offset);
    assert_eq!(third.length, first.length);
    assert_eq!(third.content_hash, first.content_hash);
    // Only two fresh blobs were stored.
    assert_eq!(
        outcome.stored_bytes,
        (outcome.layers[0].length + outcome.layers[1].length) as u64
    );

    // The reused range decodes to the same layer.
    let (file, table) = build_container(&bitmaps, FormatKind::Ctb, &opts);
    let decoded = decode_layers(
        &mut Cursor::new(&file),
        &table,
        FormatKind::Ctb.descriptor(),
        (W, H),
        &opts,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();
    assert_eq!(
        decoded.layers[0].bitmap.as_ref().unwrap().samples(),
        decoded.layers[2].bitmap.as_ref().unwrap().samples(),
    );
}

#[test]
fn dedup_disabled_stores_every_layer() {
    let distinct = test_bitmaps(1);
    let bitmaps = vec![distinct[0].clone(), distinct[0].clone()];
    let outcome = encode_layers(
        &bitmaps,
        FormatKind::Ctb.descriptor(),
        &PipelineOptions::default(),
        0,
        false,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();
    assert!(outcome.layers.iter().all(|l| !l.reused && l.data.is_some()));
    assert_ne!(outcome.layers[0].offset, outcome.layers[1].offset);
}

#[test]
fn header_only_skips_rle_decode() {
    // Garbage blobs would fail a full decode; header-only never touches them.
    let table = vec![
        LayerTableEntry { offset: 0, length: 4, params: Default::default(), encrypted_window: None },
        LayerTableEntry { offset: 4, length: 4, params: Default::default(), encrypted_window: None },
    ];
    let file = vec![0xffu8; 8];

    let opts = PipelineOptions { mode: DecodeMode::HeaderOnly, ..Default::default() };
    let outcome = decode_layers(
        &mut Cursor::new(&file),
        &table,
        FormatKind::Goo.descriptor(),
        (W, H),
        &opts,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();
    assert_eq!(outcome.layers.len(), 2);
    assert!(outcome.layers.iter().all(|l| l.bitmap.is_none()));
}

#[test]
fn cancelled_runs_abort_cleanly() {
    let bitmaps = test_bitmaps(3);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = encode_layers(
        &bitmaps,
        FormatKind::Ctb.descriptor(),
        &PipelineOptions::default(),
        0,
        true,
        &cancel,
        &ProgressCounter::new(),
    )
    .unwrap_err();
    assert!(matches!(err, reslice::pipeline::PipelineError::Cancelled));

    let table = vec![LayerTableEntry {
        offset: 0,
        length: 1,
        params: Default::default(),
        encrypted_window: None,
    }];
    let err = decode_layers(
        &mut Cursor::new(&[0u8][..]),
        &table,
        FormatKind::Ctb.descriptor(),
        (W, H),
        &PipelineOptions::default(),
        &cancel,
        &ProgressCounter::new(),
    )
    .unwrap_err();
    assert!(matches!(err, reslice::pipeline::PipelineError::Cancelled));
}

#[test]
fn defective_encrypted_layer_is_cloned_from_a_neighbour() {
    let bitmaps = test_bitmaps(1);
    let opts = PipelineOptions { seed: 77, ..Default::default() };
    let (mut file, mut table) = build_container(&bitmaps, FormatKind::CtbEncrypted, &opts);

    // Append a defective layer: 23 bytes, flagged encrypted — short and not
    // block-aligned, exactly the slicer defect shape.
    let defective_offset = file.len() as u64;
    file.extend_from_slice(&[0xa5; 23]);
    table.push(LayerTableEntry {
        offset: defective_offset,
        length: 23,
        params: Default::default(),
        encrypted_window: Some((0, 16)),
    });

    let outcome = decode_layers(
        &mut Cursor::new(&file),
        &table,
        FormatKind::CtbEncrypted.descriptor(),
        (W, H),
        &opts,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();

    assert_eq!(outcome.recovery.defective_layers, vec![1]);
    assert_eq!(outcome.recovery.patched_layers, 1);
    assert!(outcome.layers[1].recovered);
    assert_eq!(
        outcome.layers[1].bitmap.as_ref().unwrap().samples(),
        outcome.layers[0].bitmap.as_ref().unwrap().samples(),
    );
}

#[test]
fn all_defective_layers_is_a_fatal_load_error() {
    let table: Vec<LayerTableEntry> = (0..2)
        .map(|i| LayerTableEntry {
            offset: i * 23,
            length: 23,
            params: Default::default(),
            encrypted_window: Some((0, 16)),
        })
        .collect();
    let file = vec![0x11u8; 46];

    let err = decode_layers(
        &mut Cursor::new(&file),
        &table,
        FormatKind::CtbEncrypted.descriptor(),
        (W, H),
        &PipelineOptions::default(),
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap_err();
    assert!(matches!(err, reslice::pipeline::PipelineError::AllLayersDefective));
}

#[test]
fn manifest_roundtrips_through_disk() {
    let manifest = LayerManifest {
        format: FormatKind::Pw0,
        resolution: (1620, 2560),
        antialias: 4,
        seed: 0xcafe,
        layers: vec![LayerTableEntry {
            offset: 96,
            length: 1234,
            params: reslice::LayerParams {
                position_z: 0.05,
                exposure_time: 2.5,
                light_off_delay: 1.0,
            },
            encrypted_window: None,
        }],
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layers.json");
    std::fs::write(&path, manifest.to_bytes().unwrap()).unwrap();

    let read = LayerManifest::from_bytes(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(read.format, FormatKind::Pw0);
    assert_eq!(read.resolution, (1620, 2560));
    assert_eq!(read.antialias, 4);
    assert_eq!(read.seed, 0xcafe);
    assert_eq!(read.layers.len(), 1);
    assert_eq!(read.layers[0].offset, 96);
    assert_eq!(read.layers[0].params.exposure_time, 2.5);
}

#[test]
fn empty_input_encodes_to_nothing() {
    let outcome = encode_layers(
        &[],
        FormatKind::Ctb.descriptor(),
        &PipelineOptions::default(),
        0,
        true,
        &CancelToken::new(),
        &ProgressCounter::new(),
    )
    .unwrap();
    assert!(outcome.layers.is_empty());
    assert_eq!(outcome.stored_bytes, 0);
}
