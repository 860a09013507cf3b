//! Layer pipeline — batched parallel decode/encode over an externally
//! supplied layer table.
//!
//! # Scheduling model
//! Layers are processed in fixed-size batches of `worker threads × 10`.  For
//! each batch the raw byte ranges are read **sequentially** from the single
//! reader (file handles are not thread-safe), then the cipher/codec work for
//! every layer in the batch runs on the Rayon pool.  No cross-layer mutable
//! state exists inside a layer's transform, so the parallel stage needs no
//! locking; the progress counter is atomic.
//!
//! # Deduplication
//! During encode, the SHA-1 → (offset, length) map is populated only
//! **after** each batch's parallel stage completes, walking results in layer
//! order.  First occurrence wins deterministically; the map is never shared
//! across workers.
//!
//! # Cancellation
//! Cooperative: checked at batch boundaries and before each per-layer item.
//! A cancelled run returns [`PipelineError::Cancelled`] and yields no
//! partially committed layer table.  Nothing is retried and there are no
//! timeouts — a run completes, is cancelled, or fails.

pub mod recovery;

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitmap::LayerBitmap;
use crate::checksum::sha1_digest;
use crate::codec::{get_codec, CodecError, LayerCodec, LayerContext};
use crate::crypto::{crypt_layer, decrypt_layer_window, CryptoError};
use crate::format::{FormatDescriptor, FormatKind, LayerParams};

use recovery::RecoveryReport;

// ── Inputs ───────────────────────────────────────────────────────────────────

/// One row of the container's layer table.  Supplied by the (external)
/// container reader; the pipeline never owns the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerTableEntry {
    /// Absolute byte offset of the encoded blob.
    pub offset: u64,
    /// Encoded blob length in bytes.
    pub length: u32,
    /// Scalar print parameters, copied through untouched.
    #[serde(default)]
    pub params: LayerParams,
    /// AES-encrypted `(offset, length)` window inside the blob, for formats
    /// with encrypted layers.
    #[serde(default)]
    pub encrypted_window: Option<(u32, u32)>,
}

/// `Full` materializes pixel buffers; `HeaderOnly` skips RLE decode and
/// yields metadata-only layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    Full,
    HeaderOnly,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Keystream cipher seed; 0 disables the cipher.
    pub seed:       u32,
    pub mode:       DecodeMode,
    /// Antialias level for the bitplane codec.
    pub antialias:  u8,
    /// Override the `threads × 10` batch size (tests only, mostly).
    pub batch_size: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { seed: 0, mode: DecodeMode::Full, antialias: 1, batch_size: None }
    }
}

fn effective_batch_size(opts: &PipelineOptions) -> usize {
    opts.batch_size
        .filter(|&n| n > 0)
        .unwrap_or_else(|| rayon::current_num_threads() * 10)
}

// ── Cancellation & progress ──────────────────────────────────────────────────

/// Cooperative cancellation flag, shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic completed-layer counter; safe to read from another thread while a
/// run is in flight.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter(Arc<AtomicUsize>);

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("layer {index}: {source}")]
    Layer {
        index: u32,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error(
        "every layer is affected by the slicer defect on small encrypted layers; \
         increase the plate area in use and re-slice the file"
    )]
    AllLayersDefective,
    #[error(
        "layer {index} is defective and no valid neighbouring layer could be \
         cloned into its place; re-slice the file"
    )]
    UnrecoverableLayer { index: u32 },
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// One decoded layer slot.
#[derive(Debug, Clone)]
pub struct DecodedLayer {
    pub index:  u32,
    /// `None` in header-only mode (and, transiently, for defective layers
    /// awaiting the recovery pass).
    pub bitmap: Option<LayerBitmap>,
    pub params: LayerParams,
    /// The bitmap was cloned from a neighbour by the recovery pass.
    pub recovered: bool,
}

#[derive(Debug)]
pub struct DecodeOutcome {
    pub layers:   Vec<DecodedLayer>,
    pub recovery: RecoveryReport,
}

/// Decode every layer named by `table`, in batches.
///
/// Any codec or cipher failure aborts the whole load; corruption is never
/// downgraded to a warning.
pub fn decode_layers<R: Read + Seek>(
    reader:     &mut R,
    table:      &[LayerTableEntry],
    descriptor: &FormatDescriptor,
    resolution: (u32, u32),
    opts:       &PipelineOptions,
    cancel:     &CancelToken,
    progress:   &ProgressCounter,
) -> Result<DecodeOutcome, PipelineError> {
    let ctx = LayerContext::new(resolution.0, resolution.1)
        .with_antialias(opts.antialias, descriptor.threshold);
    let codec = get_codec(descriptor.codec);
    let batch_size = effective_batch_size(opts);

    let mut layers: Vec<DecodedLayer> = Vec::with_capacity(table.len());
    let mut defective: Vec<u32> = Vec::new();

    let indexes: Vec<u32> = (0..table.len() as u32).collect();
    for batch in indexes.chunks(batch_size) {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Sequential I/O stage: the reader is not shared across workers.
        let mut raw: Vec<(u32, Vec<u8>)> = Vec::with_capacity(batch.len());
        for &index in batch {
            let entry = &table[index as usize];
            reader.seek(SeekFrom::Start(entry.offset))?;
            let mut blob = vec![0u8; entry.length as usize];
            reader.read_exact(&mut blob)?;
            raw.push((index, blob));
        }

        // Parallel transform stage.
        let decoded: Vec<Result<(DecodedLayer, bool), PipelineError>> = raw
            .into_par_iter()
            .map(|(index, mut blob)| {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let entry = &table[index as usize];
                let mut slot = DecodedLayer {
                    index,
                    bitmap: None,
                    params: entry.params,
                    recovered: false,
                };

                if descriptor.encrypted_layers {
                    if let Some((win_offset, win_length)) = entry.encrypted_window {
                        if recovery::is_defective_blob(blob.len()) {
                            // Known slicer defect: do not decode; the slot is
                            // patched from a neighbour after all batches.
                            progress.tick();
                            return Ok((slot, true));
                        }
                        decrypt_layer_window(
                            &mut blob,
                            win_offset as usize,
                            win_length as usize,
                        )?;
                    }
                }

                if let Some(profile) = descriptor.cipher {
                    crypt_layer(profile, opts.seed, index, &mut blob);
                }

                if opts.mode == DecodeMode::Full {
                    let bitmap = codec
                        .decode(&blob, &ctx)
                        .map_err(|source| PipelineError::Layer { index, source })?;
                    slot.bitmap = Some(bitmap);
                }

                progress.tick();
                Ok((slot, false))
            })
            .collect();

        for result in decoded {
            let (slot, is_defective) = result?;
            if is_defective {
                defective.push(slot.index);
            }
            layers.push(slot);
        }
    }

    if !table.is_empty() && defective.len() == table.len() {
        return Err(PipelineError::AllLayersDefective);
    }

    let mut report = RecoveryReport { defective_layers: defective.clone(), patched_layers: 0 };
    if opts.mode == DecodeMode::Full {
        report.patched_layers = recovery::patch_defective(&mut layers, &defective)?;
    }

    Ok(DecodeOutcome { layers, recovery: report })
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// One encoded layer slot, with its assigned range in the layer data region.
#[derive(Debug, Clone)]
pub struct EncodedLayer {
    pub index:  u32,
    /// Offset of the stored bytes; for deduplicated layers this is the first
    /// occurrence's offset.
    pub offset: u64,
    pub length: u32,
    /// Bytes to store.  `None` when the layer reuses an earlier identical
    /// blob.
    pub data:   Option<Vec<u8>>,
    /// SHA-1 of the final (post-cipher) bytes — the dedup key.
    pub content_hash: [u8; 20],
    pub reused: bool,
}

#[derive(Debug)]
pub struct EncodeOutcome {
    pub layers: Vec<EncodedLayer>,
    /// Total bytes of fresh blob data (duplicates excluded).
    pub stored_bytes: u64,
}

/// Encode every bitmap, assigning offsets sequentially from `base_offset`.
///
/// With `dedup` enabled, a layer whose final bytes are identical to an
/// earlier layer's reuses that layer's stored range instead of fresh bytes.
pub fn encode_layers(
    bitmaps:     &[LayerBitmap],
    descriptor:  &FormatDescriptor,
    opts:        &PipelineOptions,
    base_offset: u64,
    dedup:       bool,
    cancel:      &CancelToken,
    progress:    &ProgressCounter,
) -> Result<EncodeOutcome, PipelineError> {
    let ctx = match bitmaps.first() {
        Some(b) => LayerContext::new(b.width(), b.height())
            .with_antialias(opts.antialias, descriptor.threshold),
        None => {
            return Ok(EncodeOutcome { layers: Vec::new(), stored_bytes: 0 });
        }
    };
    let codec = get_codec(descriptor.codec);
    let batch_size = effective_batch_size(opts);

    let mut layers: Vec<EncodedLayer> = Vec::with_capacity(bitmaps.len());
    let mut dedup_map: HashMap<[u8; 20], (u64, u32)> = HashMap::new();
    let mut cursor = base_offset;
    let mut stored_bytes = 0u64;

    let indexes: Vec<u32> = (0..bitmaps.len() as u32).collect();
    for batch in indexes.chunks(batch_size) {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Parallel transform stage.
        let encoded: Vec<Result<(u32, Vec<u8>), PipelineError>> = batch
            .par_iter()
            .map(|&index| {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let mut blob = codec
                    .encode(&bitmaps[index as usize], &ctx)
                    .map_err(|source| PipelineError::Layer { index, source })?;
                if let Some(profile) = descriptor.cipher {
                    crypt_layer(profile, opts.seed, index, &mut blob);
                }
                progress.tick();
                Ok((index, blob))
            })
            .collect();

        // Sequential commit stage: deterministic first-occurrence-wins.
        for result in encoded {
            let (index, blob) = result?;
            let content_hash = sha1_digest(&blob);
            let length = blob.len() as u32;

            match dedup_map.get(&content_hash).copied().filter(|_| dedup) {
                Some((offset, length)) => {
                    layers.push(EncodedLayer {
                        index,
                        offset,
                        length,
                        data: None,
                        content_hash,
                        reused: true,
                    });
                }
                None => {
                    if dedup {
                        dedup_map.insert(content_hash, (cursor, length));
                    }
                    layers.push(EncodedLayer {
                        index,
                        offset: cursor,
                        length,
                        data: Some(blob),
                        content_hash,
                        reused: false,
                    });
                    cursor += length as u64;
                    stored_bytes += length as u64;
                }
            }
        }
    }

    Ok(EncodeOutcome { layers, stored_bytes })
}

// ── Manifest ─────────────────────────────────────────────────────────────────

/// A JSON-serializable layer table, the hand-off format between the pipeline
/// and a container writer (and the CLI's sidecar file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerManifest {
    pub format:     FormatKind,
    pub resolution: (u32, u32),
    pub antialias:  u8,
    pub seed:       u32,
    pub layers:     Vec<LayerTableEntry>,
}

impl LayerManifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
