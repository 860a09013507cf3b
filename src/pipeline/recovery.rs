//! Scripted recovery for the upstream slicer defect on small encrypted
//! layers.
//!
//! A known slicer bug corrupts encrypted layers whose RLE payload is very
//! small: the emitted blob is shorter than [`DEFECT_LEN_THRESHOLD`] bytes
//! and not a multiple of the AES block size, so the encrypted window cannot
//! be decrypted.  Such layers are detected heuristically, skipped during
//! decode, and patched afterwards by cloning the nearest valid neighbour's
//! bitmap into the defective slot.  If every layer is affected the file is
//! unrecoverable and the load fails, telling the user to re-slice.

use serde::Serialize;

use crate::crypto::AES_BLOCK_LEN;
use crate::pipeline::{DecodedLayer, PipelineError};

/// Encrypted blobs below this length are candidates for the defect check.
pub const DEFECT_LEN_THRESHOLD: usize = 0x200;

/// The defect heuristic: suspiciously short and not block-aligned.
#[inline]
pub fn is_defective_blob(len: usize) -> bool {
    len < DEFECT_LEN_THRESHOLD && len % AES_BLOCK_LEN != 0
}

/// Summary of the recovery pass, included in the decode outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Layer indexes that matched the defect heuristic.
    pub defective_layers: Vec<u32>,
    /// How many of those were patched by neighbour cloning.
    pub patched_layers: u32,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.defective_layers.is_empty()
    }

    /// One-line summary for display.
    pub fn summary(&self) -> String {
        if self.is_clean() {
            "no defective layers".to_string()
        } else {
            format!(
                "{} defective layer(s), {} patched by neighbour cloning",
                self.defective_layers.len(),
                self.patched_layers,
            )
        }
    }
}

/// Clone the nearest valid neighbour's bitmap into each defective slot.
///
/// Layers are patched in ascending index order, searching downwards (upwards
/// only for layer 0), so an already-patched neighbour is a legitimate clone
/// source.  Returns the number of layers patched.
pub(crate) fn patch_defective(
    layers: &mut [DecodedLayer],
    defective: &[u32],
) -> Result<u32, PipelineError> {
    let mut sorted = defective.to_vec();
    sorted.sort_unstable();

    let mut patched = 0u32;
    for &index in &sorted {
        let direction: i64 = if index == 0 { 1 } else { -1 };

        let mut probe = index as i64 + direction;
        let clone = loop {
            if probe < 0 || probe >= layers.len() as i64 {
                break None;
            }
            match &layers[probe as usize].bitmap {
                Some(bitmap) => break Some(bitmap.clone()),
                None => probe += direction,
            }
        };

        match clone {
            Some(bitmap) => {
                let slot = &mut layers[index as usize];
                slot.bitmap = Some(bitmap);
                slot.recovered = true;
                patched += 1;
            }
            None => return Err(PipelineError::UnrecoverableLayer { index }),
        }
    }
    Ok(patched)
}
