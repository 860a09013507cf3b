//! Container format descriptors.
//!
//! Each supported container is a closed tagged variant holding plain static
//! data: which layer codec it uses, which keystream constant set (if any),
//! which bitplane threshold rule, and which container-level integrity scheme.
//! There is no format hierarchy and no runtime negotiation — a descriptor is
//! looked up once and passed around by reference.

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumKind;
use crate::codec::{CodecId, ThresholdRule};
use crate::crypto::{KeyRingProfile, KEYRING_CTB, KEYRING_PHZ};

// ── Per-layer parameters ─────────────────────────────────────────────────────

/// Scalar per-layer print parameters.  The pipeline carries these alongside
/// each layer and copies them through untouched; interpreting them is the
/// container writer's business.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub position_z:      f32,
    pub exposure_time:   f32,
    pub light_off_delay: f32,
}

/// One row of the table mapping canonical parameter names to accessors.
pub struct ParamField {
    pub name: &'static str,
    pub get:  fn(&LayerParams) -> f32,
}

/// Table-driven field access for diagnostics and report output.
pub const LAYER_PARAM_FIELDS: &[ParamField] = &[
    ParamField { name: "position_z", get: |p| p.position_z },
    ParamField { name: "exposure_time", get: |p| p.exposure_time },
    ParamField { name: "light_off_delay", get: |p| p.light_off_delay },
];

// ── FormatKind ───────────────────────────────────────────────────────────────

/// The closed set of supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    Ctb,
    Cbddlp,
    Phz,
    Pws,
    Pw0,
    Goo,
    CtbEncrypted,
    Cxdlp,
}

/// Static description of one container format: the (codec, cipher, checksum)
/// triple plus the knobs the codecs need.
pub struct FormatDescriptor {
    pub kind:      FormatKind,
    pub name:      &'static str,
    pub extension: &'static str,
    /// Layer codec for exposure bitmaps.
    pub codec:     CodecId,
    /// Keystream constant set; `None` when the format never ciphers layers.
    pub cipher:    Option<&'static KeyRingProfile>,
    /// Bitplane encode threshold rule (ignored by non-bitplane codecs).
    pub threshold: ThresholdRule,
    /// Container-level integrity scheme.
    pub container_checksum: ChecksumKind,
    /// Large and small preview resolutions, in pixels.
    pub preview_large: (u32, u32),
    pub preview_small: (u32, u32),
    /// Layers carry an AES-encrypted window (and with it the small-layer
    /// slicer defect the pipeline knows how to patch around).
    pub encrypted_layers: bool,
}

pub const DESCRIPTORS: &[FormatDescriptor] = &[
    FormatDescriptor {
        kind: FormatKind::Ctb,
        name: "ctb",
        extension: "ctb",
        codec: CodecId::Grey7,
        cipher: Some(&KEYRING_CTB),
        threshold: ThresholdRule::Legacy,
        container_checksum: ChecksumKind::None,
        preview_large: (400, 300),
        preview_small: (200, 125),
        encrypted_layers: false,
    },
    FormatDescriptor {
        kind: FormatKind::Cbddlp,
        name: "cbddlp",
        extension: "cbddlp",
        codec: CodecId::Bitplane,
        cipher: None,
        threshold: ThresholdRule::Legacy,
        container_checksum: ChecksumKind::None,
        preview_large: (400, 300),
        preview_small: (200, 125),
        encrypted_layers: false,
    },
    FormatDescriptor {
        kind: FormatKind::Phz,
        name: "phz",
        extension: "phz",
        codec: CodecId::Grey7,
        cipher: Some(&KEYRING_PHZ),
        threshold: ThresholdRule::Legacy,
        container_checksum: ChecksumKind::None,
        preview_large: (400, 300),
        preview_small: (200, 125),
        encrypted_layers: false,
    },
    FormatDescriptor {
        kind: FormatKind::Pws,
        name: "pws",
        extension: "pws",
        codec: CodecId::Bitplane,
        cipher: None,
        threshold: ThresholdRule::Scaled,
        container_checksum: ChecksumKind::None,
        preview_large: (224, 168),
        preview_small: (224, 168),
        encrypted_layers: false,
    },
    FormatDescriptor {
        kind: FormatKind::Pw0,
        name: "pw0",
        extension: "pw0",
        codec: CodecId::Nibble,
        cipher: None,
        threshold: ThresholdRule::Scaled,
        container_checksum: ChecksumKind::Crc16,
        preview_large: (224, 168),
        preview_small: (224, 168),
        encrypted_layers: false,
    },
    FormatDescriptor {
        kind: FormatKind::Goo,
        name: "goo",
        extension: "goo",
        codec: CodecId::DiffChunk,
        cipher: None,
        threshold: ThresholdRule::Scaled,
        container_checksum: ChecksumKind::None,
        preview_large: (290, 290),
        preview_small: (116, 116),
        encrypted_layers: false,
    },
    FormatDescriptor {
        kind: FormatKind::CtbEncrypted,
        name: "ctb-encrypted",
        extension: "ctb",
        codec: CodecId::Grey7,
        cipher: Some(&KEYRING_CTB),
        threshold: ThresholdRule::Legacy,
        container_checksum: ChecksumKind::AesSignature,
        preview_large: (400, 300),
        preview_small: (200, 125),
        encrypted_layers: true,
    },
    FormatDescriptor {
        kind: FormatKind::Cxdlp,
        name: "cxdlp",
        extension: "cxdlp",
        codec: CodecId::Grey7,
        cipher: Some(&KEYRING_CTB),
        threshold: ThresholdRule::Legacy,
        container_checksum: ChecksumKind::Crc32,
        preview_large: (116, 116),
        preview_small: (116, 116),
        encrypted_layers: false,
    },
];

impl FormatKind {
    /// Resolve this kind's static descriptor.
    pub fn descriptor(self) -> &'static FormatDescriptor {
        DESCRIPTORS
            .iter()
            .find(|d| d.kind == self)
            .unwrap_or_else(|| unreachable!("descriptor table covers every FormatKind"))
    }

    /// Parse a CLI name.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        DESCRIPTORS.iter().find(|d| d.name == s).map(|d| d.kind)
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}
