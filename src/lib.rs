pub mod bitmap;
pub mod checksum;
pub mod codec;
pub mod crypto;
pub mod format;
pub mod pipeline;

pub use bitmap::{LayerBitmap, RgbBitmap};
pub use codec::{get_codec, CodecError, CodecId, LayerContext, ThresholdRule};
pub use format::{FormatDescriptor, FormatKind, LayerParams};
pub use pipeline::{
    decode_layers, encode_layers, CancelToken, DecodeMode, LayerManifest, LayerTableEntry,
    PipelineOptions, ProgressCounter,
};
