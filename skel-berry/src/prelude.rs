//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Axes, Idx3d};

pub use crate::bake::{BakeOutcome, BakeParams, BakeSummary, Baker, Candidate, Region};
pub use crate::config::{ConfigError, PipelineConfig};
pub use crate::consts::{channel, BACKGROUND, FIRST_INSTANCE_ID};
pub use crate::embed::vector_to_embedding;
pub use crate::error::{InferenceError, PipelineError, PipelineResult};
pub use crate::pipeline::{
    Backend, Inference, NetworkOutput, Pipeline, Reconstruction, RunReport, Stage,
};
pub use crate::skeleton::{label_points, label_skeleton, Connectivity, LabeledSkeleton, SkeletonMap};
pub use crate::volume::io::{
    load_volume, load_volume_declared, save_volume, Dtype, ScaleTable, VolumeIoError,
};
pub use crate::volume::window::{Cropper, TileWindow};
