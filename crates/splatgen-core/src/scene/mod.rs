//! Per-point extraction, assembly and scene file output.

pub mod assemble;
pub mod metadata;
pub mod sample;
pub mod writer;

pub use assemble::{linear_to_srgb, PointAssembler, ScenePoint};
pub use metadata::{ForwardAxis, PlyFormat, SplatMetadata};
pub use sample::{PointSample, SampleExtractor};
pub use writer::{PlyWriter, SceneSink};
