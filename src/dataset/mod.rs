pub mod patch;
pub mod target;
pub mod ground_truth;
pub mod transform;
pub mod segmentation;

pub use patch::{Patch, ShrinkSize};
pub use target::TargetKind;
pub use ground_truth::GroundTruthVolume;
pub use segmentation::{SegmentationDataset, sample_size};
