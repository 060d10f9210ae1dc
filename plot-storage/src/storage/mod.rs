pub mod allocator;
pub mod paths;
pub mod registry;
pub mod volume;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use allocator::{VolumeAllocator, VolumeLease};
pub use paths::{PathManager, PlotSource};
pub use registry::{SystemProbe, VolumeProbe};
