pub mod bridge;
pub(crate) mod env_config;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod letterbox;
pub mod manager;
pub mod metadata;
pub mod platform;
pub mod pump;
pub mod replay;
pub mod rotation;
#[cfg(any(test, feature = "software"))]
pub mod software;
pub mod source;

pub use bridge::{CpuSurface, CrossAdapterBridge};
pub use error::{DuplicationError, DuplicationErrorClass, DuplicationResult};
pub use geometry::{Point, Rect, Rotation, Size};
pub use gpu::{GraphicsDevice, PixelFormat, ShaderSet, SurfaceDesc};
pub use letterbox::LetterboxPlan;
pub use manager::{DuplicationManager, FrameData, FrameUpdate, ManagerConfig, ProcessingMode};
pub use metadata::{DirtyRegion, MoveRegion};
pub use pump::{CompositionTarget, FramePump, PumpOutcome, PumpStats};
pub use source::{AdapterId, DuplicationSource, FrameInfo, OutputDescriptor};

#[cfg(target_os = "windows")]
pub use platform::windows::{
    D3D11Device, DxgiDuplicationSource, WindowsDuplicationManager, initialize_for_output,
};
