pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod format;
pub mod frame;
pub mod lens;
pub mod library;
pub mod lut;
pub mod orientation;
pub mod permissions;
pub mod pipeline;
pub mod recording;
pub mod session;
pub mod state;
pub mod thumbnail;

pub use config::CinecamConfig;
pub use context::{CameraContext, ContextParts};
pub use device::{
    CaptureDevice, ColorSpace, DeviceBackend, DevicePosition, FormatDescriptor, FrameRate,
    SimulatedBackend,
};
pub use error::{CameraError, CinecamError, LutError, Result, WriterError};
pub use events::{CameraEvent, EventBus, EventFilter, EventReceiver};
pub use format::{FormatCatalog, FormatMismatch, FormatRequest};
pub use frame::{AudioFrame, FrameData, PixelFormat, Rotation};
pub use lens::{LensCoordinator, LensSwitch};
pub use library::{ClipMetadata, DirectoryLibrary, MediaLibrary};
pub use lut::{ColorCube, LutSlot, LutTransform};
pub use orientation::{InterfaceOrientation, OrientationCoordinator, OrientationUpdate, SensorMount};
pub use permissions::{Authorization, PermissionGate, Resource, StaticPermissions};
pub use pipeline::{FrameProcessingPipeline, FrameSink, PreviewSink, ProcessedFrame};
pub use recording::{
    FinishedRecording, MockWriterFactory, RecordingSession, RecordingState, VideoCodec,
    WriterFactory,
};
pub use session::{CaptureParameters, CaptureSessionController, SessionSettings};
pub use state::{CameraState, StateStore};
pub use thumbnail::Thumbnail;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use recording::GstWriterFactory;
