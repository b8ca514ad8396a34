pub mod capture;
pub mod device;
pub mod frame_pool;
pub mod ring;
pub mod watchdog;

// Public API
pub use capture::CaptureThread;
pub use device::{CaptureDevice, CpalCaptureDevice};
pub use frame_pool::{measure_levels, FrameHandle, FramePool};
pub use ring::{RingConsumer, RingProducer, RingTap, SampleRing};
pub use watchdog::WatchdogTimer;
