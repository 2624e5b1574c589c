pub mod acquisition;
pub mod encoder;
pub mod frame_box;

pub use acquisition::{AcquisitionExit, AcquisitionLoop};
pub use encoder::{EncodeError, Encoder};
pub use frame_box::FrameBox;
