//! Model runtime plumbing shared by the three services: once-initialized
//! model slots, execution device selection and model artifact resolution.

pub mod artifacts;
pub mod device;
pub mod lazy;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use artifacts::ModelLocation;
pub use device::{Device, DevicePreference};
pub use lazy::LazyModel;
