//! Device selection

mod device;

pub use device::{select_device, DeviceSpec};
