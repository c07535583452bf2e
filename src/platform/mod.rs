//! Platform backends implementing the device and capture seams.

#[cfg(target_os = "windows")]
pub mod windows;
