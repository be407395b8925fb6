//! OS window listing and screen capture behind [`crate::window::Desktop`].

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod win32;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
mod fallback;

#[cfg(target_os = "macos")]
pub use macos::HostDesktop;
#[cfg(target_os = "windows")]
pub use win32::HostDesktop;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use fallback::HostDesktop;
