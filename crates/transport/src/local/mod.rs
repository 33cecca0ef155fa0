//! Local-device transports
//!
//! Both variants sit behind a platform audio path that performs acoustic
//! echo cancellation, so speaker output does not leak into the mic
//! stream. The helper-binary variant drives a single native process
//! whose stdout carries mic PCM and whose stdin accepts speaker PCM; the
//! PulseAudio variant pairs `parec`/`pacat` capture and playback helpers
//! bound to named echo-cancelling virtual devices.

mod helper;
mod pulse;

pub use helper::{HelperTransport, HelperTransportConfig};
pub use pulse::{PulseTransport, PulseTransportConfig};
