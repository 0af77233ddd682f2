//! Audio capture, playback and microphone management.

pub mod capture;
pub mod cpal_backend;
pub mod devices;
pub mod playback;

pub use capture::MicCapture;
pub use cpal_backend::{CpalBackend, CpalSpeaker};
pub use devices::{
    AudioBackend, DeviceInfo, FallbackTier, HotSwap, InputStream, MicDevice, MicResolver,
    OpenedMic, StreamFormat,
};
pub use playback::{AudioSink, NullSink, PlaybackHandle, spawn_playback};
