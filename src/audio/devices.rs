//! Microphone discovery, selection and fallback.
//!
//! [`MicResolver`] sits on top of an [`AudioBackend`] (cpal in production,
//! scripted fakes in tests). Listing candidates probes every device and is
//! slow, so the result is cached until [`MicResolver::invalidate`] or
//! [`MicResolver::refresh`] is called. Callers on the latency-sensitive path
//! read [`MicResolver::cached_candidates`] and refresh from a blocking task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::error::{CoachError, Result};

/// A compatible capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicDevice {
    pub index: usize,
    pub name: String,
}

/// Raw device entry as enumerated by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-wide index, stable for one enumeration.
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    /// Driver API the device was enumerated under.
    pub host: String,
}

/// Format every capture stream must deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per frame returned by [`InputStream::read_frame`].
    pub frame_samples: usize,
}

impl StreamFormat {
    /// 16-bit mono capture format for the perception service.
    pub fn capture(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.send_sample_rate,
            channels: 1,
            frame_samples: config.frame_samples,
        }
    }
}

/// An open capture stream. Reads block until a frame is available.
pub trait InputStream: Send {
    /// Read one frame of 16-bit little-endian PCM.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Audio`] when the device stopped delivering audio.
    fn read_frame(&mut self) -> Result<Vec<u8>>;
}

/// OS audio API seam. All methods may block.
pub trait AudioBackend: Send + Sync {
    /// Enumerate input-capable devices across every driver API.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses enumeration.
    fn input_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Name of the OS default input device.
    fn default_input_name(&self) -> Option<String>;

    /// Index of the OS default input device, if it appears in the enumeration.
    fn default_input_index(&self) -> Option<usize>;

    /// Open a short-lived stream in `format` and close it immediately.
    fn probe(&self, index: usize, format: &StreamFormat) -> bool;

    /// Open a capture stream. `None` opens the unqualified system default.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Audio`] if the device cannot be opened in `format`.
    fn open_input(
        &self,
        index: Option<usize>,
        format: &StreamFormat,
    ) -> Result<Box<dyn InputStream>>;
}

/// Which fallback level produced the open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTier {
    /// The requested device.
    Requested,
    /// The same physical device under another driver API.
    SameName,
    /// The system default input.
    SystemDefault,
}

/// Result of [`MicResolver::open_with_fallback`].
pub struct OpenedMic {
    pub stream: Box<dyn InputStream>,
    /// Index actually opened, when known.
    pub index: Option<usize>,
    pub tier: FallbackTier,
}

impl std::fmt::Debug for OpenedMic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedMic")
            .field("index", &self.index)
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

/// Resolves, caches and opens microphones.
pub struct MicResolver {
    backend: Arc<dyn AudioBackend>,
    format: StreamFormat,
    excluded: Vec<String>,
    prefix_len: usize,
    cache: Mutex<Option<Vec<MicDevice>>>,
}

impl MicResolver {
    pub fn new(backend: Arc<dyn AudioBackend>, config: &AudioConfig) -> Self {
        Self {
            backend,
            format: StreamFormat::capture(config),
            excluded: config
                .excluded_devices
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            prefix_len: config.name_prefix_len.max(1),
            cache: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Lowercased name prefix identifying one physical device.
    fn name_key(&self, name: &str) -> String {
        name.trim().to_lowercase().chars().take(self.prefix_len).collect()
    }

    fn is_excluded(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.excluded.iter().any(|fragment| lower.contains(fragment))
    }

    /// Enumerate, filter, deduplicate and probe. Slow; never call this from
    /// the async executor directly.
    ///
    /// # Errors
    ///
    /// Returns an error if device enumeration fails.
    pub fn list_candidates(&self) -> Result<Vec<MicDevice>> {
        let devices = self.backend.input_devices()?;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for device in devices {
            if device.max_input_channels == 0 || self.is_excluded(&device.name) {
                continue;
            }
            let key = self.name_key(&device.name);
            if seen.contains(&key) {
                continue;
            }
            if !self.backend.probe(device.index, &self.format) {
                debug!(index = device.index, name = %device.name, host = %device.host, "device rejected capture format");
                continue;
            }
            seen.insert(key);
            candidates.push(MicDevice {
                index: device.index,
                name: device.name,
            });
        }

        info!(count = candidates.len(), "microphone candidates resolved");
        Ok(candidates)
    }

    /// Cached candidates, if a listing has been done since the last invalidation.
    pub fn cached_candidates(&self) -> Option<Vec<MicDevice>> {
        match self.cache.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-list candidates and replace the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if device enumeration fails; the cache is left untouched.
    pub fn refresh(&self) -> Result<Vec<MicDevice>> {
        let candidates = self.list_candidates()?;
        let mut guard = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(candidates.clone());
        Ok(candidates)
    }

    /// Cached candidates, listing them first if the cache is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing was needed and enumeration failed.
    pub fn candidates(&self) -> Result<Vec<MicDevice>> {
        match self.cached_candidates() {
            Some(cached) => Ok(cached),
            None => self.refresh(),
        }
    }

    /// Drop the cache so the next [`candidates`](Self::candidates) call re-lists.
    pub fn invalidate(&self) {
        let mut guard = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }

    /// Pick the device to use. An explicit selection wins; otherwise the
    /// system default if it is a candidate (matched by name prefix), else the
    /// first candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if candidates had to be listed and enumeration failed.
    pub fn resolve_default(&self, selected: Option<usize>) -> Result<Option<usize>> {
        if selected.is_some() {
            return Ok(selected);
        }
        let candidates = self.candidates()?;
        if let Some(default_name) = self.backend.default_input_name() {
            let key = self.name_key(&default_name);
            if let Some(found) = candidates.iter().find(|c| self.name_key(&c.name) == key) {
                return Ok(Some(found.index));
            }
        }
        Ok(candidates.first().map(|c| c.index))
    }

    /// Open `index`, then the same physical device under another driver API,
    /// then the unqualified system default.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::NoMicrophone`] when all three levels fail.
    pub fn open_with_fallback(&self, index: Option<usize>) -> Result<OpenedMic> {
        if let Some(wanted) = index {
            match self.backend.open_input(Some(wanted), &self.format) {
                Ok(stream) => {
                    info!(index = wanted, "microphone opened");
                    return Ok(OpenedMic {
                        stream,
                        index: Some(wanted),
                        tier: FallbackTier::Requested,
                    });
                }
                Err(e) => warn!(index = wanted, "microphone open failed: {e}"),
            }

            if let Some(opened) = self.open_same_name(wanted) {
                return Ok(opened);
            }
        }

        match self.backend.open_input(None, &self.format) {
            Ok(stream) => {
                let default_index = self.backend.default_input_index();
                info!(index = ?default_index, "opened system default microphone");
                Ok(OpenedMic {
                    stream,
                    index: default_index,
                    tier: FallbackTier::SystemDefault,
                })
            }
            Err(e) => {
                warn!("system default microphone failed: {e}");
                Err(CoachError::NoMicrophone)
            }
        }
    }

    fn open_same_name(&self, wanted: usize) -> Option<OpenedMic> {
        let devices = match self.backend.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("cannot enumerate devices for fallback: {e}");
                return None;
            }
        };
        let name = devices.iter().find(|d| d.index == wanted)?.name.clone();
        let key = self.name_key(&name);

        for alt in devices
            .iter()
            .filter(|d| d.index != wanted && d.max_input_channels > 0)
            .filter(|d| self.name_key(&d.name) == key)
        {
            match self.backend.open_input(Some(alt.index), &self.format) {
                Ok(stream) => {
                    info!(wanted, index = alt.index, host = %alt.host, "opened same microphone under another driver");
                    return Some(OpenedMic {
                        stream,
                        index: Some(alt.index),
                        tier: FallbackTier::SameName,
                    });
                }
                Err(e) => debug!(index = alt.index, "alternate open failed: {e}"),
            }
        }
        None
    }
}

/// Tracks device selection across hot-swaps so a failing device is not
/// retried in a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotSwap {
    requested: Option<usize>,
    current: Option<usize>,
    last_failed: Option<usize>,
}

impl HotSwap {
    /// Device index serving the stream right now.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn last_failed(&self) -> Option<usize> {
        self.last_failed
    }

    /// Whether `wanted` calls for reopening the stream.
    pub fn needs_switch(&self, wanted: Option<usize>) -> bool {
        if wanted == self.requested {
            return false;
        }
        !(wanted.is_some() && wanted == self.last_failed)
    }

    /// Record the outcome of opening `wanted`.
    pub fn record_opened(&mut self, wanted: Option<usize>, opened: &OpenedMic) {
        self.requested = wanted;
        self.current = opened.index;
        self.last_failed = match (wanted, opened.tier) {
            (Some(w), FallbackTier::SameName | FallbackTier::SystemDefault) => Some(w),
            _ => None,
        };
    }

    /// Record that nothing at all could be opened for `wanted`.
    pub fn record_failed(&mut self, wanted: Option<usize>) {
        self.requested = wanted;
        self.current = None;
        self.last_failed = wanted;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SilentStream;

    impl InputStream for SilentStream {
        fn read_frame(&mut self) -> Result<Vec<u8>> {
            Ok(vec![0; 2048])
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        devices: Vec<DeviceInfo>,
        incompatible: Vec<usize>,
        broken: Vec<usize>,
        default: Option<usize>,
        default_broken: bool,
        probes: AtomicUsize,
    }

    fn dev(index: usize, name: &str, host: &str) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.to_owned(),
            max_input_channels: 1,
            host: host.to_owned(),
        }
    }

    impl AudioBackend for FakeBackend {
        fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.devices.clone())
        }

        fn default_input_name(&self) -> Option<String> {
            let index = self.default?;
            self.devices
                .iter()
                .find(|d| d.index == index)
                .map(|d| d.name.clone())
        }

        fn default_input_index(&self) -> Option<usize> {
            self.default
        }

        fn probe(&self, index: usize, _format: &StreamFormat) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            !self.incompatible.contains(&index)
        }

        fn open_input(
            &self,
            index: Option<usize>,
            _format: &StreamFormat,
        ) -> Result<Box<dyn InputStream>> {
            match index {
                Some(i) if self.broken.contains(&i) => Err(CoachError::Audio(format!("{i} broken"))),
                Some(_) => Ok(Box::new(SilentStream)),
                None if self.default_broken => Err(CoachError::Audio("no default".into())),
                None => Ok(Box::new(SilentStream)),
            }
        }
    }

    fn resolver(backend: FakeBackend) -> (MicResolver, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let resolver = MicResolver::new(backend.clone(), &AudioConfig::default());
        (resolver, backend)
    }

    #[test]
    fn candidates_filter_virtual_and_duplicates() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![
                dev(0, "Microphone (USB Audio Device)", "WASAPI"),
                dev(1, "Microphone (USB Audio Device) [MME]", "MME"),
                dev(2, "CABLE Output (VB-Audio Virtual Cable)", "WASAPI"),
                dev(3, "Headset Microphone (Jabra)", "WASAPI"),
                dev(4, "Line In (Realtek)", "WASAPI"),
            ],
            incompatible: vec![4],
            ..FakeBackend::default()
        });

        let names: Vec<usize> = resolver
            .list_candidates()
            .unwrap()
            .iter()
            .map(|c| c.index)
            .collect();
        assert_eq!(names, vec![0, 3]);
    }

    #[test]
    fn output_only_devices_are_skipped() {
        let mut speakers = dev(0, "Speakers", "WASAPI");
        speakers.max_input_channels = 0;
        let (resolver, backend) = resolver(FakeBackend {
            devices: vec![speakers, dev(1, "Mic", "WASAPI")],
            ..FakeBackend::default()
        });
        let candidates = resolver.list_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_is_reused_until_invalidated() {
        let (resolver, backend) = resolver(FakeBackend {
            devices: vec![dev(0, "Mic A", "x"), dev(1, "Mic B", "x")],
            ..FakeBackend::default()
        });

        assert!(resolver.cached_candidates().is_none());
        resolver.candidates().unwrap();
        resolver.candidates().unwrap();
        assert_eq!(backend.probes.load(Ordering::SeqCst), 2);

        resolver.invalidate();
        assert!(resolver.cached_candidates().is_none());
        resolver.candidates().unwrap();
        assert_eq!(backend.probes.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn resolve_default_prefers_selection_then_system_default() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![dev(0, "Mic A", "x"), dev(1, "Mic B", "x")],
            default: Some(1),
            ..FakeBackend::default()
        });
        assert_eq!(resolver.resolve_default(Some(0)).unwrap(), Some(0));
        assert_eq!(resolver.resolve_default(None).unwrap(), Some(1));
    }

    #[test]
    fn resolve_default_falls_back_to_first_candidate() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![
                dev(0, "Stereo Mix (Realtek)", "x"),
                dev(1, "Mic A", "x"),
                dev(2, "Mic B", "x"),
            ],
            incompatible: vec![0],
            default: Some(0),
            ..FakeBackend::default()
        });
        assert_eq!(resolver.resolve_default(None).unwrap(), Some(1));
    }

    #[test]
    fn open_returns_requested_device() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![dev(0, "Mic A", "x")],
            ..FakeBackend::default()
        });
        let opened = resolver.open_with_fallback(Some(0)).unwrap();
        assert_eq!(opened.index, Some(0));
        assert_eq!(opened.tier, FallbackTier::Requested);
    }

    #[test]
    fn open_falls_back_to_same_name_under_other_driver() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![
                dev(0, "Default Mic", "WASAPI"),
                dev(3, "Microphone (USB Audio Device)", "WASAPI"),
                dev(7, "Microphone (USB Audio Device)", "DirectSound"),
            ],
            broken: vec![3],
            default: Some(0),
            ..FakeBackend::default()
        });
        let opened = resolver.open_with_fallback(Some(3)).unwrap();
        assert_eq!(opened.index, Some(7));
        assert_eq!(opened.tier, FallbackTier::SameName);
    }

    #[test]
    fn open_falls_back_to_system_default() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![dev(0, "Default Mic", "x"), dev(3, "Lonely Mic", "x")],
            broken: vec![3],
            default: Some(0),
            ..FakeBackend::default()
        });
        let opened = resolver.open_with_fallback(Some(3)).unwrap();
        assert_eq!(opened.index, Some(0));
        assert_eq!(opened.tier, FallbackTier::SystemDefault);
    }

    #[test]
    fn open_reports_no_microphone_when_everything_fails() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![dev(3, "Mic", "x")],
            broken: vec![3],
            default_broken: true,
            ..FakeBackend::default()
        });
        let err = resolver.open_with_fallback(Some(3)).unwrap_err();
        assert!(matches!(err, CoachError::NoMicrophone));
    }

    #[test]
    fn hot_swap_does_not_retry_failed_device() {
        let (resolver, _) = resolver(FakeBackend {
            devices: vec![dev(0, "Default Mic", "x"), dev(3, "Broken Mic", "x")],
            broken: vec![3],
            default: Some(0),
            ..FakeBackend::default()
        });
        let mut swap = HotSwap::default();
        assert!(swap.needs_switch(Some(3)));

        let opened = resolver.open_with_fallback(Some(3)).unwrap();
        swap.record_opened(Some(3), &opened);
        assert_eq!(swap.current(), Some(0));
        assert_eq!(swap.last_failed(), Some(3));
        assert!(!swap.needs_switch(Some(3)));

        // A different selection is attempted, and going back retries 3.
        assert!(swap.needs_switch(Some(0)));
        let opened = resolver.open_with_fallback(Some(0)).unwrap();
        swap.record_opened(Some(0), &opened);
        assert_eq!(swap.last_failed(), None);
        assert!(swap.needs_switch(Some(3)));
    }

    #[test]
    fn hot_swap_after_total_failure() {
        let mut swap = HotSwap::default();
        swap.record_failed(Some(2));
        assert_eq!(swap.current(), None);
        assert!(!swap.needs_switch(Some(2)));
        assert!(swap.needs_switch(Some(1)));
    }
}
