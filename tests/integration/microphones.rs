//! Microphone resolution through the public resolver.

use std::sync::Arc;

use tama::CoachError;
use tama::audio::{FallbackTier, MicResolver};
use tama::config::AudioConfig;

use crate::helpers::{FakeMics, device};

#[test]
fn broken_device_falls_back_to_same_name_under_another_driver() {
    let backend = Arc::new(FakeMics {
        devices: vec![
            device(0, "USB Microphone (MME)", "MME"),
            device(1, "Stereo Mix", "MME"),
            device(4, "USB Microphone (WASAPI)", "WASAPI"),
        ],
        broken: vec![0],
        default: Some(1),
        ..FakeMics::default()
    });
    let resolver = MicResolver::new(backend, &AudioConfig::default());

    let opened = resolver.open_with_fallback(Some(0)).unwrap();
    assert_eq!(opened.index, Some(4));
    assert_eq!(opened.tier, FallbackTier::SameName);
}

#[test]
fn physical_duplicates_are_listed_once() {
    let backend = Arc::new(FakeMics {
        devices: vec![
            device(0, "USB Microphone (MME)", "MME"),
            device(4, "USB Microphone (WASAPI)", "WASAPI"),
            device(5, "CABLE Output (VB-Audio)", "WASAPI"),
        ],
        default: Some(0),
        ..FakeMics::default()
    });
    let resolver = MicResolver::new(backend, &AudioConfig::default());

    let names: Vec<String> = resolver
        .refresh()
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["USB Microphone (MME)".to_owned()]);
}

#[test]
fn nothing_opens_means_no_microphone() {
    let backend = Arc::new(FakeMics {
        devices: vec![device(2, "Headset", "ALSA")],
        broken: vec![2],
        default: Some(2),
        ..FakeMics::default()
    });
    let resolver = MicResolver::new(backend, &AudioConfig::default());

    let err = resolver.open_with_fallback(Some(2)).unwrap_err();
    assert!(matches!(err, CoachError::NoMicrophone));
}
