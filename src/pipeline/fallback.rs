//! Ordered decoder and sink candidates.
//!
//! Candidates are tried front to back; the first one the backend can build wins
//! and the rest are never attempted.

use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{ElementRole, StreamError, StreamResult};

/// Sink that every platform falls back to last.
pub const GENERIC_SINK: &str = "autovideosink";

/// How the application was packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Self-contained AppImage: bundled plugins only, so software decoders go first.
    AppImage,
    Standard,
}

impl DeploymentMode {
    /// AppImage runtimes export `APPDIR`.
    pub fn detect() -> Self {
        Self::from_appdir(std::env::var_os("APPDIR").is_some())
    }

    pub fn from_appdir(appdir_set: bool) -> Self {
        if appdir_set {
            DeploymentMode::AppImage
        } else {
            DeploymentMode::Standard
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    Windows,
    MacOs,
    Other,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            HostPlatform::Linux
        } else if cfg!(target_os = "windows") {
            HostPlatform::Windows
        } else if cfg!(target_os = "macos") {
            HostPlatform::MacOs
        } else {
            HostPlatform::Other
        }
    }
}

pub fn decoder_candidates(mode: DeploymentMode) -> Vec<String> {
    let names: &[&str] = match mode {
        DeploymentMode::AppImage => &["avdec_h264", "openh264dec", "decodebin"],
        DeploymentMode::Standard => &[
            "nvh264dec",
            "nvdec",
            "d3d11h264dec",
            "msdkh264dec",
            "vaapih264dec",
            "vtdec_h264",
            "avdec_h264",
            "openh264dec",
            "decodebin",
        ],
    };
    names.iter().map(|name| name.to_string()).collect()
}

pub fn sink_candidates(platform: HostPlatform) -> Vec<String> {
    let native: &[&str] = match platform {
        HostPlatform::Linux => &["xvimagesink", "ximagesink"],
        HostPlatform::Windows => &["d3dvideosink", "directdrawsink"],
        HostPlatform::MacOs => &["osxvideosink"],
        HostPlatform::Other => &[],
    };
    native
        .iter()
        .copied()
        .chain(std::iter::once(GENERIC_SINK))
        .map(str::to_string)
        .collect()
}

/// The decoder and sink lists a pipeline will try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    pub decoders: Vec<String>,
    pub sinks: Vec<String>,
}

impl CandidateSet {
    pub fn for_host(mode: DeploymentMode, platform: HostPlatform) -> Self {
        Self {
            decoders: decoder_candidates(mode),
            sinks: sink_candidates(platform),
        }
    }

    /// Host defaults, with any lists from `config` taking their place.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let host = Self::for_host(DeploymentMode::detect(), HostPlatform::current());
        Self {
            decoders: config.decoder_candidates.clone().unwrap_or(host.decoders),
            sinks: config.sink_candidates.clone().unwrap_or(host.sinks),
        }
    }
}

/// Try `build` on each candidate in order and return the first that succeeds.
pub fn first_available<F>(role: ElementRole, candidates: &[String], mut build: F) -> StreamResult<String>
where
    F: FnMut(&str) -> StreamResult<()>,
{
    let mut tried = Vec::with_capacity(candidates.len());
    for name in candidates {
        match build(name) {
            Ok(()) => return Ok(name.clone()),
            Err(err) => {
                debug!(%role, candidate = %name, error = %err, "candidate unavailable");
                tried.push(name.clone());
            }
        }
    }
    Err(StreamError::fallback_exhausted(role, tried))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_success_wins_and_rest_untouched() {
        let candidates = names(&["A", "B", "C"]);
        let mut attempted = Vec::new();
        let chosen = first_available(ElementRole::Decoder, &candidates, |name| {
            attempted.push(name.to_string());
            if name == "A" {
                Err(StreamError::element(ElementRole::Decoder, name, "no such element"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(chosen, "B");
        assert_eq!(attempted, names(&["A", "B"]));
    }

    #[test]
    fn test_exhausted_chain_lists_every_candidate() {
        let candidates = names(&["xvimagesink", "autovideosink"]);
        let err = first_available(ElementRole::Sink, &candidates, |name| {
            Err(StreamError::element(ElementRole::Sink, name, "missing"))
        })
        .unwrap_err();

        match err {
            StreamError::FallbackExhausted { role, tried, .. } => {
                assert_eq!(role, ElementRole::Sink);
                assert_eq!(tried, candidates);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_chain_is_exhausted() {
        let err = first_available(ElementRole::Decoder, &[], |_| Ok(())).unwrap_err();
        assert_eq!(err.category(), "fallback_exhausted");
    }

    #[rstest]
    #[case(DeploymentMode::AppImage, "avdec_h264", 3)]
    #[case(DeploymentMode::Standard, "nvh264dec", 9)]
    fn test_decoder_order_by_mode(
        #[case] mode: DeploymentMode,
        #[case] first: &str,
        #[case] len: usize,
    ) {
        let list = decoder_candidates(mode);
        assert_eq!(list[0], first);
        assert_eq!(list.len(), len);
        assert_eq!(list.last().map(String::as_str), Some("decodebin"));
    }

    #[test]
    fn test_software_decoders_follow_hardware_in_standard_mode() {
        let list = decoder_candidates(DeploymentMode::Standard);
        let position = |name: &str| list.iter().position(|n| n == name).unwrap();
        assert!(position("vaapih264dec") < position("avdec_h264"));
        assert!(position("avdec_h264") < position("openh264dec"));
    }

    #[rstest]
    #[case(HostPlatform::Linux, &["xvimagesink", "ximagesink", "autovideosink"])]
    #[case(HostPlatform::Windows, &["d3dvideosink", "directdrawsink", "autovideosink"])]
    #[case(HostPlatform::MacOs, &["osxvideosink", "autovideosink"])]
    #[case(HostPlatform::Other, &["autovideosink"])]
    fn test_sink_order_by_platform(#[case] platform: HostPlatform, #[case] expected: &[&str]) {
        assert_eq!(sink_candidates(platform), names(expected));
    }

    #[test]
    fn test_config_overrides_candidates() {
        let mut config = PipelineConfig::default();
        config.decoder_candidates = Some(names(&["openh264dec"]));

        let set = CandidateSet::from_config(&config);
        assert_eq!(set.decoders, names(&["openh264dec"]));
        assert_eq!(set.sinks.last().map(String::as_str), Some(GENERIC_SINK));
    }

    #[test]
    fn test_deployment_mode_from_appdir() {
        assert_eq!(DeploymentMode::from_appdir(true), DeploymentMode::AppImage);
        assert_eq!(DeploymentMode::from_appdir(false), DeploymentMode::Standard);
    }
}
