use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MatchError, Result};
use crate::frontend::handler::parse_families;
use crate::frontend::{AcceptRatio, DetectorKind, MatcherKind};
use crate::viz::Downscale;

/// Run configuration, usually read from a YAML file:
///
/// ```yaml
/// features: [orb, sift]
/// matchers: [bf, flann]
/// accept_ratio: 0.5
/// max_height: 1000
/// downscale: fit_height
/// reference: data/reference.png
/// inputs: data/frames
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    /// Detector family names, paired index by index with `matchers`.
    pub features: Vec<String>,
    pub matchers: Vec<String>,
    pub accept_ratio: f32,
    /// Accept ratio change per key press in the demo.
    pub accept_step: f32,
    pub max_height: i32,
    pub downscale: Downscale,
    pub grayscale: bool,
    pub reference: Option<PathBuf>,
    /// `camera:N`, a video file, a directory of images or a single image.
    pub inputs: Option<String>,
    /// Write rendered views here instead of opening a window.
    pub output_dir: Option<PathBuf>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            features: vec!["orb".to_string()],
            matchers: vec!["bf".to_string()],
            accept_ratio: AcceptRatio::DEFAULT,
            accept_step: 0.05,
            max_height: 1000,
            downscale: Downscale::Keep,
            grayscale: false,
            reference: None,
            inputs: None,
            output_dir: None,
        }
    }
}

impl MatchConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: MatchConfig = serde_yaml::from_reader(File::open(path)?)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Resolve the configured names into typed families.
    pub fn families(&self) -> Result<Vec<(DetectorKind, MatcherKind)>> {
        parse_families(&self.features, &self.matchers)
    }

    pub fn accept_ratio(&self) -> AcceptRatio {
        let ratio = AcceptRatio::new(self.accept_ratio);
        if ratio.value() != self.accept_ratio {
            tracing::warn!(
                configured = self.accept_ratio,
                used = ratio.value(),
                "accept_ratio outside [0, 1]"
            );
        }
        ratio
    }

    pub fn validate(&self) -> Result<()> {
        self.families()?;
        if !self.accept_step.is_finite() || self.accept_step < 0.0 {
            return Err(MatchError::InvalidSetting(format!(
                "accept_step must be a non-negative number, got {}",
                self.accept_step
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MatchConfig::from_yaml("{}").unwrap();
        assert_eq!(config.features, vec!["orb"]);
        assert_eq!(config.matchers, vec!["bf"]);
        assert_eq!(config.accept_ratio().value(), 0.5);
        assert_eq!(config.max_height, 1000);
        assert_eq!(config.downscale, Downscale::Keep);
        assert!(config.output_dir.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config() {
        let config = MatchConfig::from_yaml(
            r#"
features: [orb, sift, brisk]
matchers: [bf, flann, flann]
accept_ratio: 0.3
accept_step: 0.1
max_height: 720
downscale: fit_height
grayscale: true
reference: data/ref.png
inputs: camera:0
output_dir: out
"#,
        )
        .unwrap();
        assert_eq!(
            config.families().unwrap(),
            vec![
                (DetectorKind::Orb, MatcherKind::Bf),
                (DetectorKind::Sift, MatcherKind::Flann),
                (DetectorKind::Brisk, MatcherKind::Flann),
            ]
        );
        assert!((config.accept_ratio().value() - 0.3).abs() < 1e-6);
        assert_eq!(config.downscale, Downscale::FitHeight);
        assert_eq!(config.reference, Some(PathBuf::from("data/ref.png")));
        assert_eq!(config.inputs.as_deref(), Some("camera:0"));
        assert!(config.grayscale);
    }

    #[test]
    fn test_out_of_range_ratio_is_clamped() {
        let config = MatchConfig::from_yaml("accept_ratio: 4.0").unwrap();
        assert_eq!(config.accept_ratio().value(), 1.0);
    }

    #[test]
    fn test_validation_errors() {
        let mismatched = MatchConfig::from_yaml("features: [orb, kaze]\nmatchers: [bf]").unwrap();
        assert!(matches!(
            mismatched.validate(),
            Err(MatchError::FamilyCountMismatch { .. })
        ));

        let unknown = MatchConfig::from_yaml("features: [akaze]").unwrap();
        assert!(matches!(
            unknown.validate(),
            Err(MatchError::UnknownAlgorithm { .. })
        ));

        let negative_step = MatchConfig::from_yaml("accept_step: -0.1").unwrap();
        assert!(matches!(
            negative_step.validate(),
            Err(MatchError::InvalidSetting(_))
        ));

        assert!(matches!(
            MatchConfig::from_yaml("downscale: shrink"),
            Err(MatchError::Config(_))
        ));
        assert!(matches!(
            MatchConfig::from_yaml("colour: true"),
            Err(MatchError::Config(_))
        ));
    }
}
