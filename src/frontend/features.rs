use std::fmt;
use std::str::FromStr;

use nalgebra::Point2;
use opencv::core::{KeyPoint, Mat, Ptr, Vector};
use opencv::features2d::{self, Feature2D};
use opencv::prelude::*;

use crate::error::{MatchError, Result};

/// Supported keypoint detector / descriptor extractor families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Sift,
    Surf,
    Orb,
    Kaze,
    Brisk,
}

/// Element type of the descriptors a detector produces. Binary descriptors are
/// compared with Hamming distance, floating-point ones with L1/L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Float,
    Binary,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 5] = [
        DetectorKind::Sift,
        DetectorKind::Surf,
        DetectorKind::Orb,
        DetectorKind::Kaze,
        DetectorKind::Brisk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::Sift => "sift",
            DetectorKind::Surf => "surf",
            DetectorKind::Orb => "orb",
            DetectorKind::Kaze => "kaze",
            DetectorKind::Brisk => "brisk",
        }
    }

    pub fn descriptor_kind(self) -> DescriptorKind {
        match self {
            DetectorKind::Orb | DetectorKind::Brisk => DescriptorKind::Binary,
            DetectorKind::Sift | DetectorKind::Surf | DetectorKind::Kaze => DescriptorKind::Float,
        }
    }
}

impl FromStr for DetectorKind {
    type Err = MatchError;

    fn from_str(name: &str) -> Result<Self> {
        DetectorKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| MatchError::UnknownAlgorithm {
                kind: "detector",
                name: name.to_string(),
                expected: "sift, surf, orb, kaze, brisk",
            })
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl DescriptorKind {
    pub fn is_binary(self) -> bool {
        self == DescriptorKind::Binary
    }
}

#[derive(Clone)]
pub struct FeatureSet {
    pub keypoints: Vector<KeyPoint>,
    pub descriptors: Mat,
}

impl FeatureSet {
    pub fn empty() -> Self {
        Self {
            keypoints: Vector::new(),
            descriptors: Mat::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// One OpenCV feature algorithm behind the common `Feature2D` interface.
pub struct FeatureExtractor {
    kind: DetectorKind,
    feature: Ptr<Feature2D>,
}

impl FeatureExtractor {
    pub fn new(kind: DetectorKind) -> Result<Self> {
        let feature: Ptr<Feature2D> = match kind {
            DetectorKind::Sift => features2d::SIFT::create(0, 3, 0.04, 10.0, 1.6, false)?.into(),
            DetectorKind::Surf => create_surf()?,
            DetectorKind::Orb => features2d::ORB::create(
                500,
                1.2,
                8,
                31,
                0,
                2,
                features2d::ORB_ScoreType::HARRIS_SCORE,
                31,
                20,
            )?
            .into(),
            DetectorKind::Kaze => features2d::KAZE::create(
                false,
                false,
                0.001,
                4,
                4,
                features2d::KAZE_DiffusivityType::DIFF_PM_G2,
            )?
            .into(),
            DetectorKind::Brisk => features2d::BRISK::create(30, 3, 1.0)?.into(),
        };
        Ok(Self { kind, feature })
    }

    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    pub fn detect(&mut self, image: &Mat) -> Result<FeatureSet> {
        // Not every algorithm tolerates an empty input; treat it as "no features".
        if image.empty() {
            return Ok(FeatureSet::empty());
        }
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        let mask = Mat::default();
        self.feature
            .detect_and_compute(image, &mask, &mut keypoints, &mut descriptors, false)?;
        Ok(FeatureSet {
            keypoints,
            descriptors,
        })
    }
}

#[cfg(feature = "nonfree")]
fn create_surf() -> Result<Ptr<Feature2D>> {
    Ok(opencv::xfeatures2d::SURF::create(100.0, 4, 3, false, false)?.into())
}

#[cfg(not(feature = "nonfree"))]
fn create_surf() -> Result<Ptr<Feature2D>> {
    Err(MatchError::AlgorithmUnavailable("surf"))
}

/// Read-only view of a detector's most recent output.
pub struct DetectResult<'a> {
    pub kind: DetectorKind,
    pub name: &'static str,
    pub image: &'a Mat,
    pub keypoints: &'a Vector<KeyPoint>,
    pub descriptors: &'a Mat,
    pub descriptor_kind: DescriptorKind,
}

/// A feature extractor plus the image, keypoints and descriptors of its last run.
pub struct Detector {
    extractor: FeatureExtractor,
    image: Mat,
    features: FeatureSet,
}

impl Detector {
    /// Build a detector from its configuration name.
    pub fn factory(name: &str) -> Result<Self> {
        Self::new(name.parse()?)
    }

    pub fn new(kind: DetectorKind) -> Result<Self> {
        Ok(Self {
            extractor: FeatureExtractor::new(kind)?,
            image: Mat::default(),
            features: FeatureSet::empty(),
        })
    }

    pub fn kind(&self) -> DetectorKind {
        self.extractor.kind()
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn descriptor_kind(&self) -> DescriptorKind {
        self.kind().descriptor_kind()
    }

    /// Replace the stored state with the features of `image`.
    pub fn detect_and_compute(&mut self, image: &Mat) -> Result<()> {
        let features = self.extractor.detect(image)?;
        self.image = image.try_clone()?;
        tracing::debug!(
            detector = self.name(),
            keypoints = features.len(),
            rows = self.image.rows(),
            cols = self.image.cols(),
            "detected features"
        );
        self.features = features;
        Ok(())
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn result(&self) -> DetectResult<'_> {
        DetectResult {
            kind: self.kind(),
            name: self.name(),
            image: &self.image,
            keypoints: &self.features.keypoints,
            descriptors: &self.features.descriptors,
            descriptor_kind: self.descriptor_kind(),
        }
    }
}

/// Convert OpenCV keypoints to (x, y) points.
pub fn keypoints_to_points(keypoints: &Vector<KeyPoint>) -> Vec<Point2<f64>> {
    keypoints
        .iter()
        .map(|kp| Point2::new(kp.pt().x as f64, kp.pt().y as f64))
        .collect()
}
