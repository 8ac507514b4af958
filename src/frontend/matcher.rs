use std::fmt;
use std::str::FromStr;

use nalgebra::Point2;
use opencv::core::{DMatch, KeyPoint, Mat, Ptr, Vector};
use opencv::features2d::{BFMatcher, DescriptorMatcher, FlannBasedMatcher};
use opencv::flann;
use opencv::prelude::*;

use crate::error::{MatchError, Result};
use crate::frontend::features::{keypoints_to_points, DescriptorKind};

/// Supported descriptor matching strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// Approximate nearest neighbour search through FLANN: an LSH index for
    /// binary descriptors, a randomized KD-tree for float descriptors. Results
    /// are not guaranteed to be the exact nearest neighbours.
    Flann,
    /// Exhaustive brute-force search.
    Bf,
}

impl MatcherKind {
    pub const ALL: [MatcherKind; 2] = [MatcherKind::Flann, MatcherKind::Bf];

    pub fn name(self) -> &'static str {
        match self {
            MatcherKind::Flann => "flann",
            MatcherKind::Bf => "bf",
        }
    }
}

impl FromStr for MatcherKind {
    type Err = MatchError;

    fn from_str(name: &str) -> Result<Self> {
        MatcherKind::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| MatchError::UnknownAlgorithm {
                kind: "matcher",
                name: name.to_string(),
                expected: "flann, bf",
            })
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fraction of the best-ranked matches kept after sorting, always in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct AcceptRatio(f32);

impl AcceptRatio {
    pub const DEFAULT: f32 = 0.5;

    /// Clamps into `[0, 1]`; NaN falls back to the default.
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self::default();
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn adjusted(self, delta: f32) -> Self {
        if delta.is_nan() {
            return self;
        }
        Self::new(self.0 + delta)
    }

    /// Number of matches kept out of `total`: `floor(total * ratio)`.
    ///
    /// The product is taken in `f32` so that ratios such as `0.7`, stored as
    /// `0.69999999`, still keep 7 of 10 matches.
    pub fn keep_count(self, total: usize) -> usize {
        ((total as f32 * self.0).floor() as usize).min(total)
    }
}

impl Default for AcceptRatio {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl fmt::Display for AcceptRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Sort ascending by distance and keep the best `floor(len * ratio)` matches.
pub fn retain_best(mut matches: Vec<DMatch>, ratio: AcceptRatio) -> Vec<DMatch> {
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    matches.truncate(ratio.keep_count(matches.len()));
    matches
}

/// Both descriptor sets must be non-empty and share column count and element type.
pub fn check_descriptors(reference: &Mat, input: &Mat) -> Result<()> {
    if reference.empty() || input.empty() {
        return Err(MatchError::EmptyDescriptors);
    }
    if reference.cols() != input.cols() || reference.typ() != input.typ() {
        return Err(MatchError::DescriptorMismatch {
            ref_cols: reference.cols(),
            ref_type: reference.typ(),
            input_cols: input.cols(),
            input_type: input.typ(),
        });
    }
    Ok(())
}

fn create_descriptor_matcher(
    kind: MatcherKind,
    descriptors: DescriptorKind,
) -> Result<Ptr<DescriptorMatcher>> {
    let matcher: Ptr<DescriptorMatcher> = match (kind, descriptors) {
        (MatcherKind::Flann, DescriptorKind::Binary) => {
            // KD-trees need float data; binary descriptors go through an LSH index.
            let index = Ptr::new(flann::IndexParams::from(flann::LshIndexParams::new(12, 20, 2)?));
            let search = Ptr::new(flann::SearchParams::new(32, 0.0, true, false)?);
            Ptr::new(FlannBasedMatcher::new(&index, &search)?).into()
        }
        (MatcherKind::Flann, DescriptorKind::Float) => FlannBasedMatcher::create()?.into(),
        (MatcherKind::Bf, DescriptorKind::Binary) => {
            BFMatcher::create(opencv::core::NORM_HAMMING, false)?.into()
        }
        (MatcherKind::Bf, DescriptorKind::Float) => {
            BFMatcher::create(opencv::core::NORM_L1, false)?.into()
        }
    };
    Ok(matcher)
}

/// Read-only view of a matcher's most recent output.
pub struct MatcherResult<'a> {
    pub kind: MatcherKind,
    pub name: &'static str,
    pub matches: &'a Vector<DMatch>,
}

impl MatcherResult<'_> {
    /// Matched `(input, reference)` keypoint positions. Matches whose indices
    /// fall outside the keypoint lists are skipped.
    pub fn correspondences(
        &self,
        input: &Vector<KeyPoint>,
        reference: &Vector<KeyPoint>,
    ) -> Vec<(Point2<f64>, Point2<f64>)> {
        let input_pts = keypoints_to_points(input);
        let reference_pts = keypoints_to_points(reference);

        self.matches
            .iter()
            .filter_map(|m| {
                let query = usize::try_from(m.query_idx).ok()?;
                let train = usize::try_from(m.train_idx).ok()?;
                Some((*input_pts.get(query)?, *reference_pts.get(train)?))
            })
            .collect()
    }
}

pub struct Matcher {
    kind: MatcherKind,
    descriptor_kind: DescriptorKind,
    matcher: Ptr<DescriptorMatcher>,
    matches: Vector<DMatch>,
}

impl Matcher {
    /// Build a matcher from its configuration name, choosing the index and
    /// distance metric that suit the companion detector's descriptors.
    pub fn factory(name: &str, companion: DescriptorKind) -> Result<Self> {
        Self::new(name.parse()?, companion)
    }

    pub fn new(kind: MatcherKind, descriptor_kind: DescriptorKind) -> Result<Self> {
        let matcher = create_descriptor_matcher(kind, descriptor_kind)?;
        Ok(Self {
            kind,
            descriptor_kind,
            matcher,
            matches: Vector::new(),
        })
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn descriptor_kind(&self) -> DescriptorKind {
        self.descriptor_kind
    }

    /// Match every input descriptor to its nearest reference descriptor and keep
    /// the best `ratio` fraction, sorted by distance. Empty or incompatible
    /// descriptor sets produce an empty match list.
    pub fn match_descriptors(
        &mut self,
        reference: &Mat,
        input: &Mat,
        ratio: AcceptRatio,
    ) -> Result<()> {
        if let Err(reason) = check_descriptors(reference, input) {
            tracing::debug!(matcher = self.name(), %reason, "no matches computed");
            self.matches = Vector::new();
            return Ok(());
        }

        let mut raw = Vector::<DMatch>::new();
        self.matcher
            .train_match(input, reference, &mut raw, &Mat::default())?;
        let total = raw.len();

        let kept = retain_best(raw.iter().collect(), ratio);
        tracing::debug!(
            matcher = self.name(),
            total,
            kept = kept.len(),
            ratio = ratio.value(),
            "matched descriptors"
        );
        self.matches = kept.into_iter().collect();
        Ok(())
    }

    pub fn matches(&self) -> &Vector<DMatch> {
        &self.matches
    }

    pub fn result(&self) -> MatcherResult<'_> {
        MatcherResult {
            kind: self.kind,
            name: self.name(),
            matches: &self.matches,
        }
    }
}
