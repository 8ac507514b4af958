use nalgebra::Point2;
use opencv::core::Mat;
use opencv::prelude::*;

use crate::config::MatchConfig;
use crate::error::{MatchError, Result};
use crate::frontend::features::{DetectResult, Detector, DetectorKind};
use crate::frontend::matcher::{AcceptRatio, Matcher, MatcherKind, MatcherResult};
use crate::viz::draw::{self, Downscale};

/// Pair up detector and matcher names index by index.
pub fn parse_families<F, M>(features: &[F], matchers: &[M]) -> Result<Vec<(DetectorKind, MatcherKind)>>
where
    F: AsRef<str>,
    M: AsRef<str>,
{
    if features.len() != matchers.len() {
        return Err(MatchError::FamilyCountMismatch {
            features: features.len(),
            matchers: matchers.len(),
        });
    }
    features
        .iter()
        .zip(matchers)
        .map(|(feature, matcher)| -> Result<(DetectorKind, MatcherKind)> {
            Ok((feature.as_ref().parse()?, matcher.as_ref().parse()?))
        })
        .collect()
}

/// Matches input images against a reference image with one
/// (reference detector, input detector, matcher) triple per feature family.
///
/// The three vectors always have the same length and are indexed in lockstep:
/// matcher `i` only ever sees the descriptors of detectors `i`.
pub struct MatchHandler {
    reference: Vec<Detector>,
    input: Vec<Detector>,
    matchers: Vec<Matcher>,
    accept_ratio: AcceptRatio,
    has_reference: bool,
}

impl MatchHandler {
    /// Create detectors and matchers from configuration names. Both lists must
    /// have the same length.
    pub fn new<F, M>(features: &[F], matchers: &[M]) -> Result<Self>
    where
        F: AsRef<str>,
        M: AsRef<str>,
    {
        Self::from_kinds(&parse_families(features, matchers)?)
    }

    pub fn from_kinds(families: &[(DetectorKind, MatcherKind)]) -> Result<Self> {
        let mut reference = Vec::with_capacity(families.len());
        let mut input = Vec::with_capacity(families.len());
        let mut matchers = Vec::with_capacity(families.len());

        for &(detector_kind, matcher_kind) in families {
            let detector = Detector::new(detector_kind)?;
            matchers.push(Matcher::new(matcher_kind, detector.descriptor_kind())?);
            reference.push(detector);
            input.push(Detector::new(detector_kind)?);
        }

        let summary = families
            .iter()
            .map(|(detector, matcher)| format!("{}/{}", detector, matcher))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(families = %summary, "match handler ready");

        Ok(Self {
            reference,
            input,
            matchers,
            accept_ratio: AcceptRatio::default(),
            has_reference: false,
        })
    }

    pub fn from_config(config: &MatchConfig) -> Result<Self> {
        Ok(Self::from_kinds(&config.families()?)?.with_accept_ratio(config.accept_ratio()))
    }

    pub fn with_accept_ratio(mut self, ratio: AcceptRatio) -> Self {
        self.accept_ratio = ratio;
        self
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn families(&self) -> Vec<(DetectorKind, MatcherKind)> {
        self.reference
            .iter()
            .zip(&self.matchers)
            .map(|(detector, matcher)| (detector.kind(), matcher.kind()))
            .collect()
    }

    pub fn accept_ratio(&self) -> AcceptRatio {
        self.accept_ratio
    }

    pub fn has_reference(&self) -> bool {
        self.has_reference
    }

    /// Detect features on the reference image for every family.
    pub fn set_ref_image(&mut self, image: &Mat) -> Result<()> {
        for detector in &mut self.reference {
            detector.detect_and_compute(image)?;
            tracing::info!(
                detector = detector.name(),
                keypoints = detector.features().len(),
                "reference features"
            );
        }
        self.has_reference = true;
        Ok(())
    }

    /// Detect features on `image` and match them against the reference.
    pub fn match_image(&mut self, image: &Mat) -> Result<()> {
        if !self.has_reference {
            tracing::warn!("matching without a reference image; results will be empty");
        }
        for detector in &mut self.input {
            detector.detect_and_compute(image)?;
        }

        let ratio = self.accept_ratio;
        for ((matcher, reference), input) in self
            .matchers
            .iter_mut()
            .zip(&self.reference)
            .zip(&self.input)
        {
            matcher.match_descriptors(
                &reference.features().descriptors,
                &input.features().descriptors,
                ratio,
            )?;
        }
        Ok(())
    }

    /// Shift the accept ratio by `delta`, clamped to `[0, 1]`. Takes effect on
    /// the next `match_image` for all families.
    pub fn change_accept_ratio(&mut self, delta: f32) -> AcceptRatio {
        self.accept_ratio = self.accept_ratio.adjusted(delta);
        tracing::info!(ratio = self.accept_ratio.value(), "accept ratio changed");
        self.accept_ratio
    }

    pub fn reference(&self, index: usize) -> Option<DetectResult<'_>> {
        self.reference.get(index).map(Detector::result)
    }

    pub fn input(&self, index: usize) -> Option<DetectResult<'_>> {
        self.input.get(index).map(Detector::result)
    }

    pub fn matches(&self, index: usize) -> Option<MatcherResult<'_>> {
        self.matchers.get(index).map(Matcher::result)
    }

    /// Matched `(input, reference)` keypoint positions of family `index`.
    pub fn correspondences(&self, index: usize) -> Vec<(Point2<f64>, Point2<f64>)> {
        match (self.input(index), self.reference(index), self.matches(index)) {
            (Some(input), Some(reference), Some(matches)) => {
                matches.correspondences(input.keypoints, reference.keypoints)
            }
            _ => Vec::new(),
        }
    }

    /// Render `input | reference` match images for every family, stacked top to
    /// bottom. Families that fail to render are logged and left out; when none
    /// render the returned `Mat` is empty.
    pub fn draw_match_result(&self, max_height: i32, policy: Downscale) -> Result<Mat> {
        let mut rendered = Vec::with_capacity(self.len());
        for index in 0..self.len() {
            let (Some(reference), Some(input), Some(matches)) =
                (self.reference(index), self.input(index), self.matches(index))
            else {
                continue;
            };
            match draw::draw_single_result(&reference, &input, &matches) {
                Ok(image) => rendered.push(image),
                Err(err) => {
                    tracing::warn!(family = input.name, error = %err, "skipping family in match view")
                }
            }
        }

        if rendered.is_empty() {
            return Ok(Mat::default());
        }
        let stacked = draw::stack_vertically(&rendered)?;
        tracing::debug!(
            families = rendered.len(),
            rows = stacked.rows(),
            cols = stacked.cols(),
            "stacked match view"
        );
        draw::downscale(stacked, max_height, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::textured_image;

    #[test]
    fn test_length_mismatch_is_rejected() {
        let result = MatchHandler::new(&["orb", "brisk"], &["bf"]);
        assert!(matches!(
            result,
            Err(MatchError::FamilyCountMismatch {
                features: 2,
                matchers: 1
            })
        ));
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert!(matches!(
            MatchHandler::new(&["orb", "harris"], &["bf", "bf"]),
            Err(MatchError::UnknownAlgorithm { kind: "detector", .. })
        ));
        assert!(matches!(
            MatchHandler::new(&["orb"], &["knn"]),
            Err(MatchError::UnknownAlgorithm { kind: "matcher", .. })
        ));
    }

    #[test]
    fn test_lockstep_construction() {
        let handler = MatchHandler::new(&["orb", "sift", "brisk"], &["bf", "flann", "flann"]).unwrap();
        assert_eq!(handler.len(), 3);
        assert_eq!(
            handler.families(),
            vec![
                (DetectorKind::Orb, MatcherKind::Bf),
                (DetectorKind::Sift, MatcherKind::Flann),
                (DetectorKind::Brisk, MatcherKind::Flann),
            ]
        );
        for index in 0..3 {
            assert!(handler.reference(index).unwrap().keypoints.is_empty());
            assert!(handler.input(index).unwrap().keypoints.is_empty());
            assert!(handler.matches(index).unwrap().matches.is_empty());
        }
        assert!(handler.reference(3).is_none());
        assert!(!handler.has_reference());
    }

    #[test]
    fn test_change_accept_ratio_clamps() {
        let mut handler = MatchHandler::new(&["orb"], &["bf"]).unwrap();
        assert_eq!(handler.accept_ratio().value(), 0.5);
        assert_eq!(handler.change_accept_ratio(10.0).value(), 1.0);
        assert_eq!(handler.change_accept_ratio(0.1).value(), 1.0);
        assert_eq!(handler.change_accept_ratio(-0.25).value(), 0.75);
        for _ in 0..10 {
            handler.change_accept_ratio(-0.3);
        }
        assert_eq!(handler.accept_ratio().value(), 0.0);
    }

    #[test]
    fn test_match_without_reference_is_empty() {
        let mut handler = MatchHandler::new(&["orb"], &["bf"]).unwrap();
        handler.match_image(&textured_image(240, 320)).unwrap();
        assert!(!handler.input(0).unwrap().keypoints.is_empty());
        assert!(handler.matches(0).unwrap().matches.is_empty());
    }

    #[test]
    fn test_ratio_change_affects_next_match() {
        let image = textured_image(240, 320);
        let mut handler = MatchHandler::new(&["orb"], &["bf"]).unwrap();
        handler.set_ref_image(&image).unwrap();
        handler.change_accept_ratio(1.0);
        handler.match_image(&image).unwrap();
        let total = handler.matches(0).unwrap().matches.len();
        assert!(total > 0);

        handler.change_accept_ratio(-0.75);
        // Stored matches only change on the next match call.
        assert_eq!(handler.matches(0).unwrap().matches.len(), total);
        handler.match_image(&image).unwrap();
        assert_eq!(handler.matches(0).unwrap().matches.len(), total / 4);
    }

    #[test]
    fn test_self_match_correspondences_coincide() {
        let image = textured_image(240, 320);
        let mut handler = MatchHandler::new(&["orb"], &["bf"]).unwrap();
        handler.set_ref_image(&image).unwrap();
        handler.match_image(&image).unwrap();

        let pairs = handler.correspondences(0);
        assert_eq!(pairs.len(), handler.matches(0).unwrap().matches.len());
        // Repeated texture can give identical descriptors at different places.
        let coincident = pairs.iter().filter(|(a, b)| (a - b).norm() < 1e-6).count();
        assert!(coincident * 10 >= pairs.len() * 9);
        assert!(handler.correspondences(5).is_empty());
    }

    #[test]
    fn test_draw_without_reference_skips_families() {
        let mut handler = MatchHandler::new(&["orb"], &["bf"]).unwrap();
        handler.match_image(&textured_image(240, 320)).unwrap();
        let view = handler.draw_match_result(1000, Downscale::Keep).unwrap();
        assert!(view.empty());
    }

    #[test]
    fn test_draw_skips_only_the_failing_family() {
        let image = textured_image(240, 320);
        let mut handler = MatchHandler::new(&["orb", "brisk"], &["bf", "bf"]).unwrap();
        handler.set_ref_image(&image).unwrap();
        handler.match_image(&image).unwrap();
        assert!(!handler.matches(1).unwrap().matches.is_empty());

        // A featureless reference leaves the stored BRISK matches pointing past
        // its keypoints.
        let flat = Mat::new_rows_cols_with_default(
            60,
            80,
            opencv::core::CV_8UC1,
            opencv::core::Scalar::all(0.0),
        )
        .unwrap();
        handler.reference[1].detect_and_compute(&flat).unwrap();
        assert!(handler.reference(1).unwrap().keypoints.is_empty());

        let view = handler.draw_match_result(10_000, Downscale::Keep).unwrap();
        assert_eq!(view.rows(), 240);
        assert_eq!(view.cols(), 2 * 320);
    }

    #[test]
    fn test_draw_stacks_families() {
        let image = textured_image(240, 320);
        let mut handler = MatchHandler::new(&["orb", "brisk"], &["bf", "bf"]).unwrap();
        handler.set_ref_image(&image).unwrap();
        handler.match_image(&image).unwrap();

        let view = handler.draw_match_result(10_000, Downscale::Keep).unwrap();
        assert_eq!(view.rows(), 2 * 240);
        assert_eq!(view.cols(), 2 * 320);

        let fitted = handler.draw_match_result(240, Downscale::FitHeight).unwrap();
        assert_eq!(fitted.rows(), 240);
        assert_eq!(fitted.cols(), 320);
    }
}
