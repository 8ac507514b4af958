pub mod features;
pub mod handler;
pub mod matcher;

pub use features::{DescriptorKind, DetectResult, Detector, DetectorKind, FeatureSet};
pub use handler::MatchHandler;
pub use matcher::{AcceptRatio, Matcher, MatcherKind, MatcherResult};
