use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, MatchError>;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Name outside the fixed detector/matcher enumeration.
    #[error("unknown {kind} algorithm `{name}` (expected one of: {expected})")]
    UnknownAlgorithm {
        kind: &'static str,
        name: String,
        expected: &'static str,
    },

    #[error("algorithm `{0}` is not available in this build (enable the `nonfree` feature)")]
    AlgorithmUnavailable(&'static str),

    #[error("{features} feature families configured but {matchers} matchers")]
    FamilyCountMismatch { features: usize, matchers: usize },

    #[error("descriptor matrix is empty")]
    EmptyDescriptors,

    #[error(
        "descriptor layouts differ: reference {ref_cols} cols (type {ref_type}), input {input_cols} cols (type {input_type})"
    )]
    DescriptorMismatch {
        ref_cols: i32,
        ref_type: i32,
        input_cols: i32,
        input_type: i32,
    },

    #[error("failed to render matches for `{family}`: {reason}")]
    Rendering { family: String, reason: String },

    #[error("could not read image {0:?}")]
    ImageRead(PathBuf),

    #[error("image source error: {0}")]
    Source(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}
