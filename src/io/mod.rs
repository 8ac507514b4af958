pub mod source;

pub use source::{load_image, ImageSource, SourceSpec};
