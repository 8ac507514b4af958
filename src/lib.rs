pub mod config;
pub mod error;
pub mod frontend;
pub mod io;
pub mod viz;

#[cfg(test)]
mod testing;

pub use config::MatchConfig;
pub use error::{MatchError, Result};
pub use frontend::{AcceptRatio, DescriptorKind, DetectorKind, MatchHandler, MatcherKind};
pub use viz::Downscale;
