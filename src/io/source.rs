use std::fs;
use std::path::{Path, PathBuf};

use opencv::core::{AlgorithmHint, Mat};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc, videoio};

use crate::error::{MatchError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "pgm", "ppm", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "m4v"];

/// Where input frames come from, as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// `camera:N`
    Camera(i32),
    Directory(PathBuf),
    Video(PathBuf),
    Image(PathBuf),
}

impl SourceSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(index) = spec.strip_prefix("camera:") {
            let index = index
                .trim()
                .parse()
                .map_err(|_| MatchError::Source(format!("invalid camera index in `{}`", spec)))?;
            return Ok(SourceSpec::Camera(index));
        }

        let path = PathBuf::from(spec);
        if path.is_dir() {
            Ok(SourceSpec::Directory(path))
        } else if has_extension(&path, VIDEO_EXTENSIONS) {
            Ok(SourceSpec::Video(path))
        } else {
            Ok(SourceSpec::Image(path))
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| MatchError::Source(format!("non UTF-8 path {:?}", path)))
}

/// Read an image from disk, optionally as single-channel grayscale.
pub fn load_image(path: &Path, grayscale: bool) -> Result<Mat> {
    let flags = if grayscale {
        imgcodecs::IMREAD_GRAYSCALE
    } else {
        imgcodecs::IMREAD_COLOR
    };
    let image = imgcodecs::imread(path_str(path)?, flags)?;
    if image.empty() {
        return Err(MatchError::ImageRead(path.to_path_buf()));
    }
    Ok(image)
}

/// Image files of a directory, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, IMAGE_EXTENSIONS) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// A finite list of image files or a live/recorded video stream.
pub enum ImageSource {
    Files {
        paths: Vec<PathBuf>,
        next: usize,
        grayscale: bool,
    },
    Capture {
        capture: videoio::VideoCapture,
        live: bool,
        grayscale: bool,
    },
}

impl ImageSource {
    pub fn open(spec: &str, grayscale: bool) -> Result<Self> {
        match SourceSpec::parse(spec)? {
            SourceSpec::Camera(index) => {
                let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
                Self::from_capture(capture, true, grayscale, spec)
            }
            SourceSpec::Video(path) => {
                let capture = videoio::VideoCapture::from_file(path_str(&path)?, videoio::CAP_ANY)?;
                Self::from_capture(capture, false, grayscale, spec)
            }
            SourceSpec::Directory(dir) => {
                let paths = list_images(&dir)?;
                if paths.is_empty() {
                    return Err(MatchError::Source(format!("no images in {}", dir.display())));
                }
                Ok(Self::from_files(paths, grayscale))
            }
            SourceSpec::Image(path) => Ok(Self::from_files(vec![path], grayscale)),
        }
    }

    pub fn from_files(paths: Vec<PathBuf>, grayscale: bool) -> Self {
        tracing::info!(frames = paths.len(), "reading input images from files");
        ImageSource::Files {
            paths,
            next: 0,
            grayscale,
        }
    }

    fn from_capture(
        capture: videoio::VideoCapture,
        live: bool,
        grayscale: bool,
        spec: &str,
    ) -> Result<Self> {
        if !videoio::VideoCapture::is_opened(&capture)? {
            return Err(MatchError::Source(format!("could not open `{}`", spec)));
        }
        tracing::info!(source = spec, live, "reading input frames from capture");
        Ok(ImageSource::Capture {
            capture,
            live,
            grayscale,
        })
    }

    /// Live sources should be polled rather than stepped frame by frame.
    pub fn is_live(&self) -> bool {
        matches!(self, ImageSource::Capture { live: true, .. })
    }

    /// Next frame, or `None` once the source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Mat>> {
        match self {
            ImageSource::Files {
                paths,
                next,
                grayscale,
            } => {
                let Some(path) = paths.get(*next) else {
                    return Ok(None);
                };
                *next += 1;
                load_image(path, *grayscale).map(Some)
            }
            ImageSource::Capture {
                capture,
                grayscale,
                ..
            } => {
                let mut frame = Mat::default();
                if !capture.read(&mut frame)? || frame.empty() {
                    return Ok(None);
                }
                if !*grayscale || frame.channels() == 1 {
                    return Ok(Some(frame));
                }
                let mut gray = Mat::default();
                imgproc::cvt_color(
                    &frame,
                    &mut gray,
                    imgproc::COLOR_BGR2GRAY,
                    0,
                    AlgorithmHint::ALGO_HINT_DEFAULT,
                )?;
                Ok(Some(gray))
            }
        }
    }
}
