use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nalgebra::Point2;
use opencv::prelude::*;
use opencv::{highgui, imgcodecs};
use tracing_subscriber::EnvFilter;

use rust_feature_match::io::{load_image, ImageSource};
use rust_feature_match::{MatchConfig, MatchHandler};

const WINDOW: &str = "feature matches";
const KEY_ESC: i32 = 27;

fn usage() {
    println!("Usage:");
    println!("  rust-feature-match <config.yaml>");
    println!("  rust-feature-match <reference_image> <inputs>");
    println!();
    println!("<inputs> is camera:N, a video file, a directory of images or one image.");
    println!("Keys: +/- change the accept ratio, r uses the current frame as reference, q quits.");
}

fn load_config() -> Result<Option<MatchConfig>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [path] => Ok(Some(
            MatchConfig::load(path).with_context(|| format!("Failed to load config {}", path))?,
        )),
        [reference, inputs] => Ok(Some(MatchConfig {
            reference: Some(PathBuf::from(reference)),
            inputs: Some(inputs.clone()),
            ..MatchConfig::default()
        })),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyAction {
    Quit,
    ChangeRatio(f32),
    ResetReference,
    Next,
}

fn key_action(key: i32, step: f32) -> KeyAction {
    match u8::try_from(key).map(char::from) {
        Ok('q') => KeyAction::Quit,
        Ok('+') | Ok('=') => KeyAction::ChangeRatio(step),
        Ok('-') | Ok('_') => KeyAction::ChangeRatio(-step),
        Ok('r') => KeyAction::ResetReference,
        _ if key == KEY_ESC => KeyAction::Quit,
        _ => KeyAction::Next,
    }
}

fn mean_displacement(pairs: &[(Point2<f64>, Point2<f64>)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total: f64 = pairs.iter().map(|(input, reference)| (input - reference).norm()).sum();
    Some(total / pairs.len() as f64)
}

fn log_frame(handler: &MatchHandler, frame_idx: usize) {
    for index in 0..handler.len() {
        let (Some(input), Some(matches)) = (handler.input(index), handler.matches(index)) else {
            continue;
        };
        let shift = mean_displacement(&handler.correspondences(index)).unwrap_or(0.0);
        tracing::info!(
            frame = frame_idx,
            family = input.name,
            matcher = matches.name,
            keypoints = input.keypoints.len(),
            matches = matches.matches.len(),
            mean_shift_px = shift,
            "matched frame"
        );
    }
}

fn write_view(dir: &Path, frame_idx: usize, view: &Mat) -> Result<()> {
    let path = dir.join(format!("match_{:05}.png", frame_idx));
    let path_str = path.to_str().context("output path is not valid UTF-8")?;
    if !imgcodecs::imwrite_def(path_str, view)? {
        bail!("OpenCV could not write {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(config) = load_config()? else {
        usage();
        return Ok(());
    };
    config.validate()?;

    let reference_path = config
        .reference
        .clone()
        .context("No reference image configured")?;
    let inputs = config.inputs.clone().context("No input source configured")?;

    let mut handler = MatchHandler::from_config(&config)?;
    let reference = load_image(&reference_path, config.grayscale)
        .with_context(|| format!("Failed to read reference {}", reference_path.display()))?;
    handler.set_ref_image(&reference)?;

    let mut source = ImageSource::open(&inputs, config.grayscale)
        .with_context(|| format!("Failed to open input source {}", inputs))?;

    match &config.output_dir {
        Some(dir) => fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?,
        None => highgui::named_window(WINDOW, highgui::WINDOW_AUTOSIZE)?,
    }

    let mut frame_idx = 0;
    'frames: while let Some(frame) = source.next_frame()? {
        loop {
            handler.match_image(&frame)?;
            log_frame(&handler, frame_idx);

            let view = handler.draw_match_result(config.max_height, config.downscale)?;
            if view.empty() {
                tracing::warn!(frame = frame_idx, "nothing to show for this frame");
            }

            if let Some(dir) = &config.output_dir {
                if !view.empty() {
                    write_view(dir, frame_idx, &view)?;
                }
                break;
            }

            if !view.empty() {
                highgui::imshow(WINDOW, &view)?;
            }
            // Step through still images one key press at a time; poll live video.
            let key = highgui::wait_key(if source.is_live() { 1 } else { 0 })?;
            match key_action(key, config.accept_step) {
                KeyAction::Quit => break 'frames,
                KeyAction::ChangeRatio(delta) => {
                    handler.change_accept_ratio(delta);
                    // Redraw a still image with the new ratio before moving on.
                    if !source.is_live() {
                        continue;
                    }
                }
                KeyAction::ResetReference => {
                    tracing::info!(frame = frame_idx, "using current frame as reference");
                    handler.set_ref_image(&frame)?;
                }
                KeyAction::Next => {}
            }
            break;
        }
        frame_idx += 1;
    }

    println!("Done! Processed {} frames", frame_idx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_actions() {
        assert_eq!(key_action(i32::from(b'q'), 0.05), KeyAction::Quit);
        assert_eq!(key_action(KEY_ESC, 0.05), KeyAction::Quit);
        assert_eq!(key_action(i32::from(b'+'), 0.05), KeyAction::ChangeRatio(0.05));
        assert_eq!(key_action(i32::from(b'='), 0.05), KeyAction::ChangeRatio(0.05));
        assert_eq!(key_action(i32::from(b'-'), 0.1), KeyAction::ChangeRatio(-0.1));
        assert_eq!(key_action(i32::from(b'r'), 0.05), KeyAction::ResetReference);
        assert_eq!(key_action(i32::from(b' '), 0.05), KeyAction::Next);
        // wait_key times out with -1 on live sources.
        assert_eq!(key_action(-1, 0.05), KeyAction::Next);
    }

    #[test]
    fn test_mean_displacement() {
        assert_eq!(mean_displacement(&[]), None);
        let pairs = [
            (Point2::new(0.0, 0.0), Point2::new(3.0, 4.0)),
            (Point2::new(1.0, 1.0), Point2::new(1.0, 2.0)),
        ];
        assert_eq!(mean_displacement(&pairs), Some(3.0));
    }
}
