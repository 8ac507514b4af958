use opencv::core::{Mat, Point, Rect, Scalar, CV_8UC1};
use opencv::imgproc;
use opencv::prelude::*;

/// Deterministic grayscale image full of corners and blobs for detector tests.
pub fn textured_image(rows: i32, cols: i32) -> Mat {
    let mut image =
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC1, Scalar::all(20.0)).unwrap();
    let mut seed: u32 = 0x2545_f491;
    let mut next = |bound: i32| {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        ((seed >> 8) % bound.max(1) as u32) as i32
    };

    for i in 0..80 {
        let w = 8 + next(28);
        let h = 8 + next(28);
        let x = next(cols - w);
        let y = next(rows - h);
        let shade = Scalar::all(60.0 + next(190) as f64);
        if i % 3 == 0 {
            let center = Point::new(x + w / 2, y + h / 2);
            imgproc::circle(&mut image, center, w.min(h) / 2, shade, -1, imgproc::LINE_8, 0)
                .unwrap();
        } else {
            imgproc::rectangle(&mut image, Rect::new(x, y, w, h), shade, -1, imgproc::LINE_8, 0)
                .unwrap();
        }
    }
    image
}
