//! Frame transform implementations.
//!
//! Each transform consumes an upstream frame and produces an output frame
//! with identical pts and time base. Pixel buffers are BGR24; the 3-channel
//! image container's channel labels are immaterial to the math applied here.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::adaptive_threshold;
use imageproc::edges::canny;
use imageproc::filter::{bilateral_filter, median_filter};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

use super::TransformMode;
use crate::error::{AppError, Result};
use crate::media::frame::VideoFrame;

const CANNY_LOW: f32 = 100.0;
const CANNY_HIGH: f32 = 200.0;
const BILATERAL_PASSES: usize = 6;
const BILATERAL_WINDOW: u32 = 9;
const BILATERAL_SIGMA_COLOR: f32 = 9.0;
const BILATERAL_SIGMA_SPATIAL: f32 = 7.0;
const MEDIAN_RADIUS: u32 = 3;
const THRESHOLD_BLOCK_RADIUS: u32 = 4;
const ROTATE_DEGREES_PER_SECOND: f64 = 45.0;

/// Apply `mode` to `frame`, preserving pts and time base.
pub fn apply(mode: TransformMode, frame: VideoFrame) -> Result<VideoFrame> {
    match mode {
        TransformMode::None => Ok(frame),
        TransformMode::Edges => edges(frame),
        TransformMode::Cartoon => cartoon(frame),
        TransformMode::Rotate => rotate(frame),
    }
}

fn to_image(frame: &VideoFrame) -> Result<RgbImage> {
    RgbImage::from_raw(frame.width, frame.height, frame.data().to_vec()).ok_or_else(|| {
        AppError::Transform(format!(
            "frame buffer is {} bytes, expected {} for {}x{}",
            frame.len(),
            frame.width as usize * frame.height as usize * 3,
            frame.width,
            frame.height
        ))
    })
}

fn rebuild(img: RgbImage, src: &VideoFrame) -> VideoFrame {
    let (width, height) = img.dimensions();
    VideoFrame::from_vec(img.into_raw(), width, height, src.pts, src.time_base)
}

fn expand_gray(gray: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(gray.width(), gray.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let v = gray.get_pixel(x, y)[0];
        *pixel = Rgb([v, v, v]);
    }
    out
}

/// Edge detection, expanded back to a 3-channel frame.
fn edges(frame: VideoFrame) -> Result<VideoFrame> {
    let img = to_image(&frame)?;
    let edges = canny(&imageops::grayscale(&img), CANNY_LOW, CANNY_HIGH);
    Ok(rebuild(expand_gray(&edges), &frame))
}

fn bilateral_3ch(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut channels = [GrayImage::new(w, h), GrayImage::new(w, h), GrayImage::new(w, h)];
    for (x, y, pixel) in img.enumerate_pixels() {
        for (c, channel) in channels.iter_mut().enumerate() {
            channel.put_pixel(x, y, Luma([pixel[c]]));
        }
    }

    let filtered: Vec<GrayImage> = channels
        .iter()
        .map(|channel| {
            bilateral_filter(
                channel,
                BILATERAL_WINDOW,
                BILATERAL_SIGMA_COLOR,
                BILATERAL_SIGMA_SPATIAL,
            )
        })
        .collect();

    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        *pixel = Rgb([
            filtered[0].get_pixel(x, y)[0],
            filtered[1].get_pixel(x, y)[0],
            filtered[2].get_pixel(x, y)[0],
        ]);
    }
    out
}

/// Two-stage cartoon pipeline: color smoothing at reduced resolution,
/// masked by an adaptive-threshold edge map.
fn cartoon(frame: VideoFrame) -> Result<VideoFrame> {
    let img = to_image(&frame)?;
    let (w, h) = img.dimensions();
    let (half_w, half_h) = ((w / 2).max(1), (h / 2).max(1));
    let (quarter_w, quarter_h) = ((w / 4).max(1), (h / 4).max(1));

    // Color: smooth at quarter resolution for throughput, then restore.
    let mut color = imageops::resize(&img, half_w, half_h, FilterType::Gaussian);
    color = imageops::resize(&color, quarter_w, quarter_h, FilterType::Gaussian);
    for _ in 0..BILATERAL_PASSES {
        color = bilateral_3ch(&color);
    }
    color = imageops::resize(&color, half_w, half_h, FilterType::Gaussian);
    color = imageops::resize(&color, w, h, FilterType::Gaussian);

    // Edge mask: grayscale, median blur, adaptive threshold.
    let gray = imageops::grayscale(&img);
    let blurred = median_filter(&gray, MEDIAN_RADIUS, MEDIAN_RADIUS);
    let mask = adaptive_threshold(&blurred, THRESHOLD_BLOCK_RADIUS);

    // Combine: bitwise AND of smoothed color and the 3-channel mask.
    let mut out = color;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let m = mask.get_pixel(x, y)[0];
        *pixel = Rgb([pixel[0] & m, pixel[1] & m, pixel[2] & m]);
    }
    Ok(rebuild(out, &frame))
}

/// Progressive rotation about the frame center. The angle tracks elapsed
/// presentation time and is deliberately unbounded past 360 degrees;
/// content leaving the frame is clipped.
fn rotate(frame: VideoFrame) -> Result<VideoFrame> {
    let theta = (frame.time() * ROTATE_DEGREES_PER_SECOND).to_radians() as f32;
    if theta == 0.0 {
        // Zero rotation is the identity.
        return Ok(frame);
    }
    let img = to_image(&frame)?;
    let rotated = rotate_about_center(&img, theta, Interpolation::Bilinear, Rgb([0, 0, 0]));
    Ok(rebuild(rotated, &frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::TimeBase;

    fn gradient_frame(width: u32, height: u32, pts: i64) -> VideoFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x * 16) as u8);
                data.push((y * 16) as u8);
                data.push(((x + y) * 8) as u8);
            }
        }
        VideoFrame::from_vec(data, width, height, pts, TimeBase::new(1, 30))
    }

    #[test]
    fn none_is_passthrough() {
        let frame = gradient_frame(8, 8, 5);
        let out = apply(TransformMode::None, frame.clone()).unwrap();
        assert_eq!(out.data(), frame.data());
        assert_eq!(out.pts, frame.pts);
    }

    #[test]
    fn edges_preserves_dimensions_and_timing() {
        let frame = gradient_frame(16, 16, 7);
        let out = apply(TransformMode::Edges, frame.clone()).unwrap();
        assert_eq!((out.width, out.height), (16, 16));
        assert_eq!(out.pts, 7);
        assert_eq!(out.time_base, frame.time_base);
        // Every output pixel is gray (all three channels equal).
        for px in out.data().chunks_exact(3) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
    }

    #[test]
    fn cartoon_preserves_dimensions_and_timing() {
        let frame = gradient_frame(16, 12, 3);
        let out = apply(TransformMode::Cartoon, frame.clone()).unwrap();
        assert_eq!((out.width, out.height), (16, 12));
        assert_eq!(out.pts, 3);
        assert_eq!(out.len(), frame.len());
    }

    #[test]
    fn rotate_at_time_zero_is_identity() {
        let frame = gradient_frame(16, 16, 0);
        let out = apply(TransformMode::Rotate, frame.clone()).unwrap();
        assert_eq!(out.data(), frame.data());
    }

    #[test]
    fn rotate_changes_pixels_at_later_time() {
        // pts 15 at 1/30 -> 0.5s -> 22.5 degrees.
        let frame = gradient_frame(16, 16, 15);
        let out = apply(TransformMode::Rotate, frame.clone()).unwrap();
        assert_eq!(out.len(), frame.len());
        assert_ne!(out.data(), frame.data());
    }

    #[test]
    fn truncated_buffer_is_a_fatal_transform_error() {
        let frame = VideoFrame::from_vec(vec![0; 5], 4, 4, 0, TimeBase::new(1, 30));
        assert!(apply(TransformMode::Edges, frame).is_err());
    }
}
