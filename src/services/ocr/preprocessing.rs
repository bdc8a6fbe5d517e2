use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;

/// Sharpening kernel applied to every normalized frame before region crops.
const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Sharpen a frame with a 3x3 convolution.
pub fn sharpen(image: &DynamicImage) -> DynamicImage {
    let rgba = image.to_rgba8();
    DynamicImage::ImageRgba8(image::imageops::filter3x3(&rgba, &SHARPEN_KERNEL))
}

/// Upscale by `factor` with a high-quality filter. Recognition accuracy on
/// small UI text improves markedly with 2-4x upscaling.
pub fn scale(image: &DynamicImage, factor: f64) -> DynamicImage {
    let width = (image.width() as f64 * factor).round().max(1.0) as u32;
    let height = (image.height() as f64 * factor).round().max(1.0) as u32;
    image.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
}

/// Binarize with an automatic Otsu threshold.
///
/// With `invert` false the output is white where the source exceeds the
/// threshold; with `invert` true the polarity flips.
pub fn otsu_binarize(gray: &GrayImage, invert: bool) -> GrayImage {
    let threshold = otsu_level(gray);
    let (on, off) = if invert { (0u8, 255u8) } else { (255u8, 0u8) };
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([on])
        } else {
            Luma([off])
        }
    })
}

/// Erode the bright regions of a grayscale image. Thin noise strokes vanish
/// while multi-pixel glyph bodies survive.
pub fn erode_gray(gray: &GrayImage, iterations: u8) -> GrayImage {
    let mut result = gray.clone();
    for _ in 0..iterations {
        result = erode(&result, Norm::L1, 1);
    }
    result
}

/// Pad with a solid border. Recognition engines do measurably better on
/// isolated glyphs surrounded by quiet margin.
pub fn pad_border(gray: &GrayImage, top: u32, bottom: u32, left: u32, right: u32, value: u8) -> GrayImage {
    let width = gray.width() + left + right;
    let height = gray.height() + top + bottom;
    ImageBuffer::from_fn(width, height, |x, y| {
        if x >= left && x < left + gray.width() && y >= top && y < top + gray.height() {
            *gray.get_pixel(x - left, y - top)
        } else {
            Luma([value])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn gradient_gray(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x + y) * 4 % 256) as u8]))
    }

    #[test]
    fn test_scale_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 20, image::Rgb([128, 128, 128])));
        let scaled = scale(&img, 2.0);
        assert_eq!((scaled.width(), scaled.height()), (100, 40));

        let scaled = scale(&img, 4.0);
        assert_eq!((scaled.width(), scaled.height()), (200, 80));
    }

    #[test]
    fn test_sharpen_preserves_dimensions() {
        let img = DynamicImage::ImageLuma8(gradient_gray(40, 30));
        let sharpened = sharpen(&img);
        assert_eq!((sharpened.width(), sharpened.height()), (40, 30));
    }

    #[test]
    fn test_otsu_binarize_is_binary() {
        let binary = otsu_binarize(&gradient_gray(32, 32), false);
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_otsu_binarize_polarity() {
        let gray = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 10 } else { 240 }]));
        let normal = otsu_binarize(&gray, false);
        let inverted = otsu_binarize(&gray, true);

        // The bright half is on in one polarity and off in the other.
        assert_eq!(normal.get_pixel(12, 8)[0], 255);
        assert_eq!(inverted.get_pixel(12, 8)[0], 0);
        assert_eq!(normal.get_pixel(2, 8)[0], 0);
        assert_eq!(inverted.get_pixel(2, 8)[0], 255);
    }

    #[test]
    fn test_pad_border_geometry() {
        let gray = GrayImage::from_pixel(10, 5, Luma([77u8]));
        let padded = pad_border(&gray, 10, 10, 15, 15, 255);

        assert_eq!((padded.width(), padded.height()), (40, 25));
        assert_eq!(padded.get_pixel(0, 0)[0], 255);
        assert_eq!(padded.get_pixel(15, 10)[0], 77);
        assert_eq!(padded.get_pixel(39, 24)[0], 255);
    }

    #[test]
    fn test_erode_removes_thin_strokes() {
        // A single-pixel-wide bright line on black.
        let gray = GrayImage::from_fn(16, 16, |x, _| Luma([if x == 8 { 255 } else { 0 }]));
        let eroded = erode_gray(&gray, 1);
        assert!(eroded.pixels().all(|p| p[0] == 0), "thin line should be erased");
    }
}
