//! Source image loading.

use std::path::Path;

use image::imageops::FilterType;
use tracing::info;

use flut_core::{Dimensions, FlutError, PixelBuffer};

/// Decode the image at `path` and resize it to exactly `dims`.
pub fn load(path: &Path, dims: Dimensions) -> Result<PixelBuffer, FlutError> {
    let image_err = |reason: String| FlutError::ImageLoad {
        path: path.display().to_string(),
        reason,
    };

    let decoded = image::open(path).map_err(|e| image_err(e.to_string()))?;
    info!(
        "loaded {} ({}x{}), resizing to {dims}",
        path.display(),
        decoded.width(),
        decoded.height()
    );

    let rgba = decoded
        .resize_exact(dims.width, dims.height, FilterType::Triangle)
        .into_rgba8();
    PixelBuffer::from_rgba(rgba.width(), rgba.height(), rgba.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flut_core::Color;
    use image::{Rgba, RgbaImage};

    fn temp_png(name: &str, img: &RgbaImage) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("flut-{}-{name}.png", std::process::id()));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn resizes_to_target() {
        let img = RgbaImage::from_pixel(10, 6, Rgba([1, 2, 3, 255]));
        let path = temp_png("resize", &img);

        let buf = load(&path, "4:3".parse().unwrap()).unwrap();
        assert_eq!((buf.width(), buf.height()), (4, 3));
        assert_eq!(buf.pixel(3, 2), Some(Color::new(1, 2, 3, 255)));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn same_size_keeps_pixels() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(1, 0, Rgba([0xde, 0xad, 0xbe, 0x7f]));
        let path = temp_png("identity", &img);

        let buf = load(&path, "2:2".parse().unwrap()).unwrap();
        assert_eq!(buf.pixel(1, 0), Some(Color::new(0xde, 0xad, 0xbe, 0x7f)));
        assert_eq!(buf.pixel(0, 0), Some(Color::new(0, 0, 0, 0)));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_is_image_load_error() {
        let err = load(Path::new("/nonexistent/flut.png"), "4:4".parse().unwrap()).unwrap_err();
        assert!(matches!(err, FlutError::ImageLoad { .. }));
        assert!(err.to_string().contains("/nonexistent/flut.png"));
    }
}
