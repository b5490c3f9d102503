// encode.rs — Turns a captured tab (PNG data URL) into the payload sent to
// the vision backend: decode, downscale wide captures, JPEG-encode,
// base64-encode without the data URL prefix.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GenericImageView};

/// Error type for image preparation
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Not a base64 data URL")]
    InvalidDataUrl,
    #[error("Bad base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// A parsed `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime: &'a str,
    /// Base64 text, still encoded.
    pub payload: &'a str,
}

impl<'a> DataUrl<'a> {
    pub fn parse(url: &'a str) -> Result<Self, CaptureError> {
        let rest = url.strip_prefix("data:").ok_or(CaptureError::InvalidDataUrl)?;
        let (meta, payload) = rest.split_once(',').ok_or(CaptureError::InvalidDataUrl)?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or(CaptureError::InvalidDataUrl)?;
        Ok(Self { mime, payload })
    }

    pub fn decode(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(BASE64.decode(self.payload)?)
    }
}

/// Bare base64 for a value that may or may not carry a data URL prefix.
pub fn strip_data_url(value: &str) -> &str {
    match DataUrl::parse(value) {
        Ok(url) => url.payload,
        Err(_) => value,
    }
}

/// Upload settings for captured images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Images wider than this are downscaled, keeping the aspect ratio.
    pub max_width: u32,
    /// JPEG compression quality (1–100).
    pub jpeg_quality: u8,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_width: 1280,
            jpeg_quality: 80,
        }
    }
}

/// Prepare a captured data URL for the backend: bare base64 JPEG,
/// no wider than `opts.max_width`.
pub fn prepare_for_upload(data_url: &str, opts: UploadOptions) -> Result<String, CaptureError> {
    let bytes = DataUrl::parse(data_url)?.decode()?;
    let img = image::load_from_memory(&bytes)?;
    let img = downscale(img, opts.max_width);
    let (w, h) = img.dimensions();

    let mut jpeg_buf: Vec<u8> = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg_buf, opts.jpeg_quality.clamp(1, 100)).encode(
        img.to_rgb8().as_raw(),
        w,
        h,
        image::ExtendedColorType::Rgb8,
    )?;

    log::debug!(
        "Prepared capture for upload: {}x{} -> {} bytes JPEG",
        w,
        h,
        jpeg_buf.len()
    );
    Ok(BASE64.encode(&jpeg_buf))
}

fn downscale(img: DynamicImage, max_width: u32) -> DynamicImage {
    if max_width == 0 || img.width() <= max_width {
        return img;
    }
    let ratio = max_width as f64 / img.width() as f64;
    let new_h = ((img.height() as f64 * ratio).round() as u32).max(1);
    img.resize_exact(max_width, new_h, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn png_data_url(w: u32, h: u32) -> String {
        let mut img = RgbaImage::new(w, h);
        for (x, _y, pixel) in img.enumerate_pixels_mut() {
            *pixel = if x < w / 2 {
                image::Rgba([0, 0, 0, 255])
            } else {
                image::Rgba([255, 255, 255, 255])
            };
        }
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", BASE64.encode(buf.into_inner()))
    }

    #[test]
    fn parse_data_url() {
        let url = DataUrl::parse("data:image/png;base64,QUJD").unwrap();
        assert_eq!(url.mime, "image/png");
        assert_eq!(url.payload, "QUJD");
        assert_eq!(url.decode().unwrap(), b"ABC");
    }

    #[test]
    fn parse_rejects_plain_text() {
        assert!(DataUrl::parse("QUJD").is_err());
        assert!(DataUrl::parse("data:text/plain,hello").is_err());
    }

    #[test]
    fn strip_data_url_passes_bare_base64_through() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
    }

    #[test]
    fn wide_capture_is_downscaled_to_jpeg() {
        let url = png_data_url(200, 100);
        let out = prepare_for_upload(
            &url,
            UploadOptions {
                max_width: 50,
                jpeg_quality: 75,
            },
        )
        .unwrap();

        let bytes = BASE64.decode(out).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.dimensions(), (50, 25));
    }

    #[test]
    fn narrow_capture_keeps_size() {
        let url = png_data_url(40, 30);
        let out = prepare_for_upload(&url, UploadOptions::default()).unwrap();
        let img = image::load_from_memory(&BASE64.decode(out).unwrap()).unwrap();
        assert_eq!(img.dimensions(), (40, 30));
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(prepare_for_upload("data:image/png;base64,@@@", UploadOptions::default()).is_err());
    }
}
