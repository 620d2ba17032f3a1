use crate::config::ImageConfig;
use crate::core::fingerprint::{DecodeError, Fingerprint, FingerprintService};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, imageops::FilterType};

/// Downscaled JPEG ready to be sent to a vision provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

impl ImagePayload {
    pub const MIME_TYPE: &'static str = "image/jpeg";

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", Self::MIME_TYPE, self.base64)
    }

    /// Split a `data:<mime>;base64,<data>` URL into its mime type and payload.
    pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
        let rest = url.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        let mime = meta.strip_suffix(";base64")?;
        Some((mime, data))
    }
}

/// Everything the orchestrator needs from one decoded upload.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub fingerprint: Fingerprint,
    pub payload: ImagePayload,
}

/// Decodes an upload once, then derives both its fingerprint and its
/// normalized transmission payload.
pub struct ImageService {
    max_width: u32,
    quality: u8,
    fingerprints: FingerprintService,
}

impl ImageService {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            max_width: config.max_width.max(1),
            quality: config.jpeg_quality.clamp(1, 100),
            fingerprints: FingerprintService::new(),
        }
    }

    pub fn prepare(&self, bytes: &[u8]) -> Result<PreparedImage, DecodeError> {
        let img = image::load_from_memory(bytes)?;
        let fingerprint = self.fingerprints.fingerprint(&img)?;
        let payload = self.normalize(&img)?;
        Ok(PreparedImage {
            fingerprint,
            payload,
        })
    }

    /// Downscale to at most `max_width` (aspect ratio kept) and re-encode as JPEG.
    pub fn normalize(&self, img: &DynamicImage) -> Result<ImagePayload, DecodeError> {
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty);
        }

        let resized = if width > self.max_width {
            let ratio = self.max_width as f32 / width as f32;
            let new_height = ((height as f32 * ratio) as u32).max(1);
            img.resize_exact(self.max_width, new_height, FilterType::Triangle)
        } else {
            img.clone()
        };

        let rgb = resized.to_rgb8();
        let mut buffer = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, self.quality);
        rgb.write_with_encoder(encoder)?;

        Ok(ImagePayload {
            base64: STANDARD.encode(&buffer),
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::tests::encode_png;

    fn service() -> ImageService {
        ImageService::new(&ImageConfig::default())
    }

    #[test]
    fn test_wide_image_is_downscaled() {
        let bytes = encode_png(1600, 1200, |x, y| ((x + y) % 256) as u8);
        let prepared = service().prepare(&bytes).unwrap();

        assert_eq!(prepared.payload.width, 800);
        assert_eq!(prepared.payload.height, 600);
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let bytes = encode_png(320, 200, |x, _| (x % 256) as u8);
        let prepared = service().prepare(&bytes).unwrap();

        assert_eq!(prepared.payload.width, 320);
        assert_eq!(prepared.payload.height, 200);
    }

    #[test]
    fn test_payload_is_a_decodable_jpeg() {
        let bytes = encode_png(900, 300, |x, _| (x % 256) as u8);
        let payload = service().prepare(&bytes).unwrap().payload;

        let url = payload.data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));

        let raw = STANDARD.decode(&payload.base64).unwrap();
        let decoded = image::load_from_memory(&raw).unwrap();
        assert_eq!(decoded.width(), 800);
    }

    #[test]
    fn test_split_data_url() {
        let (mime, data) = ImagePayload::split_data_url("data:image/png;base64,AAAA").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "AAAA");
        assert!(ImagePayload::split_data_url("https://example.com/a.png").is_none());
    }

    #[test]
    fn test_undecodable_bytes() {
        assert!(service().prepare(b"\x00\x01\x02").is_err());
    }
}
