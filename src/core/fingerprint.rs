use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Side length of the luminance grid; 8×8 cells give a 64-bit fingerprint.
pub const GRID_SIZE: u32 = 8;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image could not be decoded: {0}")]
    Image(#[from] image::ImageError),

    #[error("Image has no pixels")]
    Empty,
}

/// Mean-luminance fingerprint, the 8×8 mean hash packed into a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Number of differing bit positions.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Similarity as a percentage of matching bits.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        let total = (GRID_SIZE * GRID_SIZE) as f64;
        (total - self.distance(other) as f64) / total * 100.0
    }

    pub fn to_bit_string(&self) -> String {
        format!("{:064b}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes perceptual fingerprints for decoded images.
pub struct FingerprintService {
    hasher: Hasher,
}

impl FingerprintService {
    pub fn new() -> Self {
        Self {
            hasher: HasherConfig::new()
                .hash_alg(HashAlg::Mean)
                .hash_size(GRID_SIZE, GRID_SIZE)
                .to_hasher(),
        }
    }

    /// Decode raw bytes and fingerprint the result.
    pub fn fingerprint_bytes(&self, bytes: &[u8]) -> Result<Fingerprint, DecodeError> {
        let img = image::load_from_memory(bytes)?;
        self.fingerprint(&img)
    }

    pub fn fingerprint(&self, img: &DynamicImage) -> Result<Fingerprint, DecodeError> {
        if img.width() == 0 || img.height() == 0 {
            return Err(DecodeError::Empty);
        }

        let hash = self.hasher.hash_image(img);
        let bits = hash
            .as_bytes()
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte));

        Ok(Fingerprint(bits))
    }

    /// Fingerprint every buffer of a batch in parallel. Order is preserved and
    /// a decode failure only affects its own slot.
    pub fn fingerprint_batch(&self, buffers: &[&[u8]]) -> Vec<Result<Fingerprint, DecodeError>> {
        buffers
            .par_iter()
            .map(|bytes| self.fingerprint_bytes(bytes))
            .collect()
    }
}

impl Default for FingerprintService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    pub(crate) fn encode_png(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let v = f(x, y);
            Rgb([v, v, v])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_same_bytes_same_fingerprint() {
        let bytes = encode_png(64, 48, |x, y| ((x * 3 + y * 5) % 256) as u8);
        let service = FingerprintService::new();

        let a = service.fingerprint_bytes(&bytes).unwrap();
        let b = service.fingerprint_bytes(&bytes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_half_split_sets_half_the_bits() {
        let bytes = encode_png(80, 80, |x, _| if x < 40 { 10 } else { 240 });
        let fp = FingerprintService::new().fingerprint_bytes(&bytes).unwrap();

        assert_eq!(fp.bits().count_ones(), 32);
        assert_eq!(fp.to_bit_string().len(), 64);
    }

    #[test]
    fn test_orientation_changes_fingerprint() {
        let vertical = encode_png(64, 64, |x, _| if x < 32 { 10 } else { 240 });
        let horizontal = encode_png(64, 64, |_, y| if y < 32 { 10 } else { 240 });
        let service = FingerprintService::new();

        let a = service.fingerprint_bytes(&vertical).unwrap();
        let b = service.fingerprint_bytes(&horizontal).unwrap();
        assert_eq!(a.distance(&b), 32);
    }

    #[test]
    fn test_resolution_invariance() {
        let small = encode_png(32, 32, |_, y| if y < 16 { 0 } else { 255 });
        let large = encode_png(256, 256, |_, y| if y < 128 { 0 } else { 255 });
        let service = FingerprintService::new();

        let a = service.fingerprint_bytes(&small).unwrap();
        let b = service.fingerprint_bytes(&large).unwrap();
        assert_eq!(a.distance(&b), 0);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let result = FingerprintService::new().fingerprint_bytes(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Fingerprint::from_bits(0xF0F0_0000_1234_5678);
        let b = Fingerprint::from_bits(0x0FF0_1000_1234_0000);
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), 0);
    }

    #[test]
    fn test_similarity_percentage() {
        let a = Fingerprint::from_bits(0);
        let b = Fingerprint::from_bits(0b1111);
        assert_eq!(a.similarity(&b), 93.75);
    }

    #[test]
    fn test_batch_keeps_order_and_isolates_failures() {
        let good = encode_png(16, 16, |x, _| (x * 16) as u8);
        let bad = b"nope".to_vec();
        let service = FingerprintService::new();

        let results = service.fingerprint_batch(&[&good, &bad, &good]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(
            results[0].as_ref().unwrap(),
            results[2].as_ref().unwrap()
        );
    }
}
