// SPDX-License-Identifier: GPL-3.0-only

//! 3-D color lookup tables
//!
//! Content ships tables as strip images: `N` tiles of `N x N` laid side by
//! side, so the image is `N²` wide and `N` high. Texel `(x, y)` holds the
//! output color for input `(r, g, b) = (x % N, x / N, y)`, which makes the
//! strip's row-major bytes identical to an `N³` volume in r-fastest order.

use crate::errors::ContentError;
use image::RgbaImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    dimension: u32,
    data: Vec<u8>,
}

impl LookupTable {
    /// Table that maps every color to itself
    pub fn identity(dimension: u32) -> Self {
        let n = dimension.max(2);
        let scale = |c: u32| ((c * 255 + (n - 1) / 2) / (n - 1)) as u8;
        let mut data = Vec::with_capacity((n * n * n * 4) as usize);
        for b in 0..n {
            for g in 0..n {
                for r in 0..n {
                    data.extend_from_slice(&[scale(r), scale(g), scale(b), 255]);
                }
            }
        }
        Self { dimension: n, data }
    }

    /// Parse a strip image
    pub fn from_strip(image: &RgbaImage) -> Result<Self, ContentError> {
        let (width, height) = image.dimensions();
        if height < 2 || width != height * height {
            return Err(ContentError::InvalidLookupTable(format!(
                "strip must be N²xN, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            dimension: height,
            data: image.as_raw().clone(),
        })
    }

    /// Load a strip image from disk
    pub fn load(path: &std::path::Path) -> Result<Self, ContentError> {
        let image = image::open(path)?.to_rgba8();
        Self::from_strip(&image)
    }

    /// Edge length of the volume
    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// RGBA8 volume data, r fastest then g then b
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Output color for lattice point (r, g, b)
    pub fn lookup(&self, r: u32, g: u32, b: u32) -> Option<[u8; 4]> {
        let n = self.dimension;
        if r >= n || g >= n || b >= n {
            return None;
        }
        let index = (((b * n + g) * n + r) * 4) as usize;
        let texel = self.data.get(index..index + 4)?;
        Some([texel[0], texel[1], texel[2], texel[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_identity_corners() {
        let lut = LookupTable::identity(16);
        assert_eq!(lut.data().len(), 16 * 16 * 16 * 4);
        assert_eq!(lut.lookup(0, 0, 0), Some([0, 0, 0, 255]));
        assert_eq!(lut.lookup(15, 15, 15), Some([255, 255, 255, 255]));
        assert_eq!(lut.lookup(15, 0, 0), Some([255, 0, 0, 255]));
        assert_eq!(lut.lookup(16, 0, 0), None);
    }

    #[test]
    fn test_strip_layout_matches_volume() {
        let n = 4;
        let strip = RgbaImage::from_fn(n * n, n, |x, y| {
            Rgba([(x % n) as u8, (x / n) as u8, y as u8, 255])
        });
        let lut = LookupTable::from_strip(&strip).unwrap();
        assert_eq!(lut.dimension(), 4);
        for (r, g, b) in [(0, 0, 0), (3, 1, 2), (1, 3, 3)] {
            assert_eq!(lut.lookup(r, g, b), Some([r as u8, g as u8, b as u8, 255]));
        }
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let strip = RgbaImage::new(10, 4);
        assert!(matches!(
            LookupTable::from_strip(&strip),
            Err(ContentError::InvalidLookupTable(_))
        ));
    }
}
