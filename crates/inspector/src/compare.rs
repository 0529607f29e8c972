//! Pluggable payload comparators
//!
//! A comparator scores two payloads in [0, 1] (0 identical, 1 maximally
//! different) and must be symmetric. The registry maps each file type to a
//! comparator, with an optional fallback for unregistered types.

use std::collections::HashMap;
use std::sync::Arc;

use image::{GenericImageView, Pixel};
use materialstore_common::{Error, FileType, Result};
use tracing::debug;

/// Scores the difference between two payloads of one file type
pub trait Comparator: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Difference in [0, 1]; must not depend on argument order
    fn compare(&self, left: &[u8], right: &[u8]) -> Result<f64>;
}

/// 0.0 when the bytes are equal, 1.0 otherwise
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteComparator;

impl Comparator for ByteComparator {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn compare(&self, left: &[u8], right: &[u8]) -> Result<f64> {
        Ok(if left == right { 0.0 } else { 1.0 })
    }
}

/// Line-based text distance: `1 - 2·LCS / (lines(a) + lines(b))`
#[derive(Debug, Default, Clone, Copy)]
pub struct TextComparator;

/// Largest DP table (in cells) computed exactly; beyond it the LCS is
/// approximated by the common line multiset
const MAX_LCS_CELLS: usize = 16 * 1024 * 1024;

impl TextComparator {
    fn lcs_len(a: &[&str], b: &[&str]) -> usize {
        let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
        let (a, b) = (&a[prefix..], &b[prefix..]);
        let suffix = a
            .iter()
            .rev()
            .zip(b.iter().rev())
            .take_while(|(x, y)| x == y)
            .count();
        let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);

        let middle = if a.is_empty() || b.is_empty() {
            0
        } else if a.len().saturating_mul(b.len()) > MAX_LCS_CELLS {
            debug!(
                "Text too large for exact LCS ({} x {} lines), using line multiset",
                a.len(),
                b.len()
            );
            Self::common_lines(a, b)
        } else {
            Self::lcs_table(a, b)
        };
        prefix + middle + suffix
    }

    fn lcs_table(a: &[&str], b: &[&str]) -> usize {
        // Two-row DP over the shorter side
        let (outer, inner) = if a.len() >= b.len() { (a, b) } else { (b, a) };
        let mut prev = vec![0usize; inner.len() + 1];
        let mut curr = vec![0usize; inner.len() + 1];

        for x in outer {
            for (j, y) in inner.iter().enumerate() {
                curr[j + 1] = if x == y {
                    prev[j] + 1
                } else {
                    prev[j + 1].max(curr[j])
                };
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        prev[inner.len()]
    }

    /// Upper bound on the LCS: lines shared regardless of order
    fn common_lines(a: &[&str], b: &[&str]) -> usize {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for line in a {
            *counts.entry(*line).or_default() += 1;
        }
        b.iter()
            .filter(|line| match counts.get_mut(*line) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            })
            .count()
    }
}

impl Comparator for TextComparator {
    fn name(&self) -> &'static str {
        "text"
    }

    fn compare(&self, left: &[u8], right: &[u8]) -> Result<f64> {
        if left == right {
            return Ok(0.0);
        }
        let left = String::from_utf8_lossy(left);
        let right = String::from_utf8_lossy(right);
        let a: Vec<&str> = left.lines().collect();
        let b: Vec<&str> = right.lines().collect();

        let total = a.len() + b.len();
        if total == 0 {
            // Both consist of line terminators only, yet differ
            return Ok(1.0);
        }
        let common = Self::lcs_len(&a, &b);
        let score = 1.0 - (2 * common) as f64 / total as f64;
        // Equal line sequences that differ only in terminators still differ
        Ok(if score == 0.0 { f64::EPSILON } else { score })
    }
}

/// Pixel comparison of decoded images.
///
/// The score is the fraction of pixels of the union canvas that differ; a
/// pixel covered by only one image always differs. Channel differences up to
/// `tolerance` are ignored (anti-aliasing, compression).
#[derive(Debug, Clone, Copy)]
pub struct ImageComparator {
    tolerance: u8,
}

impl ImageComparator {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    fn pixels_differ(&self, a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
        a.channels()
            .iter()
            .zip(b.channels())
            .any(|(x, y)| x.abs_diff(*y) > self.tolerance)
    }
}

impl Default for ImageComparator {
    fn default() -> Self {
        Self::new(5)
    }
}

impl Comparator for ImageComparator {
    fn name(&self) -> &'static str {
        "image"
    }

    fn compare(&self, left: &[u8], right: &[u8]) -> Result<f64> {
        if left == right {
            return Ok(0.0);
        }
        let left_img = image::load_from_memory(left)
            .map_err(|e| Error::Comparison(format!("left image: {}", e)))?;
        let right_img = image::load_from_memory(right)
            .map_err(|e| Error::Comparison(format!("right image: {}", e)))?;

        if left_img.dimensions() != right_img.dimensions() {
            debug!(
                "Image dimensions differ: {:?} vs {:?}",
                left_img.dimensions(),
                right_img.dimensions()
            );
        }

        let (lw, lh) = left_img.dimensions();
        let (rw, rh) = right_img.dimensions();
        let width = lw.max(rw) as u64;
        let height = lh.max(rh) as u64;
        let total_pixels = width * height;
        if total_pixels == 0 {
            return Ok(0.0);
        }

        let left_rgba = left_img.to_rgba8();
        let right_rgba = right_img.to_rgba8();
        let mut diff_pixels = 0u64;

        for y in 0..lh.min(rh) {
            for x in 0..lw.min(rw) {
                if self.pixels_differ(left_rgba.get_pixel(x, y), right_rgba.get_pixel(x, y)) {
                    diff_pixels += 1;
                }
            }
        }
        let overlap = lw.min(rw) as u64 * lh.min(rh) as u64;
        diff_pixels += total_pixels - overlap;

        Ok(diff_pixels as f64 / total_pixels as f64)
    }
}

/// Comparators keyed by file type
#[derive(Clone)]
pub struct ComparatorRegistry {
    by_type: HashMap<FileType, Arc<dyn Comparator>>,
    fallback: Option<Arc<dyn Comparator>>,
}

impl ComparatorRegistry {
    /// No type-specific comparators; unknown types fall back to byte equality
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
            fallback: Some(Arc::new(ByteComparator)),
        }
    }

    /// Images by pixels, text by lines, everything else by bytes
    pub fn standard(pixel_tolerance: u8) -> Self {
        let mut registry = Self::empty();
        let image: Arc<dyn Comparator> = Arc::new(ImageComparator::new(pixel_tolerance));
        let text: Arc<dyn Comparator> = Arc::new(TextComparator);
        for file_type in FileType::ALL {
            if file_type.is_image() {
                registry.by_type.insert(file_type, image.clone());
            } else if file_type.is_text() {
                registry.by_type.insert(file_type, text.clone());
            }
        }
        registry
    }

    /// Use `comparator` for `file_type`, replacing any previous one
    pub fn register(mut self, file_type: FileType, comparator: impl Comparator + 'static) -> Self {
        self.by_type.insert(file_type, Arc::new(comparator));
        self
    }

    /// Use `comparator` for types with no registration of their own
    pub fn with_fallback(mut self, comparator: impl Comparator + 'static) -> Self {
        self.fallback = Some(Arc::new(comparator));
        self
    }

    /// Unregistered types then have no comparator at all
    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    pub fn get(&self, file_type: FileType) -> Option<&dyn Comparator> {
        self.by_type
            .get(&file_type)
            .or(self.fallback.as_ref())
            .map(|c| c.as_ref())
    }
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::standard(5)
    }
}

impl std::fmt::Debug for ComparatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self
            .by_type
            .iter()
            .map(|(t, c)| format!("{}={}", t, c.name()))
            .collect();
        types.sort();
        f.debug_struct("ComparatorRegistry")
            .field("by_type", &types)
            .field("fallback", &self.fallback.as_ref().map(|c| c.name()))
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::png;
    use super::*;

    #[test]
    fn test_byte_comparator() {
        assert_eq!(ByteComparator.compare(b"a", b"a").unwrap(), 0.0);
        assert_eq!(ByteComparator.compare(b"a", b"b").unwrap(), 1.0);
    }

    #[test]
    fn test_text_comparator() {
        let c = TextComparator;
        assert_eq!(c.compare(b"a\nb\n", b"a\nb\n").unwrap(), 0.0);
        assert_eq!(c.compare(b"a\nb", b"x\ny").unwrap(), 1.0);

        let score = c.compare(b"a\nb\nc\nd", b"a\nb\nc\nX").unwrap();
        assert!((score - 0.25).abs() < 1e-9, "score={score}");

        let crlf = c.compare(b"a\r\nb", b"a\nb").unwrap();
        assert!(crlf > 0.0);
    }

    #[test]
    fn test_text_comparator_large_inputs() {
        let c = TextComparator;
        let shared: String = (0..100_000).map(|i| format!("line {i}\n")).collect();
        let edited = shared.replacen("line 50000\n", "line fifty thousand\n", 1);
        let score = c.compare(shared.as_bytes(), edited.as_bytes()).unwrap();
        assert!((score - 1.0 / 100_000.0).abs() < 1e-12, "score={score}");

        // Too large for an exact table: 5000 x 5000 lines, nothing shared
        let left: String = (0..5000).map(|i| format!("left {i}\n")).collect();
        let right: String = (0..5000).map(|i| format!("right {i}\n")).collect();
        assert_eq!(c.compare(left.as_bytes(), right.as_bytes()).unwrap(), 1.0);

        let reversed: String = (0..5000).rev().map(|i| format!("left {i}\n")).collect();
        // Line order is not scored beyond the exact limit, but the pair still differs
        let score = c.compare(left.as_bytes(), reversed.as_bytes()).unwrap();
        assert!(score > 0.0 && score < 0.01, "score={score}");
    }

    #[test]
    fn test_text_comparator_is_symmetric() {
        let c = TextComparator;
        let a = b"one\ntwo\nthree\nfour";
        let b = b"zero\ntwo\nfour\nfive\nsix";
        assert_eq!(c.compare(a, b).unwrap(), c.compare(b, a).unwrap());
    }

    #[test]
    fn test_image_identical_and_changed() {
        let c = ImageComparator::default();
        let base = png(10, 10, [0, 0, 255, 255], 0);
        let changed = png(10, 10, [0, 0, 255, 255], 25);

        assert_eq!(c.compare(&base, &base).unwrap(), 0.0);
        let score = c.compare(&base, &changed).unwrap();
        assert!((score - 0.25).abs() < 1e-9, "score={score}");
        assert_eq!(score, c.compare(&changed, &base).unwrap());
    }

    #[test]
    fn test_image_tolerance() {
        let a = png(4, 4, [100, 100, 100, 255], 0);
        let b = png(4, 4, [103, 100, 100, 255], 0);
        assert_eq!(ImageComparator::new(5).compare(&a, &b).unwrap(), 0.0);
        assert_eq!(ImageComparator::new(0).compare(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn test_image_dimension_mismatch_counts_uncovered() {
        let small = png(2, 2, [0, 0, 0, 255], 0);
        let large = png(4, 2, [0, 0, 0, 255], 0);
        let c = ImageComparator::default();
        assert_eq!(c.compare(&small, &large).unwrap(), 0.5);
        assert_eq!(c.compare(&large, &small).unwrap(), 0.5);
    }

    #[test]
    fn test_image_decode_failure() {
        let err = ImageComparator::default().compare(b"not a png", b"also not").unwrap_err();
        assert!(matches!(err, Error::Comparison(_)));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ComparatorRegistry::standard(5);
        assert_eq!(registry.get(FileType::Png).unwrap().name(), "image");
        assert_eq!(registry.get(FileType::Json).unwrap().name(), "text");
        assert_eq!(registry.get(FileType::Binary).unwrap().name(), "bytes");

        let strict = registry.without_fallback();
        assert!(strict.get(FileType::Binary).is_none());
        assert!(strict.get(FileType::Png).is_some());
    }
}
