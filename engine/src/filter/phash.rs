use std::fmt;
use std::str::FromStr;

use slidewatch_common::config::ComparisonConfig;
use slidewatch_common::frame::Frame;
use tracing::{debug, warn};

use super::basic::BasicFilter;
use super::traits::FrameFilter;
use super::{Method, Verdict};
use crate::raster;

/// Side of the square the frame is reduced to before the DCT.
const DCT_SIZE: usize = 32;
/// Side of the low-frequency block that feeds the hash.
const LOW_FREQ: usize = 8;
/// Saved-slide hashes: 64x64 DCT, 16x16 block, 255 bits.
const SLIDE_DCT_SIZE: usize = 64;
const SLIDE_LOW_FREQ: usize = 16;
/// Hex digits in a printed [`SlideHash`].
const SLIDE_HASH_HEX: usize = 64;
/// Coefficients below this magnitude are floating-point residue.
const COEFF_EPSILON: f64 = 1e-9;
/// SSIM stabilizers for 8-bit data: (0.01 * 255)^2 and (0.03 * 255)^2.
const SSIM_C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const SSIM_C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

#[derive(Debug, thiserror::Error)]
pub enum PerceptualError {
    #[error("DCT produced a non-finite coefficient")]
    NonFinite,
    #[error("SSIM needs equal dimensions, got {a:?} and {b:?}")]
    DimensionMismatch { a: (u32, u32), b: (u32, u32) },
    #[error("SSIM is undefined: {0}")]
    Degenerate(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("slide hash must be 64 hex digits, got {0:?}")]
pub struct ParseSlideHashError(pub String);

/// AC coefficients of the top-left `block` x `block` DCT block of `frame`
/// reduced to `size` x `size`, DC term dropped.
fn ac_coefficients(frame: &Frame, size: usize, block: usize) -> Result<Vec<f64>, PerceptualError> {
    let small = raster::resize(&raster::grayscale(frame), size as u32, size as u32);
    let pixels = raster::luma_plane(&small);

    let ac: Vec<f64> = low_frequency_dct(&pixels, size, block)
        .into_iter()
        .skip(1)
        .collect();
    if ac.iter().any(|c| !c.is_finite()) {
        return Err(PerceptualError::NonFinite);
    }
    Ok(ac)
}

/// Middle element of the sorted values. Both hash sizes have an odd count.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted[sorted.len() / 2]
}

/// Compute a 63-bit DCT perceptual hash.
///
/// 1. Grayscale and resize to 32x32
/// 2. 2-D type-II DCT
/// 3. Take the top-left 8x8 block and drop the DC term (63 coefficients)
/// 4. Bit i is set when coefficient i is >= the median of the 63
///
/// The first coefficient lands in the most significant of the 63 bits.
pub fn compute_phash(frame: &Frame) -> Result<u64, PerceptualError> {
    let ac = ac_coefficients(frame, DCT_SIZE, LOW_FREQ)?;
    let median = median(&ac);
    let hash = ac
        .iter()
        .fold(0u64, |hash, &c| (hash << 1) | u64::from(c >= median));
    Ok(hash)
}

/// 255-bit perceptual hash of a saved slide, stored as four big-endian
/// words. Printed as 64 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlideHash([u64; 4]);

impl SlideHash {
    pub fn distance(&self, other: &SlideHash) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

impl fmt::Display for SlideHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in self.0 {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

impl FromStr for SlideHash {
    type Err = ParseSlideHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseSlideHashError(s.to_string());
        if s.len() != SLIDE_HASH_HEX || !s.is_ascii() {
            return Err(invalid());
        }
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u64::from_str_radix(&s[i * 16..(i + 1) * 16], 16).map_err(|_| invalid())?;
        }
        Ok(Self(words))
    }
}

/// Same construction as [`compute_phash`] on a 64x64 reduction with a
/// 16x16 block, giving 255 bits.
pub fn compute_slide_hash(frame: &Frame) -> Result<SlideHash, PerceptualError> {
    let ac = ac_coefficients(frame, SLIDE_DCT_SIZE, SLIDE_LOW_FREQ)?;
    let median = median(&ac);
    let bits = ac.len();
    let mut words = [0u64; 4];
    for (i, &c) in ac.iter().enumerate() {
        if c >= median {
            let pos = bits - 1 - i;
            words[3 - pos / 64] |= 1u64 << (pos % 64);
        }
    }
    Ok(SlideHash(words))
}

/// Top-left `block` x `block` corner of the orthonormal 2-D DCT-II of a
/// `size` x `size` plane, ordered `u * block + v` where `u` is the
/// horizontal frequency.
fn low_frequency_dct(pixels: &[u8], size: usize, block: usize) -> Vec<f64> {
    let n = size as f64;
    let cos_table: Vec<Vec<f64>> = (0..size)
        .map(|x| {
            (0..block)
                .map(|k| ((2 * x + 1) as f64 * k as f64 * std::f64::consts::PI / (2.0 * n)).cos())
                .collect()
        })
        .collect();

    // Separable: transform every row along x first.
    let mut rows = vec![vec![0.0f64; block]; size];
    for (y, out) in rows.iter_mut().enumerate() {
        for (x, cos_x) in cos_table.iter().enumerate() {
            let p = pixels[y * size + x] as f64;
            for (slot, c) in out.iter_mut().zip(cos_x.iter()) {
                *slot += p * c;
            }
        }
    }

    let scale = |k: usize| if k == 0 { 1.0 / 2f64.sqrt() } else { 1.0 };
    let mut coeffs = Vec::with_capacity(block * block);
    for u in 0..block {
        for v in 0..block {
            let sum: f64 = rows
                .iter()
                .zip(cos_table.iter())
                .map(|(row, cos_y)| row[u] * cos_y[v])
                .sum();
            let c = (2.0 / n) * scale(u) * scale(v) * sum;
            coeffs.push(if c.abs() < COEFF_EPSILON { 0.0 } else { c });
        }
    }
    coeffs
}

/// Compute the hamming distance between two hashes.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Global (single-window) SSIM over the luma of two equally sized frames.
pub fn ssim(a: &Frame, b: &Frame) -> Result<f64, PerceptualError> {
    if a.dimensions() != b.dimensions() {
        return Err(PerceptualError::DimensionMismatch {
            a: a.dimensions(),
            b: b.dimensions(),
        });
    }
    let la = raster::luma_plane(a);
    let lb = raster::luma_plane(b);
    let n = la.len() as f64;

    let mean_a = la.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = lb.iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
    for (&pa, &pb) in la.iter().zip(lb.iter()) {
        let da = pa as f64 - mean_a;
        let db = pb as f64 - mean_b;
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    let numerator = (2.0 * mean_a * mean_b + SSIM_C1) * (2.0 * cov + SSIM_C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + SSIM_C1) * (var_a + var_b + SSIM_C2);
    let value = numerator / denominator;
    if !value.is_finite() {
        return Err(PerceptualError::Degenerate("non-finite ratio"));
    }
    Ok(value)
}

/// Outcome of the hash stage alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashDecision {
    Changed,
    Unchanged,
    /// Between the bounds; SSIM decides.
    Ambiguous,
}

/// `d > up` is a change, `d <= low` is not, anything between needs SSIM.
pub fn classify_distance(distance: u32, low: u32, up: u32) -> HashDecision {
    if distance > up {
        HashDecision::Changed
    } else if distance <= low {
        HashDecision::Unchanged
    } else {
        HashDecision::Ambiguous
    }
}

/// Two-level perceptual filter: pHash hamming distance, SSIM for the
/// borderline band, pixel-difference comparison if either stage fails.
#[derive(Debug, Clone)]
pub struct PerceptualFilter {
    hamming_low: u32,
    hamming_up: u32,
    ssim_threshold: f64,
    fallback: BasicFilter,
}

impl PerceptualFilter {
    pub fn new(hamming_low: u32, hamming_up: u32, ssim_threshold: f64, fallback: BasicFilter) -> Self {
        Self {
            hamming_low,
            hamming_up,
            ssim_threshold,
            fallback,
        }
    }

    pub fn from_config(config: &ComparisonConfig) -> Self {
        Self::new(
            config.hamming_threshold_low,
            config.hamming_threshold_up,
            config.effective_ssim_threshold(),
            BasicFilter::from_config(config),
        )
    }

    pub fn try_compare(&self, reference: &Frame, current: &Frame) -> Result<Verdict, PerceptualError> {
        let distance = hamming(compute_phash(reference)?, compute_phash(current)?);
        let decision = classify_distance(distance, self.hamming_low, self.hamming_up);
        debug!(distance, ?decision, "pHash comparison");

        match decision {
            HashDecision::Changed => Ok(Verdict {
                changed: true,
                score: distance as f64 / 64.0,
                method: Method::PerceptualHash,
            }),
            HashDecision::Unchanged => Ok(Verdict {
                changed: false,
                score: distance as f64 / 64.0,
                method: Method::PerceptualHash,
            }),
            HashDecision::Ambiguous => {
                let similarity = ssim(reference, current)?;
                debug!(
                    ssim = format!("{:.6}", similarity),
                    threshold = self.ssim_threshold,
                    "SSIM comparison"
                );
                Ok(Verdict {
                    changed: similarity < self.ssim_threshold,
                    score: 1.0 - similarity,
                    method: Method::Ssim,
                })
            }
        }
    }
}

impl FrameFilter for PerceptualFilter {
    fn compare(&self, reference: &Frame, current: &Frame) -> Verdict {
        match self.try_compare(reference, current) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "perceptual comparison failed, falling back to basic");
                self.fallback.compare(reference, current)
            }
        }
    }

    fn name(&self) -> &str {
        "perceptual"
    }
}
