//! Train-time augmentations.
//!
//! Waveform steps run in a fixed order (time shift, additive noise, mixup),
//! then the image steps (frequency mask, time mask) after rendering. Each
//! step is gated independently by its configured probability.

use ndarray::{s, Array1, Array3};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::AugmentConfig;
use crate::error::{Error, Result};

/// Circularly roll `samples` right by a uniform offset in `[0, len)`.
pub fn time_shift<R: Rng + ?Sized>(samples: &mut [f32], rng: &mut R) {
    if samples.is_empty() {
        return;
    }
    let shift = rng.gen_range(0..samples.len());
    samples.rotate_right(shift);
}

/// Add zero-mean Gaussian noise with standard deviation `std`.
pub fn add_noise<R: Rng + ?Sized>(samples: &mut [f32], std: f32, rng: &mut R) -> Result<()> {
    let normal = Normal::new(0.0, std).map_err(|e| Error::InvalidConfig(format!("noise_std: {e}")))?;
    for s in samples.iter_mut() {
        *s += normal.sample(rng);
    }
    Ok(())
}

/// Blend two clips and their labels: `alpha * a + (1 - alpha) * b`.
///
/// With `alpha` in `[0, 1]` and both labels summing to one, the mixed label
/// also sums to one.
pub fn mix(
    wave: &mut [f32],
    label: &mut Array1<f32>,
    other_wave: &[f32],
    other_label: &Array1<f32>,
    alpha: f32,
) {
    for (a, b) in wave.iter_mut().zip(other_wave) {
        *a = alpha * *a + (1.0 - alpha) * b;
    }
    label.zip_mut_with(other_label, |a, &b| *a = alpha * *a + (1.0 - alpha) * b);
}

/// Zero a random band of up to `param - 1` mel bins across all channels.
pub fn freq_mask<R: Rng + ?Sized>(image: &mut Array3<f32>, param: usize, rng: &mut R) {
    let (_, n_mels, _) = image.dim();
    if let Some((start, end)) = mask_band(n_mels, param, rng) {
        image.slice_mut(s![.., start..end, ..]).fill(0.0);
    }
}

/// Zero a random run of up to `param - 1` frames across all channels.
pub fn time_mask<R: Rng + ?Sized>(image: &mut Array3<f32>, param: usize, rng: &mut R) {
    let (_, _, n_frames) = image.dim();
    if let Some((start, end)) = mask_band(n_frames, param, rng) {
        image.slice_mut(s![.., .., start..end]).fill(0.0);
    }
}

fn mask_band<R: Rng + ?Sized>(size: usize, param: usize, rng: &mut R) -> Option<(usize, usize)> {
    if size == 0 || param == 0 {
        return None;
    }
    let width = rng.gen_range(0..param).min(size);
    let start = rng.gen_range(0..=size - width);
    Some((start, start + width))
}

/// Applies the configured augmentations.
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentConfig,
}

impl Augmenter {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Time shift, noise and mixup. `partner` supplies a second clip and
    /// label for mixup and is only called when mixup fires.
    pub fn augment_waveform<R, F>(
        &self,
        wave: &mut [f32],
        label: &mut Array1<f32>,
        rng: &mut R,
        partner: F,
    ) -> Result<()>
    where
        R: Rng + ?Sized,
        F: FnOnce(&mut R) -> Result<(Vec<f32>, Array1<f32>)>,
    {
        let c = &self.config;
        if rng.gen_bool(c.time_shift_p) {
            time_shift(wave, rng);
        }
        if rng.gen_bool(c.noise_p) {
            add_noise(wave, c.noise_std, rng)?;
        }
        if rng.gen_bool(c.mix_p) {
            let (other_wave, other_label) = partner(rng)?;
            let alpha = if c.mix_alpha_max > c.mix_alpha_min {
                rng.gen_range(c.mix_alpha_min..=c.mix_alpha_max)
            } else {
                c.mix_alpha_min
            };
            mix(wave, label, &other_wave, &other_label, alpha);
        }
        Ok(())
    }

    /// Frequency and time masking on a rendered image.
    pub fn augment_image<R: Rng + ?Sized>(&self, image: &mut Array3<f32>, rng: &mut R) {
        let c = &self.config;
        if rng.gen_bool(c.freq_mask_p) {
            freq_mask(image, c.freq_mask_param, rng);
        }
        if rng.gen_bool(c.time_mask_p) {
            time_mask(image, c.time_mask_param, rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn one_hot(n: usize, i: usize) -> Array1<f32> {
        let mut v = Array1::zeros(n);
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_time_shift_is_a_rotation() {
        let mut rng = StdRng::seed_from_u64(1);
        let original: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let mut shifted = original.clone();
        time_shift(&mut shifted, &mut rng);
        let mut sorted = shifted.clone();
        sorted.sort_by(f32::total_cmp);
        assert_eq!(sorted, original);
        let k = shifted.iter().position(|&v| v == 0.0).unwrap();
        assert!((0..100).all(|i| shifted[(i + k) % 100] == original[i]));
    }

    #[test]
    fn test_noise_has_configured_spread() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut wave = vec![0.0f32; 20000];
        add_noise(&mut wave, 0.05, &mut rng).unwrap();
        let mean = wave.iter().sum::<f32>() / wave.len() as f32;
        let var = wave.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / wave.len() as f32;
        assert!(mean.abs() < 0.005);
        assert!((var.sqrt() - 0.05).abs() < 0.005);
    }

    #[test]
    fn test_mixed_labels_stay_on_simplex() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let alpha: f32 = rng.gen_range(0.1..=0.4);
            let mut label = one_hot(5, rng.gen_range(0..5));
            let other = one_hot(5, rng.gen_range(0..5));
            let mut wave = vec![1.0; 8];
            mix(&mut wave, &mut label, &[0.0; 8], &other, alpha);
            assert!(label.iter().all(|&v| v >= 0.0));
            assert!((label.sum() - 1.0).abs() < 1e-6);
            assert!(wave.iter().all(|&v| (v - alpha).abs() < 1e-6));
        }
    }

    #[test]
    fn test_masks_zero_contiguous_bands() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50 {
            let mut image = Array3::<f32>::ones((3, 16, 40));
            freq_mask(&mut image, 6, &mut rng);
            let zero_rows: Vec<usize> = (0..16)
                .filter(|&m| image.slice(s![0, m, ..]).iter().all(|&v| v == 0.0))
                .collect();
            assert!(zero_rows.len() < 6);
            if let (Some(first), Some(last)) = (zero_rows.first(), zero_rows.last()) {
                assert_eq!(last - first + 1, zero_rows.len());
            }
            assert_eq!(image.slice(s![0, .., ..]), image.slice(s![2, .., ..]));

            let mut image = Array3::<f32>::ones((3, 16, 40));
            time_mask(&mut image, 10, &mut rng);
            let zeros = image.iter().filter(|&&v| v == 0.0).count();
            assert_eq!(zeros % (3 * 16), 0);
            assert!(zeros / (3 * 16) < 10);
        }
    }

    #[test]
    fn test_disabled_augmenter_is_identity() {
        let augmenter = Augmenter::new(AugmentConfig::disabled());
        let mut rng = StdRng::seed_from_u64(5);
        let mut wave = vec![0.3f32; 64];
        let mut label = one_hot(3, 1);
        augmenter
            .augment_waveform(&mut wave, &mut label, &mut rng, |_| panic!("no mixup"))
            .unwrap();
        let mut image = Array3::<f32>::ones((3, 8, 8));
        augmenter.augment_image(&mut image, &mut rng);
        assert_eq!(wave, vec![0.3f32; 64]);
        assert_eq!(label, one_hot(3, 1));
        assert!(image.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_forced_mixup_calls_partner() {
        let config = AugmentConfig {
            mix_p: 1.0,
            ..AugmentConfig::disabled()
        };
        let augmenter = Augmenter::new(config);
        let mut rng = StdRng::seed_from_u64(6);
        let mut wave = vec![1.0f32; 4];
        let mut label = one_hot(2, 0);
        augmenter
            .augment_waveform(&mut wave, &mut label, &mut rng, |_| {
                Ok((vec![0.0; 4], one_hot(2, 1)))
            })
            .unwrap();
        assert!(label[0] >= 0.1 - 1e-6 && label[0] <= 0.4 + 1e-6);
        assert!((label.sum() - 1.0).abs() < 1e-6);
        assert!((wave[0] - label[0]).abs() < 1e-6);
    }
}
