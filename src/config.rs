//! TOML config with nested sections for spectrogram, augmentation, manifest columns and loader.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ── Sub-configs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrogramConfig {
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    /// Defaults to `n_fft / 2`.
    #[serde(default)]
    pub hop_length: Option<usize>,
    #[serde(default)]
    pub f_min: f32,
    /// Defaults to Nyquist.
    #[serde(default)]
    pub f_max: Option<f32>,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            n_mels: default_n_mels(),
            n_fft: default_n_fft(),
            hop_length: None,
            f_min: 0.0,
            f_max: None,
        }
    }
}

/// Augmentation probabilities and magnitudes. Only consulted in train mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentConfig {
    #[serde(default = "default_time_shift_p")]
    pub time_shift_p: f64,
    #[serde(default = "default_noise_p")]
    pub noise_p: f64,
    #[serde(default = "default_noise_std")]
    pub noise_std: f32,
    #[serde(default = "default_mix_p")]
    pub mix_p: f64,
    #[serde(default = "default_mix_alpha_min")]
    pub mix_alpha_min: f32,
    #[serde(default = "default_mix_alpha_max")]
    pub mix_alpha_max: f32,
    #[serde(default = "default_mask_p")]
    pub freq_mask_p: f64,
    #[serde(default = "default_freq_mask_param")]
    pub freq_mask_param: usize,
    #[serde(default = "default_mask_p")]
    pub time_mask_p: f64,
    #[serde(default = "default_time_mask_param")]
    pub time_mask_param: usize,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            time_shift_p: default_time_shift_p(),
            noise_p: default_noise_p(),
            noise_std: default_noise_std(),
            mix_p: default_mix_p(),
            mix_alpha_min: default_mix_alpha_min(),
            mix_alpha_max: default_mix_alpha_max(),
            freq_mask_p: default_mask_p(),
            freq_mask_param: default_freq_mask_param(),
            time_mask_p: default_mask_p(),
            time_mask_param: default_time_mask_param(),
        }
    }
}

impl AugmentConfig {
    /// Every step gated off.
    pub fn disabled() -> Self {
        Self {
            time_shift_p: 0.0,
            noise_p: 0.0,
            mix_p: 0.0,
            freq_mask_p: 0.0,
            time_mask_p: 0.0,
            ..Self::default()
        }
    }
}

/// Manifest header names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default = "default_file_name_col")]
    pub file_name: String,
    #[serde(default = "default_manual_id_col")]
    pub manual_id: String,
    #[serde(default = "default_offset_col")]
    pub offset: String,
    #[serde(default = "default_duration_col")]
    pub duration: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            file_name: default_file_name_col(),
            manual_id: default_manual_id_col(),
            offset: default_offset_col(),
            duration: default_duration_col(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_n_workers")]
    pub n_workers: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_true")]
    pub shuffle: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            n_workers: default_n_workers(),
            channel_size: default_channel_size(),
            shuffle: true,
        }
    }
}

// ── Top-level config ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the raw recordings referenced by the manifest.
    pub data_path: PathBuf,
    /// Directory for canonical and clip tensors. Defaults to `data_path`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Manifest CSV.
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_max_clip_seconds")]
    pub max_clip_seconds: f32,
    #[serde(default = "default_train_test_split")]
    pub train_test_split: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub verbose: bool,
    /// Consecutive non-finite items tolerated before an access fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default)]
    pub spectrogram: SpectrogramConfig,
    #[serde(default)]
    pub augment: AugmentConfig,
    #[serde(default)]
    pub columns: ColumnConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl Config {
    /// Config with defaults everywhere except the data directory.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            cache_dir: None,
            manifest: default_manifest(),
            sample_rate: default_sample_rate(),
            max_clip_seconds: default_max_clip_seconds(),
            train_test_split: default_train_test_split(),
            seed: 0,
            verbose: false,
            max_retries: default_max_retries(),
            spectrogram: SpectrogramConfig::default(),
            augment: AugmentConfig::default(),
            columns: ColumnConfig::default(),
            loader: LoaderConfig::default(),
        }
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be > 0".into()));
        }
        if !(self.max_clip_seconds > 0.0) {
            return Err(Error::InvalidConfig("max_clip_seconds must be > 0".into()));
        }
        if !(self.train_test_split > 0.0 && self.train_test_split < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "train_test_split must be in (0, 1), got {}",
                self.train_test_split
            )));
        }
        if self.spectrogram.n_fft == 0 || self.spectrogram.n_mels == 0 {
            return Err(Error::InvalidConfig("n_fft and n_mels must be > 0".into()));
        }
        if self.hop_length() == 0 {
            return Err(Error::InvalidConfig("hop_length must be > 0".into()));
        }

        let a = &self.augment;
        for (name, p) in [
            ("time_shift_p", a.time_shift_p),
            ("noise_p", a.noise_p),
            ("mix_p", a.mix_p),
            ("freq_mask_p", a.freq_mask_p),
            ("time_mask_p", a.time_mask_p),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        if !(a.noise_std >= 0.0) {
            return Err(Error::InvalidConfig("noise_std must be >= 0".into()));
        }
        if !(0.0 <= a.mix_alpha_min && a.mix_alpha_min <= a.mix_alpha_max && a.mix_alpha_max <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "mix alpha range [{}, {}] must satisfy 0 <= min <= max <= 1",
                a.mix_alpha_min, a.mix_alpha_max
            )));
        }
        if self.loader.batch_size == 0 || self.loader.n_workers == 0 || self.loader.channel_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size, n_workers and channel_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Exact clip length in samples.
    pub fn num_samples(&self) -> usize {
        (self.sample_rate as f64 * self.max_clip_seconds as f64).round() as usize
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache_dir.as_deref().unwrap_or(&self.data_path)
    }

    pub fn hop_length(&self) -> usize {
        self.spectrogram
            .hop_length
            .unwrap_or(self.spectrogram.n_fft / 2)
    }

    pub fn f_max(&self) -> f32 {
        self.spectrogram
            .f_max
            .unwrap_or(self.sample_rate as f32 / 2.0)
    }
}

// ── Defaults ───────────────────────────────────────────────────────────────

fn default_manifest() -> PathBuf {
    PathBuf::from("annotations.csv")
}
fn default_sample_rate() -> u32 {
    32000
}
fn default_max_clip_seconds() -> f32 {
    5.0
}
fn default_train_test_split() -> f64 {
    0.8
}
fn default_max_retries() -> usize {
    8
}
fn default_n_mels() -> usize {
    128
}
fn default_n_fft() -> usize {
    1024
}
fn default_time_shift_p() -> f64 {
    0.0
}
fn default_noise_p() -> f64 {
    1.0
}
fn default_noise_std() -> f32 {
    0.05
}
fn default_mix_p() -> f64 {
    0.4
}
fn default_mix_alpha_min() -> f32 {
    0.1
}
fn default_mix_alpha_max() -> f32 {
    0.4
}
fn default_mask_p() -> f64 {
    0.4
}
fn default_freq_mask_param() -> usize {
    10
}
fn default_time_mask_param() -> usize {
    25
}
fn default_file_name_col() -> String {
    "IN FILE".into()
}
fn default_manual_id_col() -> String {
    "MANUAL ID".into()
}
fn default_offset_col() -> String {
    "OFFSET".into()
}
fn default_duration_col() -> String {
    "DURATION".into()
}
fn default_batch_size() -> usize {
    32
}
fn default_n_workers() -> usize {
    4
}
fn default_channel_size() -> usize {
    64
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_samples() {
        let mut config = Config::new("/data");
        config.sample_rate = 32000;
        config.max_clip_seconds = 5.0;
        assert_eq!(config.num_samples(), 160000);
    }

    #[test]
    fn test_toml_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_path = "/data/birds"
            sample_rate = 16000

            [augment]
            mix_p = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.hop_length(), 512);
        assert_eq!(config.f_max(), 8000.0);
        assert_eq!(config.augment.mix_p, 0.5);
        assert_eq!(config.augment.mix_alpha_min, 0.1);
        assert_eq!(config.cache_dir(), Path::new("/data/birds"));
        assert_eq!(config.columns.file_name, "IN FILE");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::new("/data");
        config.train_test_split = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::new("/data");
        config.augment.noise_p = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::new("/data");
        config.augment.mix_alpha_min = 0.6;
        config.augment.mix_alpha_max = 0.4;
        assert!(config.validate().is_err());
    }
}
