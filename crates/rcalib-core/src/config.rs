//! キャリブレーション設定（TOML）
//!
//! ```toml
//! val_fraction = 0.5
//! batch_size = 256
//! seed = 42
//!
//! [temperature]
//! initial = 1.5
//! lr = 0.01
//! max_iter = 50
//! line_search = "backtracking"
//!
//! [ece]
//! n_bins = 15
//!
//! [threshold]
//! grid_size = 1000
//! ```
//!
//! 省略した項目は既定値になる。

use crate::ece::EceLoss;
use crate::error::{CalibrationError, Result};
use crate::optim::{LbfgsParams, LineSearch};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 全体設定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    /// 検証データのうち使用するバッチの割合 (0, 1]
    pub val_fraction: f64,
    /// 検証データのバッチサイズ
    pub batch_size: usize,
    /// シャッフル用のシード値
    pub seed: u64,
    pub temperature: TemperatureConfig,
    pub ece: EceConfig,
    pub threshold: ThresholdConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            val_fraction: 1.0,
            batch_size: 256,
            seed: 42,
            temperature: TemperatureConfig::default(),
            ece: EceConfig::default(),
            threshold: ThresholdConfig::default(),
        }
    }
}

/// 温度スケーリングの設定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemperatureConfig {
    /// 温度の初期値（恒等スケーリングは 1.0）
    pub initial: f64,
    pub lr: f64,
    pub max_iter: usize,
    pub history_size: usize,
    pub tolerance_grad: f64,
    pub tolerance_change: f64,
    pub line_search: LineSearch,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            initial: 1.5,
            lr: 0.01,
            max_iter: 50,
            history_size: 100,
            tolerance_grad: 1e-7,
            tolerance_change: 1e-9,
            line_search: LineSearch::Backtracking,
        }
    }
}

impl TemperatureConfig {
    pub fn lbfgs_params(&self) -> LbfgsParams {
        LbfgsParams {
            lr: self.lr,
            max_iter: self.max_iter,
            history_size: self.history_size,
            tolerance_grad: self.tolerance_grad,
            tolerance_change: self.tolerance_change,
            line_search: self.line_search,
        }
    }
}

/// ECE の設定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EceConfig {
    pub n_bins: usize,
}

impl Default for EceConfig {
    fn default() -> Self {
        Self {
            n_bins: EceLoss::DEFAULT_BINS,
        }
    }
}

/// 閾値探索の設定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdConfig {
    /// 閾値候補の数（候補は `i / grid_size`）
    pub grid_size: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self { grid_size: 1000 }
    }
}

impl CalibrationConfig {
    /// TOML文字列から読み込み
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// TOMLファイルから読み込み
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// 値の範囲チェック
    pub fn validate(&self) -> Result<()> {
        crate::data::check_fraction(self.val_fraction)?;
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive"));
        }
        let t = &self.temperature;
        if !t.initial.is_finite() || t.initial == 0.0 {
            return Err(CalibrationError::InvalidTemperature(t.initial));
        }
        if !(t.lr.is_finite() && t.lr > 0.0) {
            return Err(invalid(format!("temperature.lr must be positive, got {}", t.lr)));
        }
        if t.max_iter == 0 {
            return Err(invalid("temperature.max_iter must be positive"));
        }
        if t.history_size == 0 {
            return Err(invalid("temperature.history_size must be positive"));
        }
        if t.tolerance_grad < 0.0 || t.tolerance_change < 0.0 {
            return Err(invalid("temperature tolerances must be non-negative"));
        }
        if self.ece.n_bins == 0 {
            return Err(CalibrationError::InvalidBinCount);
        }
        if self.threshold.grid_size == 0 {
            return Err(CalibrationError::InvalidGridSize);
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> CalibrationError {
    CalibrationError::InvalidConfig(message.into())
}
