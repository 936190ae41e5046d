//! 閾値探索（threshold moving）
//!
//! モデルの陽性確率を 0/1 に変換する閾値を `[0, 1)` の格子
//! `{0, 1/n, ..., (n-1)/n}` から選ぶ。検証サブセット上で指定した指標が
//! 最大になる最小の閾値を返す。モデル自体は変更しない。

use crate::config::CalibrationConfig;
use crate::data::{ValidationSource, collect_validation};
use crate::error::{CalibrationError, Result};
use crate::loss::sigmoid;
use crate::model::CalibratedModel;
use crate::report::{LogReporter, Report, Reporter};
use serde::Serialize;

/// 既定の格子サイズ
pub const DEFAULT_GRID_SIZE: usize = 1000;

/// 確率を閾値で 0/1 に変換（`p >= threshold` で 1）
pub fn to_labels(probs: &[f64], threshold: f64) -> Vec<u8> {
    probs.iter().map(|&p| u8::from(p >= threshold)).collect()
}

/// 閾値候補 `i / grid_size` (i = 0..grid_size)
pub fn threshold_grid(grid_size: usize) -> Vec<f64> {
    (0..grid_size).map(|i| i as f64 / grid_size as f64).collect()
}

/// 最大値の最初の位置
///
/// NaN は比較で負けるので選ばれない。すべて NaN なら 0 を返す。
pub fn argmax_first(scores: &[f64]) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (i, &score) in scores.iter().enumerate() {
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

/// 全閾値候補に対する指標値
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdCurve {
    pub thresholds: Vec<f64>,
    pub scores: Vec<f64>,
    pub best_index: usize,
}

impl ThresholdCurve {
    pub fn best_threshold(&self) -> f64 {
        self.thresholds[self.best_index]
    }

    pub fn best_score(&self) -> f64 {
        self.scores[self.best_index]
    }
}

/// 閾値探索器
pub struct ThresholdMoving<M> {
    model: M,
    grid_size: usize,
    metric_label: String,
    reporter: Box<dyn Reporter>,
}

impl<M: CalibratedModel> ThresholdMoving<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            grid_size: DEFAULT_GRID_SIZE,
            metric_label: "score".to_string(),
            reporter: Box::new(LogReporter),
        }
    }

    /// 設定の格子サイズを使う
    pub fn with_config(model: M, config: &CalibrationConfig) -> Result<Self> {
        if config.threshold.grid_size == 0 {
            return Err(CalibrationError::InvalidGridSize);
        }
        let mut moving = Self::new(model);
        moving.grid_size = config.threshold.grid_size;
        Ok(moving)
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// ログに出す指標名
    pub fn with_metric_label(mut self, label: impl Into<String>) -> Self {
        self.metric_label = label.into();
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn thresholds(&self) -> Vec<f64> {
        threshold_grid(self.grid_size)
    }

    /// 指標が最大になる閾値を返す
    ///
    /// `metric_fn(true_labels, predicted_labels)` は大きいほど良い値を返すこと。
    /// 同点なら小さい閾値を優先する。
    pub fn search_threshold<S, F>(
        &self,
        metric_fn: F,
        source: &mut S,
        val_fraction: f64,
    ) -> Result<f64>
    where
        S: ValidationSource<Input = M::Input> + ?Sized,
        F: Fn(&[u8], &[u8]) -> f64,
    {
        Ok(self.search_with_scores(metric_fn, source, val_fraction)?.best_threshold())
    }

    /// 全候補の指標値も含めて返す
    pub fn search_with_scores<S, F>(
        &self,
        metric_fn: F,
        source: &mut S,
        val_fraction: f64,
    ) -> Result<ThresholdCurve>
    where
        S: ValidationSource<Input = M::Input> + ?Sized,
        F: Fn(&[u8], &[u8]) -> f64,
    {
        let model = &self.model;
        let set = collect_validation(source, val_fraction, |inputs| {
            model.calibrated_forward(inputs)
        })?;
        let probs: Vec<f64> = set.logits.iter().map(|&z| sigmoid(z)).collect();

        let thresholds = self.thresholds();
        let scores: Vec<f64> = thresholds
            .iter()
            .map(|&t| metric_fn(&set.labels, &to_labels(&probs, t)))
            .collect();
        let best_index = argmax_first(&scores);
        let curve = ThresholdCurve {
            thresholds,
            scores,
            best_index,
        };

        self.reporter.report(&Report::ThresholdSelected {
            threshold: curve.best_threshold(),
            score: curve.best_score(),
            metric: self.metric_label.clone(),
        });
        Ok(curve)
    }
}
