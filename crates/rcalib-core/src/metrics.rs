//! 2値分類の評価指標
//!
//! 閾値探索に渡す `metric_fn(true_labels, predicted_labels)` として使える。
//! いずれも値が大きいほど良い。分母が 0 になる場合は 0 を返す。

use crate::error::CalibrationError;
use std::fmt;
use std::str::FromStr;

/// 混同行列（正例 = 1）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinaryConfusion {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl BinaryConfusion {
    pub fn from_labels(y_true: &[u8], y_pred: &[u8]) -> Self {
        debug_assert_eq!(y_true.len(), y_pred.len());
        let mut cm = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t == 1, p == 1) {
                (true, true) => cm.tp += 1,
                (false, true) => cm.fp += 1,
                (false, false) => cm.tn += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 { num as f64 / den as f64 } else { 0.0 }
}

pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> f64 {
    let cm = BinaryConfusion::from_labels(y_true, y_pred);
    ratio(cm.tp + cm.tn, cm.total())
}

pub fn precision(y_true: &[u8], y_pred: &[u8]) -> f64 {
    let cm = BinaryConfusion::from_labels(y_true, y_pred);
    ratio(cm.tp, cm.tp + cm.fp)
}

pub fn recall(y_true: &[u8], y_pred: &[u8]) -> f64 {
    let cm = BinaryConfusion::from_labels(y_true, y_pred);
    ratio(cm.tp, cm.tp + cm.fn_)
}

/// F-beta スコア
pub fn fbeta_score(y_true: &[u8], y_pred: &[u8], beta: f64) -> f64 {
    let cm = BinaryConfusion::from_labels(y_true, y_pred);
    let p = ratio(cm.tp, cm.tp + cm.fp);
    let r = ratio(cm.tp, cm.tp + cm.fn_);
    let beta_sq = beta * beta;
    let den = beta_sq * p + r;
    if den > 0.0 {
        (1.0 + beta_sq) * p * r / den
    } else {
        0.0
    }
}

pub fn f1_score(y_true: &[u8], y_pred: &[u8]) -> f64 {
    fbeta_score(y_true, y_pred, 1.0)
}

/// 各クラスの再現率の平均
pub fn balanced_accuracy(y_true: &[u8], y_pred: &[u8]) -> f64 {
    let cm = BinaryConfusion::from_labels(y_true, y_pred);
    let tpr = ratio(cm.tp, cm.tp + cm.fn_);
    let tnr = ratio(cm.tn, cm.tn + cm.fp);
    (tpr + tnr) / 2.0
}

/// CLI から選べる組み込み指標
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Metric {
    #[default]
    F1,
    F2,
    Accuracy,
    BalancedAccuracy,
}

impl Metric {
    pub fn score(&self, y_true: &[u8], y_pred: &[u8]) -> f64 {
        match self {
            Metric::F1 => f1_score(y_true, y_pred),
            Metric::F2 => fbeta_score(y_true, y_pred, 2.0),
            Metric::Accuracy => accuracy(y_true, y_pred),
            Metric::BalancedAccuracy => balanced_accuracy(y_true, y_pred),
        }
    }

    /// ログ表示用の名前
    pub fn label(&self) -> &'static str {
        match self {
            Metric::F1 => "F-Score",
            Metric::F2 => "F2-Score",
            Metric::Accuracy => "Accuracy",
            Metric::BalancedAccuracy => "Balanced-Accuracy",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::F1 => "f1",
            Metric::F2 => "f2",
            Metric::Accuracy => "accuracy",
            Metric::BalancedAccuracy => "balanced-accuracy",
        };
        f.write_str(name)
    }
}

impl FromStr for Metric {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f1" => Ok(Metric::F1),
            "f2" => Ok(Metric::F2),
            "accuracy" => Ok(Metric::Accuracy),
            "balanced-accuracy" | "balanced_accuracy" => Ok(Metric::BalancedAccuracy),
            other => Err(CalibrationError::InvalidConfig(format!("unknown metric: {other}"))),
        }
    }
}
