//! Expected Calibration Error (ECE)
//!
//! 確信度を等幅のビンに分け、各ビンで
//! `|平均確信度 - 正解率|` をビン内サンプル比率で重み付けして合計する。
//!
//! 入力はシグモイド適用前のロジット。確信度は `sigmoid(logit)`、
//! 予測クラスは `確信度 > 0.5` で決める。
//!
//! ビンの所属判定は `lower < confidence <= upper`（左開・右閉）。
//! 確信度がちょうど 0.0 のサンプルはどのビンにも入らないが、
//! 重みの分母（全サンプル数）には含まれる。
//!
//! 参考: Naeini, Cooper, Hauskrecht.
//! "Obtaining Well Calibrated Probabilities Using Bayesian Binning." AAAI 2015.

use crate::error::{CalibrationError, Result};
use crate::loss::{check_aligned, sigmoid};
use serde::Serialize;

/// 1ビン分の集計
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BinStat {
    pub lower: f64,
    pub upper: f64,
    /// ビン内サンプル数
    pub count: usize,
    /// ビン内正解率（空ビンは 0）
    pub accuracy: f64,
    /// ビン内平均確信度（空ビンは 0）
    pub confidence: f64,
}

impl BinStat {
    /// 確信度と正解率の差
    pub fn gap(&self) -> f64 {
        (self.confidence - self.accuracy).abs()
    }
}

/// ECE 計算器
#[derive(Clone, Debug)]
pub struct EceLoss {
    bin_lowers: Vec<f64>,
    bin_uppers: Vec<f64>,
}

impl EceLoss {
    pub const DEFAULT_BINS: usize = 15;

    pub fn new(n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(CalibrationError::InvalidBinCount);
        }
        Ok(Self::with_bins(n_bins))
    }

    /// `n_bins > 0` を前提に境界を作る
    fn with_bins(n_bins: usize) -> Self {
        let boundaries: Vec<f64> = (0..=n_bins).map(|i| i as f64 / n_bins as f64).collect();
        Self {
            bin_lowers: boundaries[..n_bins].to_vec(),
            bin_uppers: boundaries[1..].to_vec(),
        }
    }

    pub fn n_bins(&self) -> usize {
        self.bin_lowers.len()
    }

    /// ECE を計算
    pub fn compute(&self, logits: &[f64], labels: &[u8]) -> Result<f64> {
        let total = logits.len() as f64;
        let ece = self
            .bin_stats(logits, labels)?
            .iter()
            .filter(|bin| bin.count > 0)
            .map(|bin| bin.gap() * (bin.count as f64 / total))
            .sum();
        Ok(ece)
    }

    /// ビンごとの集計（信頼度曲線用）
    pub fn bin_stats(&self, logits: &[f64], labels: &[u8]) -> Result<Vec<BinStat>> {
        check_aligned(logits, labels)?;

        let mut counts = vec![0usize; self.n_bins()];
        let mut correct = vec![0usize; self.n_bins()];
        let mut confidence_sums = vec![0.0f64; self.n_bins()];

        for (&logit, &label) in logits.iter().zip(labels) {
            let confidence = sigmoid(logit);
            let prediction = u8::from(confidence > 0.5);
            let Some(bin) = self.bin_index(confidence) else {
                continue;
            };
            counts[bin] += 1;
            confidence_sums[bin] += confidence;
            if prediction == label {
                correct[bin] += 1;
            }
        }

        let stats = (0..self.n_bins())
            .map(|bin| {
                let count = counts[bin];
                let (accuracy, confidence) = if count > 0 {
                    (
                        correct[bin] as f64 / count as f64,
                        confidence_sums[bin] / count as f64,
                    )
                } else {
                    (0.0, 0.0)
                };
                BinStat {
                    lower: self.bin_lowers[bin],
                    upper: self.bin_uppers[bin],
                    count,
                    accuracy,
                    confidence,
                }
            })
            .collect();
        Ok(stats)
    }

    /// `lower < confidence <= upper` を満たすビン
    fn bin_index(&self, confidence: f64) -> Option<usize> {
        self.bin_lowers
            .iter()
            .zip(&self.bin_uppers)
            .position(|(&lower, &upper)| confidence > lower && confidence <= upper)
    }
}

impl Default for EceLoss {
    fn default() -> Self {
        Self::with_bins(Self::DEFAULT_BINS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_bins_rejected() {
        assert!(matches!(EceLoss::new(0), Err(CalibrationError::InvalidBinCount)));
        assert_eq!(EceLoss::default().n_bins(), 15);
    }

    #[test]
    fn test_two_bin_scenario() {
        // 上側ビン: 確信度 0.881, 正解率 1.0 → 0.119 * 0.5
        // 下側ビン: 確信度 0.119, 正解率 1.0 → 0.881 * 0.5
        let ece = EceLoss::new(2).unwrap();
        let value = ece.compute(&[2.0, 2.0, -2.0, -2.0], &[1, 1, 0, 0]).unwrap();
        assert!((value - 0.5).abs() < 1e-9);

        let bins = ece.bin_stats(&[2.0, 2.0, -2.0, -2.0], &[1, 1, 0, 0]).unwrap();
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[1].count, 2);
        assert!((bins[1].confidence - sigmoid(2.0)).abs() < 1e-12);
        assert!((bins[0].accuracy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_perfectly_calibrated_is_zero() {
        // sigmoid(ln 3) = 0.75、4件中3件が正例 → 正解率 0.75
        let logit = 3.0f64.ln();
        let ece = EceLoss::default();
        let value = ece.compute(&[logit; 4], &[1, 1, 1, 0]).unwrap();
        assert!(value.abs() < 1e-12);

        // 確信度 1.0 で全問正解
        let value = ece.compute(&[50.0, 60.0], &[1, 1]).unwrap();
        assert!(value.abs() < 1e-12);
    }

    #[test]
    fn test_permutation_invariant() {
        let logits = [0.3, -1.2, 2.5, 0.9, -0.1, 4.0, -3.3];
        let labels = [1, 0, 1, 0, 1, 1, 0];
        let ece = EceLoss::new(10).unwrap();
        let base = ece.compute(&logits, &labels).unwrap();

        let order = [6, 2, 0, 5, 3, 1, 4];
        let permuted_logits: Vec<f64> = order.iter().map(|&i| logits[i]).collect();
        let permuted_labels: Vec<u8> = order.iter().map(|&i| labels[i]).collect();
        let permuted = ece.compute(&permuted_logits, &permuted_labels).unwrap();

        assert!((base - permuted).abs() < 1e-12);
    }

    #[test]
    fn test_bounded_in_unit_interval() {
        let ece = EceLoss::new(5).unwrap();
        let cases: Vec<(Vec<f64>, Vec<u8>)> = vec![
            (vec![10.0, 10.0, 10.0], vec![0, 0, 0]),
            (vec![-10.0, -10.0], vec![1, 1]),
            (vec![0.0, 0.01, -0.01, 7.0], vec![1, 0, 1, 0]),
        ];
        for (logits, labels) in &cases {
            let value = ece.compute(logits, labels).unwrap();
            assert!((0.0..=1.0).contains(&value), "ece={value}");
        }
    }

    #[test]
    fn test_zero_confidence_excluded_from_bins() {
        // sigmoid(-800) == 0.0 はどのビンにも入らないが、分母には含まれる
        let ece = EceLoss::new(2).unwrap();
        let bins = ece.bin_stats(&[-800.0, 2.0], &[0, 1]).unwrap();
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 1);

        let value = ece.compute(&[-800.0, 2.0], &[0, 1]).unwrap();
        assert!((value - (1.0 - sigmoid(2.0)) * 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_misaligned_input() {
        let ece = EceLoss::default();
        assert!(matches!(
            ece.compute(&[1.0], &[1, 0]),
            Err(CalibrationError::ShapeMismatch { .. })
        ));
        assert!(matches!(ece.compute(&[], &[]), Err(CalibrationError::NoSamples)));
        assert_eq!(
            ece.compute(&[], &[]).unwrap_err().to_string(),
            "Empty input: no logits to evaluate"
        );
    }
}
