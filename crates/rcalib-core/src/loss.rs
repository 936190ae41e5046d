//! 負の対数尤度（BCE with logits）
//!
//! 温度スケーリングの目的関数。温度 `T` に関する勾配は解析的に求める:
//! `x = z / T` のとき `dL/dT = (sigmoid(x) - y) * (-z / T^2)`。

use crate::error::{CalibrationError, Result};

/// シグモイド関数
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// 1サンプル分のBCE（数値安定版）
#[inline]
fn bce_term(x: f64, y: f64) -> f64 {
    x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()
}

/// BCE with logits の平均値
pub fn bce_with_logits(logits: &[f64], labels: &[u8]) -> Result<f64> {
    check_aligned(logits, labels)?;
    let total: f64 = logits
        .iter()
        .zip(labels)
        .map(|(&x, &y)| bce_term(x, f64::from(y)))
        .sum();
    Ok(total / logits.len() as f64)
}

/// `logits / temperature` に対する BCE と、その温度に関する勾配
///
/// 戻り値: (loss, d(loss)/d(temperature))
pub fn temperature_nll(logits: &[f64], labels: &[u8], temperature: f64) -> (f64, f64) {
    debug_assert_eq!(logits.len(), labels.len());
    if logits.is_empty() {
        return (0.0, 0.0);
    }

    let t_sq = temperature * temperature;
    let mut loss = 0.0;
    let mut grad = 0.0;
    for (&z, &y) in logits.iter().zip(labels) {
        let x = z / temperature;
        let y = f64::from(y);
        loss += bce_term(x, y);
        grad += (sigmoid(x) - y) * (-z / t_sq);
    }

    let n = logits.len() as f64;
    (loss / n, grad / n)
}

/// ロジットとラベルが同じ長さで空でないことを確認
pub(crate) fn check_aligned(logits: &[f64], labels: &[u8]) -> Result<()> {
    if logits.len() != labels.len() {
        return Err(CalibrationError::ShapeMismatch {
            logits: logits.len(),
            labels: labels.len(),
        });
    }
    if logits.is_empty() {
        return Err(CalibrationError::NoSamples);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(100.0) > 0.99);
        assert!(sigmoid(-100.0) < 0.01);
        // 大きな負値では厳密に 0 になる
        assert_eq!(sigmoid(-800.0), 0.0);
    }

    #[test]
    fn test_bce_matches_naive_formula() {
        let logits = [2.0, -1.0, 0.5];
        let labels = [1, 0, 0];
        let naive: f64 = logits
            .iter()
            .zip(labels)
            .map(|(&x, y)| {
                let p = sigmoid(x);
                if y == 1 { -p.ln() } else { -(1.0 - p).ln() }
            })
            .sum::<f64>()
            / 3.0;
        let loss = bce_with_logits(&logits, &labels).unwrap();
        assert!((loss - naive).abs() < 1e-12);
    }

    #[test]
    fn test_bce_is_stable_for_extreme_logits() {
        let loss = bce_with_logits(&[1000.0, -1000.0], &[1, 0]).unwrap();
        assert!(loss.is_finite());
        assert!(loss < 1e-12);
    }

    #[test]
    fn test_bce_rejects_mismatch_and_empty() {
        assert!(matches!(
            bce_with_logits(&[1.0, 2.0], &[1]),
            Err(CalibrationError::ShapeMismatch { logits: 2, labels: 1 })
        ));
        assert!(matches!(bce_with_logits(&[], &[]), Err(CalibrationError::NoSamples)));
    }

    #[test]
    fn test_temperature_gradient_matches_finite_difference() {
        let logits = [3.0, -2.5, 4.0, 0.7, -6.0];
        let labels = [1, 0, 0, 1, 1];
        let t = 1.5;
        let h = 1e-6;

        let (_, grad) = temperature_nll(&logits, &labels, t);
        let (plus, _) = temperature_nll(&logits, &labels, t + h);
        let (minus, _) = temperature_nll(&logits, &labels, t - h);
        let numeric = (plus - minus) / (2.0 * h);

        assert!((grad - numeric).abs() < 1e-6);
    }

    #[test]
    fn test_temperature_one_equals_plain_bce() {
        let logits = [0.3, -0.2, 1.7];
        let labels = [1, 1, 0];
        let (loss, _) = temperature_nll(&logits, &labels, 1.0);
        assert!((loss - bce_with_logits(&logits, &labels).unwrap()).abs() < 1e-12);
    }
}
