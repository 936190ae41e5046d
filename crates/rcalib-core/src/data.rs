//! 検証データソース
//!
//! キャリブレーションは検証データの先頭 `floor(num_batches * val_fraction)` バッチを使う。
//! バッチはシャッフル後の反復順の先頭から取る（全体からの無作為抽出ではない）ので、
//! 異なる `val_fraction` で選ばれるサブセットは入れ子になるとは限らない。

use crate::error::{CalibrationError, Result};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// 入力とラベルの組
#[derive(Clone, Debug, PartialEq)]
pub struct Batch<I> {
    pub inputs: I,
    /// 0/1 のラベル（入力と同じ順序）
    pub labels: Vec<u8>,
}

/// バッチのイテレータ
pub type BatchIter<'a, I> = Box<dyn Iterator<Item = Batch<I>> + 'a>;

/// 検証用のバッチを供給するデータソース
pub trait ValidationSource {
    type Input;

    /// 検証バッチのイテレータ
    ///
    /// `shuffle` が真なら呼び出しごとに並びを変える。偽なら元の順序で返す。
    /// シャッフルはデータソースが保持する順序を変えない。
    fn val_batches(&mut self, shuffle: bool) -> BatchIter<'_, Self::Input>;

    /// バッチ総数
    fn num_batches(&self) -> usize;
}

/// メモリ上のサンプル列をバッチ化するデータソース
pub struct InMemorySource<S> {
    samples: Vec<(S, u8)>,
    batch_size: usize,
    rng: ChaCha8Rng,
}

impl<S: Clone> InMemorySource<S> {
    pub fn new(inputs: Vec<S>, labels: Vec<u8>, batch_size: usize, seed: u64) -> Result<Self> {
        if inputs.len() != labels.len() {
            return Err(CalibrationError::ShapeMismatch {
                logits: inputs.len(),
                labels: labels.len(),
            });
        }
        if batch_size == 0 {
            return Err(CalibrationError::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(Self {
            samples: inputs.into_iter().zip(labels).collect(),
            batch_size,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// サンプル数
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<S: Clone> ValidationSource for InMemorySource<S> {
    type Input = Vec<S>;

    fn val_batches(&mut self, shuffle: bool) -> BatchIter<'_, Vec<S>> {
        // 呼び出しごとの添字の並び替え（samples 自体は入力順のまま）
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if shuffle {
            order.shuffle(&mut self.rng);
        }
        let samples = &self.samples;
        let batch_size = self.batch_size;
        let num_batches = self.num_batches();
        Box::new((0..num_batches).map(move |b| {
            let start = b * batch_size;
            let end = (start + batch_size).min(order.len());
            let chunk = &order[start..end];
            Batch {
                inputs: chunk.iter().map(|&i| samples[i].0.clone()).collect(),
                labels: chunk.iter().map(|&i| samples[i].1).collect(),
            }
        }))
    }

    fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }
}

/// 検証サブセットから集めたロジットとラベル（添字で対応）
#[derive(Clone, Debug, Default)]
pub struct ValidationSet {
    pub logits: Vec<f64>,
    pub labels: Vec<u8>,
}

impl ValidationSet {
    pub fn len(&self) -> usize {
        self.logits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logits.is_empty()
    }
}

/// `val_fraction` が (0, 1] に入っているか確認
pub fn check_fraction(val_fraction: f64) -> Result<()> {
    if val_fraction.is_finite() && val_fraction > 0.0 && val_fraction <= 1.0 {
        Ok(())
    } else {
        Err(CalibrationError::InvalidFraction(val_fraction))
    }
}

/// 使用するバッチ数 `floor(available * val_fraction)`
pub fn batch_limit(available: usize, val_fraction: f64) -> usize {
    (available as f64 * val_fraction).floor() as usize
}

/// シャッフル順の先頭からバッチを取り、`forward` の出力とラベルを連結する
pub(crate) fn collect_validation<S, F>(
    source: &mut S,
    val_fraction: f64,
    mut forward: F,
) -> Result<ValidationSet>
where
    S: ValidationSource + ?Sized,
    F: FnMut(&S::Input) -> Vec<f64>,
{
    check_fraction(val_fraction)?;

    let available = source.num_batches();
    let selected = batch_limit(available, val_fraction);

    let mut set = ValidationSet::default();
    let mut batches = 0;
    for batch in source.val_batches(true).take(selected) {
        let logits = forward(&batch.inputs);
        if logits.len() != batch.labels.len() {
            return Err(CalibrationError::ShapeMismatch {
                logits: logits.len(),
                labels: batch.labels.len(),
            });
        }
        for (offset, &value) in logits.iter().enumerate() {
            if !value.is_finite() {
                return Err(CalibrationError::NonFiniteLogit {
                    index: set.logits.len() + offset,
                    value,
                });
            }
        }
        if let Some(&label) = batch.labels.iter().find(|&&label| label > 1) {
            return Err(CalibrationError::InvalidLabel(label));
        }
        set.logits.extend_from_slice(&logits);
        set.labels.extend_from_slice(&batch.labels);
        batches += 1;
    }

    if batches == 0 || set.is_empty() {
        return Err(CalibrationError::EmptyInput {
            available,
            selected,
        });
    }

    log::debug!(
        "collected {} samples from {batches}/{available} batches (val_fraction={val_fraction})",
        set.len()
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(n: usize, batch_size: usize) -> InMemorySource<f64> {
        let inputs: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let labels: Vec<u8> = (0..n).map(|i| (i % 2) as u8).collect();
        InMemorySource::new(inputs, labels, batch_size, 42).unwrap()
    }

    #[test]
    fn test_num_batches_rounds_up() {
        assert_eq!(source(10, 3).num_batches(), 4);
        assert_eq!(source(9, 3).num_batches(), 3);
        assert_eq!(source(0, 3).num_batches(), 0);
    }

    #[test]
    fn test_shuffle_keeps_alignment() {
        let mut src = source(50, 7);
        for batch in src.val_batches(true) {
            for (input, label) in batch.inputs.iter().zip(&batch.labels) {
                assert_eq!((*input as usize % 2) as u8, *label);
            }
        }
    }

    #[test]
    fn test_unshuffled_order_is_stable() {
        let mut src = source(5, 2);
        let first: Vec<f64> = src.val_batches(false).flat_map(|b| b.inputs).collect();
        assert_eq!(first, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_shuffle_does_not_change_source_order() {
        let mut src = source(8, 3);
        let shuffled: Vec<f64> = src.val_batches(true).flat_map(|b| b.inputs).collect();
        let mut sorted = shuffled.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted, (0..8).map(f64::from).collect::<Vec<_>>());

        let ordered: Vec<f64> = src.val_batches(false).flat_map(|b| b.inputs).collect();
        assert_eq!(ordered, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let labels: Vec<u8> = src.val_batches(false).flat_map(|b| b.labels).collect();
        assert_eq!(labels, vec![0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_batch_limit_floors() {
        assert_eq!(batch_limit(10, 0.25), 2);
        assert_eq!(batch_limit(3, 0.2), 0);
        assert_eq!(batch_limit(7, 1.0), 7);
    }

    #[test]
    fn test_check_fraction() {
        assert!(check_fraction(0.5).is_ok());
        assert!(check_fraction(1.0).is_ok());
        assert!(check_fraction(0.0).is_err());
        assert!(check_fraction(1.5).is_err());
        assert!(check_fraction(f64::NAN).is_err());
    }

    #[test]
    fn test_collect_takes_prefix_of_batches() {
        let mut src = source(10, 2);
        let set = collect_validation(&mut src, 0.6, |inputs: &Vec<f64>| inputs.clone())
            .unwrap();
        // floor(5 * 0.6) = 3 バッチ = 6 サンプル
        assert_eq!(set.len(), 6);
        assert_eq!(set.labels.len(), 6);
    }

    #[test]
    fn test_collect_empty_subset_is_error() {
        let mut src = source(6, 2);
        let err = collect_validation(&mut src, 0.2, |inputs: &Vec<f64>| inputs.clone())
            .unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::EmptyInput {
                available: 3,
                selected: 0
            }
        ));
    }

    #[test]
    fn test_collect_detects_shape_mismatch() {
        let mut src = source(4, 2);
        let err = collect_validation(&mut src, 1.0, |_: &Vec<f64>| vec![0.0]).unwrap_err();
        assert!(matches!(err, CalibrationError::ShapeMismatch { logits: 1, labels: 2 }));
    }

    #[test]
    fn test_collect_rejects_bad_values() {
        let mut src = source(4, 4);
        let err = collect_validation(&mut src, 1.0, |inputs: &Vec<f64>| {
            inputs.iter().map(|_| f64::NAN).collect()
        })
        .unwrap_err();
        assert!(matches!(err, CalibrationError::NonFiniteLogit { index: 0, .. }));

        let mut src = InMemorySource::new(vec![0.0, 1.0], vec![0, 2], 2, 0).unwrap();
        let err = collect_validation(&mut src, 1.0, |inputs: &Vec<f64>| inputs.clone())
            .unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidLabel(2)));
    }

    #[test]
    fn test_mismatched_source_rejected() {
        assert!(InMemorySource::new(vec![1.0, 2.0], vec![1], 1, 0).is_err());
        assert!(InMemorySource::new(vec![1.0], vec![1], 0, 0).is_err());
    }
}
