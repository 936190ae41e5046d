//! 分類モデルの抽象
//!
//! キャリブレーション対象のモデルは「入力から生のロジットを返す」能力と
//! 「配置されている計算デバイスを報告する」能力だけを持てばよい。

use serde::Serialize;
use std::fmt;

/// 計算デバイス
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Device {
    #[default]
    Cpu,
    /// アクセラレータ（インデックス付き）
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(index) => write!(f, "accelerator:{index}"),
        }
    }
}

/// 生のロジットを出力する2値分類モデル
pub trait LogitModel {
    /// バッチ入力の型
    type Input;

    /// 順伝播（シグモイド適用前のロジットを1サンプル1要素で返す）
    fn forward(&self, inputs: &Self::Input) -> Vec<f64>;

    /// モデルが配置されているデバイス
    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// 温度スケーリング済みのロジットを出力できるモデル
pub trait CalibratedModel: LogitModel {
    fn calibrated_forward(&self, inputs: &Self::Input) -> Vec<f64>;
}

impl<M: LogitModel + ?Sized> LogitModel for &M {
    type Input = M::Input;

    fn forward(&self, inputs: &Self::Input) -> Vec<f64> {
        (**self).forward(inputs)
    }

    fn device(&self) -> Device {
        (**self).device()
    }
}

impl<M: CalibratedModel + ?Sized> CalibratedModel for &M {
    fn calibrated_forward(&self, inputs: &Self::Input) -> Vec<f64> {
        (**self).calibrated_forward(inputs)
    }
}

/// 入力がすでにロジットであるモデル
///
/// 推論済みのロジットをファイルから読み込んで後処理だけ行う場合に使う。
#[derive(Clone, Copy, Debug, Default)]
pub struct LogitPassthrough;

impl LogitModel for LogitPassthrough {
    type Input = Vec<f64>;

    fn forward(&self, inputs: &Self::Input) -> Vec<f64> {
        inputs.clone()
    }
}

/// 線形モデル（ロジスティック回帰）
///
/// 各行は `weights.len()` 個の特徴量を持つこと。特徴量の数が合わない行の
/// ロジットは NaN になり、`fit` や閾値探索では `NonFiniteLogit` として弾かれる。
#[derive(Clone, Debug)]
pub struct LinearModel {
    weights: Vec<f64>,
    bias: f64,
    device: Device,
}

impl LinearModel {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self {
            weights,
            bias,
            device: Device::Cpu,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }
}

impl LogitModel for LinearModel {
    type Input = Vec<Vec<f64>>;

    fn forward(&self, inputs: &Self::Input) -> Vec<f64> {
        inputs
            .iter()
            .map(|row| {
                if row.len() != self.weights.len() {
                    log::debug!(
                        "row has {} features, expected {}",
                        row.len(),
                        self.weights.len()
                    );
                    return f64::NAN;
                }
                row.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>() + self.bias
            })
            .collect()
    }

    fn device(&self) -> Device {
        self.device
    }
}
