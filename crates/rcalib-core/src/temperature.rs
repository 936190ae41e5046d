//! 温度スケーリング
//!
//! 学習済みモデルのロジットを単一のスカラー `T` で割り、`sigmoid(logit / T)` が
//! 経験的な正解率に近づくように `T` を検証データ上の NLL 最小化で求める。
//! 決定境界（ロジットの符号と順位）は変わらない。
//!
//! ECE は前後比較のための診断値であり、最適化には使わない。

use crate::config::{CalibrationConfig, TemperatureConfig};
use crate::data::{ValidationSource, collect_validation};
use crate::ece::EceLoss;
use crate::error::{CalibrationError, Result};
use crate::loss::{bce_with_logits, sigmoid, temperature_nll};
use crate::model::{CalibratedModel, Device, LogitModel};
use crate::optim::Lbfgs;
use crate::report::{LogReporter, Report, Reporter};
use crate::threshold::to_labels;

/// 温度スケーリングによるキャリブレータ
pub struct TemperatureScaling<M> {
    model: M,
    temperature: f64,
    device: Device,
    config: TemperatureConfig,
    ece: EceLoss,
    reporter: Box<dyn Reporter>,
}

impl<M: LogitModel> TemperatureScaling<M> {
    /// 既定設定（初期温度 1.5、lr 0.01、最大 50 反復、ECE 15 ビン）で作成
    pub fn new(model: M) -> Self {
        Self::from_parts(model, TemperatureConfig::default(), EceLoss::default())
    }

    /// 設定を指定して作成
    pub fn with_config(model: M, config: &CalibrationConfig) -> Result<Self> {
        config.validate()?;
        let ece = EceLoss::new(config.ece.n_bins)?;
        Ok(Self::from_parts(model, config.temperature.clone(), ece))
    }

    fn from_parts(model: M, config: TemperatureConfig, ece: EceLoss) -> Self {
        // 温度はモデルと同じデバイスに置く
        let device = model.device();
        log::debug!("temperature scaling on {device}, initial T={}", config.initial);
        Self {
            model,
            temperature: config.initial,
            device,
            config,
            ece,
            reporter: Box::new(LogReporter),
        }
    }

    /// 通知先を差し替える
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// 既知の温度を設定する
    pub fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        if !temperature.is_finite() || temperature == 0.0 {
            return Err(CalibrationError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// ロジットを温度で割る
    pub fn rescale(&self, logits: &[f64]) -> Vec<f64> {
        logits.iter().map(|&z| z / self.temperature).collect()
    }

    /// 検証データで温度を最適化する
    ///
    /// シャッフル後の先頭 `floor(num_batches * val_fraction)` バッチを使い、
    /// NLL が最小になるよう L-BFGS で温度を更新する。
    /// 最適化前後の NLL/ECE を通知し、最適化後の温度を返す。
    pub fn fit<S>(&mut self, source: &mut S, val_fraction: f64) -> Result<f64>
    where
        S: ValidationSource<Input = M::Input> + ?Sized,
    {
        let model = &self.model;
        let set = collect_validation(source, val_fraction, |inputs| model.forward(inputs))?;

        let before_nll = bce_with_logits(&set.logits, &set.labels)?;
        let before_ece = self.ece.compute(&set.logits, &set.labels)?;
        self.reporter.report(&Report::BeforeScaling {
            nll: before_nll,
            ece: before_ece,
        });

        // NLL のみを目的関数とする
        let optimizer = Lbfgs::new(self.config.lbfgs_params());
        let mut params = [self.temperature];
        let outcome = optimizer.minimize(&mut params, |p, grad| {
            let (loss, d_temperature) = temperature_nll(&set.logits, &set.labels, p[0]);
            grad[0] = d_temperature;
            loss
        });

        let fitted = params[0];
        if !fitted.is_finite() || fitted == 0.0 {
            return Err(CalibrationError::InvalidTemperature(fitted));
        }
        self.temperature = fitted;

        let scaled = self.rescale(&set.logits);
        let after_nll = bce_with_logits(&scaled, &set.labels)?;
        let after_ece = self.ece.compute(&scaled, &set.labels)?;
        self.reporter.report(&Report::AfterScaling {
            nll: after_nll,
            ece: after_ece,
            temperature: self.temperature,
            iterations: outcome.iterations,
            stop: outcome.stop,
        });

        Ok(self.temperature)
    }

    /// キャリブレーション済みの陽性確率
    pub fn predict_proba(&self, inputs: &M::Input) -> Vec<f64> {
        self.calibrated_forward(inputs).into_iter().map(sigmoid).collect()
    }

    /// キャリブレーション済み確率を閾値で 0/1 に変換
    pub fn predict(&self, inputs: &M::Input, threshold: f64) -> Vec<u8> {
        to_labels(&self.predict_proba(inputs), threshold)
    }
}

impl<M: LogitModel> LogitModel for TemperatureScaling<M> {
    type Input = M::Input;

    fn forward(&self, inputs: &Self::Input) -> Vec<f64> {
        self.model.forward(inputs)
    }

    fn device(&self) -> Device {
        self.device
    }
}

impl<M: LogitModel> CalibratedModel for TemperatureScaling<M> {
    fn calibrated_forward(&self, inputs: &Self::Input) -> Vec<f64> {
        self.rescale(&self.model.forward(inputs))
    }
}
