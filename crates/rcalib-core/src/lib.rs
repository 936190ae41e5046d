//! 2値分類器の事後キャリブレーション
//!
//! - [`temperature::TemperatureScaling`]: ロジットを単一の温度で割り、検証データ上の
//!   NLL を L-BFGS で最小化して確率を較正する
//! - [`ece::EceLoss`]: 等幅ビンによる Expected Calibration Error
//! - [`threshold::ThresholdMoving`]: 任意の指標を最大化する判定閾値の格子探索
//!
//! モデルは [`model::LogitModel`]、検証データは [`data::ValidationSource`] として渡す。
//! 診断値は [`report::Reporter`] に通知され、既定では `log` に出力される。

pub mod config;
pub mod data;
pub mod ece;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod report;
pub mod temperature;
pub mod threshold;

pub use config::CalibrationConfig;
pub use data::{Batch, BatchIter, InMemorySource, ValidationSource};
pub use ece::{BinStat, EceLoss};
pub use error::{CalibrationError, Result};
pub use metrics::Metric;
pub use model::{CalibratedModel, Device, LinearModel, LogitModel, LogitPassthrough};
pub use report::{LogReporter, RecordingReporter, Report, Reporter};
pub use temperature::TemperatureScaling;
pub use threshold::{ThresholdCurve, ThresholdMoving};
