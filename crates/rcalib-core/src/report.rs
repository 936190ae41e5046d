//! 診断出力
//!
//! 各コンポーネントは `Reporter` を受け取り、キャリブレーション前後の
//! NLL/ECE や選ばれた閾値をそこへ通知する。既定は `log` ファサードへ流す。

use crate::optim::StopReason;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// 通知イベント
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Report {
    /// 温度スケーリング前
    BeforeScaling { nll: f64, ece: f64 },
    /// 温度スケーリング後
    AfterScaling {
        nll: f64,
        ece: f64,
        temperature: f64,
        iterations: usize,
        stop: StopReason,
    },
    /// 閾値探索の結果
    ThresholdSelected {
        threshold: f64,
        score: f64,
        metric: String,
    },
}

/// 通知先
pub trait Reporter: Send {
    fn report(&self, report: &Report);
}

/// ログ1行分の表示文字列
pub fn message(report: &Report) -> String {
    match report {
        Report::BeforeScaling { nll, ece } => {
            format!("Before temperature - NLL: {nll:.3}, ECE: {ece:.3}")
        }
        Report::AfterScaling { nll, ece, .. } => {
            format!("After temperature - NLL: {nll:.3}, ECE: {ece:.3}")
        }
        Report::ThresholdSelected {
            threshold,
            score,
            metric,
        } => format!("Threshold={threshold:.3}, Validation {metric}={score:.5}"),
    }
}

/// `log` へ出力する通知先
///
/// 1イベントにつき info を1行出す。最適化の詳細は debug。
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, report: &Report) {
        log::info!("{}", message(report));
        if let Report::AfterScaling {
            temperature,
            iterations,
            stop,
            ..
        } = report
        {
            log::debug!(
                "temperature={temperature:.6}, iterations={iterations}, stop={stop:?}, \
                 converged={}",
                stop.is_converged()
            );
        }
    }
}

/// 通知をメモリに溜める通知先
///
/// クローンは同じバッファを共有する。
#[derive(Clone, Debug, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// これまでの通知のコピー
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, report: &Report) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.clone());
    }
}

/// 2つの通知先へ同じイベントを送る
impl<A: Reporter, B: Reporter> Reporter for (A, B) {
    fn report(&self, report: &Report) {
        self.0.report(report);
        self.1.report(report);
    }
}
