//! 温度スケーリングツール
//!
//! JSONL のロジットとラベルから温度を推定し、必要なら判定閾値も探索する。
//!
//! ```bash
//! cargo run -p tools --bin calibrate -- \
//!     --input val_logits.jsonl.gz --val-fraction 0.5 --search-threshold --metric f1
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rcalib_core::{
    CalibrationConfig, InMemorySource, LogReporter, LogitPassthrough, Metric, RecordingReporter,
    Report, TemperatureScaling, ThresholdMoving, ValidationSource,
};
use serde::Serialize;
use tools::common::io::OutputSink;
use tools::dataset::{LogitDataset, LogitRecord};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Fit a temperature and a decision threshold on validation logits"
)]
struct Cli {
    /// 検証データ（JSONL、.gz 可、`-` で標準入力）
    #[arg(short, long)]
    input: PathBuf,

    /// 設定ファイル（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 使用するバッチの割合 (0, 1]
    #[arg(long)]
    val_fraction: Option<f64>,

    /// バッチサイズ
    #[arg(long)]
    batch_size: Option<usize>,

    /// シャッフル用シード
    #[arg(long)]
    seed: Option<u64>,

    /// ECE のビン数
    #[arg(long)]
    n_bins: Option<usize>,

    /// 温度の初期値
    #[arg(long)]
    initial_temperature: Option<f64>,

    /// 温度推定後に閾値を探索する
    #[arg(long, default_value_t = false)]
    search_threshold: bool,

    /// 閾値探索の指標（f1, f2, accuracy, balanced-accuracy）
    #[arg(long, default_value = "f1")]
    metric: Metric,

    /// 結果のJSON出力先（省略時は標準出力）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 温度で割ったロジットを JSONL で書き出す
    #[arg(long)]
    rescaled_output: Option<PathBuf>,

    /// 読み込むサンプル数の上限
    #[arg(long)]
    limit: Option<usize>,

    /// デバッグログを有効化
    #[arg(long, default_value_t = false)]
    debug: bool,
}

impl Cli {
    /// 設定ファイルを読み、CLI で指定された値で上書きする
    fn resolve_config(&self) -> Result<CalibrationConfig> {
        let mut config = match &self.config {
            Some(path) => CalibrationConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => CalibrationConfig::default(),
        };
        if let Some(v) = self.val_fraction {
            config.val_fraction = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.n_bins {
            config.ece.n_bins = v;
        }
        if let Some(v) = self.initial_temperature {
            config.temperature.initial = v;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// 標準出力へ書く結果
#[derive(Serialize)]
struct Summary {
    input: String,
    samples: usize,
    positive_rate: f64,
    val_fraction: f64,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<ThresholdSummary>,
    reports: Vec<Report>,
}

#[derive(Serialize)]
struct ThresholdSummary {
    metric: String,
    threshold: f64,
    score: f64,
    /// 閾値 0.5 での指標値（比較用）
    score_at_half: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    let config = cli.resolve_config()?;

    let dataset = LogitDataset::load(&cli.input, cli.limit)?;
    if dataset.is_empty() {
        bail!("No valid samples in {}", cli.input.display());
    }
    let samples = dataset.len();
    let positive_rate = dataset.positive_rate();
    log::info!("Positive rate: {:.2}%", positive_rate * 100.0);

    let mut source = dataset.into_source(config.batch_size, config.seed)?;

    let recorder = RecordingReporter::new();
    let mut calibrator = TemperatureScaling::with_config(LogitPassthrough, &config)?
        .with_reporter((LogReporter, recorder.clone()));
    let temperature = calibrator
        .fit(&mut source, config.val_fraction)
        .context("Temperature scaling failed")?;
    log::info!("Fitted temperature: {temperature:.6}");

    let threshold = if cli.search_threshold {
        let metric = cli.metric;
        let moving = ThresholdMoving::with_config(&calibrator, &config)?
            .with_reporter((LogReporter, recorder.clone()))
            .with_metric_label(metric.label());
        let curve = moving
            .search_with_scores(|y, p| metric.score(y, p), &mut source, config.val_fraction)
            .context("Threshold search failed")?;
        let half = curve
            .thresholds
            .iter()
            .position(|&t| t >= 0.5)
            .unwrap_or(curve.best_index);
        Some(ThresholdSummary {
            metric: metric.to_string(),
            threshold: curve.best_threshold(),
            score: curve.best_score(),
            score_at_half: curve.scores[half],
        })
    } else {
        None
    };

    if let Some(path) = &cli.rescaled_output {
        write_rescaled(&calibrator, &mut source, path)?;
    }

    let summary = Summary {
        input: cli.input.display().to_string(),
        samples,
        positive_rate,
        val_fraction: config.val_fraction,
        temperature,
        threshold,
        reports: recorder.reports(),
    };

    let output = cli.output.clone().unwrap_or_else(|| PathBuf::from("-"));
    let mut sink = OutputSink::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    serde_json::to_writer_pretty(&mut sink, &summary)?;
    writeln!(sink)?;
    sink.finish()
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(())
}

/// 全サンプルの温度スケーリング後ロジットを JSONL で書き出す
fn write_rescaled(
    calibrator: &TemperatureScaling<LogitPassthrough>,
    source: &mut InMemorySource<f64>,
    path: &Path,
) -> Result<()> {
    let mut sink =
        OutputSink::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut written = 0usize;
    for batch in source.val_batches(false) {
        for (logit, label) in calibrator.rescale(&batch.inputs).into_iter().zip(batch.labels) {
            serde_json::to_writer(&mut sink, &LogitRecord { logit, label })?;
            writeln!(sink)?;
            written += 1;
        }
    }
    sink.finish()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("Wrote {written} rescaled logits to {}", path.display());
    Ok(())
}
