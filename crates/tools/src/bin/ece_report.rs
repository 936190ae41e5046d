//! ECE レポート
//!
//! ロジットファイルのビン別の信頼度と正解率、ECE と NLL を表示する。
//! `--temperature` を指定するとその温度で割ったロジットで評価する。

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rcalib_core::loss::bce_with_logits;
use rcalib_core::{BinStat, EceLoss, LogitPassthrough, TemperatureScaling};
use serde::Serialize;
use tools::dataset::LogitDataset;

#[derive(Parser, Debug)]
#[command(author, version, about = "Report ECE and a per-bin reliability table for a logits file")]
struct Cli {
    /// 入力（JSONL、.gz 可、`-` で標準入力）
    #[arg(short, long)]
    input: PathBuf,

    /// ビン数
    #[arg(long, default_value_t = EceLoss::DEFAULT_BINS)]
    n_bins: usize,

    /// 評価に使う温度（省略時は生のロジット）
    #[arg(long)]
    temperature: Option<f64>,

    /// 読み込むサンプル数の上限
    #[arg(long)]
    limit: Option<usize>,

    /// 表の代わりに JSON で出力
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct EceSummary {
    samples: usize,
    temperature: f64,
    nll: f64,
    ece: f64,
    bins: Vec<BinStat>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let ece = EceLoss::new(cli.n_bins).context("--n-bins must be >= 1")?;
    let dataset = LogitDataset::load(&cli.input, cli.limit)?;
    if dataset.is_empty() {
        bail!("No valid samples in {}", cli.input.display());
    }

    let temperature = cli.temperature.unwrap_or(1.0);
    let mut scaling = TemperatureScaling::new(LogitPassthrough);
    scaling
        .set_temperature(temperature)
        .with_context(|| format!("Invalid --temperature {temperature}"))?;
    let logits = scaling.rescale(dataset.logits());
    let labels = dataset.labels();

    let summary = EceSummary {
        samples: dataset.len(),
        temperature,
        nll: bce_with_logits(&logits, labels)?,
        ece: ece.compute(&logits, labels)?,
        bins: ece.bin_stats(&logits, labels)?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_table(&summary);
    Ok(())
}

fn print_table(summary: &EceSummary) {
    println!(
        "samples={} temperature={:.4} NLL={:.5} ECE={:.5}",
        summary.samples, summary.temperature, summary.nll, summary.ece
    );
    println!();
    println!(
        "{:>13} {:>8} {:>10} {:>10} {:>8}",
        "bin", "count", "confidence", "accuracy", "gap"
    );
    println!("{}", "=".repeat(53));
    for bin in &summary.bins {
        if bin.count == 0 {
            println!(
                "({:.3}, {:.3}] {:>8} {:>10} {:>10} {:>8}",
                bin.lower, bin.upper, 0, "-", "-", "-"
            );
            continue;
        }
        println!(
            "({:.3}, {:.3}] {:>8} {:>10.4} {:>10.4} {:>8.4}",
            bin.lower,
            bin.upper,
            bin.count,
            bin.confidence,
            bin.accuracy,
            bin.gap()
        );
    }
}
