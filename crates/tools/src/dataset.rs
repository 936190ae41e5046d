//! 検証データセット
//!
//! 1行1サンプルの JSONL（`{"logit": 2.3, "label": 1}`）を読み込む。
//! `.gz` なら gzip として展開し、`-` なら標準入力から読む。

use crate::common::io::open_input;
use anyhow::{Context, Result};
use rcalib_core::InMemorySource;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;

/// JSONL の1レコード
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogitRecord {
    /// モデルの生ロジット
    pub logit: f64,
    /// 正解ラベル（0 または 1）
    pub label: u8,
}

/// ロジットとラベルの列
#[derive(Clone, Debug, Default)]
pub struct LogitDataset {
    logits: Vec<f64>,
    labels: Vec<u8>,
}

impl LogitDataset {
    /// JSONLファイルから読み込み
    ///
    /// 空行は読み飛ばす。ラベルが 0/1 以外の行は警告を出して除外する。
    pub fn load<P: AsRef<Path>>(path: P, limit: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        let reader =
            open_input(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(reader, limit)
            .with_context(|| format!("Failed to load {}", path.display()))
    }

    pub fn from_reader<R: BufRead>(reader: R, limit: Option<usize>) -> Result<Self> {
        let mut dataset = Self::default();
        let mut skipped = 0usize;

        for (i, line) in reader.lines().enumerate() {
            if limit.is_some_and(|lim| dataset.len() >= lim) {
                break;
            }

            let line = line.with_context(|| format!("Failed to read line {}", i + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogitRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse line {}: {line}", i + 1))?;

            if record.label > 1 {
                log::warn!(
                    "Skipping line {}: label must be 0 or 1, got {}",
                    i + 1,
                    record.label
                );
                skipped += 1;
                continue;
            }
            dataset.logits.push(record.logit);
            dataset.labels.push(record.label);
        }

        log::info!("Loaded {} samples ({skipped} skipped)", dataset.len());
        Ok(dataset)
    }

    /// サンプル数
    pub fn len(&self) -> usize {
        self.logits.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.logits.is_empty()
    }

    pub fn logits(&self) -> &[f64] {
        &self.logits
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// 正例の割合
    pub fn positive_rate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&y| y == 1).count() as f64 / self.len() as f64
    }

    /// バッチ化した検証データソースに変換
    pub fn into_source(self, batch_size: usize, seed: u64) -> Result<InMemorySource<f64>> {
        InMemorySource::new(self.logits, self.labels, batch_size, seed)
            .context("Failed to build validation source")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcalib_core::ValidationSource;
    use std::io::Write;

    fn write_jsonl(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn test_load_skips_invalid_labels_and_blank_lines() {
        let file = write_jsonl(&[
            r#"{"logit": 2.5, "label": 1}"#,
            "",
            r#"{"logit": -1.0, "label": 0}"#,
            r#"{"logit": 0.3, "label": 2}"#,
            r#"{"logit": 0.7, "label": 1}"#,
        ]);
        let dataset = LogitDataset::load(file.path(), None).unwrap();
        assert_eq!(dataset.logits(), &[2.5, -1.0, 0.7]);
        assert_eq!(dataset.labels(), &[1, 0, 1]);
        assert!((dataset.positive_rate() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_load_respects_limit() {
        let file = write_jsonl(&[
            r#"{"logit": 1.0, "label": 1}"#,
            r#"{"logit": 2.0, "label": 0}"#,
            r#"{"logit": 3.0, "label": 1}"#,
        ]);
        let dataset = LogitDataset::load(file.path(), Some(2)).unwrap();
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_malformed_line_is_error() {
        let file = write_jsonl(&[r#"{"logit": 1.0, "label": 1}"#, "not json"]);
        let err = LogitDataset::load(file.path(), None).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_into_source_batches() {
        let jsonl = concat!(
            "{\"logit\": 1.0, \"label\": 1}\n",
            "{\"logit\": -1.0, \"label\": 0}\n",
            "{\"logit\": 0.5, \"label\": 1}\n",
        );
        let dataset = LogitDataset::from_reader(jsonl.as_bytes(), None).unwrap();
        let source = dataset.into_source(2, 0).unwrap();
        assert_eq!(source.num_batches(), 2);
        assert_eq!(source.len(), 3);
    }
}
