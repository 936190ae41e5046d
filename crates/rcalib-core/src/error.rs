//! キャリブレーション処理のエラー型

/// キャリブレーション関連のエラー
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    /// 検証サブセットが空（val_fraction が小さすぎる、またはデータソースが空）
    #[error("Empty validation subset: selected {selected} of {available} batches")]
    EmptyInput { available: usize, selected: usize },

    /// 評価対象のロジットが空
    #[error("Empty input: no logits to evaluate")]
    NoSamples,

    /// ロジットとラベルの件数不一致
    #[error("Shape mismatch: {logits} logits vs {labels} labels")]
    ShapeMismatch { logits: usize, labels: usize },

    /// val_fraction が (0, 1] の範囲外
    #[error("val_fraction must be in (0, 1], got {0}")]
    InvalidFraction(f64),

    /// ECE のビン数が 0
    #[error("n_bins must be positive")]
    InvalidBinCount,

    /// 閾値グリッドのサイズが 0
    #[error("threshold grid_size must be positive")]
    InvalidGridSize,

    /// 0/1 以外のラベル
    #[error("Label must be 0 or 1, got {0}")]
    InvalidLabel(u8),

    /// 有限でないロジット
    #[error("Non-finite logit at index {index}: {value}")]
    NonFiniteLogit { index: usize, value: f64 },

    /// 温度が 0 または有限でない
    #[error("Invalid temperature: {0}")]
    InvalidTemperature(f64),

    /// 設定値の検証エラー
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// TOML のパースエラー
    #[error(transparent)]
    Config(#[from] toml::de::Error),

    /// File I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for calibration operations
pub type Result<T> = std::result::Result<T, CalibrationError>;
