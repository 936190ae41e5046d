//! キャリブレーション用コマンドラインツールの共通部分

pub mod common;
pub mod dataset;
