//! 勾配ベースの最適化

pub mod lbfgs;

pub use lbfgs::{Lbfgs, LbfgsOutcome, LbfgsParams, LineSearch, StopReason};
