//! L-BFGS（記憶制限付き準ニュートン法）
//!
//! 目的関数はクロージャで与える。クロージャは現在のパラメータを受け取り、
//! 勾配バッファを上書きして損失を返す（勾配は毎回ゼロから計算し直すこと）。
//!
//! ステップ幅の決め方:
//! - 1反復目: `min(1, 1/|g|_1) * lr`
//! - 2反復目以降: `lr`
//!
//! `LineSearch::Backtracking` ではこのステップ幅を初期値として Armijo 条件を
//! 満たすまで半減させるため、受理された反復で損失が増えることはない。

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 曲率ペア (s, y) を履歴に積むための下限
const CURVATURE_EPS: f64 = 1e-10;
/// Armijo 条件の係数
const ARMIJO_C1: f64 = 1e-4;
/// バックトラック時の縮小率
const BACKTRACK_SHRINK: f64 = 0.5;
/// バックトラックの最大試行回数
const MAX_BACKTRACKS: usize = 30;

/// ライン探索の種類
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSearch {
    /// 固定ステップ（`lr` をそのまま使う）
    None,
    /// Armijo 条件によるバックトラック
    #[default]
    Backtracking,
}

/// L-BFGS のハイパーパラメータ
#[derive(Clone, Debug, PartialEq)]
pub struct LbfgsParams {
    pub lr: f64,
    pub max_iter: usize,
    pub history_size: usize,
    pub tolerance_grad: f64,
    pub tolerance_change: f64,
    pub line_search: LineSearch,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            lr: 1.0,
            max_iter: 20,
            history_size: 100,
            tolerance_grad: 1e-7,
            tolerance_change: 1e-9,
            line_search: LineSearch::Backtracking,
        }
    }
}

/// 最適化の停止理由
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 勾配の最大絶対値が tolerance_grad 以下
    GradientTolerance,
    /// 探索方向が降下方向になっていない
    DirectionTolerance,
    /// パラメータ更新量が tolerance_change 以下
    StepTolerance,
    /// 損失の変化が tolerance_change 未満
    LossTolerance,
    /// 反復上限に到達（未収束）
    MaxIterations,
    /// Armijo 条件を満たすステップが見つからなかった
    LineSearchFailed,
}

impl StopReason {
    /// 収束とみなせる停止かどうか
    pub fn is_converged(&self) -> bool {
        !matches!(self, StopReason::MaxIterations | StopReason::LineSearchFailed)
    }
}

/// 最適化の結果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LbfgsOutcome {
    /// 最後に評価した損失
    pub loss: f64,
    pub iterations: usize,
    /// 目的関数の評価回数
    pub evaluations: usize,
    pub stop: StopReason,
}

/// 曲率ペア
struct Correction {
    s: Vec<f64>,
    y: Vec<f64>,
    rho: f64,
}

/// L-BFGS オプティマイザ
pub struct Lbfgs {
    params: LbfgsParams,
}

impl Lbfgs {
    pub fn new(params: LbfgsParams) -> Self {
        Self { params }
    }

    /// `x` をその場で更新しながら目的関数を最小化する
    pub fn minimize<F>(&self, x: &mut [f64], mut closure: F) -> LbfgsOutcome
    where
        F: FnMut(&[f64], &mut [f64]) -> f64,
    {
        let p = &self.params;
        let n = x.len();
        let history_size = p.history_size.max(1);

        let mut grad = vec![0.0; n];
        let mut loss = closure(&*x, &mut grad);
        let mut evaluations = 1;

        if max_abs(&grad) <= p.tolerance_grad {
            return LbfgsOutcome {
                loss,
                iterations: 0,
                evaluations,
                stop: StopReason::GradientTolerance,
            };
        }

        let mut history: VecDeque<Correction> = VecDeque::with_capacity(history_size);
        let mut dir = vec![0.0; n];
        let mut prev_grad = vec![0.0; n];
        let mut h_diag = 1.0;
        let mut step = 0.0;
        let mut iterations = 0;

        let stop = loop {
            iterations += 1;

            // 探索方向の計算
            if iterations == 1 {
                for (d, g) in dir.iter_mut().zip(&grad) {
                    *d = -g;
                }
            } else {
                let y: Vec<f64> = grad.iter().zip(&prev_grad).map(|(g, pg)| g - pg).collect();
                let s: Vec<f64> = dir.iter().map(|d| d * step).collect();
                let ys = dot(&y, &s);
                if ys > CURVATURE_EPS {
                    if history.len() == history_size {
                        history.pop_front();
                    }
                    h_diag = ys / dot(&y, &y);
                    history.push_back(Correction { s, y, rho: 1.0 / ys });
                }
                two_loop(&history, &grad, h_diag, &mut dir);
            }

            prev_grad.copy_from_slice(&grad);
            let prev_loss = loss;

            step = if iterations == 1 {
                (1.0 / l1_norm(&grad)).min(1.0) * p.lr
            } else {
                p.lr
            };

            let gtd = dot(&grad, &dir);
            if gtd > -p.tolerance_change {
                break StopReason::DirectionTolerance;
            }

            match p.line_search {
                LineSearch::None => {
                    axpy(step, &dir, x);
                    if iterations != p.max_iter {
                        loss = closure(&*x, &mut grad);
                        evaluations += 1;
                    }
                }
                LineSearch::Backtracking => {
                    let found = backtrack(
                        &mut closure,
                        x,
                        &mut grad,
                        &dir,
                        step,
                        loss,
                        gtd,
                        &mut evaluations,
                    );
                    match found {
                        Some((accepted_step, accepted_loss)) => {
                            step = accepted_step;
                            loss = accepted_loss;
                        }
                        None => break StopReason::LineSearchFailed,
                    }
                }
            }

            log::trace!("lbfgs iter={iterations} loss={loss:.9} step={step:.3e}");

            if iterations >= p.max_iter {
                break StopReason::MaxIterations;
            }
            if max_abs(&grad) <= p.tolerance_grad {
                break StopReason::GradientTolerance;
            }
            if max_abs(&dir) * step <= p.tolerance_change {
                break StopReason::StepTolerance;
            }
            if (loss - prev_loss).abs() < p.tolerance_change {
                break StopReason::LossTolerance;
            }
        };

        LbfgsOutcome {
            loss,
            iterations,
            evaluations,
            stop,
        }
    }
}

/// 2ループ再帰で `-H * grad` を求める
fn two_loop(history: &VecDeque<Correction>, grad: &[f64], h_diag: f64, dir: &mut [f64]) {
    let mut q: Vec<f64> = grad.iter().map(|g| -g).collect();
    let mut alphas = vec![0.0; history.len()];

    for (i, c) in history.iter().enumerate().rev() {
        let alpha = dot(&c.s, &q) * c.rho;
        alphas[i] = alpha;
        for (qj, yj) in q.iter_mut().zip(&c.y) {
            *qj -= alpha * yj;
        }
    }

    for (d, qj) in dir.iter_mut().zip(&q) {
        *d = qj * h_diag;
    }

    for (c, &alpha) in history.iter().zip(&alphas) {
        let beta = dot(&c.y, dir) * c.rho;
        for (d, sj) in dir.iter_mut().zip(&c.s) {
            *d += sj * (alpha - beta);
        }
    }
}

/// Armijo 条件を満たすまでステップを縮小する
///
/// 見つからなければ `x` を元に戻して `None` を返す。
#[allow(clippy::too_many_arguments)]
fn backtrack<F>(
    closure: &mut F,
    x: &mut [f64],
    grad: &mut [f64],
    dir: &[f64],
    initial_step: f64,
    loss: f64,
    gtd: f64,
    evaluations: &mut usize,
) -> Option<(f64, f64)>
where
    F: FnMut(&[f64], &mut [f64]) -> f64,
{
    let origin = x.to_vec();
    let mut step = initial_step;

    for _ in 0..MAX_BACKTRACKS {
        for ((xi, oi), di) in x.iter_mut().zip(&origin).zip(dir) {
            *xi = oi + step * di;
        }
        let trial = closure(&*x, &mut *grad);
        *evaluations += 1;
        // NaN は比較が偽になるので棄却される
        if trial <= loss + ARMIJO_C1 * step * gtd {
            return Some((step, trial));
        }
        step *= BACKTRACK_SHRINK;
    }

    x.copy_from_slice(&origin);
    None
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l1_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn axpy(alpha: f64, dir: &[f64], x: &mut [f64]) {
    for (xi, di) in x.iter_mut().zip(dir) {
        *xi += alpha * di;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(x: &[f64], grad: &mut [f64]) -> f64 {
        // f(x, y) = (x - 1)^2 + 10 (y + 2)^2
        grad[0] = 2.0 * (x[0] - 1.0);
        grad[1] = 20.0 * (x[1] + 2.0);
        (x[0] - 1.0).powi(2) + 10.0 * (x[1] + 2.0).powi(2)
    }

    #[test]
    fn test_one_dimensional_quadratic_converges() {
        let lbfgs = Lbfgs::new(LbfgsParams {
            lr: 1.0,
            max_iter: 50,
            ..LbfgsParams::default()
        });
        let mut x = [0.0];
        let outcome = lbfgs.minimize(&mut x, |x, grad| {
            grad[0] = 2.0 * (x[0] - 3.0);
            (x[0] - 3.0).powi(2)
        });

        assert!((x[0] - 3.0).abs() < 1e-6, "x={}", x[0]);
        assert!(outcome.stop.is_converged(), "stop={:?}", outcome.stop);
        assert!(outcome.iterations < 50);
    }

    #[test]
    fn test_two_dimensional_quadratic_converges() {
        let lbfgs = Lbfgs::new(LbfgsParams {
            lr: 1.0,
            max_iter: 100,
            ..LbfgsParams::default()
        });
        let mut x = [5.0, 5.0];
        let outcome = lbfgs.minimize(&mut x, quadratic);

        assert!((x[0] - 1.0).abs() < 1e-3, "x={x:?}");
        assert!((x[1] + 2.0).abs() < 1e-3, "x={x:?}");
        assert!(outcome.loss < 1e-6);
    }

    #[test]
    fn test_zero_gradient_stops_immediately() {
        let lbfgs = Lbfgs::new(LbfgsParams::default());
        let mut x = [1.0, -2.0];
        let outcome = lbfgs.minimize(&mut x, quadratic);

        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.evaluations, 1);
        assert_eq!(outcome.stop, StopReason::GradientTolerance);
        assert_eq!(x, [1.0, -2.0]);
    }

    #[test]
    fn test_small_lr_hits_iteration_cap() {
        // lr が小さいと反復上限で止まるが、損失は減っている
        let lbfgs = Lbfgs::new(LbfgsParams {
            lr: 0.01,
            max_iter: 5,
            ..LbfgsParams::default()
        });
        let mut x = [5.0, 5.0];
        let mut initial = [0.0; 2];
        let initial_loss = quadratic(&x, &mut initial);
        let outcome = lbfgs.minimize(&mut x, quadratic);

        assert_eq!(outcome.stop, StopReason::MaxIterations);
        assert!(!outcome.stop.is_converged());
        assert_eq!(outcome.iterations, 5);
        assert!(outcome.loss < initial_loss);
    }

    #[test]
    fn test_backtracking_never_increases_loss() {
        // 大きすぎる lr でも Armijo 条件で受理された損失は単調に減る
        let lbfgs = Lbfgs::new(LbfgsParams {
            lr: 50.0,
            max_iter: 30,
            ..LbfgsParams::default()
        });
        let mut x = [5.0, 5.0];
        let mut scratch = [0.0; 2];
        let initial_loss = quadratic(&x, &mut scratch);
        let outcome = lbfgs.minimize(&mut x, quadratic);

        assert!(outcome.loss.is_finite());
        assert!(outcome.loss <= initial_loss);
        assert!((quadratic(&x, &mut scratch) - outcome.loss).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_step_skips_final_evaluation() {
        let lbfgs = Lbfgs::new(LbfgsParams {
            lr: 0.01,
            max_iter: 3,
            line_search: LineSearch::None,
            ..LbfgsParams::default()
        });
        let mut x = [5.0, 5.0];
        let outcome = lbfgs.minimize(&mut x, quadratic);

        // 初回評価 + 反復1,2 の評価（最終反復では評価しない）
        assert_eq!(outcome.evaluations, 3);
        assert_eq!(outcome.stop, StopReason::MaxIterations);
    }

    #[test]
    fn test_line_search_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            line_search: LineSearch,
        }
        let parsed: Wrapper = toml::from_str("line_search = \"none\"").unwrap();
        assert_eq!(parsed.line_search, LineSearch::None);
    }
}
