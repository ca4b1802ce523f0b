//! # 总体标度与体相溶剂
//!
//! F_model(h) = k · exp(-h β hᵀ) · F_calc(h) · (1 - k_sol · exp(-B_sol s²))
//!
//! 体相溶剂采用 Babinet 近似。对 (k_sol, B_sol) 网格的每个点：
//! 1. 对 ln(F_obs / |F_model|) 做 7 参数线性最小二乘（ln k 与各向异性 β）
//! 2. β 按点群对称化
//! 3. 解析求总体标度 k = Σ Fo·Fm / Σ Fm²
//!
//! 最终保留工作集 R 最小的参数。
//!
//! ## 依赖关系
//! - 被 `fmodel/manager.rs`、`fmodel/twin_manager.rs` 使用
//! - 使用 `nalgebra` 求解最小二乘，`rayon` 并行遍历网格

use crate::fmodel::ModelData;
use crate::models::{MillerIndex, UnitCell};
use crate::symmetry::IntMatrix;

use nalgebra::{Matrix3, SMatrix, SVector};
use rayon::prelude::*;

/// k_sol 网格 [0, 0.6]，步长 0.05
const K_SOL_STEPS: usize = 13;
const K_SOL_STEP: f64 = 0.05;
/// B_sol 网格 [10, 90]，步长 10
const B_SOL_STEPS: usize = 9;
const B_SOL_START: f64 = 10.0;
const B_SOL_STEP: f64 = 10.0;

/// 标度参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleParams {
    /// 总体标度
    pub k_overall: f64,
    pub k_sol: f64,
    pub b_sol: f64,
    /// 各向异性项 (β11, β22, β33, β12, β13, β23)，指数为 -h β hᵀ
    pub beta: [f64; 6],
}

impl Default for ScaleParams {
    fn default() -> Self {
        ScaleParams {
            k_overall: 1.0,
            k_sol: 0.0,
            b_sol: 0.0,
            beta: [0.0; 6],
        }
    }
}

impl ScaleParams {
    /// exp(-h β hᵀ)
    pub fn aniso_factor(&self, h: &MillerIndex) -> f64 {
        let [b11, b22, b33, b12, b13, b23] = self.beta;
        let (x, y, z) = (h[0] as f64, h[1] as f64, h[2] as f64);
        let q = b11 * x * x + b22 * y * y + b33 * z * z + 2.0 * (b12 * x * y + b13 * x * z + b23 * y * z);
        (-q).exp()
    }

    /// 1 - k_sol · exp(-B_sol s²)，s² = d*²/4
    pub fn solvent_factor(&self, d_star_sq: f64) -> f64 {
        1.0 - self.k_sol * (-self.b_sol * d_star_sq / 4.0).exp()
    }

    /// 除总体标度外的全部因子
    pub fn model_factor(&self, h: &MillerIndex, d_star_sq: f64) -> f64 {
        self.aniso_factor(h) * self.solvent_factor(d_star_sq)
    }

    fn beta_matrix(&self) -> Matrix3<f64> {
        let [b11, b22, b33, b12, b13, b23] = self.beta;
        Matrix3::new(b11, b12, b13, b12, b22, b23, b13, b23, b33)
    }

    fn set_beta_matrix(&mut self, m: &Matrix3<f64>) {
        self.beta = [m[(0, 0)], m[(1, 1)], m[(2, 2)], m[(0, 1)], m[(0, 2)], m[(1, 2)]];
    }

    /// 笛卡尔各向异性 B (B11, B22, B33, B12, B13, B23)
    ///
    /// U* = β / 2π²，U_cart = O U* Oᵀ，B_cart = 8π² U_cart。
    pub fn b_cart(&self, cell: &UnitCell) -> [f64; 6] {
        let o = cell.orthogonalization();
        let b = o * self.beta_matrix() * o.transpose() * 4.0;
        [b[(0, 0)], b[(1, 1)], b[(2, 2)], b[(0, 1)], b[(0, 2)], b[(1, 2)]]
    }

    /// 按点群旋转平均 β：β ← (1/n) Σ R β Rᵀ
    pub fn symmetrize(&mut self, rotations: &[IntMatrix]) {
        if rotations.is_empty() {
            return;
        }
        let beta = self.beta_matrix();
        let mut sum = Matrix3::zeros();
        for r in rotations {
            let m = Matrix3::from_fn(|i, j| r[i][j] as f64);
            sum += m * beta * m.transpose();
        }
        self.set_beta_matrix(&(sum / rotations.len() as f64));
    }
}

/// 工作集 R = Σ|Fo - k·Fm| / Σ Fo
pub fn r_factor(f_obs: &[f64], f_model: &[f64], k: f64, select: impl Fn(usize) -> bool) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, (fo, fm)) in f_obs.iter().zip(f_model).enumerate() {
        if select(i) {
            num += (fo - k * fm).abs();
            den += fo.abs();
        }
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// 最小二乘解析标度 k = Σ Fo·Fm / Σ Fm²
pub fn analytic_scale(f_obs: &[f64], f_model: &[f64], select: impl Fn(usize) -> bool) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, (fo, fm)) in f_obs.iter().zip(f_model).enumerate() {
        if select(i) {
            num += fo * fm;
            den += fm * fm;
        }
    }
    if den > 0.0 {
        num / den
    } else {
        1.0
    }
}

/// ln k 与 β 的线性最小二乘
///
/// ln(Fo/Fm) = ln k - (β11 h² + β22 k² + β33 l² + 2β12 hk + 2β13 hl + 2β23 kl)
fn fit_ln_k_and_beta(data: &ModelData, f_model: &[f64]) -> Option<(f64, [f64; 6])> {
    let mut ata = SMatrix::<f64, 7, 7>::zeros();
    let mut atb = SVector::<f64, 7>::zeros();
    let mut n = 0usize;

    for i in 0..data.len() {
        let (fo, fm) = (data.f_obs[i], f_model[i]);
        if !data.is_work(i) || fo <= 0.0 || fm <= 0.0 {
            continue;
        }
        let h = data.indices[i];
        let (x, y, z) = (h[0] as f64, h[1] as f64, h[2] as f64);
        let row = SVector::<f64, 7>::from_column_slice(&[
            1.0,
            -x * x,
            -y * y,
            -z * z,
            -2.0 * x * y,
            -2.0 * x * z,
            -2.0 * y * z,
        ]);
        ata += row * row.transpose();
        atb += row * (fo / fm).ln();
        n += 1;
    }
    if n < 7 {
        return None;
    }

    let solution = ata.svd(true, true).solve(&atb, 1e-12).ok()?;
    if solution.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((
        solution[0],
        [solution[1], solution[2], solution[3], solution[4], solution[5], solution[6]],
    ))
}

/// 单个 (k_sol, B_sol) 点上的标度拟合
///
/// `amplitudes` 返回给定参数下（k = 1）的模型振幅。
pub fn fit_at<F>(data: &ModelData, k_sol: f64, b_sol: f64, amplitudes: &F) -> (ScaleParams, f64)
where
    F: Fn(&ScaleParams) -> Vec<f64>,
{
    let mut params = ScaleParams {
        k_overall: 1.0,
        k_sol,
        b_sol,
        beta: [0.0; 6],
    };
    let base = amplitudes(&params);
    if let Some((_, beta)) = fit_ln_k_and_beta(data, &base) {
        params.beta = beta;
        params.symmetrize(&data.rotations());
    }
    let fm = amplitudes(&params);
    params.k_overall = analytic_scale(&data.f_obs, &fm, |i| data.is_work(i));
    let r = r_factor(&data.f_obs, &fm, params.k_overall, |i| data.is_work(i));
    (params, r)
}

/// 在 (k_sol, B_sol) 网格上寻找最优标度参数
pub fn optimize_scales<F>(data: &ModelData, amplitudes: F) -> ScaleParams
where
    F: Fn(&ScaleParams) -> Vec<f64> + Sync,
{
    let grid: Vec<(f64, f64)> = (0..K_SOL_STEPS)
        .flat_map(|i| {
            (0..B_SOL_STEPS).map(move |j| (i as f64 * K_SOL_STEP, B_SOL_START + j as f64 * B_SOL_STEP))
        })
        .collect();

    grid.par_iter()
        .map(|&(k_sol, b_sol)| fit_at(data, k_sol, b_sol, &amplitudes))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(params, _)| params)
        .unwrap_or_default()
}
