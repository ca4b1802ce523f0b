//! # σA 估计与图系数权重
//!
//! 每个分辨率箱内以归一化振幅 E 的相关性估计 σA：
//! σA² ≈ corr(Eo², Ec²)，限制在 [0.0025, 0.98]。
//!
//! - D = σA · sqrt(<Fo²>/<Fc²>)
//! - 非中心反射 m = I₁(X)/I₀(X)，X = 2σA·Eo·Ec/(1-σA²)
//! - 中心反射 m = tanh(X/2)
//!
//! ## 依赖关系
//! - 被 `fmodel/mod.rs` 的图系数计算使用

use crate::models::{FreeFlags, ResolutionBinner};

/// σA² 下限与上限
const SIGMA_A_SQ_MIN: f64 = 0.0025;
const SIGMA_A_SQ_MAX: f64 = 0.98;

/// 箱内测试集反射少于此数时改用全部反射
const MIN_FREE_PER_BIN: usize = 25;

/// 逐反射 m、D 与逐箱 σA
#[derive(Debug, Clone)]
pub struct SigmaAWeights {
    pub m: Vec<f64>,
    pub d: Vec<f64>,
    pub sigma_a: Vec<f64>,
}

/// 输入数组
pub struct SigmaAInput<'a> {
    pub f_obs: &'a [f64],
    /// 已标度的 |F_model|
    pub f_calc: &'a [f64],
    pub centric: &'a [bool],
    pub epsilon: &'a [f64],
    pub free: &'a FreeFlags,
    pub binner: &'a ResolutionBinner,
}

/// 估计 σA、m 与 D
pub fn estimate(input: &SigmaAInput) -> SigmaAWeights {
    let n = input.f_obs.len();
    let n_bins = input.binner.n_bins();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_bins];
    for i in 0..n {
        members[input.binner.bin_of(i)].push(i);
    }

    let mut m = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut sigma_a = vec![0.0; n_bins];

    for (b, idx) in members.iter().enumerate() {
        if idx.is_empty() {
            continue;
        }
        let mean_sq = |values: &[f64]| {
            idx.iter().map(|&i| values[i] * values[i] / input.epsilon[i]).sum::<f64>() / idx.len() as f64
        };
        let (fo_norm, fc_norm) = (mean_sq(input.f_obs), mean_sq(input.f_calc));
        if fo_norm <= 0.0 || fc_norm <= 0.0 {
            continue;
        }
        let e_obs = |i: usize| input.f_obs[i] / (input.epsilon[i] * fo_norm).sqrt();
        let e_calc = |i: usize| input.f_calc[i] / (input.epsilon[i] * fc_norm).sqrt();

        let free_idx: Vec<usize> = idx.iter().copied().filter(|&i| input.free.is_free(i)).collect();
        let sample = if free_idx.len() >= MIN_FREE_PER_BIN { &free_idx } else { idx };
        let pairs: Vec<(f64, f64)> = sample
            .iter()
            .map(|&i| (e_obs(i).powi(2), e_calc(i).powi(2)))
            .collect();
        let sa_sq = correlation(&pairs).clamp(SIGMA_A_SQ_MIN, SIGMA_A_SQ_MAX);
        let sa = sa_sq.sqrt();
        sigma_a[b] = sa;

        let d_bin = sa * (fo_norm / fc_norm).sqrt();
        for &i in idx {
            let x = 2.0 * sa * e_obs(i) * e_calc(i) / (1.0 - sa_sq);
            m[i] = if input.centric[i] {
                (x / 2.0).tanh()
            } else {
                bessel_i1_over_i0(x)
            };
            d[i] = d_bin;
        }
    }

    SigmaAWeights { m, d, sigma_a }
}

/// Pearson 相关系数；样本不足或方差为零时返回 0
pub fn correlation(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len() as f64;
    if pairs.len() < 2 {
        return 0.0;
    }
    let (mx, my) = pairs
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    let (mx, my) = (mx / n, my / n);
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        0.0
    } else {
        sxy / (sxx * syy).sqrt()
    }
}

/// I₁(x)/I₀(x)，Abramowitz & Stegun 9.8.1–9.8.4 多项式近似
pub fn bessel_i1_over_i0(x: f64) -> f64 {
    let ax = x.abs();
    let ratio = if ax < 3.75 {
        let t = (x / 3.75).powi(2);
        let i0 = 1.0
            + t * (3.5156229 + t * (3.0899424 + t * (1.2067492 + t * (0.2659732 + t * (0.0360768 + t * 0.0045813)))));
        let i1 = ax
            * (0.5
                + t * (0.87890594
                    + t * (0.51498869 + t * (0.15084934 + t * (0.02658733 + t * (0.00301532 + t * 0.00032411))))));
        i1 / i0
    } else {
        let t = 3.75 / ax;
        let i0 = 0.39894228
            + t * (0.01328592
                + t * (0.00225319
                    + t * (-0.00157565
                        + t * (0.00916281
                            + t * (-0.02057706 + t * (0.02635537 + t * (-0.01647633 + t * 0.00392377)))))));
        let i1 = 0.39894228
            + t * (-0.03988024
                + t * (-0.00362018
                    + t * (0.00163801
                        + t * (-0.01031555
                            + t * (0.02282967 + t * (-0.02895312 + t * (0.01787654 - t * 0.00420059)))))));
        i1 / i0
    };
    if x < 0.0 {
        -ratio
    } else {
        ratio
    }
}
