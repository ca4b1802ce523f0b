//! # 孪晶模型管理器
//!
//! 对给定孪晶律 M 与孪晶分数 α：
//!
//! Ic_twin(h) = (1 - α)|Fm(h)|² + α|Fm(h·M)|²
//!
//! 其中 Fm(h·M) 由原子模型直接计算，不依赖观测数据是否完整。
//! α 在 [0, 0.5] 上先粗网格、再黄金分割搜索强度目标的最小值，
//! 与标度参数交替优化两轮。
//!
//! 图系数所用的观测振幅经过去孪晶：
//! - algebraic: I₁ = ((1-α)J₁ - αJ₂)/(1-2α)
//! - proportional: I₁ = J₁·Ic₁/((1-α)Ic₁ + αIc₂)
//! - auto: α < 0.25 时 algebraic，否则 proportional
//!
//! ## 依赖关系
//! - 被 `commands/maps.rs` 对每个孪晶律使用
//! - 使用 `fmodel/scaling.rs`、`fmodel/sigmaa.rs`、`twin/laws.rs`

use super::scaling::{self, ScaleParams};
use super::sigmaa::{self, SigmaAInput, SigmaAWeights};
use super::{BinStatistics, MapCoefficients, MapType, ModelData, ModelManager};
use crate::error::{Result, TwinMapError};
use crate::models::MillerIndex;
use crate::twin::TwinLaw;
use crate::utils::output;

use num_complex::Complex64;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// α 粗网格步长
const ALPHA_STEP: f64 = 0.01;
const ALPHA_MAX: f64 = 0.5;
/// 黄金分割收敛阈值
const ALPHA_TOLERANCE: f64 = 1e-5;
/// 标度与 α 的交替轮数
const MACRO_CYCLES: usize = 2;
/// α 不小于此值时代数去孪晶退化为比例去孪晶
const ALGEBRAIC_ALPHA_LIMIT: f64 = 0.45;
/// auto 模式的切换点
const AUTO_SWITCH_ALPHA: f64 = 0.25;

/// 去孪晶方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetwinMode {
    #[default]
    Algebraic,
    Proportional,
    Auto,
}

impl fmt::Display for DetwinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetwinMode::Algebraic => "algebraic",
            DetwinMode::Proportional => "proportional",
            DetwinMode::Auto => "auto",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DetwinMode {
    type Err = TwinMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "algebraic" => Ok(DetwinMode::Algebraic),
            "proportional" => Ok(DetwinMode::Proportional),
            "auto" => Ok(DetwinMode::Auto),
            other => Err(TwinMapError::InvalidParameter {
                key: "detwin_mode".to_string(),
                reason: format!("'{}' is not one of algebraic, proportional, auto", other),
            }),
        }
    }
}

/// 孪晶模型
pub struct TwinModelManager<'a> {
    data: &'a ModelData,
    law: TwinLaw,
    mode: DetwinMode,
    scales: ScaleParams,
    alpha: f64,
    /// h·M 的模型结构因子（未标度）
    mate_f_calc: Vec<Complex64>,
    mate_indices: Vec<MillerIndex>,
    mate_d_star_sq: Vec<f64>,
    /// h·M 在观测数据中的位置
    mate_obs: Vec<Option<usize>>,
    /// h·M⁻¹ 在观测数据中的位置（梯度用）
    source_obs: Vec<Option<usize>>,
}

impl<'a> TwinModelManager<'a> {
    pub fn new(data: &'a ModelData, law: TwinLaw, mode: DetwinMode) -> Self {
        let inverse = law.operator.inverse().unwrap_or(law.operator);
        let mates: Vec<Option<MillerIndex>> = data.indices.iter().map(|h| law.apply(h)).collect();
        // 没有整数像的指数以自身代替模型中的孪晶相关项
        let mate_indices: Vec<MillerIndex> = mates
            .iter()
            .zip(&data.indices)
            .map(|(m, h)| m.unwrap_or(*h))
            .collect();
        let mate_f_calc = data.calc_structure_factors(&mate_indices);
        let mate_d_star_sq = mate_indices.iter().map(|h| data.cell.d_star_sq(h)).collect();
        let mate_obs = mates.iter().map(|m| m.and_then(|h| data.find(&h))).collect();
        let source_obs = data
            .indices
            .iter()
            .map(|h| inverse.apply(h).and_then(|s| data.find(&s)))
            .collect();

        TwinModelManager {
            data,
            law,
            mode,
            scales: ScaleParams::default(),
            alpha: 0.0,
            mate_f_calc,
            mate_indices,
            mate_d_star_sq,
            mate_obs,
            source_obs,
        }
    }

    pub fn twin_fraction(&self) -> f64 {
        self.alpha
    }

    /// 观测到孪晶相关反射的比例
    pub fn mate_completeness(&self) -> f64 {
        if self.mate_obs.is_empty() {
            return 0.0;
        }
        self.mate_obs.iter().filter(|m| m.is_some()).count() as f64 / self.mate_obs.len() as f64
    }

    /// 给定标度参数（k = 1）的 (|Fm(h)|², |Fm(h·M)|²)
    fn model_intensities(&self, params: &ScaleParams) -> (Vec<f64>, Vec<f64>) {
        let data = self.data;
        (0..data.len())
            .into_par_iter()
            .map(|i| {
                let f1 = data.f_calc[i].norm() * params.model_factor(&data.indices[i], data.d_star_sq[i]);
                let f2 = self.mate_f_calc[i].norm()
                    * params.model_factor(&self.mate_indices[i], self.mate_d_star_sq[i]);
                (f1 * f1, f2 * f2)
            })
            .unzip()
    }

    fn twin_intensities(ic1: &[f64], ic2: &[f64], alpha: f64) -> Vec<f64> {
        ic1.iter()
            .zip(ic2)
            .map(|(a, b)| (1.0 - alpha) * a + alpha * b)
            .collect()
    }

    /// 工作集强度目标 Σ(Io - k²Ic)² / ΣIo²，k² 解析最优
    fn alpha_target(&self, ic1: &[f64], ic2: &[f64], alpha: f64) -> f64 {
        let data = self.data;
        let ic = Self::twin_intensities(ic1, ic2, alpha);
        let (mut s_oc, mut s_cc, mut s_oo) = (0.0, 0.0, 0.0);
        for i in (0..data.len()).filter(|&i| data.is_work(i)) {
            let io = data.f_obs[i] * data.f_obs[i];
            s_oc += io * ic[i];
            s_cc += ic[i] * ic[i];
            s_oo += io * io;
        }
        if s_cc <= 0.0 || s_oo <= 0.0 {
            return f64::INFINITY;
        }
        let k2 = s_oc / s_cc;
        // Σ(Io - k²Ic)² = ΣIo² - 2k²ΣIoIc + k⁴ΣIc²
        ((s_oo - 2.0 * k2 * s_oc + k2 * k2 * s_cc) / s_oo).max(0.0)
    }

    /// 以当前标度估计 α
    fn estimate_alpha(&self) -> f64 {
        let (ic1, ic2) = self.model_intensities(&self.scales);
        let f = |a: f64| self.alpha_target(&ic1, &ic2, a);
        let steps = (ALPHA_MAX / ALPHA_STEP).round() as usize;
        let best = (0..=steps)
            .map(|i| i as f64 * ALPHA_STEP)
            .min_by(|a, b| f(*a).total_cmp(&f(*b)))
            .unwrap_or(0.0);
        golden_section(
            f,
            (best - ALPHA_STEP).max(0.0),
            (best + ALPHA_STEP).min(ALPHA_MAX),
            ALPHA_TOLERANCE,
        )
    }

    /// 已标度的孪晶 |F_model| = k·sqrt(Ic_twin)
    fn twin_amplitudes(&self) -> Vec<f64> {
        let (ic1, ic2) = self.model_intensities(&self.scales);
        Self::twin_intensities(&ic1, &ic2, self.alpha)
            .iter()
            .map(|ic| self.scales.k_overall * ic.sqrt())
            .collect()
    }

    /// Io - k²Ic_twin
    fn intensity_residuals(&self) -> Vec<f64> {
        self.twin_amplitudes()
            .iter()
            .zip(&self.data.f_obs)
            .map(|(fm, fo)| fo * fo - fm * fm)
            .collect()
    }

    /// 本次实际使用的去孪晶方式
    pub fn effective_mode(&self) -> DetwinMode {
        match self.mode {
            DetwinMode::Auto if self.alpha < AUTO_SWITCH_ALPHA => DetwinMode::Algebraic,
            DetwinMode::Auto => DetwinMode::Proportional,
            mode => mode,
        }
    }

    /// 去孪晶后的观测振幅
    pub fn detwinned_amplitudes(&self) -> Vec<f64> {
        let (ic1, ic2) = self.model_intensities(&self.scales);
        let data = self.data;
        let alpha = self.alpha;
        let mode = self.effective_mode();
        (0..data.len())
            .map(|i| {
                let j1 = data.f_obs[i] * data.f_obs[i];
                let proportional = || {
                    let denom = (1.0 - alpha) * ic1[i] + alpha * ic2[i];
                    if denom > 0.0 {
                        j1 * ic1[i] / denom
                    } else {
                        j1
                    }
                };
                let algebraic = self.mate_obs[i]
                    .filter(|_| mode == DetwinMode::Algebraic && alpha < ALGEBRAIC_ALPHA_LIMIT)
                    .map(|m| {
                        let j2 = data.f_obs[m] * data.f_obs[m];
                        ((1.0 - alpha) * j1 - alpha * j2) / (1.0 - 2.0 * alpha)
                    })
                    .filter(|i1| *i1 >= 0.0);
                algebraic.unwrap_or_else(proportional).max(0.0).sqrt()
            })
            .collect()
    }

    fn weights(&self, f_obs: &[f64]) -> SigmaAWeights {
        let fm: Vec<f64> = self.f_model().iter().map(|f| f.norm()).collect();
        sigmaa::estimate(&SigmaAInput {
            f_obs,
            f_calc: &fm,
            centric: &self.data.centric,
            epsilon: &self.data.epsilon,
            free: &self.data.free,
            binner: &self.data.binner,
        })
    }

    /// 负梯度：[(1-α)ΔI(h) + αΔI(h·M⁻¹)] · k·Fm(h)
    fn gradient_residuals(&self) -> Vec<f64> {
        let delta = self.intensity_residuals();
        (0..delta.len())
            .map(|i| {
                let mate = self.source_obs[i].map(|m| delta[m]).unwrap_or(0.0);
                (1.0 - self.alpha) * delta[i] + self.alpha * mate
            })
            .collect()
    }
}

impl ModelManager for TwinModelManager<'_> {
    fn update_all_scales(&mut self) -> Result<()> {
        self.alpha = self.estimate_alpha();
        for _ in 0..MACRO_CYCLES {
            let alpha = self.alpha;
            let scales = {
                let this = &*self;
                scaling::optimize_scales(this.data, |p| {
                    let (ic1, ic2) = this.model_intensities(p);
                    Self::twin_intensities(&ic1, &ic2, alpha)
                        .into_iter()
                        .map(f64::sqrt)
                        .collect()
                })
            };
            self.scales = scales;
            self.alpha = self.estimate_alpha();
        }
        // α 变化后重新求总体标度
        let (ic1, ic2) = self.model_intensities(&self.scales);
        let fm: Vec<f64> = Self::twin_intensities(&ic1, &ic2, self.alpha)
            .into_iter()
            .map(f64::sqrt)
            .collect();
        let data = self.data;
        self.scales.k_overall = scaling::analytic_scale(&data.f_obs, &fm, |i| data.is_work(i));
        if !self.scales.k_overall.is_finite() {
            return Err(TwinMapError::Numerical(format!(
                "overall scale diverged for twin law {}",
                self.law
            )));
        }
        Ok(())
    }

    fn r_values(&self) -> (f64, f64) {
        let fm = self.twin_amplitudes();
        let data = self.data;
        (
            scaling::r_factor(&data.f_obs, &fm, 1.0, |i| data.is_work(i)),
            scaling::r_factor(&data.f_obs, &fm, 1.0, |i| !data.is_work(i)),
        )
    }

    fn target(&self) -> f64 {
        let data = self.data;
        let (mut num, mut den) = (0.0, 0.0);
        for (i, r) in self.intensity_residuals().iter().enumerate() {
            if data.is_work(i) {
                num += r * r;
                den += data.f_obs[i].powi(4);
            }
        }
        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    }

    fn show_k_sol_b_sol_b_cart_target(&self) {
        super::show_scales(&self.scales, self.data, self.target());
    }

    fn show_essential(&self) {
        let (r_work, r_free) = self.r_values();
        output::print_line(&format!("twin law      : {}  ({})", self.law.as_hkl(), self.law.kind));
        output::print_line(&format!("twin fraction : {:.3}", self.twin_fraction()));
        output::print_line(&format!(
            "detwin mode   : {} (applied: {})",
            self.mode,
            self.effective_mode()
        ));
        output::print_line(&format!(
            "twin mates observed : {:.1}%",
            100.0 * self.mate_completeness()
        ));
        output::print_line(&format!("r_work = {:.4}  r_free = {:.4}", r_work, r_free));
        self.show_k_sol_b_sol_b_cart_target();
        super::show_bin_table(&self.bin_statistics());
    }

    fn map_coefficients(&self, kind: MapType) -> MapCoefficients {
        let f_model = self.f_model();
        let values = match kind {
            MapType::Gradient => super::gradient_map(&self.data.f_obs, &f_model, &self.gradient_residuals()),
            _ => {
                let detwinned = self.detwinned_amplitudes();
                let weights = self.weights(&detwinned);
                super::weighted_map(self.data, &detwinned, &f_model, &weights, kind)
            }
        };
        MapCoefficients {
            map_type: kind,
            indices: self.data.indices.clone(),
            values,
        }
    }

    fn f_model(&self) -> Vec<Complex64> {
        let data = self.data;
        let s = &self.scales;
        (0..data.len())
            .into_par_iter()
            .map(|i| data.f_calc[i] * (s.k_overall * s.model_factor(&data.indices[i], data.d_star_sq[i])))
            .collect()
    }

    fn bin_statistics(&self) -> Vec<BinStatistics> {
        let detwinned = self.detwinned_amplitudes();
        super::bin_statistics(
            &self.law.as_hkl(),
            self.data,
            &self.data.f_obs,
            &self.twin_amplitudes(),
            &self.weights(&detwinned),
        )
    }
}

/// [lo, hi] 上单峰函数的黄金分割极小
fn golden_section(f: impl Fn(f64) -> f64, lo: f64, hi: f64, tolerance: f64) -> f64 {
    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (lo, hi);
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    while (b - a).abs() > tolerance {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmodel::data::test_support::*;
    use crate::models::UnitCell;
    use crate::symmetry::SpaceGroup;

    /// P4 数据，以模型自身按孪晶律 k,h,-l 孪生
    fn twinned_data(alpha: f64, k: f64) -> (ModelData, TwinLaw) {
        let cell = UnitCell::new([20.0, 20.0, 30.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P4").unwrap();
        let law = TwinLaw::parse("k,h,-l").unwrap();
        let indices = p4_indices(&cell, &sg, 3.0);
        let n = indices.len();
        let reference = ModelData::new(
            cell,
            sg.clone(),
            &reflections(indices.clone(), vec![1.0; n]),
            every_tenth(n),
            small_model(),
        )
        .unwrap();
        let mates: Vec<MillerIndex> = indices.iter().map(|h| law.apply(h).unwrap()).collect();
        let f_mate = reference.calc_structure_factors(&mates);
        let f_obs = (0..n)
            .map(|i| {
                let i1 = reference.f_calc[i].norm_sqr();
                let i2 = f_mate[i].norm_sqr();
                k * ((1.0 - alpha) * i1 + alpha * i2).sqrt()
            })
            .collect();
        let data = ModelData::new(cell, sg, &reflections(indices, f_obs), every_tenth(n), small_model()).unwrap();
        (data, law)
    }

    #[test]
    fn test_detwin_mode_names() {
        assert_eq!("Algebraic".parse::<DetwinMode>().unwrap(), DetwinMode::Algebraic);
        assert_eq!("auto".parse::<DetwinMode>().unwrap(), DetwinMode::Auto);
        assert!("magic".parse::<DetwinMode>().is_err());
        assert_eq!(DetwinMode::Proportional.to_string(), "proportional");
    }

    #[test]
    fn test_golden_section() {
        let x = golden_section(|x| (x - 0.137).powi(2), 0.0, 0.5, 1e-8);
        assert!((x - 0.137).abs() < 1e-6);
    }

    #[test]
    fn test_recovers_twin_fraction() {
        let (data, law) = twinned_data(0.3, 2.0);
        let mut manager = TwinModelManager::new(&data, law, DetwinMode::Algebraic);
        manager.update_all_scales().unwrap();
        assert!((manager.twin_fraction() - 0.3).abs() < 1e-3, "alpha {}", manager.twin_fraction());
        let (r_work, _) = manager.r_values();
        assert!(r_work < 1e-3, "r_work {}", r_work);
        assert!(manager.mate_completeness() > 0.99);
    }

    #[test]
    fn test_algebraic_detwinning_recovers_untwinned() {
        let (data, law) = twinned_data(0.2, 1.0);
        let mut manager = TwinModelManager::new(&data, law, DetwinMode::Algebraic);
        manager.alpha = 0.2;
        let detwinned = manager.detwinned_amplitudes();
        for i in 0..data.len() {
            let expected = data.f_calc[i].norm();
            assert!(
                (detwinned[i] - expected).abs() < 1e-6 * (1.0 + expected),
                "{:?}: {} vs {}",
                data.indices[i],
                detwinned[i],
                expected
            );
        }
    }

    #[test]
    fn test_proportional_detwinning_exact_with_perfect_model() {
        let (data, law) = twinned_data(0.35, 1.0);
        let mut manager = TwinModelManager::new(&data, law, DetwinMode::Proportional);
        manager.alpha = 0.35;
        let detwinned = manager.detwinned_amplitudes();
        for i in 0..data.len() {
            let expected = data.f_calc[i].norm();
            assert!((detwinned[i] - expected).abs() < 1e-6 * (1.0 + expected));
        }
    }

    #[test]
    fn test_auto_mode_switch() {
        let (data, law) = twinned_data(0.1, 1.0);
        let mut manager = TwinModelManager::new(&data, law, DetwinMode::Auto);
        manager.alpha = 0.1;
        assert_eq!(manager.effective_mode(), DetwinMode::Algebraic);
        manager.alpha = 0.3;
        assert_eq!(manager.effective_mode(), DetwinMode::Proportional);
    }

    #[test]
    fn test_twin_maps_and_statistics() {
        let (data, law) = twinned_data(0.25, 1.0);
        let mut manager = TwinModelManager::new(&data, law, DetwinMode::Auto);
        manager.update_all_scales().unwrap();
        for kind in [MapType::TwoMFoDFc, MapType::MFoDFc, MapType::Gradient] {
            let coeffs = manager.map_coefficients(kind);
            assert_eq!(coeffs.values.len(), data.len());
            assert!(coeffs.values.iter().all(|c| c.re.is_finite() && c.im.is_finite()));
        }
        let stats = manager.bin_statistics();
        assert_eq!(stats[0].model, "k,h,-l");
    }
}
