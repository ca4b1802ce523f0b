//! # 模型管理模块
//!
//! 组合观测数据与原子模型，拟合标度/体相溶剂（及孪晶分数），
//! 报告 R 值与目标函数，并输出图系数。
//!
//! ## 依赖关系
//! - 被 `commands/maps.rs` 使用
//! - 子模块: data, scaling, sigmaa, manager, twin_manager
//! - 使用 `tabled` 打印分箱统计，`serde` 供统计导出

pub mod data;
pub mod manager;
pub mod scaling;
pub mod sigmaa;
pub mod twin_manager;

pub use data::ModelData;
pub use manager::FModelManager;
pub use scaling::ScaleParams;
pub use twin_manager::{DetwinMode, TwinModelManager};

use crate::error::{Result, TwinMapError};
use crate::models::MillerIndex;
use crate::utils::output;

use num_complex::Complex64;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tabled::{Table, Tabled};

/// 图系数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapType {
    /// 2mFo-DFc
    TwoMFoDFc,
    /// mFo-DFc
    MFoDFc,
    /// 强度目标函数的负梯度
    Gradient,
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MapType::TwoMFoDFc => "2mFo-DFc",
            MapType::MFoDFc => "mFo-DFc",
            MapType::Gradient => "gradient",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MapType {
    type Err = TwinMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace("obs", "o").replace("model", "c").as_str() {
            "2mfo-dfc" => Ok(MapType::TwoMFoDFc),
            "mfo-dfc" => Ok(MapType::MFoDFc),
            "gradient" => Ok(MapType::Gradient),
            _ => Err(TwinMapError::InvalidParameter {
                key: "map_type".to_string(),
                reason: format!("unknown map type '{}'", s),
            }),
        }
    }
}

/// 图系数
#[derive(Debug, Clone)]
pub struct MapCoefficients {
    pub map_type: MapType,
    pub indices: Vec<MillerIndex>,
    pub values: Vec<Complex64>,
}

/// 分辨率箱统计
#[derive(Debug, Clone, Serialize)]
pub struct BinStatistics {
    pub model: String,
    pub bin: usize,
    pub d_max: f64,
    pub d_min: f64,
    pub n_work: usize,
    pub n_free: usize,
    pub r_work: f64,
    pub r_free: f64,
    pub sigma_a: f64,
    pub mean_fom: f64,
}

/// 模型管理器的公共接口
pub trait ModelManager {
    /// 拟合全部标度参数（孪晶管理器同时拟合孪晶分数）
    fn update_all_scales(&mut self) -> Result<()>;

    /// (R_work, R_free)
    fn r_values(&self) -> (f64, f64);

    /// 工作集上归一化的强度最小二乘目标
    fn target(&self) -> f64;

    fn show_k_sol_b_sol_b_cart_target(&self);

    fn show_essential(&self);

    fn map_coefficients(&self, kind: MapType) -> MapCoefficients;

    /// 已标度的复 F_model
    fn f_model(&self) -> Vec<Complex64>;

    fn bin_statistics(&self) -> Vec<BinStatistics>;
}

/// 由 Fo、F_model 与 σA 权重计算 2mFo-DFc / mFo-DFc
///
/// 中心反射的 2mFo-DFc 取 m·Fo。
pub(crate) fn weighted_map(
    data: &ModelData,
    f_obs: &[f64],
    f_model: &[Complex64],
    weights: &sigmaa::SigmaAWeights,
    kind: MapType,
) -> Vec<Complex64> {
    (0..data.len())
        .map(|i| {
            let fm = f_model[i];
            let phase = if fm.norm() > 0.0 { fm / fm.norm() } else { Complex64::new(1.0, 0.0) };
            let (m, d, fo) = (weights.m[i], weights.d[i], f_obs[i]);
            let amplitude = match kind {
                MapType::TwoMFoDFc if data.centric[i] => m * fo,
                MapType::TwoMFoDFc => 2.0 * m * fo - d * fm.norm(),
                _ => m * fo - d * fm.norm(),
            };
            phase * amplitude
        })
        .collect()
}

/// 负梯度图系数：ΔI_i · F_model(h_i) / <Io>
///
/// 除以观测强度均值使系数与 F 同量纲。
pub(crate) fn gradient_map(f_obs: &[f64], f_model: &[Complex64], residual: &[f64]) -> Vec<Complex64> {
    let mean_io = if f_obs.is_empty() {
        0.0
    } else {
        f_obs.iter().map(|f| f * f).sum::<f64>() / f_obs.len() as f64
    };
    let scale = if mean_io > 0.0 { 1.0 / mean_io } else { 0.0 };
    f_model
        .iter()
        .zip(residual)
        .map(|(fm, r)| fm * (r * scale))
        .collect()
}

/// 逐箱 R 值与 σA 统计
pub(crate) fn bin_statistics(
    label: &str,
    data: &ModelData,
    f_obs: &[f64],
    f_model_amplitude: &[f64],
    weights: &sigmaa::SigmaAWeights,
) -> Vec<BinStatistics> {
    let binner = &data.binner;
    (0..binner.n_bins())
        .map(|b| {
            let members: Vec<usize> = (0..data.len()).filter(|&i| binner.bin_of(i) == b).collect();
            let in_set = |free: bool| {
                let sel: Vec<usize> = members
                    .iter()
                    .copied()
                    .filter(|&i| data.free.is_free(i) == free)
                    .collect();
                let r = scaling::r_factor(f_obs, f_model_amplitude, 1.0, |i| sel.binary_search(&i).is_ok());
                (sel.len(), r)
            };
            let (n_work, r_work) = in_set(false);
            let (n_free, r_free) = in_set(true);
            let mean_fom = if members.is_empty() {
                0.0
            } else {
                members.iter().map(|&i| weights.m[i]).sum::<f64>() / members.len() as f64
            };
            let (d_max, d_min) = binner.limits(b);
            BinStatistics {
                model: label.to_string(),
                bin: b + 1,
                d_max,
                d_min,
                n_work,
                n_free,
                r_work,
                r_free,
                sigma_a: weights.sigma_a[b],
                mean_fom,
            }
        })
        .collect()
}

/// 打印分箱统计表
pub(crate) fn show_bin_table(stats: &[BinStatistics]) {
    #[derive(Tabled)]
    struct BinRow {
        #[tabled(rename = "Bin")]
        bin: usize,
        #[tabled(rename = "Resolution (Å)")]
        range: String,
        #[tabled(rename = "Work")]
        n_work: usize,
        #[tabled(rename = "Free")]
        n_free: usize,
        #[tabled(rename = "R work")]
        r_work: String,
        #[tabled(rename = "R free")]
        r_free: String,
        #[tabled(rename = "σA")]
        sigma_a: String,
        #[tabled(rename = "<FOM>")]
        fom: String,
    }

    let rows: Vec<BinRow> = stats
        .iter()
        .map(|s| BinRow {
            bin: s.bin,
            range: format!("{:.2} - {:.2}", s.d_max.min(999.99), s.d_min),
            n_work: s.n_work,
            n_free: s.n_free,
            r_work: format!("{:.4}", s.r_work),
            r_free: format!("{:.4}", s.r_free),
            sigma_a: format!("{:.3}", s.sigma_a),
            fom: format!("{:.3}", s.mean_fom),
        })
        .collect();
    if !rows.is_empty() {
        output::print_block(Table::new(&rows));
    }
}

/// 打印标度参数与目标
pub(crate) fn show_scales(scales: &ScaleParams, data: &ModelData, target: f64) {
    let b = scales.b_cart(&data.cell);
    output::print_line(&format!(
        "k_overall = {:.4}  k_sol = {:.3}  b_sol = {:.2}",
        scales.k_overall, scales.k_sol, scales.b_sol
    ));
    output::print_line(&format!(
        "B_cart (11,22,33,12,13,23) = {:.3} {:.3} {:.3} {:.3} {:.3} {:.3}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    ));
    output::print_line(&format!("target (intensity LS) = {:.6}", target));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_type_names() {
        assert_eq!("2mFo-DFc".parse::<MapType>().unwrap(), MapType::TwoMFoDFc);
        assert_eq!("2mFobs-DFmodel".parse::<MapType>().unwrap(), MapType::TwoMFoDFc);
        assert_eq!("mFobs-DFmodel".parse::<MapType>().unwrap(), MapType::MFoDFc);
        assert_eq!("gradient".parse::<MapType>().unwrap(), MapType::Gradient);
        assert!("fofc".parse::<MapType>().is_err());
        assert_eq!(MapType::MFoDFc.to_string(), "mFo-DFc");
    }

    #[test]
    fn test_gradient_map_scaling() {
        let fo = [3.0, 4.0];
        let fm = [Complex64::new(1.0, 0.0), Complex64::new(0.0, 2.0)];
        let g = gradient_map(&fo, &fm, &[2.0, -1.0]);
        // <Io> = 12.5
        assert!((g[0].re - 2.0 / 12.5).abs() < 1e-12);
        assert!((g[1].im + 2.0 / 12.5).abs() < 1e-12);
        assert!(gradient_map(&fo, &fm, &[0.0, 0.0]).iter().all(|c| c.norm() == 0.0));
    }
}
