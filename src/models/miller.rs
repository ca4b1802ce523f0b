//! # 衍射数据模型
//!
//! Miller 指数、观测数据数组（振幅或强度）、Free-R 标记与分辨率分箱。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`fmodel/`、`commands/` 使用
//! - 使用 `models/cell.rs` 与 `symmetry/space_group.rs`

use crate::error::{Result, TwinMapError};
use crate::models::UnitCell;
use crate::symmetry::ops::HklOperator;
use crate::symmetry::SpaceGroup;
use crate::utils::output;

use std::collections::HashMap;
use std::fmt;

/// Miller 指数 (h, k, l)
pub type MillerIndex = [i32; 3];

/// 观测量类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationType {
    /// 结构因子振幅 |F|
    Amplitude,
    /// 强度 I = |F|²
    Intensity,
}

impl fmt::Display for ObservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationType::Amplitude => write!(f, "xray.amplitude"),
            ObservationType::Intensity => write!(f, "xray.intensity"),
        }
    }
}

/// 观测衍射数据
#[derive(Debug, Clone)]
pub struct ReflectionData {
    /// Miller 指数
    pub indices: Vec<MillerIndex>,
    /// 观测值
    pub data: Vec<f64>,
    /// 标准偏差
    pub sigmas: Vec<f64>,
    /// 观测量类型
    pub obs_type: ObservationType,
    /// 来源列标签
    pub labels: Vec<String>,
    /// 原始 Free-R 列数值（若存在）
    pub raw_flags: Option<Vec<i32>>,
    /// Free-R 列标签
    pub flag_label: Option<String>,
}

impl ReflectionData {
    /// 反射数
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// 强度转振幅：F = √I（I ≤ 0 时 F = 0），σF = σI / 2F（F = 0 时 √σI）
    pub fn as_amplitudes(&self) -> ReflectionData {
        if self.obs_type == ObservationType::Amplitude {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.len());
        let mut sigmas = Vec::with_capacity(self.len());
        for (&i, &s) in self.data.iter().zip(&self.sigmas) {
            if i > 0.0 {
                let f = i.sqrt();
                data.push(f);
                sigmas.push(s / (2.0 * f));
            } else {
                data.push(0.0);
                sigmas.push(s.abs().sqrt());
            }
        }
        ReflectionData {
            data,
            sigmas,
            obs_type: ObservationType::Amplitude,
            ..self.clone()
        }
    }

    /// 映射到不对称单元并去重（首个出现者保留），剔除系统消光与 (0,0,0)
    ///
    /// 返回 (新数据, 被剔除的反射数)。
    pub fn merge_to_asu(&self, sg: &SpaceGroup) -> (ReflectionData, usize) {
        let laue = sg.laue_rotations();
        let mut seen: HashMap<MillerIndex, usize> = HashMap::new();
        let mut out = ReflectionData {
            indices: Vec::new(),
            data: Vec::new(),
            sigmas: Vec::new(),
            obs_type: self.obs_type,
            labels: self.labels.clone(),
            raw_flags: self.raw_flags.as_ref().map(|_| Vec::new()),
            flag_label: self.flag_label.clone(),
        };
        let mut dropped = 0;

        for (i, h) in self.indices.iter().enumerate() {
            if *h == [0, 0, 0] || sg.is_sys_absent(h) || !self.data[i].is_finite() {
                dropped += 1;
                continue;
            }
            let asu = crate::symmetry::asu_index_with(&laue, h);
            if seen.contains_key(&asu) {
                dropped += 1;
                continue;
            }
            seen.insert(asu, out.indices.len());
            out.indices.push(asu);
            out.data.push(self.data[i]);
            out.sigmas.push(self.sigmas[i]);
            if let (Some(dst), Some(src)) = (out.raw_flags.as_mut(), self.raw_flags.as_ref()) {
                dst.push(src[i]);
            }
        }

        (out, dropped)
    }

    /// 分辨率范围 (d_max, d_min)
    pub fn d_max_min(&self, cell: &UnitCell) -> (f64, f64) {
        let mut d_max: f64 = 0.0;
        let mut d_min = f64::INFINITY;
        for h in &self.indices {
            let d = cell.d_spacing(h);
            d_max = d_max.max(d);
            d_min = d_min.min(d);
        }
        (d_max, d_min)
    }

    /// 打印数据摘要
    pub fn show_summary(&self, cell: &UnitCell, sg: &SpaceGroup) {
        let (d_max, d_min) = self.d_max_min(cell);
        let mean_i_sig = {
            let ratios: Vec<f64> = self
                .data
                .iter()
                .zip(&self.sigmas)
                .filter(|(_, s)| **s > 0.0)
                .map(|(d, s)| d / s)
                .collect();
            if ratios.is_empty() {
                0.0
            } else {
                ratios.iter().sum::<f64>() / ratios.len() as f64
            }
        };
        output::print_line(&format!("Miller array info: {}", self.labels.join(",")));
        output::print_line(&format!("Observation type: {}", self.obs_type));
        output::print_line(&format!("Unit cell: {}", cell));
        output::print_line(&format!("Space group: {}", sg));
        output::print_line(&format!("Number of Miller indices: {}", self.len()));
        output::print_line(&format!(
            "Resolution range: {:.4} {:.4}",
            d_max, d_min
        ));
        output::print_line(&format!("Mean value/sigma: {:.2}", mean_i_sig));
    }
}

/// Free-R 标记（true 表示测试集）
#[derive(Debug, Clone)]
pub struct FreeFlags {
    flags: Vec<bool>,
}

impl FreeFlags {
    /// 由原始列数值生成
    pub fn from_raw(raw: &[i32], test_value: i32) -> Self {
        FreeFlags {
            flags: raw.iter().map(|&v| v == test_value).collect(),
        }
    }

    /// 按格子对称性轨道生成约 `fraction` 比例的测试集
    ///
    /// 同一轨道内（含孪晶相关反射）的指数共享同一标记。
    pub fn generate(indices: &[MillerIndex], lattice_rotations: &[HklOperator], fraction: f64) -> Self {
        let threshold = (fraction.clamp(0.0, 1.0) * 10_000.0).round() as u64;
        let flags = indices
            .iter()
            .map(|h| {
                let mut best = *h;
                for image in lattice_rotations.iter().filter_map(|r| r.apply(h)) {
                    for sign in [1, -1] {
                        let g = image.map(|v| v * sign);
                        if g > best {
                            best = g;
                        }
                    }
                }
                splitmix64(pack_index(&best)) % 10_000 < threshold
            })
            .collect();
        FreeFlags { flags }
    }

    /// 校验与数据长度一致
    pub fn check_size(&self, n: usize) -> Result<()> {
        if self.flags.len() != n {
            return Err(TwinMapError::Other(format!(
                "free flag array has {} entries but data has {}",
                self.flags.len(),
                n
            )));
        }
        Ok(())
    }

    /// 第 i 个反射是否为测试集
    pub fn is_free(&self, i: usize) -> bool {
        self.flags.get(i).copied().unwrap_or(false)
    }

    /// 测试集数量
    pub fn count_free(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    /// 测试集比例
    pub fn free_fraction(&self) -> f64 {
        if self.flags.is_empty() {
            0.0
        } else {
            self.count_free() as f64 / self.flags.len() as f64
        }
    }
}

fn pack_index(h: &MillerIndex) -> u64 {
    let enc = |v: i32| (v as i64 + 1024) as u64 & 0x1fffff;
    (enc(h[0]) << 42) | (enc(h[1]) << 21) | enc(h[2])
}

/// 确定性整数散列
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// 等数目分辨率分箱
#[derive(Debug, Clone)]
pub struct ResolutionBinner {
    /// 每个反射所在的箱号
    bin_of: Vec<usize>,
    /// 每个箱的 (d_max, d_min)
    limits: Vec<(f64, f64)>,
}

impl ResolutionBinner {
    /// 按 1/d² 排序后等数目划分
    pub fn new(d_star_sq: &[f64], n_bins: usize) -> Self {
        let n = d_star_sq.len();
        let n_bins = n_bins.clamp(1, n.max(1));
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| d_star_sq[a].total_cmp(&d_star_sq[b]));

        let mut bin_of = vec![0; n];
        let mut limits = vec![(0.0, f64::INFINITY); n_bins];
        let mut bounds = vec![(f64::INFINITY, 0.0_f64); n_bins];
        for (rank, &i) in order.iter().enumerate() {
            let b = (rank * n_bins / n.max(1)).min(n_bins - 1);
            bin_of[i] = b;
            let s = d_star_sq[i];
            bounds[b].0 = bounds[b].0.min(s);
            bounds[b].1 = bounds[b].1.max(s);
        }
        for (b, (lo, hi)) in bounds.iter().enumerate() {
            let d_max = if *lo > 0.0 && lo.is_finite() { 1.0 / lo.sqrt() } else { f64::INFINITY };
            let d_min = if *hi > 0.0 { 1.0 / hi.sqrt() } else { f64::INFINITY };
            limits[b] = (d_max, d_min);
        }
        ResolutionBinner { bin_of, limits }
    }

    /// 箱数
    pub fn n_bins(&self) -> usize {
        self.limits.len()
    }

    /// 反射 i 的箱号
    pub fn bin_of(&self, i: usize) -> usize {
        self.bin_of[i]
    }

    /// 箱 b 的分辨率范围 (d_max, d_min)
    pub fn limits(&self, b: usize) -> (f64, f64) {
        self.limits[b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(obs_type: ObservationType) -> ReflectionData {
        ReflectionData {
            indices: vec![[1, 2, 3], [-1, -2, -3], [1, 0, 0], [2, 0, 0], [0, 0, 0]],
            data: vec![100.0, 90.0, 50.0, -4.0, 1.0],
            sigmas: vec![4.0, 4.0, 2.0, 1.0, 1.0],
            obs_type,
            labels: vec!["I".to_string(), "SIGI".to_string()],
            raw_flags: Some(vec![0, 0, 1, 0, 0]),
            flag_label: Some("FreeR_flag".to_string()),
        }
    }

    #[test]
    fn test_intensity_to_amplitude() {
        let amps = sample(ObservationType::Intensity).as_amplitudes();
        assert_eq!(amps.obs_type, ObservationType::Amplitude);
        assert!((amps.data[0] - 10.0).abs() < 1e-12);
        assert!((amps.sigmas[0] - 0.2).abs() < 1e-12);
        assert_eq!(amps.data[3], 0.0);
        assert!((amps.sigmas[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_removes_friedel_mates_and_absences() {
        let sg = SpaceGroup::from_symbol("P212121").unwrap();
        let (merged, dropped) = sample(ObservationType::Amplitude).merge_to_asu(&sg);
        // (-1,-2,-3) 为 Friedel 对，(1,0,0) 系统消光，(0,0,0) 剔除
        assert_eq!(merged.len(), 2);
        assert_eq!(dropped, 3);
        assert_eq!(merged.raw_flags.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_free_flags_from_raw() {
        let flags = FreeFlags::from_raw(&[0, 1, 0, 1], 1);
        assert_eq!(flags.count_free(), 2);
        assert!(flags.is_free(1));
        assert!(!flags.is_free(7));
    }

    #[test]
    fn test_generated_flags_follow_lattice_orbits() {
        let swap = HklOperator::integer([[0, 1, 0], [1, 0, 0], [0, 0, -1]]);
        let ident = HklOperator::integer([[1, 0, 0], [0, 1, 0], [0, 0, 1]]);
        let mut indices = Vec::new();
        for h in 1..20 {
            for k in 0..h {
                indices.push([h, k, 3]);
                indices.push([k, h, -3]);
            }
        }
        let flags = FreeFlags::generate(&indices, &[ident, swap], 0.1);
        for pair in 0..indices.len() / 2 {
            assert_eq!(flags.is_free(2 * pair), flags.is_free(2 * pair + 1));
        }
        let frac = flags.free_fraction();
        assert!(frac > 0.0 && frac < 0.4, "fraction {}", frac);
    }

    #[test]
    fn test_binner_equal_counts() {
        let dss: Vec<f64> = (1..=100).map(|i| i as f64 * 0.001).collect();
        let binner = ResolutionBinner::new(&dss, 4);
        assert_eq!(binner.n_bins(), 4);
        let counts = (0..4)
            .map(|b| (0..100).filter(|&i| binner.bin_of(i) == b).count())
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![25, 25, 25, 25]);
        let (d_max, d_min) = binner.limits(0);
        assert!(d_max > d_min);
    }
}
