//! # 原子模型
//!
//! 大分子原子模型的统一表示：原子位置（笛卡尔坐标，Å）、占有率、各向同性 B 因子，
//! 以及从坐标文件读取的可选晶体对称性。分数坐标在对称性确定后由晶胞换算。
//!
//! ## 依赖关系
//! - 被 `parsers/pdb.rs`、`xray/`、`fmodel/` 使用
//! - 使用 `models/symmetry.rs`

use crate::models::{CrystalSymmetry, UnitCell};
use crate::utils::output;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 原子信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    /// 原子名（PDB 13-16 列）
    pub name: String,

    /// 元素符号（已规范化，如 "Fe"）
    pub element: String,

    /// 笛卡尔坐标 [x, y, z] (Å)
    pub xyz: [f64; 3],

    /// 占有率
    pub occupancy: f64,

    /// 各向同性 B 因子 (Å²)
    pub b_iso: f64,
}

impl Atom {
    pub fn new(element: impl Into<String>, xyz: [f64; 3]) -> Self {
        let element = element.into();
        Atom {
            name: element.clone(),
            element,
            xyz,
            occupancy: 1.0,
            b_iso: 20.0,
        }
    }

    pub fn with_occupancy(mut self, occupancy: f64) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn with_b_iso(mut self, b_iso: f64) -> Self {
        self.b_iso = b_iso;
        self
    }
}

/// 原子模型
#[derive(Debug, Clone, Default)]
pub struct AtomicModel {
    /// 模型名称（通常为文件名）
    pub name: String,

    /// 原子列表
    pub atoms: Vec<Atom>,

    /// CRYST1 记录给出的对称性
    pub symmetry: CrystalSymmetry,
}

impl AtomicModel {
    pub fn new(name: impl Into<String>, atoms: Vec<Atom>) -> Self {
        AtomicModel {
            name: name.into(),
            atoms,
            symmetry: CrystalSymmetry::default(),
        }
    }

    /// 原子数
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// 组成（按元素计数，例如 "C120 N30 O35 S2"）
    pub fn formula(&self) -> String {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

        for atom in &self.atoms {
            *counts.entry(atom.element.as_str()).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .map(|(el, count)| format!("{}{}", el, count))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 以给定晶胞换算的分数坐标
    pub fn sites_frac(&self, cell: &UnitCell) -> Vec<[f64; 3]> {
        self.atoms.iter().map(|a| cell.fractionalize(&a.xyz)).collect()
    }

    /// 平均 B 因子
    pub fn mean_b(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.atoms.iter().map(|a| a.b_iso).sum::<f64>() / self.atoms.len() as f64
    }

    /// 总占有率
    pub fn total_occupancy(&self) -> f64 {
        self.atoms.iter().map(|a| a.occupancy).sum()
    }

    /// 打印模型摘要
    pub fn show_summary(&self) {
        output::print_line(&format!("Model: {}", self.name));
        output::print_line(&format!("  Number of atoms: {}", self.len()));
        output::print_line(&format!("  Composition: {}", self.formula()));
        output::print_line(&format!("  Total occupancy: {:.2}", self.total_occupancy()));
        output::print_line(&format!("  Mean B: {:.2}", self.mean_b()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AtomicModel {
        let atoms = vec![
            Atom::new("C", [0.1, 0.2, 0.3]).with_b_iso(10.0),
            Atom::new("C", [0.2, 0.2, 0.3]).with_b_iso(20.0),
            Atom::new("N", [0.3, 0.2, 0.3]).with_b_iso(30.0),
            Atom::new("O", [0.4, 0.2, 0.3]).with_occupancy(0.5).with_b_iso(40.0),
        ];
        AtomicModel::new("test", atoms)
    }

    #[test]
    fn test_formula() {
        assert_eq!(sample().formula(), "C2 N1 O1");
    }

    #[test]
    fn test_mean_b_and_occupancy() {
        let model = sample();
        assert!((model.mean_b() - 25.0).abs() < 1e-12);
        assert!((model.total_occupancy() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_sites_frac() {
        let cell = UnitCell::new([10.0, 20.0, 40.0, 90.0, 90.0, 90.0]).unwrap();
        let model = AtomicModel::new("m", vec![Atom::new("S", [5.0, 5.0, 10.0])]);
        let frac = model.sites_frac(&cell);
        assert!((frac[0][0] - 0.5).abs() < 1e-12);
        assert!((frac[0][1] - 0.25).abs() < 1e-12);
        assert!((frac[0][2] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_empty_model() {
        let model = AtomicModel::default();
        assert!(model.is_empty());
        assert_eq!(model.mean_b(), 0.0);
        assert_eq!(model.formula(), "");
    }
}
