//! # 结构因子计算
//!
//! 由原子模型直接求和计算复结构因子：
//!
//! F(h) = Σ_atoms Σ_ops occ · f(s) · exp(-B s²) · exp(2πi h·(R x + t))
//!
//! 其中 s = sinθ/λ = 1/(2d)。按反射并行（rayon）。
//!
//! ## 依赖关系
//! - 被 `fmodel/` 调用
//! - 使用 `models/`、`symmetry/`、`xray/scattering.rs`
//! - 使用 `num-complex` 表示复数，`rayon` 并行

use crate::models::{AtomicModel, MillerIndex, UnitCell};
use crate::symmetry::SpaceGroup;
use crate::xray::scattering::{self, ScatteringFactorParams};

use num_complex::Complex64;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::f64::consts::PI;

/// 预处理后的散射体
struct Scatterer {
    /// 所有对称等效位置（分数坐标）
    sites: Vec<[f64; 3]>,
    params: Option<&'static ScatteringFactorParams>,
    occupancy: f64,
    b_iso: f64,
}

/// 结构因子计算器
pub struct StructureFactorCalculator<'a> {
    cell: &'a UnitCell,
    space_group: &'a SpaceGroup,
}

impl<'a> StructureFactorCalculator<'a> {
    pub fn new(cell: &'a UnitCell, space_group: &'a SpaceGroup) -> Self {
        Self { cell, space_group }
    }

    /// 计算给定指数的复结构因子，未知元素贡献为零
    pub fn compute(&self, model: &AtomicModel, indices: &[MillerIndex]) -> Vec<Complex64> {
        let scatterers = self.prepare(model);
        indices
            .par_iter()
            .map(|h| self.structure_factor(&scatterers, h))
            .collect()
    }

    fn prepare(&self, model: &AtomicModel) -> Vec<Scatterer> {
        let ops = self.space_group.operators();
        model
            .atoms
            .iter()
            .zip(model.sites_frac(self.cell))
            .map(|(atom, frac)| Scatterer {
                sites: ops.iter().map(|op| op.apply_frac(&frac)).collect(),
                params: scattering::get_scattering_factor(&atom.element),
                occupancy: atom.occupancy,
                b_iso: atom.b_iso,
            })
            .collect()
    }

    fn structure_factor(&self, scatterers: &[Scatterer], h: &MillerIndex) -> Complex64 {
        let stol_sq = self.cell.d_star_sq(h) / 4.0;
        let s = stol_sq.sqrt();
        let hf = [h[0] as f64, h[1] as f64, h[2] as f64];

        let mut total = Complex64::new(0.0, 0.0);
        for sc in scatterers {
            let Some(params) = sc.params else {
                continue;
            };
            let weight = sc.occupancy * params.calculate(s) * (-sc.b_iso * stol_sq).exp();
            let mut sum = Complex64::new(0.0, 0.0);
            for x in &sc.sites {
                let phase = 2.0 * PI * (hf[0] * x[0] + hf[1] * x[1] + hf[2] * x[2]);
                sum += Complex64::from_polar(1.0, phase);
            }
            total += sum * weight;
        }
        total
    }
}

/// 模型中没有散射因子的元素（去重排序）
pub fn unknown_elements(model: &AtomicModel) -> Vec<String> {
    model
        .atoms
        .iter()
        .filter(|a| !scattering::is_known(&a.element))
        .map(|a| a.element.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Atom;

    fn cubic(a: f64) -> UnitCell {
        UnitCell::new([a, a, a, 90.0, 90.0, 90.0]).unwrap()
    }

    #[test]
    fn test_single_atom_at_origin() {
        let cell = cubic(10.0);
        let sg = SpaceGroup::from_symbol("P1").unwrap();
        let model = AtomicModel::new("o", vec![Atom::new("O", [0.0, 0.0, 0.0]).with_b_iso(15.0)]);
        let h = [1, 2, 3];
        let f = StructureFactorCalculator::new(&cell, &sg).compute(&model, &[h])[0];

        let stol_sq = cell.d_star_sq(&h) / 4.0;
        let f0 = scattering::get_scattering_factor("O").unwrap().calculate(stol_sq.sqrt());
        let expected = f0 * (-15.0 * stol_sq).exp();
        assert!((f.re - expected).abs() < 1e-10);
        assert!(f.im.abs() < 1e-10);
    }

    #[test]
    fn test_friedel_mates_are_conjugate() {
        let cell = UnitCell::new([31.0, 42.0, 55.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P212121").unwrap();
        let model = AtomicModel::new(
            "m",
            vec![
                Atom::new("C", [3.1, 7.4, 11.2]),
                Atom::new("N", [12.5, 2.2, 30.1]).with_b_iso(35.0),
                Atom::new("S", [20.0, 33.0, 41.0]),
            ],
        );
        let f = StructureFactorCalculator::new(&cell, &sg).compute(&model, &[[2, 3, 5], [-2, -3, -5]]);
        assert!((f[0].re - f[1].re).abs() < 1e-9);
        assert!((f[0].im + f[1].im).abs() < 1e-9);
    }

    #[test]
    fn test_centrosymmetric_structure_is_real() {
        let cell = cubic(12.0);
        let sg = SpaceGroup::from_symbol("P-1").unwrap();
        let model = AtomicModel::new(
            "c",
            vec![Atom::new("C", [1.3, 2.7, 5.1]), Atom::new("O", [4.0, 0.5, 9.2])],
        );
        let f = StructureFactorCalculator::new(&cell, &sg).compute(&model, &[[1, 2, 3], [4, -1, 2]]);
        for v in f {
            assert!(v.im.abs() < 1e-9 * v.re.abs().max(1.0));
        }
    }

    #[test]
    fn test_unknown_elements_listed_once() {
        let model = AtomicModel::new(
            "u",
            vec![
                Atom::new("Xx", [0.0; 3]),
                Atom::new("Xx", [1.0; 3]),
                Atom::new("C", [2.0; 3]),
            ],
        );
        assert_eq!(unknown_elements(&model), vec!["Xx".to_string()]);
    }

    #[test]
    fn test_unknown_element_contributes_nothing() {
        let cell = cubic(10.0);
        let sg = SpaceGroup::from_symbol("P1").unwrap();
        let calc = StructureFactorCalculator::new(&cell, &sg);
        let carbon = AtomicModel::new("c", vec![Atom::new("C", [1.0, 2.0, 3.0])]);
        let mixed = AtomicModel::new(
            "cx",
            vec![Atom::new("C", [1.0, 2.0, 3.0]), Atom::new("Xx", [4.0, 4.0, 4.0])],
        );
        let hkl = [[1, 0, 0], [2, 3, 1]];
        let a = calc.compute(&carbon, &hkl);
        let b = calc.compute(&mixed, &hkl);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).norm() < 1e-12);
        }
    }
}
