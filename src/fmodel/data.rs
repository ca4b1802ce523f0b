//! # 模型数据上下文
//!
//! 一次性准备观测振幅、Free-R 标记、F_calc 与逐反射的对称性信息，
//! 供各个模型管理器（普通 / 孪晶）共享。
//!
//! ## 依赖关系
//! - 被 `fmodel/manager.rs`、`fmodel/twin_manager.rs` 使用
//! - 使用 `xray/structure_factors.rs` 计算 F_calc

use crate::error::{Result, TwinMapError};
use crate::models::{
    AtomicModel, FreeFlags, MillerIndex, ObservationType, ReflectionData, ResolutionBinner, UnitCell,
};
use crate::symmetry::{asu_index_with, IntMatrix, SpaceGroup};
use crate::utils::output;
use crate::xray::{unknown_elements, StructureFactorCalculator};

use num_complex::Complex64;
use std::collections::HashMap;

/// 每个分辨率箱的目标反射数
const REFLECTIONS_PER_BIN: usize = 500;
const MAX_BINS: usize = 20;

/// 共享模型数据
#[derive(Debug, Clone)]
pub struct ModelData {
    pub cell: UnitCell,
    pub space_group: SpaceGroup,
    pub indices: Vec<MillerIndex>,
    pub f_obs: Vec<f64>,
    pub sigmas: Vec<f64>,
    pub free: FreeFlags,
    /// 模型计算结构因子（未标度）
    pub f_calc: Vec<Complex64>,
    pub d_star_sq: Vec<f64>,
    pub centric: Vec<bool>,
    pub epsilon: Vec<f64>,
    pub binner: ResolutionBinner,
    model: AtomicModel,
    laue: Vec<IntMatrix>,
    lookup: HashMap<MillerIndex, usize>,
}

impl ModelData {
    /// 由振幅数据、Free-R 标记与原子模型构建
    pub fn new(
        cell: UnitCell,
        space_group: SpaceGroup,
        f_obs: &ReflectionData,
        free: FreeFlags,
        model: AtomicModel,
    ) -> Result<Self> {
        if f_obs.obs_type != ObservationType::Amplitude {
            return Err(TwinMapError::Other(
                "model data requires amplitudes; convert intensities first".to_string(),
            ));
        }
        if f_obs.is_empty() {
            return Err(TwinMapError::NoDataAvailable);
        }
        free.check_size(f_obs.len())?;

        let unknown = unknown_elements(&model);
        if !unknown.is_empty() {
            output::print_warning(&format!(
                "No scattering factors for element(s): {} (treated as zero)",
                unknown.join(", ")
            ));
        }

        let indices = f_obs.indices.clone();
        let f_calc = StructureFactorCalculator::new(&cell, &space_group).compute(&model, &indices);
        let d_star_sq: Vec<f64> = indices.iter().map(|h| cell.d_star_sq(h)).collect();
        let centric = indices.iter().map(|h| space_group.is_centric(h)).collect();
        let epsilon = indices.iter().map(|h| space_group.epsilon(h) as f64).collect();
        let n_bins = (indices.len() / REFLECTIONS_PER_BIN).clamp(1, MAX_BINS);
        let binner = ResolutionBinner::new(&d_star_sq, n_bins);

        let laue = space_group.laue_rotations();
        let lookup = indices
            .iter()
            .enumerate()
            .map(|(i, h)| (asu_index_with(&laue, h), i))
            .collect();

        Ok(ModelData {
            cell,
            space_group,
            indices,
            f_obs: f_obs.data.clone(),
            sigmas: f_obs.sigmas.clone(),
            free,
            f_calc,
            d_star_sq,
            centric,
            epsilon,
            binner,
            model,
            laue,
            lookup,
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// 是否属于工作集
    pub fn is_work(&self, i: usize) -> bool {
        !self.free.is_free(i)
    }

    /// 对称等效于 h 的观测反射位置
    pub fn find(&self, h: &MillerIndex) -> Option<usize> {
        self.lookup.get(&asu_index_with(&self.laue, h)).copied()
    }

    /// 晶体点群旋转
    pub fn rotations(&self) -> Vec<IntMatrix> {
        self.space_group.rotations()
    }

    /// 为任意指数计算 F_calc（如孪晶相关指数）
    pub fn calc_structure_factors(&self, indices: &[MillerIndex]) -> Vec<Complex64> {
        StructureFactorCalculator::new(&self.cell, &self.space_group).compute(&self.model, indices)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! 由模型自身生成观测数据的小体系

    use super::*;
    use crate::models::Atom;

    pub fn small_model() -> AtomicModel {
        let atoms = vec![
            Atom::new("C", [3.2, 4.1, 7.5]).with_b_iso(12.0),
            Atom::new("N", [10.7, 2.3, 15.2]).with_b_iso(15.0),
            Atom::new("O", [6.6, 12.9, 3.3]).with_b_iso(18.0),
            Atom::new("S", [15.1, 8.8, 21.4]).with_b_iso(20.0),
            Atom::new("C", [1.9, 17.2, 11.1]).with_b_iso(14.0),
            Atom::new("O", [12.4, 14.6, 25.0]).with_b_iso(16.0),
        ];
        AtomicModel::new("small", atoms)
    }

    /// P4 晶胞中一个半球的指数（按 Laue 群去重）
    pub fn p4_indices(cell: &UnitCell, sg: &SpaceGroup, d_min: f64) -> Vec<MillerIndex> {
        let laue = sg.laue_rotations();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for h in -8..=8 {
            for k in -8..=8 {
                for l in -12..=12 {
                    let idx = [h, k, l];
                    if idx == [0, 0, 0] || cell.d_spacing(&idx) < d_min || sg.is_sys_absent(&idx) {
                        continue;
                    }
                    let asu = asu_index_with(&laue, &idx);
                    if seen.insert(asu) {
                        out.push(asu);
                    }
                }
            }
        }
        out
    }

    pub fn reflections(indices: Vec<MillerIndex>, values: Vec<f64>) -> ReflectionData {
        let n = values.len();
        ReflectionData {
            indices,
            data: values,
            sigmas: vec![1.0; n],
            obs_type: ObservationType::Amplitude,
            labels: vec!["FP".to_string(), "SIGFP".to_string()],
            raw_flags: None,
            flag_label: None,
        }
    }

    /// 每 10 个反射取 1 个作为测试集
    pub fn every_tenth(n: usize) -> FreeFlags {
        FreeFlags::from_raw(&(0..n).map(|i| (i % 10 == 0) as i32).collect::<Vec<_>>(), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::Atom;

    #[test]
    fn test_build_and_lookup() {
        let cell = UnitCell::new([20.0, 20.0, 30.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P4").unwrap();
        let indices = p4_indices(&cell, &sg, 4.0);
        let n = indices.len();
        let data = ModelData::new(
            cell,
            sg,
            &reflections(indices.clone(), vec![10.0; n]),
            every_tenth(n),
            small_model(),
        )
        .unwrap();
        assert_eq!(data.len(), n);
        assert_eq!(data.f_calc.len(), n);

        let h = indices[3];
        // (-k, h, l) 是 P4 等效指数
        assert_eq!(data.find(&[-h[1], h[0], h[2]]), Some(3));
        assert!(!data.is_work(0));
        assert!(data.is_work(1));
    }

    #[test]
    fn test_rejects_intensities_and_empty_data() {
        let cell = UnitCell::new([20.0, 20.0, 30.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P4").unwrap();
        let mut refl = reflections(vec![[1, 0, 0]], vec![1.0]);
        refl.obs_type = ObservationType::Intensity;
        assert!(ModelData::new(cell, sg.clone(), &refl, every_tenth(1), small_model()).is_err());

        let empty = reflections(Vec::new(), Vec::new());
        let err = ModelData::new(cell, sg, &empty, every_tenth(0), small_model()).unwrap_err();
        assert_eq!(err.to_string(), "No data available");
    }

    #[test]
    fn test_unknown_elements_warned_once() {
        let cell = UnitCell::new([20.0, 20.0, 30.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P4").unwrap();
        let indices = p4_indices(&cell, &sg, 6.0);
        let n = indices.len();
        let mut model = small_model();
        model.atoms.push(Atom::new("Qq", [2.0, 2.0, 2.0]));
        model.atoms.push(Atom::new("Qq", [4.0, 4.0, 4.0]));

        output::set_quiet(true);
        let data = ModelData::new(cell, sg, &reflections(indices, vec![1.0; n]), every_tenth(n), model).unwrap();
        data.calc_structure_factors(&[[1, 2, 3], [2, 0, 1]]);
        data.calc_structure_factors(&[[0, 0, 4]]);

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.txt");
        output::save_log(&log).unwrap();
        let text = std::fs::read_to_string(&log).unwrap();
        assert_eq!(text.matches("No scattering factors for element(s): Qq ").count(), 1);
    }
}
