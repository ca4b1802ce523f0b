//! # 非孪晶模型管理器
//!
//! F_model = k · aniso · F_calc · solvent，标度参数由网格搜索拟合。
//!
//! ## 依赖关系
//! - 被 `commands/maps.rs` 在没有孪晶律时使用
//! - 使用 `fmodel/scaling.rs`、`fmodel/sigmaa.rs`

use super::scaling::{self, ScaleParams};
use super::sigmaa::{self, SigmaAInput, SigmaAWeights};
use super::{BinStatistics, MapCoefficients, MapType, ModelData, ModelManager};
use crate::error::Result;
use crate::utils::output;

use num_complex::Complex64;
use rayon::prelude::*;

/// 单域模型
pub struct FModelManager<'a> {
    data: &'a ModelData,
    scales: ScaleParams,
}

impl<'a> FModelManager<'a> {
    pub fn new(data: &'a ModelData) -> Self {
        FModelManager {
            data,
            scales: ScaleParams::default(),
        }
    }

    /// 给定参数下 k = 1 的模型振幅
    fn amplitudes_with(data: &ModelData, params: &ScaleParams) -> Vec<f64> {
        (0..data.len())
            .into_par_iter()
            .map(|i| data.f_calc[i].norm() * params.model_factor(&data.indices[i], data.d_star_sq[i]))
            .collect()
    }

    /// 已标度的 |F_model|
    fn scaled_amplitudes(&self) -> Vec<f64> {
        Self::amplitudes_with(self.data, &self.scales)
            .into_iter()
            .map(|a| a * self.scales.k_overall)
            .collect()
    }

    fn weights(&self) -> SigmaAWeights {
        let fm = self.scaled_amplitudes();
        sigmaa::estimate(&SigmaAInput {
            f_obs: &self.data.f_obs,
            f_calc: &fm,
            centric: &self.data.centric,
            epsilon: &self.data.epsilon,
            free: &self.data.free,
            binner: &self.data.binner,
        })
    }

    /// Io - k²|Fm|²
    fn intensity_residuals(&self) -> Vec<f64> {
        self.scaled_amplitudes()
            .iter()
            .zip(&self.data.f_obs)
            .map(|(fm, fo)| fo * fo - fm * fm)
            .collect()
    }
}

impl ModelManager for FModelManager<'_> {
    fn update_all_scales(&mut self) -> Result<()> {
        let data = self.data;
        self.scales = scaling::optimize_scales(data, |p| Self::amplitudes_with(data, p));
        Ok(())
    }

    fn r_values(&self) -> (f64, f64) {
        let fm = self.scaled_amplitudes();
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
        output::print_line(&format!("r_work = {:.4}  r_free = {:.4}", r_work, r_free));
        self.show_k_sol_b_sol_b_cart_target();
        super::show_bin_table(&self.bin_statistics());
    }

    fn map_coefficients(&self, kind: MapType) -> MapCoefficients {
        let f_model = self.f_model();
        let values = match kind {
            MapType::Gradient => super::gradient_map(&self.data.f_obs, &f_model, &self.intensity_residuals()),
            _ => super::weighted_map(self.data, &self.data.f_obs, &f_model, &self.weights(), kind),
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
        super::bin_statistics(
            "untwinned",
            self.data,
            &self.data.f_obs,
            &self.scaled_amplitudes(),
            &self.weights(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmodel::data::test_support::*;
    use crate::models::UnitCell;
    use crate::symmetry::SpaceGroup;

    fn perfect_data(k: f64) -> ModelData {
        let cell = UnitCell::new([20.0, 20.0, 30.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P4").unwrap();
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
        let f_obs = reference.f_calc.iter().map(|f| k * f.norm()).collect();
        ModelData::new(cell, sg, &reflections(indices, f_obs), every_tenth(n), small_model()).unwrap()
    }

    #[test]
    fn test_perfect_model_statistics() {
        let data = perfect_data(2.5);
        let mut manager = FModelManager::new(&data);
        manager.update_all_scales().unwrap();
        let (r_work, r_free) = manager.r_values();
        assert!(r_work < 1e-6, "r_work {}", r_work);
        assert!(r_free < 1e-6, "r_free {}", r_free);
        assert!(manager.target() < 1e-10);
        assert!((manager.scales.k_overall - 2.5).abs() < 1e-6);
        assert!(manager.scales.k_sol.abs() < 1e-12);
    }

    #[test]
    fn test_map_coefficients_follow_model_phases() {
        let data = perfect_data(1.0);
        let mut manager = FModelManager::new(&data);
        manager.update_all_scales().unwrap();
        let fm = manager.f_model();

        let two = manager.map_coefficients(MapType::TwoMFoDFc);
        assert_eq!(two.indices.len(), data.len());
        for (c, f) in two.values.iter().zip(&fm) {
            if f.norm() > 1e-6 && c.norm() > 1e-6 {
                // 同相位（或反相）
                let cross = c.re * f.im - c.im * f.re;
                assert!(cross.abs() < 1e-6 * c.norm() * f.norm());
            }
        }

        // 完美模型的梯度为零，缩放后仍为零
        let grad = manager.map_coefficients(MapType::Gradient);
        assert!(grad.values.iter().all(|c| c.norm() < 1e-6));
    }

    #[test]
    fn test_bin_statistics_cover_all_reflections() {
        let data = perfect_data(1.0);
        let mut manager = FModelManager::new(&data);
        manager.update_all_scales().unwrap();
        let stats = manager.bin_statistics();
        let total: usize = stats.iter().map(|s| s.n_work + s.n_free).sum();
        assert_eq!(total, data.len());
        assert!(stats.iter().all(|s| s.model == "untwinned"));
    }
}
