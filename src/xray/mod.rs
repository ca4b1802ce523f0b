//! # X 射线计算模块
//!
//! ## 子模块
//! - `scattering`: Cromer-Mann 原子散射因子
//! - `structure_factors`: 模型结构因子
//! - `export`: 图系数 MTZ 与统计 CSV 导出
//!
//! ## 依赖关系
//! - 被 `fmodel/`、`commands/maps.rs` 使用
//! - 使用 `models/structure.rs`、`symmetry/`

pub mod export;
pub mod scattering;
pub mod structure_factors;

pub use structure_factors::{unknown_elements, StructureFactorCalculator};
