//! # 解析器模块
//!
//! 反射文件（MTZ、SHELX HKLF4）与模型文件（PDB）的读取，以及从任意输入文件提取晶体对称性。
//!
//! ## 依赖关系
//! - 被 `config/interpreter.rs` 和 `commands/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: mtz, shelx, pdb

pub mod mtz;
pub mod pdb;
pub mod shelx;

use crate::error::{Result, TwinMapError};
use crate::models::{AtomicModel, CrystalSymmetry, ReflectionData};
use std::path::Path;

/// 由扩展名判断的输入文件类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// TOML 参数文件
    Parameters,
    /// 反射数据
    Reflections,
    /// 原子模型
    Model,
    Unknown,
}

impl FileKind {
    pub fn detect(path: &Path) -> Self {
        match extension(path).as_str() {
            "toml" | "eff" | "params" | "phil" => FileKind::Parameters,
            "mtz" | "hkl" => FileKind::Reflections,
            "pdb" | "ent" => FileKind::Model,
            _ => FileKind::Unknown,
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

/// 读取反射数据与文件内的晶体对称性
pub fn read_reflections(
    path: &Path,
    obs_labels: Option<&str>,
    free_label: Option<&str>,
) -> Result<(ReflectionData, CrystalSymmetry)> {
    match extension(path).as_str() {
        "mtz" => {
            let mtz = mtz::read_mtz(path)?;
            let data = mtz.extract_reflections(obs_labels, free_label, path)?;
            Ok((data, mtz.crystal_symmetry()))
        }
        "hkl" => Ok((shelx::parse_hklf4_file(path)?, CrystalSymmetry::default())),
        _ => Err(TwinMapError::UnsupportedFormat(format!(
            "Cannot read reflections from: {}",
            path.display()
        ))),
    }
}

/// 读取原子模型
pub fn read_model(path: &Path) -> Result<AtomicModel> {
    match extension(path).as_str() {
        "pdb" | "ent" => pdb::parse_pdb_file(path),
        _ => Err(TwinMapError::UnsupportedFormat(format!(
            "Cannot read model from: {}",
            path.display()
        ))),
    }
}

/// 从任意支持的文件提取晶体对称性（不含对称信息的格式返回空）
pub fn symmetry_from_file(path: &Path) -> Result<CrystalSymmetry> {
    if !path.is_file() {
        return Err(TwinMapError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    match extension(path).as_str() {
        "mtz" => Ok(mtz::read_mtz(path)?.crystal_symmetry()),
        "pdb" | "ent" => Ok(pdb::parse_pdb_file(path)?.symmetry),
        _ => Ok(CrystalSymmetry::default()),
    }
}
