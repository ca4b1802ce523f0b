//! # 参数模块
//!
//! twinmap 的参数树：默认值、TOML 参数文件合并、按叶路径读写与有效参数显示。
//!
//! ## 参数树
//! ```text
//! input.unit_cell / input.space_group
//! input.xray_data.{file_name, obs_labels, free_flag, free_flag_value}
//! input.model.file_name
//! parameters.twinning.{twin_law, max_delta, detwin_mode}
//! output.{logfile, map_coeffs_root, obs_and_calc, statistics}
//! ```
//!
//! ## 依赖关系
//! - 被 `commands/maps.rs`、`commands/params.rs` 使用
//! - 子模块: interpreter（命令行参数解释）
//! - 使用 `serde` + `toml`

pub mod interpreter;

pub use interpreter::ArgumentInterpreter;

use crate::error::{Result, TwinMapError};
use crate::fmodel::DetwinMode;
use crate::models::UnitCell;
use crate::symmetry::SpaceGroup;
use crate::twin::TwinLaw;

use serde::Serialize;
use std::fs;
use std::path::Path;

/// 全部叶参数的完整路径
pub const LEAF_PATHS: &[&str] = &[
    "input.unit_cell",
    "input.space_group",
    "input.xray_data.file_name",
    "input.xray_data.obs_labels",
    "input.xray_data.free_flag",
    "input.xray_data.free_flag_value",
    "input.model.file_name",
    "parameters.twinning.twin_law",
    "parameters.twinning.max_delta",
    "parameters.twinning.detwin_mode",
    "output.logfile",
    "output.map_coeffs_root",
    "output.obs_and_calc",
    "output.statistics",
];

/// 参数树根
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwinMapParams {
    pub input: InputParams,
    pub parameters: ParametersSection,
    pub output: OutputParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_cell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_group: Option<String>,
    pub xray_data: XrayDataParams,
    pub model: ModelParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct XrayDataParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obs_labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_flag_value: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParametersSection {
    pub twinning: TwinningParams,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwinningParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twin_law: Option<String>,
    /// Le Page δ 上限（度）
    pub max_delta: f64,
    pub detwin_mode: DetwinMode,
}

impl Default for TwinningParams {
    fn default() -> Self {
        TwinningParams {
            twin_law: None,
            max_delta: 3.0,
            detwin_mode: DetwinMode::Algebraic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputParams {
    pub logfile: String,
    pub map_coeffs_root: String,
    /// 空字符串表示不写出
    pub obs_and_calc: String,
    /// 分箱统计 CSV，空字符串表示不写出
    pub statistics: String,
}

impl Default for OutputParams {
    fn default() -> Self {
        OutputParams {
            logfile: "twin_tools.log".to_string(),
            map_coeffs_root: "MAP_COEFFS".to_string(),
            obs_and_calc: "obs_and_calc.mtz".to_string(),
            statistics: String::new(),
        }
    }
}

impl Default for TwinMapParams {
    fn default() -> Self {
        TwinMapParams {
            input: InputParams::default(),
            parameters: ParametersSection::default(),
            output: OutputParams::default(),
        }
    }
}

/// "None"/空值表示未设置
fn optional(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(v.to_string())
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> TwinMapError {
    TwinMapError::InvalidParameter {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl TwinMapParams {
    /// 按完整叶路径设置参数，值经过类型与合法性检查
    pub fn set(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "input.unit_cell" => {
                let v = optional(value);
                if let Some(text) = &v {
                    UnitCell::parse(text).map_err(|e| invalid(path, e.to_string()))?;
                }
                self.input.unit_cell = v;
            }
            "input.space_group" => {
                let v = optional(value);
                if let Some(text) = &v {
                    SpaceGroup::from_symbol(text).map_err(|e| invalid(path, e.to_string()))?;
                }
                self.input.space_group = v;
            }
            "input.xray_data.file_name" => self.input.xray_data.file_name = optional(value),
            "input.xray_data.obs_labels" => self.input.xray_data.obs_labels = optional(value),
            "input.xray_data.free_flag" => self.input.xray_data.free_flag = optional(value),
            "input.xray_data.free_flag_value" => {
                self.input.xray_data.free_flag_value = optional(value)
                    .map(|v| v.parse::<i32>().map_err(|_| invalid(path, format!("'{}' is not an integer", v))))
                    .transpose()?;
            }
            "input.model.file_name" => self.input.model.file_name = optional(value),
            "parameters.twinning.twin_law" => {
                let v = optional(value);
                if let Some(text) = &v {
                    TwinLaw::parse(text)?;
                }
                self.parameters.twinning.twin_law = v;
            }
            "parameters.twinning.max_delta" => {
                let delta: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid(path, format!("'{}' is not a number", value)))?;
                if !(0.0..=90.0).contains(&delta) {
                    return Err(invalid(path, "must lie between 0 and 90 degrees"));
                }
                self.parameters.twinning.max_delta = delta;
            }
            "parameters.twinning.detwin_mode" => {
                self.parameters.twinning.detwin_mode = value.parse()?;
            }
            "output.logfile" => self.output.logfile = value.trim().to_string(),
            "output.map_coeffs_root" => {
                if value.trim().is_empty() {
                    return Err(invalid(path, "must not be empty"));
                }
                self.output.map_coeffs_root = value.trim().to_string();
            }
            "output.obs_and_calc" => self.output.obs_and_calc = optional(value).unwrap_or_default(),
            "output.statistics" => self.output.statistics = optional(value).unwrap_or_default(),
            _ => return Err(TwinMapError::UnknownKeyword(path.to_string())),
        }
        Ok(())
    }

    /// 按完整叶路径读取参数（未设置返回 None）
    pub fn get(&self, path: &str) -> Option<String> {
        let twinning = &self.parameters.twinning;
        match path {
            "input.unit_cell" => self.input.unit_cell.clone(),
            "input.space_group" => self.input.space_group.clone(),
            "input.xray_data.file_name" => self.input.xray_data.file_name.clone(),
            "input.xray_data.obs_labels" => self.input.xray_data.obs_labels.clone(),
            "input.xray_data.free_flag" => self.input.xray_data.free_flag.clone(),
            "input.xray_data.free_flag_value" => self.input.xray_data.free_flag_value.map(|v| v.to_string()),
            "input.model.file_name" => self.input.model.file_name.clone(),
            "parameters.twinning.twin_law" => twinning.twin_law.clone(),
            "parameters.twinning.max_delta" => Some(twinning.max_delta.to_string()),
            "parameters.twinning.detwin_mode" => Some(twinning.detwin_mode.to_string()),
            "output.logfile" => Some(self.output.logfile.clone()),
            "output.map_coeffs_root" => Some(self.output.map_coeffs_root.clone()),
            "output.obs_and_calc" => Some(self.output.obs_and_calc.clone()),
            "output.statistics" => Some(self.output.statistics.clone()),
            _ => None,
        }
    }

    /// 合并 TOML 文本：只覆盖文本中出现的叶参数
    pub fn merge_toml_str(&mut self, content: &str, source: &str) -> Result<()> {
        let table: toml::Table = content.parse().map_err(|e: toml::de::Error| TwinMapError::ParseError {
            format: "TOML".to_string(),
            path: source.to_string(),
            reason: e.to_string(),
        })?;
        let mut leaves = Vec::new();
        flatten("", &toml::Value::Table(table), &mut leaves);
        for (path, value) in leaves {
            self.set(&path, &value)?;
        }
        Ok(())
    }

    /// 合并 TOML 参数文件
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path).map_err(|e| TwinMapError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        self.merge_toml_str(&content, &path.display().to_string())
    }

    /// 有效参数的 TOML 文本；未设置的可选参数以注释列出
    pub fn to_toml_string(&self) -> Result<String> {
        let mut text = toml::to_string_pretty(self).map_err(|e| TwinMapError::Other(e.to_string()))?;
        let unset: Vec<&str> = LEAF_PATHS
            .iter()
            .copied()
            .filter(|p| self.get(p).is_none())
            .collect();
        if !unset.is_empty() {
            text.push_str("\n# not set:\n");
            for path in unset {
                text.push_str(&format!("# {} = None\n", path));
            }
        }
        Ok(text)
    }

    /// 打印有效参数
    pub fn show(&self) -> Result<()> {
        crate::utils::output::print_block(self.to_toml_string()?);
        Ok(())
    }
}

/// TOML 表展开为 (叶路径, 文本值)
fn flatten(prefix: &str, value: &toml::Value, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        toml::Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .map(|v| match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            out.push((prefix.to_string(), joined.join(" ")));
        }
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = TwinMapParams::default();
        assert_eq!(p.parameters.twinning.max_delta, 3.0);
        assert_eq!(p.parameters.twinning.detwin_mode, DetwinMode::Algebraic);
        assert_eq!(p.output.logfile, "twin_tools.log");
        assert_eq!(p.output.map_coeffs_root, "MAP_COEFFS");
        assert_eq!(p.output.obs_and_calc, "obs_and_calc.mtz");
        assert!(p.input.unit_cell.is_none());
    }

    #[test]
    fn test_every_leaf_path_is_settable() {
        let mut p = TwinMapParams::default();
        for path in LEAF_PATHS {
            let value = p.get(path).unwrap_or_default();
            p.set(path, &value).unwrap_or_else(|e| panic!("{}: {}", path, e));
        }
        assert_eq!(p, TwinMapParams::default());
    }

    #[test]
    fn test_set_validates_values() {
        let mut p = TwinMapParams::default();
        assert!(p.set("parameters.twinning.max_delta", "abc").is_err());
        assert!(p.set("parameters.twinning.max_delta", "-1").is_err());
        assert!(p.set("parameters.twinning.detwin_mode", "magic").is_err());
        assert!(p.set("parameters.twinning.twin_law", "h,k").is_err());
        assert!(p.set("input.space_group", "P 7").is_err());
        assert!(p.set("input.unit_cell", "10 20").is_err());
        assert!(p.set("input.xray_data.free_flag_value", "x").is_err());
        assert!(p.set("output.nothing", "1").is_err());

        p.set("parameters.twinning.detwin_mode", "proportional").unwrap();
        p.set("input.space_group", "P 21 21 21").unwrap();
        p.set("input.xray_data.free_flag_value", "0").unwrap();
        assert_eq!(p.parameters.twinning.detwin_mode, DetwinMode::Proportional);
        assert_eq!(p.input.xray_data.free_flag_value, Some(0));
        p.set("input.space_group", "None").unwrap();
        assert!(p.input.space_group.is_none());
    }

    #[test]
    fn test_merge_toml_overrides_only_given_keys() {
        let mut p = TwinMapParams::default();
        p.set("output.logfile", "mine.log").unwrap();
        p.merge_toml_str(
            r#"
[input]
unit_cell = [50.0, 50.0, 80.0, 90, 90, 90]
[input.xray_data]
file_name = "data.mtz"
[parameters.twinning]
max_delta = 5
detwin_mode = "auto"
"#,
            "test.toml",
        )
        .unwrap();
        assert_eq!(p.input.xray_data.file_name.as_deref(), Some("data.mtz"));
        assert_eq!(p.parameters.twinning.max_delta, 5.0);
        assert_eq!(p.parameters.twinning.detwin_mode, DetwinMode::Auto);
        assert_eq!(p.output.logfile, "mine.log");
        assert!(UnitCell::parse(p.input.unit_cell.as_deref().unwrap()).is_ok());

        assert!(p.merge_toml_str("[input]\nbogus = 1\n", "bad.toml").is_err());
        assert!(p.merge_toml_str("[input", "broken.toml").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut p = TwinMapParams::default();
        p.set("input.unit_cell", "40 40 60 90 90 90").unwrap();
        p.set("parameters.twinning.twin_law", "k,h,-l").unwrap();
        let text = p.to_toml_string().unwrap();
        assert!(text.contains("[parameters.twinning]"));
        assert!(text.contains("# input.space_group = None"));

        let mut q = TwinMapParams::default();
        q.merge_toml_str(&text, "round-trip").unwrap();
        assert_eq!(p, q);
    }
}
