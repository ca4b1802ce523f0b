//! # SHELX HKLF 4 格式解析器
//!
//! ## 格式说明
//! ```text
//!    1   0   0  123.45    4.56
//!    h   k   l       I   sigI   （3I4, 2F8.2，可选批次号）
//!    0   0   0    0.00    0.00   ← 结束标记
//! ```
//! 文件不含晶胞与空间群信息。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 使用
//! - 使用 `models/miller.rs`

use crate::error::{Result, TwinMapError};
use crate::models::{ObservationType, ReflectionData};

use std::fs;
use std::path::Path;

/// 解析 HKLF 4 文件
pub fn parse_hklf4_file(path: &Path) -> Result<ReflectionData> {
    let content = fs::read_to_string(path).map_err(|e| TwinMapError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_hklf4_content(&content).map_err(|reason| TwinMapError::ParseError {
        format: "SHELX HKLF4".to_string(),
        path: path.display().to_string(),
        reason,
    })
}

/// 从字符串内容解析 HKLF 4
pub fn parse_hklf4_content(content: &str) -> std::result::Result<ReflectionData, String> {
    let mut data = ReflectionData {
        indices: Vec::new(),
        data: Vec::new(),
        sigmas: Vec::new(),
        obs_type: ObservationType::Intensity,
        labels: vec!["I".to_string(), "SIGI".to_string()],
        raw_flags: None,
        flag_label: None,
    };

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (h, i, s) = parse_fixed(line)
            .or_else(|| parse_free(line))
            .ok_or_else(|| format!("line {}: cannot parse '{}'", line_no + 1, line))?;
        if h == [0, 0, 0] {
            break;
        }
        data.indices.push(h);
        data.data.push(i);
        data.sigmas.push(s);
    }

    Ok(data)
}

fn field(line: &str, start: usize, end: usize) -> Option<&str> {
    let end = end.min(line.len());
    if start >= end {
        return None;
    }
    line.get(start..end).map(str::trim)
}

/// 固定列：3I4, 2F8.2
fn parse_fixed(line: &str) -> Option<([i32; 3], f64, f64)> {
    if line.len() < 20 {
        return None;
    }
    let h = field(line, 0, 4)?.parse().ok()?;
    let k = field(line, 4, 8)?.parse().ok()?;
    let l = field(line, 8, 12)?.parse().ok()?;
    let i = field(line, 12, 20)?.parse().ok()?;
    let s = field(line, 20, 28).and_then(|v| v.parse().ok()).unwrap_or(0.0);
    Some(([h, k, l], i, s))
}

/// 以空白分隔的宽松格式
fn parse_free(line: &str) -> Option<([i32; 3], f64, f64)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    let h = parts[0].parse().ok()?;
    let k = parts[1].parse().ok()?;
    let l = parts[2].parse().ok()?;
    let i = parts[3].parse().ok()?;
    let s = parts.get(4).and_then(|v| v.parse().ok()).unwrap_or(0.0);
    Some(([h, k, l], i, s))
}
