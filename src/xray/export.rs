//! # 图系数导出
//!
//! 复数图系数拆为振幅列（类型 F）与相位列（类型 P，度）：`<root>` / `PHI<root>`。
//! 观测振幅写作 `<root>` / `SIG<root>`。
//!
//! ## 依赖关系
//! - 被 `commands/maps.rs` 调用
//! - 使用 `parsers/mtz.rs` 的 MtzWriter
//! - 使用 `csv` + `serde` 写出分箱统计

use crate::error::{Result, TwinMapError};
use crate::fmodel::{BinStatistics, MapCoefficients};
use crate::parsers::mtz::MtzWriter;

use num_complex::Complex64;
use std::path::Path;

/// 复数数组拆为 (振幅, 相位°)
pub fn amplitudes_and_phases(values: &[Complex64]) -> (Vec<f64>, Vec<f64>) {
    values
        .iter()
        .map(|c| {
            let phase = if c.norm() > 0.0 { c.arg().to_degrees() } else { 0.0 };
            (c.norm(), phase)
        })
        .unzip()
}

/// 追加一对 `<root>` / `PHI<root>` 列
pub fn add_complex_columns(writer: &mut MtzWriter, root: &str, values: &[Complex64]) -> Result<()> {
    let (amplitudes, phases) = amplitudes_and_phases(values);
    writer.add_column(root, 'F', amplitudes)?;
    writer.add_column(&format!("PHI{}", root), 'P', phases)?;
    Ok(())
}

/// 追加一组图系数，指数顺序须与写出器一致
pub fn add_map_coefficients(writer: &mut MtzWriter, root: &str, coeffs: &MapCoefficients) -> Result<()> {
    if coeffs.indices.as_slice() != writer.indices() {
        return Err(TwinMapError::MtzFormat(format!(
            "{} coefficients for {} do not follow the output reflection list",
            coeffs.map_type, root
        )));
    }
    add_complex_columns(writer, root, &coeffs.values)
}

/// 追加 `<root>` / `SIG<root>` 观测振幅列
pub fn add_observations(writer: &mut MtzWriter, root: &str, f_obs: &[f64], sigmas: &[f64]) -> Result<()> {
    writer.add_column(root, 'F', f_obs.to_vec())?;
    writer.add_column(&format!("SIG{}", root), 'Q', sigmas.to_vec())?;
    Ok(())
}

/// 写出分箱统计 CSV
pub fn write_statistics_csv(stats: &[BinStatistics], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    for row in stats {
        wtr.serialize(row)?;
    }
    wtr.flush().map_err(|e| TwinMapError::FileWriteError {
        path: output_path.display().to_string(),
        source: e,
    })?;
    Ok(())
}
