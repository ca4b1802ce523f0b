//! # MTZ 格式读写
//!
//! CCP4 MTZ 二进制反射文件的读取与写出。
//!
//! ## 文件布局
//! ```text
//! 字节 0-3    "MTZ "
//! 字节 4-7    头部起始位置（4 字节字，从 1 计数）
//! 字节 8-11   机器标记（0x44 0x41 → 小端 IEEE）
//! 字节 80-    反射数据，按行存放的 f32（nref × ncol）
//! 头部        80 字符记录：VERS, TITLE, NCOL, CELL, SYMINF, SYMM, COLUMN ... END
//! ```
//!
//! 列类型: H 指数, F 振幅, Q 标准偏差, J 强度, I 整数, P 相位（度）, W 权重。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 与 `xray/export.rs` 使用
//! - 使用 `models/`、`symmetry/`

use crate::error::{Result, TwinMapError};
use crate::models::{CrystalSymmetry, MillerIndex, ObservationType, ReflectionData, UnitCell};
use crate::symmetry::{SpaceGroup, SymOp};

use std::fs;
use std::path::Path;

/// 数据区起始字节
const DATA_OFFSET: usize = 80;

/// 头部记录长度
const RECORD_LEN: usize = 80;

/// 常见 Free-R 标记列名
const FREE_FLAG_NAMES: &[&str] = &[
    "FreeR_flag",
    "FREE",
    "R-free-flags",
    "TEST",
    "FreeRflag",
    "RFREE",
];

/// MTZ 数据列
#[derive(Debug, Clone)]
pub struct MtzColumn {
    pub label: String,
    pub col_type: char,
    pub values: Vec<f64>,
}

/// 已读取的 MTZ 文件
#[derive(Debug, Clone)]
pub struct MtzFile {
    pub cell: Option<UnitCell>,
    pub space_group: Option<SpaceGroup>,
    pub columns: Vec<MtzColumn>,
    pub nref: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Endian {
    Little,
    Big,
}

fn format_err(path: &Path, reason: impl Into<String>) -> TwinMapError {
    TwinMapError::MtzFormat(format!("{}: {}", path.display(), reason.into()))
}

/// 读取 MTZ 文件
pub fn read_mtz(path: &Path) -> Result<MtzFile> {
    let bytes = fs::read(path).map_err(|e| TwinMapError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_mtz_bytes(&bytes, path)
}

/// 从内存字节解析 MTZ
pub fn parse_mtz_bytes(bytes: &[u8], path: &Path) -> Result<MtzFile> {
    if bytes.len() < DATA_OFFSET || &bytes[0..4] != b"MTZ " {
        return Err(format_err(path, "missing MTZ magic number"));
    }

    let real_format = bytes[8] >> 4;
    let int_format = bytes[9] >> 4;
    let real_endian = match real_format {
        4 => Endian::Little,
        1 => Endian::Big,
        other => return Err(format_err(path, format!("unsupported float format {}", other))),
    };
    let int_endian = if int_format == 1 { Endian::Big } else { Endian::Little };

    let header_word = read_i32(&bytes[4..8], int_endian);
    let header_start = if header_word == -1 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[12..20]);
        let word = match int_endian {
            Endian::Little => i64::from_le_bytes(raw),
            Endian::Big => i64::from_be_bytes(raw),
        };
        word_offset(word)
    } else if header_word > 0 {
        word_offset(i64::from(header_word))
    } else {
        return Err(format_err(path, format!("bad header position {}", header_word)));
    };
    let header_start = match header_start {
        Some(start) if start >= DATA_OFFSET && start <= bytes.len() => start,
        _ => return Err(format_err(path, "header position outside file")),
    };

    let header = parse_header(&bytes[header_start..], path)?;

    let ncol = header.columns.len();
    let needed = header
        .nref
        .checked_mul(ncol)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(DATA_OFFSET));
    if needed.map_or(true, |n| n > header_start) {
        return Err(format_err(
            path,
            format!("{} reflections × {} columns do not fit before header", header.nref, ncol),
        ));
    }

    let mut columns: Vec<MtzColumn> = header
        .columns
        .iter()
        .map(|(label, col_type)| MtzColumn {
            label: label.clone(),
            col_type: *col_type,
            values: Vec::with_capacity(header.nref),
        })
        .collect();

    for row in 0..header.nref {
        for (c, column) in columns.iter_mut().enumerate() {
            let offset = DATA_OFFSET + (row * ncol + c) * 4;
            let v = read_f32(&bytes[offset..offset + 4], real_endian) as f64;
            let missing = match header.missing {
                Some(m) => v == m,
                None => v.is_nan(),
            };
            column.values.push(if missing { f64::NAN } else { v });
        }
    }

    let space_group = resolve_space_group(&header);

    Ok(MtzFile {
        cell: header.cell,
        space_group,
        columns,
        nref: header.nref,
    })
}

struct Header {
    nref: usize,
    cell: Option<UnitCell>,
    sg_number: Option<u16>,
    sg_symbol: Option<String>,
    symops: Vec<SymOp>,
    columns: Vec<(String, char)>,
    missing: Option<f64>,
}

fn parse_header(raw: &[u8], path: &Path) -> Result<Header> {
    let mut header = Header {
        nref: 0,
        cell: None,
        sg_number: None,
        sg_symbol: None,
        symops: Vec::new(),
        columns: Vec::new(),
        missing: None,
    };
    let mut saw_ncol = false;

    for chunk in raw.chunks(RECORD_LEN) {
        let record = String::from_utf8_lossy(chunk);
        let record = record.trim_end();
        let keyword: String = record.chars().take(4).collect::<String>().to_uppercase();
        let rest = record.split_once(char::is_whitespace).map(|(_, r)| r.trim()).unwrap_or("");

        match keyword.as_str() {
            "NCOL" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                header.nref = parts
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| format_err(path, format!("bad NCOL record '{}'", record)))?;
                saw_ncol = true;
            }
            "CELL" => {
                header.cell = UnitCell::parse(rest).ok();
            }
            "SYMI" => {
                // SYMINF nsym nprim lattype number 'symbol' PG
                let parts: Vec<&str> = rest.split_whitespace().collect();
                header.sg_number = parts.get(3).and_then(|s| s.parse().ok());
                if let (Some(a), Some(b)) = (rest.find('\''), rest.rfind('\'')) {
                    if b > a {
                        header.sg_symbol = Some(rest[a + 1..b].to_string());
                    }
                }
            }
            "SYMM" => {
                let text = rest.to_lowercase().replace(' ', "");
                if let Ok(op) = SymOp::parse(&text) {
                    header.symops.push(op);
                }
            }
            "VALM" => {
                header.missing = match rest.trim() {
                    "NAN" | "" => None,
                    v => v.parse().ok(),
                };
            }
            "COLU" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if parts.len() < 2 {
                    return Err(format_err(path, format!("bad COLUMN record '{}'", record)));
                }
                let col_type = parts[1].chars().next().unwrap_or('R');
                header.columns.push((parts[0].to_string(), col_type));
            }
            "END" | "MTZE" => break,
            _ => {}
        }
    }

    if !saw_ncol {
        return Err(format_err(path, "missing NCOL record"));
    }
    Ok(header)
}

/// 1 起始的字序号转换为字节偏移，溢出时返回 None
fn word_offset(word: i64) -> Option<usize> {
    word.checked_sub(1)
        .and_then(|w| w.checked_mul(4))
        .and_then(|b| usize::try_from(b).ok())
}

fn resolve_space_group(header: &Header) -> Option<SpaceGroup> {
    if let Some(symbol) = &header.sg_symbol {
        if let Ok(sg) = SpaceGroup::from_symbol(symbol) {
            return Some(sg);
        }
    }
    if !header.symops.is_empty() {
        if let Ok(sg) = SpaceGroup::from_operators(&header.symops) {
            return Some(sg);
        }
    }
    header.sg_number.and_then(|n| SpaceGroup::from_number(n).ok())
}

fn read_i32(b: &[u8], endian: Endian) -> i32 {
    let raw = [b[0], b[1], b[2], b[3]];
    match endian {
        Endian::Little => i32::from_le_bytes(raw),
        Endian::Big => i32::from_be_bytes(raw),
    }
}

fn read_f32(b: &[u8], endian: Endian) -> f32 {
    let raw = [b[0], b[1], b[2], b[3]];
    match endian {
        Endian::Little => f32::from_le_bytes(raw),
        Endian::Big => f32::from_be_bytes(raw),
    }
}

impl MtzFile {
    /// 按标签查找列（区分大小写优先，其次忽略大小写）
    pub fn column(&self, label: &str) -> Option<&MtzColumn> {
        self.columns
            .iter()
            .find(|c| c.label == label)
            .or_else(|| self.columns.iter().find(|c| c.label.eq_ignore_ascii_case(label)))
    }

    fn column_index(&self, label: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.label == label)
            .or_else(|| self.columns.iter().position(|c| c.label.eq_ignore_ascii_case(label)))
    }

    /// 文件中的晶体对称性
    pub fn crystal_symmetry(&self) -> CrystalSymmetry {
        CrystalSymmetry::new(self.cell, self.space_group.clone())
    }

    /// Miller 指数
    pub fn indices(&self, path: &Path) -> Result<Vec<MillerIndex>> {
        let h = self.hkl_column("H", path)?;
        let k = self.hkl_column("K", path)?;
        let l = self.hkl_column("L", path)?;
        Ok((0..self.nref)
            .map(|i| [h[i].round() as i32, k[i].round() as i32, l[i].round() as i32])
            .collect())
    }

    fn hkl_column(&self, label: &str, path: &Path) -> Result<&[f64]> {
        self.column(label)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| TwinMapError::MissingColumn {
                label: label.to_string(),
                path: path.display().to_string(),
            })
    }

    /// 选择观测列 (值, sigma)
    ///
    /// 指定标签时按 "F,SIGF" 或单个标签（sigma 取其后第一个 Q 列）；
    /// 否则依次尝试 F+Q、J+Q。
    fn select_obs_columns(&self, labels: Option<&str>, path: &Path) -> Result<(usize, Option<usize>)> {
        if let Some(labels) = labels {
            let parts: Vec<&str> = labels.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
            let missing = |label: &str| TwinMapError::MissingColumn {
                label: label.to_string(),
                path: path.display().to_string(),
            };
            let first = parts.first().copied().unwrap_or(labels);
            let data = self.column_index(first).ok_or_else(|| missing(first))?;
            let sigma = match parts.get(1) {
                Some(s) => Some(self.column_index(s).ok_or_else(|| missing(s))?),
                None => self.columns.get(data + 1).filter(|c| c.col_type == 'Q').map(|_| data + 1),
            };
            return Ok((data, sigma));
        }

        for wanted in ['F', 'J'] {
            if let Some(data) = self.columns.iter().position(|c| c.col_type == wanted) {
                let sigma = self.columns.get(data + 1).filter(|c| c.col_type == 'Q').map(|_| data + 1);
                return Ok((data, sigma));
            }
        }
        Err(TwinMapError::MissingColumn {
            label: "amplitude (F) or intensity (J)".to_string(),
            path: path.display().to_string(),
        })
    }

    fn select_flag_column(&self, label: Option<&str>, path: &Path) -> Result<Option<usize>> {
        if let Some(label) = label {
            return self
                .column_index(label)
                .map(Some)
                .ok_or_else(|| TwinMapError::MissingColumn {
                    label: label.to_string(),
                    path: path.display().to_string(),
                });
        }
        Ok(FREE_FLAG_NAMES.iter().find_map(|name| self.column_index(name)))
    }

    /// 提取观测数据与 Free-R 标记（观测值缺失的反射被跳过）
    pub fn extract_reflections(
        &self,
        obs_labels: Option<&str>,
        free_label: Option<&str>,
        path: &Path,
    ) -> Result<ReflectionData> {
        let indices = self.indices(path)?;
        let (data_col, sigma_col) = self.select_obs_columns(obs_labels, path)?;
        let flag_col = self.select_flag_column(free_label, path)?;

        let data_column = &self.columns[data_col];
        let obs_type = if data_column.col_type == 'J' {
            ObservationType::Intensity
        } else {
            ObservationType::Amplitude
        };

        let mut labels = vec![data_column.label.clone()];
        if let Some(s) = sigma_col {
            labels.push(self.columns[s].label.clone());
        }

        let mut out = ReflectionData {
            indices: Vec::new(),
            data: Vec::new(),
            sigmas: Vec::new(),
            obs_type,
            labels,
            raw_flags: flag_col.map(|_| Vec::new()),
            flag_label: flag_col.map(|c| self.columns[c].label.clone()),
        };

        for (i, h) in indices.iter().enumerate() {
            let value = data_column.values[i];
            if !value.is_finite() {
                continue;
            }
            let sigma = sigma_col
                .map(|s| self.columns[s].values[i])
                .filter(|s| s.is_finite())
                .unwrap_or(0.0);
            out.indices.push(*h);
            out.data.push(value);
            out.sigmas.push(sigma);
            if let (Some(flags), Some(c)) = (out.raw_flags.as_mut(), flag_col) {
                let v = self.columns[c].values[i];
                flags.push(if v.is_finite() { v.round() as i32 } else { -1 });
            }
        }

        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────
// 写出
// ─────────────────────────────────────────────────────────────

/// MTZ 数据集构建器
#[derive(Debug, Clone)]
pub struct MtzWriter {
    title: String,
    cell: UnitCell,
    space_group: SpaceGroup,
    indices: Vec<MillerIndex>,
    columns: Vec<MtzColumn>,
}

impl MtzWriter {
    pub fn new(cell: UnitCell, space_group: SpaceGroup, indices: Vec<MillerIndex>) -> Self {
        MtzWriter {
            title: "twinmap".to_string(),
            cell,
            space_group,
            indices,
            columns: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn indices(&self) -> &[MillerIndex] {
        &self.indices
    }

    /// 追加一列（长度须与指数一致）
    pub fn add_column(&mut self, label: &str, col_type: char, values: Vec<f64>) -> Result<&mut Self> {
        if values.len() != self.indices.len() {
            return Err(TwinMapError::MtzFormat(format!(
                "column {} has {} values for {} reflections",
                label,
                values.len(),
                self.indices.len()
            )));
        }
        if self.columns.iter().any(|c| c.label == label) || ["H", "K", "L"].contains(&label) {
            return Err(TwinMapError::MtzFormat(format!("duplicate column label {}", label)));
        }
        self.columns.push(MtzColumn {
            label: label.to_string(),
            col_type,
            values,
        });
        Ok(self)
    }

    /// 生成完整文件字节
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut all: Vec<MtzColumn> = Vec::with_capacity(self.columns.len() + 3);
        for (axis, label) in ["H", "K", "L"].iter().enumerate() {
            all.push(MtzColumn {
                label: label.to_string(),
                col_type: 'H',
                values: self.indices.iter().map(|h| h[axis] as f64).collect(),
            });
        }
        all.extend(self.columns.iter().cloned());

        let nref = self.indices.len();
        let ncol = all.len();

        let mut out = Vec::with_capacity(DATA_OFFSET + nref * ncol * 4 + 40 * RECORD_LEN);
        out.extend_from_slice(b"MTZ ");
        let header_word = (DATA_OFFSET / 4 + nref * ncol + 1) as i32;
        out.extend_from_slice(&header_word.to_le_bytes());
        out.extend_from_slice(&[0x44, 0x41, 0x00, 0x00]);
        out.resize(DATA_OFFSET, 0);

        for row in 0..nref {
            for col in &all {
                out.extend_from_slice(&(col.values[row] as f32).to_le_bytes());
            }
        }

        for record in self.header_records(&all) {
            let mut line = record.into_bytes();
            line.resize(RECORD_LEN, b' ');
            line.truncate(RECORD_LEN);
            out.extend_from_slice(&line);
        }
        out
    }

    fn header_records(&self, all: &[MtzColumn]) -> Vec<String> {
        let p = self.cell.parameters();
        let cell_text = format!(
            "{:10.4}{:10.4}{:10.4}{:10.4}{:10.4}{:10.4}",
            p[0], p[1], p[2], p[3], p[4], p[5]
        );
        let sg = &self.space_group;

        let (res_lo, res_hi) = self
            .indices
            .iter()
            .map(|h| self.cell.d_star_sq(h))
            .fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let (res_lo, res_hi) = if res_lo.is_finite() { (res_lo, res_hi) } else { (0.0, 0.0) };

        let mut records = vec![
            "VERS MTZ:V1.1".to_string(),
            format!("TITLE {}", self.title),
            format!("NCOL {:8} {:12} {:8}", all.len(), self.indices.len(), 0),
            format!("CELL  {}", cell_text),
            "SORT    0   0   0   0   0".to_string(),
            format!(
                "SYMINF {:3} {:2} {} {:5} {:>22} {}",
                sg.order(),
                sg.order_primitive(),
                sg.centering(),
                sg.number(),
                format!("'{}'", sg.symbol()),
                sg.point_group_symbol()
            ),
        ];
        for op in sg.operators() {
            records.push(format!("SYMM {}", op.as_xyz().to_uppercase().replace(',', ",  ")));
        }
        records.push(format!("RESO {:<20.12} {:<20.12}", res_lo, res_hi));
        records.push("VALM NAN".to_string());
        for col in all {
            let finite = col.values.iter().copied().filter(|v| v.is_finite());
            let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
            let (lo, hi) = if lo.is_finite() { (lo, hi) } else { (0.0, 0.0) };
            let dataset = if col.col_type == 'H' { 0 } else { 1 };
            records.push(format!(
                "COLUMN {:<30} {} {:>17.4} {:>17.4} {:>4}",
                col.label, col.col_type, lo, hi, dataset
            ));
        }
        records.push("NDIF        2".to_string());
        for (id, name) in [(0, "HKL_base"), (1, "twinmap")] {
            records.push(format!("PROJECT {:>7} {}", id, name));
            records.push(format!("CRYSTAL {:>7} {}", id, name));
            records.push(format!("DATASET {:>7} {}", id, name));
            records.push(format!("DCELL   {:>7} {}", id, cell_text));
            records.push(format!("DWAVEL  {:>7} {:10.5}", id, if id == 0 { 0.0 } else { 1.0 }));
        }
        records.push("END".to_string());
        records.push("MTZENDOFHEADERS".to_string());
        records
    }

    /// 写出文件
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()).map_err(|e| TwinMapError::FileWriteError {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> MtzWriter {
        let cell = UnitCell::new([50.0, 60.0, 70.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P 21 21 21").unwrap();
        let mut w = MtzWriter::new(cell, sg, vec![[1, 2, 3], [2, 0, 4], [5, 1, 1]]);
        w.add_column("FP", 'F', vec![100.0, 50.5, 12.25]).unwrap();
        w.add_column("SIGFP", 'Q', vec![2.0, 1.0, f64::NAN]).unwrap();
        w.add_column("FreeR_flag", 'I', vec![0.0, 1.0, 0.0]).unwrap();
        w
    }

    #[test]
    fn test_write_read_round_trip() {
        let bytes = writer().to_bytes();
        let mtz = parse_mtz_bytes(&bytes, Path::new("mem.mtz")).unwrap();
        assert_eq!(mtz.nref, 3);
        assert_eq!(mtz.columns.len(), 6);
        assert_eq!(mtz.space_group.as_ref().unwrap().number(), 19);
        assert!((mtz.cell.unwrap().parameters()[1] - 60.0).abs() < 1e-3);
        assert_eq!(mtz.column("FP").unwrap().col_type, 'F');
        assert!(mtz.column("SIGFP").unwrap().values[2].is_nan());

        let data = mtz.extract_reflections(None, None, Path::new("mem.mtz")).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.obs_type, ObservationType::Amplitude);
        assert_eq!(data.indices[1], [2, 0, 4]);
        assert!((data.data[1] - 50.5).abs() < 1e-4);
        assert_eq!(data.sigmas[2], 0.0);
        assert_eq!(data.raw_flags.unwrap(), vec![0, 1, 0]);
        assert_eq!(data.flag_label.as_deref(), Some("FreeR_flag"));
    }

    #[test]
    fn test_header_records_are_fixed_width() {
        let w = writer();
        let bytes = w.to_bytes();
        let header_word = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let header = &bytes[(header_word - 1) * 4..];
        assert_eq!(header.len() % RECORD_LEN, 0);
        assert!(header.starts_with(b"VERS MTZ:V1.1"));
        let text = String::from_utf8_lossy(header);
        assert!(text.contains("MTZENDOFHEADERS"));
        assert!(text.contains("'P 21 21 21'"));
    }

    #[test]
    fn test_explicit_labels_and_missing_column() {
        let bytes = writer().to_bytes();
        let mtz = parse_mtz_bytes(&bytes, Path::new("mem.mtz")).unwrap();
        let data = mtz
            .extract_reflections(Some("FP,SIGFP"), Some("FreeR_flag"), Path::new("mem.mtz"))
            .unwrap();
        assert_eq!(data.labels, vec!["FP".to_string(), "SIGFP".to_string()]);

        let err = mtz
            .extract_reflections(Some("IMEAN,SIGIMEAN"), None, Path::new("mem.mtz"))
            .unwrap_err();
        assert!(matches!(err, TwinMapError::MissingColumn { .. }));
    }

    #[test]
    fn test_rejects_non_mtz() {
        let err = parse_mtz_bytes(&[0u8; 100], Path::new("x.mtz")).unwrap_err();
        assert!(matches!(err, TwinMapError::MtzFormat(_)));
    }

    #[test]
    fn test_rejects_oversized_header_position() {
        let mut bytes = vec![0u8; 100];
        bytes[0..4].copy_from_slice(b"MTZ ");
        bytes[4..8].copy_from_slice(&i32::MAX.to_le_bytes());
        bytes[8] = 0x44;
        bytes[9] = 0x41;
        let err = parse_mtz_bytes(&bytes, Path::new("x.mtz")).unwrap_err();
        assert!(matches!(err, TwinMapError::MtzFormat(_)));

        bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        bytes[12..20].copy_from_slice(&i64::MAX.to_le_bytes());
        let err = parse_mtz_bytes(&bytes, Path::new("x.mtz")).unwrap_err();
        assert!(matches!(err, TwinMapError::MtzFormat(_)));

        bytes[12..20].copy_from_slice(&i64::MIN.to_le_bytes());
        assert!(parse_mtz_bytes(&bytes, Path::new("x.mtz")).is_err());
    }

    #[test]
    fn test_add_column_checks_length() {
        let mut w = writer();
        assert!(w.add_column("BAD", 'F', vec![1.0]).is_err());
        assert!(w.add_column("FP", 'F', vec![1.0, 2.0, 3.0]).is_err());
    }
}
