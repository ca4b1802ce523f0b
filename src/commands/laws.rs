//! # laws 命令实现
//!
//! 由文件（或命令行）中的晶胞与空间群搜索格子对称性并列出孪晶律。
//!
//! ## 功能
//! - 单文件：打印完整的孪晶律表
//! - 目录：rayon 并行处理，逐文件一行汇总
//!
//! ## 依赖关系
//! - 使用 `cli/laws.rs` 定义的 LawsArgs
//! - 使用 `batch/` 模块进行批量处理
//! - 使用 `parsers/` 提取对称性，`twin/` 搜索孪晶律

use crate::batch::{BatchRunner, FileCollector, ProcessResult};
use crate::cli::laws::LawsArgs;
use crate::error::{Result, TwinMapError};
use crate::models::{CrystalSymmetry, UnitCell};
use crate::parsers;
use crate::symmetry::SpaceGroup;
use crate::twin::TwinLawSearch;
use crate::utils::output;

use std::path::Path;

/// 执行 laws 命令
pub fn execute(args: LawsArgs) -> Result<()> {
    output::print_header("Twin Law Search");

    let overrides = CrystalSymmetry::new(
        args.unit_cell.as_deref().map(UnitCell::parse).transpose()?,
        args.space_group
            .as_deref()
            .map(SpaceGroup::from_symbol)
            .transpose()?,
    );

    if args.input.is_file() {
        execute_single_file(&args, &overrides)
    } else if args.input.is_dir() {
        execute_batch(&args, &overrides)
    } else {
        Err(TwinMapError::FileNotFound {
            path: args.input.display().to_string(),
        })
    }
}

/// 单文件模式
fn execute_single_file(args: &LawsArgs, overrides: &CrystalSymmetry) -> Result<()> {
    output::print_info(&format!("Single file mode: '{}'", args.input.display()));
    let (cell, sg) = resolve(&args.input, overrides)?;
    output::print_line(&format!("Unit cell  : {}", cell));
    output::print_line(&format!("Space group: {}", sg));
    output::print_line(&format!("Crystal system: {}", sg.crystal_system()));
    output::print_blank();
    TwinLawSearch::run(&cell, &sg, args.max_delta).show();
    Ok(())
}

/// 批量处理模式
fn execute_batch(args: &LawsArgs, overrides: &CrystalSymmetry) -> Result<()> {
    output::print_info(&format!("Batch mode: directory '{}'", args.input.display()));

    let files = FileCollector::new(args.input.clone())
        .with_pattern(&args.pattern)
        .recursive(args.recursive)
        .collect();
    if files.is_empty() {
        return Err(TwinMapError::NoFilesFound {
            pattern: args.pattern.clone(),
        });
    }
    output::print_info(&format!("Found {} files", files.len()));

    let runner = BatchRunner::new(args.jobs);
    output::print_info(&format!("Using {} parallel jobs", runner.jobs()));
    let result = runner.run(files, |file| process_file(file, overrides, args.max_delta))?;

    output::print_separator();
    for (path, summary) in &result.summaries {
        output::print_line(&format!("{}: {}", path, summary));
    }
    output::print_separator();
    output::print_success(&format!(
        "Batch complete: {} analyzed, {} skipped, {} failed",
        result.success(),
        result.skipped.len(),
        result.failures.len()
    ));

    for (path, reason) in &result.skipped {
        output::print_warning(&format!("  {}: {}", path, reason));
    }
    if !result.failures.is_empty() {
        output::print_warning("Failed files:");
        for (path, err) in result.failures.iter().take(10) {
            output::print_error(&format!("  {}: {}", path, err));
        }
        if result.failures.len() > 10 {
            output::print_warning(&format!("  ... and {} more", result.failures.len() - 10));
        }
    }
    Ok(())
}

/// 文件对称性，命令行给出的字段优先
fn resolve(path: &Path, overrides: &CrystalSymmetry) -> Result<(UnitCell, SpaceGroup)> {
    let from_file = parsers::symmetry_from_file(path)?;
    CrystalSymmetry::select([overrides, &from_file]).require_complete()
}

/// 批量模式中的单个文件
fn process_file(path: &Path, overrides: &CrystalSymmetry, max_delta: f64) -> ProcessResult {
    let name = path.display().to_string();
    match resolve(path, overrides) {
        Ok((cell, sg)) => {
            let search = TwinLawSearch::run(&cell, &sg, max_delta);
            ProcessResult::Success(name, summarize(&sg, &search))
        }
        Err(e @ (TwinMapError::UnitCellNotSpecified | TwinMapError::SpaceGroupNotSpecified)) => {
            ProcessResult::Skipped(name, e.to_string())
        }
        Err(e) => ProcessResult::Failed(name, e.to_string()),
    }
}

/// 一行汇总
fn summarize(sg: &SpaceGroup, search: &TwinLawSearch) -> String {
    if search.laws.is_empty() {
        return format!("{}: no twin laws", sg.symbol());
    }
    let laws: Vec<String> = search
        .laws
        .iter()
        .map(|l| format!("{} ({}, {:.2}°)", l.as_hkl(), l.kind, l.delta))
        .collect();
    format!("{}: {}", sg.symbol(), laws.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cryst1(cell: [f64; 6], sg: &str) -> String {
        format!(
            "CRYST1{:>9.3}{:>9.3}{:>9.3}{:>7.2}{:>7.2}{:>7.2} {:<11}{:>4}\nEND\n",
            cell[0], cell[1], cell[2], cell[3], cell[4], cell[5], sg, 1
        )
    }

    #[test]
    fn test_process_file_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let tetragonal = dir.path().join("p4.pdb");
        let orthorhombic = dir.path().join("p212121.pdb");
        let hkl = dir.path().join("data.hkl");
        fs::write(&tetragonal, cryst1([40.0, 40.0, 60.0, 90.0, 90.0, 90.0], "P 4")).unwrap();
        fs::write(&orthorhombic, cryst1([40.0, 50.0, 60.0, 90.0, 90.0, 90.0], "P 21 21 21")).unwrap();
        fs::write(&hkl, "   1   0   0  100.00    2.00\n   0   0   0    0.00    0.00\n").unwrap();

        let none = CrystalSymmetry::default();
        match process_file(&tetragonal, &none, 3.0) {
            ProcessResult::Success(_, summary) => {
                assert!(summary.starts_with("P 4: "), "{}", summary);
                assert!(summary.contains("(M, 0.00°)"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match process_file(&orthorhombic, &none, 3.0) {
            ProcessResult::Success(_, summary) => assert!(summary.ends_with("no twin laws")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(process_file(&hkl, &none, 3.0), ProcessResult::Skipped(_, _)));

        let forced = CrystalSymmetry::new(
            Some(UnitCell::new([40.0, 40.0, 60.0, 90.0, 90.0, 90.0]).unwrap()),
            Some(SpaceGroup::from_symbol("P 41").unwrap()),
        );
        assert!(matches!(process_file(&hkl, &forced, 3.0), ProcessResult::Success(_, _)));
        assert!(matches!(
            process_file(&dir.path().join("missing.mtz"), &none, 3.0),
            ProcessResult::Failed(_, _)
        ));
    }
}
