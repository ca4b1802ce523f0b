//! # maps 命令实现
//!
//! 孪晶数据的图系数计算主流程：
//!
//! 1. 解释命令行参数（参数文件、数据/模型文件、`key=value`）
//! 2. 合并参数、反射文件与模型文件中的晶体对称性
//! 3. 读取观测数据与 Free-R 标记、原子模型
//! 4. 搜索孪晶律（或使用指定的孪晶律）
//! 5. 对每个孪晶律：拟合标度/体相溶剂/孪晶分数，写出图系数
//! 6. 无孪晶律时使用单域模型
//! 7. 写出观测/计算振幅文件、统计 CSV 与日志
//!
//! ## 依赖关系
//! - 使用 `cli/maps.rs` 定义的参数
//! - 使用 `config/`、`parsers/`、`twin/`、`fmodel/`、`xray/export.rs`

use crate::cli::maps::MapsArgs;
use crate::config::{ArgumentInterpreter, TwinMapParams};
use crate::error::{Result, TwinMapError};
use crate::fmodel::{
    BinStatistics, FModelManager, MapType, ModelData, ModelManager, TwinModelManager,
};
use crate::models::{CrystalSymmetry, FreeFlags, ObservationType, ReflectionData, UnitCell};
use crate::parsers::{self, mtz::MtzWriter};
use crate::symmetry::SpaceGroup;
use crate::twin::{self, TwinLaw, TwinLawSearch};
use crate::utils::{output, progress};
use crate::xray::export;

use num_complex::Complex64;
use std::path::Path;

/// 触发帮助信息的参数
const HELP_FLAGS: &[&str] = &["-h", "--h", "--help"];

/// 自动生成的测试集比例
const GENERATED_FREE_FRACTION: f64 = 0.05;

/// 执行 maps 命令
pub fn execute(args: MapsArgs) -> Result<()> {
    let mut quiet = args.quiet;
    let tokens: Vec<String> = args
        .args
        .into_iter()
        .filter(|a| {
            if a == "--quiet" {
                quiet = true;
                false
            } else {
                true
            }
        })
        .collect();

    if tokens.is_empty() || tokens.iter().any(|a| HELP_FLAGS.contains(&a.as_str())) {
        print_help("twinmap maps");
        return Ok(());
    }

    output::set_quiet(quiet);
    let params = ArgumentInterpreter::new(TwinMapParams::default()).process_all(&tokens)?;
    run(params, quiet)
}

/// 帮助信息
fn print_help(command_name: &str) {
    let underline = "-".repeat(command_name.len());
    let defaults = TwinMapParams::default()
        .to_toml_string()
        .unwrap_or_default();
    output::print_block(format!(
        "
{command_name}
{underline}

A command line utility to compute map coefficients for twinned data.
Bulk solvent parameters and twin fractions are determined automatically.
If no twin law is specified, map coefficients for all twin laws will
be computed.

The keywords are summarized below:

{defaults}
A typical run looks like this:

{command_name} data.file=mydata.mtz model.file=mymodel.pdb \\
  obs_labels=FP,SIGFP free_flag=TEST

If no unit cell is specified, the unit cell of the reflection
file or the model will be used.
"
    ));
}

/// 完整流程（参数已解释）
pub fn run(mut params: TwinMapParams, quiet: bool) -> Result<()> {
    output::print_header("Twinned Data Map Coefficients");

    // ─────────────────────────────────────────────────────────────
    // 晶体对称性
    // ─────────────────────────────────────────────────────────────
    let (cell, space_group) = resolve_symmetry(&mut params)?;

    output::print_header("Effective parameters");
    params.show()?;

    let data_file = params
        .input
        .xray_data
        .file_name
        .clone()
        .ok_or(TwinMapError::XrayDataNotSpecified)?;
    let model_file = params
        .input
        .model
        .file_name
        .clone()
        .ok_or(TwinMapError::ModelNotSpecified)?;

    // ─────────────────────────────────────────────────────────────
    // 观测数据
    // ─────────────────────────────────────────────────────────────
    let (f_obs, free_flags) = load_reflections(&params, Path::new(&data_file), &cell, &space_group)?;

    // ─────────────────────────────────────────────────────────────
    // 原子模型
    // ─────────────────────────────────────────────────────────────
    let model = parsers::read_model(Path::new(&model_file))?;
    output::print_header("Atomic model summary");
    model.show_summary();

    // ─────────────────────────────────────────────────────────────
    // 孪晶律
    // ─────────────────────────────────────────────────────────────
    let twinning = &params.parameters.twinning;
    let search = TwinLawSearch::run(&cell, &space_group, twinning.max_delta);
    output::print_header("Preliminary data analyses");
    search.show();

    let laws: Vec<TwinLaw> = match &twinning.twin_law {
        Some(text) => {
            let law = TwinLaw::parse(text)?;
            output::print_info(&format!("Using user specified twin law {}", law.as_hkl()));
            vec![law]
        }
        None => search.laws.clone(),
    };

    let data = ModelData::new(cell, space_group, &f_obs, free_flags, model)?;

    output::print_header("Overall and bulk solvent scale parameters and twin fraction estimation");
    let mut statistics: Vec<BinStatistics> = Vec::new();
    let best_f_model = if laws.is_empty() {
        run_untwinned(&params, &data, quiet, &mut statistics)?
    } else {
        run_twin_laws(&params, &data, &laws, quiet, &mut statistics)?
    };

    // ─────────────────────────────────────────────────────────────
    // 其余输出
    // ─────────────────────────────────────────────────────────────
    if !params.output.obs_and_calc.is_empty() {
        let path = Path::new(&params.output.obs_and_calc);
        write_obs_and_calc(&data, &best_f_model, path)?;
        output::print_written("Observed and model amplitudes", path);
    }

    if !params.output.statistics.is_empty() {
        let path = Path::new(&params.output.statistics);
        export::write_statistics_csv(&statistics, path)?;
        output::print_written("Per-bin statistics", path);
    }

    output::print_blank();
    output::print_done("All done");

    if !params.output.logfile.is_empty() {
        let path = Path::new(&params.output.logfile);
        output::save_log(path)?;
        output::print_written("Log", path);
    }
    Ok(())
}

/// 合并参数、反射文件、模型文件的对称性，并写回参数树
fn resolve_symmetry(params: &mut TwinMapParams) -> Result<(UnitCell, SpaceGroup)> {
    let from_params = CrystalSymmetry::new(
        params.input.unit_cell.as_deref().map(UnitCell::parse).transpose()?,
        params
            .input
            .space_group
            .as_deref()
            .map(SpaceGroup::from_symbol)
            .transpose()?,
    );
    let from_file = |name: &Option<String>| -> Result<CrystalSymmetry> {
        match name {
            Some(n) => parsers::symmetry_from_file(Path::new(n)),
            None => Ok(CrystalSymmetry::default()),
        }
    };
    let from_data = from_file(&params.input.xray_data.file_name)?;
    let from_model = from_file(&params.input.model.file_name)?;

    let combined = CrystalSymmetry::select([&from_params, &from_data, &from_model]);
    if let Some(cell) = &combined.unit_cell {
        let p = cell.parameters();
        params.input.unit_cell = Some(format!(
            "{} {} {} {} {} {}",
            p[0], p[1], p[2], p[3], p[4], p[5]
        ));
    }
    if let Some(sg) = &combined.space_group {
        params.input.space_group = Some(sg.symbol().to_string());
    }
    combined.require_complete()
}

/// 读取观测振幅与 Free-R 标记
fn load_reflections(
    params: &TwinMapParams,
    path: &Path,
    cell: &UnitCell,
    space_group: &SpaceGroup,
) -> Result<(ReflectionData, FreeFlags)> {
    let xray = &params.input.xray_data;
    let (raw, _) = parsers::read_reflections(path, xray.obs_labels.as_deref(), xray.free_flag.as_deref())?;

    let mut f_obs = raw;
    if f_obs.obs_type == ObservationType::Intensity {
        output::print_info("Converting intensities to amplitudes");
        f_obs = f_obs.as_amplitudes();
    }
    let (f_obs, dropped) = f_obs.merge_to_asu(space_group);
    if dropped > 0 {
        output::print_warning(&format!(
            "{} reflection(s) removed (systematic absences, duplicates or invalid values)",
            dropped
        ));
    }
    if f_obs.is_empty() {
        return Err(TwinMapError::NoDataAvailable);
    }

    output::print_blank();
    output::print_info("Attempting to extract Free R flags");
    let free_flags = match &f_obs.raw_flags {
        Some(raw) => {
            let test_value = xray.free_flag_value.unwrap_or(1);
            let flags = FreeFlags::from_raw(raw, test_value);
            output::print_info(&format!(
                "Using column {} (test set value {}): {} free reflections",
                f_obs.flag_label.as_deref().unwrap_or("?"),
                test_value,
                flags.count_free()
            ));
            Some(flags).filter(|f| f.count_free() > 0)
        }
        None => None,
    };
    let free_flags = match free_flags {
        Some(flags) => flags,
        None => {
            let lattice = twin::lattice_rotations(cell, space_group, params.parameters.twinning.max_delta);
            let flags = FreeFlags::generate(&f_obs.indices, &lattice, GENERATED_FREE_FRACTION);
            output::print_warning(&format!(
                "No usable free R flags; generated {:.1}% test set using lattice symmetry",
                100.0 * flags.free_fraction()
            ));
            flags
        }
    };

    output::print_header("Summary info of observed data");
    f_obs.show_summary(cell, space_group);
    Ok((f_obs, free_flags))
}

/// 每个孪晶律一个模型；返回 R_work 最低者的 F_model
fn run_twin_laws(
    params: &TwinMapParams,
    data: &ModelData,
    laws: &[TwinLaw],
    quiet: bool,
    statistics: &mut Vec<BinStatistics>,
) -> Result<Vec<Complex64>> {
    let mode = params.parameters.twinning.detwin_mode;
    let mut best: Option<(f64, Vec<Complex64>)> = None;

    for (n, law) in laws.iter().enumerate() {
        let operator_count = n + 1;
        output::print_separator();
        output::print_info(&format!("Twin law {}: {}", operator_count, law.as_hkl()));

        let mut manager = TwinModelManager::new(data, law.clone(), mode);
        output::print_line("--- bulk solvent scaling ---");
        let spinner = progress::create_spinner("Refining scales and twin fraction", quiet);
        let refined = manager.update_all_scales();
        spinner.finish_and_clear();
        refined?;

        manager.show_essential();

        let fofc = manager.map_coefficients(MapType::MFoDFc);
        let two_fofc = manager.map_coefficients(MapType::TwoMFoDFc);
        let grad = manager.map_coefficients(MapType::Gradient);

        let mut writer = MtzWriter::new(data.cell, data.space_group.clone(), data.indices.clone())
            .with_title(format!("twinmap map coefficients, twin law {}", law.as_hkl()));
        export::add_map_coefficients(&mut writer, "FWT", &two_fofc)?;
        export::add_map_coefficients(&mut writer, "DFWT", &fofc)?;
        export::add_map_coefficients(&mut writer, "GRAD", &grad)?;

        let name = format!("{}_{}.mtz", params.output.map_coeffs_root, operator_count);
        output::print_blank();
        output::print_line(&format!("Writing {} for twin law {}", name, law.as_hkl()));
        writer.write(Path::new(&name))?;
        output::print_written("Map coefficients", Path::new(&name));

        statistics.extend(manager.bin_statistics());

        let (r_work, _) = manager.r_values();
        if best.as_ref().map_or(true, |(r, _)| r_work < *r) {
            best = Some((r_work, manager.f_model()));
        }
    }

    Ok(best.map(|(_, f)| f).unwrap_or_default())
}

/// 无孪晶律：单域模型的 2mFo-DFc 与 mFo-DFc
fn run_untwinned(
    params: &TwinMapParams,
    data: &ModelData,
    quiet: bool,
    statistics: &mut Vec<BinStatistics>,
) -> Result<Vec<Complex64>> {
    output::print_blank();
    output::print_line("No twin laws were found");
    output::print_line("Performing maximum likelihood based bulk solvent scaling");

    let mut manager = FModelManager::new(data);
    let spinner = progress::create_spinner("Refining scales", quiet);
    let refined = manager.update_all_scales();
    spinner.finish_and_clear();
    refined?;
    manager.show_essential();

    let two_fofc = manager.map_coefficients(MapType::TwoMFoDFc);
    let fofc = manager.map_coefficients(MapType::MFoDFc);
    let mut writer = MtzWriter::new(data.cell, data.space_group.clone(), data.indices.clone())
        .with_title("twinmap map coefficients, untwinned model");
    export::add_map_coefficients(&mut writer, "FWT", &two_fofc)?;
    export::add_map_coefficients(&mut writer, "DELFWT", &fofc)?;

    let name = format!("{}_ML.mtz", params.output.map_coeffs_root);
    writer.write(Path::new(&name))?;
    output::print_written("Map coefficients", Path::new(&name));

    statistics.extend(manager.bin_statistics());
    Ok(manager.f_model())
}

/// FOBS/SIGFOBS 与 FMODEL/PHIFMODEL
fn write_obs_and_calc(data: &ModelData, f_model: &[Complex64], path: &Path) -> Result<()> {
    let mut writer = MtzWriter::new(data.cell, data.space_group.clone(), data.indices.clone())
        .with_title("twinmap observed and model amplitudes");
    export::add_observations(&mut writer, "FOBS", &data.f_obs, &data.sigmas)?;
    export::add_complex_columns(&mut writer, "FMODEL", f_model)?;
    writer.write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmodel::data::test_support::*;
    use crate::parsers::mtz::read_mtz;
    use crate::symmetry::asu_index_with;
    use std::fs;

    /// 写出 P4 模型与按 k,h,-l 孪生（α = 0.2）的观测数据
    fn write_inputs(dir: &Path) -> (String, String) {
        write_inputs_with_flags(dir, Some(|i: usize| if i % 10 == 0 { 1.0 } else { 0.0 }))
    }

    /// 同上，free 列由 `flag` 给出，None 时不写该列
    fn write_inputs_with_flags(dir: &Path, flag: Option<fn(usize) -> f64>) -> (String, String) {
        let cell = UnitCell::new([20.0, 20.0, 30.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P4").unwrap();
        let model = small_model();

        let mut pdb = format!(
            "CRYST1{:>9.3}{:>9.3}{:>9.3}{:>7.2}{:>7.2}{:>7.2} {:<11}{:>4}\n",
            20.0, 20.0, 30.0, 90.0, 90.0, 90.0, "P 4", 1
        );
        for (i, atom) in model.atoms.iter().enumerate() {
            pdb.push_str(&format!(
                "ATOM  {:>5} {:<4} {:>3} A{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}\n",
                i + 1,
                atom.element,
                "HOH",
                i + 1,
                atom.xyz[0],
                atom.xyz[1],
                atom.xyz[2],
                atom.occupancy,
                atom.b_iso,
                atom.element
            ));
        }
        pdb.push_str("END\n");
        let pdb_path = dir.join("model.pdb");
        fs::write(&pdb_path, pdb).unwrap();

        let indices = p4_indices(&cell, &sg, 3.0);
        let n = indices.len();
        let reference = ModelData::new(
            cell,
            sg.clone(),
            &reflections(indices.clone(), vec![1.0; n]),
            every_tenth(n),
            model,
        )
        .unwrap();
        let law = TwinLaw::parse("k,h,-l").unwrap();
        let mates: Vec<_> = indices.iter().map(|h| law.apply(h).unwrap()).collect();
        let f_mate = reference.calc_structure_factors(&mates);
        let fp: Vec<f64> = (0..n)
            .map(|i| (0.8 * reference.f_calc[i].norm_sqr() + 0.2 * f_mate[i].norm_sqr()).sqrt())
            .collect();

        let mut writer = MtzWriter::new(cell, sg, indices);
        writer.add_column("FP", 'F', fp).unwrap();
        writer.add_column("SIGFP", 'Q', vec![1.0; n]).unwrap();
        if let Some(flag) = flag {
            writer.add_column("FreeR_flag", 'I', (0..n).map(flag).collect()).unwrap();
        }
        let mtz_path = dir.join("data.mtz");
        writer.write(&mtz_path).unwrap();

        (mtz_path.display().to_string(), pdb_path.display().to_string())
    }

    fn params_for(dir: &Path, data: &str, model: &str) -> TwinMapParams {
        let out = |name: &str| dir.join(name).display().to_string();
        let args = vec![
            format!("data.file={}", data),
            format!("model.file={}", model),
            format!("map_coeffs_root={}", out("MAPS")),
            format!("obs_and_calc={}", out("obs_and_calc.mtz")),
            format!("logfile={}", out("run.log")),
            format!("statistics={}", out("stats.csv")),
        ];
        ArgumentInterpreter::new(TwinMapParams::default())
            .process_all(&args)
            .unwrap()
    }

    #[test]
    fn test_full_run_with_given_twin_law() {
        let dir = tempfile::tempdir().unwrap();
        let (data, model) = write_inputs(dir.path());
        let mut params = params_for(dir.path(), &data, &model);
        params.set("parameters.twinning.twin_law", "k,h,-l").unwrap();
        output::set_quiet(true);
        run(params, true).unwrap();

        let maps = read_mtz(&dir.path().join("MAPS_1.mtz")).unwrap();
        for label in ["FWT", "PHIFWT", "DFWT", "PHIDFWT", "GRAD", "PHIGRAD"] {
            assert!(maps.column(label).is_some(), "missing {}", label);
        }
        let obs = read_mtz(&dir.path().join("obs_and_calc.mtz")).unwrap();
        for label in ["FOBS", "SIGFOBS", "FMODEL", "PHIFMODEL"] {
            assert!(obs.column(label).is_some(), "missing {}", label);
        }
        let log = fs::read_to_string(dir.path().join("run.log")).unwrap();
        assert!(log.contains("twin fraction"));
        assert!(log.contains("All done"));
        let stats = fs::read_to_string(dir.path().join("stats.csv")).unwrap();
        assert!(stats.lines().count() > 1);
    }

    #[test]
    fn test_full_run_finds_laws_from_symmetry() {
        let dir = tempfile::tempdir().unwrap();
        let (data, model) = write_inputs(dir.path());
        let params = params_for(dir.path(), &data, &model);
        output::set_quiet(true);
        run(params, true).unwrap();
        // P4 与 a = b：一个孪晶律
        assert!(dir.path().join("MAPS_1.mtz").is_file());
        assert!(!dir.path().join("MAPS_2.mtz").exists());
        assert!(!dir.path().join("MAPS_ML.mtz").exists());
    }

    #[test]
    fn test_untwinned_run_without_laws() {
        let dir = tempfile::tempdir().unwrap();
        let (data, model) = write_inputs(dir.path());
        let mut params = params_for(dir.path(), &data, &model);
        // 一般三斜晶胞没有格子对称性
        params.set("parameters.twinning.max_delta", "0").unwrap();
        params.set("input.space_group", "P1").unwrap();
        params.set("input.unit_cell", "20 23 31 80 85 95").unwrap();
        params.set("output.obs_and_calc", "").unwrap();
        output::set_quiet(true);
        run(params, true).unwrap();
        let maps = read_mtz(&dir.path().join("MAPS_ML.mtz")).unwrap();
        assert!(maps.column("DELFWT").is_some());
        assert!(!dir.path().join("obs_and_calc.mtz").exists());
    }

    fn assert_generated_flags_follow_twin_mates(dir: &Path, data: &str, model: &str) {
        let params = params_for(dir, data, model);
        let cell = UnitCell::new([20.0, 20.0, 30.0, 90.0, 90.0, 90.0]).unwrap();
        let sg = SpaceGroup::from_symbol("P4").unwrap();
        output::set_quiet(true);
        let (f_obs, flags) = load_reflections(&params, Path::new(data), &cell, &sg).unwrap();
        assert!(flags.count_free() > 0);
        assert!(flags.count_free() < f_obs.len());

        // k,h,-l 是 P4 (a = b) 的格子对称性，孪晶相关反射同属一个集合
        let law = TwinLaw::parse("k,h,-l").unwrap();
        let laue = sg.laue_rotations();
        let position: std::collections::HashMap<_, _> = f_obs
            .indices
            .iter()
            .enumerate()
            .map(|(i, h)| (asu_index_with(&laue, h), i))
            .collect();
        let mut pairs = 0;
        for (i, h) in f_obs.indices.iter().enumerate() {
            let mate = law.apply(h).unwrap();
            if let Some(&j) = position.get(&asu_index_with(&laue, &mate)) {
                assert_eq!(flags.is_free(i), flags.is_free(j), "{:?} vs {:?}", h, mate);
                pairs += 1;
            }
        }
        assert!(pairs > 0);

        run(params, true).unwrap();
        assert!(dir.join("MAPS_1.mtz").is_file());
    }

    #[test]
    fn test_all_zero_free_flags_are_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let (data, model) = write_inputs_with_flags(dir.path(), Some(|_| 0.0));
        assert_generated_flags_follow_twin_mates(dir.path(), &data, &model);
    }

    #[test]
    fn test_missing_free_column_generates_flags() {
        let dir = tempfile::tempdir().unwrap();
        let (data, model) = write_inputs_with_flags(dir.path(), None);
        assert_generated_flags_follow_twin_mates(dir.path(), &data, &model);
    }

    #[test]
    fn test_empty_reflection_file_reports_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let (_, model) = write_inputs(dir.path());
        let hkl = dir.path().join("empty.hkl");
        fs::write(&hkl, "   0   0   0    0.00    0.00\n").unwrap();
        let mut params = params_for(dir.path(), &hkl.display().to_string(), &model);
        params.set("input.unit_cell", "20 20 30 90 90 90").unwrap();
        params.set("input.space_group", "P4").unwrap();
        output::set_quiet(true);
        let err = run(params, true).unwrap_err();
        assert!(matches!(err, TwinMapError::NoDataAvailable));
        assert_eq!(err.to_string(), "No data available");
    }

    #[test]
    fn test_missing_inputs_are_reported() {
        let mut params = TwinMapParams::default();
        let err = run(params.clone(), true).unwrap_err();
        assert_eq!(err.to_string(), "unit cell not specified");

        params.set("input.unit_cell", "20 20 30 90 90 90").unwrap();
        let err = run(params.clone(), true).unwrap_err();
        assert_eq!(err.to_string(), "space group not specified");

        params.set("input.space_group", "P4").unwrap();
        let err = run(params.clone(), true).unwrap_err();
        assert_eq!(err.to_string(), "Xray data not specified");

        let dir = tempfile::tempdir().unwrap();
        let (data, _) = write_inputs(dir.path());
        params.set("input.xray_data.file_name", &data).unwrap();
        let err = run(params, true).unwrap_err();
        assert_eq!(err.to_string(), "pdb file with  model not specified");
    }
}
