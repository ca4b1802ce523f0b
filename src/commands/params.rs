//! # params 命令实现
//!
//! 输出带注释的默认参数文件，可直接编辑后作为 `maps` 的输入。
//!
//! ## 依赖关系
//! - 使用 `cli/params.rs` 定义的 ParamsArgs
//! - 使用 `config/` 生成 TOML 文本

use crate::cli::params::ParamsArgs;
use crate::config::TwinMapParams;
use crate::error::{Result, TwinMapError};
use crate::utils::output;

use std::fs;
use std::path::Path;

/// 执行 params 命令
pub fn execute(args: ParamsArgs) -> Result<()> {
    let text = TwinMapParams::default().to_toml_string()?;
    match args.output {
        Some(path) => write_defaults(&path, &text),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}

fn write_defaults(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).map_err(|e| TwinMapError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })?;
    output::print_written("default parameters", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_defaults_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinmap.toml");
        execute(ParamsArgs {
            output: Some(path.clone()),
        })
        .unwrap();

        let mut params = TwinMapParams::default();
        params.parameters.twinning.max_delta = 9.0;
        params.merge_file(&path).unwrap();
        assert_eq!(params.parameters.twinning.max_delta, 3.0);
        assert_eq!(params.output.map_coeffs_root, "MAP_COEFFS");
        assert!(params.input.xray_data.file_name.is_none());
    }
}
