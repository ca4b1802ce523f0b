//! # 命令行参数解释
//!
//! 每个参数依次解释为：
//! 1. 已存在的文件：参数文件合并，反射文件/模型文件填入对应 file_name
//! 2. `key=value`：key 按尾部路径分量匹配叶参数
//!    （`data` 等同 `xray_data`，`file` 等同 `file_name`），须唯一匹配
//! 3. 其他 → `Unknown file or keyword`
//!
//! 未识别的参数全部处理完后统一列出，再返回错误。
//!
//! ## 依赖关系
//! - 被 `commands/maps.rs` 使用
//! - 使用 `parsers::FileKind` 判断文件类别

use super::{TwinMapParams, LEAF_PATHS};
use crate::error::{Result, TwinMapError};
use crate::parsers::FileKind;
use crate::utils::output;

use std::path::Path;

/// 路径分量别名
const ALIASES: &[(&str, &str)] = &[("data", "xray_data"), ("file", "file_name")];

/// 命令行参数解释器
pub struct ArgumentInterpreter {
    params: TwinMapParams,
}

impl ArgumentInterpreter {
    pub fn new(params: TwinMapParams) -> Self {
        ArgumentInterpreter { params }
    }

    /// 依次处理全部参数，后出现者覆盖先出现者
    pub fn process_all<S: AsRef<str>>(mut self, args: &[S]) -> Result<TwinMapParams> {
        let mut unknown = Vec::new();
        for arg in args {
            match self.process(arg.as_ref()) {
                Err(TwinMapError::UnknownKeyword(word)) => unknown.push(word),
                other => other?,
            }
        }
        if !unknown.is_empty() {
            output::print_warning("Some keywords are not recognized:");
            for word in &unknown {
                output::print_line(&format!("  {}", word));
            }
            return Err(TwinMapError::UnknownKeyword(unknown.join(", ")));
        }
        Ok(self.params)
    }

    /// 处理单个参数
    pub fn process(&mut self, arg: &str) -> Result<()> {
        let path = Path::new(arg);
        if path.is_file() {
            return self.process_file(path, arg);
        }
        if let Some((key, value)) = arg.split_once('=') {
            let full = resolve_key(key.trim())?;
            return self.params.set(full, value);
        }
        Err(TwinMapError::UnknownKeyword(arg.to_string()))
    }

    fn process_file(&mut self, path: &Path, arg: &str) -> Result<()> {
        match FileKind::detect(path) {
            FileKind::Parameters => self.params.merge_file(path),
            FileKind::Reflections => self.params.set("input.xray_data.file_name", arg),
            FileKind::Model => self.params.set("input.model.file_name", arg),
            FileKind::Unknown => Err(TwinMapError::UnknownKeyword(arg.to_string())),
        }
    }
}

/// 将用户给出的 key 解析为唯一的完整叶路径
pub fn resolve_key(key: &str) -> Result<&'static str> {
    if key.is_empty() {
        return Err(TwinMapError::UnknownKeyword(format!("{}=", key)));
    }
    let wanted: Vec<&str> = key
        .split('.')
        .map(|part| {
            ALIASES
                .iter()
                .find(|(alias, _)| *alias == part)
                .map(|(_, full)| *full)
                .unwrap_or(part)
        })
        .collect();

    let matches: Vec<&'static str> = LEAF_PATHS
        .iter()
        .copied()
        .filter(|path| {
            let parts: Vec<&str> = path.split('.').collect();
            parts.len() >= wanted.len() && parts[parts.len() - wanted.len()..] == wanted[..]
        })
        .collect();

    match matches.as_slice() {
        [single] => Ok(*single),
        [] => Err(TwinMapError::UnknownKeyword(key.to_string())),
        many => Err(TwinMapError::AmbiguousKeyword {
            key: key.to_string(),
            candidates: many.join(", "),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmodel::DetwinMode;
    use std::fs;

    #[test]
    fn test_resolve_key_suffixes_and_aliases() {
        assert_eq!(resolve_key("obs_labels").unwrap(), "input.xray_data.obs_labels");
        assert_eq!(resolve_key("data.file").unwrap(), "input.xray_data.file_name");
        assert_eq!(resolve_key("model.file").unwrap(), "input.model.file_name");
        assert_eq!(resolve_key("xray_data.file_name").unwrap(), "input.xray_data.file_name");
        assert_eq!(resolve_key("twin_law").unwrap(), "parameters.twinning.twin_law");
        assert_eq!(
            resolve_key("input.unit_cell").unwrap(),
            "input.unit_cell"
        );
    }

    #[test]
    fn test_resolve_key_errors() {
        let err = resolve_key("file_name").unwrap_err();
        assert!(matches!(err, TwinMapError::AmbiguousKeyword { .. }));
        assert!(err.to_string().contains("input.model.file_name"));

        let err = resolve_key("nonsense").unwrap_err();
        assert_eq!(err.to_string(), "Unknown file or keyword: nonsense");
        // 尾部分量必须完整匹配
        assert!(resolve_key("labels").is_err());
    }

    #[test]
    fn test_process_assignments_in_order() {
        let params = ArgumentInterpreter::new(TwinMapParams::default())
            .process_all(&["detwin_mode=auto", "max_delta=4.5", "detwin_mode=proportional"])
            .unwrap();
        assert_eq!(params.parameters.twinning.detwin_mode, DetwinMode::Proportional);
        assert_eq!(params.parameters.twinning.max_delta, 4.5);
    }

    #[test]
    fn test_process_files() {
        let dir = tempfile::tempdir().unwrap();
        let mtz = dir.path().join("data.mtz");
        let pdb = dir.path().join("model.pdb");
        let params_file = dir.path().join("run.toml");
        let other = dir.path().join("notes.txt");
        fs::write(&mtz, b"placeholder").unwrap();
        fs::write(&pdb, "END\n").unwrap();
        fs::write(&params_file, "[output]\nmap_coeffs_root = \"TWIN\"\n").unwrap();
        fs::write(&other, "x").unwrap();

        let args = [
            mtz.display().to_string(),
            pdb.display().to_string(),
            params_file.display().to_string(),
        ];
        let params = ArgumentInterpreter::new(TwinMapParams::default())
            .process_all(&args)
            .unwrap();
        assert_eq!(params.input.xray_data.file_name.as_deref(), Some(args[0].as_str()));
        assert_eq!(params.input.model.file_name.as_deref(), Some(args[1].as_str()));
        assert_eq!(params.output.map_coeffs_root, "TWIN");

        let err = ArgumentInterpreter::new(TwinMapParams::default())
            .process_all(&[other.display().to_string()])
            .unwrap_err();
        assert!(matches!(err, TwinMapError::UnknownKeyword(_)));
    }

    #[test]
    fn test_unknown_argument() {
        let err = ArgumentInterpreter::new(TwinMapParams::default())
            .process_all(&["not_a_file_or_keyword"])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown file or keyword: not_a_file_or_keyword"
        );
    }

    #[test]
    fn test_unrecognized_keywords_are_listed() {
        output::set_quiet(true);
        let err = ArgumentInterpreter::new(TwinMapParams::default())
            .process_all(&["zz_first_stray", "max_delta=2", "zz_second_stray=1"])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown file or keyword: zz_first_stray, zz_second_stray"
        );

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.txt");
        output::save_log(&log).unwrap();
        let text = fs::read_to_string(&log).unwrap();
        assert!(text.contains("Some keywords are not recognized:"));
        assert!(text.contains("  zz_first_stray"));
        assert!(text.contains("  zz_second_stray"));
    }
}
