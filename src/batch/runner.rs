//! # 批量执行器
//!
//! 在独立的 rayon 线程池中并行处理文件，结果按输入顺序汇总。
//!
//! ## 依赖关系
//! - 被 `commands/laws.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条

use crate::error::{Result, TwinMapError};
use crate::utils::progress;

use rayon::prelude::*;
use std::path::PathBuf;

/// 单个文件处理结果
#[derive(Debug, Clone)]
pub enum ProcessResult {
    /// 成功，附带汇总信息
    Success(String, String),
    /// 跳过（如缺少对称性），附带原因
    Skipped(String, String),
    /// 失败 (文件路径, 错误信息)
    Failed(String, String),
}

/// 批量处理结果统计
#[derive(Debug, Default)]
pub struct BatchResult {
    /// (文件, 汇总) 按输入顺序
    pub summaries: Vec<(String, String)>,
    pub skipped: Vec<(String, String)>,
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    pub fn merge(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Success(path, summary) => self.summaries.push((path, summary)),
            ProcessResult::Skipped(path, reason) => self.skipped.push((path, reason)),
            ProcessResult::Failed(path, err) => self.failures.push((path, err)),
        }
    }

    pub fn success(&self) -> usize {
        self.summaries.len()
    }
}

/// 批量执行器
pub struct BatchRunner {
    jobs: usize,
}

impl BatchRunner {
    /// jobs 为 0 时使用全部 CPU
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self { jobs }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// 并行处理文件列表
    pub fn run<F>(&self, files: Vec<PathBuf>, processor: F) -> Result<BatchResult>
    where
        F: Fn(&PathBuf) -> ProcessResult + Sync + Send,
    {
        let pb = progress::create_progress_bar(files.len() as u64, "Analyzing");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| TwinMapError::Other(format!("Failed to start thread pool: {}", e)))?;

        let results: Vec<ProcessResult> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    let result = processor(file);
                    pb.inc(1);
                    result
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut batch_result = BatchResult::default();
        for result in results {
            batch_result.merge(result);
        }
        Ok(batch_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_keep_input_order() {
        let files: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("f{:02}.mtz", i))).collect();
        let result = BatchRunner::new(4)
            .run(files, |f| {
                let name = f.display().to_string();
                match name.as_str() {
                    "f03.mtz" => ProcessResult::Failed(name, "broken".to_string()),
                    "f07.mtz" => ProcessResult::Skipped(name, "no symmetry".to_string()),
                    _ => ProcessResult::Success(name.clone(), format!("{} ok", name)),
                }
            })
            .unwrap();
        assert_eq!(result.summaries.len() + result.skipped.len() + result.failures.len(), 20);
        assert_eq!(result.success(), 18);
        assert_eq!(result.failures[0].0, "f03.mtz");
        assert_eq!(result.skipped[0].1, "no symmetry");
        let order: Vec<&str> = result.summaries.iter().map(|(f, _)| f.as_str()).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }
}
