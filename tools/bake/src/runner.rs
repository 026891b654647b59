//! 程序运行函数.

use crate::profile::Profile;
use crate::result::BakeResult;
use log::{error, info};
use skel_berry::{save_volume, Pipeline, PipelineConfig, PipelineResult, RunReport};
use std::path::Path;
use utils::loader::{self, SampleLoader};

/// 实例标签输出文件名.
pub const INSTANCES_FILE: &str = "instances.npy";

/// 处理单个样本, 并将标签写入样本目录.
fn bake_one(pipeline: &Pipeline, dir: &Path, out: skel_berry::NetworkOutput) -> PipelineResult<RunReport> {
    let rec = pipeline.reconstruct(out, utils::backend())?;
    save_volume(dir.join(INSTANCES_FILE), &rec.labels)?;
    Ok(rec.report)
}

/// 依次处理 `loader` 中的所有样本. 单个样本失败不会影响其它样本.
pub fn run_with(pipeline: &Pipeline, loader: SampleLoader) -> BakeResult {
    let mut profile = Profile::new();
    let mut samples = Vec::with_capacity(loader.remaining());

    for (dir, out) in loader {
        profile.sample_start();
        match out.and_then(|out| bake_one(pipeline, &dir, out)) {
            Ok(report) => {
                info!("{}: {report}", dir.display());
                profile.sample_done(&report);
                samples.push((dir, report));
            }
            Err(e) => {
                error!("{}: {e}", dir.display());
                profile.sample_failed();
            }
        }
    }
    BakeResult::new(samples, profile.finish())
}

/// 实际运行.
pub fn run() -> Result<BakeResult, Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let loader = loader::sample_loader_from_env_or_home()?;
    println!("Baking {} samples on {} cpus...", loader.remaining(), utils::cpus());
    Ok(run_with(&pipeline, loader))
}
