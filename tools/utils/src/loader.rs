//! 样本目录的加载器.
//!
//! 每个样本是一个子目录, 其中保存已拼接的网络输出
//! (`semantic.npy`, `skeleton.npy`, `vectors.npy`).

use skel_berry::{NetworkOutput, PipelineResult};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 样本目录所在环境变量.
pub const SAMPLES_DIR_ENV: &str = "SKEL_SAMPLES_DIR";

/// 获取 `$HOME/dataset/<it...>` 路径. 无法确定主目录时返回 `None`.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 获取样本基本路径.
///
/// 1. 若环境变量 `$SKEL_SAMPLES_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/skel/samples`.
pub fn samples_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(SAMPLES_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["skel", "samples"]),
    }
}

/// 判断 `dir` 是否是一个样本目录.
#[inline]
pub fn is_sample_dir(dir: &Path) -> bool {
    ["semantic.npy", "skeleton.npy", "vectors.npy"]
        .iter()
        .all(|f| dir.join(f).is_file())
}

/// 按名字顺序逐个加载样本.
pub struct SampleLoader {
    dirs: std::vec::IntoIter<PathBuf>,
}

impl SampleLoader {
    /// 扫描 `base` 下所有样本子目录.
    pub fn new<P: AsRef<Path>>(base: P) -> io::Result<Self> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(base)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| is_sample_dir(p))
            .collect();
        dirs.sort();
        Ok(Self {
            dirs: dirs.into_iter(),
        })
    }

    /// 剩余样本数.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.dirs.len()
    }
}

impl Iterator for SampleLoader {
    type Item = (PathBuf, PipelineResult<NetworkOutput>);

    fn next(&mut self) -> Option<Self::Item> {
        let dir = self.dirs.next()?;
        let out = NetworkOutput::open(&dir);
        Some((dir, out))
    }
}

/// 从 `$SKEL_SAMPLES_DIR` 或者 `$HOME/dataset/skel/samples` 下加载样本.
#[inline]
pub fn sample_loader_from_env_or_home() -> io::Result<SampleLoader> {
    let dir = samples_dir_from_env_or_home()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "cannot locate home directory"))?;
    SampleLoader::new(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_loader() {
        let base = env::temp_dir().join(format!("skel-utils-{}", std::process::id()));
        for name in ["b", "a"] {
            let d = base.join(name);
            fs::create_dir_all(&d).unwrap();
            NetworkOutput::zeros((4, 3, 2)).save(&d).unwrap();
        }
        fs::create_dir_all(base.join("not-a-sample")).unwrap();

        let loader = SampleLoader::new(&base).unwrap();
        assert_eq!(loader.remaining(), 2);
        let names: Vec<_> = loader
            .map(|(p, out)| {
                assert_eq!(out.unwrap().shape(), (4, 3, 2));
                p.file_name().unwrap().to_string_lossy().into_owned()
            })
            .collect();
        assert_eq!(names, ["a", "b"]);
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_home_dataset_dir() {
        if let Some(p) = home_dataset_dir_with(["skel", "samples"]) {
            assert!(p.ends_with("dataset/skel/samples"));
        }
    }
}
