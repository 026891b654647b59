//! 运行器依赖的通用组件.

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 根据可并行核心数选择后端.
#[inline]
pub fn backend() -> skel_berry::Backend {
    if cpus() > 1 {
        skel_berry::Backend::Parallel
    } else {
        skel_berry::Backend::Serial
    }
}
