//! 运行结果.

use crate::profile::Profile;
use skel_berry::RunReport;
use std::io::{self, Write};
use std::path::PathBuf;

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.3}"),
            None => "/".to_string(),
        }
    }

    let total = p.get_total();
    writeln!(w, "Profile:")?;
    writeln!(w, "{S4}Samples done: {}", p.get_done())?;
    writeln!(w, "{S4}Samples failed: {}", p.get_failed())?;
    writeln!(w, "{S4}Skeleton components: {}", total.components)?;
    writeln!(w, "{S4}Instances accepted: {}", total.accepted)?;
    writeln!(w, "{S4}Instances rejected: {}", total.rejected)?;
    writeln!(
        w,
        "{S4}Average time: {} ms",
        f64_to_display(p.get_avg_sample_time_ms())
    )?;
    writeln!(w, "{S4}Total machine time: {} ms", p.get_real_time_ms())?;
    let t = p.get_most_time_consuming().map(|d| d.as_secs_f64() * 1000.0);
    write!(w, "{S4}Most time-consuming sample costs {} ms", f64_to_display(t))?;
    Ok(())
}

/// 批量烘焙的最终结果.
pub struct BakeResult {
    samples: Vec<(PathBuf, RunReport)>,
    profile: Profile,
}

impl BakeResult {
    /// 构造.
    pub fn new(samples: Vec<(PathBuf, RunReport)>, profile: Profile) -> Self {
        Self { samples, profile }
    }

    /// 成功处理的样本.
    #[inline]
    pub fn samples(&self) -> &[(PathBuf, RunReport)] {
        &self.samples
    }

    /// 打印运行结果.
    pub fn analyze(&self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut w = stdout.lock();
        utils::sep_to(&mut w)?;
        for (dir, report) in self.samples() {
            writeln!(w, "{}: {report}", dir.display())?;
        }
        utils::sep_to(&mut w)?;
        describe_into(&self.profile, &mut w)?;
        writeln!(w)?;
        utils::sep_to(&mut w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let mut buf = Vec::new();
        describe_into(&Profile::new().finish(), &mut buf).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("Samples done: 0"));
        assert!(s.contains("Average time: / ms"));
    }
}
