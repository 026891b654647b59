//! 批量运行统计.

use skel_berry::RunReport;
use std::time::{Duration, Instant};

/// 累加计时器.
///
/// 该计时器支持 "中途中断" 与 "结束中断, 继续开始计时".
#[derive(Clone, Debug)]
pub struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时会视为已经开始计时 (`self.start()`).
    #[inline]
    pub fn new() -> Self {
        Self {
            consumed: Duration::from_secs(0),
            since: Instant::now(),
        }
    }

    /// 开始计时.
    #[inline]
    pub fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时, 并将这一区间的时间累加. 返回本轮计时时长.
    ///
    /// # 注意
    ///
    /// 上一次调用必须是 `self.start()`, 否则计算时间值无意义.
    #[inline]
    pub fn elapsed(&mut self) -> Duration {
        let d = self.since.elapsed();
        self.consumed += d;
        d
    }

    /// 获得总共累计下来的时间 (以毫秒为单位).
    #[inline]
    pub fn get_total_ms(&self) -> u64 {
        self.consumed.as_millis() as u64
    }
}

impl Default for AccTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// 批量烘焙数据统计.
#[derive(Clone, Debug, Default)]
pub struct Profile {
    /// 成功处理的样本数.
    done: u64,

    /// 加载或处理失败的样本数.
    failed: u64,

    /// 各样本统计的累加.
    total: RunReport,

    /// 处理样本花费的总时间.
    sample_time: AccTimer,

    /// 整个任务花费的总时间.
    real_time: AccTimer,

    /// 最耗时的一次样本处理.
    most: Option<Duration>,
}

impl Profile {
    /// 初始化.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一次样本处理计时.
    #[inline]
    pub fn sample_start(&mut self) {
        self.sample_time.start();
    }

    /// 结束一次成功的样本处理计时, 并累加其统计.
    pub fn sample_done(&mut self, report: &RunReport) {
        let d = self.sample_time.elapsed();
        self.most = Some(self.most.map_or(d, |m| m.max(d)));
        self.done += 1;
        self.total.tiles += report.tiles;
        self.total.components += report.components;
        self.total.accepted += report.accepted;
        self.total.rejected += report.rejected;
    }

    /// 记录一个失败的样本.
    #[inline]
    pub fn sample_failed(&mut self) {
        self.failed += 1;
    }

    /// 结束全部计时.
    #[inline]
    pub fn finish(mut self) -> Self {
        self.real_time.elapsed();
        self
    }

    /// 成功样本数.
    #[inline]
    pub fn get_done(&self) -> u64 {
        self.done
    }

    /// 失败样本数.
    #[inline]
    pub fn get_failed(&self) -> u64 {
        self.failed
    }

    /// 累加统计.
    #[inline]
    pub fn get_total(&self) -> &RunReport {
        &self.total
    }

    /// 以毫秒为单位获得处理样本的平均时间.
    #[inline]
    pub fn get_avg_sample_time_ms(&self) -> Option<f64> {
        match self.done {
            0 => None,
            done => Some(self.sample_time.get_total_ms() as f64 / done as f64),
        }
    }

    /// 以毫秒为单位获得任务总时间.
    #[inline]
    pub fn get_real_time_ms(&self) -> u64 {
        self.real_time.get_total_ms()
    }

    /// 最耗时的一次样本处理.
    #[inline]
    pub fn get_most_time_consuming(&self) -> Option<Duration> {
        self.most
    }
}
