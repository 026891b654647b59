//! 分块窗口.
//!
//! 将任意大的体数据切成若干带光晕的重叠窗口, 以便每个窗口都能单独送入推理函数;
//! 推理结果只有去掉光晕后的内部区域会被写回目标体数据.

use std::ops::Range;

use itertools::iproduct;
use ndarray::{s, ArrayView4, ArrayViewMut4, Ix4, SliceInfo, SliceInfoElem};

use crate::config::{check_window, ConfigError};
use crate::error::{PipelineError, PipelineResult};
use crate::{Axes, Idx3d};

/// 单个轴上的一段窗口.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Span {
    /// 窗口起点.
    start: usize,
    /// 窗口长度.
    len: usize,
    /// 写回区域 (窗口局部坐标, 左闭右开).
    keep: Range<usize>,
}

/// 计算单个轴上的全部窗口.
///
/// 1. 若 `window + 2 * halo > len`, 则只返回覆盖整个轴的一个窗口.
/// 2. 否则窗口以 `window - 2 * halo` 为步长前进. 若最后一个窗口会越界,
///   则将其贴齐到轴末端 (`len - window`), 保证窗口大小不变.
/// 3. 写回区域去掉与相邻窗口交界一侧的 `halo`; 贴着体数据边界的一侧保留到边界,
///   从而所有写回区域恰好不重不漏地铺满整个轴.
fn axis_spans(len: usize, window: usize, halo: usize) -> Vec<Span> {
    debug_assert!(len > 0 && 2 * halo < window);
    if window + 2 * halo > len {
        return vec![Span {
            start: 0,
            len,
            keep: 0..len,
        }];
    }

    let stride = window - 2 * halo;
    let mut starts = Vec::with_capacity(len / stride + 1);
    let mut cur = 0;
    loop {
        if cur + window >= len {
            // 贴齐末端. 由于上一个窗口未触及末端, 新起点严格大于上一个起点.
            starts.push(len - window);
            break;
        }
        starts.push(cur);
        cur += stride;
    }

    let n = starts.len();
    let mut spans = Vec::with_capacity(n);
    let mut written = 0;
    for (i, &start) in starts.iter().enumerate() {
        let hi = if i + 1 == n { len } else { start + window - halo };
        debug_assert!(written >= start && hi > written);
        spans.push(Span {
            start,
            len: window,
            keep: (written - start)..(hi - start),
        });
        written = hi;
    }
    debug_assert_eq!(written, len);
    spans
}

/// 一个分块窗口: 起点, 大小, 光晕, 以及推理结果中需要写回的区域.
///
/// 该窗口是只读的.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileWindow {
    origin: Idx3d,
    size: Idx3d,
    halo: Idx3d,
    keep: [Range<usize>; 3],
}

impl TileWindow {
    fn from_spans(x: &Span, y: &Span, z: &Span, halo: Axes<usize>) -> Self {
        Self {
            origin: (x.start, y.start, z.start),
            size: (x.len, y.len, z.len),
            halo: (halo[0], halo[1], halo[2]),
            keep: [x.keep.clone(), y.keep.clone(), z.keep.clone()],
        }
    }

    /// 窗口起点 (体数据坐标).
    #[inline]
    pub fn origin(&self) -> Idx3d {
        self.origin
    }

    /// 窗口大小.
    #[inline]
    pub fn size(&self) -> Idx3d {
        self.size
    }

    /// 光晕宽度.
    #[inline]
    pub fn halo(&self) -> Idx3d {
        self.halo
    }

    /// 写回区域, 以窗口局部坐标表示.
    #[inline]
    pub fn keep_local(&self) -> [Range<usize>; 3] {
        self.keep.clone()
    }

    /// 写回区域, 以体数据坐标表示.
    pub fn keep_global(&self) -> [Range<usize>; 3] {
        let (x, y, z) = self.origin;
        let [kx, ky, kz] = &self.keep;
        [
            kx.start + x..kx.end + x,
            ky.start + y..ky.end + y,
            kz.start + z..kz.end + z,
        ]
    }

    /// 写回区域的体素个数.
    #[inline]
    pub fn keep_len(&self) -> usize {
        self.keep.iter().map(|r| r.len()).product()
    }

    /// 窗口在体数据上的切片描述 (通道轴全选).
    fn window_slice(&self) -> SliceInfo<[SliceInfoElem; 4], Ix4, Ix4> {
        let (x, y, z) = self.origin;
        let (w, h, d) = self.size;
        s![.., x..x + w, y..y + h, z..z + d]
    }

    /// 从 `volume` 中截取该窗口的视图.
    ///
    /// 如果窗口越界, 则程序 panic.
    #[inline]
    pub fn crop<'a>(&self, volume: ArrayView4<'a, f32>) -> ArrayView4<'a, f32> {
        volume.slice_move(self.window_slice())
    }

    /// 将推理结果 `tile` 的写回区域拷贝到 `dst` 的对应位置. 光晕区域被丢弃.
    ///
    /// `tile` 的空间形状必须等于窗口大小, 且两者通道数必须一致, 否则返回
    /// `ShapeMismatch`.
    pub fn scatter<T: Clone>(
        &self,
        tile: ArrayView4<'_, T>,
        dst: &mut ArrayViewMut4<'_, T>,
    ) -> PipelineResult<()> {
        let (w, h, d) = self.size;
        let c = dst.shape()[0];
        PipelineError::check_shape("tile output", &[c, w, h, d], tile.shape())?;

        let [lx, ly, lz] = self.keep_local();
        let [gx, gy, gz] = self.keep_global();
        dst.slice_mut(s![.., gx, gy, gz])
            .assign(&tile.slice(s![.., lx, ly, lz]));
        Ok(())
    }
}

/// 分块器.
///
/// 对给定形状的体数据生成覆盖全体的窗口序列. 该序列是惰性的、可重复的:
/// 每次调用 [`Self::iter`] 都会以相同顺序 (x 最外层, z 最内层) 重新生成相同的窗口.
#[derive(Clone, Debug)]
pub struct Cropper {
    shape: Idx3d,
    halo: Axes<usize>,
    spans: [Vec<Span>; 3],
}

impl Cropper {
    /// 为空间形状 `shape` 构建分块器.
    ///
    /// 窗口在某轴为 0, 光晕过大 (`2 * halo >= window`),
    /// 或体数据在某轴为空时返回 `Err`.
    pub fn new(shape: Idx3d, window: Axes<usize>, halo: Axes<usize>) -> Result<Self, ConfigError> {
        check_window(window, halo)?;
        let lens = [shape.0, shape.1, shape.2];
        if let Some(axis) = lens.iter().position(|&l| l == 0) {
            return Err(ConfigError::EmptyVolume { axis });
        }
        let spans = [0, 1, 2].map(|i| axis_spans(lens[i], window[i], halo[i]));
        Ok(Self { shape, halo, spans })
    }

    /// 体数据空间形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 窗口总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.spans.iter().map(Vec::len).product()
    }

    /// 是否没有任何窗口. 对合法的分块器总是 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按确定顺序迭代所有窗口.
    pub fn iter(&self) -> impl Iterator<Item = TileWindow> + '_ {
        let [xs, ys, zs] = &self.spans;
        iproduct!(xs.iter(), ys.iter(), zs.iter())
            .map(|(x, y, z)| TileWindow::from_spans(x, y, z, self.halo))
    }

    /// 按确定顺序迭代 `(窗口视图, 窗口)` 对.
    ///
    /// 如果 `volume` 的空间形状与分块器不一致, 则程序 panic.
    pub fn tiles<'a>(
        &'a self,
        volume: ArrayView4<'a, f32>,
    ) -> impl Iterator<Item = (ArrayView4<'a, f32>, TileWindow)> + 'a {
        assert_eq!(crate::volume::spatial_shape(&volume), self.shape);
        self.iter().map(move |w| (w.crop(volume), w))
    }
}
