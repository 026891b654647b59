//! 实例烘焙: 把每个前景体素分配给嵌入空间中最近的骨架.
//!
//! 对于编号为 `k` 的骨架点集 `P_k`:
//!
//! 1. 以 `P_k` 的包围盒向外扩展 `margin` 得到裁剪区域, 并截断到体数据范围内;
//! 2. 对区域内每个前景体素, 在 `P_k` 中查找与其嵌入坐标 `e` 最近的骨架点 `s`;
//! 3. 计算 `p = exp(-Σ (e_i - s_i)^2 / (2 σ_i^2))`, `p > threshold` 的体素被分配给 `k`;
//! 4. 分配体素数不足 `min_volume` 的候选被拒绝, 其分配位置写 0; 否则写 `k`.
//!
//! 不同编号的裁剪区域可能重叠. 写入总是按编号升序进行, 后写者覆盖先写者.

use std::ops::Range;

use log::{debug, warn};
use ndarray::{s, Array3, ArrayView3, ArrayView4, ArrayViewMut3, Axis, Zip};

use crate::consts::{defaults, BACKGROUND};
use crate::error::{PipelineError, PipelineResult};
use crate::skeleton::SkeletonMap;
use crate::{Axes, Idx3d};

mod index;

pub use index::SkeletonIndex;

/// 并行烘焙时每批同时计算的候选个数. 每个候选持有一个稠密的裁剪掩膜,
/// 同时驻留内存的掩膜数不超过该值.
pub const PARALLEL_BATCH: usize = 64;

/// 烘焙参数. 见 [`crate::PipelineConfig`] 中的同名字段.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BakeParams {
    /// 包围盒向外扩展的边距.
    pub margin: Axes<usize>,
    /// 最近点查询时各轴的距离权重.
    pub anisotropy: Axes<f32>,
    /// 各轴可接受的离散程度 `σ`.
    pub spread: Axes<f32>,
    /// 概率门限.
    pub threshold: f32,
    /// 最小实例体积.
    pub min_volume: usize,
}

impl Default for BakeParams {
    fn default() -> Self {
        Self {
            margin: defaults::CROP_MARGIN,
            anisotropy: defaults::ANISOTROPY,
            spread: defaults::SPREAD,
            threshold: defaults::INSTANCE_THRESHOLD,
            min_volume: defaults::MIN_INSTANCE_VOLUME,
        }
    }
}

/// 轴对齐的裁剪区域, 左闭右开.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    lo: Idx3d,
    hi: Idx3d,
}

impl Region {
    /// 起点 (含).
    #[inline]
    pub fn lo(&self) -> Idx3d {
        self.lo
    }

    /// 终点 (不含).
    #[inline]
    pub fn hi(&self) -> Idx3d {
        self.hi
    }

    /// 区域形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        (
            self.hi.0.saturating_sub(self.lo.0),
            self.hi.1.saturating_sub(self.lo.1),
            self.hi.2.saturating_sub(self.lo.2),
        )
    }

    /// 区域是否不含任何体素.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let (x, y, z) = self.shape();
        x == 0 || y == 0 || z == 0
    }

    fn ranges(&self) -> [Range<usize>; 3] {
        [
            self.lo.0..self.hi.0.max(self.lo.0),
            self.lo.1..self.hi.1.max(self.lo.1),
            self.lo.2..self.hi.2.max(self.lo.2),
        ]
    }
}

/// 计算 `points` 的包围盒向外扩展 `margin` 并截断到 `shape` 内的区域.
///
/// # 返回值
///
/// `points` 为空时返回 `None`. 若 `points` 全部位于 `shape` 之外,
/// 返回的区域可能为空 (见 [`Region::is_empty`]).
pub fn crop_region(points: &[Idx3d], margin: Axes<usize>, shape: Idx3d) -> Option<Region> {
    let (&first, rest) = points.split_first()?;
    let (mut lo, mut hi) = (first, first);
    for &(x, y, z) in rest {
        lo = (lo.0.min(x), lo.1.min(y), lo.2.min(z));
        hi = (hi.0.max(x), hi.1.max(y), hi.2.max(z));
    }
    Some(Region {
        lo: (
            lo.0.saturating_sub(margin[0]),
            lo.1.saturating_sub(margin[1]),
            lo.2.saturating_sub(margin[2]),
        ),
        hi: (
            (hi.0 + margin[0] + 1).min(shape.0),
            (hi.1 + margin[1] + 1).min(shape.1),
            (hi.2 + margin[2] + 1).min(shape.2),
        ),
    })
}

/// 单个编号的烘焙结果.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BakeOutcome {
    /// 被写入标签体数据.
    Accepted {
        /// 实例编号.
        id: u32,
        /// 分配到的体素数.
        volume: usize,
    },
    /// 体积不足, 已被丢弃.
    Rejected {
        /// 实例编号.
        id: u32,
        /// 分配到的体素数.
        volume: usize,
    },
}

impl BakeOutcome {
    /// 是否被接受.
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// 一次烘焙的统计.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BakeSummary {
    /// 被接受的实例数.
    pub accepted: usize,
    /// 被拒绝的实例数.
    pub rejected: usize,
}

impl BakeSummary {
    fn record(&mut self, outcome: BakeOutcome) {
        if outcome.is_accepted() {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }
}

/// 某个编号尚未写入的实例候选.
#[derive(Clone, Debug)]
pub struct Candidate {
    id: u32,
    region: Region,
    mask: Array3<bool>,
    volume: usize,
}

impl Candidate {
    /// 实例编号.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 裁剪区域.
    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    /// 裁剪区域内的分配掩膜.
    #[inline]
    pub fn mask(&self) -> ArrayView3<'_, bool> {
        self.mask.view()
    }

    /// 分配到的体素数.
    #[inline]
    pub fn volume(&self) -> usize {
        self.volume
    }

    /// 将候选写入 `labels`: 体积足够时写编号, 否则写 0.
    ///
    /// # 注意
    ///
    /// 只有掩膜为真的位置会被写入, 其它位置保持原值.
    pub fn apply(&self, labels: &mut ArrayViewMut3<'_, u32>, min_volume: usize) -> BakeOutcome {
        let accepted = self.volume > 0 && self.volume >= min_volume;
        let value = if accepted { self.id } else { BACKGROUND };
        if self.volume > 0 {
            let [rx, ry, rz] = self.region.ranges();
            let mut dst = labels.slice_mut(s![rx, ry, rz]);
            Zip::from(&mut dst).and(&self.mask).for_each(|l, &m| {
                if m {
                    *l = value;
                }
            });
        }

        if accepted {
            debug!("Instance {} accepted with {} voxels", self.id, self.volume);
            BakeOutcome::Accepted {
                id: self.id,
                volume: self.volume,
            }
        } else {
            warn!(
                "Instance {} rejected: {} voxels, minimum is {}",
                self.id, self.volume, min_volume
            );
            BakeOutcome::Rejected {
                id: self.id,
                volume: self.volume,
            }
        }
    }
}

/// 实例烘焙器. 只读地借用嵌入场与前景掩膜.
pub struct Baker<'a> {
    embedding: ArrayView4<'a, f32>,
    foreground: ArrayView3<'a, bool>,
    params: BakeParams,
}

impl<'a> Baker<'a> {
    /// 创建烘焙器. `embedding` 形状必须为 `[3, X, Y, Z]`, `foreground` 为 `[X, Y, Z]`.
    pub fn new(
        embedding: ArrayView4<'a, f32>,
        foreground: ArrayView3<'a, bool>,
        params: BakeParams,
    ) -> PipelineResult<Self> {
        let mut expected = vec![3];
        expected.extend_from_slice(foreground.shape());
        PipelineError::check_shape("embedding", &expected, embedding.shape())?;
        Ok(Self {
            embedding,
            foreground,
            params,
        })
    }

    /// 烘焙参数.
    #[inline]
    pub fn params(&self) -> &BakeParams {
        &self.params
    }

    /// 计算编号 `id` 的实例候选, 不写入任何数据.
    ///
    /// `points` 为空时返回 `Err(EmptyComponent)`.
    pub fn candidate(&self, id: u32, points: &[Idx3d]) -> PipelineResult<Candidate> {
        let region = crop_region(points, self.params.margin, self.foreground.dim())
            .ok_or(PipelineError::EmptyComponent(id))?;
        if region.is_empty() {
            return Ok(Candidate {
                id,
                region,
                mask: Array3::from_elem(region.shape(), false),
                volume: 0,
            });
        }

        let [rx, ry, rz] = region.ranges();
        let fg = self.foreground.slice(s![rx.clone(), ry.clone(), rz.clone()]);
        let emb = self.embedding.slice(s![.., rx, ry, rz]);
        PipelineError::check_shape("crop", &emb.shape()[1..], fg.shape())?;

        let index = SkeletonIndex::new(points, self.params.anisotropy);
        let (spread, threshold) = (self.params.spread, self.params.threshold);
        let mask = Zip::from(&fg)
            .and(emb.lanes(Axis(0)))
            .map_collect(|&f, e| {
                if !f {
                    return false;
                }
                let e = [e[0], e[1], e[2]];
                match index.nearest(e) {
                    Some(s) => probability(e, s, spread) > threshold,
                    None => false,
                }
            });
        let volume = mask.iter().filter(|&&m| m).count();
        Ok(Candidate {
            id,
            region,
            mask,
            volume,
        })
    }

    /// 按编号升序烘焙所有骨架, 写入 `labels`.
    ///
    /// `parallel` 为真 (且开启 `rayon` feature) 时按编号升序分批, 每批至多
    /// [`PARALLEL_BATCH`] 个候选并行计算, 随后依次写入. 写入顺序与串行一致,
    /// 结果也完全一致.
    pub fn bake_into(
        &self,
        components: &SkeletonMap,
        labels: &mut Array3<u32>,
        parallel: bool,
    ) -> PipelineResult<BakeSummary> {
        PipelineError::check_shape("labels", self.foreground.shape(), labels.shape())?;
        let min_volume = self.params.min_volume;
        let mut labels = labels.view_mut();
        let mut summary = BakeSummary::default();

        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                if parallel {
                    use rayon::prelude::*;

                    let items: Vec<(u32, &[Idx3d])> =
                        components.iter().map(|(&id, p)| (id, p.as_slice())).collect();
                    for batch in items.chunks(PARALLEL_BATCH) {
                        let candidates: Vec<PipelineResult<Candidate>> = batch
                            .par_iter()
                            .map(|&(id, points)| self.candidate(id, points))
                            .collect();
                        for c in candidates {
                            summary.record(c?.apply(&mut labels, min_volume));
                        }
                    }
                    return Ok(summary);
                }
            } else {
                let _ = parallel;
            }
        }

        for (&id, points) in components {
            let c = self.candidate(id, points)?;
            summary.record(c.apply(&mut labels, min_volume));
        }
        Ok(summary)
    }

    /// 与 [`Self::bake_into`] 相同, 但写入一个新的全零标签体数据.
    pub fn bake(
        &self,
        components: &SkeletonMap,
        parallel: bool,
    ) -> PipelineResult<(Array3<u32>, BakeSummary)> {
        let mut labels = Array3::<u32>::zeros(self.foreground.raw_dim());
        let summary = self.bake_into(components, &mut labels, parallel)?;
        Ok((labels, summary))
    }
}

/// 嵌入坐标 `e` 属于骨架点 `s` 的概率.
#[inline]
fn probability(e: [f32; 3], (x, y, z): Idx3d, spread: Axes<f32>) -> f32 {
    let s = [x as f32, y as f32, z as f32];
    let d: f32 = (0..3)
        .map(|i| {
            let t = e[i] - s[i];
            t * t / (2.0 * spread[i] * spread[i])
        })
        .sum();
    (-d).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    /// 构造一个体数据, 其中每个球内的前景体素嵌入坐标都指向球心.
    fn blobs(shape: Idx3d, centers: &[Idx3d], radius: usize) -> (Array4<f32>, Array3<bool>) {
        let r2 = (radius * radius) as isize;
        let owner = |(x, y, z): Idx3d| {
            centers.iter().copied().find(|&(cx, cy, cz)| {
                let d = |a: usize, b: usize| (a as isize - b as isize).pow(2);
                d(x, cx) + d(y, cy) + d(z, cz) <= r2
            })
        };
        let fg = Array3::from_shape_fn(shape, |p| owner(p).is_some());
        let emb = Array4::from_shape_fn((3, shape.0, shape.1, shape.2), |(c, x, y, z)| {
            let p = owner((x, y, z)).unwrap_or((x, y, z));
            [p.0, p.1, p.2][c] as f32
        });
        (emb, fg)
    }

    fn components(list: &[(u32, Vec<Idx3d>)]) -> SkeletonMap {
        list.iter().cloned().collect()
    }

    #[test]
    fn test_crop_region() {
        let r = crop_region(&[(3, 40, 5), (8, 45, 6)], [50, 50, 10], (100, 100, 20)).unwrap();
        assert_eq!(r.lo(), (0, 0, 0));
        assert_eq!(r.hi(), (59, 96, 17));
        assert_eq!(r.shape(), (59, 96, 17));
        assert!(!r.is_empty());

        assert!(crop_region(&[], [1, 1, 1], (4, 4, 4)).is_none());

        // 越界点集会得到空区域.
        let r = crop_region(&[(9, 0, 0)], [1, 1, 1], (4, 4, 4)).unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn test_probability() {
        assert_eq!(probability([2.0, 3.0, 4.0], (2, 3, 4), [3.0, 3.0, 2.0]), 1.0);
        let p = probability([5.0, 0.0, 0.0], (2, 0, 0), [3.0, 3.0, 2.0]);
        assert!((p - (-0.5f32).exp()).abs() < 1e-6);
        // z 方向的容忍度更小.
        assert!(
            probability([0.0, 0.0, 3.0], (0, 0, 0), [3.0, 3.0, 2.0])
                < probability([3.0, 0.0, 0.0], (0, 0, 0), [3.0, 3.0, 2.0])
        );
    }

    #[test]
    fn test_two_separate_blobs() {
        let shape = (100, 100, 20);
        let (c1, c2) = ((25, 25, 10), (75, 70, 10));
        let (emb, fg) = blobs(shape, &[c1, c2], 5);
        let baker = Baker::new(emb.view(), fg.view(), BakeParams::default()).unwrap();

        let map = components(&[(1, vec![c1]), (2, vec![c2])]);
        let (labels, summary) = baker.bake(&map, false).unwrap();
        assert_eq!(summary, BakeSummary { accepted: 2, rejected: 0 });

        // 每个实例恰好覆盖其所在的球.
        for (p, &l) in labels.indexed_iter() {
            let expected = if !fg[p] {
                0
            } else if p.0 < 50 {
                1
            } else {
                2
            };
            assert_eq!(l, expected, "at {p:?}");
        }
        let count = |id| labels.iter().filter(|&&l| l == id).count();
        assert_eq!(count(1), count(2));
        assert!(count(1) >= BakeParams::default().min_volume);
    }

    #[test]
    fn test_small_instance_is_dropped() {
        let shape = (20, 20, 10);
        let (emb, fg) = blobs(shape, &[(10, 10, 5)], 0);
        assert_eq!(fg.iter().filter(|&&f| f).count(), 1);

        let baker = Baker::new(emb.view(), fg.view(), BakeParams::default()).unwrap();
        let map = components(&[(1, vec![(10, 10, 5)])]);
        let c = baker.candidate(1, &map[&1]).unwrap();
        assert_eq!(c.volume(), 1);

        let (labels, summary) = baker.bake(&map, false).unwrap();
        assert_eq!(summary, BakeSummary { accepted: 0, rejected: 1 });
        assert!(labels.iter().all(|&l| l == 0));
    }

    /// 一条前景线段 x = 8..=16, 两个骨架点 x = 10 与 x = 14, 嵌入为自身坐标.
    fn overlapping() -> (Array4<f32>, Array3<bool>, SkeletonMap) {
        let shape = (24, 20, 10);
        let fg = Array3::from_shape_fn(shape, |(x, y, z)| (8..=16).contains(&x) && y == 10 && z == 5);
        let emb = Array4::from_shape_fn((3, shape.0, shape.1, shape.2), |(c, x, y, z)| {
            [x, y, z][c] as f32
        });
        let map = components(&[(1, vec![(10, 10, 5)]), (2, vec![(14, 10, 5)])]);
        (emb, fg, map)
    }

    #[test]
    fn test_overlap_last_writer_wins() {
        let (emb, fg, map) = overlapping();
        let params = BakeParams {
            min_volume: 1,
            ..Default::default()
        };
        let baker = Baker::new(emb.view(), fg.view(), params).unwrap();

        // 两个候选在 x = 11..=13 处重叠.
        let c1 = baker.candidate(1, &map[&1]).unwrap();
        let c2 = baker.candidate(2, &map[&2]).unwrap();
        assert_eq!((c1.volume(), c2.volume()), (6, 6));

        let (labels, summary) = baker.bake(&map, false).unwrap();
        assert_eq!(summary.accepted, 2);
        let row: Vec<u32> = (8..=16).map(|x| labels[[x, 10, 5]]).collect();
        assert_eq!(row, vec![1, 1, 1, 2, 2, 2, 2, 2, 2]);

        let (again, _) = baker.bake(&map, false).unwrap();
        assert_eq!(again, labels);
        let (par, _) = baker.bake(&map, true).unwrap();
        assert_eq!(par, labels);
    }

    #[test]
    fn test_parallel_batches_match_serial() {
        // 一条长前景线段, 每隔一个体素放一个骨架点, 编号数超过一批.
        let n = 2 * PARALLEL_BATCH + 7;
        let shape = (2 * n + 2, 3, 3);
        let fg = Array3::from_shape_fn(shape, |(x, y, z)| x > 0 && y == 1 && z == 1);
        let emb = Array4::from_shape_fn((3, shape.0, shape.1, shape.2), |(c, x, y, z)| {
            [x, y, z][c] as f32
        });
        let mut map: SkeletonMap = (1..=n as u32)
            .map(|id| (id, vec![(2 * id as usize, 1, 1)]))
            .collect();
        let params = BakeParams {
            min_volume: 1,
            ..Default::default()
        };
        let baker = Baker::new(emb.view(), fg.view(), params).unwrap();

        let (serial, s1) = baker.bake(&map, false).unwrap();
        let (par, s2) = baker.bake(&map, true).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.accepted, n);
        assert_eq!(par, serial);
        // 后写者覆盖先写者: 最后一个编号拥有其右侧所有体素.
        assert_eq!(serial[[2 * n + 1, 1, 1]], n as u32);

        // 第二批中的空骨架使两种模式以同样的错误中止.
        map.insert(PARALLEL_BATCH as u32 + 3, vec![]);
        for parallel in [false, true] {
            assert!(matches!(
                baker.bake(&map, parallel),
                Err(PipelineError::EmptyComponent(id)) if id == PARALLEL_BATCH as u32 + 3
            ));
        }
    }

    #[test]
    fn test_rejected_instance_writes_zeros() {
        let (emb, fg, map) = overlapping();
        let baker = Baker::new(emb.view(), fg.view(), BakeParams::default()).unwrap();

        let mut labels = Array3::from_elem(fg.raw_dim(), 7u32);
        let c = baker.candidate(1, &map[&1]).unwrap();
        let outcome = c.apply(&mut labels.view_mut(), 183);
        assert_eq!(outcome, BakeOutcome::Rejected { id: 1, volume: 6 });
        assert_eq!(labels[[9, 10, 5]], 0);
        assert_eq!(labels[[16, 10, 5]], 7);
        assert_eq!(labels[[0, 0, 0]], 7);
    }

    #[test]
    fn test_background_is_never_assigned() {
        let (emb, fg, map) = overlapping();
        let params = BakeParams {
            min_volume: 1,
            ..Default::default()
        };
        let baker = Baker::new(emb.view(), fg.view(), params).unwrap();
        let (labels, _) = baker.bake(&map, false).unwrap();
        assert!(labels.indexed_iter().all(|(p, &l)| fg[p] || l == 0));
    }

    #[test]
    fn test_empty_component_fails() {
        let (emb, fg, _) = overlapping();
        let baker = Baker::new(emb.view(), fg.view(), BakeParams::default()).unwrap();
        assert!(matches!(
            baker.candidate(4, &[]),
            Err(PipelineError::EmptyComponent(4))
        ));
        let map = components(&[(1, vec![(10, 10, 5)]), (2, vec![])]);
        assert!(matches!(
            baker.bake(&map, false),
            Err(PipelineError::EmptyComponent(2))
        ));
    }

    #[test]
    fn test_out_of_bounds_crop_is_rejected() {
        let (emb, fg, _) = overlapping();
        let baker = Baker::new(emb.view(), fg.view(), BakeParams::default()).unwrap();
        let c = baker.candidate(3, &[(100, 100, 100)]).unwrap();
        assert!(c.region().is_empty());
        let mut labels = Array3::zeros(fg.raw_dim());
        assert!(!c.apply(&mut labels.view_mut(), 1).is_accepted());
    }

    #[test]
    fn test_shape_checks() {
        let emb = Array4::<f32>::zeros((3, 4, 4, 4));
        let fg = Array3::from_elem((4, 4, 5), true);
        assert!(matches!(
            Baker::new(emb.view(), fg.view(), BakeParams::default()),
            Err(PipelineError::ShapeMismatch { what: "embedding", .. })
        ));

        let fg = Array3::from_elem((4, 4, 4), true);
        let baker = Baker::new(emb.view(), fg.view(), BakeParams::default()).unwrap();
        let mut labels = Array3::zeros((4, 4, 3));
        assert!(baker.bake_into(&SkeletonMap::new(), &mut labels, false).is_err());
    }
}
