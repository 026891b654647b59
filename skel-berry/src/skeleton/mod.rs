//! 骨架连通域标记.
//!
//! 骨架体素是稀疏的, 因此标记只在骨架点集上进行泛洪,
//! 不会扫描整个体数据的邻域.
//!
//! 编号从 [`FIRST_INSTANCE_ID`] 开始, 按各连通域中字典序 (x, y, z)
//! 最小体素的先后顺序分配, 因此同样的输入总得到同样的编号.

use std::collections::BTreeMap;

use itertools::iproduct;
use ndarray::{Array3, ArrayView3};

use crate::consts::FIRST_INSTANCE_ID;
use crate::error::{PipelineError, PipelineResult};
use crate::Idx3d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod flood;

/// 骨架编号 -> 该骨架所有体素坐标 (字典序) 的映射.
pub type SkeletonMap = BTreeMap<u32, Vec<Idx3d>>;

/// 体素邻接规则.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Connectivity {
    /// 共面.
    Six,
    /// 共面或共棱.
    Eighteen,
    /// 共面, 共棱或共顶点.
    #[default]
    TwentySix,
}

impl Connectivity {
    /// 邻居与中心的最大曼哈顿距离.
    #[inline]
    const fn max_manhattan(&self) -> isize {
        match self {
            Self::Six => 1,
            Self::Eighteen => 2,
            Self::TwentySix => 3,
        }
    }

    /// 邻居个数.
    #[inline]
    pub const fn neighbor_count(&self) -> usize {
        match self {
            Self::Six => 6,
            Self::Eighteen => 18,
            Self::TwentySix => 26,
        }
    }

    /// 所有邻居相对于中心的偏移.
    pub fn offsets(&self) -> Vec<(isize, isize, isize)> {
        let m = self.max_manhattan();
        iproduct!(-1isize..=1, -1isize..=1, -1isize..=1)
            .filter(|&(a, b, c)| {
                let d = a.abs() + b.abs() + c.abs();
                d != 0 && d <= m
            })
            .collect()
    }
}

/// 标记结果: 编号体数据与编号 -> 坐标映射.
///
/// 两者描述同一个划分: `labels[p] == id` 当且仅当 `p` 属于 `components[id]`.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledSkeleton {
    labels: Array3<u32>,
    components: SkeletonMap,
}

impl LabeledSkeleton {
    /// 编号体数据, 背景为 0.
    #[inline]
    pub fn labels(&self) -> &Array3<u32> {
        &self.labels
    }

    /// 编号 -> 坐标映射.
    #[inline]
    pub fn components(&self) -> &SkeletonMap {
        &self.components
    }

    /// 连通域个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// 是否没有任何骨架.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// 获得编号为 `id` 的骨架坐标.
    #[inline]
    pub fn get(&self, id: u32) -> Option<&[Idx3d]> {
        self.components.get(&id).map(Vec::as_slice)
    }

    /// 直接获得内部数据的所有权.
    #[inline]
    pub fn into_parts(self) -> (Array3<u32>, SkeletonMap) {
        (self.labels, self.components)
    }
}

/// 对稠密骨架掩膜进行连通域标记.
pub fn label_skeleton(mask: ArrayView3<'_, bool>, connectivity: Connectivity) -> LabeledSkeleton {
    // `indexed_iter` 按逻辑顺序遍历, 结果已是字典序.
    let points: Vec<Idx3d> = mask
        .indexed_iter()
        .filter_map(|(p, &m)| m.then_some(p))
        .collect();
    flood::Flood::new(mask.dim(), &points, connectivity).run()
}

/// 对稀疏骨架点集进行连通域标记. 重复点只计一次.
///
/// 若某个点超出 `shape`, 返回 `Err`.
pub fn label_points(
    shape: Idx3d,
    points: &[Idx3d],
    connectivity: Connectivity,
) -> PipelineResult<LabeledSkeleton> {
    let (sx, sy, sz) = shape;
    if let Some(&(x, y, z)) = points.iter().find(|&&(x, y, z)| x >= sx || y >= sy || z >= sz) {
        return Err(PipelineError::shape_mismatch(
            "skeleton point",
            &[sx, sy, sz],
            &[x, y, z],
        ));
    }
    let mut points = points.to_vec();
    points.sort_unstable();
    points.dedup();
    Ok(flood::Flood::new(shape, &points, connectivity).run())
}

/// 下一个可用编号.
#[inline]
fn next_id(count: usize) -> u32 {
    FIRST_INSTANCE_ID + count as u32
}
