use crate::{Axes, Idx3d};
use rstar::primitives::GeomWithData;
use rstar::RTree;

type Entry = GeomWithData<[f32; 3], Idx3d>;

/// 单个骨架点集上的最近点索引.
///
/// 点坐标在建树前乘以各轴距离权重, 因此查询得到的是加权欧氏距离下的最近点.
pub struct SkeletonIndex {
    tree: RTree<Entry>,
    anisotropy: Axes<f32>,
}

impl SkeletonIndex {
    /// 以 `points` 建立索引.
    pub fn new(points: &[Idx3d], anisotropy: Axes<f32>) -> Self {
        let entries = points
            .iter()
            .map(|&p| {
                let (x, y, z) = p;
                let q = [x as f32, y as f32, z as f32];
                Entry::new(weigh(q, anisotropy), p)
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
            anisotropy,
        }
    }

    /// 点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 距离嵌入坐标 `e` 最近的骨架点. 索引为空时返回 `None`.
    #[inline]
    pub fn nearest(&self, e: [f32; 3]) -> Option<Idx3d> {
        self.tree
            .nearest_neighbor(&weigh(e, self.anisotropy))
            .map(|g| g.data)
    }
}

#[inline]
fn weigh(p: [f32; 3], w: Axes<f32>) -> [f32; 3] {
    [p[0] * w[0], p[1] * w[1], p[2] * w[2]]
}
