use super::{next_id, Connectivity, LabeledSkeleton, SkeletonMap};
use crate::Idx3d;
use ndarray::Array3;
use std::collections::{HashMap, VecDeque};

/// 稀疏点集上的泛洪所需维护的数据结构集合.
pub(super) struct Flood<'a> {
    shape: Idx3d,
    points: &'a [Idx3d],
    offsets: Vec<(isize, isize, isize)>,
    /// 坐标 -> 在 `points` 中的下标.
    slot: HashMap<Idx3d, usize>,
    /// 每个点所属的编号, 0 表示尚未访问.
    owner: Vec<u32>,
    queue: VecDeque<usize>,
}

impl<'a> Flood<'a> {
    /// `points` 必须已按字典序排好并去重, 且都在 `shape` 内.
    pub fn new(shape: Idx3d, points: &'a [Idx3d], connectivity: Connectivity) -> Self {
        let slot: HashMap<Idx3d, usize> = points.iter().enumerate().map(|(i, &p)| (p, i)).collect();
        debug_assert_eq!(slot.len(), points.len());
        Self {
            shape,
            points,
            offsets: connectivity.offsets(),
            slot,
            owner: vec![0; points.len()],
            queue: VecDeque::with_capacity(64),
        }
    }

    /// 位于 `p` 邻域内的所有骨架点下标.
    fn neighbors(&self, (x, y, z): Idx3d) -> impl Iterator<Item = usize> + '_ {
        let (sx, sy, sz) = self.shape;
        self.offsets.iter().filter_map(move |&(dx, dy, dz)| {
            let n = (
                x.checked_add_signed(dx).filter(|&v| v < sx)?,
                y.checked_add_signed(dy).filter(|&v| v < sy)?,
                z.checked_add_signed(dz).filter(|&v| v < sz)?,
            );
            self.slot.get(&n).copied()
        })
    }

    /// 从 `seed` 出发 BFS, 将遇到的所有点标记为 `id`, 返回这些点的坐标.
    fn fill(&mut self, seed: usize, id: u32) -> Vec<Idx3d> {
        let mut members = vec![self.points[seed]];
        self.owner[seed] = id;
        self.queue.push_back(seed);

        while let Some(cur) = self.queue.pop_front() {
            let found: Vec<usize> = self
                .neighbors(self.points[cur])
                .filter(|&n| self.owner[n] == 0)
                .collect();
            for n in found {
                if self.owner[n] == 0 {
                    self.owner[n] = id;
                    members.push(self.points[n]);
                    self.queue.push_back(n);
                }
            }
        }
        members.sort_unstable();
        members
    }

    /// 运行标记.
    pub fn run(mut self) -> LabeledSkeleton {
        let mut components = SkeletonMap::new();
        for seed in 0..self.points.len() {
            if self.owner[seed] != 0 {
                continue;
            }
            let id = next_id(components.len());
            let members = self.fill(seed, id);
            components.insert(id, members);
        }

        let mut labels = Array3::<u32>::zeros(self.shape);
        for (&p, &id) in self.points.iter().zip(self.owner.iter()) {
            labels[p] = id;
        }
        LabeledSkeleton { labels, components }
    }
}
