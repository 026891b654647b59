//! 通用常量.

/// 网络输出的通道布局. 该布局固定不变.
pub mod channel {
    use std::ops::Range;

    /// 方向向量场所在通道, 依次为 x, y, z 分量.
    pub const VECTORS: Range<usize> = 0..3;

    /// 骨架概率所在通道.
    pub const SKELETON: usize = 3;

    /// 语义前景概率所在通道.
    pub const SEMANTIC: usize = 4;

    /// 网络输出通道总数.
    pub const OUT_CHANNELS: usize = 5;
}

/// 标签体中背景的值.
pub const BACKGROUND: u32 = 0;

/// 第一个被分配的实例编号. 后续编号按发现顺序递增, 不会复用.
pub const FIRST_INSTANCE_ID: u32 = 1;

/// [`crate::PipelineConfig`] 的默认取值.
pub mod defaults {
    use crate::Axes;

    /// 单次推理窗口大小.
    pub const WINDOW: Axes<usize> = [500, 500, 32];

    /// 窗口每侧被丢弃的光晕宽度.
    pub const HALO: Axes<usize> = [30, 30, 6];

    /// 反射填充宽度. 全 0 表示不填充.
    pub const PAD: Axes<usize> = [0, 0, 0];

    /// 方向向量到体素位移的缩放系数.
    pub const VECTOR_SCALE: Axes<f32> = [60.0, 60.0, 6.0];

    /// 最近骨架点查询时各轴的距离权重.
    pub const ANISOTROPY: Axes<f32> = [1.0, 1.0, 1.0];

    /// 嵌入与骨架点之间各轴可接受的离散程度 (高斯核 sigma).
    pub const SPREAD: Axes<f32> = [3.0, 3.0, 2.0];

    /// 语义前景概率门限.
    pub const SEMANTIC_THRESHOLD: f32 = 0.5;

    /// 骨架概率门限.
    pub const SKELETON_THRESHOLD: f32 = 0.5;

    /// 实例概率门限.
    pub const INSTANCE_THRESHOLD: f32 = 0.5;

    /// 最小实例体积 (体素个数). 小于该值的实例被当作噪声丢弃.
    pub const MIN_INSTANCE_VOLUME: usize = 183;

    /// 骨架包围盒在各轴上向外扩展的裁剪边距.
    pub const CROP_MARGIN: Axes<usize> = [50, 50, 10];
}
