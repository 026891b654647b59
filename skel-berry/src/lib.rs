#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供基于 "骨架 + 方向场" 的 3D 显微图像实例分割后处理流程.
//!
//! 神经网络 (外部协作者) 对每个分块输出三类逐体素场: 语义前景概率,
//! 骨架概率, 以及从前景体素指向其所属物体中轴骨架的 3 分量方向向量.
//! 该 crate 负责网络输出之后的所有工作.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 所有空间索引按照 `(x, y, z)` 顺序组织, 多通道体数据的逻辑形状为
//!   `[C, X, Y, Z]`.
//! 2. 可恢复的输入错误通过 `Result` 返回; 内部不变量被破坏时程序会直接 panic
//!   (仅在 debug 模式下检查).
//!
//! # 开发计划
//!
//! ### 分块与拼接 ✅
//!
//! 将任意大的体数据切成带光晕 (halo) 的重叠窗口, 推理后丢弃光晕并拼回原体.
//! 支持反射填充 (reflect padding) 与拼接后去填充.
//!
//! 实现位于 `skel-berry/src/volume/window.rs`.
//!
//! ### 各向异性嵌入 ✅
//!
//! 方向向量 -> 绝对坐标嵌入: `E = (x, y, z) + S * V`.
//!
//! 实现位于 `skel-berry/src/embed.rs`.
//!
//! ### 骨架连通域标记 ✅
//!
//! 只在稀疏的骨架体素集合上做 BFS, 不逐体素扫描稠密体.
//! 默认 26-连通, 种子按字典序选取, 结果可复现.
//!
//! 实现位于 `skel-berry/src/skeleton`.
//!
//! ### 实例烘焙 ✅
//!
//! 对每个骨架实例, 在局部裁剪区域内为前景体素寻找嵌入空间中最近的骨架点
//! (R-tree 空间索引), 按各向异性容差计算概率并阈值化, 过滤小实例,
//! 写回共享标签体 (后写者覆盖).
//!
//! 实现位于 `skel-berry/src/bake`.
//!
//! ### 体数据读写 ✅
//!
//! `.npy` 读写, `.nii` / `.nii.gz` 读取. 按 dtype 查表归一化到 `[0, 1]`.
//!
//! 实现位于 `skel-berry/src/volume/io.rs`.
//!
//! ### 流水线 ✅
//!
//! `Init -> Tiling -> Stitching -> Embedding -> Labeling -> Baking -> Done`.
//!
//! 实现位于 `skel-berry/src/pipeline.rs`.

/// 三维索引 `(x, y, z)`, 同时也可一定程度上用作非负整数向量或形状.
pub type Idx3d = (usize, usize, usize);

/// 三个分量依次对应 x, y, z 轴的参数向量.
pub type Axes<T> = [T; 3];

pub mod bake;
pub mod config;
pub mod consts;
pub mod embed;
mod error;
pub mod pipeline;
pub mod prelude;
pub mod skeleton;
pub mod volume;

pub use config::{ConfigError, PipelineConfig};
pub use error::{InferenceError, PipelineError, PipelineResult};
pub use pipeline::{Backend, Inference, NetworkOutput, Pipeline, Reconstruction, RunReport, Stage};
pub use volume::io::{load_volume, load_volume_declared, save_volume, Dtype, ScaleTable, VolumeIoError};
pub use volume::window::{Cropper, TileWindow};
