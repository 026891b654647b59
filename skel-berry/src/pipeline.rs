//! 单个体数据的完整处理流程.
//!
//! 阶段依次为 `Init -> Tiling -> Stitching -> Embedding -> Labeling -> Baking -> Done`,
//! 只会前进, 不会回退. 任何阶段出错都会使整个运行中止, 不会返回部分结果.

use std::fmt;
use std::path::Path;

use log::{debug, info};
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis, CowArray, Ix4};
use ndarray_npy::read_npy;

use crate::bake::Baker;
use crate::config::{ConfigError, PipelineConfig};
use crate::consts::channel;
use crate::embed::{mask_vectors, skeleton_seeds, threshold, vector_to_embedding};
use crate::error::{InferenceError, PipelineError, PipelineResult};
use crate::skeleton::label_skeleton;
use crate::volume::io::{save_volume, VolumeIoError};
use crate::volume::window::Cropper;
use crate::volume::{reflect_pad, spatial_shape, unpad};
use crate::Idx3d;

/// 计算后端能力.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// 只能串行.
    #[default]
    Serial,
    /// 可以并行. 仅在开启 `rayon` feature 时生效.
    Parallel,
}

impl Backend {
    #[inline]
    fn is_parallel(&self) -> bool {
        *self == Self::Parallel
    }
}

/// 外部推理函数.
///
/// 输入为一个形状为 `[C_in, w, h, d]` 的分块, 输出形状必须为
/// `[OUT_CHANNELS, w, h, d]`, 通道布局见 [`crate::consts::channel`].
/// 分块总是被依次提交, 前一个分块的结果写回之后才会提交下一个.
pub trait Inference {
    /// 对一个分块进行推理.
    fn infer(&mut self, tile: ArrayView4<'_, f32>) -> Result<Array4<f32>, InferenceError>;

    /// 后端能力. 默认为串行.
    fn backend(&self) -> Backend {
        Backend::Serial
    }
}

/// 流水线阶段.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// 尚未开始.
    Init,
    /// 分块推理.
    Tiling,
    /// 去填充并拆分通道.
    Stitching,
    /// 方向向量 -> 嵌入.
    Embedding,
    /// 骨架连通域标记.
    Labeling,
    /// 逐实例烘焙.
    Baking,
    /// 完成.
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 单次运行的阶段状态.
struct Run {
    stage: Stage,
}

impl Run {
    fn new() -> Self {
        Self { stage: Stage::Init }
    }

    fn enter(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "cannot go from {} to {}", self.stage, next);
        info!("Stage {} -> {}", self.stage, next);
        self.stage = next;
    }
}

/// 拼接后的网络输出, 空间形状一致.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkOutput {
    semantic: Array3<f32>,
    skeleton: Array3<f32>,
    vectors: Array4<f32>,
}

impl NetworkOutput {
    /// 由三部分构造. 空间形状不一致或 `vectors` 不是 3 通道时返回 `Err`.
    pub fn new(semantic: Array3<f32>, skeleton: Array3<f32>, vectors: Array4<f32>) -> PipelineResult<Self> {
        PipelineError::check_shape("skeleton", semantic.shape(), skeleton.shape())?;
        let mut expected = vec![3];
        expected.extend_from_slice(semantic.shape());
        PipelineError::check_shape("vectors", &expected, vectors.shape())?;
        Ok(Self {
            semantic,
            skeleton,
            vectors,
        })
    }

    /// 指定空间形状的全零输出.
    pub fn zeros((x, y, z): Idx3d) -> Self {
        Self {
            semantic: Array3::zeros((x, y, z)),
            skeleton: Array3::zeros((x, y, z)),
            vectors: Array4::zeros((3, x, y, z)),
        }
    }

    /// 从 `[OUT_CHANNELS, X, Y, Z]` 的拼接结果中拆分各通道.
    pub fn from_stitched(stitched: ArrayView4<'_, f32>) -> PipelineResult<Self> {
        let (x, y, z) = spatial_shape(&stitched);
        PipelineError::check_shape(
            "stitched output",
            &[channel::OUT_CHANNELS, x, y, z],
            stitched.shape(),
        )?;
        Ok(Self {
            semantic: stitched.index_axis(Axis(0), channel::SEMANTIC).to_owned(),
            skeleton: stitched.index_axis(Axis(0), channel::SKELETON).to_owned(),
            vectors: stitched
                .slice_axis(Axis(0), channel::VECTORS.into())
                .to_owned(),
        })
    }

    /// 从目录 `dir` 中读取 `semantic.npy`, `skeleton.npy` 与 `vectors.npy`.
    ///
    /// 这些文件保存的是原始 `float32` 网络输出, 不做归一化.
    pub fn open<P: AsRef<Path>>(dir: P) -> PipelineResult<Self> {
        let dir = dir.as_ref();
        let read3 = |name: &str| -> Result<Array3<f32>, VolumeIoError> {
            Ok(read_npy(dir.join(name))?)
        };
        let semantic = read3("semantic.npy")?;
        let skeleton = read3("skeleton.npy")?;
        let vectors: Array4<f32> = read_npy(dir.join("vectors.npy")).map_err(VolumeIoError::from)?;
        Self::new(semantic, skeleton, vectors)
    }

    /// 将三部分分别写入目录 `dir`, 文件名与 [`Self::open`] 一致.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> PipelineResult<()> {
        let dir = dir.as_ref();
        save_volume(dir.join("semantic.npy"), &self.semantic)?;
        save_volume(dir.join("skeleton.npy"), &self.skeleton)?;
        save_volume(dir.join("vectors.npy"), &self.vectors)?;
        Ok(())
    }

    /// 空间形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.semantic.dim()
    }

    /// 语义前景概率.
    #[inline]
    pub fn semantic(&self) -> ArrayView3<'_, f32> {
        self.semantic.view()
    }

    /// 骨架概率.
    #[inline]
    pub fn skeleton(&self) -> ArrayView3<'_, f32> {
        self.skeleton.view()
    }

    /// 方向向量场, 形状为 `[3, X, Y, Z]`.
    #[inline]
    pub fn vectors(&self) -> ArrayView4<'_, f32> {
        self.vectors.view()
    }
}

/// 单次运行的统计.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// 推理的分块数.
    pub tiles: usize,
    /// 发现的骨架连通域数.
    pub components: usize,
    /// 被接受的实例数.
    pub accepted: usize,
    /// 因体积不足被丢弃的实例数.
    pub rejected: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tiles, {} skeleton components, {} instances accepted, {} rejected",
            self.tiles, self.components, self.accepted, self.rejected
        )
    }
}

/// 运行结果: 实例标签体与统计.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconstruction {
    /// 实例标签体, 形状为 `[X, Y, Z]`, 0 为背景.
    pub labels: Array3<u32>,
    /// 统计.
    pub report: RunReport,
}

/// 流水线. 持有已验证的配置, 本身不持有任何体数据.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// 以 `config` 创建流水线. 配置非法时返回 `Err`.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 对 `[C_in, X, Y, Z]` 图像运行完整流程.
    pub fn run<I: Inference>(&self, image: ArrayView4<'_, f32>, net: &mut I) -> PipelineResult<Reconstruction> {
        let mut run = Run::new();
        let (output, tiles) = self.tile_and_stitch(image, net, &mut run)?;
        self.post_network(output, net.backend(), tiles, &mut run)
    }

    /// 只运行分块推理与拼接, 返回拼接后的网络输出.
    pub fn stitch<I: Inference>(&self, image: ArrayView4<'_, f32>, net: &mut I) -> PipelineResult<NetworkOutput> {
        let mut run = Run::new();
        self.tile_and_stitch(image, net, &mut run).map(|(out, _)| out)
    }

    /// 从已拼接的网络输出开始运行剩余阶段.
    pub fn reconstruct(&self, output: NetworkOutput, backend: Backend) -> PipelineResult<Reconstruction> {
        let mut run = Run::new();
        self.post_network(output, backend, 0, &mut run)
    }

    fn tile_and_stitch<I: Inference>(
        &self,
        image: ArrayView4<'_, f32>,
        net: &mut I,
        run: &mut Run,
    ) -> PipelineResult<(NetworkOutput, usize)> {
        let cfg = &self.config;
        run.enter(Stage::Tiling);
        let image: CowArray<'_, f32, Ix4> = if cfg.is_padded() {
            cfg.check_pad(spatial_shape(&image))?;
            reflect_pad(image, cfg.pad)?.into()
        } else {
            image.into()
        };

        let shape = spatial_shape(&image);
        let cropper = Cropper::new(shape, cfg.window, cfg.halo)?;
        info!("Volume {:?}, {} tiles", shape, cropper.len());

        let mut stitched = Array4::<f32>::zeros((channel::OUT_CHANNELS, shape.0, shape.1, shape.2));
        let mut dst = stitched.view_mut();
        for (i, (tile, window)) in cropper.tiles(image.view()).enumerate() {
            debug!("Tile {}/{} at {:?}", i + 1, cropper.len(), window.origin());
            let out = net.infer(tile)?;
            window.scatter(out.view(), &mut dst)?;
        }

        run.enter(Stage::Stitching);
        let stitched = unpad(&stitched, cfg.pad);
        Ok((NetworkOutput::from_stitched(stitched)?, cropper.len()))
    }

    fn post_network(
        &self,
        output: NetworkOutput,
        backend: Backend,
        tiles: usize,
        run: &mut Run,
    ) -> PipelineResult<Reconstruction> {
        let cfg = &self.config;
        let parallel = backend.is_parallel();
        let NetworkOutput {
            semantic,
            skeleton,
            mut vectors,
        } = output;

        run.enter(Stage::Embedding);
        let foreground = threshold(semantic.view(), cfg.semantic_threshold);
        mask_vectors(&mut vectors, foreground.view())?;
        let embedding = vector_to_embedding(vectors.view(), cfg.vector_scale, parallel)?;
        drop(vectors);

        run.enter(Stage::Labeling);
        let seeds = skeleton_seeds(
            skeleton.view(),
            semantic.view(),
            cfg.skeleton_threshold,
            cfg.semantic_threshold,
        )?;
        let (_, components) = label_skeleton(seeds.view(), cfg.connectivity).into_parts();
        info!("{} skeleton components", components.len());

        run.enter(Stage::Baking);
        let baker = Baker::new(embedding.view(), foreground.view(), cfg.bake_params())?;
        let (labels, summary) = baker.bake(&components, parallel)?;

        run.enter(Stage::Done);
        let report = RunReport {
            tiles,
            components: components.len(),
            accepted: summary.accepted,
            rejected: summary.rejected,
        };
        info!("Run finished: {report}");
        Ok(Reconstruction { labels, report })
    }
}
