//! 流水线配置.
//!
//! 所有参数都是普通数值, 向量参数由三个分量组成, 依次对应 x, y, z 轴.

use crate::bake::BakeParams;
use crate::consts::defaults;
use crate::skeleton::Connectivity;
use crate::{Axes, Idx3d};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const AXIS_NAMES: [char; 3] = ['x', 'y', 'z'];

/// 配置参数非法. 这是致命错误, 不会重试.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// 窗口在某个轴上为 0.
    ZeroWindow {
        /// 轴序号.
        axis: usize,
    },

    /// 光晕过大 (`2 * halo >= window`).
    ///
    /// `2 * halo == window` 时相邻窗口的步长 `window - 2 * halo` 为 0,
    /// 分块无法前进, 因此该边界情况同样被拒绝.
    HaloTooLarge {
        /// 轴序号.
        axis: usize,
        /// 光晕宽度.
        halo: usize,
        /// 窗口大小.
        window: usize,
    },

    /// 体数据在某个轴上长度为 0.
    EmptyVolume {
        /// 轴序号.
        axis: usize,
    },

    /// 反射填充宽度必须严格小于轴长.
    PadTooLarge {
        /// 轴序号.
        axis: usize,
        /// 填充宽度.
        pad: usize,
        /// 轴长.
        len: usize,
    },

    /// 向量参数的某个分量不是正的有限数.
    NonPositive {
        /// 参数名.
        name: &'static str,
        /// 轴序号.
        axis: usize,
        /// 非法取值.
        value: f32,
    },

    /// 概率门限不在 `[0, 1)` 内.
    ThresholdOutOfRange {
        /// 参数名.
        name: &'static str,
        /// 非法取值.
        value: f32,
    },

    /// 归一化除数不是正的有限数, 或 dtype 不能出现在查找表中.
    InvalidScale {
        /// 类型名.
        dtype: &'static str,
        /// 非法除数.
        divisor: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ZeroWindow { axis } => write!(f, "window is zero on axis {}", AXIS_NAMES[axis]),
            Self::HaloTooLarge { axis, halo, window } => write!(
                f,
                "halo {halo} is too large for window {window} on axis {}",
                AXIS_NAMES[axis]
            ),
            Self::EmptyVolume { axis } => write!(f, "volume is empty on axis {}", AXIS_NAMES[axis]),
            Self::PadTooLarge { axis, pad, len } => write!(
                f,
                "reflect pad {pad} must be smaller than axis length {len} on axis {}",
                AXIS_NAMES[axis]
            ),
            Self::NonPositive { name, axis, value } => write!(
                f,
                "{name} must be positive and finite, got {value} on axis {}",
                AXIS_NAMES[axis]
            ),
            Self::ThresholdOutOfRange { name, value } => {
                write!(f, "{name} must be within [0, 1), got {value}")
            }
            Self::InvalidScale { dtype, divisor } => {
                write!(f, "invalid scale divisor {divisor} for dtype {dtype}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// 流水线配置.
///
/// 该结构完全透明, 用户可以直接修改各字段, 但在使用前必须通过
/// [`Self::validate`] (构造 [`crate::Pipeline`] 时会自动调用).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// 单次推理窗口大小.
    pub window: Axes<usize>,

    /// 窗口每侧被丢弃的光晕宽度. 必须满足 `2 * halo < window`.
    pub halo: Axes<usize>,

    /// 分块前反射填充的宽度, 拼接后会去除. 全 0 表示不填充.
    pub pad: Axes<usize>,

    /// 方向向量缩放系数 `S`, 嵌入为 `(x, y, z) + S * V`.
    pub vector_scale: Axes<f32>,

    /// 最近骨架点查询时各轴的距离权重, 用于补偿非立方体素.
    pub anisotropy: Axes<f32>,

    /// 嵌入与骨架点之间各轴可接受的离散程度.
    pub spread: Axes<f32>,

    /// 语义前景概率门限.
    pub semantic_threshold: f32,

    /// 骨架概率门限.
    pub skeleton_threshold: f32,

    /// 实例概率门限.
    pub instance_threshold: f32,

    /// 最小实例体积 (体素个数).
    pub min_instance_volume: usize,

    /// 骨架包围盒向外扩展的裁剪边距.
    pub crop_margin: Axes<usize>,

    /// 骨架连通规则.
    pub connectivity: Connectivity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: defaults::WINDOW,
            halo: defaults::HALO,
            pad: defaults::PAD,
            vector_scale: defaults::VECTOR_SCALE,
            anisotropy: defaults::ANISOTROPY,
            spread: defaults::SPREAD,
            semantic_threshold: defaults::SEMANTIC_THRESHOLD,
            skeleton_threshold: defaults::SKELETON_THRESHOLD,
            instance_threshold: defaults::INSTANCE_THRESHOLD,
            min_instance_volume: defaults::MIN_INSTANCE_VOLUME,
            crop_margin: defaults::CROP_MARGIN,
            connectivity: Connectivity::default(),
        }
    }
}

impl PipelineConfig {
    /// 检查与体数据形状无关的所有参数.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window(self.window, self.halo)?;
        check_positive("vector_scale", self.vector_scale)?;
        check_positive("anisotropy", self.anisotropy)?;
        check_positive("spread", self.spread)?;
        check_threshold("semantic_threshold", self.semantic_threshold)?;
        check_threshold("skeleton_threshold", self.skeleton_threshold)?;
        check_threshold("instance_threshold", self.instance_threshold)?;
        Ok(())
    }

    /// 检查反射填充宽度是否适用于空间形状 `shape`.
    pub fn check_pad(&self, (x, y, z): Idx3d) -> Result<(), ConfigError> {
        for (axis, (&pad, len)) in self.pad.iter().zip([x, y, z]).enumerate() {
            if len == 0 {
                return Err(ConfigError::EmptyVolume { axis });
            }
            if pad >= len {
                return Err(ConfigError::PadTooLarge { axis, pad, len });
            }
        }
        Ok(())
    }

    /// 是否需要反射填充.
    #[inline]
    pub fn is_padded(&self) -> bool {
        self.pad.iter().any(|&p| p != 0)
    }

    /// 提取烘焙阶段所需的参数.
    pub fn bake_params(&self) -> BakeParams {
        BakeParams {
            margin: self.crop_margin,
            anisotropy: self.anisotropy,
            spread: self.spread,
            threshold: self.instance_threshold,
            min_volume: self.min_instance_volume,
        }
    }
}

/// 检查窗口与光晕.
pub(crate) fn check_window(window: Axes<usize>, halo: Axes<usize>) -> Result<(), ConfigError> {
    for axis in 0..3 {
        if window[axis] == 0 {
            return Err(ConfigError::ZeroWindow { axis });
        }
        if 2 * halo[axis] >= window[axis] {
            return Err(ConfigError::HaloTooLarge {
                axis,
                halo: halo[axis],
                window: window[axis],
            });
        }
    }
    Ok(())
}

fn check_positive(name: &'static str, v: Axes<f32>) -> Result<(), ConfigError> {
    match v.iter().position(|p| !(p.is_finite() && *p > 0.0)) {
        Some(axis) => Err(ConfigError::NonPositive {
            name,
            axis,
            value: v[axis],
        }),
        None => Ok(()),
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { name, value })
    }
}
