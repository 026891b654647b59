//! 运行时错误.

use crate::config::ConfigError;
use crate::volume::io::VolumeIoError;
use std::fmt;

/// 外部推理函数返回的错误. 该 crate 不关心其内部细节, 只保留描述信息.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InferenceError {
    message: String,
}

impl InferenceError {
    /// 以描述信息创建错误.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// 错误描述.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inference failed: {}", self.message)
    }
}

impl std::error::Error for InferenceError {}

/// 流水线运行时错误. 所有变体都是致命的, 出现时整个运行立即中止,
/// 不会留下被当作最终结果的部分输出.
///
/// 非致命情况 (实例体积不足, 不支持的 dtype) 不在此列,
/// 它们在本地被吸收并记录日志.
#[derive(Debug)]
pub enum PipelineError {
    /// 配置参数非法.
    Config(ConfigError),

    /// 中间体数据或裁剪区域的形状与其来源不一致. 这说明分块或裁剪逻辑存在缺陷,
    /// 绝不能被静默截断.
    ShapeMismatch {
        /// 出错的对象.
        what: &'static str,
        /// 期望形状.
        expected: Vec<usize>,
        /// 实际形状.
        found: Vec<usize>,
    },

    /// 某个骨架编号没有任何坐标. 这是上游标记器违反了不变量.
    EmptyComponent(u32),

    /// 外部推理函数失败.
    Inference(InferenceError),

    /// 体数据读写失败.
    Io(VolumeIoError),
}

/// 流水线运行结果.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// 构造 `ShapeMismatch`.
    pub(crate) fn shape_mismatch(what: &'static str, expected: &[usize], found: &[usize]) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// 若 `expected != found`, 返回 `ShapeMismatch`.
    pub(crate) fn check_shape(
        what: &'static str,
        expected: &[usize],
        found: &[usize],
    ) -> PipelineResult<()> {
        if expected == found {
            Ok(())
        } else {
            Err(Self::shape_mismatch(what, expected, found))
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::ShapeMismatch {
                what,
                expected,
                found,
            } => write!(
                f,
                "shape mismatch in {what}: expected {expected:?}, found {found:?}"
            ),
            Self::EmptyComponent(id) => write!(f, "skeleton component {id} has no voxels"),
            Self::Inference(e) => e.fmt(f),
            Self::Io(e) => write!(f, "volume i/o error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Inference(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for PipelineError {
    #[inline]
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<InferenceError> for PipelineError {
    #[inline]
    fn from(e: InferenceError) -> Self {
        Self::Inference(e)
    }
}

impl From<VolumeIoError> for PipelineError {
    #[inline]
    fn from(e: VolumeIoError) -> Self {
        Self::Io(e)
    }
}
