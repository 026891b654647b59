//! 稠密体数据的基础操作.
//!
//! 多通道体数据的逻辑形状为 `[C, X, Y, Z]`, 单通道体数据为 `[X, Y, Z]`.
//! 本模块中的 "空间轴" 总是指最后三个轴.

use ndarray::{Array4, ArrayBase, ArrayView, ArrayView4, Data, Dimension, Slice};

use crate::config::ConfigError;
use crate::{Axes, Idx3d};

pub mod io;
pub mod window;

/// 获取体数据最后三个轴 (空间轴) 的形状.
///
/// 如果维数小于 3, 则程序 panic.
#[inline]
pub fn spatial_shape<S: Data, D: Dimension>(volume: &ArrayBase<S, D>) -> Idx3d {
    let shape = volume.shape();
    let n = shape.len();
    assert!(n >= 3, "volume must have at least 3 axes");
    (shape[n - 3], shape[n - 2], shape[n - 1])
}

/// 构造反射下标表: 输出第 `i` 个位置对应输入的哪个位置.
///
/// 反射不重复边缘元素, 即 `[a, b, c]` 填充 2 得到 `[c, b, a, b, c, b, a]`.
/// 调用方保证 `pad < len`.
fn reflect_indices(len: usize, pad: usize) -> Vec<usize> {
    debug_assert!(pad < len);
    let last = len - 1;
    (0..len + 2 * pad)
        .map(|i| {
            if i < pad {
                pad - i
            } else if i - pad > last {
                2 * last - (i - pad)
            } else {
                i - pad
            }
        })
        .collect()
}

/// 对 `volume` 的三个空间轴分别进行宽度为 `pad` 的反射填充.
///
/// 每个轴的填充宽度必须严格小于该轴长度, 否则返回 `Err`.
pub fn reflect_pad(volume: ArrayView4<'_, f32>, pad: Axes<usize>) -> Result<Array4<f32>, ConfigError> {
    let (x, y, z) = spatial_shape(&volume);
    for (axis, len) in [x, y, z].into_iter().enumerate() {
        if len == 0 {
            return Err(ConfigError::EmptyVolume { axis });
        }
        if pad[axis] >= len {
            return Err(ConfigError::PadTooLarge {
                axis,
                pad: pad[axis],
                len,
            });
        }
    }
    let (mx, my, mz) = (
        reflect_indices(x, pad[0]),
        reflect_indices(y, pad[1]),
        reflect_indices(z, pad[2]),
    );
    let c = volume.shape()[0];
    Ok(Array4::from_shape_fn(
        (c, mx.len(), my.len(), mz.len()),
        |(c, i, j, k)| volume[[c, mx[i], my[j], mz[k]]],
    ))
}

/// 去除三个空间轴两侧各 `pad` 宽度的填充, 返回视图.
///
/// 如果某个轴长度小于 `2 * pad`, 则程序 panic.
pub fn unpad<S, D>(volume: &ArrayBase<S, D>, pad: Axes<usize>) -> ArrayView<'_, S::Elem, D>
where
    S: Data,
    D: Dimension,
{
    let ndim = volume.ndim();
    debug_assert!(ndim >= 3);
    let mut view = volume.view();
    view.slice_each_axis_inplace(|ax| {
        let i = ax.axis.index();
        if i + 3 < ndim {
            return Slice::from(..);
        }
        let p = pad[i + 3 - ndim] as isize;
        Slice::from(p..ax.len as isize - p)
    });
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Axis};

    #[test]
    fn test_reflect_indices() {
        assert_eq!(reflect_indices(3, 2), vec![2, 1, 0, 1, 2, 1, 0]);
        assert_eq!(reflect_indices(4, 0), vec![0, 1, 2, 3]);
        assert_eq!(reflect_indices(2, 1), vec![1, 0, 1, 0]);
    }

    #[test]
    fn test_reflect_pad_then_unpad() {
        let v = Array4::from_shape_fn((2, 5, 4, 3), |(c, x, y, z)| {
            (c * 1000 + x * 100 + y * 10 + z) as f32
        });
        let padded = reflect_pad(v.view(), [2, 1, 1]).unwrap();
        assert_eq!(padded.shape(), &[2, 9, 6, 5]);

        // 反射: 填充区第一个元素对应原轴上的第 `pad` 个元素.
        assert_eq!(padded[[1, 0, 1, 1]], v[[1, 2, 0, 0]]);
        assert_eq!(padded[[0, 8, 5, 4]], v[[0, 2, 2, 1]]);

        assert_eq!(unpad(&padded, [2, 1, 1]), v.view());
    }

    #[test]
    fn test_reflect_pad_too_large() {
        let v = Array4::<f32>::zeros((1, 4, 4, 2));
        assert_eq!(
            reflect_pad(v.view(), [1, 1, 2]),
            Err(ConfigError::PadTooLarge {
                axis: 2,
                pad: 2,
                len: 2
            })
        );
    }

    #[test]
    fn test_unpad_single_channel() {
        let v = Array3::from_shape_fn((6, 6, 4), |(x, y, z)| (x + y + z) as u32);
        let u = unpad(&v, [1, 2, 1]);
        assert_eq!(u.shape(), &[4, 2, 2]);
        assert_eq!(u[[0, 0, 0]], v[[1, 2, 1]]);
        assert_eq!(spatial_shape(&v.view().insert_axis(Axis(0))), (6, 6, 4));
    }
}
