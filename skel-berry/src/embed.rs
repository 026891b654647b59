//! 向量场到嵌入空间的转换, 以及前景掩膜.
//!
//! 网络为每个体素预测一个指向其所属骨架的方向向量 `V`.
//! 嵌入坐标定义为 `E = (x, y, z) + S * V`, 其中 `S` 是各轴的缩放系数.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};

use crate::error::{PipelineError, PipelineResult};
use crate::Axes;

/// 将 `[3, X, Y, Z]` 方向向量场转换为同形状的嵌入坐标.
///
/// 输出第 `c` 个通道在 `(x, y, z)` 处的值为 `[x, y, z][c] + scale[c] * vectors[c, x, y, z]`.
/// 每个输出元素只依赖对应位置的输入, 串行与并行结果逐位相同.
///
/// # 注意
///
/// `parallel` 仅在开启 `rayon` feature 时生效.
pub fn vector_to_embedding(
    vectors: ArrayView4<'_, f32>,
    scale: Axes<f32>,
    parallel: bool,
) -> PipelineResult<Array4<f32>> {
    let shape = vectors.shape();
    if shape[0] != 3 {
        let mut expected = shape.to_vec();
        expected[0] = 3;
        return Err(PipelineError::shape_mismatch("vectors", &expected, shape));
    }

    let mut out = Array4::<f32>::zeros(vectors.raw_dim());
    let zip = Zip::indexed(&mut out).and(&vectors);
    let op = |(c, x, y, z): (usize, usize, usize, usize), e: &mut f32, &v: &f32| {
        *e = [x, y, z][c] as f32 + scale[c] * v;
    };

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            if parallel {
                zip.par_for_each(op);
            } else {
                zip.for_each(op);
            }
        } else {
            let _ = parallel;
            zip.for_each(op);
        }
    }
    Ok(out)
}

/// 将前景之外的向量置零.
///
/// 背景体素上的向量没有意义, 置零后其嵌入坐标就是自身坐标.
pub fn mask_vectors(vectors: &mut Array4<f32>, foreground: ArrayView3<'_, bool>) -> PipelineResult<()> {
    PipelineError::check_shape("foreground", &vectors.shape()[1..], foreground.shape())?;
    for mut ch in vectors.axis_iter_mut(Axis(0)) {
        Zip::from(&mut ch).and(&foreground).for_each(|v, &fg| {
            if !fg {
                *v = 0.0;
            }
        });
    }
    Ok(())
}

/// 概率图阈值化: `prob > threshold`.
pub fn threshold(prob: ArrayView3<'_, f32>, threshold: f32) -> Array3<bool> {
    prob.mapv(|p| p > threshold)
}

/// 骨架种子掩膜: 骨架概率与语义概率同时超过各自门限.
pub fn skeleton_seeds(
    skeleton: ArrayView3<'_, f32>,
    semantic: ArrayView3<'_, f32>,
    skeleton_threshold: f32,
    semantic_threshold: f32,
) -> PipelineResult<Array3<bool>> {
    PipelineError::check_shape("skeleton", semantic.shape(), skeleton.shape())?;
    Ok(Zip::from(&skeleton)
        .and(&semantic)
        .map_collect(|&sk, &se| sk > skeleton_threshold && se > semantic_threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_vectors_give_identity() {
        let v = Array4::<f32>::zeros((3, 4, 3, 2));
        let e = vector_to_embedding(v.view(), [60.0, 60.0, 6.0], false).unwrap();
        for ((c, x, y, z), &p) in e.indexed_iter() {
            assert_eq!(p, [x, y, z][c] as f32);
        }
    }

    #[test]
    fn test_embedding_formula() {
        let v = Array4::from_shape_fn((3, 5, 5, 5), |(c, x, y, z)| {
            ((c + 1) as f32 * 0.1) * if (x + y + z) % 2 == 0 { 1.0 } else { -1.0 }
        });
        let scale = [60.0, 30.0, 6.0];
        let e = vector_to_embedding(v.view(), scale, false).unwrap();
        assert_eq!(e[[0, 2, 1, 1]], 2.0 + 60.0 * 0.1);
        assert_eq!(e[[1, 2, 1, 1]], 1.0 + 30.0 * 0.2);
        assert_eq!(e[[2, 1, 1, 1]], 1.0 - 6.0 * 0.3);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let v = Array4::from_shape_fn((3, 17, 9, 6), |(c, x, y, z)| {
            ((c * 7 + x * 3 + y * 5 + z) % 11) as f32 / 11.0 - 0.5
        });
        let scale = [60.0, 60.0, 6.0];
        let a = vector_to_embedding(v.view(), scale, false).unwrap();
        let b = vector_to_embedding(v.view(), scale, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_channel_count() {
        let v = Array4::<f32>::zeros((2, 4, 4, 4));
        let e = vector_to_embedding(v.view(), [1.0; 3], false).unwrap_err();
        assert!(matches!(e, PipelineError::ShapeMismatch { what: "vectors", .. }));
    }

    #[test]
    fn test_mask_vectors() {
        let mut v = Array4::from_elem((3, 2, 2, 2), 0.5f32);
        let fg = Array3::from_shape_fn((2, 2, 2), |(x, _, _)| x == 1);
        mask_vectors(&mut v, fg.view()).unwrap();
        assert!(v.index_axis(Axis(1), 0).iter().all(|&p| p == 0.0));
        assert!(v.index_axis(Axis(1), 1).iter().all(|&p| p == 0.5));

        let bad = Array3::from_elem((2, 2, 3), true);
        assert!(mask_vectors(&mut v, bad.view()).is_err());
    }

    #[test]
    fn test_skeleton_seeds() {
        let sk = Array3::from_shape_fn((3, 1, 1), |(x, _, _)| [0.9, 0.9, 0.1][x]);
        let se = Array3::from_shape_fn((3, 1, 1), |(x, _, _)| [0.9, 0.2, 0.9][x]);
        let seeds = skeleton_seeds(sk.view(), se.view(), 0.5, 0.5).unwrap();
        assert_eq!(seeds.as_slice().unwrap(), &[true, false, false]);
        assert_eq!(threshold(se.view(), 0.5).as_slice().unwrap(), &[true, false, true]);
    }
}
