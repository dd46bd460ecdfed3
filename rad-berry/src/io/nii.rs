//! nifti (`.nii`, `.nii.gz`) 读写, 以及 header 与 [`Geometry`] 之间的转换.
//!
//! nifti 的仿射变换是 RAS 坐标系, 而 [`Geometry`] 采用 LPS (与 ITK 一致),
//! 因此 x, y 两个分量在转换时取反.

use std::path::Path;

use ndarray::{Array3, ArrayView3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use super::{ImageIoError, Result};
use crate::{Geometry, Idx3d};

/// `NIFTI_XFORM_SCANNER_ANAT`.
const XFORM_SCANNER: i16 = 1;

/// `NIFTI_UNITS_MM`.
const UNITS_MM: u8 = 2;

/// RAS <-> LPS 的符号.
const RAS_TO_LPS: [f64; 3] = [-1.0, -1.0, 1.0];

/// 将 (W, H, z) 转换成 (z, H, W).
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    let [_, w, h, z, ..] = h.dim;
    (z.max(1) as usize, h.max(1) as usize, w.max(1) as usize)
}

/// 由 header 的 pixdim 获取 `(x, y, z)` 分辨率. 非法值按 1 mm 处理.
#[inline]
fn spacing_from_header(h: &NiftiHeader) -> [f64; 3] {
    let [_, x, y, z, ..] = h.pixdim;
    [x, y, z].map(|v| match v.abs() as f64 {
        s if s > 0.0 && s.is_finite() => s,
        _ => 1.0,
    })
}

/// 由四元数 `(b, c, d)` 计算旋转矩阵 (RAS, 行优先).
fn quatern_to_rotation(b: f64, c: f64, d: f64) -> [f64; 9] {
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    [
        a * a + b * b - c * c - d * d,
        2.0 * (b * c - a * d),
        2.0 * (b * d + a * c),
        2.0 * (b * c + a * d),
        a * a + c * c - b * b - d * d,
        2.0 * (c * d - a * b),
        2.0 * (b * d - a * c),
        2.0 * (c * d + a * b),
        a * a + d * d - c * c - b * b,
    ]
}

/// 从 header 解析几何元信息. 优先使用 sform, 其次 qform, 都没有时使用默认方向.
pub(super) fn geometry_from_header(h: &NiftiHeader) -> Geometry {
    let spacing = spacing_from_header(h);
    let (rotation, offset) = if h.sform_code > 0 {
        let rows = [h.srow_x, h.srow_y, h.srow_z];
        let mut rot = [0.0; 9];
        for col in 0..3 {
            let column = rows.map(|r| r[col] as f64);
            let norm = column.iter().map(|v| v * v).sum::<f64>().sqrt();
            for row in 0..3 {
                rot[row * 3 + col] = if norm > 0.0 {
                    column[row] / norm
                } else {
                    Geometry::IDENTITY[row * 3 + col]
                };
            }
        }
        (rot, rows.map(|r| r[3] as f64))
    } else if h.qform_code > 0 {
        let mut rot = quatern_to_rotation(
            h.quatern_b as f64,
            h.quatern_c as f64,
            h.quatern_d as f64,
        );
        // qfac
        if h.pixdim[0] < 0.0 {
            for row in 0..3 {
                rot[row * 3 + 2] = -rot[row * 3 + 2];
            }
        }
        let offset = [h.quatern_x, h.quatern_y, h.quatern_z].map(|v| v as f64);
        (rot, offset)
    } else {
        return Geometry::with_spacing(spacing);
    };

    let mut direction = rotation;
    for row in 0..3 {
        for col in 0..3 {
            direction[row * 3 + col] *= RAS_TO_LPS[row];
        }
    }
    let mut origin = offset;
    for (o, s) in origin.iter_mut().zip(RAS_TO_LPS) {
        *o *= s;
    }
    Geometry {
        spacing,
        origin,
        direction,
    }
}

/// 用几何元信息生成写出时使用的参考 header. 只写 sform.
pub(super) fn header_from_geometry(g: &Geometry) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    header.pixdim[0] = 1.0;
    for (dst, src) in header.pixdim[1..4].iter_mut().zip(g.spacing) {
        *dst = src as f32;
    }
    header.xyzt_units = UNITS_MM;
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header.qform_code = 0;
    header.sform_code = XFORM_SCANNER;

    let mut rows = [[0f32; 4]; 3];
    for (row, r) in rows.iter_mut().enumerate() {
        for col in 0..3 {
            r[col] = (RAS_TO_LPS[row] * g.direction_at(row, col) * g.spacing[col]) as f32;
        }
        r[3] = (RAS_TO_LPS[row] * g.origin[row]) as f32;
    }
    [header.srow_x, header.srow_y, header.srow_z] = rows;
    header
}

macro_rules! impl_nifti_io {
    ($($read: ident, $write: ident, $t: ty);+ $(;)?) => {
        $(
            /// 读取 nifti 文件, 返回 `(z, H, W)` 格式的数组和几何元信息.
            pub(super) fn $read(path: &Path) -> Result<(Array3<$t>, Geometry)> {
                let obj = ReaderOptions::new().read_file(path)?;
                let header = obj.header().clone();
                let ndim = header.dim[0].clamp(1, 7) as usize;
                let data = obj.into_volume().into_ndarray::<$t>()?;

                // nifti 按 [W, H, z] 的 Fortran 顺序存储, 原始缓冲区即
                // (z, H, W) 的行优先布局.
                debug_assert!(data.t().is_standard_layout());

                let shape = get_shape_from_header(&header);
                let (z, h, w) = shape;
                let raw = data.into_raw_vec();
                if raw.len() != z * h * w {
                    return Err(ImageIoError::NotVolumetric(ndim));
                }
                let data = Array3::from_shape_vec(shape, raw)
                    .map_err(|_| ImageIoError::NotVolumetric(ndim))?;
                Ok((data, geometry_from_header(&header)))
            }

            /// 写出 nifti 文件, 扩展名为 `.nii.gz` 时压缩.
            pub(super) fn $write(data: ArrayView3<'_, $t>, geometry: &Geometry, path: &Path) -> Result<()> {
                let header = header_from_geometry(geometry);
                // (z, H, W) -> [W, H, z]
                let data = data.permuted_axes([2, 1, 0]);
                WriterOptions::new(path)
                    .reference_header(&header)
                    .write_nifti(&data)?;
                Ok(())
            }
        )+
    };
}

impl_nifti_io!(
    read_f32, write_f32, f32;
    read_u8, write_u8, u8;
);

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64]) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_default_header_geometry() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0, 0.6, 0.6, 3.0, 0.0, 0.0, 0.0, 0.0];
        h.qform_code = 0;
        h.sform_code = 0;
        let g = geometry_from_header(&h);
        assert_close(&g.spacing, &[0.6, 0.6, 3.0]);
        assert_eq!(g.direction, Geometry::IDENTITY);
        assert_eq!(g.origin, [0.0; 3]);
    }

    #[test]
    fn test_identity_qform_flips_to_lps() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        h.sform_code = 0;
        h.qform_code = 1;
        (h.quatern_b, h.quatern_c, h.quatern_d) = (0.0, 0.0, 0.0);
        (h.quatern_x, h.quatern_y, h.quatern_z) = (10.0, 20.0, 30.0);
        let g = geometry_from_header(&h);
        assert_close(&g.direction, &[-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_close(&g.origin, &[-10.0, -20.0, 30.0]);
    }

    #[test]
    fn test_sform_from_geometry_is_read_back() {
        let g = Geometry {
            spacing: [0.5, 0.75, 3.6],
            origin: [-120.5, 88.25, -14.0],
            direction: [0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        };
        let h = header_from_geometry(&g);
        assert_eq!(h.sform_code, XFORM_SCANNER);
        let back = geometry_from_header(&h);
        assert_close(&back.spacing, &g.spacing);
        assert_close(&back.origin, &g.origin);
        assert_close(&back.direction, &g.direction);
    }
}
