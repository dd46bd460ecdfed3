use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayView2, ArrayViewMut, Axis, Ix3};

use crate::consts::label::*;
use crate::error::ExtractError;
use crate::Idx3d;

/// 体数据的空间元信息. 三个分量均以 `(x, y, z)` 顺序保存,
/// 即 nifti / MetaImage 的原生顺序, 与体素数组的 `(z, H, W)` 访问顺序相反.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// 单个体素的分辨率, 以毫米为单位.
    pub spacing: [f64; 3],

    /// 第一个体素中心的物理坐标 (LPS).
    pub origin: [f64; 3],

    /// 方向余弦矩阵, 行优先存储. 第 `j` 列是第 `j` 个数组轴在物理空间中的方向.
    pub direction: [f64; 9],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: Self::IDENTITY,
        }
    }
}

impl Geometry {
    /// 单位方向矩阵.
    pub const IDENTITY: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

    /// 以给定分辨率创建, 原点为零, 方向为单位矩阵.
    #[inline]
    pub fn with_spacing(spacing: [f64; 3]) -> Self {
        Self {
            spacing,
            ..Self::default()
        }
    }

    /// 获取方向矩阵的 `(row, col)` 元素.
    #[inline]
    pub fn direction_at(&self, row: usize, col: usize) -> f64 {
        self.direction[row * 3 + col]
    }

    /// 将自身的 origin 和 direction 替换为 `other` 的, 保留自身的 spacing.
    #[inline]
    pub fn adopt_frame(&mut self, other: &Geometry) {
        self.origin = other.origin;
        self.direction = other.direction;
    }
}

/// 3D 体数据和掩膜共用的空间属性与部分通用操作.
pub trait SpatialAttr {
    /// 获取空间元信息.
    fn geometry(&self) -> &Geometry;

    /// 获取数据形状大小, 以 `(z, H, W)` 顺序.
    fn shape(&self) -> Idx3d;

    /// 两者是否位于同一形状的网格上.
    #[inline]
    fn same_shape<T: SpatialAttr>(&self, other: &T) -> bool {
        self.shape() == other.shape()
    }
}

/// 3D 影像体数据, 体素值以 `f32` 保存.
///
/// 加载后不可变; 生命周期覆盖单个受试者的处理过程.
#[derive(Debug, Clone)]
pub struct Volume {
    geometry: Geometry,
    data: Array3<f32>,
}

impl SpatialAttr for Volume {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Volume {
    /// 直接由 `(z, H, W)` 格式的数组和元信息创建.
    #[inline]
    pub fn new(data: Array3<f32>, geometry: Geometry) -> Self {
        Self { geometry, data }
    }

    /// 打开 `path` 处的影像文件, 格式由扩展名决定.
    #[inline]
    pub fn open<P: AsRef<Path>>(path: P) -> crate::io::Result<Self> {
        crate::io::read_volume(path)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// 3D 二值掩膜, 标签值以 `u8` 保存. `1` 为器官前景, `0` 为背景.
///
/// 与配对的 [`Volume`] 位于同一网格上.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    geometry: Geometry,
    data: Array3<u8>,
}

impl SpatialAttr for Mask {
    #[inline]
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for Mask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Mask {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Mask {
    /// 直接由 `(z, H, W)` 格式的数组和元信息创建.
    #[inline]
    pub fn new(data: Array3<u8>, geometry: Geometry) -> Self {
        Self { geometry, data }
    }

    /// 创建与 `like` 同网格、同元信息的全背景掩膜.
    #[inline]
    pub fn empty_like<T: SpatialAttr>(like: &T) -> Self {
        Self {
            geometry: *like.geometry(),
            data: Array3::zeros(like.shape()),
        }
    }

    /// 打开 `path` 处的掩膜文件, 格式由扩展名决定.
    #[inline]
    pub fn open<P: AsRef<Path>>(path: P) -> crate::io::Result<Self> {
        crate::io::read_mask(path)
    }

    /// 获取 z 空间的第 `z_index` 层切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取能按升序迭代水平切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ArrayView2<'_, u8>> {
        self.data.axis_iter(Axis(0))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 获取掩膜中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 掩膜是否不含任何前景体素?
    #[inline]
    pub fn is_background(&self) -> bool {
        !self.data.iter().copied().any(is_foreground)
    }

    /// 复制出一份仅保留 `z_indices` 所列切片的掩膜, 其余切片全部置为背景.
    /// 元信息原样复制.
    ///
    /// 当任一索引越界时 panic.
    pub fn retain_slices(&self, z_indices: &[usize]) -> Self {
        let mut ans = Self::empty_like(self);
        for &z in z_indices {
            ans.data
                .index_axis_mut(Axis(0), z)
                .assign(&self.data.index_axis(Axis(0), z));
        }
        ans
    }

    /// 使掩膜与 `volume` 的几何元信息一致: 形状必须相同,
    /// origin 和 direction 以 `volume` 的为准.
    ///
    /// 形状不一致时无法校正, 返回 [`ExtractError::GeometryMismatch`].
    pub fn reconciled_to(mut self, volume: &Volume) -> Result<Self, ExtractError> {
        if !self.same_shape(volume) {
            return Err(ExtractError::GeometryMismatch {
                volume: volume.shape(),
                mask: self.shape(),
            });
        }
        self.geometry.adopt_frame(volume.geometry());
        Ok(self)
    }
}

/// 单个受试者的影像与掩膜.
///
/// 该结构完全透明, 但只能通过 [`SubjectData::new`] 或 [`SubjectData::open`]
/// 构造, 以保证两者的几何元信息已经校正一致.
#[derive(Debug, Clone)]
pub struct SubjectData {
    /// 3D 影像.
    pub volume: Volume,

    /// 与影像几何一致的 3D 掩膜.
    pub mask: Mask,
}

impl SubjectData {
    /// 组合影像与掩膜, 并校正掩膜几何. 形状不一致时返回 `Err`.
    pub fn new(volume: Volume, mask: Mask) -> Result<Self, ExtractError> {
        let mask = mask.reconciled_to(&volume)?;
        Ok(Self { volume, mask })
    }

    /// 分别打开影像与掩膜文件. 任一文件无法读取时返回 [`ExtractError::Input`].
    pub fn open(
        volume_path: impl AsRef<Path>,
        mask_path: impl AsRef<Path>,
    ) -> Result<Self, ExtractError> {
        let volume = Volume::open(volume_path)?;
        let mask = Mask::open(mask_path)?;
        Self::new(volume, mask)
    }
}
