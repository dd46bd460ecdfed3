#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 按解剖分区 (全腺体, 尖部, 中部, 底部) 从 3D 医学影像中提取
//! radiomics 特征, 并将每组特征持久化为独立的结果文件.
//!
//! 特征本身的计算由外部特征引擎 ([`engine::FeatureEngine`]) 负责,
//! 本 crate 只负责编排: 推导量化参数, 划分分区, 驱动 {分区 × 特征族}
//! 提取矩阵, 以及确定性地落盘.
//!
//! # 注意
//!
//! 1. 体数据按照 `(z, H, W)` 模式访问, 与 nifti / MetaImage 的存储顺序
//!   `[W, H, z]` 相反. 几何元数据 (spacing, origin, direction) 则仍以
//!   `(x, y, z)` 顺序保存.
//! 2. 分区严格按切片索引顺序划分, 与方向元数据无关.
//!
//! # 开发计划
//!
//! ### 影像读写 ✅
//!
//! 支持 `.nii`, `.nii.gz` 和 `.mhd` (含 `.raw` 与 zlib 压缩) 格式,
//! 读写时保留 spacing/origin/direction.
//!
//! 实现位于 `rad-berry/src/io`.
//!
//! ### 量化参数推导 ✅
//!
//! `bin_width = (max - min) / 64`, 只统计当前掩膜下的体素.
//!
//! 实现位于 `rad-berry/src/settings.rs`.
//!
//! ### 尖部/中部/底部划分 ✅
//!
//! 在所有含前景的切片上三等分, 中部吸收余数.
//!
//! 实现位于 `rad-berry/src/region.rs`.
//!
//! ### 提取矩阵 ✅
//!
//! 4 个分区 × 7 个特征族, 共 28 次提取, 彼此失败隔离.
//! 开启 `rayon` feature 后可并行执行.
//!
//! 实现位于 `rad-berry/src/runner.rs`.
//!
//! ### 批处理 ✅
//!
//! 从目录中按命名规则发现受试者, 逐个 (或并行) 处理.
//!
//! 实现位于 `rad-berry/src/batch.rs`.
//!
//! ### 外部命令特征引擎 ✅
//!
//! 通过子进程调用任意 radiomics 实现 (例如 pyradiomics 的包装脚本).
//!
//! 实现位于 `rad-berry/src/engine/command.rs`.

/// 三维索引, 以 `(z, H, W)` 顺序.
pub type Idx3d = (usize, usize, usize);

/// 3D 体数据与掩膜的基础数据结构.
mod data;

pub use data::{Geometry, Mask, SpatialAttr, SubjectData, Volume};

pub mod batch;
pub mod consts;
pub mod engine;
pub mod error;
pub mod feature;
pub mod io;
pub mod prelude;
pub mod region;
pub mod runner;
pub mod settings;
pub mod sink;
