//! 通用常量.

/// 掩膜标签值.
pub mod label {
    /// 掩膜中背景的体素值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 掩膜中器官前景的体素值. 本流水线只使用这一个正标签.
    pub const MASK_FOREGROUND: u8 = 1;

    /// 体素是否是前景?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        matches!(p, MASK_FOREGROUND)
    }

    /// 体素是否非零? 切片是否 "含前景" 以此判断.
    #[inline]
    pub const fn is_nonzero(p: u8) -> bool {
        p != MASK_BACKGROUND
    }
}

/// 每个分区的强度范围被量化成的灰度级个数.
pub const BIN_COUNT: u32 = 64;

/// 提取矩阵大小: 4 个分区 × 7 个特征族.
pub const MATRIX_LEN: usize = 28;

/// 结果文件的扩展名.
pub const ARTIFACT_EXT: &str = "json";

/// 持久化失败后的最多重试次数.
pub const PERSIST_RETRIES: u32 = 1;
