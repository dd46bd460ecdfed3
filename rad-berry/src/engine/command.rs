//! 以子进程方式调用的外部特征引擎.
//!
//! 每次调用都会在临时目录中写出:
//!
//! 1. `image.nii`: 当前影像;
//! 2. `mask.nii`: 当前 (分区) 掩膜;
//! 3. `request.json`: `{"binWidth": .., "correctMask": true, "featureClass": ".."}`.
//!
//! 然后执行 `<program> [args..] <image.nii> <mask.nii> <request.json>`,
//! 并把标准输出解析为 `特征名 -> 数值` 的 JSON 对象.
//!
//! # 退出码
//!
//! - `0`: 成功;
//! - `3`: 几何不兼容且无法校正;
//! - `4`: 掩膜没有前景;
//! - 其他: 计算失败, 标准错误的内容作为错误信息.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use serde::Serialize;
use serde_json::Value;

use super::{EngineError, FeatureEngine};
use crate::feature::{EngineValue, FeatureClass, RawFeatures};
use crate::settings::ExtractionSettings;
use crate::{io, Mask, Volume};

/// 退出码: 几何不兼容.
pub const EXIT_GEOMETRY_MISMATCH: i32 = 3;

/// 退出码: 掩膜为空.
pub const EXIT_EMPTY_MASK: i32 = 4;

/// 以该前缀开头的键是引擎的诊断信息, 不是特征.
const DIAGNOSTICS_PREFIX: &str = "diagnostics_";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Request<'a> {
    #[serde(flatten)]
    settings: &'a ExtractionSettings,
    feature_class: FeatureClass,
}

/// 外部命令特征引擎.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    /// 使用可执行文件 `program` 创建引擎.
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// 追加放在输入文件之前的固定参数.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 可执行文件路径.
    #[inline]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn make_scratch(&self) -> std::io::Result<tempfile::TempDir> {
        tempfile::Builder::new().prefix("rad-berry-").tempdir()
    }
}

impl FeatureEngine for CommandEngine {
    fn compute(
        &self,
        volume: &Volume,
        mask: &Mask,
        settings: &ExtractionSettings,
        class: FeatureClass,
    ) -> Result<RawFeatures, EngineError> {
        let scratch = self.make_scratch()?;
        let image_path = scratch.path().join("image.nii");
        let mask_path = scratch.path().join("mask.nii");
        let request_path = scratch.path().join("request.json");

        io::write_volume(volume, &image_path)
            .map_err(|e| EngineError::Computation(e.to_string()))?;
        io::write_mask(mask, &mask_path).map_err(|e| EngineError::Computation(e.to_string()))?;
        let request = Request {
            settings,
            feature_class: class,
        };
        let mut writer = BufWriter::new(File::create(&request_path)?);
        serde_json::to_writer(&mut writer, &request)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        writer.flush()?;

        debug!("running {} for `{class}`", self.program.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&image_path)
            .arg(&mask_path)
            .arg(&request_path)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(match output.status.code() {
                Some(EXIT_GEOMETRY_MISMATCH) => EngineError::GeometryMismatch(stderr),
                Some(EXIT_EMPTY_MASK) => EngineError::EmptyMask,
                Some(code) => EngineError::Computation(format!("exit code {code}: {stderr}")),
                None => EngineError::Computation(format!("terminated by signal: {stderr}")),
            });
        }
        parse_output(&output.stdout)
    }
}

/// 把单个 JSON 值转换为引擎原始值. 非数值的字符串等元信息返回 `None`.
fn to_engine_value(value: Value) -> Option<EngineValue> {
    match value {
        Value::Null => Some(EngineValue::Missing),
        Value::Number(n) => Some(n.as_f64().map_or(EngineValue::Missing, EngineValue::Scalar)),
        Value::Array(items) => Some(
            items
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<_>>>()
                .map_or(EngineValue::Missing, EngineValue::Array),
        ),
        Value::String(s) => s.trim().parse().ok().map(EngineValue::Scalar),
        Value::Bool(_) | Value::Object(_) => None,
    }
}

/// 解析引擎的标准输出. 顺序与输出一致.
///
/// # 注意
///
/// 以下条目视为引擎元信息, 直接丢弃 (以 `debug!` 记录):
/// `diagnostics_*` 键, 布尔值, 对象, 以及不能解析为数值的字符串.
///
/// 以下条目保留为缺失值 (结果中为 `null`): `null`, 含非数值元素的数组.
/// 多元素数值数组原样保留为 [`EngineValue::Array`], 由
/// [`FeatureResult::from_raw`](crate::feature::FeatureResult::from_raw) 记为缺失.
pub(crate) fn parse_output(stdout: &[u8]) -> Result<RawFeatures, EngineError> {
    let map: serde_json::Map<String, Value> =
        serde_json::from_slice(stdout).map_err(|e| EngineError::Protocol(e.to_string()))?;

    Ok(map
        .into_iter()
        .filter(|(name, _)| !name.starts_with(DIAGNOSTICS_PREFIX))
        .filter_map(|(name, value)| match to_engine_value(value) {
            Some(v) => Some((name, v)),
            None => {
                debug!("skipping non-numeric engine entry `{name}`");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_keeps_order_and_missing() {
        let stdout = br#"{
            "diagnostics_Versions_PyRadiomics": "v3.1.0",
            "original_firstorder_Mean": [12.5],
            "original_firstorder_Energy": 1e6,
            "original_firstorder_Kurtosis": null,
            "original_firstorder_Range": "40.0",
            "note": "not a number",
            "diagnostics_Configuration_EnabledImageTypes": {"Original": {}},
            "original_shape_Flag": true,
            "original_glcm_Mixed": [1.0, "x"],
            "original_glcm_Pair": [1.0, 2.0]
        }"#;
        let raw = parse_output(stdout).unwrap();
        let names: Vec<&str> = raw.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "original_firstorder_Mean",
                "original_firstorder_Energy",
                "original_firstorder_Kurtosis",
                "original_firstorder_Range",
                "original_glcm_Mixed",
                "original_glcm_Pair"
            ]
        );
        assert_eq!(raw[0].1, EngineValue::Array(vec![12.5]));
        assert_eq!(raw[1].1, EngineValue::Scalar(1e6));
        assert_eq!(raw[2].1, EngineValue::Missing);
        assert_eq!(raw[3].1, EngineValue::Scalar(40.0));
        assert_eq!(raw[4].1, EngineValue::Missing);
        assert_eq!(raw[5].1, EngineValue::Array(vec![1.0, 2.0]));
    }

    #[test]
    fn test_parse_output_rejects_non_object() {
        assert!(matches!(
            parse_output(b"[1, 2, 3]"),
            Err(EngineError::Protocol(_))
        ));
        assert!(matches!(parse_output(b""), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_request_layout() {
        let settings = ExtractionSettings::from_range(32.0);
        let request = Request {
            settings: &settings,
            feature_class: FeatureClass::Glszm,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"binWidth":0.5,"correctMask":true,"featureClass":"glszm"}"#
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::consts::label::MASK_FOREGROUND;
        use crate::Geometry;
        use ndarray::Array3;

        fn pair() -> (Volume, Mask) {
            let volume = Volume::new(
                Array3::from_shape_fn((2, 3, 3), |(z, h, w)| (z * 9 + h * 3 + w) as f32),
                Geometry::default(),
            );
            let mut mask = Mask::empty_like(&volume);
            mask[(1, 1, 1)] = MASK_FOREGROUND;
            (volume, mask)
        }

        fn sh(script: &str) -> CommandEngine {
            CommandEngine::new("sh").args(["-c", script, "engine"])
        }

        #[test]
        fn test_success_reads_stdout() {
            let engine = sh(r#"test -s "$1" && test -s "$2" && grep -q '"featureClass":"shape"' "$3" && printf '{"original_shape_VoxelVolume": 1.0}'"#);
            let (volume, mask) = pair();
            let settings = ExtractionSettings::from_range(8.0);
            let raw = engine
                .compute(&volume, &mask, &settings, FeatureClass::Shape)
                .unwrap();
            assert_eq!(
                raw,
                vec![(
                    "original_shape_VoxelVolume".to_string(),
                    EngineValue::Scalar(1.0)
                )]
            );
        }

        #[test]
        fn test_exit_codes() {
            let (volume, mask) = pair();
            let settings = ExtractionSettings::from_range(8.0);

            let err = sh("exit 4")
                .compute(&volume, &mask, &settings, FeatureClass::Glcm)
                .unwrap_err();
            assert!(matches!(err, EngineError::EmptyMask));

            let err = sh("echo bad direction >&2; exit 3")
                .compute(&volume, &mask, &settings, FeatureClass::Glcm)
                .unwrap_err();
            assert!(matches!(err, EngineError::GeometryMismatch(ref m) if m == "bad direction"));

            let err = sh("exit 1")
                .compute(&volume, &mask, &settings, FeatureClass::Glcm)
                .unwrap_err();
            assert!(matches!(err, EngineError::Computation(_)));
        }
    }
}
