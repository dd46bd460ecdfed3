//! 提取矩阵: 对 `[whole, apex, middle, base] × [firstorder, shape, glcm,
//! glrlm, glszm, ngtdm, gldm]` 共 28 个组合逐一提取特征.
//!
//! 每个组合独立推导参数、调用引擎并落盘; 任一组合失败只记录该组合,
//! 不影响其余组合. 组合总是按上述固定顺序尝试, 报告也按该顺序排列.
//!
//! 唯一的例外是引擎报告几何不兼容: 它对该受试者的所有组合都成立,
//! 因此立即停止整个矩阵, 并以受试者级错误返回.

use std::fmt;
use std::path::Path;

use itertools::iproduct;
use log::{debug, info, warn};

use crate::consts::PERSIST_RETRIES;
use crate::engine::{EngineError, FeatureEngine};
use crate::error::ExtractError;
use crate::feature::{ArtifactKey, FeatureClass, FeatureResult};
use crate::region::{Region, RegionMasks, RegionPartition};
use crate::settings::ExtractionSettings;
use crate::sink::{JsonSink, ResultSink};
use crate::{Mask, SubjectData, Volume};

/// 按固定顺序列出全部 (分区, 特征族) 组合.
pub fn combinations() -> impl Iterator<Item = (Region, FeatureClass)> {
    iproduct!(Region::ALL, FeatureClass::ALL)
}

/// 单个组合的执行结果.
#[derive(Debug)]
pub struct CombinationOutcome {
    /// 分区.
    pub region: Region,

    /// 特征族.
    pub class: FeatureClass,

    /// 成功时结果已落盘.
    pub result: Result<(), ExtractError>,
}

/// 单个受试者的提取报告.
#[derive(Debug)]
pub struct SubjectReport {
    subject: String,
    outcomes: Vec<CombinationOutcome>,
}

impl SubjectReport {
    /// 受试者标识.
    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// 所有组合的结果, 按固定矩阵顺序.
    #[inline]
    pub fn outcomes(&self) -> &[CombinationOutcome] {
        &self.outcomes
    }

    /// 尝试的组合个数.
    #[inline]
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// 成功落盘的组合个数.
    #[inline]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// 失败 (含空分区跳过) 的组合个数.
    #[inline]
    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    /// 因分区为空而跳过的组合个数.
    #[inline]
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.as_ref().is_err_and(ExtractError::is_empty_region))
            .count()
    }

    /// 获取 `(region, class)` 组合的结果.
    pub fn outcome(&self, region: Region, class: FeatureClass) -> Option<&CombinationOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.region == region && o.class == class)
    }
}

impl fmt::Display for SubjectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}`: {} attempted, {} succeeded, {} failed ({} empty-region skips)",
            self.subject,
            self.attempted(),
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }
}

/// 提取矩阵执行器, 持有引擎与结果接收端.
#[derive(Debug, Clone)]
pub struct ExtractionMatrix<E, S> {
    engine: E,
    sink: S,
}

impl<E: FeatureEngine, S: ResultSink> ExtractionMatrix<E, S> {
    /// 创建执行器.
    #[inline]
    pub fn new(engine: E, sink: S) -> Self {
        Self { engine, sink }
    }

    /// 获取结果接收端.
    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 顺序执行全部 28 个组合.
    ///
    /// 引擎报告几何不兼容时不再尝试后续组合, 返回 `Err`.
    pub fn run(&self, subject: &str, data: &SubjectData) -> Result<SubjectReport, ExtractError> {
        let masks = prepare(subject, &data.mask);
        let outcomes = combinations()
            .map(|(region, class)| {
                let mask = masks.get(region).unwrap_or(&data.mask);
                self.outcome(subject, &data.volume, mask, region, class)
            })
            .collect::<Result<_, _>>()?;
        Ok(finish(subject, outcomes))
    }

    /// 执行单个组合并记录日志. 只有受试者级错误才会返回 `Err`.
    fn outcome(
        &self,
        subject: &str,
        volume: &Volume,
        mask: &Mask,
        region: Region,
        class: FeatureClass,
    ) -> Result<CombinationOutcome, ExtractError> {
        let result = match self.extract_one(subject, volume, mask, region, class) {
            Err(e) if e.is_fatal() => return Err(e),
            result => result,
        };
        match &result {
            Ok(()) => debug!("`{subject}_{region}_{class}` written"),
            Err(e) if e.is_empty_region() => {
                warn!("`{subject}_{region}_{class}` skipped: {e}")
            }
            Err(e) => warn!("`{subject}_{region}_{class}` failed: {e}"),
        }
        Ok(CombinationOutcome {
            region,
            class,
            result,
        })
    }

    fn extract_one(
        &self,
        subject: &str,
        volume: &Volume,
        mask: &Mask,
        region: Region,
        class: FeatureClass,
    ) -> Result<(), ExtractError> {
        // 每个组合都对当前掩膜重新推导, 不跨分区复用.
        let settings = ExtractionSettings::derive(volume, mask)
            .map_err(|_| ExtractError::EmptyRegion { region })?;

        let raw = self
            .engine
            .compute(volume, mask, &settings, class)
            .map_err(|source| match source {
                EngineError::EmptyMask => ExtractError::EmptyRegion { region },
                EngineError::GeometryMismatch(reason) => ExtractError::EngineGeometryMismatch {
                    region,
                    class,
                    reason,
                },
                source => ExtractError::EngineComputation {
                    region,
                    class,
                    source,
                },
            })?;

        let result = FeatureResult::from_raw(ArtifactKey::new(subject, region, class), raw);
        self.persist(&result)
    }

    /// 写入结果, 失败时最多重试 [`PERSIST_RETRIES`] 次.
    fn persist(&self, result: &FeatureResult) -> Result<(), ExtractError> {
        let mut retries = 0;
        loop {
            match self.sink.persist(result) {
                Ok(()) => return Ok(()),
                Err(e) if retries < PERSIST_RETRIES => {
                    retries += 1;
                    warn!("retrying `{}` after write error: {e}", result.key());
                }
                Err(source) => {
                    return Err(ExtractError::Persistence {
                        key: result.key().to_string(),
                        source,
                    })
                }
            }
        }
    }
}

/// 划分分区并构造分区掩膜.
fn prepare(subject: &str, mask: &Mask) -> RegionMasks {
    let partition = RegionPartition::of(mask);
    debug!(
        "`{subject}`: {} foreground slices -> apex {:?}, middle {:?}, base {:?}",
        partition.len(),
        partition.apex,
        partition.middle,
        partition.base
    );
    RegionMasks::build(mask, &partition)
}

fn finish(subject: &str, outcomes: Vec<CombinationOutcome>) -> SubjectReport {
    let report = SubjectReport {
        subject: subject.to_string(),
        outcomes,
    };
    info!("{report}");
    report
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl<E, S> ExtractionMatrix<E, S>
where
    E: FeatureEngine + Sync,
    S: ResultSink + Sync,
{
    /// 借助 `rayon`, 并行执行全部 28 个组合. 报告顺序与 [`Self::run`] 相同.
    ///
    /// 引擎报告几何不兼容时尽快停止, 返回 `Err`.
    pub fn par_run(
        &self,
        subject: &str,
        data: &SubjectData,
    ) -> Result<SubjectReport, ExtractError> {
        let masks = prepare(subject, &data.mask);
        let outcomes = combinations()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(region, class)| {
                let mask = masks.get(region).unwrap_or(&data.mask);
                self.outcome(subject, &data.volume, mask, region, class)
            })
            .collect::<Result<_, _>>()?;
        Ok(finish(subject, outcomes))
    }
}

/// 对一个受试者执行完整提取, 结果写入 `out_dir`.
///
/// 影像与掩膜形状不兼容时返回 `Err`, 此时不会尝试任何组合;
/// 引擎报告几何不兼容时同样返回 `Err`, 后续组合不再尝试.
/// 其余错误都记录在返回的报告中.
pub fn extract_subject<E: FeatureEngine>(
    volume: Volume,
    mask: Mask,
    subject: &str,
    out_dir: impl AsRef<Path>,
    engine: E,
) -> Result<SubjectReport, ExtractError> {
    let data = SubjectData::new(volume, mask)?;
    let matrix = ExtractionMatrix::new(engine, JsonSink::new(out_dir.as_ref()));
    matrix.run(subject, &data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::consts::label::MASK_FOREGROUND;
    use crate::consts::MATRIX_LEN;
    use crate::feature::{EngineValue, RawFeatures};
    use crate::{Geometry, SpatialAttr};
    use ndarray::Array3;
    use std::collections::BTreeSet;
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 确定性的假引擎: 输出量化步长与前景体素数. 可在第 `fail_at` 次调用时失败.
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        calls: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl FakeEngine {
        pub(crate) fn failing_at(call: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_at: Some(call),
            }
        }
    }

    impl FeatureEngine for FakeEngine {
        fn compute(
            &self,
            volume: &Volume,
            mask: &Mask,
            settings: &ExtractionSettings,
            class: FeatureClass,
        ) -> Result<RawFeatures, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(call) {
                return Err(EngineError::Computation("injected".into()));
            }
            assert!(volume.same_shape(mask));
            Ok(vec![
                (format!("{class}_BinWidth"), EngineValue::Scalar(settings.bin_width)),
                (
                    format!("{class}_Voxels"),
                    EngineValue::Array(vec![mask.count(MASK_FOREGROUND) as f64]),
                ),
                (format!("{class}_Undefined"), EngineValue::Missing),
            ])
        }
    }

    /// 总是报告几何不兼容的引擎.
    #[derive(Default)]
    pub(crate) struct MismatchEngine {
        pub(crate) calls: AtomicUsize,
    }

    impl FeatureEngine for MismatchEngine {
        fn compute(
            &self,
            _: &Volume,
            _: &Mask,
            _: &ExtractionSettings,
            _: FeatureClass,
        ) -> Result<RawFeatures, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::GeometryMismatch("direction cosines differ".into()))
        }
    }

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<FeatureResult>>);

    impl MemorySink {
        fn value(&self, region: Region, class: FeatureClass, name: &str) -> Option<f64> {
            let stored = self.0.lock().unwrap();
            stored
                .iter()
                .find(|r| r.key().region == region && r.key().class == class)
                .and_then(|r| r.get(name))
        }
    }

    impl ResultSink for MemorySink {
        fn persist(&self, result: &FeatureResult) -> io::Result<()> {
            self.0.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    /// 前 `failures` 次写入失败的接收端.
    struct FlakySink {
        failures: AtomicUsize,
    }

    impl ResultSink for FlakySink {
        fn persist(&self, _: &FeatureResult) -> io::Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            Ok(())
        }
    }

    /// 10 层, 第 `z` 层体素值为 `z * 10`, 前景位于 `fg` 所列切片.
    pub(crate) fn subject(fg: &[usize]) -> SubjectData {
        let volume = Volume::new(
            Array3::from_shape_fn((10, 4, 4), |(z, h, w)| (z * 10 + h + w) as f32),
            Geometry::with_spacing([0.5, 0.5, 3.0]),
        );
        let mut mask = Mask::empty_like(&volume);
        for &z in fg {
            mask.data_mut()
                .index_axis_mut(ndarray::Axis(0), z)
                .fill(MASK_FOREGROUND);
        }
        SubjectData::new(volume, mask).unwrap()
    }

    fn file_names(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_full_matrix_written() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = ExtractionMatrix::new(FakeEngine::default(), JsonSink::new(dir.path()));
        let report = matrix.run("Case00", &subject(&[1, 2, 3, 4, 5, 6])).unwrap();

        assert_eq!(report.attempted(), MATRIX_LEN);
        assert_eq!(report.succeeded(), MATRIX_LEN);
        assert_eq!(report.failed(), 0);

        let expected: BTreeSet<String> = combinations()
            .map(|(r, c)| format!("Case00_{r}_{c}.json"))
            .collect();
        assert_eq!(file_names(dir.path()), expected);
        assert!(expected.contains("Case00_whole_firstorder.json"));
        assert!(expected.contains("Case00_base_gldm.json"));
    }

    #[test]
    fn test_fixed_order() {
        let matrix = ExtractionMatrix::new(FakeEngine::default(), MemorySink::default());
        let report = matrix.run("s", &subject(&[0, 1, 2])).unwrap();
        let order: Vec<(Region, FeatureClass)> =
            report.outcomes().iter().map(|o| (o.region, o.class)).collect();
        assert_eq!(order, combinations().collect::<Vec<_>>());
        assert_eq!(order[0], (Region::Whole, FeatureClass::FirstOrder));
        assert_eq!(order[7], (Region::Apex, FeatureClass::FirstOrder));
        assert_eq!(order[27], (Region::Base, FeatureClass::Gldm));
    }

    #[test]
    fn test_injected_engine_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        // 第 10 次调用即 apex × glrlm.
        let matrix = ExtractionMatrix::new(FakeEngine::failing_at(10), JsonSink::new(dir.path()));
        let report = matrix.run("p", &subject(&[0, 1, 2, 3, 4, 5, 6, 7, 8])).unwrap();

        assert_eq!(report.succeeded(), MATRIX_LEN - 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 0);
        let failed = report.outcome(Region::Apex, FeatureClass::Glrlm).unwrap();
        assert!(matches!(
            failed.result,
            Err(ExtractError::EngineComputation {
                region: Region::Apex,
                class: FeatureClass::Glrlm,
                ..
            })
        ));
        let names = file_names(dir.path());
        assert_eq!(names.len(), MATRIX_LEN - 1);
        assert!(!names.contains("p_apex_glrlm.json"));
    }

    #[test]
    fn test_thin_organ_skips_apex_and_base() {
        let matrix = ExtractionMatrix::new(FakeEngine::default(), MemorySink::default());
        let report = matrix.run("thin", &subject(&[4, 5])).unwrap();

        assert_eq!(report.attempted(), MATRIX_LEN);
        assert_eq!(report.succeeded(), 14);
        assert_eq!(report.skipped(), 14);
        for o in report.outcomes() {
            match o.region {
                Region::Apex | Region::Base => assert!(matches!(
                    o.result,
                    Err(ExtractError::EmptyRegion { region }) if region == o.region
                )),
                Region::Whole | Region::Middle => assert!(o.result.is_ok()),
            }
        }
    }

    #[test]
    fn test_all_zero_mask_does_not_abort() {
        let matrix = ExtractionMatrix::new(FakeEngine::default(), MemorySink::default());
        let report = matrix.run("empty", &subject(&[])).unwrap();
        assert_eq!(report.attempted(), MATRIX_LEN);
        assert_eq!(report.skipped(), MATRIX_LEN);
        assert!(matrix.sink().0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_settings_follow_active_region() {
        let matrix = ExtractionMatrix::new(FakeEngine::default(), MemorySink::default());
        matrix.run("s", &subject(&[0, 1, 2, 3, 4, 5])).unwrap();
        let sink = matrix.sink();
        let bw = |r| sink.value(r, FeatureClass::Glcm, "glcm_BinWidth").unwrap();

        // whole: [0, 56], apex: [0, 16], middle: [20, 36], base: [40, 56]
        assert_eq!(bw(Region::Whole), 56.0 / 64.0);
        assert_eq!(bw(Region::Apex), 16.0 / 64.0);
        assert_eq!(bw(Region::Middle), 16.0 / 64.0);
        assert_eq!(bw(Region::Base), 16.0 / 64.0);

        let voxels = sink
            .value(Region::Whole, FeatureClass::Shape, "shape_Voxels")
            .unwrap();
        assert_eq!(voxels, 96.0);
        assert!(sink
            .value(Region::Apex, FeatureClass::Shape, "shape_Undefined")
            .unwrap()
            .is_nan());
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let data = subject(&[2, 3, 4, 5, 6, 7, 8, 9]);
        let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        for dir in [&a, &b] {
            ExtractionMatrix::new(FakeEngine::default(), JsonSink::new(dir.path())).run("x", &data).unwrap();
        }
        let names = file_names(a.path());
        assert_eq!(names, file_names(b.path()));
        for name in &names {
            let left = fs::read(a.path().join(name)).unwrap();
            let right = fs::read(b.path().join(name)).unwrap();
            assert_eq!(left, right, "{name}");
        }

        // 在同一目录重复运行只会覆盖.
        ExtractionMatrix::new(FakeEngine::default(), JsonSink::new(a.path())).run("x", &data).unwrap();
        assert_eq!(file_names(a.path()), names);
    }

    #[test]
    fn test_persistence_retried_once() {
        let data = subject(&[0, 1, 2]);
        let sink = FlakySink {
            failures: AtomicUsize::new(1),
        };
        let report = ExtractionMatrix::new(FakeEngine::default(), &sink).run("r", &data).unwrap();
        assert_eq!(report.succeeded(), MATRIX_LEN);

        let sink = FlakySink {
            failures: AtomicUsize::new(2),
        };
        let report = ExtractionMatrix::new(FakeEngine::default(), &sink).run("r", &data).unwrap();
        assert_eq!(report.succeeded(), MATRIX_LEN - 1);
        let first = &report.outcomes()[0];
        assert!(matches!(
            &first.result,
            Err(ExtractError::Persistence { key, .. }) if key == "r_whole_firstorder"
        ));
    }

    #[test]
    fn test_extract_subject_geometry_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::new(Array3::zeros((3, 4, 4)), Geometry::default());
        let mask = Mask::new(Array3::zeros((4, 4, 4)), Geometry::default());
        let err = extract_subject(volume, mask, "bad", dir.path(), FakeEngine::default())
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ExtractError::GeometryMismatch { .. }));
        assert!(file_names(dir.path()).is_empty());
    }

    #[test]
    fn test_engine_geometry_mismatch_stops_subject() {
        let dir = tempfile::tempdir().unwrap();
        let data = subject(&[1, 2, 3, 4, 5, 6]);
        let engine = MismatchEngine::default();
        let err = extract_subject(data.volume, data.mask, "m", dir.path(), &engine).unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(
            err,
            ExtractError::EngineGeometryMismatch {
                region: Region::Whole,
                class: FeatureClass::FirstOrder,
                ref reason,
            } if reason == "direction cosines differ"
        ));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert!(file_names(dir.path()).is_empty());
    }

    #[test]
    fn test_extract_subject_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let data = subject(&[3, 4, 5, 6]);
        let report = extract_subject(
            data.volume,
            data.mask,
            "Case09",
            dir.path(),
            FakeEngine::default(),
        )
        .unwrap();
        assert_eq!(report.succeeded(), MATRIX_LEN);
        assert_eq!(report.subject(), "Case09");
        assert_eq!(file_names(dir.path()).len(), MATRIX_LEN);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_run_engine_geometry_mismatch() {
        let matrix = ExtractionMatrix::new(MismatchEngine::default(), MemorySink::default());
        let err = matrix.par_run("m", &subject(&[0, 1, 2])).unwrap_err();
        assert!(matches!(err, ExtractError::EngineGeometryMismatch { .. }));
        assert!(matrix.sink().0.lock().unwrap().is_empty());
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_run_matches_run() {
        let data = subject(&[1, 2, 3, 4, 5, 6, 7]);
        let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let seq = ExtractionMatrix::new(FakeEngine::default(), JsonSink::new(a.path())).run("q", &data).unwrap();
        let par =
            ExtractionMatrix::new(FakeEngine::default(), JsonSink::new(b.path())).par_run("q", &data).unwrap();

        let key = |r: &SubjectReport| -> Vec<(Region, FeatureClass, bool)> {
            r.outcomes()
                .iter()
                .map(|o| (o.region, o.class, o.result.is_ok()))
                .collect()
        };
        assert_eq!(key(&seq), key(&par));
        for name in file_names(a.path()) {
            assert_eq!(
                fs::read(a.path().join(&name)).unwrap(),
                fs::read(b.path().join(&name)).unwrap()
            );
        }
    }
}
