//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{Geometry, Mask, SpatialAttr, SubjectData, Volume};

pub use crate::consts::label::{MASK_BACKGROUND, MASK_FOREGROUND};
pub use crate::consts::{BIN_COUNT, MATRIX_LEN};

pub use crate::batch::{self, NamingScheme, SubjectPaths};
pub use crate::engine::{CommandEngine, FeatureEngine};
pub use crate::error::ExtractError;
pub use crate::feature::{FeatureClass, FeatureResult};
pub use crate::region::{Region, RegionPartition};
pub use crate::runner::{extract_subject, ExtractionMatrix, SubjectReport};
pub use crate::settings::ExtractionSettings;
pub use crate::sink::{JsonSink, ResultSink};
