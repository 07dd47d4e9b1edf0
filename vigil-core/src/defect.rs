//! Structured violation records.
//!
//! A [`Defect`] names one detected rule violation with a stable code, a
//! severity, and the handles it is about. Codes are part of the layer's
//! compatibility surface: tests and tooling key off them, so a code never
//! changes once shipped. Rendering defects into human-readable text is a
//! collaborator concern.

use crate::id::RawId;
use smallvec::SmallVec;
use std::fmt;
use vt::Features;

/// How bad a defect is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The call violates a hard rule of the specification.
    Error,
    /// The call is legal but defeats an optimization the specification
    /// calls out.
    PerformanceWarning,
}

/// A stable identifier naming one rule of the specification.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct DefectCode(pub &'static str);

impl fmt::Debug for DefectCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for DefectCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Every code the engine can emit.
///
/// New codes may be appended; existing strings are frozen.
pub mod codes {
    use super::DefectCode;

    pub const ENUM_VALUE_NOT_LEGAL: DefectCode = DefectCode("enum.value-not-legal");
    pub const USE_AFTER_DESTROY: DefectCode = DefectCode("handle.use-after-destroy");

    pub const DEDICATION_CONFLICT: DefectCode = DefectCode("alloc.dedication-conflict");

    pub const ALREADY_BOUND: DefectCode = DefectCode("bind.already-bound");
    pub const UNALIGNED: DefectCode = DefectCode("bind.unaligned");
    pub const OUT_OF_RANGE: DefectCode = DefectCode("bind.out-of-range");
    pub const DEDICATION_MISMATCH: DefectCode = DefectCode("bind.dedication-mismatch");
    pub const PLANE_NOT_APPLICABLE: DefectCode = DefectCode("bind.plane-not-applicable");
    pub const NOT_RESIDENT: DefectCode = DefectCode("bind.not-resident");

    pub const INVALID_INITIAL_LAYOUT: DefectCode = DefectCode("image.invalid-initial-layout");
    pub const DISJOINT_NOT_APPLICABLE: DefectCode = DefectCode("image.disjoint-not-applicable");
    pub const MISSING_USAGE: DefectCode = DefectCode("image.missing-usage");
    pub const INVALID_SUBRESOURCE: DefectCode = DefectCode("image.invalid-subresource");

    pub const FIRST_USE_INCOMPATIBLE: DefectCode = DefectCode("layout.first-use-incompatible");
    pub const RECORDED_MISMATCH: DefectCode = DefectCode("layout.recorded-mismatch");
    pub const USE_NOT_LEGAL: DefectCode = DefectCode("layout.use-not-legal");
    pub const SUBMIT_MISMATCH: DefectCode = DefectCode("layout.submit-mismatch");
    pub const SUBMIT_DISCARD: DefectCode = DefectCode("layout.submit-discard");

    pub const BEGIN_INVALID_STATE: DefectCode = DefectCode("cb.begin-invalid-state");
    pub const END_NOT_RECORDING: DefectCode = DefectCode("cb.end-not-recording");
    pub const RECORD_NOT_RECORDING: DefectCode = DefectCode("cb.record-not-recording");
    pub const SUBMIT_NOT_EXECUTABLE: DefectCode = DefectCode("cb.submit-not-executable");
}

/// One detected violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    pub code: DefectCode,
    pub severity: Severity,
    /// The handles the defect is about, most specific first.
    pub subjects: SmallVec<[RawId; 2]>,
    /// For [`codes::ENUM_VALUE_NOT_LEGAL`]: the single feature whose
    /// enablement would have made the value legal, when exactly one table
    /// entry contributes it.
    pub missing_feature: Option<Features>,
}

impl Defect {
    pub fn error(code: DefectCode, subjects: impl IntoIterator<Item = RawId>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            subjects: subjects.into_iter().collect(),
            missing_feature: None,
        }
    }

    pub fn performance(code: DefectCode, subjects: impl IntoIterator<Item = RawId>) -> Self {
        Self {
            code,
            severity: Severity::PerformanceWarning,
            subjects: subjects.into_iter().collect(),
            missing_feature: None,
        }
    }

    pub fn with_missing_feature(mut self, feature: Option<Features>) -> Self {
        self.missing_feature = feature;
        self
    }
}
