//! Enum value legality under a given version/extension configuration.
//!
//! The legal value set of a validated enum is not fixed at compile time:
//! it is the union of the core values for the API version and the values
//! contributed by every enabled extension. The static
//! [`EnumLegalityTable`]s consumed here are produced by the registry
//! generator; this module only implements the resolution algorithm.

use crate::FastHashSet;
use std::{fmt::Debug, hash::Hash};
use vt::{EnabledFeatureSet, Features};

/// Bounds every validated enum type satisfies.
pub trait LegalValue: Copy + Eq + Ord + Hash + Debug + 'static {}
impl<T: Copy + Eq + Ord + Hash + Debug + 'static> LegalValue for T {}

/// Static legality data for one enum type: the core values in declared
/// order, plus the values each feature contributes when enabled.
#[derive(Debug)]
pub struct EnumLegalityTable<T: 'static> {
    pub core: &'static [T],
    pub extended: &'static [(Features, &'static [T])],
}

/// The legal value set resolved for one (enum type, feature set) pair.
///
/// Core values come first in declared order, then extension-contributed
/// values in ascending order; a value contributed twice appears once.
#[derive(Debug)]
pub struct ResolvedLegalSet<T> {
    values: Vec<T>,
    members: FastHashSet<T>,
}

impl<T: LegalValue> ResolvedLegalSet<T> {
    pub fn contains(&self, value: T) -> bool {
        self.members.contains(&value)
    }

    /// The legal values in their stable diagnostic order.
    pub fn values(&self) -> &[T] {
        &self.values
    }
}

impl<T: LegalValue> EnumLegalityTable<T> {
    /// Compute the legal set under `enabled`. Deterministic for a fixed
    /// feature set.
    pub fn resolve(&self, enabled: &EnabledFeatureSet) -> ResolvedLegalSet<T> {
        let mut values: Vec<T> = self.core.to_vec();
        let mut members: FastHashSet<T> = values.iter().copied().collect();

        let mut contributed: Vec<T> = Vec::new();
        for &(feature, extension_values) in self.extended {
            if !enabled.is_enabled(feature) {
                continue;
            }
            for &value in extension_values {
                if members.insert(value) {
                    contributed.push(value);
                }
            }
        }
        contributed.sort_unstable();
        values.extend(contributed);

        ResolvedLegalSet { values, members }
    }

    /// If exactly one extension's value set contains `value`, name it.
    ///
    /// Used to enrich the "value not legal for current configuration"
    /// defect with the single feature that would legalize the value.
    pub fn sole_enabling_feature(&self, value: T) -> Option<Features> {
        if self.core.contains(&value) {
            return None;
        }
        let mut found = None;
        for &(feature, extension_values) in self.extended {
            if extension_values.contains(&value) {
                match found {
                    None => found = Some(feature),
                    Some(_) => return None,
                }
            }
        }
        found
    }
}

/// Session-lifetime cache of one enum type's resolved legal set.
///
/// The cache can never go stale: it is built from the session's immutable
/// [`EnabledFeatureSet`] at session construction, and a different feature
/// set means a different session with its own resolver.
#[derive(Debug)]
pub struct Resolver<T: 'static> {
    table: &'static EnumLegalityTable<T>,
    resolved: ResolvedLegalSet<T>,
}

impl<T: LegalValue> Resolver<T> {
    pub fn new(table: &'static EnumLegalityTable<T>, enabled: &EnabledFeatureSet) -> Self {
        Self {
            table,
            resolved: table.resolve(enabled),
        }
    }

    /// Membership test on the hot path; does not materialize the set.
    pub fn is_legal(&self, value: T) -> bool {
        self.resolved.contains(value)
    }

    pub fn legal_set(&self) -> &ResolvedLegalSet<T> {
        &self.resolved
    }

    /// See [`EnumLegalityTable::sole_enabling_feature`].
    pub fn sole_enabling_feature(&self, value: T) -> Option<Features> {
        self.table.sole_enabling_feature(value)
    }
}

/// Static legality tables for the validated enum types.
///
/// Produced by the registry generator from the API specification and
/// feature metadata; not hand-edited.
pub mod tables {
    use super::EnumLegalityTable;
    use vt::{Features, Format, ImageLayout};

    pub static IMAGE_LAYOUT: EnumLegalityTable<ImageLayout> = EnumLegalityTable {
        core: &[
            ImageLayout::Undefined,
            ImageLayout::Preinitialized,
            ImageLayout::General,
            ImageLayout::ColorAttachment,
            ImageLayout::DepthStencilAttachment,
            ImageLayout::DepthStencilReadOnly,
            ImageLayout::ShaderReadOnly,
            ImageLayout::TransferSrc,
            ImageLayout::TransferDst,
        ],
        extended: &[
            (
                Features::SEPARATE_DEPTH_STENCIL_LAYOUTS,
                &[ImageLayout::DepthAttachment, ImageLayout::DepthReadOnly],
            ),
            (
                Features::ATTACHMENT_FEEDBACK_LOOP,
                &[ImageLayout::AttachmentFeedbackLoop],
            ),
            (
                Features::SHADING_RATE_IMAGE,
                &[ImageLayout::FragmentShadingRateAttachment],
            ),
            (Features::SWAPCHAIN, &[ImageLayout::PresentSrc]),
        ],
    };

    pub static FORMAT: EnumLegalityTable<Format> = EnumLegalityTable {
        core: &[
            Format::R8Unorm,
            Format::Rg8Unorm,
            Format::Rgba8Unorm,
            Format::Bgra8Unorm,
            Format::R32Float,
            Format::Rgba32Float,
            Format::Depth32Float,
            Format::Depth24PlusStencil8,
        ],
        extended: &[(
            Features::SAMPLER_YCBCR_CONVERSION,
            &[Format::G8B8R82Plane420, Format::G8B8R83Plane420],
        )],
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt::{Format, ImageLayout, Version};

    fn feature_set(features: Features) -> EnabledFeatureSet {
        let mut set = EnabledFeatureSet::new(Version::V1_0);
        set.enable(features);
        set
    }

    #[test]
    fn extension_value_requires_its_feature() {
        let base = Resolver::new(&tables::IMAGE_LAYOUT, &feature_set(Features::empty()));
        assert!(base.is_legal(ImageLayout::General));
        assert!(!base.is_legal(ImageLayout::PresentSrc));

        let with_swapchain =
            Resolver::new(&tables::IMAGE_LAYOUT, &feature_set(Features::SWAPCHAIN));
        assert!(with_swapchain.is_legal(ImageLayout::PresentSrc));
        // A value legal under a different, disabled extension must not leak.
        assert!(!with_swapchain.is_legal(ImageLayout::AttachmentFeedbackLoop));
    }

    #[test]
    fn resolution_is_monotonic() {
        // Every feature subset's legal set is contained in the superset's.
        let subsets = [
            Features::empty(),
            Features::SWAPCHAIN,
            Features::SWAPCHAIN | Features::SHADING_RATE_IMAGE,
            Features::all(),
        ];
        for pair in subsets.windows(2) {
            let smaller = tables::IMAGE_LAYOUT.resolve(&feature_set(pair[0]));
            let larger = tables::IMAGE_LAYOUT.resolve(&feature_set(pair[1]));
            for &value in smaller.values() {
                assert!(larger.contains(value), "{value:?} lost when enabling more");
            }
        }
    }

    #[test]
    fn resolution_contains_no_duplicates() {
        static DOUBLED: EnumLegalityTable<ImageLayout> = EnumLegalityTable {
            core: &[ImageLayout::Undefined, ImageLayout::General],
            extended: &[
                (Features::SWAPCHAIN, &[ImageLayout::PresentSrc]),
                // A second extension may legally re-add the same value.
                (Features::SHADING_RATE_IMAGE, &[ImageLayout::PresentSrc]),
                // An extension re-adding a core value is also deduplicated.
                (Features::SWAPCHAIN, &[ImageLayout::General]),
            ],
        };
        let resolved = DOUBLED.resolve(&feature_set(Features::all()));
        assert_eq!(
            resolved.values(),
            &[
                ImageLayout::Undefined,
                ImageLayout::General,
                ImageLayout::PresentSrc,
            ]
        );
    }

    #[test]
    fn sole_enabling_feature_is_reported_only_when_unique() {
        assert_eq!(
            tables::IMAGE_LAYOUT.sole_enabling_feature(ImageLayout::PresentSrc),
            Some(Features::SWAPCHAIN)
        );
        // Core values never name a feature.
        assert_eq!(
            tables::IMAGE_LAYOUT.sole_enabling_feature(ImageLayout::General),
            None
        );

        static SHARED: EnumLegalityTable<Format> = EnumLegalityTable {
            core: &[],
            extended: &[
                (Features::SWAPCHAIN, &[Format::R8Unorm]),
                (Features::SHADING_RATE_IMAGE, &[Format::R8Unorm]),
            ],
        };
        assert_eq!(SHARED.sole_enabling_feature(Format::R8Unorm), None);
    }

    #[test]
    fn multi_planar_formats_need_ycbcr() {
        let base = Resolver::new(&tables::FORMAT, &feature_set(Features::empty()));
        assert!(base.is_legal(Format::Rgba8Unorm));
        assert!(!base.is_legal(Format::G8B8R83Plane420));
        assert_eq!(
            base.sole_enabling_feature(Format::G8B8R83Plane420),
            Some(Features::SAMPLER_YCBCR_CONVERSION)
        );

        let ycbcr = Resolver::new(
            &tables::FORMAT,
            &feature_set(Features::SAMPLER_YCBCR_CONVERSION),
        );
        assert!(ycbcr.is_legal(Format::G8B8R83Plane420));
    }
}
