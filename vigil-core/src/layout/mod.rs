//! Per-subresource image layout tracking.
//!
//! Each (image, aspect, mip, layer) subresource runs a small state machine
//! over layout tags. Two copies of the state exist:
//!
//! - the queue-global table in [`LayoutTracker`], advanced only when
//!   command buffers are submitted;
//! - a per-command-buffer [`LayoutOverlay`], advanced while recording and
//!   discarded on reset.
//!
//! The first touch of a subresource within a recording adopts the caller's
//! old-layout claim unchecked; the claim is reconciled against the
//! queue-global state at submission, where a mismatch is a hard error for
//! exact-match layouts and a performance warning for a discarding
//! `Undefined` claim.

use crate::{
    defect::{codes, Defect},
    id::ResourceId,
    lock::{self, Mutex},
    resource::ImageInfo,
    FastHashMap, Index, MAX_MIP_LEVELS,
};
use arrayvec::ArrayVec;
use smallvec::SmallVec;
use vt::{ImageAspects, ImageLayout, ImageSubresourceRange, ImageUsages};

mod range;
pub(crate) use range::RangeList;

/// The kinds of recorded operations that consume an image in a layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UsageKind {
    TransferRead,
    TransferWrite,
    ShaderSampled,
    ColorAttachment,
    DepthStencilAttachment,
    Present,
}

impl UsageKind {
    /// The layouts the operation may legally see its subresources in.
    ///
    /// Static per operation kind; resolved the same way as an enum
    /// legality table, but keyed on the operation rather than on
    /// extensions.
    pub fn legal_layouts(self) -> &'static [ImageLayout] {
        match self {
            Self::TransferRead => &[ImageLayout::General, ImageLayout::TransferSrc],
            Self::TransferWrite => &[ImageLayout::General, ImageLayout::TransferDst],
            Self::ShaderSampled => &[
                ImageLayout::General,
                ImageLayout::ShaderReadOnly,
                ImageLayout::DepthStencilReadOnly,
                ImageLayout::DepthReadOnly,
            ],
            Self::ColorAttachment => &[
                ImageLayout::General,
                ImageLayout::ColorAttachment,
                ImageLayout::AttachmentFeedbackLoop,
            ],
            Self::DepthStencilAttachment => &[
                ImageLayout::General,
                ImageLayout::DepthStencilAttachment,
                ImageLayout::DepthAttachment,
                ImageLayout::AttachmentFeedbackLoop,
            ],
            Self::Present => &[ImageLayout::PresentSrc],
        }
    }

    /// The creation-time usage flag the operation requires.
    pub fn required_usage(self) -> ImageUsages {
        match self {
            Self::TransferRead => ImageUsages::TRANSFER_SRC,
            Self::TransferWrite => ImageUsages::TRANSFER_DST,
            Self::ShaderSampled => ImageUsages::SAMPLED,
            Self::ColorAttachment => ImageUsages::COLOR_ATTACHMENT,
            Self::DepthStencilAttachment => ImageUsages::DEPTH_STENCIL_ATTACHMENT,
            // Presentation has no usage bit of its own.
            Self::Present => ImageUsages::empty(),
        }
    }
}

/// Recording-time state of one subresource run.
#[derive(Debug, Copy, Clone, PartialEq)]
struct Unit {
    /// The old-layout claim adopted at first touch; reconciled against
    /// queue-global state at submission.
    first: ImageLayout,
    /// The predicted layout after the commands recorded so far. `None`
    /// marks a freshly isolated gap that has not been touched yet.
    last: Option<ImageLayout>,
}

type AspectStates<T> = SmallVec<[(ImageAspects, RangeList<T>); 3]>;

#[derive(Debug)]
struct ImageOverlay {
    initial_layout: ImageLayout,
    mips: ArrayVec<AspectStates<Unit>, MAX_MIP_LEVELS>,
}

impl ImageOverlay {
    fn new(info: &ImageInfo) -> Self {
        let mip_count = (info.mip_level_count as usize).min(MAX_MIP_LEVELS);
        let mips = (0..mip_count)
            .map(|_| {
                info.aspects
                    .iter()
                    .map(|aspect| (aspect, RangeList::empty()))
                    .collect()
            })
            .collect();
        Self {
            initial_layout: info.initial_layout,
            mips,
        }
    }
}

/// Clamp `range` to the image's real extent, reporting once if anything
/// was out of bounds.
fn clamp_subresource_range(
    id: ResourceId,
    range: &ImageSubresourceRange,
    info: &ImageInfo,
    defects: &mut Vec<Defect>,
) -> ImageSubresourceRange {
    let aspects = range.aspects & info.aspects;
    let mip_levels = range.mip_levels.start.min(info.mip_level_count)
        ..range.mip_levels.end.min(info.mip_level_count);
    let array_layers = range.array_layers.start.min(info.array_layer_count)
        ..range.array_layers.end.min(info.array_layer_count);
    if aspects != range.aspects
        || mip_levels != range.mip_levels
        || array_layers != range.array_layers
    {
        defects.push(Defect::error(codes::INVALID_SUBRESOURCE, [id.into()]));
    }
    ImageSubresourceRange {
        aspects,
        mip_levels,
        array_layers,
    }
}

/// The per-command-buffer predicted layout state.
///
/// Owned by exactly one recording thread per the API's own threading
/// contract, so it needs no locking; only the merge into the queue-global
/// table does.
#[derive(Debug, Default)]
pub struct LayoutOverlay {
    /// Keyed by the full id, not the table index: an image destroyed
    /// mid-recording may have its index recycled, and the successor's
    /// state must not inherit the predecessor's.
    images: FastHashMap<ResourceId, ImageOverlay>,
    /// First-touch order; fixes the defect and merge order at submission.
    touched: Vec<ResourceId>,
}

impl LayoutOverlay {
    pub(crate) fn clear(&mut self) {
        self.images.clear();
        self.touched.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    fn entry(&mut self, id: ResourceId, info: &ImageInfo) -> &mut ImageOverlay {
        let Self {
            ref mut images,
            ref mut touched,
        } = *self;
        images.entry(id).or_insert_with(|| {
            touched.push(id);
            ImageOverlay::new(info)
        })
    }

    /// Record an explicit old→new transition over `range`.
    pub fn declare(
        &mut self,
        id: ResourceId,
        info: &ImageInfo,
        range: &ImageSubresourceRange,
        old_claim: ImageLayout,
        new_layout: ImageLayout,
        defects: &mut Vec<Defect>,
    ) {
        let range = clamp_subresource_range(id, range, info, defects);
        let overlay = self.entry(id, info);
        let mut mismatch_reported = false;
        let mut first_use_reported = false;

        for mip in range.mip_levels.clone() {
            let Some(aspect_states) = overlay.mips.get_mut(mip as usize) else {
                break;
            };
            for &mut (aspect, ref mut layers) in aspect_states.iter_mut() {
                if !range.aspects.contains(aspect) {
                    continue;
                }
                let default = Unit {
                    first: old_claim,
                    last: None,
                };
                for &mut (_, ref mut unit) in layers.isolate(&range.array_layers, default) {
                    match unit.last {
                        None => {
                            // First touch within this recording: the claim
                            // is adopted, unless it is impossible by
                            // construction.
                            if old_claim == ImageLayout::Preinitialized
                                && overlay.initial_layout != ImageLayout::Preinitialized
                                && !first_use_reported
                            {
                                first_use_reported = true;
                                defects.push(Defect::error(
                                    codes::FIRST_USE_INCOMPATIBLE,
                                    [id.into()],
                                ));
                            }
                        }
                        Some(current) => {
                            if current != old_claim && !mismatch_reported {
                                mismatch_reported = true;
                                defects.push(Defect::error(
                                    codes::RECORDED_MISMATCH,
                                    [id.into()],
                                ));
                            }
                        }
                    }
                    // State advances even through detected misuse.
                    unit.last = Some(new_layout);
                }
                layers.coalesce();
            }
        }
    }

    /// Record a use of `range` in `required` without a transition.
    pub fn require(
        &mut self,
        id: ResourceId,
        info: &ImageInfo,
        range: &ImageSubresourceRange,
        required: ImageLayout,
        usage: UsageKind,
        defects: &mut Vec<Defect>,
    ) {
        let range = clamp_subresource_range(id, range, info, defects);
        if !usage.legal_layouts().contains(&required) {
            defects.push(Defect::error(codes::USE_NOT_LEGAL, [id.into()]));
        }
        let overlay = self.entry(id, info);
        let mut mismatch_reported = false;

        for mip in range.mip_levels.clone() {
            let Some(aspect_states) = overlay.mips.get_mut(mip as usize) else {
                break;
            };
            for &mut (aspect, ref mut layers) in aspect_states.iter_mut() {
                if !range.aspects.contains(aspect) {
                    continue;
                }
                let default = Unit {
                    first: required,
                    last: None,
                };
                for &mut (_, ref mut unit) in layers.isolate(&range.array_layers, default) {
                    match unit.last {
                        None => {
                            // First touch: the use's layout doubles as the
                            // expected initial layout.
                            unit.last = Some(required);
                        }
                        Some(current) => {
                            if current != required && !mismatch_reported {
                                mismatch_reported = true;
                                defects.push(Defect::error(
                                    codes::RECORDED_MISMATCH,
                                    [id.into()],
                                ));
                            }
                            // A use is not a transition; the predicted
                            // layout stays.
                        }
                    }
                }
                layers.coalesce();
            }
        }
    }
}

#[derive(Debug)]
struct ImageLayouts {
    id: ResourceId,
    mips: ArrayVec<AspectStates<ImageLayout>, MAX_MIP_LEVELS>,
}

/// The queue-global layout table of one session.
#[derive(Debug)]
pub struct LayoutTracker {
    images: Mutex<FastHashMap<Index, ImageLayouts>>,
}

impl LayoutTracker {
    pub(crate) fn new() -> Self {
        Self {
            images: Mutex::new(lock::LAYOUT_TABLE, FastHashMap::default()),
        }
    }

    /// Start tracking a freshly created image in its initial layout.
    pub fn register_image(&self, id: ResourceId, info: &ImageInfo) {
        let mip_count = (info.mip_level_count as usize).min(MAX_MIP_LEVELS);
        let mips = (0..mip_count)
            .map(|_| {
                info.aspects
                    .iter()
                    .map(|aspect| {
                        (
                            aspect,
                            RangeList::filled(0..info.array_layer_count, info.initial_layout),
                        )
                    })
                    .collect()
            })
            .collect();
        self.images
            .lock()
            .insert(id.index(), ImageLayouts { id, mips });
    }

    pub fn unregister_image(&self, id: ResourceId) {
        let mut images = self.images.lock();
        if images.get(&id.index()).is_some_and(|entry| entry.id == id) {
            images.remove(&id.index());
        }
    }

    /// The queue-global layout of `range`, if every covered subresource
    /// agrees on one.
    pub fn query(&self, id: ResourceId, range: &ImageSubresourceRange) -> Option<ImageLayout> {
        let images = self.images.lock();
        let entry = images.get(&id.index()).filter(|entry| entry.id == id)?;
        let mut result = None;
        for mip in range.mip_levels.clone() {
            let aspect_states = entry.mips.get(mip as usize)?;
            for &(aspect, ref layers) in aspect_states.iter() {
                if !range.aspects.contains(aspect) {
                    continue;
                }
                match layers.query(&range.array_layers, |layout| *layout) {
                    None => {}
                    Some(Ok(layout)) if result.is_none() || result == Some(layout) => {
                        result = Some(layout);
                    }
                    Some(_) => return None,
                }
            }
        }
        result
    }

    /// Reconcile a command buffer's first-use claims against the global
    /// table, then merge its final predicted layouts, in first-touch
    /// order.
    pub(crate) fn merge_overlay(&self, overlay: &LayoutOverlay, defects: &mut Vec<Defect>) {
        let mut images = self.images.lock();
        for &id in &overlay.touched {
            let Some(recorded) = overlay.images.get(&id) else {
                continue;
            };
            let Some(global) = images
                .get_mut(&id.index())
                .filter(|entry| entry.id == id)
            else {
                // The image died between recording and submission.
                defects.push(Defect::error(codes::USE_AFTER_DESTROY, [id.into()]));
                continue;
            };

            let mut mismatch_reported = false;
            let mut discard_reported = false;
            for (mip_index, aspect_states) in recorded.mips.iter().enumerate() {
                let Some(global_aspects) = global.mips.get_mut(mip_index) else {
                    break;
                };
                for &(aspect, ref layers) in aspect_states.iter() {
                    let Some(&mut (_, ref mut global_layers)) = global_aspects
                        .iter_mut()
                        .find(|&&mut (global_aspect, _)| global_aspect == aspect)
                    else {
                        continue;
                    };
                    for &(ref layer_range, unit) in layers.iter() {
                        let Some(last) = unit.last else { continue };
                        for &mut (_, ref mut layout) in
                            global_layers.isolate(layer_range, unit.first)
                        {
                            if *layout != unit.first {
                                if unit.first == ImageLayout::Undefined {
                                    // Legal, but discards live contents.
                                    if !discard_reported {
                                        discard_reported = true;
                                        log::warn!(
                                            "submission discards contents of image {id:?}: \
                                             recorded with Undefined over {:?}",
                                            *layout,
                                        );
                                        defects.push(Defect::performance(
                                            codes::SUBMIT_DISCARD,
                                            [id.into()],
                                        ));
                                    }
                                } else if !mismatch_reported {
                                    mismatch_reported = true;
                                    defects.push(Defect::error(
                                        codes::SUBMIT_MISMATCH,
                                        [id.into()],
                                    ));
                                }
                            }
                            *layout = last;
                        }
                        global_layers.coalesce();
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn tracked_image_count(&self) -> usize {
        self.images.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TypedId;
    use vt::Format;

    fn test_image_id(index: u32) -> ResourceId {
        ResourceId::zip(index, 1)
    }

    fn color_info(mips: u32, layers: u32) -> ImageInfo {
        ImageInfo {
            aspects: ImageAspects::COLOR,
            mip_level_count: mips,
            array_layer_count: layers,
            initial_layout: ImageLayout::Undefined,
            usage: ImageUsages::all(),
            format: Format::Rgba8Unorm,
            all_planes_bound: true,
        }
    }

    fn full_range(info: &ImageInfo) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: info.aspects,
            mip_levels: 0..info.mip_level_count,
            array_layers: 0..info.array_layer_count,
        }
    }

    #[test]
    fn first_use_claim_is_adopted() {
        let info = color_info(1, 1);
        let id = test_image_id(0);
        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        overlay.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::ShaderReadOnly,
            ImageLayout::TransferDst,
            &mut defects,
        );
        assert!(defects.is_empty());
        // The adopted prediction is now checkable.
        overlay.require(
            id,
            &info,
            &full_range(&info),
            ImageLayout::TransferDst,
            UsageKind::TransferWrite,
            &mut defects,
        );
        assert!(defects.is_empty());
    }

    #[test]
    fn preinitialized_claim_is_impossible_for_undefined_image() {
        let info = color_info(1, 1);
        let id = test_image_id(0);
        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        overlay.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::Preinitialized,
            ImageLayout::General,
            &mut defects,
        );
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].code, codes::FIRST_USE_INCOMPATIBLE);
    }

    #[test]
    fn mid_recording_mismatch_is_a_hard_error() {
        let info = color_info(1, 1);
        let id = test_image_id(0);
        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        overlay.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            &mut defects,
        );
        overlay.require(
            id,
            &info,
            &full_range(&info),
            ImageLayout::General,
            UsageKind::TransferWrite,
            &mut defects,
        );
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].code, codes::RECORDED_MISMATCH);
    }

    #[test]
    fn use_layout_must_be_legal_for_the_operation() {
        let info = color_info(1, 1);
        let id = test_image_id(0);
        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        overlay.require(
            id,
            &info,
            &full_range(&info),
            ImageLayout::ColorAttachment,
            UsageKind::TransferRead,
            &mut defects,
        );
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].code, codes::USE_NOT_LEGAL);
    }

    #[test]
    fn partial_range_declarations_track_per_layer() {
        let info = color_info(1, 8);
        let id = test_image_id(0);
        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        let lower = ImageSubresourceRange {
            aspects: ImageAspects::COLOR,
            mip_levels: 0..1,
            array_layers: 0..4,
        };
        overlay.declare(
            id,
            &info,
            &lower,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            &mut defects,
        );
        // The untouched upper half still accepts any claim; the lower
        // half must match its prediction.
        overlay.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
            &mut defects,
        );
        assert!(defects.is_empty());
    }

    #[test]
    fn submission_reconciles_claims_and_merges_in_order() {
        let info = color_info(1, 1);
        let id = test_image_id(7);
        let tracker = LayoutTracker::new();
        tracker.register_image(id, &info);

        // B1 transitions Undefined -> TransferDst.
        let mut b1 = LayoutOverlay::default();
        let mut defects = Vec::new();
        b1.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            &mut defects,
        );
        // B2 transitions TransferDst -> ShaderReadOnly.
        let mut b2 = LayoutOverlay::default();
        b2.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
            &mut defects,
        );
        assert!(defects.is_empty());

        tracker.merge_overlay(&b1, &mut defects);
        tracker.merge_overlay(&b2, &mut defects);
        assert!(defects.is_empty());
        assert_eq!(
            tracker.query(id, &full_range(&info)),
            Some(ImageLayout::ShaderReadOnly)
        );
    }

    #[test]
    fn submission_mismatch_severities() {
        let info = color_info(1, 1);
        let tracker = LayoutTracker::new();

        // An exact-match claim that disagrees with global state is an
        // error.
        let id = test_image_id(1);
        tracker.register_image(id, &info);
        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        overlay.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::TransferSrc,
            ImageLayout::General,
            &mut defects,
        );
        tracker.merge_overlay(&overlay, &mut defects);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].code, codes::SUBMIT_MISMATCH);
        assert_eq!(defects[0].severity, crate::defect::Severity::Error);

        // A discarding Undefined claim over live contents is only a
        // performance warning.
        let id2 = test_image_id(2);
        tracker.register_image(id2, &info);
        let mut warm = LayoutOverlay::default();
        let mut defects = Vec::new();
        warm.declare(
            id2,
            &info,
            &full_range(&info),
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            &mut defects,
        );
        tracker.merge_overlay(&warm, &mut defects);
        assert!(defects.is_empty(), "fresh image matches Undefined");

        let mut discard = LayoutOverlay::default();
        let mut defects = Vec::new();
        discard.declare(
            id2,
            &info,
            &full_range(&info),
            ImageLayout::Undefined,
            ImageLayout::General,
            &mut defects,
        );
        tracker.merge_overlay(&discard, &mut defects);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].code, codes::SUBMIT_DISCARD);
        assert_eq!(
            defects[0].severity,
            crate::defect::Severity::PerformanceWarning
        );
    }

    #[test]
    fn merging_into_a_destroyed_image_reports_not_crashes() {
        let info = color_info(1, 1);
        let id = test_image_id(3);
        let tracker = LayoutTracker::new();
        tracker.register_image(id, &info);

        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        overlay.declare(
            id,
            &info,
            &full_range(&info),
            ImageLayout::Undefined,
            ImageLayout::General,
            &mut defects,
        );
        tracker.unregister_image(id);
        assert_eq!(tracker.tracked_image_count(), 0);
        tracker.merge_overlay(&overlay, &mut defects);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].code, codes::USE_AFTER_DESTROY);
    }

    #[test]
    fn recycled_index_is_not_conflated_within_one_recording() {
        let info = color_info(1, 1);
        let first = ResourceId::zip(0, 1);
        let second = ResourceId::zip(0, 2);
        let tracker = LayoutTracker::new();
        tracker.register_image(first, &info);

        let mut overlay = LayoutOverlay::default();
        let mut defects = Vec::new();
        overlay.declare(
            first,
            &info,
            &full_range(&info),
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            &mut defects,
        );
        // The first image dies mid-recording and its table index is
        // recycled; the successor's first touch must be accepted.
        tracker.unregister_image(first);
        tracker.register_image(second, &info);
        overlay.declare(
            second,
            &info,
            &full_range(&info),
            ImageLayout::Undefined,
            ImageLayout::General,
            &mut defects,
        );
        assert!(defects.is_empty(), "{defects:?}");

        tracker.merge_overlay(&overlay, &mut defects);
        // Only the destroyed image is reported; the successor's final
        // layout is merged, not dropped.
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].code, codes::USE_AFTER_DESTROY);
        assert_eq!(
            tracker.query(second, &full_range(&info)),
            Some(ImageLayout::General)
        );
    }
}
