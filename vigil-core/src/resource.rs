//! Records for the objects the ledger tracks.
//!
//! A [`Resource`] covers both buffers and images; the difference is
//! carried in its descriptor. Memory requirements are a deterministic
//! function of the creation parameters, computed lazily on first query and
//! cached so every later query reproduces the same answer.

use crate::id::{HandleKind, HandleMarker, MemoryId, ResourceId};
use smallvec::SmallVec;
use vt::{
    BufferDescriptor, Format, ImageAspects, ImageCreateFlags, ImageDescriptor, ImageLayout,
    ImageUsages,
};

/// Offsets handed to `bind` must be multiples of these.
pub const BUFFER_ALIGNMENT: u64 = 256;
pub const IMAGE_ALIGNMENT: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer(BufferDescriptor),
    Image(ImageDescriptor),
}

impl ResourceDesc {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    /// Number of independently bindable memory planes.
    pub fn plane_count(&self) -> u32 {
        match *self {
            Self::Buffer(_) => 1,
            Self::Image(ref desc) => {
                if desc.flags.contains(ImageCreateFlags::DISJOINT) {
                    desc.format.plane_count()
                } else {
                    1
                }
            }
        }
    }

    /// Whether `other` may alias a dedicated allocation made for `self`
    /// under the image-aliasing relaxation: structurally identical, no
    /// larger.
    pub fn structurally_compatible(&self, other: &ResourceDesc) -> bool {
        match (self, other) {
            (&Self::Buffer(ref own), &Self::Buffer(ref candidate)) => {
                candidate.size <= own.size && candidate.usage == own.usage
            }
            (&Self::Image(ref own), &Self::Image(ref candidate)) => {
                own.extent == candidate.extent
                    && own.format == candidate.format
                    && own.mip_level_count == candidate.mip_level_count
                    && own.array_layer_count == candidate.array_layer_count
                    && own.flags == candidate.flags
            }
            _ => false,
        }
    }
}

/// Size and alignment a plane's memory must satisfy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
}

/// The memory backing one plane, set exactly once.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoundMemory {
    pub memory: MemoryId,
    pub offset: u64,
}

/// Binding state of one memory plane.
#[derive(Debug, Default)]
pub struct PlaneBinding {
    pub bound: Option<BoundMemory>,
    /// Binding is terminal: once a bind call has addressed this plane, any
    /// later bind fails with `AlreadyBound`, whether or not the first
    /// attempt succeeded.
    pub attempted: bool,
    /// Filled on first requirements query, then reused verbatim.
    requirements: Option<MemoryRequirements>,
}

/// One buffer or image.
#[derive(Debug)]
pub struct Resource {
    pub desc: ResourceDesc,
    pub planes: SmallVec<[PlaneBinding; 3]>,
    /// The allocation that declared dedication to this resource, if any.
    pub dedicated_to: Option<MemoryId>,
}

impl HandleMarker for Resource {
    const KIND: HandleKind = HandleKind::Resource;
}

impl Resource {
    pub fn new(desc: ResourceDesc) -> Self {
        let planes = (0..desc.plane_count()).map(|_| PlaneBinding::default()).collect();
        Self {
            desc,
            planes,
            dedicated_to: None,
        }
    }

    /// Resolve a caller-specified plane aspect to a plane index.
    ///
    /// Non-disjoint resources (including buffers) take no aspect; disjoint
    /// images take exactly one of their `PLANE_*` aspects.
    pub fn plane_for_aspect(&self, aspect: Option<ImageAspects>) -> Option<usize> {
        if self.planes.len() == 1 {
            match aspect {
                None => Some(0),
                Some(_) => None,
            }
        } else {
            let index = aspect?.plane_index()? as usize;
            (index < self.planes.len()).then_some(index)
        }
    }

    /// The cached requirements of `plane`, computing them on first query.
    pub fn plane_requirements(&mut self, plane: usize) -> MemoryRequirements {
        let Self {
            ref desc,
            ref mut planes,
            ..
        } = *self;
        let plane_count = desc.plane_count();
        *planes[plane]
            .requirements
            .get_or_insert_with(|| compute_requirements(desc, plane as u32, plane_count))
    }

    /// Requirements of the whole resource, for dedicated-allocation sizing.
    pub fn total_requirements(&mut self) -> MemoryRequirements {
        let plane_count = self.planes.len();
        let mut total = MemoryRequirements { size: 0, alignment: 0 };
        for plane in 0..plane_count {
            let req = self.plane_requirements(plane);
            total.size += req.size;
            total.alignment = total.alignment.max(req.alignment);
        }
        total
    }

    pub fn all_planes_bound(&self) -> bool {
        self.planes.iter().all(|plane| plane.bound.is_some())
    }
}

fn compute_requirements(desc: &ResourceDesc, plane: u32, plane_count: u32) -> MemoryRequirements {
    match *desc {
        ResourceDesc::Buffer(ref buffer) => MemoryRequirements {
            size: align_up(buffer.size.max(1), BUFFER_ALIGNMENT),
            alignment: BUFFER_ALIGNMENT,
        },
        ResourceDesc::Image(ref image) => {
            let mut size = 0u64;
            // A non-disjoint multi-planar image folds every format plane
            // into its single memory plane.
            let format_planes: Vec<u32> = if plane_count == 1 {
                (0..image.format.plane_count()).collect()
            } else {
                vec![plane]
            };
            // Mip counts past the extent's real chain are reported at
            // creation; sizing covers the chain that can exist. The
            // products can exceed u64 for representable extents, so the
            // arithmetic saturates rather than wraps.
            let mip_count = image.mip_level_count.min(image.extent.max_mip_levels());
            for format_plane in format_planes {
                let (sub_x, sub_y) = image.format.plane_subsampling(format_plane);
                let texel = image.format.plane_texel_bytes(format_plane);
                for mip in 0..mip_count {
                    let width = (image.extent.width >> mip).max(1).div_ceil(sub_x) as u64;
                    let height = (image.extent.height >> mip).max(1).div_ceil(sub_y) as u64;
                    let depth = (image.extent.depth >> mip).max(1) as u64;
                    let level = width
                        .checked_mul(height)
                        .and_then(|texels| texels.checked_mul(depth))
                        .and_then(|texels| texels.checked_mul(texel))
                        .and_then(|bytes| bytes.checked_mul(image.array_layer_count as u64))
                        .unwrap_or(u64::MAX);
                    size = size.saturating_add(level);
                }
            }
            MemoryRequirements {
                size: align_up(size.max(1), IMAGE_ALIGNMENT),
                alignment: IMAGE_ALIGNMENT,
            }
        }
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment).saturating_mul(alignment)
}

/// One device memory allocation.
#[derive(Debug)]
pub struct MemoryAllocation {
    pub size: u64,
    pub memory_type_index: u32,
    /// Set when the allocation was created dedicated to one resource.
    pub dedicated: Option<DedicatedTo>,
}

/// Dedication link plus the descriptor snapshot the aliasing relaxation
/// compares against.
#[derive(Debug)]
pub struct DedicatedTo {
    pub resource: ResourceId,
    pub desc: ResourceDesc,
    pub required: MemoryRequirements,
    /// A dedicated allocation accepts exactly one binding, ever.
    pub consumed: bool,
}

impl HandleMarker for MemoryAllocation {
    const KIND: HandleKind = HandleKind::Memory;
}

/// The slice of image state the layout tracker needs, snapshotted out of
/// the ledger so recording does not hold the resource lock.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub aspects: ImageAspects,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub initial_layout: ImageLayout,
    pub usage: ImageUsages,
    pub format: Format,
    pub all_planes_bound: bool,
}
