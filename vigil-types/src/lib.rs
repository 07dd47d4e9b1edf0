/*! Data types shared between the vigil validation engine and the layers
 *  that drive it.
 *
 *  Everything in this crate is plain data: descriptors the dispatch layer
 *  decodes out of intercepted calls, the enabled-feature configuration the
 *  session-setup collaborator resolves, and the enum tags the engine
 *  validates. No validation logic lives here.
 */

#![warn(trivial_casts, trivial_numeric_casts, unused_qualifications)]

use std::ops::Range;

/// An API version, in `major.minor` form.
///
/// Patch releases never change legality rules, so they are not represented.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const V1_0: Self = Self { major: 1, minor: 0 };
    pub const V1_1: Self = Self { major: 1, minor: 1 };
    pub const V1_2: Self = Self { major: 1, minor: 2 };
}

bitflags::bitflags! {
    /// Optional extensions and features a device may be created with.
    ///
    /// Each bit corresponds to one extension of the driver API. The set of
    /// enabled bits, together with the [`Version`], decides which enum
    /// values and which binding rules are in force for a session.
    #[repr(transparent)]
    #[derive(Default)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Features: u64 {
        /// Multi-planar formats and per-plane (disjoint) memory binding.
        const SAMPLER_YCBCR_CONVERSION = 1 << 0;
        /// Allocations created for exactly one resource, with stricter
        /// offset/size binding rules.
        const DEDICATED_ALLOCATION = 1 << 1;
        /// Relaxes the dedicated-allocation rule: a structurally identical
        /// resource no larger than the dedicated one may bind instead.
        const DEDICATED_IMAGE_ALIASING = 1 << 2;
        /// Depth-only and read-only depth layout tags.
        const SEPARATE_DEPTH_STENCIL_LAYOUTS = 1 << 3;
        /// The attachment-feedback-loop layout tag.
        const ATTACHMENT_FEEDBACK_LOOP = 1 << 4;
        /// The fragment-shading-rate attachment layout tag.
        const SHADING_RATE_IMAGE = 1 << 5;
        /// Presentation engine integration, including the present layout tag.
        const SWAPCHAIN = 1 << 6;
    }
}

/// The resolved extension/version configuration of one session.
///
/// Built by the session-setup collaborator while processing device
/// creation; immutable once the session starts accepting calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledFeatureSet {
    version: Version,
    features: Features,
}

impl EnabledFeatureSet {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            features: Features::empty(),
        }
    }

    /// Enable `features`. Only valid before the session is constructed.
    pub fn enable(&mut self, features: Features) {
        self.features |= features;
    }

    pub fn is_enabled(&self, features: Features) -> bool {
        self.features.contains(features)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn features(&self) -> Features {
        self.features
    }
}

bitflags::bitflags! {
    /// The addressable aspects of an image.
    ///
    /// `PLANE_0..=PLANE_2` address the memory planes of multi-planar
    /// formats; single-planar color images only ever use `COLOR`.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ImageAspects: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
        const PLANE_0 = 1 << 3;
        const PLANE_1 = 1 << 4;
        const PLANE_2 = 1 << 5;
    }
}

impl ImageAspects {
    /// The aspect bit addressing memory plane `index`.
    pub fn plane(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::PLANE_0),
            1 => Some(Self::PLANE_1),
            2 => Some(Self::PLANE_2),
            _ => None,
        }
    }

    /// The memory plane index this single aspect bit addresses, if any.
    pub fn plane_index(self) -> Option<u32> {
        match self {
            Self::PLANE_0 => Some(0),
            Self::PLANE_1 => Some(1),
            Self::PLANE_2 => Some(2),
            _ => None,
        }
    }
}

/// Texel formats the engine knows how to size.
///
/// The multi-planar entries are only legal when
/// [`Features::SAMPLER_YCBCR_CONVERSION`] is enabled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Format {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    R32Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
    /// Two-plane 4:2:0 luma/chroma format.
    G8B8R82Plane420,
    /// Three-plane 4:2:0 luma/chroma format.
    G8B8R83Plane420,
}

impl Format {
    /// Number of memory planes the format occupies.
    pub fn plane_count(self) -> u32 {
        match self {
            Self::G8B8R82Plane420 => 2,
            Self::G8B8R83Plane420 => 3,
            _ => 1,
        }
    }

    /// The aspects an image of this format exposes.
    pub fn aspects(self) -> ImageAspects {
        match self {
            Self::Depth32Float => ImageAspects::DEPTH,
            Self::Depth24PlusStencil8 => ImageAspects::DEPTH | ImageAspects::STENCIL,
            Self::G8B8R82Plane420 => ImageAspects::PLANE_0 | ImageAspects::PLANE_1,
            Self::G8B8R83Plane420 => {
                ImageAspects::PLANE_0 | ImageAspects::PLANE_1 | ImageAspects::PLANE_2
            }
            _ => ImageAspects::COLOR,
        }
    }

    /// Bytes per texel within the given memory plane.
    pub fn plane_texel_bytes(self, plane: u32) -> u64 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float => 4,
            Self::Rgba32Float => 16,
            Self::Depth32Float => 4,
            Self::Depth24PlusStencil8 => 4,
            // Luma plane is one byte per texel, chroma planes hold either an
            // interleaved pair or a single byte.
            Self::G8B8R82Plane420 => {
                if plane == 0 {
                    1
                } else {
                    2
                }
            }
            Self::G8B8R83Plane420 => 1,
        }
    }

    /// Horizontal/vertical subsampling divisors of the given memory plane.
    pub fn plane_subsampling(self, plane: u32) -> (u32, u32) {
        match self {
            Self::G8B8R82Plane420 | Self::G8B8R83Plane420 if plane > 0 => (2, 2),
            _ => (1, 1),
        }
    }
}

/// The layout tags an image subresource moves through.
///
/// `Undefined` and `Preinitialized` are initial states only; the extension
/// tags at the end are legal only under the corresponding feature bit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageLayout {
    Undefined,
    Preinitialized,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    DepthAttachment,
    DepthReadOnly,
    AttachmentFeedbackLoop,
    FragmentShadingRateAttachment,
    PresentSrc,
}

impl ImageLayout {
    /// True for the two creation-time initial layouts.
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Undefined | Self::Preinitialized)
    }
}

bitflags::bitflags! {
    /// Allowed usages declared at buffer creation.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Allowed usages declared at image creation.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ImageUsages: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Behavioral flags declared at image creation.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ImageCreateFlags: u32 {
        /// Each memory plane is bound to memory independently.
        const DISJOINT = 1 << 0;
        const SPARSE_BINDING = 1 << 1;
        const CUBE_COMPATIBLE = 1 << 2;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Default for Extent3d {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
        }
    }
}

impl Extent3d {
    /// Length of the full mip chain for this extent; the largest legal
    /// `mip_level_count` of an image.
    pub fn max_mip_levels(self) -> u32 {
        let largest = self.width.max(self.height).max(self.depth).max(1);
        32 - largest.leading_zeros()
    }
}

/// Creation parameters of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsages,
}

/// Creation parameters of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub extent: Extent3d,
    pub format: Format,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub usage: ImageUsages,
    pub flags: ImageCreateFlags,
    /// Must be `Undefined` or `Preinitialized`.
    pub initial_layout: ImageLayout,
}

/// Creation parameters of a memory allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub size: u64,
    pub memory_type_index: u32,
}

/// A mip range × layer range × aspect set addressing part of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSubresourceRange {
    pub aspects: ImageAspects,
    pub mip_levels: Range<u32>,
    pub array_layers: Range<u32>,
}
