//! The resource ledger: the object graph of resources and memory
//! allocations, and the binding invariants between them.
//!
//! All invariants are enforced at the moment of binding, so every check is
//! O(1) per call; no global scan ever runs. The two handle tables sit
//! behind separate short-held mutexes whose ranks fix the acquisition
//! order resources → memories.

use crate::{
    defect::{codes, Defect, DefectCode},
    id::{MemoryId, RawId, ResourceId},
    lock::{self, Mutex},
    resource::{
        BoundMemory, DedicatedTo, ImageInfo, MemoryAllocation, Resource, ResourceDesc,
    },
    storage::{InvalidHandle, StorageReport, Table},
};
use smallvec::SmallVec;
use thiserror::Error;
use vt::{EnabledFeatureSet, Features, ImageAspects, MemoryDescriptor};

/// Why a bind call is illegal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("resource {0:?} is invalid or destroyed")]
    InvalidResource(ResourceId),
    #[error("memory allocation {0:?} is invalid or destroyed")]
    InvalidMemory(MemoryId),
    #[error("plane {plane:?} of resource {resource:?} was already addressed by a bind call")]
    AlreadyBound {
        resource: ResourceId,
        plane: Option<ImageAspects>,
    },
    #[error("offset {offset} is not a multiple of the required alignment {alignment}")]
    Unaligned {
        resource: ResourceId,
        offset: u64,
        alignment: u64,
    },
    #[error(
        "binding needs {required} bytes at offset {offset} but the allocation holds {memory_size}"
    )]
    OutOfRange {
        resource: ResourceId,
        memory: MemoryId,
        offset: u64,
        required: u64,
        memory_size: u64,
    },
    #[error("allocation {memory:?} is dedicated and rejects this resource/offset/plane")]
    DedicationMismatch {
        resource: ResourceId,
        memory: MemoryId,
    },
    #[error("plane aspect {plane:?} does not apply to resource {resource:?}")]
    PlaneNotApplicable {
        resource: ResourceId,
        plane: Option<ImageAspects>,
    },
}

impl BindError {
    pub fn code(&self) -> DefectCode {
        match *self {
            Self::InvalidResource(_) | Self::InvalidMemory(_) => codes::USE_AFTER_DESTROY,
            Self::AlreadyBound { .. } => codes::ALREADY_BOUND,
            Self::Unaligned { .. } => codes::UNALIGNED,
            Self::OutOfRange { .. } => codes::OUT_OF_RANGE,
            Self::DedicationMismatch { .. } => codes::DEDICATION_MISMATCH,
            Self::PlaneNotApplicable { .. } => codes::PLANE_NOT_APPLICABLE,
        }
    }

    pub fn subjects(&self) -> SmallVec<[RawId; 2]> {
        match *self {
            Self::InvalidResource(resource) => smallvec::smallvec![resource.into()],
            Self::InvalidMemory(memory) => smallvec::smallvec![memory.into()],
            Self::AlreadyBound { resource, .. }
            | Self::Unaligned { resource, .. }
            | Self::PlaneNotApplicable { resource, .. } => {
                smallvec::smallvec![resource.into()]
            }
            Self::OutOfRange {
                resource, memory, ..
            }
            | Self::DedicationMismatch { resource, memory } => {
                smallvec::smallvec![resource.into(), memory.into()]
            }
        }
    }

    pub fn to_defect(&self) -> Defect {
        Defect::error(self.code(), self.subjects())
    }
}

/// Why an allocation's dedication declaration is illegal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("dedicated resource {0:?} is invalid or destroyed")]
    InvalidDedicatedResource(ResourceId),
    #[error("resource {0:?} already has a dedicated allocation")]
    AlreadyDedicated(ResourceId),
    #[error("declared size {declared} violates the dedicated required size {required}")]
    DedicationConflict {
        resource: ResourceId,
        declared: u64,
        required: u64,
    },
}

impl AllocationError {
    pub fn to_defect(&self) -> Defect {
        match *self {
            Self::InvalidDedicatedResource(resource) => {
                Defect::error(codes::USE_AFTER_DESTROY, [resource.into()])
            }
            Self::AlreadyDedicated(resource) => {
                Defect::error(codes::DEDICATION_CONFLICT, [resource.into()])
            }
            Self::DedicationConflict { resource, .. } => {
                Defect::error(codes::DEDICATION_CONFLICT, [resource.into()])
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerReport {
    pub resources: StorageReport,
    pub memories: StorageReport,
}

impl LedgerReport {
    pub fn is_empty(&self) -> bool {
        self.resources.num_occupied == 0 && self.memories.num_occupied == 0
    }
}

/// Owner of the resource and memory handle tables.
#[derive(Debug)]
pub struct Ledger {
    resources: Mutex<Table<Resource, ResourceId>>,
    memories: Mutex<Table<MemoryAllocation, MemoryId>>,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self {
            resources: Mutex::new(lock::RESOURCE_TABLE, Table::new("Resource")),
            memories: Mutex::new(lock::MEMORY_TABLE, Table::new("MemoryAllocation")),
        }
    }

    /// Record a new resource. Creation itself never fails validation;
    /// the recorded parameters feed every later check.
    pub fn create_resource(&self, desc: ResourceDesc) -> ResourceId {
        self.resources.lock().insert(Resource::new(desc))
    }

    /// Record a new allocation, optionally dedicated to `dedicated`.
    ///
    /// The allocation is recorded even when the dedication declaration is
    /// found defective, mirroring the driver, except that a dead resource
    /// handle leaves no dedication link behind.
    pub fn allocate_memory(
        &self,
        desc: &MemoryDescriptor,
        dedicated: Option<ResourceId>,
        enabled: &EnabledFeatureSet,
    ) -> (MemoryId, Result<(), AllocationError>) {
        let mut allocation = MemoryAllocation {
            size: desc.size,
            memory_type_index: desc.memory_type_index,
            dedicated: None,
        };
        let mut outcome = Ok(());

        if let Some(resource_id) = dedicated {
            let mut resources = self.resources.lock();
            match resources.get_mut(resource_id) {
                Err(InvalidHandle) => {
                    outcome = Err(AllocationError::InvalidDedicatedResource(resource_id));
                }
                Ok(resource) if resource.dedicated_to.is_some() => {
                    outcome = Err(AllocationError::AlreadyDedicated(resource_id));
                }
                Ok(resource) => {
                    let required = resource.total_requirements();
                    let size_ok = if enabled.is_enabled(Features::DEDICATED_IMAGE_ALIASING) {
                        desc.size >= required.size
                    } else {
                        desc.size == required.size
                    };
                    if !size_ok {
                        outcome = Err(AllocationError::DedicationConflict {
                            resource: resource_id,
                            declared: desc.size,
                            required: required.size,
                        });
                    }
                    // The link is recorded even on a size conflict; the
                    // binding-time rules then apply to it.
                    allocation.dedicated = Some(DedicatedTo {
                        resource: resource_id,
                        desc: resource.desc.clone(),
                        required,
                        consumed: false,
                    });
                    let id = {
                        let mut memories = self.memories.lock();
                        let id = memories.insert(allocation);
                        resource.dedicated_to = Some(id);
                        id
                    };
                    return (id, outcome);
                }
            }
        }

        (self.memories.lock().insert(allocation), outcome)
    }

    /// Bind one plane of `resource` to `memory` at `offset`.
    ///
    /// Success is terminal: the plane can never be rebound. A failed
    /// attempt also consumes the plane (see `PlaneBinding::attempted`).
    pub fn bind_memory(
        &self,
        resource_id: ResourceId,
        plane_aspect: Option<ImageAspects>,
        memory_id: MemoryId,
        offset: u64,
        enabled: &EnabledFeatureSet,
    ) -> Result<(), BindError> {
        let mut resources = self.resources.lock();
        let resource = resources
            .get_mut(resource_id)
            .map_err(|InvalidHandle| BindError::InvalidResource(resource_id))?;

        let plane = resource
            .plane_for_aspect(plane_aspect)
            .ok_or(BindError::PlaneNotApplicable {
                resource: resource_id,
                plane: plane_aspect,
            })?;

        if resource.planes[plane].attempted {
            return Err(BindError::AlreadyBound {
                resource: resource_id,
                plane: plane_aspect,
            });
        }
        resource.planes[plane].attempted = true;

        let required = resource.plane_requirements(plane);

        let mut memories = self.memories.lock();
        let allocation = memories
            .get_mut(memory_id)
            .map_err(|InvalidHandle| BindError::InvalidMemory(memory_id))?;

        if offset % required.alignment != 0 {
            return Err(BindError::Unaligned {
                resource: resource_id,
                offset,
                alignment: required.alignment,
            });
        }
        if allocation.size < offset || allocation.size - offset < required.size {
            return Err(BindError::OutOfRange {
                resource: resource_id,
                memory: memory_id,
                offset,
                required: required.size,
                memory_size: allocation.size,
            });
        }
        if let Some(ref dedicated) = allocation.dedicated {
            let mismatch = dedicated.consumed
                || offset != 0
                || (dedicated.resource != resource_id
                    && !(enabled.is_enabled(Features::DEDICATED_IMAGE_ALIASING)
                        && dedicated.desc.structurally_compatible(&resource.desc)));
            if mismatch {
                return Err(BindError::DedicationMismatch {
                    resource: resource_id,
                    memory: memory_id,
                });
            }
        }

        if let Some(ref mut dedicated) = allocation.dedicated {
            dedicated.consumed = true;
        }
        resource.planes[plane].bound = Some(BoundMemory {
            memory: memory_id,
            offset,
        });
        Ok(())
    }

    /// True iff every declared plane of `resource` has a binding.
    pub fn all_planes_bound(&self, resource: ResourceId) -> Result<bool, InvalidHandle> {
        Ok(self.resources.lock().get(resource)?.all_planes_bound())
    }

    /// Remove the record. Returns whether the resource was an image, so
    /// the caller can retire its layout tracking.
    pub fn destroy_resource(&self, resource: ResourceId) -> Result<bool, InvalidHandle> {
        let removed = self.resources.lock().remove(resource)?;
        Ok(removed.desc.is_image())
    }

    pub fn free_memory(&self, memory: MemoryId) -> Result<(), InvalidHandle> {
        self.memories.lock().remove(memory)?;
        Ok(())
    }

    /// Snapshot the image state the layout tracker and use-validation
    /// need. `Ok(None)` means the handle is live but names a buffer.
    pub fn image_info(&self, resource: ResourceId) -> Result<Option<ImageInfo>, InvalidHandle> {
        let resources = self.resources.lock();
        let record = resources.get(resource)?;
        Ok(match record.desc {
            ResourceDesc::Buffer(_) => None,
            ResourceDesc::Image(ref desc) => Some(ImageInfo {
                aspects: desc.format.aspects(),
                mip_level_count: desc.mip_level_count,
                array_layer_count: desc.array_layer_count,
                initial_layout: desc.initial_layout,
                usage: desc.usage,
                format: desc.format,
                all_planes_bound: record.all_planes_bound(),
            }),
        })
    }

    pub fn generate_report(&self) -> LedgerReport {
        LedgerReport {
            resources: self.resources.lock().generate_report(),
            memories: self.memories.lock().generate_report(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt::{
        BufferDescriptor, BufferUsages, Extent3d, Format, ImageCreateFlags, ImageDescriptor,
        ImageLayout, ImageUsages, Version,
    };

    fn features(extra: Features) -> EnabledFeatureSet {
        let mut set = EnabledFeatureSet::new(Version::V1_1);
        set.enable(Features::DEDICATED_ALLOCATION | extra);
        set
    }

    fn buffer_desc(size: u64) -> ResourceDesc {
        ResourceDesc::Buffer(BufferDescriptor {
            size,
            usage: BufferUsages::TRANSFER_DST,
        })
    }

    fn image_desc(format: Format, flags: ImageCreateFlags) -> ResourceDesc {
        ResourceDesc::Image(ImageDescriptor {
            extent: Extent3d {
                width: 16,
                height: 16,
                depth: 1,
            },
            format,
            mip_level_count: 1,
            array_layer_count: 1,
            usage: ImageUsages::TRANSFER_DST,
            flags,
            initial_layout: ImageLayout::Undefined,
        })
    }

    fn required_size(ledger: &Ledger, id: ResourceId) -> u64 {
        let (_, outcome) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: 0,
                memory_type_index: 0,
            },
            Some(id),
            &features(Features::empty()),
        );
        match outcome {
            Err(AllocationError::DedicationConflict { required, .. }) => required,
            other => panic!("expected a size probe conflict, got {other:?}"),
        }
    }

    #[test]
    fn bind_succeeds_and_is_terminal() {
        let ledger = Ledger::new();
        let enabled = features(Features::empty());
        let buffer = ledger.create_resource(buffer_desc(512));
        let memory = ledger.allocate_memory(
            &MemoryDescriptor {
                size: 4096,
                memory_type_index: 0,
            },
            None,
            &enabled,
        );
        assert_eq!(memory.1, Ok(()));

        assert_eq!(
            ledger.bind_memory(buffer, None, memory.0, 0, &enabled),
            Ok(())
        );
        assert_eq!(ledger.all_planes_bound(buffer), Ok(true));
        assert_eq!(
            ledger.bind_memory(buffer, None, memory.0, 0, &enabled),
            Err(BindError::AlreadyBound {
                resource: buffer,
                plane: None,
            })
        );
    }

    #[test]
    fn failed_bind_still_consumes_the_plane() {
        let ledger = Ledger::new();
        let enabled = features(Features::empty());
        let buffer = ledger.create_resource(buffer_desc(512));
        let (memory, _) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: 4096,
                memory_type_index: 0,
            },
            None,
            &enabled,
        );

        // Misaligned first attempt.
        assert!(matches!(
            ledger.bind_memory(buffer, None, memory, 13, &enabled),
            Err(BindError::Unaligned { .. })
        ));
        // The retry fails with AlreadyBound, not Unaligned.
        assert!(matches!(
            ledger.bind_memory(buffer, None, memory, 0, &enabled),
            Err(BindError::AlreadyBound { .. })
        ));
    }

    #[test]
    fn bind_rejects_out_of_range_offsets() {
        let ledger = Ledger::new();
        let enabled = features(Features::empty());
        let buffer = ledger.create_resource(buffer_desc(4096));
        let (memory, _) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: 4096,
                memory_type_index: 0,
            },
            None,
            &enabled,
        );
        assert!(matches!(
            ledger.bind_memory(buffer, None, memory, 1024, &enabled),
            Err(BindError::OutOfRange { .. })
        ));
    }

    #[test]
    fn dedicated_allocation_binds_its_resource_only() {
        let ledger = Ledger::new();
        let enabled = features(Features::empty());
        let image = ledger.create_resource(image_desc(
            Format::Rgba8Unorm,
            ImageCreateFlags::empty(),
        ));
        let required = {
            let probe = ledger.create_resource(image_desc(
                Format::Rgba8Unorm,
                ImageCreateFlags::empty(),
            ));
            let size = required_size(&ledger, probe);
            ledger.destroy_resource(probe).unwrap();
            size
        };

        let (memory, outcome) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: required,
                memory_type_index: 0,
            },
            Some(image),
            &enabled,
        );
        assert_eq!(outcome, Ok(()));

        // A different resource is rejected even at offset zero.
        let other = ledger.create_resource(image_desc(
            Format::Rgba8Unorm,
            ImageCreateFlags::empty(),
        ));
        assert!(matches!(
            ledger.bind_memory(other, None, memory, 0, &enabled),
            Err(BindError::DedicationMismatch { .. })
        ));

        // A nonzero offset is rejected for the dedicated resource itself.
        assert!(matches!(
            ledger.bind_memory(image, None, memory, 1024, &enabled),
            Err(BindError::DedicationMismatch { .. })
        ));
    }

    #[test]
    fn dedication_size_rule_is_exact_without_aliasing() {
        let ledger = Ledger::new();
        let image = ledger.create_resource(image_desc(
            Format::Rgba8Unorm,
            ImageCreateFlags::empty(),
        ));
        let required = required_size(&ledger, image);

        // The probe above already consumed the dedication slot.
        let image2 = ledger.create_resource(image_desc(
            Format::Rgba8Unorm,
            ImageCreateFlags::empty(),
        ));
        let (_, exact) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: required,
                memory_type_index: 0,
            },
            Some(image2),
            &features(Features::empty()),
        );
        assert_eq!(exact, Ok(()));

        let image3 = ledger.create_resource(image_desc(
            Format::Rgba8Unorm,
            ImageCreateFlags::empty(),
        ));
        let (_, oversized) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: required * 2,
                memory_type_index: 0,
            },
            Some(image3),
            &features(Features::empty()),
        );
        assert!(matches!(
            oversized,
            Err(AllocationError::DedicationConflict { .. })
        ));

        // The aliasing relaxation accepts size >= required.
        let image4 = ledger.create_resource(image_desc(
            Format::Rgba8Unorm,
            ImageCreateFlags::empty(),
        ));
        let (_, relaxed) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: required * 2,
                memory_type_index: 0,
            },
            Some(image4),
            &features(Features::DEDICATED_IMAGE_ALIASING),
        );
        assert_eq!(relaxed, Ok(()));
    }

    #[test]
    fn disjoint_image_planes_bind_independently() {
        let ledger = Ledger::new();
        let enabled = features(Features::SAMPLER_YCBCR_CONVERSION);
        let image = ledger.create_resource(image_desc(
            Format::G8B8R82Plane420,
            ImageCreateFlags::DISJOINT,
        ));
        let alloc = |size| {
            ledger
                .allocate_memory(
                    &MemoryDescriptor {
                        size,
                        memory_type_index: 0,
                    },
                    None,
                    &enabled,
                )
                .0
        };
        let alloc_a = alloc(1 << 20);
        let alloc_b = alloc(1 << 20);

        assert_eq!(
            ledger.bind_memory(image, Some(ImageAspects::PLANE_0), alloc_a, 0, &enabled),
            Ok(())
        );
        assert_eq!(ledger.all_planes_bound(image), Ok(false));
        assert!(matches!(
            ledger.bind_memory(image, Some(ImageAspects::PLANE_0), alloc_b, 0, &enabled),
            Err(BindError::AlreadyBound { .. })
        ));
        assert_eq!(
            ledger.bind_memory(image, Some(ImageAspects::PLANE_1), alloc_b, 0, &enabled),
            Ok(())
        );
        assert_eq!(ledger.all_planes_bound(image), Ok(true));

        // A plane aspect on a non-disjoint image is not applicable.
        let plain = ledger.create_resource(image_desc(
            Format::Rgba8Unorm,
            ImageCreateFlags::empty(),
        ));
        assert!(matches!(
            ledger.bind_memory(plain, Some(ImageAspects::PLANE_0), alloc_a, 0, &enabled),
            Err(BindError::PlaneNotApplicable { .. })
        ));
        // And a disjoint image requires one.
        assert!(matches!(
            ledger.bind_memory(image, None, alloc_a, 0, &enabled),
            Err(BindError::PlaneNotApplicable { .. })
        ));
    }

    #[test]
    fn destroyed_handles_are_detected_without_crashing() {
        let ledger = Ledger::new();
        let enabled = features(Features::empty());
        let buffer = ledger.create_resource(buffer_desc(256));
        let (memory, _) = ledger.allocate_memory(
            &MemoryDescriptor {
                size: 4096,
                memory_type_index: 0,
            },
            None,
            &enabled,
        );
        ledger.destroy_resource(buffer).unwrap();

        assert_eq!(
            ledger.bind_memory(buffer, None, memory, 0, &enabled),
            Err(BindError::InvalidResource(buffer))
        );
        assert_eq!(ledger.all_planes_bound(buffer), Err(InvalidHandle));
        assert_eq!(ledger.destroy_resource(buffer), Err(InvalidHandle));
    }
}
