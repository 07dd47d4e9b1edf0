//! The intercepted call surface.
//!
//! The shim over the native API funnels every entry point through
//! [`Session::intercept`] as a [`Call`] value. Dispatch is a pure function
//! of the call and the session's tracked state, so replaying one call
//! sequence against a fresh session reproduces the same defect sequence,
//! which is what makes captured traces diagnosable offline.

use crate::{
    defect::Defect,
    id::{CommandBufferId, MemoryId, RawId, ResourceId},
    layout::UsageKind,
    session::Session,
};
use vt::{
    BufferDescriptor, ImageAspects, ImageDescriptor, ImageLayout, ImageSubresourceRange,
    MemoryDescriptor,
};

/// One intercepted entry point with its arguments.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateBuffer(BufferDescriptor),
    CreateImage(ImageDescriptor),
    AllocateMemory {
        desc: MemoryDescriptor,
        dedicated: Option<ResourceId>,
    },
    BindMemory {
        resource: ResourceId,
        plane_aspect: Option<ImageAspects>,
        memory: MemoryId,
        offset: u64,
    },
    DestroyResource(ResourceId),
    FreeMemory(MemoryId),
    CreateCommandBuffer,
    DestroyCommandBuffer(CommandBufferId),
    BeginCommandBuffer(CommandBufferId),
    EndCommandBuffer(CommandBufferId),
    ResetCommandBuffer(CommandBufferId),
    PipelineBarrier {
        cb: CommandBufferId,
        image: ResourceId,
        range: ImageSubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    },
    UseImage {
        cb: CommandBufferId,
        image: ResourceId,
        range: ImageSubresourceRange,
        layout: ImageLayout,
        usage: UsageKind,
    },
    Submit(Vec<CommandBufferId>),
}

/// What one intercepted call produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallReport {
    /// The handle a creating call minted, if any.
    pub created: Option<RawId>,
    pub defects: Vec<Defect>,
}

impl CallReport {
    fn of(defects: Vec<Defect>) -> Self {
        Self {
            created: None,
            defects,
        }
    }

    fn creating(id: impl Into<RawId>, defects: Vec<Defect>) -> Self {
        Self {
            created: Some(id.into()),
            defects,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.defects.is_empty()
    }
}

impl Session {
    /// Validate one intercepted call and advance tracked state.
    pub fn intercept(&self, call: &Call) -> CallReport {
        profiling::scope!("Session::intercept");
        log::trace!("intercept {call:?}");
        match *call {
            Call::CreateBuffer(ref desc) => {
                let (id, defects) = self.create_buffer(desc);
                CallReport::creating(id, defects)
            }
            Call::CreateImage(ref desc) => {
                let (id, defects) = self.create_image(desc);
                CallReport::creating(id, defects)
            }
            Call::AllocateMemory {
                ref desc,
                dedicated,
            } => {
                let (id, defects) = self.allocate_memory(desc, dedicated);
                CallReport::creating(id, defects)
            }
            Call::BindMemory {
                resource,
                plane_aspect,
                memory,
                offset,
            } => CallReport::of(self.bind_memory(resource, plane_aspect, memory, offset)),
            Call::DestroyResource(resource) => CallReport::of(self.destroy_resource(resource)),
            Call::FreeMemory(memory) => CallReport::of(self.free_memory(memory)),
            Call::CreateCommandBuffer => {
                CallReport::creating(self.create_command_buffer(), Vec::new())
            }
            Call::DestroyCommandBuffer(cb) => CallReport::of(self.destroy_command_buffer(cb)),
            Call::BeginCommandBuffer(cb) => CallReport::of(self.begin_command_buffer(cb)),
            Call::EndCommandBuffer(cb) => CallReport::of(self.end_command_buffer(cb)),
            Call::ResetCommandBuffer(cb) => CallReport::of(self.reset_command_buffer(cb)),
            Call::PipelineBarrier {
                cb,
                image,
                ref range,
                old_layout,
                new_layout,
            } => CallReport::of(
                self.cmd_pipeline_barrier(cb, image, range, old_layout, new_layout),
            ),
            Call::UseImage {
                cb,
                image,
                ref range,
                layout,
                usage,
            } => CallReport::of(self.cmd_use_image(cb, image, range, layout, usage)),
            Call::Submit(ref buffers) => CallReport::of(self.submit(buffers)),
        }
    }
}
