//! One validated connection to the driver.
//!
//! A [`Session`] owns every piece of tracked state: the resource ledger,
//! the command buffer table, the queue-global layout table, and the legal
//! value sets resolved for the session's immutable feature configuration.
//! Two sessions share nothing; their reports never interleave.
//!
//! Every entry point is advisory. Defects are returned to the caller, and
//! tracked state still advances wherever the outcome is well-defined, so
//! the application sees the same object graph the driver would.
//!
//! Lock order: command buffers, then resources, then memories, then the
//! layout table.

use crate::{
    command::{CommandBuffer, RecordState},
    defect::{codes, Defect},
    id::{CommandBufferId, MemoryId, ResourceId},
    layout::{LayoutTracker, UsageKind},
    ledger::{Ledger, LedgerReport},
    legality::{tables, Resolver},
    lock::{self, Mutex},
    storage::{InvalidHandle, StorageReport, Table},
};
use vt::{
    BufferDescriptor, EnabledFeatureSet, Format, ImageCreateFlags, ImageDescriptor, ImageLayout,
    ImageSubresourceRange, MemoryDescriptor,
};

/// Occupancy of every table a session owns, for teardown leak checks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub ledger: LedgerReport,
    pub command_buffers: StorageReport,
}

impl SessionReport {
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty() && self.command_buffers.num_occupied == 0
    }
}

#[derive(Debug)]
pub struct Session {
    features: EnabledFeatureSet,
    layout_legality: Resolver<ImageLayout>,
    format_legality: Resolver<Format>,
    ledger: Ledger,
    command_buffers: Mutex<Table<CommandBuffer, CommandBufferId>>,
    layouts: LayoutTracker,
}

impl Session {
    /// Open a session under `features`. The feature set is fixed for the
    /// session's lifetime; the legal value sets are resolved here, once.
    pub fn new(features: EnabledFeatureSet) -> Self {
        let layout_legality = Resolver::new(&tables::IMAGE_LAYOUT, &features);
        let format_legality = Resolver::new(&tables::FORMAT, &features);
        Self {
            features,
            layout_legality,
            format_legality,
            ledger: Ledger::new(),
            command_buffers: Mutex::new(lock::COMMAND_BUFFER_TABLE, Table::new("CommandBuffer")),
            layouts: LayoutTracker::new(),
        }
    }

    pub fn features(&self) -> &EnabledFeatureSet {
        &self.features
    }

    pub fn layout_legality(&self) -> &Resolver<ImageLayout> {
        &self.layout_legality
    }

    fn check_layout_value(
        &self,
        layout: ImageLayout,
        subject: crate::id::RawId,
        defects: &mut Vec<Defect>,
    ) {
        if !self.layout_legality.is_legal(layout) {
            defects.push(
                Defect::error(codes::ENUM_VALUE_NOT_LEGAL, [subject])
                    .with_missing_feature(self.layout_legality.sole_enabling_feature(layout)),
            );
        }
    }

    pub fn create_buffer(&self, desc: &BufferDescriptor) -> (ResourceId, Vec<Defect>) {
        let id = self
            .ledger
            .create_resource(crate::resource::ResourceDesc::Buffer(desc.clone()));
        log::trace!("created buffer {id:?}");
        (id, Vec::new())
    }

    /// Create an image record. Creation-parameter defects are reported,
    /// but the record is kept regardless so later calls against the
    /// handle validate against what the application actually asked for.
    pub fn create_image(&self, desc: &ImageDescriptor) -> (ResourceId, Vec<Defect>) {
        let mut defects = Vec::new();
        let id = self
            .ledger
            .create_resource(crate::resource::ResourceDesc::Image(desc.clone()));
        log::trace!("created image {id:?} with format {:?}", desc.format);

        if !self.format_legality.is_legal(desc.format) {
            defects.push(
                Defect::error(codes::ENUM_VALUE_NOT_LEGAL, [id.into()]).with_missing_feature(
                    self.format_legality.sole_enabling_feature(desc.format),
                ),
            );
        }
        if !desc.initial_layout.is_initial() {
            defects.push(Defect::error(codes::INVALID_INITIAL_LAYOUT, [id.into()]));
        }
        if desc.flags.contains(ImageCreateFlags::DISJOINT) && desc.format.plane_count() == 1 {
            defects.push(Defect::error(codes::DISJOINT_NOT_APPLICABLE, [id.into()]));
        }
        if desc.mip_level_count == 0 || desc.mip_level_count > desc.extent.max_mip_levels() {
            defects.push(Defect::error(codes::INVALID_SUBRESOURCE, [id.into()]));
        }

        if let Ok(Some(ref info)) = self.ledger.image_info(id) {
            self.layouts.register_image(id, info);
        }
        (id, defects)
    }

    pub fn allocate_memory(
        &self,
        desc: &MemoryDescriptor,
        dedicated: Option<ResourceId>,
    ) -> (MemoryId, Vec<Defect>) {
        let (id, outcome) = self.ledger.allocate_memory(desc, dedicated, &self.features);
        log::trace!("allocated memory {id:?} ({} bytes)", desc.size);
        let defects = match outcome {
            Ok(()) => Vec::new(),
            Err(ref error) => {
                log::debug!("defective allocation {id:?}: {error}");
                vec![error.to_defect()]
            }
        };
        (id, defects)
    }

    pub fn bind_memory(
        &self,
        resource: ResourceId,
        plane_aspect: Option<vt::ImageAspects>,
        memory: MemoryId,
        offset: u64,
    ) -> Vec<Defect> {
        match self
            .ledger
            .bind_memory(resource, plane_aspect, memory, offset, &self.features)
        {
            Ok(()) => Vec::new(),
            Err(ref error) => {
                log::debug!("defective bind of {resource:?}: {error}");
                vec![error.to_defect()]
            }
        }
    }

    pub fn destroy_resource(&self, resource: ResourceId) -> Vec<Defect> {
        match self.ledger.destroy_resource(resource) {
            Ok(was_image) => {
                if was_image {
                    self.layouts.unregister_image(resource);
                }
                Vec::new()
            }
            Err(InvalidHandle) => {
                vec![Defect::error(codes::USE_AFTER_DESTROY, [resource.into()])]
            }
        }
    }

    pub fn free_memory(&self, memory: MemoryId) -> Vec<Defect> {
        match self.ledger.free_memory(memory) {
            Ok(()) => Vec::new(),
            Err(InvalidHandle) => {
                vec![Defect::error(codes::USE_AFTER_DESTROY, [memory.into()])]
            }
        }
    }

    pub fn create_command_buffer(&self) -> CommandBufferId {
        let id = self.command_buffers.lock().insert(CommandBuffer::new());
        log::trace!("created command buffer {id:?}");
        id
    }

    pub fn destroy_command_buffer(&self, cb: CommandBufferId) -> Vec<Defect> {
        match self.command_buffers.lock().remove(cb) {
            Ok(_) => Vec::new(),
            Err(InvalidHandle) => vec![Defect::error(codes::USE_AFTER_DESTROY, [cb.into()])],
        }
    }

    fn with_command_buffer(
        &self,
        cb: CommandBufferId,
        defects: &mut Vec<Defect>,
        fun: impl FnOnce(&Session, &mut CommandBuffer, &mut Vec<Defect>),
    ) {
        let mut command_buffers = self.command_buffers.lock();
        match command_buffers.get_mut(cb) {
            Ok(buffer) => fun(self, buffer, defects),
            Err(InvalidHandle) => {
                defects.push(Defect::error(codes::USE_AFTER_DESTROY, [cb.into()]));
            }
        }
    }

    pub fn begin_command_buffer(&self, cb: CommandBufferId) -> Vec<Defect> {
        let mut defects = Vec::new();
        self.with_command_buffer(cb, &mut defects, |_, buffer, defects| {
            if let Err(ref error) = buffer.begin() {
                defects.push(Defect::error(error.code(), [cb.into()]));
            }
        });
        defects
    }

    pub fn end_command_buffer(&self, cb: CommandBufferId) -> Vec<Defect> {
        let mut defects = Vec::new();
        self.with_command_buffer(cb, &mut defects, |_, buffer, defects| {
            if let Err(ref error) = buffer.end() {
                defects.push(Defect::error(error.code(), [cb.into()]));
            }
        });
        defects
    }

    pub fn reset_command_buffer(&self, cb: CommandBufferId) -> Vec<Defect> {
        let mut defects = Vec::new();
        self.with_command_buffer(cb, &mut defects, |_, buffer, _| buffer.reset());
        defects
    }

    /// Record an explicit layout transition barrier.
    pub fn cmd_pipeline_barrier(
        &self,
        cb: CommandBufferId,
        image: ResourceId,
        range: &ImageSubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Vec<Defect> {
        let mut defects = Vec::new();
        self.with_command_buffer(cb, &mut defects, |session, buffer, defects| {
            if let Err(ref error) = buffer.expect_recording() {
                defects.push(Defect::error(error.code(), [cb.into()]));
            }
            session.check_layout_value(old_layout, image.into(), defects);
            session.check_layout_value(new_layout, image.into(), defects);

            match session.ledger.image_info(image) {
                Err(InvalidHandle) => {
                    defects.push(Defect::error(codes::USE_AFTER_DESTROY, [image.into()]));
                }
                Ok(None) => {
                    // A buffer handle has no subresources to transition.
                    defects.push(Defect::error(codes::INVALID_SUBRESOURCE, [image.into()]));
                }
                Ok(Some(ref info)) => {
                    buffer
                        .layouts
                        .declare(image, info, range, old_layout, new_layout, defects);
                }
            }
        });
        defects
    }

    /// Record a command that consumes `image` expecting `layout`.
    pub fn cmd_use_image(
        &self,
        cb: CommandBufferId,
        image: ResourceId,
        range: &ImageSubresourceRange,
        layout: ImageLayout,
        usage: UsageKind,
    ) -> Vec<Defect> {
        let mut defects = Vec::new();
        self.with_command_buffer(cb, &mut defects, |session, buffer, defects| {
            if let Err(ref error) = buffer.expect_recording() {
                defects.push(Defect::error(error.code(), [cb.into()]));
            }
            session.check_layout_value(layout, image.into(), defects);

            match session.ledger.image_info(image) {
                Err(InvalidHandle) => {
                    defects.push(Defect::error(codes::USE_AFTER_DESTROY, [image.into()]));
                }
                Ok(None) => {
                    defects.push(Defect::error(codes::INVALID_SUBRESOURCE, [image.into()]));
                }
                Ok(Some(ref info)) => {
                    let needed = usage.required_usage();
                    if !info.usage.contains(needed) {
                        defects.push(Defect::error(codes::MISSING_USAGE, [image.into()]));
                    }
                    if !info.all_planes_bound {
                        defects.push(Defect::error(codes::NOT_RESIDENT, [image.into()]));
                    }
                    buffer
                        .layouts
                        .require(image, info, range, layout, usage, defects);
                }
            }
        });
        defects
    }

    /// Submit `buffers` in order: reconcile each buffer's first-use layout
    /// claims against the queue-global table, then fold its final
    /// predictions in. Buffer order is the observable order.
    pub fn submit(&self, buffers: &[CommandBufferId]) -> Vec<Defect> {
        let mut defects = Vec::new();
        let command_buffers = self.command_buffers.lock();
        for &cb in buffers {
            match command_buffers.get(cb) {
                Err(InvalidHandle) => {
                    defects.push(Defect::error(codes::USE_AFTER_DESTROY, [cb.into()]));
                }
                Ok(buffer) => {
                    if let Err(ref error) = buffer.expect_executable() {
                        defects.push(Defect::error(error.code(), [cb.into()]));
                    }
                    // An incomplete buffer's predictions are still the
                    // best available account of what the queue will see.
                    self.layouts.merge_overlay(&buffer.layouts, &mut defects);
                }
            }
        }
        defects
    }

    pub fn command_buffer_state(&self, cb: CommandBufferId) -> Result<RecordState, InvalidHandle> {
        Ok(self.command_buffers.lock().get(cb)?.state())
    }

    /// The queue-global layout of `range`, if uniform. Test and tooling
    /// hook; recorded state is never consulted.
    pub fn queue_layout(
        &self,
        image: ResourceId,
        range: &ImageSubresourceRange,
    ) -> Option<ImageLayout> {
        self.layouts.query(image, range)
    }

    pub fn generate_report(&self) -> SessionReport {
        SessionReport {
            ledger: self.ledger.generate_report(),
            command_buffers: self.command_buffers.lock().generate_report(),
        }
    }
}
