//! One filter run: record assembly, the phase sequence and post-processing.

use std::cell::RefCell;
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};

use pi_sdk::descriptor::{
    K_CURRENT_DESCRIPTOR_PARAMETERS_VERSION, PIDescriptorParameters, PLUG_IN_DIALOG_DISPLAY, PLUG_IN_DIALOG_DONT_DISPLAY,
    PLUG_IN_DIALOG_OPTIONAL, ReadDescriptorProcs, WriteDescriptorProcs,
};
use pi_sdk::errors::{NO_ERR, PARAM_ERR};
use pi_sdk::filter_record::*;
use pi_sdk::pica::SPBasicSuite;
use pi_sdk::procs::{BufferProcs, ChannelPortProcs, HandleProcs, ImageServicesProcs, PropertyProcs, ResourceProcs};
use pi_sdk::types::{
    Handle, OSErr, PlatformData, PlugInMonitor, Point, RGBColor, Str255, VPoint, double_to_fixed, from_pascal_string,
    int_to_fixed,
};
use pi_sdk::{AboutRecord, BigDocumentStruct, FilterRecord, PluginEntryPoint, VRect};

use super::buffers::{TileBuffers, requested_rects};
use super::callbacks::{self, HostHooks};
use super::filter_case::{CaseLayout, select_filter_case};
use super::post::{clip_to_selection, fill_mask, zap_transparent};
use super::{AbortSignal, FilterOutcome, FilterRequest, HostCallbacks, HostConfig};
use crate::error::HostError;
use crate::memory::NativeArena;
use crate::parameters::{FilterSettings, GlobalParameters, capture_block, restore_block};
use crate::plugin_data::PluginData;
use crate::plugin_loader::PluginModule;
use crate::suites::buffer::BufferSuite;
use crate::suites::channel_ports::ChannelPorts;
use crate::suites::color_services::{ColorServices, ColorSpace, color_services_callback, from_rgb};
use crate::suites::descriptor::DescriptorSuite;
use crate::suites::handle::HandleSuite;
use crate::suites::image_services::create_image_services_procs;
use crate::suites::pica::PicaSuites;
use crate::suites::property::PropertySuite;
use crate::suites::resource::ResourceSuite;
use crate::suites::{SlotBinding, bind, with_bound};
use crate::surface::{ImageMode, Surface};

thread_local! {
    static TILES: RefCell<Weak<RefCell<TileState>>> = RefCell::new(Weak::new());
}

/// Tile buffers plus the record `advanceState` serves.
struct TileState {
    buffers: TileBuffers,
    record: NonNull<FilterRecord>,
}

impl TileState {
    fn advance(&mut self) -> OSErr {
        // SAFETY: the record outlives every binding of this state, and the
        // plugin is blocked either in `advanceState` or between phases.
        let record = unsafe { self.record.as_mut() };
        self.buffers.advance(record)
    }
}

unsafe extern "C" fn advance_state() -> OSErr {
    with_bound(&TILES, PARAM_ERR, TileState::advance)
}

/// Heap-pinned `FilterRecord`; the plugin keeps its address between calls.
struct RecordCell(NonNull<FilterRecord>);

impl RecordCell {
    fn new() -> Self {
        Self(NonNull::from(Box::leak(Box::new(FilterRecord::zeroed()))))
    }
}

impl Drop for RecordCell {
    fn drop(&mut self) {
        // SAFETY: allocated by `Box` in `new` and freed only here.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// Slot bindings held for the duration of a run.
struct SessionBindings {
    _handles: SlotBinding<HandleSuite>,
    _buffers: SlotBinding<BufferSuite>,
    _properties: SlotBinding<PropertySuite>,
    _resources: SlotBinding<ResourceSuite>,
    _descriptors: SlotBinding<DescriptorSuite>,
    _colors: SlotBinding<ColorServices>,
    _ports: SlotBinding<ChannelPorts>,
    _pica: SlotBinding<PicaSuites>,
    _hooks: SlotBinding<HostHooks>,
    _tiles: SlotBinding<TileState>,
}

/// Procsets and side blocks the record points into.
struct RecordBlocks {
    handle_procs: Box<HandleProcs>,
    buffer_procs: Box<BufferProcs>,
    resource_procs: Box<ResourceProcs>,
    property_procs: Box<PropertyProcs>,
    image_services: Box<ImageServicesProcs>,
    channel_ports: Box<ChannelPortProcs>,
    read_descriptor: Box<ReadDescriptorProcs>,
    write_descriptor: Box<WriteDescriptorProcs>,
    descriptor_parameters: Box<PIDescriptorParameters>,
    sp_basic: Box<SPBasicSuite>,
    error_string: Box<Str255>,
    big_document: Box<BigDocumentStruct>,
    platform: Box<PlatformData>,
}

impl RecordBlocks {
    fn new() -> Self {
        Self {
            handle_procs: HandleSuite::create_handle_procs(),
            buffer_procs: BufferSuite::create_buffer_procs(),
            resource_procs: ResourceSuite::create_resource_procs(),
            property_procs: PropertySuite::create_property_procs(),
            image_services: create_image_services_procs(),
            channel_ports: ChannelPorts::create_channel_port_procs(),
            read_descriptor: DescriptorSuite::create_read_descriptor_procs(),
            write_descriptor: DescriptorSuite::create_write_descriptor_procs(),
            descriptor_parameters: Box::new(PIDescriptorParameters {
                descriptor_parameters_version: K_CURRENT_DESCRIPTOR_PARAMETERS_VERSION,
                play_info: PLUG_IN_DIALOG_DONT_DISPLAY,
                record_info: PLUG_IN_DIALOG_OPTIONAL,
                descriptor: ptr::null_mut(),
                write_descriptor_procs: ptr::null_mut(),
                read_descriptor_procs: ptr::null_mut(),
            }),
            sp_basic: PicaSuites::create_sp_basic_suite(),
            error_string: Box::new([0; 256]),
            big_document: Box::new(BigDocumentStruct::default()),
            platform: Box::new(PlatformData { hwnd: 0 }),
        }
    }
}

pub(crate) struct FilterSession<'a> {
    plugin: &'a PluginData,
    entry: PluginEntryPoint,
    layout: CaseLayout,
    mode: ImageMode,
    show_ui: bool,
    original: Rc<Surface>,
    mask: Option<Rc<Surface>>,
    arena: Rc<NativeArena>,
    handles: Rc<RefCell<HandleSuite>>,
    buffers: Rc<RefCell<BufferSuite>>,
    properties: Rc<RefCell<PropertySuite>>,
    resources: Rc<RefCell<ResourceSuite>>,
    descriptors: Rc<RefCell<DescriptorSuite>>,
    colors: Rc<RefCell<ColorServices>>,
    ports: Rc<RefCell<ChannelPorts>>,
    pica: Rc<RefCell<PicaSuites>>,
    hooks: Rc<RefCell<HostHooks>>,
    tiles: Rc<RefCell<TileState>>,
    blocks: RecordBlocks,
    record: RecordCell,
    data: isize,
    phases: Vec<i16>,
}

fn filter_color(mode: ImageMode, rgb: [u8; 3]) -> [u8; 4] {
    let planes = match mode {
        ImageMode::Rgb | ImageMode::Rgb48 => return [rgb[0], rgb[1], rgb[2], 0],
        ImageMode::Gray | ImageMode::Gray16 => from_rgb(ColorSpace::Gray, rgb),
        ImageMode::Cmyk => from_rgb(ColorSpace::Cmyk, rgb),
    };
    planes.map(|v| v.clamp(0, 255) as u8)
}

/// Preferred tile side: the configured size, capped by the image and the
/// record's 16-bit field.
fn tile_extent(tile_size: u16, image_extent: i32) -> i16 {
    (tile_size as i32).min(image_extent).clamp(0, i16::MAX as i32) as i16
}

fn channel_names(mode: ImageMode, alpha: bool) -> Vec<String> {
    let names: &[&str] = match mode {
        ImageMode::Rgb | ImageMode::Rgb48 => &["Red", "Green", "Blue"],
        ImageMode::Gray | ImageMode::Gray16 => &["Gray"],
        ImageMode::Cmyk => &["Cyan", "Magenta", "Yellow", "Black"],
    };
    let mut names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
    if alpha {
        names.push("Transparency".to_string());
    }
    names
}

fn validate(request: &FilterRequest) -> Result<(), HostError> {
    let source = &request.source;
    if source.width() == 0 || source.height() == 0 {
        return Err(HostError::InvalidRequest("the image is empty".to_string()));
    }
    if source.channels() != request.mode.surface_channels()
        || source.bytes_per_channel() != request.mode.bytes_per_channel()
    {
        return Err(HostError::InvalidRequest(format!(
            "{source:?} does not match image mode {:?}",
            request.mode
        )));
    }
    if let Some(selection) = &request.selection {
        if selection.width() != source.width() || selection.height() != source.height() || selection.channels() != 1 {
            return Err(HostError::InvalidRequest(format!(
                "selection {selection:?} does not match the image"
            )));
        }
    }
    Ok(())
}

impl<'a> FilterSession<'a> {
    pub fn new(
        module: &PluginModule,
        plugin: &'a PluginData,
        request: FilterRequest,
        config: &HostConfig,
        callbacks: &HostCallbacks,
        abort: &AbortSignal,
    ) -> Result<Self, HostError> {
        validate(&request)?;
        let FilterRequest {
            source,
            mode,
            selection,
            foreground,
            background,
            show_ui,
            settings,
            icc_profile,
            document,
        } = request;

        let has_transparency = mode.supports_transparency() && source.has_transparency();
        let layout = select_filter_case(plugin, mode, has_transparency, selection.is_some())?;
        if mode.supports_transparency() && source.is_blank() && !layout.info.works_with_blank_data() {
            return Err(HostError::BlankImageUnsupported);
        }
        let filter_rect = match &selection {
            Some(mask) => mask
                .mask_bounds()
                .ok_or_else(|| HostError::InvalidRequest("the selection is empty".to_string()))?,
            None => source.bounds(),
        };
        tracing::debug!(
            filter_case = layout.filter_case,
            planes = layout.planes,
            rect = ?filter_rect,
            "filter case selected"
        );

        let original = Rc::new(source);
        let mut input = (*original).clone();
        if layout.is_editable_transparency()
            && zap_transparent(&mut input, mode, layout.info.input_handling, foreground, background)
        {
            tracing::debug!(handling = layout.info.input_handling, "transparent pixels zapped");
        }
        let input = Rc::new(input);

        let mut destination = (*input).clone();
        if layout.info.dont_copy_to_destination() {
            for y in 0..destination.height() {
                for x in 0..destination.width() {
                    for plane in 0..mode.color_planes() {
                        destination.set_sample(x, y, mode.plane_channel(plane), 0);
                    }
                }
            }
        }
        let mask = selection.map(Rc::new);

        let arena = Rc::new(NativeArena::new());
        let handles = Rc::new(RefCell::new(HandleSuite::new(arena.clone())));
        let buffers = Rc::new(RefCell::new(BufferSuite::new(arena.clone(), config.max_space)));

        let mut document = document;
        document.width = input.width() as i32;
        document.height = input.height() as i32;
        document.image_mode = mode.plugin_mode();
        document.host_name = config.host_name.clone();
        document.serial_string = config.serial_number.to_string();
        if document.channel_names.is_empty() {
            document.channel_names = channel_names(mode, layout.editable_alpha);
        }
        let properties = Rc::new(RefCell::new(PropertySuite::new(document, handles.clone())));

        let settings = settings.unwrap_or_default();
        let resources = Rc::new(RefCell::new(ResourceSuite::new(settings.resources.clone(), handles.clone())));
        let descriptors = Rc::new(RefCell::new(DescriptorSuite::new(handles.clone())));
        let colors = Rc::new(RefCell::new(ColorServices::new(
            input.clone(),
            mode,
            foreground,
            background,
            callbacks.color_picker.clone(),
        )));
        let ports = Rc::new(RefCell::new(ChannelPorts::new(input.clone(), mode, mask.clone(), has_transparency)));
        let pica = Rc::new(RefCell::new(PicaSuites::new(arena.clone(), HostHooks::ui_hooks(), false)));
        let hooks = Rc::new(RefCell::new(HostHooks::new(
            abort.clone(),
            callbacks.progress.clone(),
            callbacks.display.clone(),
        )));

        let record = RecordCell::new();
        let tiles = Rc::new(RefCell::new(TileState {
            buffers: TileBuffers::new(arena.clone(), mode, layout.planes, input.clone(), destination, mask.clone()),
            record: record.0,
        }));

        let mut session = Self {
            plugin,
            entry: module.entry(),
            layout,
            mode,
            show_ui,
            original,
            mask,
            arena,
            handles,
            buffers,
            properties,
            resources,
            descriptors,
            colors,
            ports,
            pica,
            hooks,
            tiles,
            blocks: RecordBlocks::new(),
            record,
            data: 0,
            phases: Vec::new(),
        };
        session.assemble_record(config, filter_rect, &input, foreground, background);
        session.restore_settings(&settings)?;
        if let Some(profile) = icc_profile {
            let handle = session.handles.borrow_mut().new_handle_from(&profile);
            if handle.is_null() {
                return Err(HostError::OutOfMemory);
            }
            let record = session.record();
            record.icc_profile_data = handle;
            record.icc_profile_size = profile.len() as i32;
            record.can_use_icc_profiles = 1;
        }
        Ok(session)
    }

    fn record(&mut self) -> &mut FilterRecord {
        // SAFETY: the host only touches the record while no plugin call is
        // in progress, and `RecordCell` keeps it alive as long as `self`.
        unsafe { self.record.0.as_mut() }
    }

    fn assemble_record(
        &mut self,
        config: &HostConfig,
        filter_rect: VRect,
        input: &Surface,
        foreground: [u8; 3],
        background: [u8; 3],
    ) {
        let (width, height) = (input.width() as i32, input.height() as i32);
        let (dpi_x, dpi_y) = match config.resolution {
            Some(dpi) => (dpi, dpi),
            None => input.dpi(),
        };
        let tile_width = tile_extent(config.tile_size, width);
        let tile_height = tile_extent(config.tile_size, height);
        let (layer, transparency, non_layer) = self.layout.plane_counts();
        let max_space_32 = config.max_space.clamp(0, i32::MAX as i64) as i32;
        let mode = self.mode;
        let layout = self.layout;
        let have_mask = self.mask.is_some();
        let document_info = self.ports.borrow_mut().document_info();

        let blocks = &mut self.blocks;
        blocks.descriptor_parameters.play_info = if self.show_ui {
            PLUG_IN_DIALOG_DISPLAY
        } else {
            PLUG_IN_DIALOG_DONT_DISPLAY
        };
        blocks.descriptor_parameters.read_descriptor_procs = &mut *blocks.read_descriptor;
        blocks.descriptor_parameters.write_descriptor_procs = &mut *blocks.write_descriptor;
        *blocks.big_document = BigDocumentStruct {
            plugin_using_32_bit_coordinates: 0,
            image_size_32: VPoint { v: height, h: width },
            filter_rect_32: filter_rect,
            in_rect_32: VRect::default(),
            out_rect_32: VRect::default(),
            mask_rect_32: VRect::default(),
            float_coord_32: VPoint::default(),
            whole_size_32: VPoint { v: height, h: width },
        };
        let handle_procs: *mut HandleProcs = &mut *blocks.handle_procs;
        let buffer_procs: *mut BufferProcs = &mut *blocks.buffer_procs;
        let resource_procs: *mut ResourceProcs = &mut *blocks.resource_procs;
        let property_procs: *mut PropertyProcs = &mut *blocks.property_procs;
        let image_services: *mut ImageServicesProcs = &mut *blocks.image_services;
        let channel_ports: *mut ChannelPortProcs = &mut *blocks.channel_ports;
        let descriptor_parameters: *mut PIDescriptorParameters = &mut *blocks.descriptor_parameters;
        let sp_basic: *mut SPBasicSuite = &mut *blocks.sp_basic;
        let error_string: *mut Str255 = &mut *blocks.error_string;
        let big_document: *mut BigDocumentStruct = &mut *blocks.big_document;
        let platform: *mut PlatformData = &mut *blocks.platform;

        let image_size = Point {
            v: height.min(i16::MAX as i32) as i16,
            h: width.min(i16::MAX as i32) as i16,
        };
        let record = self.record();
        record.serial_number = config.serial_number;
        record.abort_proc = Some(callbacks::test_abort);
        record.progress_proc = Some(callbacks::progress);
        record.image_size = image_size;
        record.planes = layout.planes;
        record.filter_rect = filter_rect.to_rect();
        record.background = RGBColor::from_rgb8(background[0], background[1], background[2]);
        record.foreground = RGBColor::from_rgb8(foreground[0], foreground[1], foreground[2]);
        record.max_space = max_space_32;
        record.buffer_space = max_space_32;
        record.have_mask = have_mask as u8;
        record.auto_mask = (have_mask && !layout.info.writes_outside_selection()) as u8;
        record.back_color = filter_color(mode, background);
        record.fore_color = filter_color(mode, foreground);
        record.host_sig = config.host_sig();
        record.host_proc = Some(callbacks::host_proc);
        record.image_mode = mode.plugin_mode();
        record.image_h_res = double_to_fixed(dpi_x);
        record.image_v_res = double_to_fixed(dpi_y);
        record.whole_size = image_size;
        record.monitor = PlugInMonitor::srgb();
        record.platform_data = platform.cast();
        record.buffer_procs = buffer_procs;
        record.resource_procs = resource_procs;
        record.process_event = Some(callbacks::process_event);
        record.display_pixels = Some(callbacks::display_pixels);
        record.handle_procs = handle_procs;

        record.filter_case = layout.filter_case;
        record.dummy_plane_value = -1;
        record.advance_state = Some(advance_state);
        record.get_property_obsolete = PropertySuite::get_property_callback();
        record.supports_padding = 1;
        record.input_padding = PLUG_IN_DOES_NOT_WANT_PADDING;
        record.output_padding = PLUG_IN_DOES_NOT_WANT_PADDING;
        record.mask_padding = PLUG_IN_DOES_NOT_WANT_PADDING;
        record.sampling_support = HOST_SUPPORTS_INTEGRAL_SAMPLING;
        record.input_rate = int_to_fixed(1);
        record.mask_rate = int_to_fixed(1);
        record.color_services = color_services_callback();
        record.in_layer_planes = layer;
        record.in_transparency_mask = transparency;
        record.in_non_layer_planes = non_layer;
        record.out_layer_planes = layer;
        record.out_transparency_mask = transparency;
        record.out_non_layer_planes = non_layer;
        record.abs_layer_planes = layer;
        record.abs_transparency_mask = transparency;
        record.abs_non_layer_planes = non_layer;

        record.image_services_procs = image_services;
        record.property_procs = property_procs;
        record.in_tile_height = tile_height;
        record.in_tile_width = tile_width;
        record.abs_tile_height = tile_height;
        record.abs_tile_width = tile_width;
        record.out_tile_height = tile_height;
        record.out_tile_width = tile_width;
        record.mask_tile_height = tile_height;
        record.mask_tile_width = tile_width;

        record.descriptor_parameters = descriptor_parameters;
        record.error_string = error_string;
        record.channel_port_procs = channel_ports;
        record.document_info = document_info;
        record.s_sp_basic = sp_basic;
        record.depth = mode.depth();
        record.big_document_data = big_document;
        record.buffer_space_64 = config.max_space;
        record.max_space_64 = config.max_space;
    }

    /// Puts saved parameter blocks, resources and scripting back in place.
    fn restore_settings(&mut self, settings: &FilterSettings) -> Result<(), HostError> {
        let GlobalParameters { parameters, plugin_data } = &settings.globals;
        if let Some(block) = parameters {
            let address = restore_block(&mut self.handles.borrow_mut(), &self.arena, block)
                .map_err(|_| HostError::OutOfMemory)?;
            self.record().parameters = address.cast::<pi_sdk::types::Ptr>();
        }
        if let Some(block) = plugin_data {
            let address = restore_block(&mut self.handles.borrow_mut(), &self.arena, block)
                .map_err(|_| HostError::OutOfMemory)?;
            self.data = address as isize;
        }
        if !settings.scripting.is_empty() {
            let descriptor = self.descriptors.borrow_mut().register(settings.scripting.clone());
            if descriptor.is_null() {
                return Err(HostError::OutOfMemory);
            }
            self.blocks.descriptor_parameters.descriptor = descriptor;
        }
        if settings != &FilterSettings::default() {
            tracing::debug!(
                scripting = settings.scripting.len(),
                resources = settings.resources.len(),
                "saved settings restored"
            );
        }
        Ok(())
    }

    fn bind(&self) -> SessionBindings {
        SessionBindings {
            _handles: HandleSuite::bind(&self.handles),
            _buffers: BufferSuite::bind(&self.buffers),
            _properties: PropertySuite::bind(&self.properties),
            _resources: ResourceSuite::bind(&self.resources),
            _descriptors: DescriptorSuite::bind(&self.descriptors),
            _colors: ColorServices::bind(&self.colors),
            _ports: ChannelPorts::bind(&self.ports),
            _pica: PicaSuites::bind(&self.pica),
            _hooks: HostHooks::bind(&self.hooks),
            _tiles: bind(&TILES, &self.tiles),
        }
    }

    /// Text the plugin left for `errReportString`.
    fn error_report(&mut self) -> Option<String> {
        if let Some(message) = self.pica.borrow_mut().take_error_message() {
            return Some(message);
        }
        let text = from_pascal_string(&self.blocks.error_string);
        (!text.is_empty()).then(|| String::from_utf8_lossy(text).into_owned())
    }

    /// Issues one selector.
    fn call(&mut self, selector: i16) -> Result<(), HostError> {
        let mut result: OSErr = NO_ERR;
        let record = self.record.0.as_ptr().cast::<c_void>();
        tracing::debug!(selector, "calling filter entry point");
        self.phases.push(selector);
        // SAFETY: the record, every block it points to and the bound suite
        // state stay alive across the call; the plugin contract requires the
        // entry point to only touch what the 8bf ABI describes.
        unsafe { (self.entry)(selector, record, &mut self.data, &mut result) };
        if result == NO_ERR {
            return Ok(());
        }
        let err = HostError::from_status(selector, result, self.error_report());
        tracing::debug!(selector, code = result, %err, "filter entry point failed");
        Err(err)
    }

    /// Runs the host side of `advanceState` between phases.
    fn advance(&mut self) -> Result<(), HostError> {
        let code = self.tiles.borrow_mut().advance();
        if code == NO_ERR {
            return Ok(());
        }
        Err(HostError::from_status(FILTER_SELECTOR_CONTINUE, code, None))
    }

    fn has_requests(&self) -> bool {
        // SAFETY: no plugin call is in progress.
        let (in_rect, out_rect, mask_rect) = requested_rects(unsafe { self.record.0.as_ref() });
        !(in_rect.is_empty() && out_rect.is_empty() && mask_rect.is_empty())
    }

    /// `Start`, the `Continue` loop and the flush after it.
    fn apply(&mut self) -> Result<(), HostError> {
        self.call(FILTER_SELECTOR_START)?;
        loop {
            self.advance()?;
            if !self.has_requests() {
                return Ok(());
            }
            if self.hooks.borrow().aborted() {
                return Err(HostError::UserCanceled);
            }
            self.call(FILTER_SELECTOR_CONTINUE)?;
        }
    }

    fn execute(&mut self) -> Result<(), HostError> {
        if self.show_ui {
            self.call(FILTER_SELECTOR_PARAMETERS)?;
        }
        self.call(FILTER_SELECTOR_PREPARE)?;
        if let Err(err) = self.apply() {
            if let Err(finish) = self.call(FILTER_SELECTOR_FINISH) {
                tracing::warn!(%finish, "finish failed after an earlier error");
            }
            return Err(err);
        }
        self.call(FILTER_SELECTOR_FINISH)
    }

    /// Parameters, settings and scripting data a later run can replay.
    fn capture_settings(&mut self) -> FilterSettings {
        let parameters = self.record().parameters.cast::<u8>();
        let descriptor: Handle = self.blocks.descriptor_parameters.descriptor;
        let handles = self.handles.borrow();
        let globals = GlobalParameters {
            parameters: capture_block(&handles, &self.arena, parameters),
            plugin_data: capture_block(&handles, &self.arena, self.data as *mut u8),
        };
        let mut scripting = match &self.plugin.aete {
            Some(_) => self
                .descriptors
                .borrow()
                .entries(descriptor)
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        if let Some(aete) = &self.plugin.aete {
            let keys = aete.parameter_keys();
            if !keys.is_empty() {
                scripting.retain(|entry| keys.contains(&entry.key));
            }
        }
        FilterSettings {
            scripting,
            resources: self.resources.borrow().resources().to_vec(),
            globals,
        }
    }

    fn post_process(&self, destination: &mut Surface) {
        let info = self.layout.info;
        if self.layout.is_editable_transparency() && info.output_handling == FILTER_DATA_HANDLING_FILL_MASK {
            fill_mask(destination, self.mask.as_ref().and_then(|mask| mask.mask_bounds()));
        }
        if let Some(mask) = &self.mask {
            if !info.writes_outside_selection() {
                clip_to_selection(destination, &self.original, mask);
            }
        }
    }

    /// Runs the phase sequence and returns the filtered image.
    pub fn run(mut self) -> Result<FilterOutcome, HostError> {
        let bindings = self.bind();
        let result = self.execute();
        let settings = match &result {
            Ok(()) if self.show_ui => Some(self.capture_settings()),
            _ => None,
        };
        drop(bindings);
        result?;

        let mut destination = self.tiles.borrow_mut().buffers.take_destination();
        self.post_process(&mut destination);
        tracing::debug!(
            peak_bytes = self.arena.peak_bytes(),
            live_blocks = self.arena.live_blocks(),
            "filter memory"
        );
        Ok(FilterOutcome {
            destination,
            settings,
            phases: std::mem::take(&mut self.phases),
        })
    }
}

/// Calls the About selector with a minimal `AboutRecord`.
pub(crate) fn show_about(module: &PluginModule, callbacks: &HostCallbacks) -> Result<(), HostError> {
    let arena = Rc::new(NativeArena::new());
    let handles = Rc::new(RefCell::new(HandleSuite::new(arena.clone())));
    let buffers = Rc::new(RefCell::new(BufferSuite::new(arena.clone(), HostConfig::default().max_space)));
    let hooks = Rc::new(RefCell::new(HostHooks::new(
        AbortSignal::new(),
        callbacks.progress.clone(),
        callbacks.display.clone(),
    )));
    let pica = Rc::new(RefCell::new(PicaSuites::new(arena.clone(), HostHooks::ui_hooks(), true)));
    let _handles = HandleSuite::bind(&handles);
    let _buffers = BufferSuite::bind(&buffers);
    let _hooks = HostHooks::bind(&hooks);
    let _pica = PicaSuites::bind(&pica);

    let mut sp_basic = PicaSuites::create_sp_basic_suite();
    let mut platform = Box::new(PlatformData { hwnd: 0 });
    let mut about = AboutRecord {
        platform_data: (&mut *platform as *mut PlatformData).cast(),
        s_sp_basic: &mut *sp_basic,
        plug_in_ref: ptr::null_mut(),
        reserved: [0; 244],
    };
    let mut data: isize = 0;
    let mut result: OSErr = NO_ERR;
    tracing::debug!(entry = module.entry_name(), "calling about");
    // SAFETY: the about record and the suites it reaches live until the call
    // returns; the entry point follows the 8bf ABI per the loader's contract.
    unsafe {
        (module.entry())(
            FILTER_SELECTOR_ABOUT,
            (&mut about as *mut AboutRecord).cast(),
            &mut data,
            &mut result,
        )
    };
    if result == NO_ERR {
        return Ok(());
    }
    let report = pica.borrow_mut().take_error_message();
    Err(HostError::from_status(FILTER_SELECTOR_ABOUT, result, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static CALLS: Mutex<Vec<i16>> = Mutex::new(Vec::new());

    /// Requests the whole image once, then writes 7 into every plane.
    unsafe extern "C" fn fill_sevens(selector: i16, block: *mut c_void, _data: *mut isize, result: *mut i16) {
        // SAFETY: the host passes a `FilterRecord` for every selector but About.
        let record = unsafe { &mut *block.cast::<FilterRecord>() };
        unsafe { *result = NO_ERR };
        match selector {
            FILTER_SELECTOR_START => {
                record.in_rect = record.filter_rect;
                record.out_rect = record.filter_rect;
                record.out_lo_plane = 0;
                record.out_hi_plane = record.planes - 1;
            }
            FILTER_SELECTOR_CONTINUE => {
                let len = record.out_row_bytes as usize * record.out_rect.bottom as usize;
                // SAFETY: the host filled an output tile of this size.
                unsafe { std::slice::from_raw_parts_mut(record.out_data.cast::<u8>(), len).fill(7) };
                record.in_rect = Default::default();
                record.out_rect = Default::default();
            }
            _ => {}
        }
    }

    unsafe extern "C" fn recording(selector: i16, _block: *mut c_void, _data: *mut isize, result: *mut i16) {
        CALLS.lock().unwrap().push(selector);
        // SAFETY: out pointer from the host.
        unsafe { *result = if selector == FILTER_SELECTOR_START { -108 } else { NO_ERR } };
    }

    fn run(entry: PluginEntryPoint, request: FilterRequest) -> Result<FilterOutcome, HostError> {
        let module = PluginModule::from_entry_point("Test", entry);
        let plugin = PluginData::new("test.8bf", "Test");
        let session = FilterSession::new(
            &module,
            &plugin,
            request,
            &HostConfig::default(),
            &HostCallbacks::default(),
            &AbortSignal::new(),
        )?;
        session.run()
    }

    #[test]
    fn single_tile_run_writes_the_destination() {
        let mut source = Surface::for_mode(ImageMode::Gray, 3, 2);
        source.data_mut().fill(1);
        let outcome = run(fill_sevens, FilterRequest::new(source, ImageMode::Gray)).unwrap();
        assert!(outcome.destination.data().iter().all(|&b| b == 7));
        assert_eq!(
            outcome.phases,
            [FILTER_SELECTOR_PREPARE, FILTER_SELECTOR_START, FILTER_SELECTOR_CONTINUE, FILTER_SELECTOR_FINISH]
        );
        assert!(outcome.settings.is_none());
    }

    #[test]
    fn start_failure_still_finishes() {
        CALLS.lock().unwrap().clear();
        let source = Surface::for_mode(ImageMode::Gray, 2, 2);
        let err = run(recording, FilterRequest::new(source, ImageMode::Gray)).unwrap_err();
        assert!(matches!(err, HostError::OutOfMemory));
        assert_eq!(
            CALLS.lock().unwrap().as_slice(),
            &[FILTER_SELECTOR_PREPARE, FILTER_SELECTOR_START, FILTER_SELECTOR_FINISH]
        );
    }

    #[test]
    fn tile_extent_fits_the_record_field() {
        assert_eq!(tile_extent(256, 100), 100);
        assert_eq!(tile_extent(256, 4000), 256);
        assert_eq!(tile_extent(u16::MAX, 40_000), i16::MAX);
        assert_eq!(tile_extent(u16::MAX, 1000), 1000);
    }

    #[test]
    fn empty_selection_is_rejected_before_any_call() {
        let source = Surface::for_mode(ImageMode::Gray, 2, 2);
        let request = FilterRequest::new(source, ImageMode::Gray).with_selection(Surface::new_mask(2, 2));
        assert!(matches!(run(fill_sevens, request), Err(HostError::InvalidRequest(_))));
    }

    #[test]
    fn blank_layers_need_the_blank_data_flag() {
        let source = Surface::for_mode(ImageMode::Rgb, 2, 2);
        assert!(source.is_blank());
        assert!(matches!(
            run(fill_sevens, FilterRequest::new(source, ImageMode::Rgb)),
            Err(HostError::BlankImageUnsupported)
        ));
    }

    #[test]
    fn colors_are_reported_in_the_image_space() {
        assert_eq!(filter_color(ImageMode::Rgb, [1, 2, 3]), [1, 2, 3, 0]);
        assert_eq!(filter_color(ImageMode::Gray, [255, 255, 255])[0], 255);
        assert_eq!(channel_names(ImageMode::Rgb, true).len(), 4);
    }
}
