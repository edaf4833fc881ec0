//! GStreamer implementation of [`DecodeBackend`].
//!
//! Graph: `appsrc ! h264parse ! <decoder> ! queue ! <sink>`. When the decoder is
//! `decodebin` the parser is left out and decodebin's dynamic source pad is
//! linked to the queue when it appears.
//!
//! Pushed buffers wrap the pooled memory directly; GStreamer returns it to the
//! pipeline's pool when it drops the buffer.

use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use tracing::{debug, info, warn};

use crate::core::buffer_pool::{BufferPool, PooledBuffer};
use crate::error::{ElementRole, StreamError, StreamResult};
use crate::pipeline::backend::{
    BackendContext, BusCallback, BusEvent, BusLevel, DecodeBackend, FlowResult, PushRejected,
    WindowHandle,
};

const H264_CAPS: &str = "video/x-h264,stream-format=byte-stream,alignment=nal";

/// Pooled memory lent to a `gst::Buffer`.
struct ReturnToPool {
    buffer: Option<PooledBuffer>,
    pool: Arc<BufferPool>,
}

impl AsMut<[u8]> for ReturnToPool {
    fn as_mut(&mut self) -> &mut [u8] {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.as_mut_slice(),
            None => &mut [],
        }
    }
}

impl Drop for ReturnToPool {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

#[derive(Default)]
pub struct GstBackend {
    pipeline: Option<gst::Pipeline>,
    appsrc: Option<gst_app::AppSrc>,
    parser: Option<gst::Element>,
    queue: Option<gst::Element>,
    decoder: Option<(String, gst::Element)>,
    sink: Option<gst::Element>,
    pool: Option<Arc<BufferPool>>,
}

impl GstBackend {
    /// Initialize GStreamer and pick up plugin directories from the environment.
    pub fn new() -> StreamResult<Self> {
        gst::init()?;
        scan_plugin_paths();
        info!(version = %gst::version_string(), "GStreamer initialized");
        Ok(Self::default())
    }

    fn make(role: ElementRole, factory: &str, name: &str) -> StreamResult<gst::Element> {
        gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map_err(|err| StreamError::element(role, factory, err.to_string()))
    }

    fn tune_decoder(name: &str, decoder: &gst::Element) {
        match name {
            "avdec_h264" => {
                let threads = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                set_if_present(decoder, "max-threads", &threads.to_string());
            }
            "nvh264dec" | "nvdec" => info!("Hardware acceleration enabled (NVIDIA)"),
            "d3d11h264dec" => info!("Hardware acceleration enabled (Direct3D 11)"),
            "msdkh264dec" => info!("Hardware acceleration enabled (Intel Quick Sync)"),
            "vaapih264dec" => info!("Hardware acceleration enabled (VA-API)"),
            "vtdec_h264" => info!("Hardware acceleration enabled (VideoToolbox)"),
            "decodebin" => info!("Using automatic decoder selection"),
            _ => {}
        }
    }

    fn tune_sink(name: &str, sink: &gst::Element) {
        set_if_present(sink, "sync", "false");
        set_if_present(sink, "async", "false");
        if name.ends_with("imagesink") {
            set_if_present(sink, "force-aspect-ratio", "true");
        }
    }

    fn overlay(&self) -> Option<gst_video::VideoOverlay> {
        let sink = self.sink.as_ref()?;
        if let Ok(overlay) = sink.clone().dynamic_cast::<gst_video::VideoOverlay>() {
            return Some(overlay);
        }
        // autovideosink is a bin; the real sink is a child.
        sink.downcast_ref::<gst::Bin>()?
            .by_interface(gst_video::VideoOverlay::static_type())?
            .dynamic_cast::<gst_video::VideoOverlay>()
            .ok()
    }
}

impl DecodeBackend for GstBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn prepare(&mut self, context: &BackendContext) -> StreamResult<()> {
        let pipeline = gst::Pipeline::with_name("frame-ingest");

        let appsrc = Self::make(ElementRole::Plumbing, "appsrc", "src")?
            .dynamic_cast::<gst_app::AppSrc>()
            .map_err(|_| StreamError::element(ElementRole::Plumbing, "appsrc", "not an AppSrc"))?;
        let caps = H264_CAPS
            .parse::<gst::Caps>()
            .map_err(|err| StreamError::element(ElementRole::Plumbing, "appsrc", err.to_string()))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);
        appsrc.set_max_bytes(0);
        appsrc.set_block(false);
        set_if_present(appsrc.upcast_ref(), "min-latency", "0");
        set_if_present(appsrc.upcast_ref(), "max-latency", "0");

        let parser = Self::make(ElementRole::Plumbing, "h264parse", "parser")?;
        set_if_present(&parser, "config-interval", "1");

        let queue = Self::make(ElementRole::Plumbing, "queue", "queue")?;
        set_if_present(&queue, "leaky", "downstream");
        set_if_present(&queue, "max-size-buffers", &context.limits.max_buffers.to_string());
        set_if_present(
            &queue,
            "max-size-time",
            &(context.limits.max_time.as_nanos() as u64).to_string(),
        );
        set_if_present(&queue, "max-size-bytes", &context.limits.max_bytes.to_string());

        pipeline
            .add_many([appsrc.upcast_ref::<gst::Element>(), &parser, &queue])
            .map_err(|err| StreamError::backend_start(err.to_string()))?;

        self.pipeline = Some(pipeline);
        self.appsrc = Some(appsrc);
        self.parser = Some(parser);
        self.queue = Some(queue);
        self.pool = Some(Arc::clone(&context.pool));
        Ok(())
    }

    fn create_element(&mut self, role: ElementRole, name: &str) -> StreamResult<()> {
        match role {
            ElementRole::Decoder => {
                let decoder = Self::make(role, name, "decoder")?;
                Self::tune_decoder(name, &decoder);
                self.decoder = Some((name.to_string(), decoder));
            }
            ElementRole::Sink => {
                let sink = Self::make(role, name, "videosink")?;
                Self::tune_sink(name, &sink);
                self.sink = Some(sink);
            }
            ElementRole::Plumbing => {
                return Err(StreamError::element(role, name, "plumbing is created by prepare"));
            }
        }
        Ok(())
    }

    fn start(&mut self, bus: BusCallback) -> StreamResult<()> {
        let (Some(pipeline), Some(appsrc), Some(parser), Some(queue), Some((decoder_name, decoder)), Some(sink)) = (
            self.pipeline.as_ref(),
            self.appsrc.as_ref(),
            self.parser.as_ref(),
            self.queue.as_ref(),
            self.decoder.as_ref(),
            self.sink.as_ref(),
        ) else {
            return Err(StreamError::backend_start("graph incomplete"));
        };
        let link_error = |err: gst::glib::BoolError| StreamError::backend_start(err.to_string());

        pipeline.add_many([decoder, sink]).map_err(link_error)?;

        if decoder_name == "decodebin" {
            pipeline.remove(parser).map_err(link_error)?;
            appsrc.link(decoder).map_err(link_error)?;
            let queue_weak = queue.downgrade();
            decoder.connect_pad_added(move |_, pad| {
                let Some(queue) = queue_weak.upgrade() else {
                    return;
                };
                if !pad.name().starts_with("src") {
                    return;
                }
                let Some(sink_pad) = queue.static_pad("sink") else {
                    return;
                };
                if sink_pad.is_linked() {
                    return;
                }
                match pad.link(&sink_pad) {
                    Ok(_) => debug!("Linked decoder to queue"),
                    Err(err) => warn!(error = ?err, "failed to link decodebin pad"),
                }
            });
        } else {
            gst::Element::link_many([appsrc.upcast_ref::<gst::Element>(), parser, decoder, queue])
                .map_err(link_error)?;
        }
        queue.link(sink).map_err(link_error)?;

        if let Some(bus_handle) = pipeline.bus() {
            bus_handle.set_sync_handler(move |_, message| {
                let source = message
                    .src()
                    .map(|src| src.path_string().to_string())
                    .unwrap_or_default();
                match message.view() {
                    gst::MessageView::Error(err) => bus(BusEvent {
                        level: BusLevel::Error,
                        source,
                        message: err.error().to_string(),
                        debug: err.debug().map(|d| d.to_string()),
                    }),
                    gst::MessageView::Warning(warning) => bus(BusEvent {
                        level: BusLevel::Warning,
                        source,
                        message: warning.error().to_string(),
                        debug: warning.debug().map(|d| d.to_string()),
                    }),
                    _ => {}
                }
                gst::BusSyncReply::Drop
            });
        }

        pipeline.set_latency(gst::ClockTime::ZERO);
        pipeline.set_delay(gst::ClockTime::ZERO);

        match pipeline.set_state(gst::State::Playing)? {
            gst::StateChangeSuccess::NoPreroll => {
                info!("GStreamer pipeline started (live source, no preroll)")
            }
            _ => info!("GStreamer pipeline started"),
        }
        Ok(())
    }

    fn push(&mut self, buffer: PooledBuffer) -> Result<FlowResult, PushRejected> {
        let (Some(appsrc), Some(pool)) = (self.appsrc.as_ref(), self.pool.as_ref()) else {
            return Err(PushRejected::new(buffer, "pipeline not prepared"));
        };
        let memory = ReturnToPool {
            buffer: Some(buffer),
            pool: Arc::clone(pool),
        };
        match appsrc.push_buffer(gst::Buffer::from_mut_slice(memory)) {
            Ok(_) => Ok(FlowResult::Ok),
            Err(gst::FlowError::Flushing) => Ok(FlowResult::Flushing),
            Err(err) => Ok(FlowResult::Error(format!("{err:?}"))),
        }
    }

    fn bind_window_handle(&mut self, handle: WindowHandle) -> StreamResult<()> {
        let overlay = self.overlay().ok_or_else(|| {
            StreamError::element(ElementRole::Sink, "videosink", "sink has no video overlay")
        })?;
        let raw = usize::try_from(handle.0)
            .map_err(|_| StreamError::element(ElementRole::Sink, "videosink", "window handle out of range"))?;
        // SAFETY: the handle comes from the render surface, which owns the native
        // window for as long as the pipeline runs.
        unsafe { overlay.set_window_handle(raw) };
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Some(bus) = pipeline.bus() {
                bus.unset_sync_handler();
            }
            if let Err(err) = pipeline.set_state(gst::State::Null) {
                warn!(error = %err, "failed to stop GStreamer pipeline");
            }
        }
        self.appsrc = None;
        self.parser = None;
        self.queue = None;
        self.decoder = None;
        self.sink = None;
        self.pool = None;
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn set_if_present(element: &gst::Element, property: &str, value: &str) {
    if element.find_property(property).is_some() {
        element.set_property_from_str(property, value);
    } else {
        debug!(element = %element.name(), property, "property not supported");
    }
}

/// Register plugin directories listed in `GST_PLUGIN_PATH_1_0` or `GST_PLUGIN_PATH`.
fn scan_plugin_paths() {
    let Some(paths) =
        std::env::var_os("GST_PLUGIN_PATH_1_0").or_else(|| std::env::var_os("GST_PLUGIN_PATH"))
    else {
        return;
    };
    let registry = gst::Registry::get();
    for dir in std::env::split_paths(&paths) {
        if registry.scan_path(&dir) {
            info!(path = %dir.display(), "registered GStreamer plugins");
        }
    }
}
