//! Direct surface allocator: one surface per buffer, CPU access through
//! derived images or image copies.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};
use va_core::driver::{Image, SurfaceId, SurfaceRequest, UsageHint};
use va_core::error::{VaError, VaResult};
use va_core::format::{surface_format_for, ChromaFormat, Fourcc, VideoFormat};
use va_core::video::VideoInfo;

use super::queue::{AvailableQueue, WaitMode};
use crate::buffer::Buffer;
use crate::display::Display;
use crate::memory::surface::{MemoryFormat, VaMemory};
use crate::memory::Memory;
use crate::shared::{destroy_surface, LiveSurfaces};

/// The committed format and what was learned while probing it.
#[derive(Debug, Clone)]
struct Negotiated {
    info: VideoInfo,
    usage_hint: UsageHint,
    surface_format: Option<VideoFormat>,
    fourcc: Option<Fourcc>,
    chroma: ChromaFormat,
    use_derived: bool,
}

impl Negotiated {
    fn matches(&self, info: &VideoInfo, usage_hint: UsageHint) -> bool {
        self.info.format == info.format
            && self.info.width == info.width
            && self.info.height == info.height
            && self.usage_hint == usage_hint
    }

    fn request(&self) -> SurfaceRequest {
        SurfaceRequest {
            chroma: self.chroma,
            fourcc: self.fourcc,
            width: self.info.width,
            height: self.info.height,
            usage_hint: self.usage_hint,
            external: None,
        }
    }
}

fn describe(info: &VideoInfo, usage_hint: UsageHint) -> String {
    format!("{} {}x{} {:?}", info.format, info.width, info.height, usage_hint)
}

pub(crate) struct SurfaceCore {
    pub(crate) display: Display,
    pub(crate) available: AvailableQueue<VaMemory>,
    pub(crate) live: LiveSurfaces,
    surface_formats: Vec<VideoFormat>,
    negotiated: RwLock<Option<Negotiated>>,
}

/// Allocator of plain surfaces.
///
/// `set_format` commits one format; the commitment holds while any surface
/// created under it is alive, and is re-probed only once all are gone.
pub struct SurfaceAllocator {
    core: Arc<SurfaceCore>,
}

impl SurfaceAllocator {
    /// `surface_formats` lists the formats the decoder can write, in
    /// preference order.
    #[must_use]
    pub fn new(display: Display, surface_formats: Vec<VideoFormat>) -> Self {
        Self {
            core: Arc::new(SurfaceCore {
                display,
                available: AvailableQueue::new(|a: &VaMemory, b: &VaMemory| {
                    a.surface() == b.surface()
                }),
                live: LiveSurfaces::default(),
                surface_formats,
                negotiated: RwLock::new(None),
            }),
        }
    }

    /// Device the surfaces come from.
    #[must_use]
    pub fn display(&self) -> &Display {
        &self.core.display
    }

    /// Commit `info` as the allocation format.
    ///
    /// Returns the info with the driver's real strides, offsets and size.
    /// While surfaces are outstanding an identical request echoes the
    /// committed info and any other fails with [`VaError::FormatLocked`].
    pub fn set_format(&self, info: &VideoInfo, usage_hint: UsageHint) -> VaResult<VideoInfo> {
        let mut negotiated = self.core.negotiated.write();

        let live = self.core.live.get();
        if live > 0 {
            return match negotiated.as_ref() {
                Some(committed) if committed.matches(info, usage_hint) => {
                    Ok(committed.info.clone())
                }
                committed => {
                    let committed = committed
                        .map(|c| describe(&c.info, c.usage_hint))
                        .unwrap_or_else(|| "nothing".to_string());
                    let requested = describe(info, usage_hint);
                    warn!(%committed, %requested, live, "Format change refused");
                    Err(VaError::FormatLocked {
                        committed,
                        requested,
                        live,
                    })
                }
            };
        }

        let committed = self.negotiate(info, usage_hint)?;
        let out = committed.info.clone();
        *negotiated = Some(committed);
        Ok(out)
    }

    fn negotiate(&self, info: &VideoInfo, usage_hint: UsageHint) -> VaResult<Negotiated> {
        let image_format = info.format;
        let surface_format = surface_format_for(image_format, &self.core.surface_formats);
        let (fourcc, chroma) = match surface_format {
            Some(format) => (format.fourcc(), format.chroma()),
            None => (None, image_format.chroma()),
        };
        let chroma = chroma.ok_or_else(|| {
            error!(format = %image_format, "Unsupported format");
            VaError::UnsupportedFormat(image_format)
        })?;

        let mut negotiated = Negotiated {
            info: info.clone(),
            usage_hint,
            surface_format,
            fourcc,
            chroma,
            use_derived: false,
        };

        let display = &self.core.display;
        let probe = display.create_surface(&negotiated.request())?;
        let probed = self.probe_image(probe, image_format, surface_format, info);
        let (image, use_derived) = match probed {
            Ok(probed) => probed,
            Err(err) => {
                destroy_surface(display, probe);
                return Err(err);
            }
        };

        negotiated.info.set_layout(&image.layout());
        negotiated.use_derived = use_derived;

        if let Err(err) = display.destroy_image(image.id) {
            warn!(%err, "Failed to destroy probe image");
        }
        destroy_surface(display, probe);

        info!(
            format = %image_format,
            surface_format = ?surface_format,
            width = info.width,
            height = info.height,
            size = negotiated.info.size,
            derived = use_derived,
            "Negotiated surface format"
        );
        Ok(negotiated)
    }

    /// Image describing the real layout; derived when the surface already
    /// holds the requested format.
    fn probe_image(
        &self,
        probe: SurfaceId,
        image_format: VideoFormat,
        surface_format: Option<VideoFormat>,
        info: &VideoInfo,
    ) -> VaResult<(Image, bool)> {
        let display = &self.core.display;
        if surface_format == Some(image_format) {
            match display.derive_image(probe) {
                Ok(image) => return Ok((image, true)),
                Err(err) => debug!(%err, "Derive unavailable, mapping through copies"),
            }
        }
        let image = display.create_image(image_format, info.width, info.height)?;
        Ok((image, false))
    }

    /// Committed info and usage hint.
    #[must_use]
    pub fn format(&self) -> Option<(VideoInfo, UsageHint)> {
        self.core
            .negotiated
            .read()
            .as_ref()
            .map(|n| (n.info.clone(), n.usage_hint))
    }

    /// Whether CPU mappings alias surface storage, once negotiated.
    #[must_use]
    pub fn uses_derived_images(&self) -> Option<bool> {
        self.core.negotiated.read().as_ref().map(|n| n.use_derived)
    }

    /// Create one surface in the committed format.
    pub fn alloc(&self) -> VaResult<VaMemory> {
        let negotiated = self.core.negotiated.read();
        let committed = negotiated.as_ref().ok_or(VaError::NotNegotiated)?;
        let surface = self.core.display.create_surface(&committed.request())?;
        self.core.live.increment();
        trace!(%surface, live = self.core.live.get(), "Allocated surface");
        Ok(VaMemory::new(
            Arc::clone(&self.core),
            surface,
            MemoryFormat {
                image_format: committed.info.format,
                width: committed.info.width,
                height: committed.info.height,
                size: committed.info.size,
                use_derived: committed.use_derived,
            },
        ))
    }

    /// Fill an empty buffer with a fresh surface.
    pub fn setup_buffer(&self, buffer: &mut Buffer) -> VaResult<()> {
        let memory = self.alloc()?;
        buffer.append_memory(Memory::Surface(memory));
        Ok(())
    }

    /// Fill an empty buffer with a recycled surface.
    pub fn prepare_buffer(&self, buffer: &mut Buffer, mode: WaitMode) -> VaResult<()> {
        let group = self.core.available.pop_group(mode)?;
        for memory in group {
            trace!(surface = %memory.surface(), "Reusing surface");
            buffer.append_memory(Memory::Surface(memory));
        }
        Ok(())
    }

    /// Destroy every recycled surface and wake blocked `prepare_buffer`
    /// calls.
    pub fn flush(&self) {
        let drained = self.core.available.drain();
        let count = drained.len();
        drop(drained);
        debug!(destroyed = count, live = self.core.live.get(), "Flushed surfaces");
    }

    /// Surfaces alive under the committed format.
    #[must_use]
    pub fn surface_count(&self) -> usize {
        self.core.live.get()
    }

    pub(crate) fn available_groups(&self) -> usize {
        self.core.available.groups()
    }
}

impl Drop for SurfaceAllocator {
    fn drop(&mut self) {
        drop(self.core.available.close());
        let live = self.core.live.get();
        if live > 0 {
            debug!(live, "Allocator dropped with surfaces in use");
        }
    }
}

impl fmt::Debug for SurfaceAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceAllocator")
            .field("display", &self.core.display)
            .field("live", &self.core.live)
            .field("negotiated", &*self.core.negotiated.read())
            .finish()
    }
}
