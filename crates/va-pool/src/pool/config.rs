//! Pool configuration.

use va_core::config::PoolSettings;
use va_core::driver::UsageHint;
use va_core::video::{VideoAlignment, VideoInfo};

/// Buffer policy and geometry for a [`VaPool`](super::VaPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Caps-level geometry.
    pub info: VideoInfo,
    /// Buffers preallocated by `start`.
    pub min_buffers: u32,
    /// Upper bound on buffers in existence, 0 for unbounded.
    pub max_buffers: u32,
    /// Usage hint passed to the allocator.
    pub usage_hint: UsageHint,
    /// Attach [`VideoMeta`](crate::VideoMeta) to every buffer.
    pub video_meta: bool,
    /// Extra padding and stride masks. After `set_config` the masks reflect
    /// the driver's real stride alignment.
    pub alignment: Option<VideoAlignment>,
}

impl PoolConfig {
    /// Unbounded pool for `info` with nothing preallocated.
    #[must_use]
    pub fn new(info: VideoInfo) -> Self {
        Self {
            info,
            min_buffers: 0,
            max_buffers: 0,
            usage_hint: UsageHint::Generic,
            video_meta: false,
            alignment: None,
        }
    }

    /// Policy from the settings file, geometry from `info`.
    #[must_use]
    pub fn from_settings(settings: &PoolSettings, info: VideoInfo) -> Self {
        Self {
            info,
            min_buffers: settings.min_buffers,
            max_buffers: settings.max_buffers,
            usage_hint: settings.usage_hint,
            video_meta: settings.video_meta,
            alignment: settings.alignment,
        }
    }

    /// Set the preallocated and maximum buffer counts.
    #[must_use]
    pub fn with_buffers(mut self, min_buffers: u32, max_buffers: u32) -> Self {
        self.min_buffers = min_buffers;
        self.max_buffers = max_buffers;
        self
    }

    /// Set the usage hint.
    #[must_use]
    pub fn with_usage_hint(mut self, usage_hint: UsageHint) -> Self {
        self.usage_hint = usage_hint;
        self
    }

    /// Always attach video meta.
    #[must_use]
    pub fn with_video_meta(mut self, video_meta: bool) -> Self {
        self.video_meta = video_meta;
        self
    }

    /// Request padding and stride masks.
    #[must_use]
    pub fn with_alignment(mut self, alignment: VideoAlignment) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub(crate) fn is_bounded(&self) -> bool {
        self.max_buffers > 0
    }
}

/// Options for one acquire call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireParams {
    /// Fail with `WouldBlock` instead of waiting.
    pub dont_wait: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_core::config::Settings;
    use va_core::format::VideoFormat;

    #[test]
    fn test_from_settings() {
        let mut settings = Settings::default();
        settings.pool.video_meta = true;
        settings.pool.usage_hint = UsageHint::Decoder;
        let info = VideoInfo::new(VideoFormat::Nv12, 320, 240).unwrap();

        let config = PoolConfig::from_settings(&settings.pool, info.clone());
        assert_eq!(config.info, info);
        assert_eq!((config.min_buffers, config.max_buffers), (4, 16));
        assert_eq!(config.usage_hint, UsageHint::Decoder);
        assert!(config.video_meta);
        assert!(config.is_bounded());
        assert!(!PoolConfig::new(info).is_bounded());
    }
}
