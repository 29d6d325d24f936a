//! QuickTime writer on a GStreamer `appsrc ! encoder ! qtmux` pipeline.

use super::settings::{HevcProfile, VideoCodec};
use super::writer::{AssetWriter, Track, WriterConfig, WriterFactory};
use crate::error::WriterError;
use crate::frame::{AudioFrame, FrameData, PixelFormat, Rotation};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use gstreamer_video::{VideoFormat, VideoInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Frames the video input may hold before reporting busy
const VIDEO_QUEUE_FRAMES: u64 = 8;
/// Bytes the audio input may hold before reporting busy (about one second)
const AUDIO_QUEUE_BYTES: u64 = 48_000 * 2 * 2;

/// Creates GStreamer-backed writers
#[derive(Debug, Clone, Copy, Default)]
pub struct GstWriterFactory;

impl GstWriterFactory {
    pub fn new() -> Result<Self, WriterError> {
        gstreamer::init().map_err(|e| WriterError::Create {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;
        Ok(Self)
    }
}

fn video_format(format: PixelFormat) -> VideoFormat {
    match format {
        PixelFormat::Rgb24 => VideoFormat::Rgb,
        PixelFormat::Rgba32 => VideoFormat::Rgba,
        PixelFormat::Bgra32 => VideoFormat::Bgra,
        PixelFormat::Yuyv => VideoFormat::Yuy2,
        PixelFormat::Nv12 => VideoFormat::Nv12,
    }
}

fn orientation_tag(rotation: Rotation) -> &'static str {
    match rotation {
        Rotation::Rotate0 => "rotate-0",
        Rotation::Rotate90 => "rotate-90",
        Rotation::Rotate180 => "rotate-180",
        Rotation::Rotate270 => "rotate-270",
    }
}

fn encoder_description(config: &WriterConfig) -> String {
    let video = &config.video;
    match video.codec {
        VideoCodec::Hevc => {
            let (raw, profile) = match video.profile {
                Some(HevcProfile::Main10) => ("I420_10LE", "main-10"),
                _ => ("I420", "main"),
            };
            let kbps = video.bitrate.unwrap_or(20_000_000) / 1000;
            format!(
                "video/x-raw,format={} ! x265enc bitrate={} speed-preset=fast ! \
                 video/x-h265,profile={} ! h265parse",
                raw, kbps, profile
            )
        }
        VideoCodec::ProRes422 => {
            "video/x-raw,format=I422_10LE ! avenc_prores_ks profile=2".to_string()
        }
        VideoCodec::ProRes422Hq => {
            "video/x-raw,format=I422_10LE ! avenc_prores_ks profile=3".to_string()
        }
    }
}

fn pipeline_description(config: &WriterConfig) -> String {
    let (num, den) = config.video.frame_rate.frame_duration_rational();
    let mut desc = format!(
        "appsrc name=video format=time is-live=true do-timestamp=false ! \
         videoconvert ! {} ! queue ! mux.video_0 \
         qtmux name=mux ! filesink location=\"{}\"",
        encoder_description(config),
        config.path.to_string_lossy()
    );
    if let Some(audio) = &config.audio {
        desc.push_str(&format!(
            " appsrc name=audio format=time is-live=true do-timestamp=false \
             caps=audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={} ! \
             queue ! mux.audio_0",
            audio.sample_rate, audio.channels
        ));
    }
    debug!("Writer pipeline ({}/{} s per frame): {}", num, den, desc);
    desc
}

fn app_source(pipeline: &Pipeline, name: &str) -> Result<AppSrc, WriterError> {
    pipeline
        .by_name(name)
        .ok_or_else(|| WriterError::Create {
            details: format!("pipeline has no '{}' source", name),
        })?
        .downcast::<AppSrc>()
        .map_err(|_| WriterError::Create {
            details: format!("'{}' is not an appsrc", name),
        })
}

impl WriterFactory for GstWriterFactory {
    fn create(&self, config: &WriterConfig) -> Result<Box<dyn AssetWriter>, WriterError> {
        let pipeline = gstreamer::parse::launch(&pipeline_description(config))
            .map_err(|e| WriterError::Create {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| WriterError::Create {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let video = app_source(&pipeline, "video")?;
        let audio = match config.audio {
            Some(_) => {
                let audio = app_source(&pipeline, "audio")?;
                audio.set_max_bytes(AUDIO_QUEUE_BYTES);
                Some(audio)
            }
            None => None,
        };

        Ok(Box::new(GstAssetWriter {
            config: config.clone(),
            pipeline,
            video,
            audio,
            origin: None,
            caps_set: false,
        }))
    }

    fn name(&self) -> &'static str {
        "gstreamer"
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

struct GstAssetWriter {
    config: WriterConfig,
    pipeline: Pipeline,
    video: AppSrc,
    audio: Option<AppSrc>,
    origin: Option<Duration>,
    caps_set: bool,
}

impl GstAssetWriter {
    fn relative(&self, pts: Duration) -> gstreamer::ClockTime {
        let origin = self.origin.unwrap_or(Duration::ZERO);
        gstreamer::ClockTime::from_nseconds(pts.saturating_sub(origin).as_nanos() as u64)
    }

    fn set_video_caps(&mut self, frame: &FrameData) -> Result<(), WriterError> {
        let (num, den) = self.config.video.frame_rate.frame_duration_rational();
        let caps = VideoInfo::builder(video_format(frame.format), frame.width, frame.height)
            .fps(gstreamer::Fraction::new(den as i32, num as i32))
            .build()
            .and_then(|info| info.to_caps())
            .map_err(|e| WriterError::Append {
                track: Track::Video.to_string(),
                details: format!("Unsupported video caps: {}", e),
            })?;
        self.video.set_caps(Some(&caps));
        self.video
            .set_max_bytes(frame.data.len() as u64 * VIDEO_QUEUE_FRAMES);
        self.caps_set = true;
        Ok(())
    }

    fn push(
        source: &AppSrc,
        track: Track,
        mut buffer: gstreamer::Buffer,
        pts: gstreamer::ClockTime,
        duration: Duration,
    ) -> Result<(), WriterError> {
        let buffer_ref = buffer.get_mut().ok_or_else(|| WriterError::Append {
            track: track.to_string(),
            details: "buffer is shared".to_string(),
        })?;
        buffer_ref.set_pts(pts);
        buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(
            duration.as_nanos() as u64,
        ));
        source
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| WriterError::Append {
                track: track.to_string(),
                details: format!("{:?}", e),
            })
    }
}

#[async_trait]
impl AssetWriter for GstAssetWriter {
    fn begin(&mut self) -> Result<(), WriterError> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| WriterError::Start {
                details: format!("Failed to start pipeline: {}", e),
            })?;
        info!("Writer pipeline playing for {}", self.config.path.display());
        Ok(())
    }

    fn start_session(&mut self, at: Duration) -> Result<(), WriterError> {
        self.origin = Some(at);

        let mut tags = gstreamer::TagList::new();
        if let Some(tags) = tags.get_mut() {
            tags.add::<gstreamer::tags::ImageOrientation>(
                &orientation_tag(self.config.video.rotation),
                gstreamer::TagMergeMode::Replace,
            );
        }
        if !self.video.send_event(gstreamer::event::Tag::new(tags)) {
            warn!("Writer did not accept the orientation tag");
        }
        Ok(())
    }

    fn is_ready(&self, track: Track) -> bool {
        let source = match track {
            Track::Video => &self.video,
            Track::Audio => match &self.audio {
                Some(source) => source,
                None => return false,
            },
        };
        let max = source.max_bytes();
        max == 0 || source.current_level_bytes() < max
    }

    fn append_video(&mut self, frame: &FrameData) -> Result<(), WriterError> {
        if !self.caps_set {
            self.set_video_caps(frame)?;
        }
        let buffer = gstreamer::Buffer::from_slice(SharedBytes(Arc::clone(&frame.data)));
        Self::push(
            &self.video,
            Track::Video,
            buffer,
            self.relative(frame.pts),
            frame.duration,
        )
    }

    fn append_audio(&mut self, frame: &AudioFrame) -> Result<(), WriterError> {
        let Some(source) = &self.audio else {
            return Err(WriterError::Append {
                track: Track::Audio.to_string(),
                details: "writer has no audio track".to_string(),
            });
        };
        let bytes: Vec<u8> = frame
            .samples
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect();
        Self::push(
            source,
            Track::Audio,
            gstreamer::Buffer::from_mut_slice(bytes),
            self.relative(frame.pts),
            frame.duration,
        )
    }

    fn mark_finished(&mut self, track: Track) {
        let source = match track {
            Track::Video => Some(&self.video),
            Track::Audio => self.audio.as_ref(),
        };
        if let Some(source) = source {
            if let Err(e) = source.end_of_stream() {
                warn!("Failed to signal end of {} track: {:?}", track, e);
            }
        }
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf, WriterError> {
        let pipeline = self.pipeline.clone();
        let path = self.config.path.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let Some(bus) = pipeline.bus() else {
                return Err("pipeline has no bus".to_string());
            };
            let result = match bus.timed_pop_filtered(
                gstreamer::ClockTime::NONE,
                &[gstreamer::MessageType::Eos, gstreamer::MessageType::Error],
            ) {
                Some(message) => match message.view() {
                    gstreamer::MessageView::Error(err) => Err(format!(
                        "{} ({})",
                        err.error(),
                        err.debug().unwrap_or_default()
                    )),
                    _ => Ok(()),
                },
                None => Err("bus closed before end of stream".to_string()),
            };
            let _ = pipeline.set_state(gstreamer::State::Null);
            result
        })
        .await
        .map_err(|e| WriterError::Finalize {
            details: e.to_string(),
        })?;

        outcome.map_err(|details| WriterError::Finalize { details })?;
        info!("Writer finalized {}", path.display());
        Ok(path)
    }

    fn cancel(self: Box<Self>) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop writer pipeline: {}", e);
        }
    }
}
