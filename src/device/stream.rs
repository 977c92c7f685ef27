//! Hardware streams feeding the pipeline callbacks

use super::enumerator::{find_input, find_output};
use crate::audio::{CaptureInput, FrameSpec, PlaybackOutput};
use crate::error::{PaceError, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Sample, SampleFormat, StreamConfig};
use tracing::{error, info};

fn stream_config(spec: &FrameSpec) -> StreamConfig {
    StreamConfig {
        channels: spec.channels(),
        sample_rate: cpal::SampleRate(spec.sample_rate()),
        buffer_size: cpal::BufferSize::Default,
    }
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}

/// Microphone stream delivering batches to a [`CaptureInput`]
///
/// The stream runs until dropped.
pub struct MicrophoneStream {
    name: String,
    _stream: cpal::Stream,
}

impl MicrophoneStream {
    /// Open the named (or default) input device at the capture layout
    pub fn open(input: CaptureInput, spec: FrameSpec, name: Option<&str>) -> Result<Self> {
        let device = find_input(name)?;
        let name = device_name(&device);
        let format = device
            .default_input_config()
            .map_err(|e| PaceError::device_error(&name, e.to_string()))?
            .sample_format();
        let config = stream_config(&spec);
        let channels = spec.channels();
        info!("Using input device: {} ({:?}, {})", name, format, spec);

        let on_error = |err: cpal::StreamError| error!("Input stream error: {}", err);
        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    input.deliver(data, channels);
                },
                on_error,
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                        input.deliver(&scratch, channels);
                    },
                    on_error,
                    None,
                )
            }
            other => {
                return Err(PaceError::device_error(
                    &name,
                    format!("unsupported sample format {:?}", other),
                ))
            }
        }
        .map_err(|e| PaceError::device_error(&name, e.to_string()))?;

        stream
            .play()
            .map_err(|e| PaceError::device_error(&name, e.to_string()))?;

        Ok(Self {
            name,
            _stream: stream,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Speaker stream filled from a [`PlaybackOutput`]
pub struct SpeakerStream {
    name: String,
    _stream: cpal::Stream,
}

impl SpeakerStream {
    /// Open the named (or default) output device at the playback layout
    pub fn open(output: PlaybackOutput, spec: FrameSpec, name: Option<&str>) -> Result<Self> {
        let device = find_output(name)?;
        let name = device_name(&device);
        let format = device
            .default_output_config()
            .map_err(|e| PaceError::device_error(&name, e.to_string()))?
            .sample_format();
        let config = stream_config(&spec);
        info!("Using output device: {} ({:?}, {})", name, format, spec);

        let on_error = |err: cpal::StreamError| error!("Output stream error: {}", err);
        let stream = match format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    output.fill(data);
                },
                on_error,
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0.0f32);
                        output.fill(&mut scratch);
                        for (dst, &src) in data.iter_mut().zip(&scratch) {
                            *dst = src.to_sample::<i16>();
                        }
                    },
                    on_error,
                    None,
                )
            }
            other => {
                return Err(PaceError::device_error(
                    &name,
                    format!("unsupported sample format {:?}", other),
                ))
            }
        }
        .map_err(|e| PaceError::device_error(&name, e.to_string()))?;

        stream
            .play()
            .map_err(|e| PaceError::device_error(&name, e.to_string()))?;

        Ok(Self {
            name,
            _stream: stream,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
