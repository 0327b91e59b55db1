//! Encoder command synthesis
//!
//! Turns a resolved [`Output`] plus the probed stream layout of the input into
//! the encoder's argument list. Argument layout:
//!
//! ```text
//! <input options, sorted> -i <source>
//! [-filter_complex <graph>] [-map <video>] [-map <audio>]
//! <merged output options, sorted> <target>
//! ```
//!
//! Output options are merged in a fixed order, later entries overriding
//! earlier ones on key collision: container defaults, output params, then for
//! each channel its codec selection, its params and its codec params.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::pipeline::{
    Channel, EncoderCommand, FilterStep, Input, Output, Params, Pipeline, StreamType, Target,
};
use crate::filter::{FilterGraph, value_text};

/// Encoder binary used when none is configured
pub const DEFAULT_ENCODER: &str = "ffmpeg";

/// Which streams the probe found in the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPresence {
    pub has_video: bool,
    pub has_audio: bool,
}

impl StreamPresence {
    /// Reads `streams[].codec_type` from a probe result
    pub fn from_probe(probe: &Value) -> Self {
        let mut presence = Self::default();

        let streams = probe.get("streams").and_then(Value::as_array);
        for stream in streams.into_iter().flatten() {
            match stream.get("codec_type").and_then(Value::as_str) {
                Some("video") => presence.has_video = true,
                Some("audio") => presence.has_audio = true,
                _ => {}
            }
        }

        presence
    }
}

/// Builds encoder invocations for outputs
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    encoder: String,
}

impl CommandSynthesizer {
    pub fn new(encoder: impl Into<String>) -> Self {
        Self {
            encoder: encoder.into(),
        }
    }

    /// Synthesizes a command for every output that resolved its target
    ///
    /// Outputs carrying resolution errors are left without a command.
    pub fn synthesize_pipeline(&self, pipeline: &mut Pipeline, streams: StreamPresence) {
        for output in pipeline.outputs.iter_mut() {
            if !output.errors.is_empty() {
                continue;
            }
            output.command = self.synthesize(&pipeline.input, output, streams);
        }
    }

    /// Synthesizes the command of a single output
    ///
    /// Returns `None` when the output has no resolved target.
    pub fn synthesize(
        &self,
        input: &Input,
        output: &Output,
        streams: StreamPresence,
    ) -> Option<EncoderCommand> {
        let target = output.target.as_ref()?;

        let mut args = input_args(input);
        args.extend(output_args(output, target, streams));

        let rendered = format!("{} {}", self.encoder, args.join(" "));
        Some(EncoderCommand { args, rendered })
    }
}

impl Default for CommandSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODER)
    }
}

fn input_args(input: &Input) -> Vec<String> {
    let mut options = BTreeMap::new();
    if let Some(start) = &input.start {
        options.insert("ss".to_string(), Value::String(start.clone()));
    }
    if let Some(duration) = &input.duration {
        options.insert("t".to_string(), Value::String(duration.clone()));
    }
    merge(&mut options, &input.params);

    let mut args = flag_args(&options);
    args.push("-i".to_string());
    args.push(input.source.clone());
    args
}

fn output_args(output: &Output, target: &Target, streams: StreamPresence) -> Vec<String> {
    let mut args = Vec::new();

    // Filters on a stream the input does not carry have nothing to attach to
    let video = if streams.has_video {
        filters_for(output, StreamType::Video)
    } else {
        Vec::new()
    };
    let audio = if streams.has_audio {
        filters_for(output, StreamType::Audio)
    } else {
        Vec::new()
    };
    let graph = FilterGraph::build(&video, &audio);

    if !graph.is_empty() {
        args.push("-filter_complex".to_string());
        args.push(graph.render());
    }

    if streams.has_video {
        args.push("-map".to_string());
        args.push(stream_label(graph.video_pad(), "0:v"));
    }
    if streams.has_audio {
        args.push("-map".to_string());
        args.push(stream_label(graph.audio_pad(), "0:a"));
    }

    args.extend(flag_args(&merged_params(output, target)));
    args.push(target.locator());
    args
}

fn filters_for(output: &Output, stream_type: StreamType) -> Vec<&FilterStep> {
    output
        .channels
        .iter()
        .filter(|channel| channel.stream_type == stream_type)
        .flat_map(|channel| channel.filters.iter())
        .collect()
}

fn stream_label(pad: Option<&str>, raw: &str) -> String {
    match pad {
        Some(pad) => format!("[{}]", pad),
        None => raw.to_string(),
    }
}

/// Final output options of an output, after the full merge
pub fn merged_params(output: &Output, target: &Target) -> BTreeMap<String, Value> {
    let mut params = BTreeMap::new();

    match target {
        Target::Udp { .. } => {
            params.insert("f".to_string(), Value::String(output.container.clone()));
        }
        Target::Stream { .. } => {
            params.insert("f".to_string(), Value::String("flv".to_string()));
        }
        Target::File { .. } => {}
    }

    merge(&mut params, &output.params);
    for channel in &output.channels {
        apply_channel(&mut params, channel);
    }

    params
}

fn apply_channel(params: &mut BTreeMap<String, Value>, channel: &Channel) {
    let mut codec_params = channel.codec_params.clone();
    // Profile is never a generic flag; it only survives qualified by stream type
    let profile = codec_params.shift_remove("profile");

    if let Some(codec) = &channel.codec {
        params.insert(
            channel.stream_type.codec_flag().to_string(),
            Value::String(codec.clone()),
        );
        if let (Some(profile), Some(flag)) = (profile, channel.stream_type.profile_flag()) {
            codec_params.insert(flag.to_string(), profile);
        }
    }

    merge(params, &channel.params);
    merge(params, &codec_params);
}

fn merge(into: &mut BTreeMap<String, Value>, from: &Params) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}

/// Renders options as `-key value` pairs in key order
///
/// `null` yields a bare flag and arrays repeat the flag once per element.
pub fn flag_args(options: &BTreeMap<String, Value>) -> Vec<String> {
    let mut args = Vec::new();

    for (key, value) in options {
        let flag = format!("-{}", key);
        match value {
            Value::Null => args.push(flag),
            Value::Array(items) => {
                for item in items {
                    args.push(flag.clone());
                    if !item.is_null() {
                        args.push(value_text(item));
                    }
                }
            }
            other => {
                args.push(flag);
                args.push(value_text(other));
            }
        }
    }

    args
}
