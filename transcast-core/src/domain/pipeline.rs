//! Pipeline domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Pass-through encoder parameters, keyed by flag name without the leading dash.
///
/// Insertion order is preserved so that caller-supplied ordering survives
/// a registry round-trip.
pub type Params = Map<String, Value>;

/// Time-to-live applied when a request does not carry one
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// One transcoding request: one input, many outputs
///
/// Structure shared between orchestrator (persists) and runner (executes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub input: Input,
    pub outputs: Vec<Output>,
    /// Seconds to keep artifacts after every output completed. Zero disables expiry.
    pub ttl: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Pipeline {
    /// Target locators in output order, `None` for outputs whose target failed to resolve
    pub fn target_locators(&self) -> Vec<Option<String>> {
        self.outputs
            .iter()
            .map(|output| output.target.as_ref().map(Target::locator))
            .collect()
    }

    /// Outputs that have a synthesized command and no resolution errors
    pub fn launchable_outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter().filter(|output| output.is_launchable())
    }
}

/// Media source of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// URI or path handed to the prober and the encoder
    pub source: String,
    /// Start offset, rendered as the encoder's `ss` input option
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Read duration, rendered as the encoder's `t` input option
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default)]
    pub params: Params,
}

/// One produced artifact or stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub id: Uuid,
    pub container: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub storage: Vec<StorageDestination>,
    /// Resolved destination; `None` when resolution failed
    pub target: Option<Target>,
    /// Resolution errors recorded at parse time. A non-empty list blocks launch.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Synthesized encoder invocation
    pub command: Option<EncoderCommand>,
}

impl Output {
    pub fn is_launchable(&self) -> bool {
        self.errors.is_empty() && self.command.is_some()
    }

    /// Rendered command string, if a command was synthesized
    pub fn command_line(&self) -> Option<&str> {
        self.command.as_ref().map(|c| c.rendered.as_str())
    }
}

/// Encoder argument list plus its human readable rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderCommand {
    pub args: Vec<String>,
    pub rendered: String,
}

/// Where an output's bytes go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// Local file, relative to the work directory
    File { path: String },
    /// UDP broadcast on an ephemeral port
    Udp { host: String, port: u16 },
    /// Streaming server URL
    Stream { url: String },
}

impl Target {
    /// Locator handed to the encoder as its final positional argument
    pub fn locator(&self) -> String {
        match self {
            Target::File { path } => path.clone(),
            Target::Udp { host, port } => format!("udp://{}:{}", host, port),
            Target::Stream { url } => url.clone(),
        }
    }

    /// Relative path of the produced file, for file targets only
    pub fn local_file(&self) -> Option<&str> {
        match self {
            Target::File { path } => Some(path),
            _ => None,
        }
    }

    /// Reserved UDP port, for broadcast targets only
    pub fn udp_port(&self) -> Option<u16> {
        match self {
            Target::Udp { port, .. } => Some(*port),
            _ => None,
        }
    }
}

/// Per-stream-type codec, filter and parameter specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub stream_type: StreamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default)]
    pub codec_params: Params,
    #[serde(default)]
    pub params: Params,
    /// Filter chain, applied in order
    #[serde(default)]
    pub filters: Vec<FilterStep>,
}

/// Stream type tag of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
}

impl StreamType {
    /// Parses the request tag. Unknown tags are rejected rather than defaulted.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "video" => Some(StreamType::Video),
            "audio" => Some(StreamType::Audio),
            "subtitle" => Some(StreamType::Subtitle),
            _ => None,
        }
    }

    /// Encoder flag selecting the codec for this stream type
    pub fn codec_flag(&self) -> &'static str {
        match self {
            StreamType::Video => "vcodec",
            StreamType::Audio => "acodec",
            StreamType::Subtitle => "scodec",
        }
    }

    /// Stream-qualified profile flag. Subtitles have none.
    pub fn profile_flag(&self) -> Option<&'static str> {
        match self {
            StreamType::Video => Some("profile:v"),
            StreamType::Audio => Some("profile:a"),
            StreamType::Subtitle => None,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Video => write!(f, "video"),
            StreamType::Audio => write!(f, "audio"),
            StreamType::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// A single named filter and its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub name: String,
    pub args: FilterArgs,
}

/// Filter arguments as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterArgs {
    /// Positional arguments
    Positional(Vec<Value>),
    /// Named arguments, rendered sorted by name
    Named(Map<String, Value>),
    /// A single positional argument. `null` means no arguments at all.
    Scalar(Value),
}

impl FilterArgs {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => FilterArgs::Positional(items),
            Value::Object(map) => FilterArgs::Named(map),
            other => FilterArgs::Scalar(other),
        }
    }
}

/// Cloud storage destination for a finished artifact
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDestination {
    /// Storage backend name (e.g. `s3`, `gcs`, `azureblob`)
    pub name: String,
    pub bucket: String,
    /// Credential overrides applied to the upload process only
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

// Credentials must never reach the logs
impl fmt::Debug for StorageDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageDestination")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}
