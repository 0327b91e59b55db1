//! Pipeline request parsing
//!
//! Converts the loosely typed request body into a [`Pipeline`]. Parsing runs
//! in two passes: every field of every output is validated first, and only
//! then are targets resolved. A malformed request therefore never reserves a
//! port. Target resolution failures do not fail the parse; they are stored on
//! the affected output so sibling outputs can still run.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::pipeline::{
    Channel, DEFAULT_TTL_SECONDS, FilterArgs, FilterStep, Input, Output, Params, Pipeline,
    StorageDestination, StreamType, Target,
};
use crate::filter::value_text;
use crate::ports::{PortAllocator, ResolveError};

/// Container that is broadcast over UDP instead of written to a file
pub const BROADCAST_CONTAINER: &str = "mpegts";

/// Request validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Invalid field '{field}': expected {expected}")]
    InvalidField { field: String, expected: &'static str },

    #[error("Unknown stream type '{tag}' in '{field}'")]
    UnknownStreamType { field: String, tag: String },

    #[error("No outputs specified")]
    NoOutputs,
}

/// Parser settings supplied by the service configuration
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// ttl used when the request does not carry one
    pub default_ttl: u64,
    /// Default destination host of broadcast outputs
    pub broadcast_addr: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECONDS,
            broadcast_addr: "127.0.0.1".to_string(),
        }
    }
}

/// Validated output fields that still need a target
struct OutputSpec {
    container: String,
    params: Params,
    channels: Vec<Channel>,
    storage: Vec<StorageDestination>,
    broadcast_addr: Option<String>,
    stream_url: Option<String>,
}

/// Parses and resolves a pipeline request
///
/// Port allocation may block for the allocator's search window; call this
/// from a blocking context.
pub fn parse_pipeline(
    request: &Value,
    options: &ParseOptions,
    ports: &PortAllocator,
) -> Result<Pipeline, SpecError> {
    let body = request.as_object().ok_or(SpecError::NotAnObject)?;

    let input = parse_input(required(body, "input_file", "input_file")?)?;

    let outputs = required(body, "outputs", "outputs")?
        .as_array()
        .ok_or_else(|| invalid("outputs", "an array"))?;
    if outputs.is_empty() {
        return Err(SpecError::NoOutputs);
    }

    let specs = outputs
        .iter()
        .enumerate()
        .map(|(i, output)| parse_output(output, &format!("outputs[{}]", i)))
        .collect::<Result<Vec<_>, _>>()?;

    let ttl = match body.get("ttl") {
        None | Some(Value::Null) => options.default_ttl,
        Some(value) => value
            .as_u64()
            .ok_or_else(|| invalid("ttl", "a non-negative integer"))?,
    };

    let outputs = specs
        .into_iter()
        .map(|spec| resolve_output(spec, options, ports))
        .collect();

    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        input,
        outputs,
        ttl,
        created_at: chrono::Utc::now(),
    };

    debug!(
        "Parsed pipeline {} with {} outputs, ttl {}s",
        pipeline.id,
        pipeline.outputs.len(),
        pipeline.ttl
    );
    Ok(pipeline)
}

fn parse_input(value: &Value) -> Result<Input, SpecError> {
    let body = value
        .as_object()
        .ok_or_else(|| invalid("input_file", "an object"))?;

    let source = required(body, "source", "input_file.source")?
        .as_str()
        .ok_or_else(|| invalid("input_file.source", "a string"))?
        .to_string();

    Ok(Input {
        source,
        start: optional_time(body, "start", "input_file.start")?,
        duration: optional_time(body, "duration", "input_file.duration")?,
        params: optional_object(body, "params", "input_file.params")?,
    })
}

fn parse_output(value: &Value, path: &str) -> Result<OutputSpec, SpecError> {
    let body = value
        .as_object()
        .ok_or_else(|| invalid(path, "an object"))?;

    let container_path = format!("{}.container", path);
    let container = required(body, "container", &container_path)?
        .as_str()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| invalid(&container_path, "a non-empty string"))?
        .to_string();

    let channels = optional_array(body, "channels", &format!("{}.channels", path))?
        .iter()
        .enumerate()
        .map(|(i, channel)| parse_channel(channel, &format!("{}.channels[{}]", path, i)))
        .collect::<Result<Vec<_>, _>>()?;

    let storage = optional_array(body, "storage", &format!("{}.storage", path))?
        .iter()
        .enumerate()
        .map(|(i, dest)| parse_storage(dest, &format!("{}.storage[{}]", path, i)))
        .collect::<Result<Vec<_>, _>>()?;

    let rtmp_ip = optional_string(body, "rtmp_ip", &format!("{}.rtmp_ip", path))?;
    let rtmp_path = optional_string(body, "rtmp_path", &format!("{}.rtmp_path", path))?;
    let stream_url = match (rtmp_ip, rtmp_path) {
        (Some(ip), Some(stream_path)) if !ip.is_empty() && !stream_path.is_empty() => {
            Some(format!("rtmp://{}/{}", ip, stream_path.trim_start_matches('/')))
        }
        _ => None,
    };

    Ok(OutputSpec {
        container,
        params: optional_object(body, "params", &format!("{}.params", path))?,
        channels,
        storage,
        broadcast_addr: optional_string(body, "broadcast_addr", &format!("{}.broadcast_addr", path))?,
        stream_url,
    })
}

fn parse_channel(value: &Value, path: &str) -> Result<Channel, SpecError> {
    let body = value
        .as_object()
        .ok_or_else(|| invalid(path, "an object"))?;

    let type_path = format!("{}.stream_type", path);
    let tag = required(body, "stream_type", &type_path)?
        .as_str()
        .ok_or_else(|| invalid(&type_path, "a string"))?;
    let stream_type = StreamType::from_tag(tag).ok_or_else(|| SpecError::UnknownStreamType {
        field: type_path.clone(),
        tag: tag.to_string(),
    })?;

    Ok(Channel {
        stream_type,
        codec: optional_string(body, "codec", &format!("{}.codec", path))?,
        codec_params: optional_object(body, "codec_params", &format!("{}.codec_params", path))?,
        params: optional_object(body, "params", &format!("{}.params", path))?,
        filters: parse_filters(body.get("filters"), &format!("{}.filters", path))?,
    })
}

/// Filters come either as a mapping `{name: args}`, applied in the order the
/// caller wrote them, or as an explicit list `[{"name": .., "args": ..}]`.
fn parse_filters(value: Option<&Value>, path: &str) -> Result<Vec<FilterStep>, SpecError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(name, args)| FilterStep {
                name: name.clone(),
                args: FilterArgs::from_value(args.clone()),
            })
            .collect()),
        Some(Value::Array(steps)) => steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let step_path = format!("{}[{}]", path, i);
                let body = step
                    .as_object()
                    .ok_or_else(|| invalid(&step_path, "an object"))?;
                let name_path = format!("{}.name", step_path);
                let name = required(body, "name", &name_path)?
                    .as_str()
                    .ok_or_else(|| invalid(&name_path, "a string"))?;
                Ok(FilterStep {
                    name: name.to_string(),
                    args: FilterArgs::from_value(body.get("args").cloned().unwrap_or(Value::Null)),
                })
            })
            .collect(),
        Some(_) => Err(invalid(path, "an object or an array")),
    }
}

fn parse_storage(value: &Value, path: &str) -> Result<StorageDestination, SpecError> {
    let body = value
        .as_object()
        .ok_or_else(|| invalid(path, "an object"))?;

    let name_path = format!("{}.name", path);
    let bucket_path = format!("{}.bucket", path);
    let name = required(body, "name", &name_path)?
        .as_str()
        .ok_or_else(|| invalid(&name_path, "a string"))?;
    let bucket = required(body, "bucket", &bucket_path)?
        .as_str()
        .ok_or_else(|| invalid(&bucket_path, "a string"))?;

    let mut env = BTreeMap::new();
    for (key, value) in optional_object(body, "env", &format!("{}.env", path))? {
        env.insert(key, value_text(&value));
    }

    Ok(StorageDestination {
        name: name.to_string(),
        bucket: bucket.to_string(),
        env,
    })
}

fn resolve_output(spec: OutputSpec, options: &ParseOptions, ports: &PortAllocator) -> Output {
    let id = Uuid::new_v4();
    let mut errors = Vec::new();

    let target = match resolve_target(&spec, id, options, ports) {
        Ok(target) => Some(target),
        Err(e) => {
            warn!("Output {} target resolution failed: {}", id, e);
            errors.push(e.to_string());
            None
        }
    };

    Output {
        id,
        container: spec.container,
        params: spec.params,
        channels: spec.channels,
        storage: spec.storage,
        target,
        errors,
        command: None,
    }
}

fn resolve_target(
    spec: &OutputSpec,
    id: Uuid,
    options: &ParseOptions,
    ports: &PortAllocator,
) -> Result<Target, ResolveError> {
    if spec.container == BROADCAST_CONTAINER {
        let port = ports.allocate()?;
        let host = spec
            .broadcast_addr
            .clone()
            .unwrap_or_else(|| options.broadcast_addr.clone());
        return Ok(Target::Udp { host, port });
    }

    if let Some(url) = &spec.stream_url {
        return Ok(Target::Stream { url: url.clone() });
    }

    Ok(Target::File {
        path: format!("{}.{}", id, spec.container),
    })
}

fn invalid(field: &str, expected: &'static str) -> SpecError {
    SpecError::InvalidField {
        field: field.to_string(),
        expected,
    }
}

fn required<'a>(body: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a Value, SpecError> {
    match body.get(key) {
        None | Some(Value::Null) => Err(SpecError::MissingField(path.to_string())),
        Some(value) => Ok(value),
    }
}

fn optional_string(
    body: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, SpecError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(path, "a string")),
    }
}

/// Offsets may be given as seconds or as a timestamp string
fn optional_time(
    body: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, SpecError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ (Value::String(_) | Value::Number(_))) => Ok(Some(value_text(value))),
        Some(_) => Err(invalid(path, "a number or a string")),
    }
}

fn optional_object(body: &Map<String, Value>, key: &str, path: &str) -> Result<Params, SpecError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(Params::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(invalid(path, "an object")),
    }
}

fn optional_array<'a>(
    body: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a [Value], SpecError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(invalid(path, "an array")),
    }
}
