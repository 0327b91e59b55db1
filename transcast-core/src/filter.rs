//! Filter graph construction
//!
//! Builds the encoder's `-filter_complex` argument from per-stream filter
//! chains. Pads are labelled `s0, s1, …` in application order, video chain
//! first and audio chain second, and each chain starts from the raw input
//! stream (`0:v` / `0:a`).

use serde_json::Value;

use crate::domain::pipeline::{FilterArgs, FilterStep};

const ARG_SPECIAL: &[char] = &['\\', '\'', '=', ':'];
const NODE_SPECIAL: &[char] = &['\\', '\'', '[', ']', ',', ';'];

/// A compiled filter graph and the final pad of each chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterGraph {
    nodes: Vec<String>,
    video_pad: Option<String>,
    audio_pad: Option<String>,
}

impl FilterGraph {
    /// Chains the video filters, then the audio filters
    pub fn build(video: &[&FilterStep], audio: &[&FilterStep]) -> Self {
        let mut graph = FilterGraph::default();
        let mut next_label = 0usize;

        graph.video_pad = graph.chain("0:v", video, &mut next_label);
        graph.audio_pad = graph.chain("0:a", audio, &mut next_label);
        graph
    }

    fn chain(
        &mut self,
        source: &str,
        steps: &[&FilterStep],
        next_label: &mut usize,
    ) -> Option<String> {
        let mut input = source.to_string();
        let mut last = None;

        for step in steps {
            let output = format!("s{}", next_label);
            *next_label += 1;
            self.nodes
                .push(format!("[{}]{}[{}]", input, filter_spec(step), output));
            input = output.clone();
            last = Some(output);
        }

        last
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Final pad of the video chain, if any video filter was applied
    pub fn video_pad(&self) -> Option<&str> {
        self.video_pad.as_deref()
    }

    /// Final pad of the audio chain, if any audio filter was applied
    pub fn audio_pad(&self) -> Option<&str> {
        self.audio_pad.as_deref()
    }

    /// The `-filter_complex` argument
    pub fn render(&self) -> String {
        self.nodes.join(";")
    }
}

/// `name=arg:arg:key=value` with ffmpeg filtergraph escaping
fn filter_spec(step: &FilterStep) -> String {
    let mut params: Vec<String> = Vec::new();

    match &step.args {
        FilterArgs::Positional(items) => {
            params.extend(items.iter().map(|v| escape(&value_text(v), ARG_SPECIAL)));
        }
        FilterArgs::Named(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                params.push(format!(
                    "{}={}",
                    key,
                    escape(&value_text(&map[key.as_str()]), ARG_SPECIAL)
                ));
            }
        }
        FilterArgs::Scalar(Value::Null) => {}
        FilterArgs::Scalar(value) => params.push(escape(&value_text(value), ARG_SPECIAL)),
    }

    let mut text = escape(&step.name, ARG_SPECIAL);
    if !params.is_empty() {
        text.push('=');
        text.push_str(&params.join(":"));
    }
    escape(&text, NODE_SPECIAL)
}

/// Plain text of a JSON scalar; strings lose their quotes
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn escape(text: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if special.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str, args: Value) -> FilterStep {
        FilterStep {
            name: name.to_string(),
            args: FilterArgs::from_value(args),
        }
    }

    #[test]
    fn test_video_then_audio_labels() {
        let scale = step("scale", json!({"w": "iw/2", "h": -1}));
        let atrim = step("atrim", json!({"start": 1}));

        let graph = FilterGraph::build(&[&scale], &[&atrim]);

        assert_eq!(
            graph.render(),
            "[0:v]scale=h=-1:w=iw/2[s0];[0:a]atrim=start=1[s1]"
        );
        assert_eq!(graph.video_pad(), Some("s0"));
        assert_eq!(graph.audio_pad(), Some("s1"));
    }

    #[test]
    fn test_chain_threads_pads() {
        let scale = step("scale", json!([640, 360]));
        let hflip = step("hflip", Value::Null);

        let graph = FilterGraph::build(&[&scale, &hflip], &[]);

        assert_eq!(graph.render(), "[0:v]scale=640:360[s0];[s0]hflip[s1]");
        assert_eq!(graph.video_pad(), Some("s1"));
        assert_eq!(graph.audio_pad(), None);
    }

    #[test]
    fn test_scalar_argument() {
        let volume = step("volume", json!(0.5));
        let graph = FilterGraph::build(&[], &[&volume]);

        assert_eq!(graph.render(), "[0:a]volume=0.5[s0]");
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let text = step("drawtext", json!({"text": "a:b"}));
        let graph = FilterGraph::build(&[&text], &[]);

        // Escaped once as an argument, then once more as part of the node
        assert_eq!(graph.render(), "[0:v]drawtext=text=a\\\\:b[s0]");
    }

    #[test]
    fn test_empty_graph() {
        let graph = FilterGraph::build(&[], &[]);
        assert!(graph.is_empty());
        assert_eq!(graph.render(), "");
    }
}
