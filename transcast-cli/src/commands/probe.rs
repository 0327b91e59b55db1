//! Probe command handler

use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;
use transcast_client::OrchestratorClient;
use transcast_core::domain::pipeline::Params;

use crate::config::Config;

/// Parse a single key=value pair
pub fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Probe a source and print a stream overview followed by the raw description
pub async fn probe_source(
    config: &Config,
    source: &str,
    params: Vec<(String, String)>,
) -> Result<()> {
    let client = OrchestratorClient::new(&config.server_url);

    let params: Option<Params> = (!params.is_empty()).then(|| {
        params
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect()
    });

    let description = match client.probe(source, params).await {
        Ok(description) => description,
        Err(e) => {
            for line in e.description() {
                eprintln!("  {}", line.dimmed());
            }
            return Err(e).with_context(|| format!("Failed to probe {}", source));
        }
    };

    println!("{}", format!("Streams of {}:", source).bold());
    let streams = description
        .get("streams")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for stream in streams {
        let kind = stream
            .get("codec_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let codec = stream
            .get("codec_name")
            .and_then(Value::as_str)
            .unwrap_or("-");
        println!("  {} {:<8} {}", "▸".cyan(), kind.bold(), codec.dimmed());
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&description)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("analyzeduration=10M").unwrap(),
            ("analyzeduration".to_string(), "10M".to_string())
        );
        assert_eq!(
            parse_key_val("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
    }
}
