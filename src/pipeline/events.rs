//! SSE event formatting (spec §6), grounded in `utils/sse.py::format_pipeline_sse`.

use serde_json::Value;

/// Format one pipeline SSE event: `event: <name>\ndata: <json>\n\n`, where
/// the JSON body is `{"provider": provider, ...data}`.
pub fn format_pipeline_sse(event: &str, provider: &str, data: Value) -> String {
    let mut payload = serde_json::Map::new();
    payload.insert("provider".to_string(), Value::String(provider.to_string()));
    if let Value::Object(map) = data {
        payload.extend(map);
    }
    format!("event: {event}\ndata: {}\n\n", Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_event_with_provider_and_data_merged() {
        let sse = format_pipeline_sse("step1_chunk", "claude", json!({"content": "hi"}));
        assert!(sse.starts_with("event: step1_chunk\ndata: "));
        assert!(sse.ends_with("\n\n"));
        assert!(sse.contains("\"provider\":\"claude\""));
        assert!(sse.contains("\"content\":\"hi\""));
    }
}
