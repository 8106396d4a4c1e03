use serde_json::Value;

/// Encode one event frame. The framing is a protocol contract and must
/// stay byte-for-byte stable: `event: <type>\ndata: <json>\n\n`.
pub fn encode_frame(event_type: &str, data_json: &str) -> String {
    format!("event: {event_type}\ndata: {data_json}\n\n")
}

/// One decoded frame off the wire: event type plus raw `data:` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    /// Decode the data field. Malformed JSON is not an error — it
    /// degrades to the raw string, preserving liveness over strictness.
    pub fn payload(&self) -> Payload {
        Payload::decode(&self.data)
    }
}

/// Tagged result of decoding a frame's data field.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(Value),
    Raw(String),
}

impl Payload {
    pub fn decode(data: &str) -> Self {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Raw(data.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Raw(_) => None,
        }
    }
}

/// Parse raw frame text into (event, data) pairs. A blank line
/// terminates a frame; a trailing frame without one is still yielded.
pub fn parse_frame_lines(raw: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event: ") {
            current_event = event.to_string();
        } else if let Some(data) = line.strip_prefix("data: ") {
            current_data = data.to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            frames.push(Frame {
                event: std::mem::take(&mut current_event),
                data: std::mem::take(&mut current_data),
            });
        }
    }

    if !current_event.is_empty() {
        frames.push(Frame {
            event: current_event,
            data: current_data,
        });
    }

    frames
}

/// Incremental frame decoder for a chunked byte stream. Chunk
/// boundaries need not align with frame boundaries; partial frames
/// stay buffered until their terminating blank line arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let complete = self.buffer[..pos + 2].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();
            frames.extend(parse_frame_lines(&complete));
        }
        frames
    }

    /// Drain the buffer at end-of-stream, yielding a trailing frame
    /// that never received its blank line.
    pub fn finish(&mut self) -> Vec<Frame> {
        let remaining = std::mem::take(&mut self.buffer);
        if remaining.is_empty() {
            return Vec::new();
        }
        parse_frame_lines(&remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_is_byte_exact() {
        let json = serde_json::to_string(&json!({"n": 1})).unwrap();
        assert_eq!(encode_frame("ping", &json), "event: ping\ndata: {\"n\":1}\n\n");
    }

    #[test]
    fn parse_single_frame() {
        let frames = parse_frame_lines("event: ping\ndata: {\"n\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "ping");
        assert_eq!(frames[0].data, "{\"n\":1}");
    }

    #[test]
    fn parse_trailing_frame_without_terminator() {
        let frames = parse_frame_lines("event: ping\ndata: 1");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "1");
    }

    #[test]
    fn decoder_handles_split_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("event: a\nda").is_empty());
        let frames = decoder.push("ta: \"x\"\n\nevent: b\ndata: 2\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "a");
        assert_eq!(frames[1].event, "b");
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn decoder_finish_drains_partial_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("event: late\ndata: 42").is_empty());
        let frames = decoder.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "late");
        assert_eq!(frames[0].data, "42");
    }

    #[test]
    fn payload_falls_back_to_raw_on_malformed_json() {
        assert_eq!(
            Payload::decode("{\"n\":1}"),
            Payload::Json(json!({"n": 1}))
        );
        assert_eq!(
            Payload::decode("{not json"),
            Payload::Raw("{not json".to_string())
        );
    }

    #[test]
    fn round_trip_through_decoder() {
        let wire = encode_frame("update", "{\"id\":\"u1\",\"seen\":true}");
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].payload(),
            Payload::Json(json!({"id": "u1", "seen": true}))
        );
    }
}
