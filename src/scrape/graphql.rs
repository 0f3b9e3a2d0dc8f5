use log::warn;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::canvas::{TileRecord, TILE_COUNT};
use crate::error::{StatusOr, TimelapseError};

const FRAME_HISTORY_QUERY: &str = "mutation frameHistory($input: ActInput!) {\n  act(input: $input) {\n    data {\n      ... on BasicMessage {\n        id\n        data {\n          ... on GetFrameHistoryResponseMessageData {\n            frames {\n              canvasIndex\n              url\n              __typename\n            }\n            __typename\n          }\n          __typename\n        }\n        __typename\n      }\n      __typename\n    }\n    __typename\n  }\n}\n";

/// Request body asking for the canvas frames live at `timestamp`
pub fn frame_history_request(timestamp: i64) -> Value {
    json!({
        "operationName": "frameHistory",
        "query": FRAME_HISTORY_QUERY,
        "variables": {
            "input": {
                "actionName": "get_frame_history",
                "GetFrameHistoryMessageData": {
                    "timestamp": timestamp
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct FrameHistoryResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    act: Act,
}

#[derive(Debug, Deserialize)]
struct Act {
    data: Vec<BasicMessage>,
}

#[derive(Debug, Deserialize)]
struct BasicMessage {
    data: MessageData,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(default)]
    frames: Vec<Frame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Frame {
    canvas_index: usize,
    url: String,
}

/// Extract the tile fragments from a `frameHistory` response.
///
/// Only the last path segment of each URL is kept; tiles missing from the
/// response stay empty.
pub fn parse_frame_history(body: &str) -> StatusOr<TileRecord> {
    let response: FrameHistoryResponse = serde_json::from_str(body)
        .map_err(|e| TimelapseError::ScrapeError(format!("Malformed response: {}", e)))?;

    let data = match response.data {
        Some(data) => data,
        None => {
            return Err(TimelapseError::ScrapeError(format!(
                "Response has no data, errors: {}",
                Value::from(response.errors)
            )));
        }
    };

    let message = data
        .act
        .data
        .into_iter()
        .next()
        .ok_or_else(|| TimelapseError::ScrapeError("Response has no messages".to_string()))?;

    let mut fragments: [Option<String>; TILE_COUNT] = Default::default();
    for frame in message.data.frames {
        if frame.canvas_index >= TILE_COUNT {
            warn!("Ignoring frame for unknown canvas {}", frame.canvas_index);
            continue;
        }
        let fragment = frame.url.rsplit('/').next().unwrap_or("");
        if !fragment.is_empty() {
            fragments[frame.canvas_index] = Some(fragment.to_string());
        }
    }

    Ok(TileRecord::new(fragments))
}
