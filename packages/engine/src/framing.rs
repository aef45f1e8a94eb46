// ABOUTME: In-band result framing for submission output streams
// ABOUTME: Encodes the terminal result after a delimiter and decodes accumulated stream text back into display output plus result

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marks the end of display output within a submission stream. Everything
/// before the first occurrence is test output; the remainder of that line
/// after it is a single-line JSON result.
pub const RESULT_DELIMITER: &str = "__JSON_RESULT__:";

/// CSI escape sequences (colors, cursor movement) as emitted by pytest and
/// friends when they mistake the pipe for a terminal.
static ANSI_ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]")
        .unwrap_or_else(|e| panic!("FATAL: ANSI escape pattern failed to compile: {}", e))
});

/// Terminal verdict of a submission run, framed into the output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(rename = "sandboxID")]
    pub sandbox_id: String,
}

/// A fully decoded submission stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStream {
    /// Display output with ANSI escapes removed.
    pub display: String,
    /// Parsed result frame. `None` means the stream ended without a valid
    /// frame and the run must be treated as failed.
    pub result: Option<SubmissionResult>,
}

impl DecodedStream {
    /// Whether the run passed. Absent or malformed frames count as failure.
    pub fn passed(&self) -> bool {
        self.result.as_ref().map(|r| r.success).unwrap_or(false)
    }
}

/// Encodes the result frame appended to a submission stream: a newline so the
/// frame starts on its own line, the delimiter, then single-line JSON.
pub fn encode_result(result: &SubmissionResult) -> String {
    let payload = serde_json::json!({
        "success": result.success,
        "sandboxID": result.sandbox_id,
    });
    format!("\n{}{}", RESULT_DELIMITER, payload)
}

/// Decodes accumulated stream text. Splits on the first delimiter occurrence
/// so test output that happens to print the delimiter itself cannot spoof a
/// result; only the first frame counts.
pub fn decode_stream(raw: &str) -> DecodedStream {
    match raw.split_once(RESULT_DELIMITER) {
        Some((display, rest)) => {
            let frame = rest.lines().next().unwrap_or("").trim();
            DecodedStream {
                display: strip_ansi(display),
                result: serde_json::from_str(frame).ok(),
            }
        }
        None => DecodedStream {
            display: strip_ansi(raw),
            result: None,
        },
    }
}

/// Removes ANSI CSI escape sequences from display text.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPES.replace_all(text, "").into_owned()
}
