//! JSONL request loading and result persistence.
//!
//! Input files hold one request per line:
//! `{"url": "users/1", "method": "GET", "headers": {...}, "body": {...}}`.
//! Everything but `url` is optional; `"form"` or `"text"` may replace `"body"`.
//! Blank lines are skipped.

use crate::dispatcher::Dispatcher;
use crate::error::{Result, SeineError};
use crate::request::{ApiResponse, RequestOptions, ResultSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

/// One line of a request file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLine {
    /// Absolute URL, or a path relative to the API base.
    pub url: String,

    /// Method, headers and body.
    #[serde(flatten)]
    pub options: RequestOptions,
}

/// One line of a response file.
#[derive(Debug, Serialize)]
pub struct ResponseLine<'a> {
    /// Sequence id of the request.
    pub sequence_id: usize,
    /// Resolved URL.
    pub url: &'a str,
    /// HTTP status.
    pub status: u16,
    /// Attempts used.
    pub try_count: u32,
    /// Credential that served the request.
    pub client_id: &'a str,
    /// Body as JSON when it parses, as a string otherwise.
    pub body: Value,
}

impl<'a> From<&'a ApiResponse> for ResponseLine<'a> {
    fn from(response: &'a ApiResponse) -> Self {
        let body = response
            .json::<Value>()
            .unwrap_or_else(|_| Value::String(response.text().into_owned()));

        Self {
            sequence_id: response.sequence_id,
            url: &response.url,
            status: response.status,
            try_count: response.try_count,
            client_id: &response.client_id,
            body,
        }
    }
}

/// Read requests from a JSONL file.
pub async fn load_requests(path: &Path) -> Result<Vec<RequestLine>> {
    let read_error = |e| SeineError::InputFileRead {
        path: path.to_path_buf(),
        source: e,
    };

    let file = File::open(path).await.map_err(read_error)?;
    let mut lines = BufReader::new(file).lines();
    let mut requests = Vec::new();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await.map_err(read_error)? {
        line_number += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: RequestLine =
            serde_json::from_str(trimmed).map_err(|e| SeineError::JsonParse {
                line: line_number,
                source: e,
            })?;
        requests.push(request);
    }

    Ok(requests)
}

/// Enqueue every line on the dispatcher. Returns the number enqueued.
pub fn enqueue_all(dispatcher: &Dispatcher, requests: Vec<RequestLine>) -> usize {
    requests
        .into_iter()
        .map(|line| dispatcher.add_request(line.url, line.options))
        .count()
}

/// Write successful responses to `output` (if given) and failures to `errors`.
pub async fn write_result_set(
    result: &ResultSet,
    output: Option<&Path>,
    errors: &Path,
) -> Result<()> {
    if let Some(path) = output {
        write_lines(path, result.responses.iter().map(ResponseLine::from)).await?;
    }
    write_lines(errors, result.failed_requests.iter()).await
}

async fn write_lines<T: Serialize>(path: &Path, items: impl Iterator<Item = T>) -> Result<()> {
    let write_error = |e| SeineError::OutputFileWrite {
        path: PathBuf::from(path),
        source: e,
    };

    let file = File::create(path).await.map_err(write_error)?;
    let mut writer = BufWriter::new(file);

    for item in items {
        let mut line = serde_json::to_vec(&item)?;
        line.push(b'\n');
        writer.write_all(&line).await.map_err(write_error)?;
    }

    writer.flush().await.map_err(write_error)
}
