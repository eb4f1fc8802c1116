//! HTTP client for the windrig rig server.
//!
//! [`HttpRig`] implements [`RigApi`] over the server's JSON API. Every call
//! maps failures onto [`RigError`]:
//!
//! - transport errors and undecodable bodies become `Network`
//! - `404` becomes `NotFound`
//! - any other non-2xx with an `{error}` body becomes `Rejected`, verbatim
//!
//! All requests carry the configured timeout except preprocessing, which
//! runs as long as the server needs.
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use windrig_http::HttpRig;
//!
//! let rig = HttpRig::new("http://localhost:1105", Duration::from_secs(10))?;
//! let files = rig.search_files("").await?;
//! ```

pub mod models;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use windrig_core::{
    ExecCacheEntry, ExecCacheKey, Fingering, Instrument, LogLine, MusicFile, PumpReply, RigApi,
    RigError, StatusSnapshot, TimelineDocument, TimelineEvent,
};

use models::{
    ErrorBody, ExecCheckResponse, FileList, FingeringSend, FingeringsResponse, LogsResponse,
    MessageBody, PlayRequest, PlaybackStatus, PreprocessRequest, PreprocessResponse, PumpCommand,
    TimelineResponse, TimelineUpdate,
};

/// Default request timeout for everything but preprocessing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The rig server reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRig {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRig {
    /// Create a client for the server at `base_url`, e.g.
    /// `http://localhost:1105`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RigError> {
        let client = Client::builder()
            .build()
            .map_err(|e| RigError::Network(format!("failed to build HTTP client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).timeout(self.timeout)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).timeout(self.timeout)
    }

    /// Send a request and decode a 2xx body as `T`.
    async fn call<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T, RigError> {
        let response = request
            .send()
            .await
            .map_err(|e| RigError::Network(format!("{}: {}", what, e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RigError::Network(format!("{}: reading body: {}", what, e)))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .map(ErrorBody::into_message)
                .unwrap_or_else(|_| format!("{} failed with HTTP {}", what, status));
            log::debug!("{} rejected ({}): {}", what, status, message);
            return Err(if status == StatusCode::NOT_FOUND {
                RigError::NotFound(message)
            } else {
                RigError::Rejected(message)
            });
        }

        serde_json::from_slice(&body)
            .map_err(|e| RigError::Network(format!("{}: undecodable response: {}", what, e)))
    }
}

#[async_trait]
impl RigApi for HttpRig {
    async fn search_files(&self, query: &str) -> Result<Vec<MusicFile>, RigError> {
        let list: FileList = self
            .call("file search", self.get("/api/files").query(&[("search", query)]))
            .await?;
        log::debug!("File search '{}' returned {} files", query, list.total);
        Ok(list.files.unwrap_or_default())
    }

    async fn load_timeline(&self, filename: &str) -> Result<TimelineDocument, RigError> {
        let response: TimelineResponse = self
            .call(
                "timeline load",
                self.get("/api/timeline").query(&[("filename", filename)]),
            )
            .await?;
        response
            .into_document()
            .map_err(|e| RigError::Rejected(format!("timeline {} is malformed: {}", filename, e)))
    }

    async fn save_timeline(&self, filename: &str, events: &[TimelineEvent]) -> Result<(), RigError> {
        let _: MessageBody = self
            .call(
                "timeline update",
                self.post("/api/timeline/update")
                    .json(&TimelineUpdate::new(filename, events)),
            )
            .await?;
        Ok(())
    }

    async fn check_exec(&self, key: &ExecCacheKey) -> Result<Option<ExecCacheEntry>, RigError> {
        let bpm = key.bpm_param();
        let delay = key.tonguing_delay_ms.to_string();
        let response: ExecCheckResponse = self
            .call(
                "sequence check",
                self.get("/api/exec/check").query(&[
                    ("source_file", key.source_file.as_str()),
                    ("instrument", key.instrument.as_str()),
                    ("bpm", bpm.as_str()),
                    ("tonguing_delay", delay.as_str()),
                ]),
            )
            .await?;
        Ok(response.into_entry(key))
    }

    async fn preprocess(&self, key: &ExecCacheKey) -> Result<ExecCacheEntry, RigError> {
        // No timeout: a build may legitimately take minutes.
        let request = self
            .client
            .post(self.url("/api/preprocess"))
            .json(&PreprocessRequest::from(key));
        let response: PreprocessResponse = self.call("preprocess", request).await?;
        Ok(response.into_entry(key))
    }

    async fn play_exec(&self, exec_file: &str) -> Result<(), RigError> {
        let _: MessageBody = self
            .call(
                "play",
                self.post("/api/exec/play").json(&PlayRequest { exec_file }),
            )
            .await?;
        Ok(())
    }

    async fn stop_playback(&self) -> Result<(), RigError> {
        let _: MessageBody = self.call("stop", self.post("/api/playback/stop")).await?;
        Ok(())
    }

    async fn playback_status(&self) -> Result<StatusSnapshot, RigError> {
        let status: PlaybackStatus = self
            .call("status", self.get("/api/playback/status"))
            .await?;
        Ok(status.into())
    }

    async fn playback_logs(&self) -> Result<Vec<LogLine>, RigError> {
        let response: LogsResponse = self.call("logs", self.get("/api/playback/logs")).await?;
        Ok(response.logs.unwrap_or_default())
    }

    async fn fingerings(&self, instrument: Instrument) -> Result<Vec<Fingering>, RigError> {
        let response: FingeringsResponse = self
            .call(
                "fingering table",
                self.get("/api/fingerings")
                    .query(&[("instrument", instrument.as_str())]),
            )
            .await?;
        let mut table: Vec<Fingering> = response
            .fingerings
            .unwrap_or_default()
            .into_iter()
            .map(Fingering::from)
            .collect();
        // The server iterates a map, so order is arbitrary.
        table.sort_by(|a, b| a.note.cmp(&b.note));
        Ok(table)
    }

    async fn send_fingering(&self, note: &str, instrument: Instrument) -> Result<String, RigError> {
        let reply: MessageBody = self
            .call(
                "fingering send",
                self.post("/api/fingerings/send").json(&FingeringSend {
                    note,
                    instrument: instrument.as_str(),
                }),
            )
            .await?;
        Ok(reply.message)
    }

    async fn pump_debug(&self, command: &str) -> Result<PumpReply, RigError> {
        self.call(
            "pump command",
            self.post("/api/pump/debug").json(&PumpCommand { command }),
        )
        .await
    }
}
