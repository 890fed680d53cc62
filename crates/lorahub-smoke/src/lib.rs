//! REST smoke test for a flashed LoRaHub
//!
//! Steps, each of which must answer 200:
//! 1. `GET /api/v1/get_info`
//! 2. `POST /api/v1/set_config`
//! 3. `POST /api/v1/reboot`
//! 4. settle, then poll `GET /api/v1/get_config` until it answers 200
//! 5. a final `GET /api/v1/get_config`
//!
//! The poll is bounded by [`WaitPolicy::timeout`].

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Port the device's HTTP server listens on
pub const DEVICE_PORT: u16 = 8000;

/// Settings written by `set_config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub lns_addr: String,
    pub lns_port: u16,
    pub chan_freq: f64,
    pub chan_dr: u8,
    pub chan_bw: u32,
    pub sntp_addr: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            lns_addr: "eu1.cloud.thethings.network".to_string(),
            lns_port: 1700,
            chan_freq: 868.1,
            chan_dr: 7,
            chan_bw: 125,
            sntp_addr: "pool.ntp.org".to_string(),
        }
    }
}

/// Timing of the post-reboot wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Pause after the reboot request before polling starts
    pub settle: Duration,
    /// Delay between polls
    pub interval: Duration,
    /// Give up once this much time has passed since polling started
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(10),
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// One request in the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmokeStep {
    GetInfo,
    SetConfig,
    Reboot,
    WaitOnline,
    GetConfig,
}

impl SmokeStep {
    pub fn method(&self) -> &'static str {
        match self {
            SmokeStep::SetConfig | SmokeStep::Reboot => "POST",
            _ => "GET",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            SmokeStep::GetInfo => "/api/v1/get_info",
            SmokeStep::SetConfig => "/api/v1/set_config",
            SmokeStep::Reboot => "/api/v1/reboot",
            SmokeStep::WaitOnline | SmokeStep::GetConfig => "/api/v1/get_config",
        }
    }
}

impl fmt::Display for SmokeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmokeStep::GetInfo => "get information",
            SmokeStep::SetConfig => "set configuration",
            SmokeStep::Reboot => "reboot device",
            SmokeStep::WaitOnline => "wait for device",
            SmokeStep::GetConfig => "get configuration",
        };
        write!(f, "{}", s)
    }
}

/// Status and body of a completed step
#[derive(Debug, Clone)]
pub struct StepResponse {
    pub step: SmokeStep,
    pub status: u16,
    pub body: String,
}

impl StepResponse {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Pretty JSON when the body parses, raw text otherwise
    pub fn pretty_body(&self) -> String {
        self.json()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| self.body.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SmokeError {
    #[error("{step}: request failed: {source}")]
    Http {
        step: SmokeStep,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: HTTP {status}: {body}")]
    Status {
        step: SmokeStep,
        status: u16,
        body: String,
    },

    #[error("device did not come back online within {}s", .waited.as_secs())]
    Timeout { waited: Duration },
}

impl SmokeError {
    /// Every failure halts the test with the same code
    pub fn exit_code(&self) -> i32 {
        1
    }

    pub fn step(&self) -> SmokeStep {
        match self {
            SmokeError::Http { step, .. } | SmokeError::Status { step, .. } => *step,
            SmokeError::Timeout { .. } => SmokeStep::WaitOnline,
        }
    }
}

/// Responses of a successful run
#[derive(Debug, Clone)]
pub struct SmokeReport {
    pub responses: Vec<StepResponse>,
    /// Time spent polling after the settle delay
    pub waited: Duration,
}

impl SmokeReport {
    /// Configuration read back by the final step
    pub fn final_config(&self) -> Option<serde_json::Value> {
        self.responses
            .iter()
            .rev()
            .find(|r| r.step == SmokeStep::GetConfig)
            .and_then(|r| r.json())
    }
}

/// Blocking client for the device REST API
pub struct SmokeClient {
    base_url: String,
    client: Client,
}

impl SmokeClient {
    /// Client for `base_url` (e.g. `http://192.168.1.20:8000`)
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Client for a device by address, on the fixed API port
    pub fn for_device(ip: &str, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::new(format!("http://{}:{}", ip, DEVICE_PORT), request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, step: SmokeStep) -> String {
        format!("{}{}", self.base_url, step.path())
    }

    fn send(
        &self,
        step: SmokeStep,
        body: Option<&DeviceConfig>,
    ) -> Result<StepResponse, SmokeError> {
        let url = self.url(step);
        debug!(method = step.method(), %url, "request");

        let request = match (step, body) {
            (SmokeStep::SetConfig | SmokeStep::Reboot, Some(config)) => self.client.post(&url).json(config),
            (SmokeStep::SetConfig | SmokeStep::Reboot, None) => self.client.post(&url),
            _ => self.client.get(&url),
        };
        let response = request
            .send()
            .map_err(|source| SmokeError::Http { step, source })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|source| SmokeError::Http { step, source })?;

        Ok(StepResponse { step, status, body })
    }

    /// Send a step and require HTTP 200
    fn expect_ok(
        &self,
        step: SmokeStep,
        body: Option<&DeviceConfig>,
    ) -> Result<StepResponse, SmokeError> {
        let response = self.send(step, body)?;
        if response.status != 200 {
            return Err(SmokeError::Status {
                step,
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }

    pub fn get_info(&self) -> Result<StepResponse, SmokeError> {
        self.expect_ok(SmokeStep::GetInfo, None)
    }

    pub fn set_config(&self, config: &DeviceConfig) -> Result<StepResponse, SmokeError> {
        self.expect_ok(SmokeStep::SetConfig, Some(config))
    }

    pub fn reboot(&self) -> Result<StepResponse, SmokeError> {
        self.expect_ok(SmokeStep::Reboot, None)
    }

    pub fn get_config(&self) -> Result<StepResponse, SmokeError> {
        self.expect_ok(SmokeStep::GetConfig, None)
    }

    /// Poll `get_config` until it answers 200 or `policy.timeout` passes.
    ///
    /// Connection errors and non-200 answers both count as "not yet".
    /// Returns the time spent polling.
    pub fn wait_for_online(&self, policy: &WaitPolicy) -> Result<Duration, SmokeError> {
        let start = Instant::now();
        while start.elapsed() < policy.timeout {
            match self.send(SmokeStep::WaitOnline, None) {
                Ok(r) if r.status == 200 => return Ok(start.elapsed()),
                Ok(r) => debug!(status = r.status, "device not ready"),
                Err(e) => info!(elapsed_s = start.elapsed().as_secs(), "waiting for device ({})", e),
            }
            thread::sleep(policy.interval);
        }
        Err(SmokeError::Timeout {
            waited: start.elapsed(),
        })
    }

    /// Run the full sequence, handing each response to `observe`
    pub fn run<F>(
        &self,
        config: &DeviceConfig,
        policy: &WaitPolicy,
        mut observe: F,
    ) -> Result<SmokeReport, SmokeError>
    where
        F: FnMut(&StepResponse),
    {
        let mut responses = Vec::new();
        let mut record = |response: StepResponse| {
            observe(&response);
            responses.push(response);
        };

        record(self.get_info()?);
        record(self.set_config(config)?);
        record(self.reboot()?);

        info!(settle_s = policy.settle.as_secs(), "waiting for the device to start rebooting");
        thread::sleep(policy.settle);
        let waited = self.wait_for_online(policy)?;

        record(self.get_config()?);

        Ok(SmokeReport { responses, waited })
    }
}
