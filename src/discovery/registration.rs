//! Registration with a remote peer
//!
//! This node's self-description is posted as JSON to
//! `<target>/DEVICEREG.JSON`. The peer answers with its own description on
//! success. Every outcome, including transport failures, is returned as a
//! [`RegistrationOutcome`] instead of an error.

use super::record::DeviceRecord;
use crate::error::{DiscoveryError, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Path appended to the target URL
pub const REGISTRATION_PATH: &str = "DEVICEREG.JSON";

/// Default request timeout
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one registration attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// 200: the peer accepted and returned its own description
    Registered(DeviceRecord),
    /// 5xx
    ServerError(u16),
    /// 406: the peer refused this node
    Rejected,
    /// Any other status, transport failure or unreadable reply
    Failed(String),
}

impl RegistrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered(_))
    }

    /// Map a non-200 status
    fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            RegistrationOutcome::ServerError(status.as_u16())
        } else if status == StatusCode::NOT_ACCEPTABLE {
            RegistrationOutcome::Rejected
        } else {
            RegistrationOutcome::Failed(format!("unexpected status {status}"))
        }
    }
}

/// Posts self-descriptions to peers
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    client: reqwest::Client,
}

impl RegistrationClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// `<target>/DEVICEREG.JSON`
    pub fn registration_url(target: &str) -> Result<Url> {
        let mut base = Url::parse(target.trim())?;
        if base.cannot_be_a_base() {
            return Err(DiscoveryError::invalid_input(format!(
                "registration target {target} cannot carry a path"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(REGISTRATION_PATH)?)
    }

    /// Post `description` to `target`
    pub async fn register(&self, target: &str, description: &DeviceRecord) -> RegistrationOutcome {
        let url = match Self::registration_url(target) {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid registration target {}: {}", target, e);
                return RegistrationOutcome::Failed(e.to_string());
            }
        };

        debug!("Registering {} with {}", description.usn, url);

        let response = match self.client.post(url.clone()).json(description).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Registration with {} failed: {}", url, e);
                return RegistrationOutcome::Failed(e.to_string());
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let outcome = RegistrationOutcome::from_status(status);
            warn!("Registration with {} refused: {:?}", url, outcome);
            return outcome;
        }

        match response.json::<DeviceRecord>().await {
            Ok(peer) => {
                info!("Registered with peer {} ({})", peer.friendly_name, peer.usn);
                RegistrationOutcome::Registered(peer)
            }
            Err(e) => {
                warn!("Peer {} returned an unreadable description: {}", url, e);
                RegistrationOutcome::Failed(e.to_string())
            }
        }
    }

    /// Register in the background and hand the outcome to `callback`
    ///
    /// Returns `false` without sending when called outside a tokio runtime;
    /// `callback` then receives [`RegistrationOutcome::Failed`] right away.
    pub fn register_with_callback<F>(
        &self,
        target: String,
        description: DeviceRecord,
        callback: F,
    ) -> bool
    where
        F: FnOnce(RegistrationOutcome) + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot register with {} outside an async runtime", target);
                callback(RegistrationOutcome::Failed(
                    DiscoveryError::registration(e.to_string()).to_string(),
                ));
                return false;
            }
        };

        let client = self.clone();
        runtime.spawn(async move {
            let outcome = client.register(&target, &description).await;
            callback(outcome);
        });
        true
    }
}
