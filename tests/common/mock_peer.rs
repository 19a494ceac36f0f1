//! WireMock-based mesh peer accepting `DEVICEREG.JSON` registrations

use mesh_discovery::discovery::DeviceRecord;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Mock peer node
pub struct MockPeer {
    pub server: MockServer,
}

impl MockPeer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Accept registrations and answer with `description`
    pub async fn accept_with(&self, description: &DeviceRecord) {
        Mock::given(method("POST"))
            .and(path("/DEVICEREG.JSON"))
            .respond_with(ResponseTemplate::new(200).set_body_json(description))
            .mount(&self.server)
            .await;
    }

    /// Answer every registration with `status` and an empty body
    pub async fn respond_with_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/DEVICEREG.JSON"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answer with 200 and a body that is not a description
    pub async fn respond_with_garbage(&self) {
        Mock::given(method("POST"))
            .and(path("/DEVICEREG.JSON"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&self.server)
            .await;
    }

    /// Bodies of every registration received so far
    pub async fn received_descriptions(&self) -> Vec<serde_json::Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }
}
