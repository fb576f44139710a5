use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::trace;

use super::model::Command;
use super::model::CommandBatch;
use super::model::Device;
use super::model::DeviceHealth;
use super::model::DeviceStatus;
use super::model::Location;
use super::model::Page;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {path} returned status {status}")]
    Status {
        method: &'static str,
        path: String,
        status: u16,
    },

    #[error("Invalid access token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
}

/// Operations the bridge needs from the SmartThings REST API
///
/// This trait allows for mocking the API for testing purposes
#[async_trait]
pub trait SmartThingsApi: Send + Sync {
    /// List every device visible to the access token
    async fn list_devices(&self) -> Result<Vec<Device>, ApiError>;

    /// List every location visible to the access token
    async fn list_locations(&self) -> Result<Vec<Location>, ApiError>;

    /// Fetch the full status snapshot of a device
    async fn device_status(&self, device_id: &str) -> Result<DeviceStatus, ApiError>;

    /// Probe whether the cloud considers a device reachable
    async fn device_health(&self, device_id: &str) -> Result<DeviceHealth, ApiError>;

    /// Execute a batch of commands on a device
    async fn execute_commands(&self, device_id: &str, commands: &[Command])
        -> Result<(), ApiError>;
}

/// Real API client implementation using reqwest
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// Create a new RestClient for the given base URL and access token
    pub fn new(base_url: &str, access_token: &str) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", access_token))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get_url(&self.url(path), path).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: &str, path: &str) -> Result<T, ApiError> {
        trace!("GET {}", url);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                method: "GET",
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Follow `_links.next` until the listing is exhausted
    async fn get_paged<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut page: Page<T> = self.get_json(path).await?;

        loop {
            items.append(&mut page.items);
            let next = page.links.and_then(|links| links.next).map(|link| link.href);
            match next {
                Some(href) => {
                    debug!("Following page link for {}: {}", path, href);
                    page = self.get_url(&href, path).await?;
                }
                None => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl SmartThingsApi for RestClient {
    async fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        self.get_paged("devices").await
    }

    async fn list_locations(&self) -> Result<Vec<Location>, ApiError> {
        self.get_paged("locations").await
    }

    async fn device_status(&self, device_id: &str) -> Result<DeviceStatus, ApiError> {
        self.get_json(&format!("devices/{}/status", device_id)).await
    }

    async fn device_health(&self, device_id: &str) -> Result<DeviceHealth, ApiError> {
        self.get_json(&format!("devices/{}/health", device_id)).await
    }

    async fn execute_commands(
        &self,
        device_id: &str,
        commands: &[Command],
    ) -> Result<(), ApiError> {
        let path = format!("devices/{}/commands", device_id);
        debug!("POST {} with {} command(s)", path, commands.len());

        let response = self
            .http
            .post(self.url(&path))
            .json(&CommandBatch { commands })
            .send()
            .await?;

        // Anything but 200 is treated as a rejected batch.
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ApiError::Status {
                method: "POST",
                path,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Mock API for testing
#[cfg(test)]
pub use mock::MockApi;


#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use axum::Json;
    use axum::Router;
    use axum::extract::Path;
    use axum::extract::Query;
    use axum::extract::State;
    use axum::http::HeaderMap as RequestHeaders;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::routing::post;
    use serde_json::Value;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    /// Stand-in for the cloud, recording every command batch it receives.
    #[derive(Clone, Default)]
    struct Cloud {
        base: String,
        batches: Arc<Mutex<Vec<Value>>>,
    }

    fn authorized(headers: &RequestHeaders) -> bool {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer secret")
    }

    async fn devices(
        State(cloud): State<Cloud>,
        headers: RequestHeaders,
        Query(query): Query<HashMap<String, String>>,
    ) -> Result<Json<Value>, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let page = match query.get("page").map(String::as_str) {
            None => json!({
                "items": [{ "deviceId": "lamp", "label": "Lamp" }],
                "_links": { "next": { "href": format!("{}devices?page=2", cloud.base) } }
            }),
            Some("2") => json!({
                "items": [{ "deviceId": "lock", "label": "Front Door" }],
                "_links": {}
            }),
            Some(_) => return Err(StatusCode::BAD_REQUEST),
        };
        Ok(Json(page))
    }

    async fn locations() -> Json<Value> {
        Json(json!({ "items": [{ "locationId": "home", "name": "Home" }] }))
    }

    async fn status(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
        match id.as_str() {
            "lamp" => Ok(Json(json!({ "components": { "main": {
                "switch": { "switch": { "value": "on" } }
            } } }))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn health() -> Json<Value> {
        Json(json!({ "state": "OFFLINE" }))
    }

    async fn commands(
        State(cloud): State<Cloud>,
        Path(id): Path<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        cloud.batches.lock().unwrap().push(body);
        match id.as_str() {
            "lamp" => StatusCode::OK,
            _ => StatusCode::ACCEPTED,
        }
    }

    /// Serve a fake cloud on an ephemeral port. Returns it with a client
    /// whose base URL omits the trailing slash.
    async fn start_cloud() -> (Cloud, RestClient) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cloud = Cloud {
            base: format!("http://{}/v1/", addr),
            ..Cloud::default()
        };

        let app = Router::new()
            .route("/v1/devices", get(devices))
            .route("/v1/locations", get(locations))
            .route("/v1/devices/:id/status", get(status))
            .route("/v1/devices/:id/health", get(health))
            .route("/v1/devices/:id/commands", post(commands))
            .with_state(cloud.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = RestClient::new(&format!("http://{}/v1", addr), "secret").unwrap();
        (cloud, client)
    }

    #[tokio::test]
    async fn test_device_listing_follows_next_links() {
        let (_, client) = start_cloud().await;

        let devices = client.list_devices().await.unwrap();
        let ids: Vec<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["lamp", "lock"]);
        assert_eq!(devices[1].display_name(), "Front Door");

        let locations = client.list_locations().await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].location_id, "home");
    }

    #[tokio::test]
    async fn test_status_and_health_round_trip() {
        let (_, client) = start_cloud().await;

        let status = client.device_status("lamp").await.unwrap();
        assert_eq!(
            status.components["main"].text("switch", "switch").unwrap(),
            "on"
        );
        assert!(!client.device_health("lamp").await.unwrap().is_online());
    }

    #[tokio::test]
    async fn test_error_status_is_reported_with_path() {
        let (_, client) = start_cloud().await;

        match client.device_status("ghost").await {
            Err(ApiError::Status {
                method,
                path,
                status,
            }) => {
                assert_eq!(method, "GET");
                assert_eq!(path, "devices/ghost/status");
                assert_eq!(status, 404);
            }
            other => panic!("expected a status error, got {:?}", other.map(|_| ())),
        }

        let unauthorized = RestClient::new(&client.base_url, "wrong").unwrap();
        assert!(matches!(
            unauthorized.list_devices().await,
            Err(ApiError::Status { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_commands_need_a_plain_ok() {
        let (cloud, client) = start_cloud().await;
        let batch = [
            Command::new("switch", "on"),
            Command::new("switchLevel", "setLevel")
                .with_arguments(vec![json!(40)])
                .on_component("light2"),
        ];

        client.execute_commands("lamp", &batch).await.unwrap();
        assert!(matches!(
            client.execute_commands("slow", &batch[..1]).await,
            Err(ApiError::Status {
                method: "POST",
                status: 202,
                ..
            })
        ));

        let batches = cloud.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[0],
            json!({ "commands": [
                { "capability": "switch", "command": "on" },
                { "component": "light2", "capability": "switchLevel",
                  "command": "setLevel", "arguments": [40] }
            ] })
        );
    }

    #[test]
    fn test_rest_client_normalizes_base_url() {
        let client = RestClient::new("https://api.smartthings.com/v1", "token").unwrap();
        assert_eq!(
            client.url("devices/abc/status"),
            "https://api.smartthings.com/v1/devices/abc/status"
        );

        let client = RestClient::new("https://api.smartthings.com/v1/", "token").unwrap();
        assert_eq!(client.url("devices"), "https://api.smartthings.com/v1/devices");
    }

    #[test]
    fn test_rest_client_rejects_unprintable_token() {
        assert!(matches!(
            RestClient::new("https://api.smartthings.com/v1", "bad\ntoken"),
            Err(ApiError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_api_records_commands() {
        let api = MockApi::with_status(serde_json::json!({ "components": {} }));
        api.execute_commands("dev", &[Command::new("switch", "on")])
            .await
            .unwrap();
        assert_eq!(api.sent(), vec![Command::new("switch", "on")]);
        assert!(api.device_health("dev").await.unwrap().is_online());
    }
}
