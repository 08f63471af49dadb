use std::{collections::BTreeMap, io, path::PathBuf};

use futures::{future, Stream, StreamExt};
use http::{StatusCode, Uri};
use hyper::{client::HttpConnector, Body, Client};
use hyperlocal::UnixConnector;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    io::StreamReader,
};

pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

#[derive(Debug, Snafu)]
pub enum EngineError {
    #[snafu(display("Unsupported DOCKER_HOST `{}`", host))]
    InvalidHost { host: String },
    #[snafu(display("Failed to build engine request: {}", source))]
    BuildRequest { source: http::uri::InvalidUri },
    #[snafu(display("Engine transport failure: {}", source))]
    Transport { source: hyper::Error },
    #[snafu(display("Engine event stream failure: {}", source))]
    EventStream { source: io::Error },
    #[snafu(display("Container {} is gone: engine returned {}", id, status))]
    ContainerGone { id: String, status: StatusCode },
    #[snafu(display("Engine returned unexpected status {}", status))]
    UnexpectedStatus { status: StatusCode },
    #[snafu(display("Failed to decode engine response: {}", source))]
    Decode { source: serde_json::Error },
}

impl EngineError {
    /// Stable label for the per-container exception counter.
    pub const fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidHost { .. } => "invalid_host",
            EngineError::BuildRequest { .. } => "build_request",
            EngineError::Transport { .. } => "transport",
            EngineError::EventStream { .. } => "event_stream",
            EngineError::ContainerGone { .. } => "container_gone",
            EngineError::UnexpectedStatus { .. } => "unexpected_status",
            EngineError::Decode { .. } => "decode",
        }
    }

    pub const fn is_container_gone(&self) -> bool {
        matches!(self, EngineError::ContainerGone { .. })
    }
}

/// `GET /containers/json` entry.
#[derive(Debug, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
}

/// `GET /containers/{id}/json` subset the workers consume.
#[derive(Debug, Deserialize)]
pub struct ContainerDetails {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Image", default)]
    pub image_id: String,
    #[serde(rename = "Config")]
    pub config: ContainerConfig,
    #[serde(rename = "State")]
    pub state: ContainerState,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Hostname", default)]
    pub hostname: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Tty", default)]
    pub tty: bool,
    // Ordered so tag merges (and the canonical key order of every event
    // built from them) are identical across restarts.
    #[serde(rename = "Labels", default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Status")]
    pub status: String,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// One record of the `GET /events` ndjson stream.
#[derive(Debug, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Action", default)]
    pub action: String,
    #[serde(rename = "id", alias = "ID", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(rename = "timeNano", default)]
    pub time_nano: Option<i64>,
}

impl EngineEvent {
    pub fn is_container(&self) -> bool {
        self.kind == "container"
    }
}

#[derive(Clone, Debug)]
enum Endpoint {
    Unix {
        socket: PathBuf,
        client: Client<UnixConnector, Body>,
    },
    Tcp {
        authority: String,
        client: Client<HttpConnector, Body>,
    },
}

/// Shared engine client: one connection pool, many concurrent streams. The
/// engine throttles a slow reader by not producing more bytes, so nothing
/// here buffers beyond hyper's own windows.
#[derive(Clone, Debug)]
pub struct Engine {
    endpoint: Endpoint,
}

impl Engine {
    /// Connects per the `DOCKER_HOST` conventions: `unix://` sockets (or a
    /// bare socket path), and `tcp://`/`http://` addresses.
    pub fn new(host: &str) -> Result<Self, EngineError> {
        let endpoint = if let Some(socket) = host.strip_prefix("unix://") {
            Endpoint::Unix {
                socket: PathBuf::from(socket),
                client: Client::builder().build(UnixConnector),
            }
        } else if host.starts_with('/') {
            Endpoint::Unix {
                socket: PathBuf::from(host),
                client: Client::builder().build(UnixConnector),
            }
        } else if let Some(authority) = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
        {
            Endpoint::Tcp {
                authority: authority.trim_end_matches('/').to_string(),
                client: Client::builder().build(HttpConnector::new()),
            }
        } else {
            return InvalidHostSnafu { host }.fail();
        };

        Ok(Engine { endpoint })
    }

    fn uri(&self, path_and_query: &str) -> Result<Uri, EngineError> {
        match &self.endpoint {
            Endpoint::Unix { socket, .. } => Ok(hyperlocal::Uri::new(socket, path_and_query).into()),
            Endpoint::Tcp { authority, .. } => format!("http://{}{}", authority, path_and_query)
                .parse()
                .context(BuildRequestSnafu),
        }
    }

    async fn get(&self, path_and_query: &str) -> Result<hyper::Response<Body>, EngineError> {
        let uri = self.uri(path_and_query)?;
        match &self.endpoint {
            Endpoint::Unix { client, .. } => client.get(uri).await.context(TransportSnafu),
            Endpoint::Tcp { client, .. } => client.get(uri).await.context(TransportSnafu),
        }
    }

    /// `GET /containers/json` -- running containers only.
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError> {
        let response = self.get("/containers/json").await?;
        let status = response.status();
        if !status.is_success() {
            return UnexpectedStatusSnafu { status }.fail();
        }
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context(TransportSnafu)?;
        serde_json::from_slice(&body).context(DecodeSnafu)
    }

    /// `GET /containers/{id}/json`. Not-found and server errors are reported
    /// as the container being gone; the worker retires on that signal.
    pub async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let response = self.get(&format!("/containers/{}/json", id)).await?;
        classify_container_status(id, response.status())?;
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context(TransportSnafu)?;
        serde_json::from_slice(&body).context(DecodeSnafu)
    }

    /// Opens the follow-mode log stream for one container. `since` is the
    /// engine's `<secs>.<nnnnnnnnn>` form; the returned body yields the raw
    /// framed (or TTY) byte stream until the engine closes it.
    pub async fn logs(&self, id: &str, since: &str) -> Result<Body, EngineError> {
        let path = format!(
            "/containers/{}/logs?since={}&timestamps=1&follow=1&stdout=1&stderr=1",
            id, since
        );
        let response = self.get(&path).await?;
        classify_container_status(id, response.status())?;
        Ok(response.into_body())
    }

    /// Long-polls `GET /events?since=…`, yielding one decoded event per
    /// ndjson line until the connection drops.
    pub async fn events(
        &self,
        since: &str,
    ) -> Result<impl Stream<Item = Result<EngineEvent, EngineError>> + Unpin, EngineError> {
        let response = self.get(&format!("/events?since={}", since)).await?;
        let status = response.status();
        if !status.is_success() {
            return UnexpectedStatusSnafu { status }.fail();
        }

        let reader = StreamReader::new(
            response
                .into_body()
                .map(|chunk| chunk.map_err(|error| io::Error::new(io::ErrorKind::Other, error))),
        );
        let lines = FramedRead::new(reader, LinesCodec::new());

        Ok(lines.filter_map(|line| {
            future::ready(match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(serde_json::from_str::<EngineEvent>(&line).context(DecodeSnafu)),
                Err(error) => Some(Err(EngineError::EventStream {
                    source: lines_error_to_io(error),
                })),
            })
        }))
    }
}

fn classify_container_status(id: &str, status: StatusCode) -> Result<(), EngineError> {
    if status == StatusCode::NOT_FOUND || status.is_server_error() {
        return ContainerGoneSnafu { id, status }.fail();
    }
    if !status.is_success() {
        return UnexpectedStatusSnafu { status }.fail();
    }
    Ok(())
}

fn lines_error_to_io(error: LinesCodecError) -> io::Error {
    match error {
        LinesCodecError::Io(error) => error,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "event line too long")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host_is_the_local_socket() {
        let engine = Engine::new(DEFAULT_HOST).unwrap();
        match engine.endpoint {
            Endpoint::Unix { socket, .. } => {
                assert_eq!(socket, PathBuf::from("/var/run/docker.sock"))
            }
            _ => panic!("expected a unix endpoint"),
        }
    }

    #[test]
    fn bare_paths_are_unix_sockets() {
        let engine = Engine::new("/tmp/docker.sock").unwrap();
        assert!(matches!(engine.endpoint, Endpoint::Unix { .. }));
    }

    #[test]
    fn tcp_hosts_build_http_uris() {
        let engine = Engine::new("tcp://127.0.0.1:2375").unwrap();
        let uri = engine.uri("/containers/json").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:2375/containers/json");
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        assert!(matches!(
            Engine::new("ssh://example"),
            Err(EngineError::InvalidHost { .. })
        ));
    }

    #[test]
    fn logs_query_is_nanosecond_precise() {
        let engine = Engine::new("tcp://localhost:2375").unwrap();
        let uri = engine
            .uri("/containers/abc/logs?since=1588336496.123456790&timestamps=1&follow=1&stdout=1&stderr=1")
            .unwrap();
        assert_eq!(
            uri.query(),
            Some("since=1588336496.123456790&timestamps=1&follow=1&stdout=1&stderr=1")
        );
    }

    #[test]
    fn gone_statuses_retire_the_container() {
        assert!(classify_container_status("abc", StatusCode::NOT_FOUND)
            .unwrap_err()
            .is_container_gone());
        assert!(classify_container_status("abc", StatusCode::INTERNAL_SERVER_ERROR)
            .unwrap_err()
            .is_container_gone());
        assert!(matches!(
            classify_container_status("abc", StatusCode::CONFLICT),
            Err(EngineError::UnexpectedStatus { .. })
        ));
        assert!(classify_container_status("abc", StatusCode::OK).is_ok());
    }

    #[test]
    fn engine_events_decode() {
        let event: EngineEvent = serde_json::from_str(
            r#"{"Type":"container","Action":"start","id":"0123abcd","time":1588336496,"timeNano":1588336496123456789}"#,
        )
        .unwrap();
        assert!(event.is_container());
        assert_eq!(event.action, "start");
        assert_eq!(event.id.as_deref(), Some("0123abcd"));
        assert_eq!(event.time_nano, Some(1_588_336_496_123_456_789));
    }

    #[test]
    fn inspect_response_decodes() {
        let details: ContainerDetails = serde_json::from_str(
            r#"{
                "Id": "0123abcd",
                "Name": "/web",
                "Image": "sha256:feed",
                "Config": {
                    "Hostname": "0123abcd",
                    "Image": "nginx:latest",
                    "Tty": false,
                    "Labels": {"org.discourse.mobystash.disable": "yes"}
                },
                "State": {"Status": "running"}
            }"#,
        )
        .unwrap();
        assert_eq!(details.name, "/web");
        assert!(details.state.is_running());
        assert!(!details.config.tty);
        assert_eq!(
            details
                .config
                .labels
                .as_ref()
                .unwrap()
                .get("org.discourse.mobystash.disable")
                .map(String::as_str),
            Some("yes")
        );
    }
}
