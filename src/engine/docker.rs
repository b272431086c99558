//! Docker Engine API client over a unix socket.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::pin;

use futures::future::{self, Either};
use futures::stream::{self, StreamExt, TryStreamExt};
use http_body_util::{BodyExt, BodyStream, Empty};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use super::{Container, ContainerEngine, ContainerEvent, EngineError, EventStream};

/// `/events?filters={"type":["container"]}`
const EVENTS_PATH: &str = "/events?filters=%7B%22type%22%3A%5B%22container%22%5D%7D";

/// A Docker Engine reachable through a `unix://` host URL.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    socket: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerDetails {
    id: String,
    name: String,
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    pid: i64,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor", default)]
    actor: EventActor,
}

#[derive(Debug, Default, Deserialize)]
struct EventActor {
    #[serde(rename = "ID", default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

impl ContainerDetails {
    fn into_container(self) -> Option<Container> {
        let pid = u32::try_from(self.state.pid).unwrap_or(0);
        if !self.state.running || pid == 0 {
            return None;
        }
        Some(Container {
            id: self.id,
            name: self.name.trim_start_matches('/').to_string(),
            pid,
        })
    }
}

type Connection = http1::Connection<TokioIo<UnixStream>, Empty<Bytes>>;
type Sender = http1::SendRequest<Empty<Bytes>>;

impl DockerEngine {
    /// Creates a client for `host`, which must be a `unix://` URL such as
    /// `unix:///run/docker.sock`.
    pub fn new(host: &str) -> Result<Self, EngineError> {
        match host.strip_prefix("unix://") {
            Some(path) if !path.is_empty() => Ok(Self {
                socket: PathBuf::from(path),
            }),
            _ => Err(EngineError::UnsupportedHost(host.to_string())),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn connect(&self) -> Result<(Sender, Connection), EngineError> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|source| EngineError::Connect {
                path: self.socket.clone(),
                source,
            })?;
        Ok(http1::handshake(TokioIo::new(stream)).await?)
    }

    fn request(path: &str) -> Result<Request<Empty<Bytes>>, EngineError> {
        Ok(Request::get(path)
            .header(hyper::header::HOST, "docker")
            .body(Empty::new())?)
    }

    /// Drives `conn` until `exchange` completes.
    async fn drive<T>(
        exchange: impl Future<Output = Result<T, EngineError>>,
        conn: impl Future<Output = hyper::Result<()>>,
    ) -> Result<T, EngineError> {
        match future::select(pin!(exchange), pin!(conn)).await {
            Either::Left((result, _)) => result,
            Either::Right((result, exchange)) => {
                result?;
                exchange.await
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let (mut sender, conn) = self.connect().await?;
        let request = Self::request(path)?;
        let exchange = async move {
            let response = sender.send_request(request).await?;
            let status = response.status();
            let body = response.into_body().collect().await?.to_bytes();
            Ok::<_, EngineError>((status, body))
        };
        let (status, body) = Self::drive(exchange, conn).await?;
        trace!("GET {path}: {status}");

        if !status.is_success() {
            return Err(EngineError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorMessage>(body)
        .map(|error| error.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string())
}

/// Translates one line of the event stream; `None` for events that do not
/// affect the set of running containers.
fn parse_event(line: &str) -> Result<Option<ContainerEvent>, EngineError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let message: EventMessage = serde_json::from_str(line)?;
    if message.kind != "container" || message.actor.id.is_empty() {
        return Ok(None);
    }
    let id = message.actor.id;
    // Exec and health check actions come in as e.g. "exec_start: sh" or
    // "health_status: healthy".
    let event = match message.action.split(':').next().unwrap_or_default() {
        // A kill only delivers a signal; the container may well survive it.
        "start" | "restart" | "unpause" | "rename" | "update" | "kill" => {
            ContainerEvent::Changed(id)
        }
        "die" | "stop" | "destroy" => ContainerEvent::Removed(id),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn containers(&self) -> Result<Vec<Container>, EngineError> {
        let summaries: Vec<ContainerSummary> = self.get_json("/containers/json").await?;
        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            // Containers may vanish between listing and inspection.
            if let Some(container) = self.container(&summary.id).await? {
                containers.push(container);
            }
        }
        Ok(containers)
    }

    async fn container(&self, id: &str) -> Result<Option<Container>, EngineError> {
        match self
            .get_json::<ContainerDetails>(&format!("/containers/{id}/json"))
            .await
        {
            Ok(details) => Ok(details.into_container()),
            Err(EngineError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn events(&self) -> Result<EventStream, EngineError> {
        let (mut sender, conn) = self.connect().await?;
        let mut conn = Box::pin(conn);
        let request = Self::request(EVENTS_PATH)?;
        let response = match future::select(pin!(sender.send_request(request)), conn.as_mut()).await
        {
            Either::Left((response, _)) => response?,
            Either::Right((result, _)) => {
                result?;
                return Err(EngineError::StreamClosed);
            }
        };
        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = Self::drive(
                async move {
                    Ok::<_, EngineError>(response.into_body().collect().await?.to_bytes())
                },
                conn,
            )
            .await?;
            return Err(EngineError::Status {
                path: EVENTS_PATH.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        debug!("subscribed to container events at {}", self.socket.display());

        let body = BodyStream::new(response.into_body())
            .try_filter_map(|frame| future::ready(Ok(frame.into_data().ok())))
            .map_err(io::Error::other);
        let events = FramedRead::new(StreamReader::new(body), LinesCodec::new())
            .map_err(EngineError::from)
            .try_filter_map(|line| future::ready(parse_event(&line)));

        // The connection has to be polled for the body to make progress. It
        // only yields an item if it fails.
        let connection = stream::once(async move {
            let _sender = sender;
            conn.await
        })
        .filter_map(|result| future::ready(result.err().map(|err| Err(EngineError::from(err)))));

        Ok(stream::select(events, connection).boxed())
    }
}
