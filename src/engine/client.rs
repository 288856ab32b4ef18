//! Engine client
//!
//! [`Engine`] is everything the registry asks of the container engine.
//! [`DockerEngine`] implements it with bollard over the engine's unix
//! socket. Container logs are the exception: they are fetched with a plain
//! hyper connection so the raw multiplexed body reaches the frame decoder
//! untouched.

use super::api::{DiskUsage, ErrorResponse, ImageSummary, VolumeSummary};
use crate::compose::config::normalize_name;
use crate::container::ContainerInfo;
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use bollard::container::{
    DownloadFromContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, UploadToContainerOptions,
};
use bollard::image::{ImportImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, Empty};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Default engine socket path
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Seconds bollard waits on a single engine request
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Bytes of log output buffered between the connection and the reader
const LOG_BUFFER: usize = 64 * 1024;

/// Raw multiplexed log stream
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Container engine operations used by the registry
#[async_trait]
pub trait Engine: Send + Sync {
    /// Check that the engine answers
    async fn ping(&self) -> Result<()>;

    /// Engine server version
    async fn version(&self) -> Result<String>;

    /// Containers; `all` includes stopped ones
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>>;

    /// `State.Health` of a container, `null` when it has no healthcheck
    async fn inspect_health(&self, container: &str) -> Result<serde_json::Value>;

    /// Images; `all` includes intermediate layers
    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>>;

    /// Force-remove an image and its untagged parents
    async fn remove_image(&self, id: &str) -> Result<()>;

    /// Force-remove a container
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Volumes
    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>>;

    /// Create a named volume
    async fn create_volume(&self, name: &str) -> Result<()>;

    /// Force-remove a volume
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Disk usage, including per-volume size and reference count
    async fn disk_usage(&self) -> Result<DiskUsage>;

    /// Export images into a tar archive at `destination`
    async fn save_images(&self, tags: &[String], destination: &Path) -> Result<()>;

    /// Import images from a tar archive
    async fn load_images(&self, archive: &Path) -> Result<()>;

    /// Multiplexed stdout/stderr of a container
    async fn container_logs(&self, id: &str, tail: Option<usize>, follow: bool)
        -> Result<LogStream>;

    /// Extract a tar archive into `directory` inside a container
    async fn copy_to_container(&self, id: &str, directory: &str, archive: Vec<u8>) -> Result<()>;

    /// Read `path` out of a container as a tar archive
    async fn copy_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>>;

    /// Whether `<service>:latest` exists locally
    async fn image_exists(&self, service: &str) -> Result<bool> {
        let wanted = format!("{}:latest", normalize_name(service));
        Ok(self
            .list_images(true)
            .await?
            .iter()
            .any(|image| image.has_tag(&wanted)))
    }
}

/// Error for a non-2xx engine answer
fn status_error(request: String, status: u16, message: String) -> WardenError {
    if status == 404 {
        return WardenError::NotFound(message);
    }
    WardenError::Engine {
        request,
        status,
        message,
    }
}

/// Map a bollard error onto the registry's taxonomy. Anything that is not an
/// engine answer means the engine could not be reached.
fn engine_error(request: impl Into<String>, err: bollard::errors::Error) -> WardenError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => status_error(request.into(), status_code, message),
        other => WardenError::EngineUnavailable(format!("{}: {}", request.into(), other)),
    }
}

/// Engine client speaking the Docker Engine API over a unix socket
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    socket_path: PathBuf,
}

impl DockerEngine {
    /// Create a client for the engine listening on `socket_path`. No
    /// connection is made until the first request.
    pub fn new(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path = socket_path.into();
        let docker = Docker::connect_with_unix(
            &socket_path.to_string_lossy(),
            REQUEST_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| {
            WardenError::EngineUnavailable(format!(
                "cannot use {}: {}",
                socket_path.display(),
                e
            ))
        })?;
        Ok(Self {
            docker,
            socket_path,
        })
    }

    /// Create a client and make sure the engine answers
    pub async fn connect(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let engine = Self::new(socket_path)?;
        engine.ping().await.map_err(|e| match e {
            WardenError::EngineUnavailable(_) => e,
            other => WardenError::EngineUnavailable(other.to_string()),
        })?;
        Ok(engine)
    }

    /// Socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// GET `path` on a fresh connection and hand back the response body as
    /// a byte stream, with no decoding beyond HTTP framing.
    async fn raw_get(&self, path: &str) -> Result<LogStream> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            WardenError::EngineUnavailable(format!(
                "cannot connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(|e| WardenError::EngineUnavailable(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Engine connection closed: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(hyper::header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| WardenError::InvalidConfig(e.to_string()))?;

        debug!("Engine request: GET {}", path);
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| WardenError::EngineUnavailable(e.to_string()))?;

        let status = response.status();
        debug!("Engine response: GET {} -> {}", path, status);
        if !status.is_success() {
            let raw = response
                .into_body()
                .collect()
                .await
                .map(|body| body.to_bytes())
                .unwrap_or_default();
            let message = serde_json::from_slice::<ErrorResponse>(&raw)
                .map(|e| e.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&raw).trim().to_string());
            return Err(status_error(
                format!("GET {}", path),
                status.as_u16(),
                message,
            ));
        }

        let (mut writer, reader) = tokio::io::duplex(LOG_BUFFER);
        let mut body = response.into_body();
        tokio::spawn(async move {
            while let Some(frame) = body.frame().await {
                let data = match frame {
                    Ok(frame) => match frame.into_data() {
                        Ok(data) => data,
                        Err(_) => continue,
                    },
                    Err(e) => {
                        debug!("Engine body ended early: {}", e);
                        break;
                    }
                };
                if writer.write_all(&data).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(reader))
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| engine_error("ping", e))
    }

    async fn version(&self) -> Result<String> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| engine_error("version", e))?;
        Ok(version.version.unwrap_or_default())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| engine_error("list containers", e))?;
        Ok(summaries.into_iter().map(ContainerInfo::from).collect())
    }

    async fn inspect_health(&self, container: &str) -> Result<serde_json::Value> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| engine_error(format!("inspect {}", container), e))?;
        match inspect.state.and_then(|state| state.health) {
            Some(health) => Ok(serde_json::to_value(health)?),
            None => Ok(serde_json::Value::Null),
        }
    }

    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptions::<String> {
            all,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| engine_error("list images", e))?;
        Ok(images.into_iter().map(ImageSummary::from).collect())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            noprune: false,
        };
        self.docker
            .remove_image(id, Some(options), None)
            .await
            .map(|_| ())
            .map_err(|e| engine_error(format!("remove image {}", id), e))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| engine_error(format!("remove container {}", id), e))
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeSummary>> {
        let list = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await
            .map_err(|e| engine_error("list volumes", e))?;
        Ok(list
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(VolumeSummary::from)
            .collect())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map(|_| ())
            .map_err(|e| engine_error(format!("create volume {}", name), e))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(|e| engine_error(format!("remove volume {}", name), e))
    }

    async fn disk_usage(&self) -> Result<DiskUsage> {
        let usage = self
            .docker
            .df()
            .await
            .map_err(|e| engine_error("disk usage", e))?;
        Ok(DiskUsage::from(usage))
    }

    async fn save_images(&self, tags: &[String], destination: &Path) -> Result<()> {
        let names: Vec<&str> = tags.iter().map(String::as_str).collect();
        let mut stream = self.docker.export_images(&names);
        let mut file = tokio::fs::File::create(destination).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| engine_error("save images", e))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn load_images(&self, archive: &Path) -> Result<()> {
        let contents = tokio::fs::read(archive).await?;
        let mut stream =
            self.docker
                .import_image(ImportImageOptions { quiet: true }, Bytes::from(contents), None);
        while let Some(info) = stream.next().await {
            let info = info.map_err(|e| engine_error("load images", e))?;
            if let Some(error) = info.error {
                return Err(WardenError::Engine {
                    request: "load images".to_string(),
                    status: 200,
                    message: error,
                });
            }
        }
        Ok(())
    }

    async fn container_logs(
        &self,
        id: &str,
        tail: Option<usize>,
        follow: bool,
    ) -> Result<LogStream> {
        let tail = tail
            .map(|n| n.to_string())
            .unwrap_or_else(|| "all".to_string());
        self.raw_get(&format!(
            "/containers/{}/logs?stdout=1&stderr=1&follow={}&tail={}",
            id,
            if follow { "1" } else { "0" },
            tail
        ))
        .await
    }

    async fn copy_to_container(&self, id: &str, directory: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: directory.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), Bytes::from(archive))
            .await
            .map_err(|e| engine_error(format!("copy into {}", id), e))
    }

    async fn copy_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| engine_error(format!("copy from {}", id), e))?;
            archive.extend_from_slice(&chunk);
        }
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::logs::{next_frame, Frame, StreamType};
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::UnixListener;

    /// Serve exactly one canned response on a temporary socket and hand back
    /// the request head the client sent.
    async fn serve_once(response: Vec<u8>) -> (TempDir, PathBuf, tokio::task::JoinHandle<String>) {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("engine.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                request.push_str(&line);
                if line.trim().is_empty() {
                    break;
                }
            }
            let mut stream = reader.into_inner();
            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });

        (temp, socket, handle)
    }

    fn http_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nServer: Docker/24.0.5\r\n\r\n",
            status,
            content_type,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    #[test]
    fn test_engine_error_mapping() {
        let missing = engine_error(
            "remove container ghost",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "No such container: ghost".to_string(),
            },
        );
        assert!(matches!(missing, WardenError::NotFound(m) if m == "No such container: ghost"));

        let conflict = engine_error(
            "remove volume data",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message: "volume is in use".to_string(),
            },
        );
        assert!(matches!(
            conflict,
            WardenError::Engine { status: 409, ref request, .. } if request == "remove volume data"
        ));
        assert!(!conflict.is_fatal());
    }

    #[tokio::test]
    async fn test_connect_refused_is_engine_unavailable() {
        let temp = TempDir::new().unwrap();
        let err = DockerEngine::connect(temp.path().join("missing.sock"))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::EngineUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_logs_stream_is_raw_frames() {
        let mut body = Frame::new(StreamType::Stdout, b"line one\n".to_vec()).encode();
        body.extend(Frame::new(StreamType::Stderr, b"oops\n".to_vec()).encode());
        let (_temp, socket, handle) = serve_once(http_response(
            "200 OK",
            "application/vnd.docker.raw-stream",
            &body,
        ))
        .await;

        let engine = DockerEngine::new(&socket).unwrap();
        let mut stream = engine.container_logs("abc", Some(10), false).await.unwrap();

        let first = next_frame(&mut stream).await.unwrap().unwrap();
        let second = next_frame(&mut stream).await.unwrap().unwrap();
        assert!(next_frame(&mut stream).await.unwrap().is_none());
        assert_eq!(first.payload, b"line one\n".to_vec());
        assert_eq!(second.stream, StreamType::Stderr);

        let request = handle.await.unwrap();
        assert!(request.starts_with(
            "GET /containers/abc/logs?stdout=1&stderr=1&follow=0&tail=10 HTTP/1.1\r\n"
        ));
    }

    #[tokio::test]
    async fn test_logs_of_missing_container_is_not_found() {
        let (_temp, socket, handle) = serve_once(http_response(
            "404 Not Found",
            "application/json",
            br#"{"message":"No such container: ghost"}"#,
        ))
        .await;

        let engine = DockerEngine::new(&socket).unwrap();
        let err = match engine.container_logs("ghost", None, false).await {
            Ok(_) => panic!("logs of a missing container should fail"),
            Err(e) => e,
        };
        let request = handle.await.unwrap();

        assert!(request.contains("tail=all"));
        assert!(matches!(err, WardenError::NotFound(m) if m == "No such container: ghost"));
    }
}
