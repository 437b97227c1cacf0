use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use log::debug;
use tokio::net::UnixStream;
use tonic::{
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint, Uri},
};
use tower::service_fn;

use super::{
    proto::{
        ListPodSandboxRequest, ListPodSandboxResponse, PodSandboxStatusRequest,
        PodSandboxStatusResponse, LIST_POD_SANDBOX_PATH, POD_SANDBOX_STATUS_PATH,
    },
    RuntimeError, SandboxService,
};

pub const DEFAULT_RUNTIME_TIMEOUT: Duration = Duration::from_secs(5);

/// CRI runtime service reached over the runtime's unix socket.
#[derive(Debug, Clone)]
pub struct GrpcSandboxService {
    channel: Channel,
}

impl GrpcSandboxService {
    pub async fn connect(
        socket_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let socket_path: PathBuf = socket_path.into();

        if socket_path.as_os_str().is_empty() {
            return Err(RuntimeError::MissingSocketPath);
        }

        debug!("Connecting to the CRI socket '{}'...", socket_path.display());

        let display_path = socket_path.display().to_string();
        let channel = Endpoint::from_static("http://cri")
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_with_connector(service_fn(move |_: Uri| {
                let socket_path = socket_path.clone();
                async move { UnixStream::connect(socket_path).await.map(TokioIo::new) }
            }))
            .await
            .map_err(|err| RuntimeError::Connection(display_path, err))?;

        Ok(Self { channel })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, RuntimeError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = Grpc::new(self.channel.clone());

        grpc.ready().await.map_err(RuntimeError::Transport)?;

        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await
            .map_err(RuntimeError::Rpc)?;

        Ok(response.into_inner())
    }
}

#[async_trait]
impl SandboxService for GrpcSandboxService {
    async fn list_pod_sandbox(
        &self,
        request: ListPodSandboxRequest,
    ) -> Result<ListPodSandboxResponse, RuntimeError> {
        self.unary(LIST_POD_SANDBOX_PATH, request).await
    }

    async fn pod_sandbox_status(
        &self,
        request: PodSandboxStatusRequest,
    ) -> Result<PodSandboxStatusResponse, RuntimeError> {
        self.unary(POD_SANDBOX_STATUS_PATH, request).await
    }
}
