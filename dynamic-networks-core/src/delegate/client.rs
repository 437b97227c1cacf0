use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Bytes,
    client::conn::http1,
    header::{self, HeaderValue},
    Method, Request, StatusCode, Uri,
};
use hyper_util::rt::TokioIo;
use log::{debug, trace};
use tokio::{net::UnixStream, time::timeout};

use super::{
    DelegateClient, DelegateError, DelegateRequest, DelegateResponse, DELEGATE_ENDPOINT,
    DELEGATE_HOST,
};

pub const DEFAULT_DELEGATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Talks to the delegate's HTTP endpoint over its unix socket, one connection per request.
#[derive(Debug, Clone)]
pub struct UnixSocketDelegateClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UnixSocketDelegateClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn post(&self, payload: Vec<u8>) -> Result<DelegateResponse, DelegateError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|err| DelegateError::Connection(self.socket_path.display().to_string(), err))?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(DelegateError::Transport)?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("Delegate connection closed with an error! {err:?}");
            }
        });

        let mut request = Request::new(Full::new(Bytes::from(payload)));
        *request.method_mut() = Method::POST;
        *request.uri_mut() = Uri::from_static(DELEGATE_ENDPOINT);
        request
            .headers_mut()
            .insert(header::HOST, HeaderValue::from_static(DELEGATE_HOST));
        request.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let response = sender
            .send_request(request)
            .await
            .map_err(DelegateError::Transport)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(DelegateError::Transport)?
            .to_bytes();

        trace!("Delegate replied with {status}: {body:?}");

        if status != StatusCode::OK {
            return Err(DelegateError::UnexpectedStatus(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        DelegateResponse::parse(&body)
    }
}

#[async_trait]
impl DelegateClient for UnixSocketDelegateClient {
    async fn invoke(&self, request: &DelegateRequest) -> Result<DelegateResponse, DelegateError> {
        debug!(
            "Invoking delegate {} for interface '{}' of pod {}/{}...",
            request.command, request.interface_name, request.pod_namespace, request.pod_name
        );

        let payload = request.to_payload()?;

        timeout(self.timeout, self.post(payload))
            .await
            .map_err(|_| DelegateError::Timeout)?
    }
}
