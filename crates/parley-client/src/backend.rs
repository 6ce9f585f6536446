use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use parley_types::api::{
    CreateChannelRequest, CreateChannelResponse, CreateWorkspaceRequest, CreateWorkspaceResponse,
    ErrorBody, JoinWorkspaceResponse, LoginRequest, LoginResponse, RegisterRequest,
    RegisterResponse, SendDirectMessageRequest, SendMessageRequest, SessionBootstrap,
    ToggleReactionRequest, ToggleReactionResponse, UpdateStatusRequest, UploadResponse,
    WorkspaceNameResponse,
};
use parley_types::models::{
    Channel, ChannelMessage, DirectMessage, MemberSummary, SearchResult, UserProfile, UserStatus,
    WorkspaceMembership,
};

use crate::error::ClientError;

/// A file picked for upload, held in memory until the send goes out.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk. The name is the path's final component.
    pub async fn read(path: impl AsRef<Path>, content_type: impl Into<String>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(name, content_type, bytes))
    }
}

/// The calls the sync layer makes against the server. `HttpBackend` is the
/// real implementation; tests substitute an in-memory one.
pub trait Backend: Send + Sync {
    fn list_messages(
        &self,
        channel_id: Uuid,
    ) -> impl Future<Output = Result<Vec<ChannelMessage>, ClientError>> + Send;

    fn get_message(
        &self,
        message_id: Uuid,
    ) -> impl Future<Output = Result<ChannelMessage, ClientError>> + Send;

    fn send_message(
        &self,
        channel_id: Uuid,
        req: &SendMessageRequest,
    ) -> impl Future<Output = Result<ChannelMessage, ClientError>> + Send;

    fn upload_file(
        &self,
        file: &LocalFile,
    ) -> impl Future<Output = Result<UploadResponse, ClientError>> + Send;

    fn toggle_reaction(
        &self,
        message_id: Uuid,
        emoji: &str,
    ) -> impl Future<Output = Result<ToggleReactionResponse, ClientError>> + Send;

    fn get_conversation(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<DirectMessage>, ClientError>> + Send;

    fn get_direct_message(
        &self,
        message_id: Uuid,
    ) -> impl Future<Output = Result<DirectMessage, ClientError>> + Send;

    fn send_direct_message(
        &self,
        user_id: Uuid,
        content: &str,
    ) -> impl Future<Output = Result<DirectMessage, ClientError>> + Send;
}

/// REST client for a Parley server, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    base: Url,
    token: String,
}

impl HttpBackend {
    pub fn new(server_url: &str, token: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: Client::new(),
            base: Url::parse(server_url)?,
            token: token.into(),
        })
    }

    pub async fn login(server_url: &str, email: &str, password: &str) -> Result<(Self, LoginResponse), ClientError> {
        let base = Url::parse(server_url)?;
        let http = Client::new();
        let resp = http
            .post(base.join("/auth/login")?)
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let login: LoginResponse = decode(resp).await?;
        let backend = Self {
            http,
            base,
            token: login.token.clone(),
        };
        Ok((backend, login))
    }

    pub async fn register(server_url: &str, req: &RegisterRequest) -> Result<(Self, RegisterResponse), ClientError> {
        let base = Url::parse(server_url)?;
        let http = Client::new();
        let resp = http.post(base.join("/auth/register")?).json(req).send().await?;
        let registered: RegisterResponse = decode(resp).await?;
        let backend = Self {
            http,
            base,
            token: registered.token.clone(),
        };
        Ok((backend, registered))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self
            .http
            .get(self.base.join(path)?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        let resp = self
            .http
            .post(self.base.join(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }

    /// `GET /platform`, joining `workspace_id` first when given.
    pub async fn bootstrap(&self, workspace_id: Option<&str>) -> Result<SessionBootstrap, ClientError> {
        let mut url = self.base.join("/platform")?;
        if let Some(id) = workspace_id {
            url.query_pairs_mut().append_pair("workspaceId", id);
        }
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        decode(resp).await
    }

    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        self.get("/api/me").await
    }

    pub async fn update_status(&self, status: UserStatus) -> Result<UserProfile, ClientError> {
        let resp = self
            .http
            .put(self.base.join("/api/me/status")?)
            .bearer_auth(&self.token)
            .json(&UpdateStatusRequest { status })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn list_workspaces(&self) -> Result<Vec<WorkspaceMembership>, ClientError> {
        self.get("/api/workspaces").await
    }

    pub async fn create_workspace(&self, name: &str) -> Result<CreateWorkspaceResponse, ClientError> {
        self.post("/api/workspaces", &CreateWorkspaceRequest { name: name.to_string() })
            .await
    }

    pub async fn workspace_name(&self, workspace_id: Uuid) -> Result<String, ClientError> {
        let resp: WorkspaceNameResponse = self
            .get(&format!("/api/workspaces/{}/name", workspace_id))
            .await?;
        Ok(resp.name)
    }

    pub async fn join_workspace(&self, workspace_id: Uuid) -> Result<bool, ClientError> {
        let resp: JoinWorkspaceResponse = self
            .post(&format!("/api/workspaces/{}/join", workspace_id), &())
            .await?;
        Ok(resp.joined)
    }

    pub async fn list_members(&self, workspace_id: Uuid) -> Result<Vec<MemberSummary>, ClientError> {
        self.get(&format!("/api/workspaces/{}/members", workspace_id))
            .await
    }

    pub async fn list_channels(&self, workspace_id: Uuid) -> Result<Vec<Channel>, ClientError> {
        self.get(&format!("/api/workspaces/{}/channels", workspace_id))
            .await
    }

    pub async fn create_channel(&self, workspace_id: Uuid, name: &str) -> Result<CreateChannelResponse, ClientError> {
        self.post(
            &format!("/api/workspaces/{}/channels", workspace_id),
            &CreateChannelRequest { name: name.to_string() },
        )
        .await
    }

    pub async fn get_channel(&self, channel_id: Uuid) -> Result<Channel, ClientError> {
        self.get(&format!("/api/channels/{}", channel_id)).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ClientError> {
        let mut url = self.base.join("/api/search")?;
        url.query_pairs_mut().append_pair("q", query);
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        decode(resp).await
    }
}

impl Backend for HttpBackend {
    async fn list_messages(&self, channel_id: Uuid) -> Result<Vec<ChannelMessage>, ClientError> {
        self.get(&format!("/api/channels/{}/messages", channel_id))
            .await
    }

    async fn get_message(&self, message_id: Uuid) -> Result<ChannelMessage, ClientError> {
        self.get(&format!("/api/messages/{}", message_id)).await
    }

    async fn send_message(&self, channel_id: Uuid, req: &SendMessageRequest) -> Result<ChannelMessage, ClientError> {
        self.post(&format!("/api/channels/{}/messages", channel_id), req)
            .await
    }

    async fn upload_file(&self, file: &LocalFile) -> Result<UploadResponse, ClientError> {
        let mut url = self.base.join("/api/files")?;
        url.query_pairs_mut().append_pair("name", &file.name);

        debug!("Uploading {} ({} bytes)", file.name, file.bytes.len());
        let sent = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, &file.content_type)
            .body(file.bytes.clone())
            .send()
            .await;

        let result = match sent {
            Ok(resp) => decode(resp).await,
            Err(e) => Err(e.into()),
        };
        result.map_err(|e| ClientError::Upload {
            file: file.name.clone(),
            reason: e.to_string(),
        })
    }

    async fn toggle_reaction(&self, message_id: Uuid, emoji: &str) -> Result<ToggleReactionResponse, ClientError> {
        self.post(
            &format!("/api/messages/{}/reactions", message_id),
            &ToggleReactionRequest { emoji: emoji.to_string() },
        )
        .await
    }

    async fn get_conversation(&self, user_id: Uuid) -> Result<Vec<DirectMessage>, ClientError> {
        self.get(&format!("/api/dm/{}", user_id)).await
    }

    async fn get_direct_message(&self, message_id: Uuid) -> Result<DirectMessage, ClientError> {
        self.get(&format!("/api/dm/messages/{}", message_id)).await
    }

    async fn send_direct_message(&self, user_id: Uuid, content: &str) -> Result<DirectMessage, ClientError> {
        self.post(
            &format!("/api/dm/{}", user_id),
            &SendDirectMessageRequest { content: content.to_string() },
        )
        .await
    }
}

/// Deserialize a success body, or turn the server's `{ "error": ... }` into
/// `ClientError::Status`.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}
