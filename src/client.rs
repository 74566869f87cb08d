#![cfg(feature = "client")]
//! Typed HTTP client for the equipment API.
//!
//! The token is explicit state on [`ApiClient`]: it is attached to every
//! request as `Authorization: Token <value>` and dropped as soon as the
//! server answers 401, so a stale token is never sent twice.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::equipment::EquipmentRecord;
use crate::summary::SummaryStatistics;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the token or credentials; the token was cleared
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub message: String,
    pub session_id: u64,
    pub record_count: usize,
    pub skipped_rows: usize,
    pub summary: SummaryStatistics,
}

/// Summary of one session; the session fields are `None` when the user has
/// not uploaded anything yet
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Option<u64>,
    pub filename: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub summary: SummaryStatistics,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: u64,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub equipment_count: usize,
    pub summary: SummaryStatistics,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct Registration<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        ApiClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            http: Client::new(),
        }
    }

    /// Start from a token obtained earlier (e.g. printed by `equipctl login`)
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError> {
        let request = self
            .request(Method::POST, "/auth/login/")
            .json(&Credentials { username, password });
        let login: LoginResponse = self.send(request).await?.json().await?;
        self.token = Some(login.token.clone());
        Ok(login)
    }

    pub async fn register(
        &mut self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError> {
        let request = self
            .request(Method::POST, "/auth/register/")
            .json(&Registration {
                username,
                email,
                password,
            });
        let login: LoginResponse = self.send(request).await?.json().await?;
        self.token = Some(login.token.clone());
        Ok(login)
    }

    /// Revoke the token on the server; the local token is cleared either way
    pub async fn logout(&mut self) -> Result<(), ClientError> {
        if self.token.is_none() {
            return Ok(());
        }
        let request = self.request(Method::POST, "/auth/logout/");
        let result = self.send(request).await.map(|_| ());
        self.token = None;
        result
    }

    /// Upload a CSV file from disk
    pub async fn upload_csv(&mut self, path: &Path) -> Result<UploadResult, ClientError> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());
        self.upload_bytes(&filename, bytes).await
    }

    /// Upload CSV content under the given file name
    pub async fn upload_bytes(
        &mut self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResult, ClientError> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("text/csv")?;
        let request = self
            .request(Method::POST, "/upload/")
            .multipart(Form::new().part("file", part));
        Ok(self.send(request).await?.json().await?)
    }

    pub async fn equipment(
        &mut self,
        session_id: Option<u64>,
    ) -> Result<Vec<EquipmentRecord>, ClientError> {
        let request = with_session(self.request(Method::GET, "/equipment/"), session_id);
        Ok(self.send(request).await?.json().await?)
    }

    pub async fn summary(&mut self, session_id: Option<u64>) -> Result<SessionSummary, ClientError> {
        let request = with_session(self.request(Method::GET, "/summary/"), session_id);
        Ok(self.send(request).await?.json().await?)
    }

    pub async fn history(&mut self) -> Result<Vec<HistoryItem>, ClientError> {
        let request = self.request(Method::GET, "/history/");
        Ok(self.send(request).await?.json().await?)
    }

    /// Download the PDF report of a session
    pub async fn download_pdf(&mut self, session_id: Option<u64>) -> Result<Vec<u8>, ClientError> {
        let request = with_session(self.request(Method::GET, "/report/pdf/"), session_id);
        Ok(self.send(request).await?.bytes().await?.to_vec())
    }

    /// Download a PNG chart (`types`, `flowrate` or `parameters`)
    pub async fn chart(
        &mut self,
        kind: &str,
        session_id: Option<u64>,
    ) -> Result<Vec<u8>, ClientError> {
        let path = format!("/chart/{kind}/");
        let request = with_session(self.request(Method::GET, &path), session_id);
        Ok(self.send(request).await?.bytes().await?.to_vec())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Token {token}")),
            None => builder,
        }
    }

    async fn send(&mut self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        debug!("{} -> {}", response.url().path(), status);
        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(response).await;
        if status == StatusCode::UNAUTHORIZED {
            if self.token.take().is_some() {
                warn!("server rejected the token; cleared it");
            }
            return Err(ClientError::Unauthorized(message));
        }
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn with_session(request: RequestBuilder, session_id: Option<u64>) -> RequestBuilder {
    match session_id {
        Some(id) => request.query(&[("session_id", id)]),
        None => request,
    }
}

// The server's `error` field, or a generic message for non-JSON bodies
async fn error_message(response: Response) -> String {
    let status = response.status();
    response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| format!("Request failed with status {status}"))
}
