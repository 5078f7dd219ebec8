//! Gist-shaped HTTP implementation of [`DocumentService`].
//!
//! The client handle is built once from an already-acquired bearer token; how
//! that token was obtained (OAuth, keyring) is not this module's concern.
//! Every request carries the fixed [`REQUEST_TIMEOUT`].
//!
//! ## Document versions
//!
//! A document's version is the newest revision in its `history`, falling back
//! to the response `ETag` when no history is returned. The gists API does not
//! honor `If-Match` on edits (and its ETags are weak), so a conditional edit
//! re-reads the document and refuses with `Conflict` when the version moved.
//! This narrows the lost-update window to the gap between that read and the
//! PATCH; it does not close it.

use super::documents::{Document, DocumentEdit, DocumentService, DocumentSummary, NewDocument};
use crate::config::REQUEST_TIMEOUT;
use crate::error::{Result, StashError};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, ETAG};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const PAGE_SIZE: usize = 100;
const ACCEPT_JSON: &str = "application/vnd.github+json";

pub struct HttpDocumentService {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl HttpDocumentService {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("promptstash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StashError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.token.expose_secret())
            .header(ACCEPT, ACCEPT_JSON)
    }

    fn send(&self, operation: &str, builder: RequestBuilder) -> Result<Response> {
        let response = self
            .authed(builder)
            .send()
            .map_err(|e| transport_error(operation, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(classify_status(operation, status.as_u16(), &body))
    }

    fn read_document(&self, operation: &str, response: Response) -> Result<Document> {
        let version = etag(&response);
        let gist: GistResponse = response
            .json()
            .map_err(|e| StashError::network(operation, None, format!("invalid response body: {e}")))?;
        let (mut doc, truncated) = gist.into_document(version);
        for (name, raw_url) in truncated {
            tracing::debug!(file = %name, "fetching truncated file content");
            let text = self
                .send("get raw file", self.client.get(&raw_url))?
                .text()
                .map_err(|e| transport_error("get raw file", &e))?;
            doc.files.insert(name, text);
        }
        Ok(doc)
    }
}

impl DocumentService for HttpDocumentService {
    fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let url = self.url(&format!("/gists?per_page={}&page={}", PAGE_SIZE, page));
            let batch: Vec<GistResponse> = self
                .send("list documents", self.client.get(url))?
                .json()
                .map_err(|e| StashError::network("list documents", None, format!("invalid response body: {e}")))?;
            let len = batch.len();
            all.extend(batch.into_iter().map(GistResponse::into_summary));
            if len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    fn get_document(&self, id: &str) -> Result<Document> {
        let response = self.send("get document", self.client.get(self.url(&format!("/gists/{id}"))))?;
        self.read_document("get document", response)
    }

    fn create_document(&self, doc: &NewDocument) -> Result<Document> {
        let body = CreateBody {
            description: &doc.description,
            public: doc.public,
            files: doc
                .files
                .iter()
                .map(|(name, content)| (name.as_str(), FileBody { content }))
                .collect(),
        };
        let response = self.send(
            "create document",
            self.client.post(self.url("/gists")).json(&body),
        )?;
        self.read_document("create document", response)
    }

    fn edit_document(&self, id: &str, edit: &DocumentEdit) -> Result<Document> {
        let body = EditBody {
            description: edit.description.as_deref(),
            files: edit
                .files
                .iter()
                .map(|(name, content)| {
                    (name.as_str(), content.as_deref().map(|c| FileBody { content: c }))
                })
                .collect(),
        };
        if let Some(expected) = &edit.if_version {
            let current = self.get_document(id)?;
            check_version(expected, current.version.as_deref())?;
        }
        let request = self.client.patch(self.url(&format!("/gists/{id}"))).json(&body);
        let response = self.send("edit document", request)?;
        self.read_document("edit document", response)
    }

    fn delete_document(&self, id: &str) -> Result<()> {
        self.send("delete document", self.client.delete(self.url(&format!("/gists/{id}"))))?;
        Ok(())
    }
}

fn etag(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn transport_error(operation: &str, err: &reqwest::Error) -> StashError {
    let message = if err.is_timeout() {
        format!("request timed out after {}s", REQUEST_TIMEOUT.as_secs())
    } else {
        err.to_string()
    };
    StashError::network(operation, err.status().map(|s| s.as_u16()), message)
}

/// Refuse a conditional edit when the document moved past the version read.
pub(crate) fn check_version(expected: &str, current: Option<&str>) -> Result<()> {
    match current {
        Some(version) if version != expected => {
            tracing::debug!(expected, current = version, "document version moved");
            Err(StashError::Conflict { attempts: 1 })
        }
        _ => Ok(()),
    }
}

/// Map a non-success HTTP status to the engine's error taxonomy.
pub(crate) fn classify_status(operation: &str, status: u16, body: &str) -> StashError {
    match status {
        403 if body.to_lowercase().contains("rate limit") => {
            StashError::network(operation, Some(status), "rate limit exceeded")
        }
        401 | 403 => StashError::Auth(format!("{operation} rejected with HTTP {status}")),
        404 => StashError::NotFound(operation.to_string()),
        409 | 412 => StashError::Conflict { attempts: 1 },
        _ => StashError::network(operation, Some(status), body.chars().take(200).collect::<String>()),
    }
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GistRevision {
    version: String,
}

#[derive(Debug, Deserialize)]
struct GistResponse {
    id: String,
    html_url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    files: BTreeMap<String, GistFile>,
    #[serde(default)]
    history: Vec<GistRevision>,
}

impl GistResponse {
    fn into_summary(self) -> DocumentSummary {
        DocumentSummary {
            id: self.id,
            html_url: self.html_url,
            description: self.description.unwrap_or_default(),
        }
    }

    /// Returns the document plus `(file, raw_url)` pairs whose inline content
    /// was truncated by the service.
    fn into_document(self, etag: Option<String>) -> (Document, Vec<(String, String)>) {
        let mut files = BTreeMap::new();
        let mut truncated = Vec::new();
        for (name, file) in self.files {
            match (file.truncated, file.raw_url) {
                (true, Some(raw_url)) => truncated.push((name, raw_url)),
                _ => {
                    files.insert(name, file.content.unwrap_or_default());
                }
            }
        }
        let version = self
            .history
            .into_iter()
            .next()
            .map(|revision| revision.version)
            .or(etag);
        let doc = Document {
            id: self.id,
            html_url: self.html_url,
            description: self.description.unwrap_or_default(),
            public: self.public,
            files,
            version,
        };
        (doc, truncated)
    }
}

#[derive(Serialize)]
struct FileBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    description: &'a str,
    public: bool,
    files: BTreeMap<&'a str, FileBody<'a>>,
}

#[derive(Serialize)]
struct EditBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    files: BTreeMap<&'a str, Option<FileBody<'a>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status("op", 401, "").kind(), ErrorKind::Auth);
        assert_eq!(classify_status("op", 403, "Bad credentials").kind(), ErrorKind::Auth);
        assert_eq!(
            classify_status("op", 403, "API rate limit exceeded for user").kind(),
            ErrorKind::Network
        );
        assert_eq!(classify_status("op", 404, "").kind(), ErrorKind::NotFound);
        assert_eq!(classify_status("op", 412, "").kind(), ErrorKind::Conflict);
        assert_eq!(classify_status("op", 502, "bad gateway").kind(), ErrorKind::Network);
    }

    #[test]
    fn gist_json_becomes_document() {
        let json = r#"{
            "id": "aa11",
            "html_url": "https://gist.github.com/aa11",
            "description": "promptstash-index",
            "public": false,
            "updated_at": "2024-05-01T10:00:00Z",
            "files": {
                "index.json": {"filename": "index.json", "content": "{}", "truncated": false},
                "big.yaml": {"filename": "big.yaml", "content": "par", "truncated": true,
                             "raw_url": "https://gist.githubusercontent.com/raw/big.yaml"}
            }
        }"#;
        let gist: GistResponse = serde_json::from_str(json).unwrap();
        let (doc, truncated) = gist.into_document(Some("W/\"abc\"".to_string()));
        assert_eq!(doc.id, "aa11");
        assert_eq!(doc.file(Some("index.json")), Some("{}"));
        assert!(!doc.files.contains_key("big.yaml"));
        assert_eq!(truncated.len(), 1);
        assert_eq!(doc.version.as_deref(), Some("W/\"abc\""));
    }

    #[test]
    fn history_revision_wins_over_etag() {
        let json = r#"{
            "id": "aa11",
            "html_url": "https://gist.github.com/aa11",
            "files": {},
            "history": [{"version": "57a7f0"}, {"version": "0c1d22"}]
        }"#;
        let gist: GistResponse = serde_json::from_str(json).unwrap();
        let (doc, _) = gist.into_document(Some("W/\"abc\"".to_string()));
        assert_eq!(doc.version.as_deref(), Some("57a7f0"));
    }

    #[test]
    fn moved_version_is_a_conflict() {
        assert!(check_version("57a7f0", Some("57a7f0")).is_ok());
        assert!(check_version("57a7f0", None).is_ok());
        assert_eq!(
            check_version("57a7f0", Some("9e9e9e")).unwrap_err().kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn edit_body_serializes_removals_as_null() {
        let mut files = BTreeMap::new();
        files.insert("old.yaml", None);
        files.insert("new.yaml", Some(FileBody { content: "x" }));
        let body = EditBody { description: None, files };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"files":{"new.yaml":{"content":"x"},"old.yaml":null}}"#);
    }

    #[test]
    fn base_url_is_normalized() {
        let svc = HttpDocumentService::new("http://localhost:8080/", SecretString::from("t".to_string())).unwrap();
        assert_eq!(svc.url("/gists"), "http://localhost:8080/gists");
    }
}
