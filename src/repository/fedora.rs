//! Fedora Commons 3 REST backend.
//!
//! Endpoints used (all relative to the configured base URL, usually
//! `http://host:8080/fedora`):
//!
//! | Capability            | Request |
//! |-----------------------|---------|
//! | fetch content         | `GET  /objects/{pid}/datastreams/{dsid}/content` |
//! | datastream exists     | `GET  /objects/{pid}/datastreams/{dsid}?format=xml` |
//! | create datastream     | `POST /objects/{pid}/datastreams/{dsid}?controlGroup=…` |
//! | replace datastream    | `PUT  /objects/{pid}/datastreams/{dsid}?…` |
//! | read relationships    | `GET  /objects/{pid}/relationships?format=n-triples` |
//! | add relationship      | `POST /objects/{pid}/relationships/new` |
//! | remove relationship   | `DELETE /objects/{pid}/relationships` |

use super::{
    ContentSource, DatastreamContent, DatastreamSink, DatastreamWrite, ObjectId,
    RelationshipStore,
};
use crate::error::RepositoryError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// Repository backed by a Fedora 3 REST API.
#[derive(Debug, Clone)]
pub struct FedoraRepository {
    base: Url,
    client: Client,
    credentials: Option<(String, String)>,
}

impl FedoraRepository {
    /// Connect to `base_url` with an HTTP timeout of `timeout_secs`.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, RepositoryError> {
        let base = Url::parse(base_url.trim_end_matches('/')).map_err(|e| RepositoryError::Http {
            url: base_url.to_string(),
            reason: format!("invalid base URL: {e}"),
        })?;
        if base.cannot_be_a_base() {
            return Err(RepositoryError::Http {
                url: base_url.to_string(),
                reason: "URL cannot be used as a base".into(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RepositoryError::Http {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base,
            client,
            credentials: None,
        })
    }

    /// Authenticate every request with HTTP basic auth.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, url: &Url) -> Result<reqwest::Response, RepositoryError> {
        builder.send().await.map_err(|e| RepositoryError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

fn subject_uri(object: &ObjectId) -> String {
    format!("info:fedora/{}", object)
}

fn status_error(url: &Url, status: StatusCode) -> RepositoryError {
    RepositoryError::Http {
        url: url.to_string(),
        reason: format!("HTTP {status}"),
    }
}

#[async_trait]
impl ContentSource for FedoraRepository {
    async fn fetch_datastream(
        &self,
        object: &ObjectId,
        dsid: &str,
    ) -> Result<DatastreamContent, RepositoryError> {
        let url = self.url(&["objects", object.as_str(), "datastreams", dsid, "content"]);
        let response = self.send(self.request(Method::GET, url.clone()), &url).await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(RepositoryError::DatastreamNotFound {
                    object: object.to_string(),
                    dsid: dsid.to_string(),
                })
            }
            s => return Err(status_error(&url, s)),
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = response.bytes().await.map_err(|e| RepositoryError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!("fetched {} bytes of {} from {}", bytes.len(), dsid, object);
        Ok(DatastreamContent {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }

    async fn has_datastream(&self, object: &ObjectId, dsid: &str) -> Result<bool, RepositoryError> {
        let mut url = self.url(&["objects", object.as_str(), "datastreams", dsid]);
        url.query_pairs_mut().append_pair("format", "xml");
        let response = self.send(self.request(Method::GET, url.clone()), &url).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(&url, s)),
        }
    }
}

#[async_trait]
impl DatastreamSink for FedoraRepository {
    async fn write_datastream(
        &self,
        object: &ObjectId,
        write: &DatastreamWrite,
    ) -> Result<(), RepositoryError> {
        let exists = self.has_datastream(object, &write.dsid).await?;
        let body = tokio::fs::read(&write.file)
            .await
            .map_err(|source| RepositoryError::Io {
                path: write.file.clone(),
                source,
            })?;

        let mut url = self.url(&["objects", object.as_str(), "datastreams", &write.dsid]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("dsLabel", &write.label)
                .append_pair("mimeType", &write.mime_type);
            if !exists {
                query.append_pair("controlGroup", &write.control_group);
            }
        }
        let method = if exists { Method::PUT } else { Method::POST };
        let builder = self
            .request(method, url.clone())
            .header(reqwest::header::CONTENT_TYPE, write.mime_type.as_str())
            .body(body);
        let response = self.send(builder, &url).await?;
        if !response.status().is_success() {
            return Err(status_error(&url, response.status()));
        }
        debug!("ingested {} on {}", write.dsid, object);
        Ok(())
    }
}

#[async_trait]
impl RelationshipStore for FedoraRepository {
    async fn get_relationships(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        let mut url = self.url(&["objects", object.as_str(), "relationships"]);
        url.query_pairs_mut()
            .append_pair("subject", &subject_uri(object))
            .append_pair("predicate", &format!("{namespace}{predicate}"))
            .append_pair("format", "n-triples");
        let response = self.send(self.request(Method::GET, url.clone()), &url).await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(RepositoryError::ObjectNotFound(object.to_string())),
            s => return Err(status_error(&url, s)),
        }
        let text = response.text().await.map_err(|e| RepositoryError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(parse_ntriples_objects(&text))
    }

    async fn add_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        let mut url = self.url(&["objects", object.as_str(), "relationships", "new"]);
        url.query_pairs_mut()
            .append_pair("subject", &subject_uri(object))
            .append_pair("predicate", &format!("{namespace}{predicate}"))
            .append_pair("object", value)
            .append_pair("isLiteral", "true");
        let response = self.send(self.request(Method::POST, url.clone()), &url).await?;
        if !response.status().is_success() {
            return Err(status_error(&url, response.status()));
        }
        Ok(())
    }

    async fn remove_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let values = match value {
            Some(v) => vec![v.to_string()],
            None => self.get_relationships(object, namespace, predicate).await?,
        };
        for v in values {
            let mut url = self.url(&["objects", object.as_str(), "relationships"]);
            url.query_pairs_mut()
                .append_pair("subject", &subject_uri(object))
                .append_pair("predicate", &format!("{namespace}{predicate}"))
                .append_pair("object", &v)
                .append_pair("isLiteral", "true");
            let response = self.send(self.request(Method::DELETE, url.clone()), &url).await?;
            if !response.status().is_success() {
                return Err(status_error(&url, response.status()));
            }
        }
        Ok(())
    }
}

// ── N-Triples parsing ────────────────────────────────────────────────────

static RE_TRIPLE_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<[^>]*>\s+<[^>]*>\s+(?:"((?:[^"\\]|\\.)*)"|<([^>]*)>)"#).unwrap()
});

/// Extract the object term of every triple: literal values unescaped, URIs
/// verbatim.
fn parse_ntriples_objects(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| RE_TRIPLE_OBJECT.captures(line))
        .filter_map(|caps| {
            caps.get(1)
                .map(|lit| unescape_literal(lit.as_str()))
                .or_else(|| caps.get(2).map(|uri| uri.as_str().to_string()))
        })
        .collect()
}

fn unescape_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// `text/html; charset=utf-8` → `text/html`.
fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or(header)
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntriples_literals_and_uris() {
        let text = concat!(
            "<info:fedora/book:1> <http://islandora.ca/ontology/relsext#hasLanguage> \"fra\" .\n",
            "<info:fedora/book:1> <http://islandora.ca/ontology/relsext#generate_ocr> \"TRUE\"^^<http://www.w3.org/2001/XMLSchema#string> .\n",
            "<info:fedora/book:1> <info:fedora/fedora-system:def/model#hasModel> <info:fedora/islandora:pageCModel> .\n",
            "\n",
            "garbage line\n",
        );
        assert_eq!(
            parse_ntriples_objects(text),
            vec![
                "fra".to_string(),
                "TRUE".to_string(),
                "info:fedora/islandora:pageCModel".to_string()
            ]
        );
    }

    #[test]
    fn literal_escapes() {
        assert_eq!(unescape_literal(r#"a\"b\\c\nd"#), "a\"b\\c\nd");
    }

    #[test]
    fn media_type_strips_parameters() {
        assert_eq!(media_type("Text/HTML; charset=UTF-8"), "text/html");
        assert_eq!(media_type("image/jpeg"), "image/jpeg");
    }

    #[test]
    fn urls_encode_object_ids() {
        let repo = FedoraRepository::new("http://localhost:8080/fedora/", 5).unwrap();
        let url = repo.url(&["objects", "book:1", "datastreams", "OBJ", "content"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/fedora/objects/book:1/datastreams/OBJ/content"
        );
        let url = repo.url(&["objects", "odd id/1"]);
        assert_eq!(url.as_str(), "http://localhost:8080/fedora/objects/odd%20id%2F1");
    }

    #[test]
    fn rejects_unusable_base() {
        assert!(FedoraRepository::new("not a url", 5).is_err());
        assert!(FedoraRepository::new("mailto:someone@example.org", 5).is_err());
    }
}
