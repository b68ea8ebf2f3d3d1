//! eLabFTW v2 REST client.
//!
//! Items and experiments are listed page by page; categories and templates
//! come back in a single response. Creating an entity is a `POST` followed
//! by a `PATCH` carrying the full payload, since the create endpoints only
//! accept the category or template. Tags have their own endpoint and are
//! replaced wholesale.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use reconcile::{EntityKind, Payload, RawRecord, RemoteApi, RemoteError, RemoteId};

use crate::error::{Error, Result};
use crate::retry::{LogCallback, with_retry};
use crate::types::{ClientConfig, RetryConfig};

/// Blocking API client for one instance.
pub struct Client {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
    page_size: usize,
    retry: RetryConfig,
}

impl Client {
    /// Create a client, checking the configuration first.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if !(config.host_url.starts_with("https://") || config.host_url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "host URL must start with http:// or https://, got '{}'",
                config.host_url
            )));
        }
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("API key is empty".to_string()));
        }
        if config.page_size == 0 {
            return Err(Error::Config("page size must be positive".to_string()));
        }

        let mut builder = ureq::Agent::config_builder().timeout_global(Some(config.timeout));
        if !config.verify_ssl {
            log::warn!("TLS certificate verification is disabled");
            builder = builder.tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(true)
                    .build(),
            );
        }

        Ok(Self {
            agent: ureq::Agent::new_with_config(builder.build()),
            api_base: config.api_base(),
            api_key: config.api_key.trim().to_string(),
            page_size: config.page_size,
            retry: RetryConfig::default(),
        })
    }

    /// Replace the retry policy for reads, updates and deletes.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.api_base, collection(kind))
    }

    fn entity_url(&self, kind: EntityKind, id: RemoteId) -> String {
        format!("{}/{}/{id}", self.api_base, collection(kind))
    }

    fn fetch_page(&self, kind: EntityKind, offset: usize) -> Result<Vec<WireRecord>> {
        let url = self.collection_url(kind);
        let mut request = self
            .agent
            .get(&url)
            .header("Authorization", self.api_key.as_str())
            .header("Accept", "application/json");
        if is_paginated(kind) {
            request = request
                .query("limit", self.page_size.to_string())
                .query("offset", offset.to_string());
        }
        log::debug!("GET {url} (offset {offset})");
        let records: Vec<WireRecord> = request.call()?.body_mut().read_json()?;
        Ok(records)
    }

    fn list_all(&self, kind: EntityKind) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        loop {
            let page = with_retry(&self.retry, Some(&LogCallback), || {
                self.fetch_page(kind, records.len())
            })?;
            let last = !is_paginated(kind) || page.len() < self.page_size;
            records.extend(page.into_iter().map(|r| r.into_record(kind)));
            if last {
                break;
            }
        }
        log::debug!("Listed {} {kind} entities", records.len());
        Ok(records)
    }

    fn post(&self, kind: EntityKind, payload: &Payload) -> Result<RemoteId> {
        let url = self.collection_url(kind);
        log::debug!("POST {url}");
        let response = self
            .agent
            .post(&url)
            .header("Authorization", self.api_key.as_str())
            .send_json(create_body(kind, payload))?;
        response
            .headers()
            .get("location")
            .and_then(|value| value.to_str().ok())
            .and_then(id_from_location)
            .ok_or_else(|| Error::MissingLocation(format!("POST {url}")))
    }

    fn patch(&self, kind: EntityKind, id: RemoteId, payload: &Payload) -> Result<()> {
        let url = self.entity_url(kind, id);
        let body = patch_body(kind, payload);
        with_retry(&self.retry, Some(&LogCallback), || {
            log::debug!("PATCH {url}");
            self.agent
                .patch(&url)
                .header("Authorization", self.api_key.as_str())
                .send_json(&body)?;
            Ok(())
        })
    }

    /// Drop every tag, then add `tags` one by one.
    fn replace_tags(&self, kind: EntityKind, id: RemoteId, tags: &[String]) -> Result<()> {
        let url = tags_url(&self.entity_url(kind, id));
        with_retry(&self.retry, Some(&LogCallback), || {
            log::debug!("DELETE {url}");
            self.agent
                .delete(&url)
                .header("Authorization", self.api_key.as_str())
                .call()?;
            Ok(())
        })?;
        for tag in tags {
            log::debug!("POST {url} '{tag}'");
            self.agent
                .post(&url)
                .header("Authorization", self.api_key.as_str())
                .send_json(json!({ "tag": tag }))?;
        }
        Ok(())
    }

    fn remove(&self, kind: EntityKind, id: RemoteId) -> Result<()> {
        let url = self.entity_url(kind, id);
        with_retry(&self.retry, Some(&LogCallback), || {
            log::debug!("DELETE {url}");
            self.agent
                .delete(&url)
                .header("Authorization", self.api_key.as_str())
                .call()?;
            Ok(())
        })
    }
}

impl RemoteApi for Client {
    fn list(&self, kind: EntityKind) -> std::result::Result<Vec<RawRecord>, RemoteError> {
        Ok(self.list_all(kind)?)
    }

    fn create(&self, kind: EntityKind, payload: &Payload) -> std::result::Result<RemoteId, RemoteError> {
        let id = self.post(kind, payload)?;
        if let Err(err) = self.patch(kind, id, payload) {
            log::warn!("Created {kind} {id} but could not write its attributes: {err}");
            return Err(err.into());
        }
        log::info!("Created {kind} {id} '{}'", payload.title);
        Ok(id)
    }

    fn update(
        &self,
        kind: EntityKind,
        id: RemoteId,
        payload: &Payload,
    ) -> std::result::Result<(), RemoteError> {
        self.patch(kind, id, payload)?;
        log::info!("Updated {kind} {id} '{}'", payload.title);
        Ok(())
    }

    fn delete(&self, kind: EntityKind, id: RemoteId) -> std::result::Result<(), RemoteError> {
        self.remove(kind, id)?;
        log::info!("Deleted {kind} {id}");
        Ok(())
    }

    fn set_tags(
        &self,
        kind: EntityKind,
        id: RemoteId,
        tags: &[String],
    ) -> std::result::Result<(), RemoteError> {
        self.replace_tags(kind, id, tags)?;
        log::info!("Tagged {kind} {id} with {} tags", tags.len());
        Ok(())
    }
}

fn tags_url(entity_url: &str) -> String {
    format!("{entity_url}/tags")
}

/// Tags arrive joined with '|', or as a list on some versions
fn parse_tags(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::String(joined)) => joined
            .split('|')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(values)) => values
            .into_iter()
            .filter_map(|value| match value {
                Value::String(tag) => Some(tag),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Endpoint name of an entity kind
pub fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Item => "items",
        EntityKind::ItemCategory => "items_types",
        EntityKind::Experiment => "experiments",
        EntityKind::ExperimentTemplate => "experiments_templates",
    }
}

fn is_paginated(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Item | EntityKind::Experiment)
}

fn id_from_location(location: &str) -> Option<RemoteId> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
}

fn create_body(kind: EntityKind, payload: &Payload) -> Value {
    match kind {
        EntityKind::Item => match payload.category_id {
            Some(category) => json!({ "category_id": category }),
            None => json!({}),
        },
        EntityKind::Experiment => match payload.category_id {
            Some(template) => json!({ "template": template }),
            None => json!({}),
        },
        EntityKind::ItemCategory | EntityKind::ExperimentTemplate => {
            json!({ "title": payload.title })
        }
    }
}

fn patch_body(kind: EntityKind, payload: &Payload) -> Value {
    let mut body = Map::new();
    body.insert("title".into(), Value::from(payload.title.as_str()));
    body.insert(
        "body".into(),
        Value::from(payload.body.as_deref().unwrap_or_default()),
    );
    if let Some(color) = &payload.color {
        body.insert("color".into(), Value::from(color.trim_start_matches('#')));
    }
    body.insert("metadata".into(), Value::from(payload.metadata.as_str()));
    // The experiment template only applies at creation
    if kind == EntityKind::Item
        && let Some(category) = payload.category_id
    {
        body.insert("category".into(), Value::from(category));
    }
    Value::Object(body)
}

/// Entity as the list endpoints return it
#[derive(Debug, Deserialize)]
struct WireRecord {
    id: RemoteId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    category: Option<Value>,
    /// A JSON string on most versions, an object on some
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    tags: Option<Value>,
}

impl WireRecord {
    fn into_record(self, kind: EntityKind) -> RawRecord {
        let category_id = match kind {
            EntityKind::Item => self.category.as_ref().and_then(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }),
            _ => None,
        };
        let metadata = match self.metadata {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw),
            Some(other) => Some(other.to_string()),
        };
        RawRecord {
            id: self.id,
            title: self.title.unwrap_or_default(),
            body: self.body,
            color: self.color,
            category_id: category_id.filter(|&id| id > 0),
            metadata,
            tags: parse_tags(self.tags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Payload {
        Payload {
            title: "Buffer".into(),
            body: None,
            color: Some("#29aeb9".into()),
            category_id: Some(4),
            metadata: r#"{"extra_fields":{}}"#.into(),
            tags: vec!["buffer".into()],
        }
    }

    fn client() -> Client {
        Client::new(&ClientConfig::new("https://elab.example.org", "3-abc")).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            Client::new(&ClientConfig::new("elab.example.org", "key")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Client::new(&ClientConfig::new("https://elab.example.org", " ")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(client.api_base(), "https://elab.example.org/api/v2");
        assert_eq!(
            client.collection_url(EntityKind::ItemCategory),
            "https://elab.example.org/api/v2/items_types"
        );
        assert_eq!(
            client.entity_url(EntityKind::ExperimentTemplate, 7),
            "https://elab.example.org/api/v2/experiments_templates/7"
        );
    }

    #[test]
    fn test_id_from_location() {
        assert_eq!(
            id_from_location("https://elab.example.org/api/v2/items/42"),
            Some(42)
        );
        assert_eq!(id_from_location("/api/v2/items/42/"), Some(42));
        assert_eq!(id_from_location("/api/v2/items"), None);
    }

    #[test]
    fn test_create_bodies() {
        let payload = payload();
        assert_eq!(
            create_body(EntityKind::Item, &payload),
            json!({"category_id": 4})
        );
        assert_eq!(
            create_body(EntityKind::Experiment, &payload),
            json!({"template": 4})
        );
        assert_eq!(
            create_body(EntityKind::ItemCategory, &payload),
            json!({"title": "Buffer"})
        );
    }

    #[test]
    fn test_patch_body() {
        let payload = payload();
        let item = patch_body(EntityKind::Item, &payload);
        assert_eq!(item["color"], "29aeb9");
        assert_eq!(item["category"], 4);
        assert_eq!(item["body"], "");
        assert_eq!(item["metadata"], r#"{"extra_fields":{}}"#);

        let experiment = patch_body(EntityKind::Experiment, &payload);
        assert!(experiment.get("category").is_none());
    }

    #[test]
    fn test_wire_record_metadata_shapes() {
        let raw: Vec<WireRecord> = serde_json::from_value(json!([
            {"id": 1, "title": "A", "category": 3, "metadata": "{\"a\":1}"},
            {"id": 2, "title": "B", "category": "5", "metadata": {"a": 1}},
            {"id": 3, "title": "C", "metadata": null, "extra": true}
        ]))
        .unwrap();
        let records: Vec<RawRecord> = raw
            .into_iter()
            .map(|r| r.into_record(EntityKind::Item))
            .collect();

        assert_eq!(records[0].category_id, Some(3));
        assert_eq!(records[0].metadata.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(records[1].category_id, Some(5));
        assert_eq!(records[1].metadata.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(records[2].category_id, None);
        assert_eq!(records[2].metadata, None);
    }

    #[test]
    fn test_tags_are_not_patched() {
        let body = patch_body(EntityKind::Item, &payload());
        assert!(body.get("tags").is_none());
        assert_eq!(
            tags_url(&client().entity_url(EntityKind::Item, 3)),
            "https://elab.example.org/api/v2/items/3/tags"
        );
    }

    #[test]
    fn test_wire_record_tags() {
        let raw: Vec<WireRecord> = serde_json::from_value(json!([
            {"id": 1, "tags": "buffer|stock", "tags_id": "4,5"},
            {"id": 2, "tags": null},
            {"id": 3},
            {"id": 4, "tags": ["a", "b"]}
        ]))
        .unwrap();
        let tags: Vec<Vec<String>> = raw
            .into_iter()
            .map(|r| r.into_record(EntityKind::Experiment).tags)
            .collect();
        assert_eq!(tags[0], ["buffer", "stock"]);
        assert!(tags[1].is_empty());
        assert!(tags[2].is_empty());
        assert_eq!(tags[3], ["a", "b"]);
    }

    #[test]
    fn test_experiment_category_is_not_a_link() {
        let raw: WireRecord =
            serde_json::from_value(json!({"id": 9, "title": "Run", "category": 2})).unwrap();
        assert_eq!(raw.into_record(EntityKind::Experiment).category_id, None);
    }
}
