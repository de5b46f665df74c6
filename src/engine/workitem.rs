//! Wire types for the design-automation engine's workitem API.
//!
//! A workitem targets a named activity and carries a map of named arguments.
//! Each argument is either an inline `data:` URI or an external URL with an
//! HTTP verb and headers; callback arguments are plain POST URLs the engine
//! invokes when the corresponding event fires.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP verb the engine uses to resolve or deliver an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Put,
    Post,
}

/// One named workitem argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verb: Option<Verb>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Deferred inputs: the engine fetches the URL mid-run, on demand,
    /// instead of downloading it before the job starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ondemand: Option<bool>,
}

impl Argument {
    /// Inline a JSON document as a `data:` URI (compact serialization).
    pub fn inline_json<T: Serialize>(doc: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            url: format!("data:application/json,{}", serde_json::to_string(doc)?),
            verb: None,
            headers: None,
            ondemand: None,
        })
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            verb: Some(Verb::Get),
            headers: None,
            ondemand: None,
        }
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            verb: Some(Verb::Put),
            headers: None,
            ondemand: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            verb: Some(Verb::Post),
            headers: None,
            ondemand: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        if !headers.is_empty() {
            self.headers.get_or_insert_with(HashMap::new).extend(headers);
        }
        self
    }

    pub fn on_demand(mut self) -> Self {
        self.ondemand = Some(true);
        self
    }
}

/// Immutable description of one remote execution. Consumed on submission;
/// the remote service owns the job lifecycle afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemSpec {
    pub activity_id: String,
    pub arguments: HashMap<String, Argument>,
}

/// Identifier the remote service assigns to a submitted workitem.
///
/// Used for correlation and logging only — callback routing carries the
/// client id explicitly in the callback URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Submission acknowledgment from the engine.
#[derive(Debug, Deserialize)]
pub struct WorkItemAck {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Shelving parameters as edited by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfParams {
    pub height: String,
    pub shelf_width: String,
    pub number_of_columns: String,
}

/// Screenshot dimensions for the rendered preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotSpec {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenshotSpec {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Parameter document delivered to the engine — inline as the `inputJson`
/// argument, or through the session pull endpoint. `output` names the
/// requested output argument for single-output jobs and is omitted for
/// session jobs, which produce every output each iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsDocument {
    pub params: ShelfParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn params() -> ShelfParams {
        ShelfParams {
            height: "750".into(),
            shelf_width: "1000".into(),
            number_of_columns: "5".into(),
        }
    }

    #[test]
    fn inline_json_builds_data_uri() {
        let doc = ParamsDocument {
            params: params(),
            screenshot: None,
            output: Some("outputPng".into()),
        };
        let arg = Argument::inline_json(&doc).unwrap();
        assert!(arg.url.starts_with("data:application/json,{"));
        assert!(arg.url.contains(r#""output":"outputPng""#));
        assert!(arg.verb.is_none());
    }

    #[test]
    fn url_argument_serializes_verb_and_headers() {
        let arg = Argument::put("https://store.example/objects/a.png")
            .with_header("Authorization", "Bearer tok");
        let json = serde_json::to_value(&arg).unwrap();
        assert_eq!(json["verb"], "put");
        assert_eq!(json["headers"]["Authorization"], "Bearer tok");
        assert!(json.get("ondemand").is_none());
    }

    #[test]
    fn on_demand_flag_serializes() {
        let arg = Argument::get("https://server.example/data?id=c1").on_demand();
        let json = serde_json::to_value(&arg).unwrap();
        assert_eq!(json["ondemand"], true);
    }

    #[test]
    fn workitem_spec_wire_shape() {
        let mut arguments = HashMap::new();
        arguments.insert(
            "onComplete".to_string(),
            Argument::post("https://server.example/callback/oncomplete?id=c1&outputFile=c1.png"),
        );
        let spec = WorkItemSpec {
            activity_id: "acme.ShelvingUpdate+prod".to_string(),
            arguments,
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["activityId"], "acme.ShelvingUpdate+prod");
        assert_eq!(json["arguments"]["onComplete"]["verb"], "post");
    }

    #[test]
    fn params_document_round_trip() {
        let doc = ParamsDocument {
            params: params(),
            screenshot: Some(ScreenshotSpec {
                width: 100,
                height: 100,
            }),
            output: None,
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains(r#""shelfWidth":"1000""#));
        assert!(!json.contains("output"));
        let back: ParamsDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
