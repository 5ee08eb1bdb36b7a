//! Typed model of the inbound ingest request, with accumulating validation.
//!
//! The producer posts one JSON document per ingest. Validation collects every
//! violated rule into one human-readable reason string; a request that fails
//! here is rejected before any state is persisted.

use junction_common::GatewayError;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// One media ingest request, ephemeral, one per HTTP call.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// Unique external identifier for the ingest batch, stable across
    /// resubmissions.
    pub group_name: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub parts: Vec<Part>,

    /// `(identifier, text)` pairs addressed to either the object or a
    /// specific masterfile.
    #[serde(default)]
    pub comments: Vec<(String, String)>,

    /// Explicit routing override; absent means the default target.
    #[serde(default)]
    pub target_avalon: Option<String>,
}

/// Flat metadata map accompanying the MODS blob.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    /// Descriptive-metadata XML blob.
    #[serde(default)]
    pub mods: Option<String>,

    /// Organizational unit owning the content; keys the collection lookup.
    #[serde(default)]
    pub unit: Option<String>,

    /// Catalog key for bibliographic import. `iucat_barcode` is the legacy
    /// name for the same value.
    #[serde(default, alias = "iucat_barcode")]
    pub catalog_key: Option<String>,

    #[serde(default)]
    pub oclc_number: Option<String>,

    #[serde(default)]
    pub call_number: Option<String>,

    /// `"true"` (any case) marks the content as audio.
    #[serde(default)]
    pub audio: Option<String>,

    /// Physical-description lookup, keyed by `mdpi_barcode`.
    #[serde(default)]
    pub format: HashMap<String, String>,
}

/// One physical item within the ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub mdpi_barcode: String,

    /// Files keyed by an arbitrary producer-side string, kept in posted
    /// order so masterfiles come out in the order the producer sent them.
    #[serde(default, deserialize_with = "files_in_posted_order")]
    pub files: Vec<(String, IngestFile)>,
}

fn files_in_posted_order<'de, D>(deserializer: D) -> Result<Vec<(String, IngestFile)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FilesVisitor;

    impl<'de> Visitor<'de> for FilesVisitor {
        type Value = Vec<(String, IngestFile)>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a map of file entries")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::new();
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(FilesVisitor)
}

/// One media file belonging to a part.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestFile {
    /// Structural XML: one `Item` element with nested `Span` segments.
    #[serde(default)]
    pub structure: Option<String>,

    /// Ingest date string from the digitization pipeline.
    #[serde(default)]
    pub ingest: Option<String>,

    /// Checksum of the preservation master, carried through verbatim.
    #[serde(default)]
    pub master_md5: Option<String>,

    /// Quality tiers (`low`, `med`, `high`) plus fallback probe sources
    /// (`prod`, `mezz`).
    #[serde(default)]
    pub q: BTreeMap<String, Derivative>,
}

/// One quality-tier encoding of a file.
#[derive(Debug, Clone, Deserialize)]
pub struct Derivative {
    #[serde(default)]
    pub filename: Option<String>,

    #[serde(default)]
    pub url_rtmp: Option<String>,

    #[serde(default)]
    pub url_http: Option<String>,

    /// Technical-metadata XML blob describing this encoding.
    #[serde(default)]
    pub ffprobe: Option<String>,
}

impl IngestRequest {
    /// Parse and validate a raw request body.
    ///
    /// Rules: the body must parse as a JSON object with at least one key,
    /// and must contain a non-empty `group_name`. Violations accumulate
    /// into one reason string.
    pub fn parse(raw_body: &str) -> Result<IngestRequest, GatewayError> {
        let mut failure_reasons = String::new();

        let value: serde_json::Value =
            serde_json::from_str(raw_body).unwrap_or(serde_json::Value::Null);

        match value.as_object() {
            None => failure_reasons.push_str("JSON could not be parsed.  "),
            Some(map) if map.is_empty() => {
                failure_reasons.push_str("JSON could not be parsed.  ")
            },
            Some(map) => {
                let group_name = map.get("group_name").and_then(|v| v.as_str());
                if group_name.map_or(true, |g| g.is_empty()) {
                    failure_reasons.push_str("No group_name attribute could be found in the JSON");
                }
            },
        }

        if !failure_reasons.is_empty() {
            return Err(GatewayError::Validation(failure_reasons.trim().to_string()));
        }

        // Shape errors past the basic rules are still validation failures,
        // reported with serde's own description. Deserialized from the raw
        // text, not the checked Value, so map entries keep posted order.
        serde_json::from_str(raw_body)
            .map_err(|e| GatewayError::Validation(format!("request shape is invalid: {e}")))
    }

    /// Ordered, distinct, non-empty `mdpi_barcode`s across all parts.
    pub fn all_barcodes(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for part in &self.parts {
            let barcode = part.mdpi_barcode.as_str();
            if !barcode.is_empty() && !seen.contains(&barcode) {
                seen.push(barcode);
            }
        }
        seen
    }

    /// Comment texts filed under `identifier`, in posted order.
    pub fn comments_for(&self, identifier: &str) -> Vec<String> {
        self.comments
            .iter()
            .filter(|(id, _)| id == identifier)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_json() {
        let err = IngestRequest::parse("this is not json").unwrap_err();
        match err {
            GatewayError::Validation(reason) => {
                assert!(reason.contains("JSON could not be parsed"));
            },
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_object() {
        let err = IngestRequest::parse("{}").unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn rejects_missing_group_name() {
        let err = IngestRequest::parse(r#"{"metadata": {}}"#).unwrap_err();
        match err {
            GatewayError::Validation(reason) => {
                assert!(reason.contains("No group_name attribute"));
            },
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_group_name() {
        let err = IngestRequest::parse(r#"{"group_name": ""}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn parses_minimal_request() {
        let req = IngestRequest::parse(r#"{"group_name": "GR00034889"}"#).unwrap();
        assert_eq!(req.group_name, "GR00034889");
        assert!(req.parts.is_empty());
        assert!(req.target_avalon.is_none());
    }

    #[test]
    fn accepts_legacy_catalog_key_alias() {
        let req = IngestRequest::parse(
            r#"{"group_name": "GR1", "metadata": {"iucat_barcode": "1234"}}"#,
        )
        .unwrap();
        assert_eq!(req.metadata.catalog_key.as_deref(), Some("1234"));
    }

    #[test]
    fn collects_distinct_barcodes_in_order() {
        let req = IngestRequest::parse(
            r#"{"group_name": "GR1", "parts": [
                {"mdpi_barcode": "B1", "files": {}},
                {"mdpi_barcode": "", "files": {}},
                {"mdpi_barcode": "B2", "files": {}},
                {"mdpi_barcode": "B1", "files": {}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(req.all_barcodes(), vec!["B1", "B2"]);
    }

    #[test]
    fn files_keep_posted_order() {
        // Lexicographic ordering would put "10" before "2"; the producer's
        // order wins.
        let req = IngestRequest::parse(
            r#"{"group_name": "GR1", "parts": [{"mdpi_barcode": "B1", "files": {
                "2": {},
                "10": {},
                "1": {}
            }}]}"#,
        )
        .unwrap();
        let keys: Vec<&str> = req.parts[0]
            .files
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(keys, vec!["2", "10", "1"]);
    }

    #[test]
    fn filters_comments_by_identifier() {
        let req = IngestRequest::parse(
            r#"{"group_name": "GR1", "comments": [
                ["Object B1", "first"],
                ["MDPI_B1_01", "second"],
                ["Object B1", "third"]
            ]}"#,
        )
        .unwrap();
        assert_eq!(req.comments_for("Object B1"), vec!["first", "third"]);
        assert_eq!(req.comments_for("MDPI_B1_01"), vec!["second"]);
        assert!(req.comments_for("Object B2").is_empty());
    }
}
