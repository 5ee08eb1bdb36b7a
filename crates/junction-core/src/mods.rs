//! Metadata Extractor: normalized bibliographic fields from the embedded
//! descriptive-metadata XML plus the request's flat metadata map.
//!
//! Every fallback is explicit per field:
//!
//! - `title`: structured title text, else the call number, else `"Untitled"`.
//! - `creator`: first creator-role name; else `"See other contributors"`
//!   when a contributor-role name exists; else `"Unknown"`.
//! - `date_issued`: MARC-encoded dateIssued unless absent or the `uuuu`
//!   sentinel, in which case `"unknown/unknown"`.
//! - `bibliographic_id`: the catalog key, omitted when absent.
//! - `other_identifier`/`other_identifier_type`: parallel arrays seeded with
//!   the group name, then call number, normalized OCLC number, and every
//!   distinct part barcode.
//!
//! An unparseable metadata blob is a fatal per-request error; a
//! non-derivable OCLC number is legitimate absence, not an error.

use crate::request::IngestRequest;
use junction_common::GatewayError;
use serde::{Deserialize, Serialize};

/// Normalized bibliographic fields for the downstream submission document.
#[derive(Debug, Clone, Serialize)]
pub struct Fields {
    pub title: String,
    pub creator: String,
    pub date_issued: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bibliographic_id: Option<String>,

    /// Parallel to `other_identifier_type`, always the same length.
    pub other_identifier: Vec<String>,
    pub other_identifier_type: Vec<String>,

    /// Prior downstream identifiers, injected only when reissuing a
    /// previously submitted object under a new downstream identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Vec<String>>,
}

/// Extractor output: the field map plus the normalized file format shared
/// by every masterfile of the request.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub fields: Fields,
    /// Exactly `"Moving image"` or `"Sound"`.
    pub file_format: String,
}

// ---------------------------------------------------------------------------
// MODS document shape (subset Junction reads)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Mods {
    #[serde(rename = "titleInfo", default)]
    title_info: Vec<TitleInfo>,

    #[serde(rename = "name", default)]
    names: Vec<Name>,

    #[serde(rename = "originInfo", default)]
    origin_info: Vec<OriginInfo>,

    #[serde(rename = "identifier", default)]
    identifiers: Vec<Identifier>,
}

#[derive(Debug, Deserialize)]
struct TitleInfo {
    #[serde(rename = "title", default)]
    title: Vec<TextElem>,
}

#[derive(Debug, Deserialize)]
struct Name {
    #[serde(rename = "namePart", default)]
    name_part: Vec<TextElem>,

    #[serde(rename = "role", default)]
    roles: Vec<Role>,
}

#[derive(Debug, Deserialize)]
struct Role {
    #[serde(rename = "roleTerm", default)]
    role_term: Vec<TextElem>,
}

#[derive(Debug, Deserialize)]
struct OriginInfo {
    #[serde(rename = "dateIssued", default)]
    date_issued: Vec<DateIssued>,
}

#[derive(Debug, Deserialize)]
struct DateIssued {
    #[serde(rename = "@encoding", default)]
    encoding: Option<String>,

    #[serde(rename = "$text", default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    #[serde(rename = "@type", default)]
    id_type: Option<String>,

    #[serde(rename = "@displayLabel", default)]
    display_label: Option<String>,

    #[serde(rename = "$text", default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextElem {
    #[serde(rename = "$text", default)]
    text: Option<String>,
}

impl TextElem {
    fn nonempty(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

impl Name {
    fn display_name(&self) -> Option<&str> {
        self.name_part.iter().find_map(TextElem::nonempty)
    }

    fn has_role(&self, wanted: &str) -> bool {
        self.roles
            .iter()
            .flat_map(|r| r.role_term.iter())
            .filter_map(TextElem::nonempty)
            .any(|t| t.eq_ignore_ascii_case(wanted))
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

const UNCODED_DATE: &str = "unknown/unknown";
const MARC_DATE_SENTINEL: &str = "uuuu";

/// Extract the downstream field map from the request.
///
/// Fatal when the metadata XML is missing or unparseable.
pub fn extract_fields(request: &IngestRequest) -> Result<Extracted, GatewayError> {
    let mods = parse_mods(request)?;

    let call_number = resolve_call_number(request, &mods);

    let title = mods
        .title_info
        .iter()
        .flat_map(|ti| ti.title.iter())
        .find_map(TextElem::nonempty)
        .map(str::to_string)
        .or_else(|| call_number.clone())
        .unwrap_or_else(|| "Untitled".to_string());

    let creator = resolve_creator(&mods);
    let date_issued = resolve_date_issued(&mods);
    let bibliographic_id = request.metadata.catalog_key.clone();

    let mut other_identifier = vec![request.group_name.clone()];
    let mut other_identifier_type = vec!["other".to_string()];

    if let Some(cn) = &call_number {
        other_identifier.push(cn.clone());
        other_identifier_type.push("other".to_string());
    }

    if let Some(oclc) = request
        .metadata
        .oclc_number
        .as_deref()
        .and_then(normalize_oclc)
    {
        other_identifier.push(oclc);
        other_identifier_type.push("other".to_string());
    }

    for barcode in request.all_barcodes() {
        other_identifier.push(barcode.to_string());
        other_identifier_type.push("mdpi barcode".to_string());
    }

    let file_format = resolve_file_format(request);

    Ok(Extracted {
        fields: Fields {
            title,
            creator,
            date_issued,
            bibliographic_id,
            other_identifier,
            other_identifier_type,
            identifier: None,
        },
        file_format,
    })
}

fn parse_mods(request: &IngestRequest) -> Result<Mods, GatewayError> {
    let blob = request
        .metadata
        .mods
        .as_deref()
        .ok_or_else(|| GatewayError::data("failed to parse mods as XML: no mods supplied"))?;
    quick_xml::de::from_str(blob)
        .map_err(|e| GatewayError::data(format!("failed to parse mods as XML: {e}")))
}

/// Creator precedence: creator role, then the contributor placeholder, then
/// `"Unknown"`. Only entries that actually carry a name count.
fn resolve_creator(mods: &Mods) -> String {
    let named: Vec<&Name> = mods
        .names
        .iter()
        .filter(|n| n.display_name().is_some())
        .collect();

    if let Some(creator) = named
        .iter()
        .find(|n| n.has_role("creator"))
        .and_then(|n| n.display_name())
    {
        return creator.to_string();
    }
    if named.iter().any(|n| n.has_role("contributor")) {
        return "See other contributors".to_string();
    }
    "Unknown".to_string()
}

fn resolve_date_issued(mods: &Mods) -> String {
    mods.origin_info
        .iter()
        .flat_map(|oi| oi.date_issued.iter())
        .find(|d| {
            d.encoding
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case("marc"))
        })
        .and_then(|d| d.text.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != MARC_DATE_SENTINEL)
        .map(str::to_string)
        .unwrap_or_else(|| UNCODED_DATE.to_string())
}

/// The flat metadata value wins; a "Call Number"-labeled identifier element
/// is the fallback. Absence is omission, not an error.
fn resolve_call_number(request: &IngestRequest, mods: &Mods) -> Option<String> {
    if let Some(cn) = request
        .metadata
        .call_number
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        return Some(cn.to_string());
    }
    mods.identifiers
        .iter()
        .find(|id| {
            id.display_label
                .as_deref()
                .or(id.id_type.as_deref())
                .is_some_and(|l| l.eq_ignore_ascii_case("call number"))
        })
        .and_then(|id| id.text.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// The request's audio flag overrides whatever the structured metadata says.
fn resolve_file_format(request: &IngestRequest) -> String {
    let audio = request
        .metadata
        .audio
        .as_deref()
        .is_some_and(|a| a.eq_ignore_ascii_case("true"));
    if audio {
        "Sound".to_string()
    } else {
        "Moving image".to_string()
    }
}

/// Normalize an OCLC number into its prefixed form.
///
/// Whitespace is stripped; the remainder must round-trip as an unsigned
/// integer of the same length (rejecting signs, leading zeros, and any
/// non-digit). The digits are left-padded to at least 8 and prefixed
/// `ocm` (8 digits), `ocn` (9 digits), or `oc` (10 or more). Returns `None`
/// when no identifier can be derived.
pub fn normalize_oclc(raw: &str) -> Option<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() {
        return None;
    }
    let parsed: u128 = stripped.parse().ok()?;
    if parsed.to_string().len() != stripped.len() {
        return None;
    }
    let padded = format!("{stripped:0>8}");
    match padded.len() {
        8 => Some(format!("ocm{padded}")),
        9 => Some(format!("ocn{padded}")),
        _ => Some(format!("oc{padded}")),
    }
}
