//! File/Derivative Normalizer: canonical masterfile descriptors from the
//! per-file structural XML and technical probe data.
//!
//! For each file of each part:
//!
//! - the structure XML yields the display label and the span timecodes the
//!   poster/thumbnail offsets are computed from;
//! - quality tiers are processed in the fixed order `low, med, high`, each
//!   resolving its probe source through the `derivative → prod → mezz`
//!   fallback chain;
//! - masterfile-level technical fields follow the highest tier processed
//!   last.
//!
//! Structure or probe parse failures are fatal to the request; a missing
//! ingest date or aspect ratio is legitimate absence.

use crate::request::{Derivative, IngestFile, IngestRequest, Part};
use chrono::NaiveDate;
use junction_common::GatewayError;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

/// Offset added to the selected span begin time, in milliseconds.
const OFFSET_PAD_MS: u64 = 2000;

/// Quality tiers in processing order, with their downstream labels.
const QUALITY_TIERS: [(&str, &str); 3] = [
    ("low", "quality-low"),
    ("med", "quality-medium"),
    ("high", "quality-high"),
];

/// One masterfile in the downstream submission document.
#[derive(Debug, Clone, Serialize)]
pub struct MasterFile {
    pub workflow_name: String,
    pub percent_complete: String,
    pub percent_succeeded: String,
    pub percent_failed: String,
    pub status_code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Structural XML carried through verbatim.
    pub structure: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_offset: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_description: Option<String>,

    pub files: Vec<DerivativeInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_frame_size: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comment: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_digitized: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_checksum: Option<String>,

    pub file_format: String,
}

/// One quality-tier derivative in the downstream submission document.
#[derive(Debug, Clone, Serialize)]
pub struct DerivativeInfo {
    pub label: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

/// Normalize every file of every part into masterfile descriptors.
pub fn normalize_files(
    request: &IngestRequest,
    file_format: &str,
) -> Result<Vec<MasterFile>, GatewayError> {
    let mut masterfiles = Vec::new();
    for part in &request.parts {
        for (_, file) in &part.files {
            masterfiles.push(normalize_file(request, part, file, file_format)?);
        }
    }
    Ok(masterfiles)
}

fn normalize_file(
    request: &IngestRequest,
    part: &Part,
    file: &IngestFile,
    file_format: &str,
) -> Result<MasterFile, GatewayError> {
    let structure_xml = file.structure.as_deref().ok_or_else(|| {
        GatewayError::data("failed to parse the xml representing the file structure: none supplied")
    })?;
    let structure = parse_structure(structure_xml)?;
    let offset = compute_offset(&structure.span_begins)?;

    let mut derivatives = Vec::new();
    let mut top_tier: Option<(&Derivative, Probe)> = None;

    for (tier, label) in QUALITY_TIERS {
        let Some(derivative) = file.q.get(tier) else {
            continue;
        };
        let probe_xml = resolve_probe_source(file, derivative, tier)?;
        let probe = parse_probe(probe_xml)?;
        derivatives.push(build_derivative(label, derivative, &probe));
        top_tier = Some((derivative, probe));
    }

    let Some((top, probe)) = top_tier else {
        return Err(GatewayError::data(
            "failed to find any usable derivative for object",
        ));
    };

    let video = probe.pick_stream("video");
    let format = probe.format.as_ref();

    let mut comment = request.comments_for(&format!("Object {}", part.mdpi_barcode));
    if let Some(key) = top.filename.as_deref().map(masterfile_comment_key) {
        comment.extend(request.comments_for(&key));
    }

    Ok(MasterFile {
        workflow_name: "avalon".to_string(),
        percent_complete: "100.0".to_string(),
        percent_succeeded: "100.0".to_string(),
        percent_failed: "0".to_string(),
        status_code: "COMPLETED".to_string(),
        label: structure.label,
        structure: structure_xml.to_string(),
        poster_offset: offset.clone(),
        thumbnail_offset: offset,
        physical_description: request.metadata.format.get(&part.mdpi_barcode).cloned(),
        files: derivatives,
        file_location: top.url_rtmp.clone(),
        file_size: format.and_then(|f| f.size.clone()),
        duration: format.and_then(|f| f.duration.as_deref()).and_then(seconds_to_ms),
        display_aspect_ratio: video.display_aspect_ratio.as_deref().map(aspect_ratio_as_decimal),
        original_frame_size: match (&video.width, &video.height) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        },
        comment,
        date_digitized: file.ingest.as_deref().and_then(parse_ingest_date),
        file_checksum: file.master_md5.clone(),
        file_format: file_format.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Structure XML
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StructureInfo {
    label: Option<String>,
    /// `begin` attribute of every Span, in document order.
    span_begins: Vec<String>,
}

fn parse_structure(xml: &str) -> Result<StructureInfo, GatewayError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut label = None;
    let mut saw_item = false;
    let mut span_begins = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name();
                if name.as_ref() == b"Item" && !saw_item {
                    saw_item = true;
                    label = attr_value(&e, "label")?;
                } else if name.as_ref() == b"Span" {
                    if let Some(begin) = attr_value(&e, "begin")? {
                        span_begins.push(begin);
                    }
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => {
                return Err(GatewayError::data(format!(
                    "failed to parse the xml representing the file structure: {e}"
                )))
            },
        }
    }

    if !saw_item {
        return Err(GatewayError::data(
            "failed to parse the xml representing the file structure: no Item element",
        ));
    }
    Ok(StructureInfo { label, span_begins })
}

fn attr_value(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, GatewayError> {
    e.try_get_attribute(name)
        .map_err(|err| {
            GatewayError::data(format!(
                "failed to parse the xml representing the file structure: {err}"
            ))
        })?
        .map(|attr| {
            attr.unescape_value().map(|v| v.into_owned()).map_err(|err| {
                GatewayError::data(format!(
                    "failed to parse the xml representing the file structure: {err}"
                ))
            })
        })
        .transpose()
}

/// Poster/thumbnail offset: the second span's begin when at least two exist,
/// else the first, converted to milliseconds plus a fixed pad. No spans, no
/// offset.
fn compute_offset(span_begins: &[String]) -> Result<Option<String>, GatewayError> {
    if span_begins.is_empty() {
        return Ok(None);
    }
    let index = span_begins.len().min(2) - 1;
    let begin = &span_begins[index];
    let ms = timecode_to_ms(begin).ok_or_else(|| {
        GatewayError::data(format!("failed to parse span begin timecode '{begin}'"))
    })?;
    Ok(Some((ms + OFFSET_PAD_MS).to_string()))
}

/// Convert a timecode to milliseconds.
///
/// Accepts a bare numeric seconds value or colon-separated fields read
/// right-to-left, each weighted by 60^position; fractional seconds are
/// honored and the result is truncated to whole milliseconds.
pub fn timecode_to_ms(timecode: &str) -> Option<u64> {
    let timecode = timecode.trim();
    if timecode.is_empty() {
        return None;
    }
    let mut total_seconds = 0f64;
    for (position, field) in timecode.split(':').rev().enumerate() {
        let value: f64 = field.trim().parse().ok()?;
        total_seconds += value * 60f64.powi(position as i32);
    }
    if !total_seconds.is_finite() || total_seconds < 0.0 {
        return None;
    }
    Some((total_seconds * 1000.0).trunc() as u64)
}

// ---------------------------------------------------------------------------
// Probe data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Probe {
    #[serde(default)]
    streams: Option<Streams>,
    #[serde(default)]
    format: Option<FormatBlock>,
}

#[derive(Debug, Deserialize)]
struct Streams {
    #[serde(rename = "stream", default)]
    streams: Vec<StreamInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamInfo {
    #[serde(rename = "@codec_type", default)]
    codec_type: Option<String>,
    #[serde(rename = "@codec_name", default)]
    codec_name: Option<String>,
    #[serde(rename = "@bit_rate", default)]
    bit_rate: Option<String>,
    #[serde(rename = "@width", default)]
    width: Option<String>,
    #[serde(rename = "@height", default)]
    height: Option<String>,
    #[serde(rename = "@display_aspect_ratio", default)]
    display_aspect_ratio: Option<String>,
    #[serde(rename = "@default", default)]
    default: Option<String>,
    #[serde(rename = "disposition", default)]
    disposition: Option<Disposition>,
}

#[derive(Debug, Deserialize)]
struct Disposition {
    #[serde(rename = "@default", default)]
    default: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FormatBlock {
    #[serde(rename = "@duration", default)]
    duration: Option<String>,
    #[serde(rename = "@size", default)]
    size: Option<String>,
}

impl StreamInfo {
    fn is_default(&self) -> bool {
        let flag = |v: &Option<String>| {
            v.as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case("true") || d == "1")
        };
        flag(&self.default) || self.disposition.as_ref().is_some_and(|d| flag(&d.default))
    }
}

impl Probe {
    /// The default-flagged stream of the given type, else the first of that
    /// type, else an empty record.
    fn pick_stream(&self, kind: &str) -> StreamInfo {
        let streams = self
            .streams
            .as_ref()
            .map(|s| s.streams.as_slice())
            .unwrap_or(&[]);
        let of_kind: Vec<&StreamInfo> = streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some(kind))
            .collect();
        of_kind
            .iter()
            .find(|s| s.is_default())
            .or_else(|| of_kind.first())
            .map(|s| StreamInfo {
                codec_type: s.codec_type.clone(),
                codec_name: s.codec_name.clone(),
                bit_rate: s.bit_rate.clone(),
                width: s.width.clone(),
                height: s.height.clone(),
                display_aspect_ratio: s.display_aspect_ratio.clone(),
                default: s.default.clone(),
                disposition: None,
            })
            .unwrap_or_default()
    }
}

/// Ordered candidate probe sources for a tier: the derivative's own probe,
/// then the `prod` source, then `mezz`. Empty blobs count as absent.
fn resolve_probe_source<'a>(
    file: &'a IngestFile,
    derivative: &'a Derivative,
    tier: &str,
) -> Result<&'a str, GatewayError> {
    let candidates = [
        derivative.ffprobe.as_deref(),
        file.q.get("prod").and_then(|d| d.ffprobe.as_deref()),
        file.q.get("mezz").and_then(|d| d.ffprobe.as_deref()),
    ];
    candidates
        .into_iter()
        .flatten()
        .find(|blob| !blob.trim().is_empty())
        .ok_or_else(|| {
            GatewayError::data(format!(
                "failed to find technical metadata for {tier} derivative"
            ))
        })
}

fn parse_probe(xml: &str) -> Result<Probe, GatewayError> {
    quick_xml::de::from_str(xml)
        .map_err(|e| GatewayError::data(format!("failed to parse ffprobe data for object: {e}")))
}

fn build_derivative(label: &str, derivative: &Derivative, probe: &Probe) -> DerivativeInfo {
    let audio = probe.pick_stream("audio");
    let video = probe.pick_stream("video");
    DerivativeInfo {
        label: label.to_string(),
        id: derivative.filename.clone(),
        url: derivative.url_rtmp.clone(),
        hls_url: derivative.url_http.clone(),
        duration: probe
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(seconds_to_ms),
        mime_type: derivative.filename.as_deref().map(mime_for),
        audio_bitrate: audio.bit_rate,
        audio_codec: audio.codec_name,
        video_bitrate: video.bit_rate,
        video_codec: video.codec_name,
        width: video.width,
        height: video.height,
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Probe durations are reported in seconds as a float; downstream wants
/// whole milliseconds as a string.
fn seconds_to_ms(seconds: &str) -> Option<String> {
    let secs: f64 = seconds.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(((secs * 1000.0).trunc() as u64).to_string())
}

/// `"W:H"` ratio string as a decimal fraction rounded to 10 places;
/// `"1.33"` when present but unparseable.
fn aspect_ratio_as_decimal(ratio: &str) -> String {
    let parsed = ratio.trim().split_once(':').and_then(|(w, h)| {
        let w: f64 = w.trim().parse().ok()?;
        let h: f64 = h.trim().parse().ok()?;
        if h == 0.0 {
            return None;
        }
        Some(w / h)
    });
    match parsed {
        Some(value) => format!("{}", (value * 1e10).round() / 1e10),
        None => "1.33".to_string(),
    }
}

/// MIME type from the derivative filename's extension.
fn mime_for(filename: &str) -> String {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let mime = match extension.as_str() {
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "mov" => "video/quicktime",
        "ts" => "video/MP2T",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

/// Masterfile comments are filed under the filename prefix up to the second
/// underscore-delimited segment, e.g. `MDPI_40000000123456_01`.
fn masterfile_comment_key(filename: &str) -> String {
    filename.split('_').take(3).collect::<Vec<_>>().join("_")
}

/// Parse the digitization pipeline's ingest date into `YYYY-MM-DD`.
fn parse_ingest_date(raw: &str) -> Option<String> {
    let date_token = raw.split_whitespace().next()?;
    for format in ["%m/%d/%Y", "%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_token, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}
