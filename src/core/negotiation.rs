//! Content negotiation
//!
//! Picks the response media type from the `Accept` header against the
//! ordered list of types the application supports, and renders JSON values
//! in that type.

use crate::core::error::{RestError, RestResult};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::Value;
use std::sync::OnceLock;

/// Media types the REST layer can serialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// `application/json`
    Json,
    /// `application/javascript`
    ApplicationJavaScript,
    /// `text/javascript`
    TextJavaScript,
    /// `application/xml`
    ApplicationXml,
    /// `text/xml`
    TextXml,
}

impl MediaType {
    /// Parse a configured type; accepts the `json` and `xml` shorthands
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" | "application/json" => Some(MediaType::Json),
            "application/javascript" => Some(MediaType::ApplicationJavaScript),
            "text/javascript" => Some(MediaType::TextJavaScript),
            "xml" | "application/xml" => Some(MediaType::ApplicationXml),
            "text/xml" => Some(MediaType::TextXml),
            _ => None,
        }
    }

    pub fn essence(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::ApplicationJavaScript => "application/javascript",
            MediaType::TextJavaScript => "text/javascript",
            MediaType::ApplicationXml => "application/xml",
            MediaType::TextXml => "text/xml",
        }
    }

    /// Full `Content-Type` header value
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json; charset=utf-8",
            MediaType::ApplicationJavaScript => "application/javascript; charset=utf-8",
            MediaType::TextJavaScript => "text/javascript; charset=utf-8",
            MediaType::ApplicationXml => "application/xml; charset=utf-8",
            MediaType::TextXml => "text/xml; charset=utf-8",
        }
    }

    fn type_and_subtype(&self) -> (&'static str, &'static str) {
        let essence = self.essence();
        essence.split_once('/').unwrap_or((essence, ""))
    }

    /// Serialize a value in this media type
    ///
    /// JavaScript types wrap the JSON in a JSONP call when a valid callback
    /// name is given.
    pub fn render(&self, value: &Value, callback: Option<&str>) -> RestResult<String> {
        match self {
            MediaType::Json => Ok(value.to_string()),
            MediaType::ApplicationJavaScript | MediaType::TextJavaScript => {
                Ok(match callback.filter(|cb| is_valid_callback(cb)) {
                    Some(cb) => format!("/**/ typeof {cb} === 'function' && {cb}({value});"),
                    None => value.to_string(),
                })
            }
            MediaType::ApplicationXml | MediaType::TextXml => to_xml(value),
        }
    }
}

fn is_valid_callback(callback: &str) -> bool {
    static CALLBACK_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CALLBACK_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z_$][\w$.\[\]]*$").unwrap());
    re.is_match(callback)
}

/// One entry of an `Accept` header
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub main: String,
    pub sub: String,
    pub quality: f32,
}

impl MediaRange {
    /// Parse `type/subtype;q=0.5`; returns `None` for malformed entries
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (main, sub) = parts.next()?.trim().split_once('/')?;
        let (main, sub) = (main.trim(), sub.trim());
        if main.is_empty() || sub.is_empty() {
            return None;
        }

        let quality = parts
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
            .and_then(|(_, q)| q.trim().parse::<f32>().ok())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or(1.0);

        Some(Self {
            main: main.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            quality,
        })
    }

    /// Parse a whole header, skipping malformed entries
    pub fn parse_header(accept: &str) -> Vec<Self> {
        accept.split(',').filter_map(Self::parse).collect()
    }

    /// Specificity of this range against a media type, if it matches:
    /// 2 for an exact match, 1 for `type/*`, 0 for `*/*`
    fn specificity(&self, media: MediaType) -> Option<u8> {
        let (main, sub) = media.type_and_subtype();
        match (self.main.as_str(), self.sub.as_str()) {
            ("*", "*") => Some(0),
            (m, "*") if m == main => Some(1),
            (m, s) if m == main && s == sub => Some(2),
            _ => None,
        }
    }
}

/// Resolves response media types for one model
///
/// Built once per model at registration time from the application's
/// supported types.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNegotiator {
    supported: Vec<MediaType>,
}

impl Default for ContentNegotiator {
    fn default() -> Self {
        Self {
            supported: vec![MediaType::Json],
        }
    }
}

impl ContentNegotiator {
    /// Build from configured type names
    ///
    /// Names the layer cannot serialize are dropped with a warning; an empty
    /// result falls back to JSON only.
    pub fn new<S: AsRef<str>>(supported: &[S]) -> Self {
        let mut types = Vec::new();
        for name in supported {
            match MediaType::parse(name.as_ref()) {
                Some(media) if !types.contains(&media) => types.push(media),
                Some(_) => {}
                None => tracing::warn!(
                    media_type = name.as_ref(),
                    "dropping unsupported response media type"
                ),
            }
        }

        if types.is_empty() {
            return Self::default();
        }
        Self { supported: types }
    }

    pub fn supported(&self) -> &[MediaType] {
        &self.supported
    }

    /// Pick the media type for an `Accept` header
    ///
    /// Each supported type gets the weight of the most specific range that
    /// matches it. The highest weight wins and ties go to the earlier
    /// supported type. A missing or empty header accepts anything.
    pub fn resolve(&self, accept: Option<&str>) -> RestResult<MediaType> {
        let ranges = accept.map(MediaRange::parse_header).unwrap_or_default();
        if ranges.is_empty() {
            return Ok(self.supported[0]);
        }

        let mut best: Option<(MediaType, f32)> = None;
        for &media in &self.supported {
            let Some(weight) = weight_for(&ranges, media) else {
                continue;
            };
            if weight <= 0.0 {
                continue;
            }
            if best.is_none_or(|(_, current)| weight > current) {
                best = Some((media, weight));
            }
        }

        best.map(|(media, _)| media)
            .ok_or_else(|| RestError::NotAcceptable {
                accept: accept.unwrap_or_default().to_string(),
            })
    }
}

fn weight_for(ranges: &[MediaRange], media: MediaType) -> Option<f32> {
    let mut best: Option<(u8, f32)> = None;
    for range in ranges {
        let Some(specificity) = range.specificity(media) else {
            continue;
        };
        if best.is_none_or(|(current, _)| specificity > current) {
            best = Some((specificity, range.quality));
        }
    }
    best.map(|(_, quality)| quality)
}

/// Render a JSON value as an XML document rooted at `<response>`
///
/// Objects become child elements, arrays repeat their parent element (or
/// `<item>` at the top level) and `null` becomes an empty element.
pub fn to_xml(value: &Value) -> RestResult<String> {
    let mut writer = Writer::new(Vec::new());
    write_event(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    match value {
        Value::Array(items) => {
            write_event(&mut writer, Event::Start(BytesStart::new("response")))?;
            for item in items {
                write_element(&mut writer, "item", item)?;
            }
            write_event(&mut writer, Event::End(BytesEnd::new("response")))?;
        }
        other => write_element(&mut writer, "response", other)?,
    }
    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> RestResult<()> {
    let tag = element_name(name);
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
            Ok(())
        }
        Value::Null => write_event(writer, Event::Empty(BytesStart::new(tag.as_str()))),
        Value::Object(map) => {
            write_event(writer, Event::Start(BytesStart::new(tag.as_str())))?;
            for (key, child) in map {
                write_element(writer, key, child)?;
            }
            write_event(writer, Event::End(BytesEnd::new(tag.as_str())))
        }
        Value::String(text) => write_text(writer, &tag, text),
        scalar => write_text(writer, &tag, &scalar.to_string()),
    }
}

fn write_text(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> RestResult<()> {
    write_event(writer, Event::Start(BytesStart::new(tag)))?;
    write_event(writer, Event::Text(BytesText::new(text)))?;
    write_event(writer, Event::End(BytesEnd::new(tag)))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> RestResult<()> {
    writer.write_event(event).map_err(xml_error)
}

fn xml_error(err: impl std::fmt::Display) -> RestError {
    RestError::Internal(format!("XML serialization failed: {err}"))
}

fn element_name(name: &str) -> String {
    let mut tag: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !tag.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        tag.insert(0, '_');
    }
    tag
}
