//! `207 Multi-Status` body parsing.
//!
//! Only what listing and metadata need is kept: each response's href,
//! whether it is a collection, and the text of every property reported
//! with a 2xx propstat. Property names are lowercased local names, so
//! `d:getlastmodified` and `oc:size` become `getlastmodified` and `size`.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::DavError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavResponse {
    /// Raw href as sent by the server (percent-encoded)
    pub href: String,
    pub is_collection: bool,
    pub props: BTreeMap<String, String>,
}

#[derive(Default)]
struct PropStat {
    props: BTreeMap<String, String>,
    is_collection: bool,
    status: Option<String>,
}

impl PropStat {
    fn is_success(&self) -> bool {
        match &self.status {
            Some(line) => line.split_whitespace().nth(1).is_some_and(|c| c.starts_with('2')),
            None => true,
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

pub fn parse_multistatus(body: &str) -> Result<Vec<DavResponse>, DavError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut responses = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut response: Option<DavResponse> = None;
    let mut propstat: Option<PropStat> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DavError::Xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                match name.as_str() {
                    "response" => response = Some(DavResponse::default()),
                    "propstat" => propstat = Some(PropStat::default()),
                    "collection" if stack.iter().any(|s| s == "resourcetype") => {
                        if let Some(ps) = propstat.as_mut() {
                            ps.is_collection = true;
                        }
                    }
                    _ => {}
                }
                text.clear();
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = local_name(e.local_name().as_ref());
                let Some(ps) = propstat.as_mut() else {
                    continue;
                };
                if name == "collection" && stack.iter().any(|s| s == "resourcetype") {
                    ps.is_collection = true;
                } else if stack.last().is_some_and(|s| s == "prop") {
                    ps.props.insert(name, String::new());
                }
            }
            Event::Text(t) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| DavError::Xml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::CData(t) => {
                text.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                let parent = stack.last().map(String::as_str);
                match (name.as_str(), parent) {
                    ("href", Some("response")) => {
                        if let Some(r) = response.as_mut() {
                            r.href = text.trim().to_string();
                        }
                    }
                    ("status", Some("propstat")) => {
                        if let Some(ps) = propstat.as_mut() {
                            ps.status = Some(text.trim().to_string());
                        }
                    }
                    (prop, Some("prop")) => {
                        if let Some(ps) = propstat.as_mut() {
                            ps.props.insert(prop.to_string(), text.trim().to_string());
                        }
                    }
                    ("propstat", _) => {
                        if let (Some(ps), Some(r)) = (propstat.take(), response.as_mut()) {
                            if ps.is_success() {
                                r.is_collection |= ps.is_collection;
                                r.props.extend(ps.props);
                            }
                        }
                    }
                    ("response", _) => {
                        if let Some(r) = response.take() {
                            responses.push(r);
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(responses)
}
