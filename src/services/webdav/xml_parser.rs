//! Parser for WebDAV `multistatus` bodies
//!
//! Servers answer a PROPFIND with zero, one or many `<response>` elements,
//! each holding one or many `<propstat>` blocks. Everything is collected into
//! vectors here so callers never care about the cardinality the server chose.
//! Elements are matched on their local name, so `D:`, `d:`, `lp1:` or a
//! default namespace all parse the same.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlParseError {
    #[error("malformed XML: {0}")]
    Malformed(String),
    #[error("document is not a DAV multistatus")]
    NotMultistatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Multistatus {
    pub responses: Vec<DavResponse>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResponse {
    pub href: String,
    pub propstats: Vec<DavPropStat>,
    /// Response level status, present when the server reports no properties
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavPropStat {
    pub status: Option<String>,
    pub props: DavProps,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavProps {
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub is_collection: bool,
}

impl DavResponse {
    /// Properties from the first successful propstat block
    pub fn props(&self) -> Option<&DavProps> {
        self.propstats
            .iter()
            .find(|ps| ps.status.as_deref().map(status_is_success).unwrap_or(true))
            .map(|ps| &ps.props)
    }
}

/// `HTTP/1.1 200 OK` -> true
fn status_is_success(status: &str) -> bool {
    status
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .map(|code| (200..300).contains(&code))
        .unwrap_or(false)
}

#[derive(Default)]
struct ParserState {
    stack: Vec<String>,
    saw_root: bool,
    responses: Vec<DavResponse>,
    response: Option<DavResponse>,
    propstat: Option<DavPropStat>,
}

impl ParserState {
    fn open(&mut self, name: &str) {
        match name {
            "multistatus" => self.saw_root = true,
            "response" => self.response = Some(DavResponse::default()),
            "propstat" if self.response.is_some() => self.propstat = Some(DavPropStat::default()),
            "collection" if self.stack.iter().any(|n| n == "resourcetype") => {
                if let Some(propstat) = self.propstat.as_mut() {
                    propstat.props.is_collection = true;
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &str) {
        match name {
            "propstat" => {
                if let (Some(response), Some(propstat)) = (self.response.as_mut(), self.propstat.take()) {
                    response.propstats.push(propstat);
                }
            }
            "response" => {
                if let Some(response) = self.response.take() {
                    self.responses.push(response);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        let Some(element) = self.stack.last() else {
            return;
        };

        if let Some(propstat) = self.propstat.as_mut() {
            let props = &mut propstat.props;
            match element.as_str() {
                "status" => append(&mut propstat.status, text),
                "getcontentlength" => props.content_length = text.trim().parse().ok(),
                "getlastmodified" => append(&mut props.last_modified, text),
                "getetag" => append(&mut props.etag, text),
                "getcontenttype" => append(&mut props.content_type, text),
                _ => {}
            }
        } else if let Some(response) = self.response.as_mut() {
            match element.as_str() {
                "href" => response.href.push_str(text),
                "status" => append(&mut response.status, text),
                _ => {}
            }
        }
    }
}

fn append(target: &mut Option<String>, text: &str) {
    target.get_or_insert_with(String::new).push_str(text);
}

/// Parse a multistatus document into its normalized form
pub fn parse_multistatus(xml: &str) -> Result<Multistatus, XmlParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut state = ParserState::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.open(&name);
                state.stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                state.open(&name);
                state.close(&name);
            }
            Ok(Event::End(_)) => {
                if let Some(name) = state.stack.pop() {
                    state.close(&name);
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|e| XmlParseError::Malformed(e.to_string()))?;
                state.text(&text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                state.text(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(XmlParseError::Malformed(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !state.saw_root {
        return Err(XmlParseError::NotMultistatus);
    }

    Ok(Multistatus {
        responses: state.responses,
    })
}
