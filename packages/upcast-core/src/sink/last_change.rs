//! RenderingControl `LastChange` parsing.
//!
//! Accepts either the bare `LastChange` value (an `<Event>` document) or a
//! whole NOTIFY property set carrying it entity-escaped. Only the `Master`
//! channel of instance 0 is read; stereo pairs also report `LF`/`RF`, which
//! are ignored.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;

/// Volume/mute values found in one event. Absent fields were not reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LastChangeData {
    /// Volume in percent (0-100).
    pub volume: Option<u32>,
    pub muted: Option<bool>,
}

impl LastChangeData {
    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.muted.is_none()
    }
}

/// A LastChange payload that could not be read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unparseable LastChange event: {0}")]
pub struct LastChangeError(pub String);

/// Parses a LastChange value or a NOTIFY body containing one.
pub fn parse_last_change(body: &str) -> Result<LastChangeData, LastChangeError> {
    let event = match extract_xml_text(body, "LastChange")? {
        Some(inner) => inner,
        None => body.to_string(),
    };
    parse_event(&event)
}

fn parse_event(xml: &str) -> Result<LastChangeData, LastChangeError> {
    let mut data = LastChangeData::default();
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut in_instance_zero = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"InstanceID" => {
                in_instance_zero = get_xml_attr(e, b"val").as_deref() == Some("0");
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"InstanceID" => {
                in_instance_zero = false;
            }
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if in_instance_zero => {
                if get_xml_attr(e, b"channel").as_deref() != Some("Master") {
                    buf.clear();
                    continue;
                }
                let Some(val) = get_xml_attr(e, b"val") else {
                    buf.clear();
                    continue;
                };
                match e.local_name().as_ref() {
                    b"Volume" => {
                        let volume = val.trim().parse::<u32>().map_err(|_| {
                            LastChangeError(format!("bad Volume value '{val}'"))
                        })?;
                        data.volume = Some(volume.min(100));
                    }
                    b"Mute" => {
                        data.muted = Some(parse_bool(&val).ok_or_else(|| {
                            LastChangeError(format!("bad Mute value '{val}'"))
                        })?);
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LastChangeError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(data)
}

pub(super) fn parse_bool(val: &str) -> Option<bool> {
    match val.trim() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Text content of the first element named `element_name`, entities decoded.
fn extract_xml_text(xml: &str, element_name: &str) -> Result<Option<String>, LastChangeError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let target = element_name.as_bytes();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == target => {
                let text = reader
                    .read_text(e.name())
                    .map_err(|err| LastChangeError(err.to_string()))?;
                return Ok(Some(html_escape::decode_html_entities(&text).to_string()));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(LastChangeError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

fn get_xml_attr(elem: &BytesStart, attr_name: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == attr_name)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{LAST_CHANGE_FULL, LAST_CHANGE_MUTED, RENDERING_CONTROL_NOTIFY};

    #[test]
    fn reads_master_channel_only() {
        let data = parse_last_change(LAST_CHANGE_FULL).unwrap();
        assert_eq!(data.volume, Some(42));
        assert_eq!(data.muted, Some(false));
    }

    #[test]
    fn absent_fields_stay_none() {
        let data = parse_last_change(LAST_CHANGE_MUTED).unwrap();
        assert_eq!(data.volume, None);
        assert_eq!(data.muted, Some(true));
    }

    #[test]
    fn unwraps_notify_property_set() {
        let data = parse_last_change(RENDERING_CONTROL_NOTIFY).unwrap();
        assert_eq!(data.volume, Some(75));
        assert_eq!(data.muted, Some(true));
    }

    #[test]
    fn other_instances_are_ignored() {
        let xml = r#"<Event><InstanceID val="1"><Volume channel="Master" val="9"/></InstanceID></Event>"#;
        assert!(parse_last_change(xml).unwrap().is_empty());
    }

    #[test]
    fn volume_is_clamped_to_percent() {
        let xml = r#"<Event><InstanceID val="0"><Volume channel="Master" val="250"/></InstanceID></Event>"#;
        assert_eq!(parse_last_change(xml).unwrap().volume, Some(100));
    }

    #[test]
    fn garbage_values_are_errors() {
        let xml = r#"<Event><InstanceID val="0"><Volume channel="Master" val="loud"/></InstanceID></Event>"#;
        assert!(parse_last_change(xml).is_err());

        let xml = r#"<Event><InstanceID val="0"><Mute channel="Master" val="maybe"/></InstanceID></Event>"#;
        assert!(parse_last_change(xml).is_err());
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_last_change("<Event><InstanceID val=\"0\"></Event>").is_err());
    }
}
