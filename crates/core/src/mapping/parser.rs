//! Streaming parser for `unix-user-mapping.xml`.
//!
//! The document format:
//!
//! ```xml
//! <unix-user-mapping serviceName="guacamole">
//!     <config name="desktop" protocol="rdp">
//!         <param name="hostname" value="desktop.example.com" />
//!         <param name="port" value="3389" />
//!     </config>
//!     <user name="alice">
//!         <config-ref name="desktop" />
//!     </user>
//!     <group name="staff">
//!         <config-ref name="desktop" />
//!     </group>
//! </unix-user-mapping>
//! ```
//!
//! Nesting is checked by an explicit state stack fed from `quick-xml`
//! events. Any violation aborts the parse; callers never see a partially
//! built document.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info, warn};

use super::document::MappingDocument;
use crate::errors::{MappingError, StructuralError};
use crate::models::ConfigurationEntry;

/// Name of the document root element.
pub const ROOT_ELEMENT: &str = "unix-user-mapping";

/// Parser states; the current one is the innermost known open element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Document,
    TopLevel,
    Config,
    Param,
    User,
    Group,
    ConfigRef,
}

/// One open element. Unknown elements carry no state of their own.
#[derive(Debug)]
struct Frame {
    name: String,
    state: Option<State>,
}

/// Which reference set is being collected.
#[derive(Debug)]
enum Holder {
    User(String),
    Group(String),
}

/// Load and parse the mapping file at `path`.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<MappingDocument, MappingError> {
    let path = path.as_ref();
    info!(path = %path.display(), "reading user mapping file");

    if !path.exists() {
        return Err(MappingError::AbsentSource(path.display().to_string()));
    }

    let bytes = std::fs::read(path).map_err(|source| MappingError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let structural = |source: StructuralError| MappingError::Structural {
        path: path.display().to_string(),
        source,
    };
    let contents = String::from_utf8(bytes).map_err(|e| {
        structural(StructuralError::Malformed {
            position: e.utf8_error().valid_up_to() as u64,
            detail: "document is not valid UTF-8".into(),
        })
    })?;

    parse_str(&contents).map_err(structural)
}

/// Parse a mapping document held in memory.
pub fn parse_str(xml: &str) -> Result<MappingDocument, StructuralError> {
    debug!("parsing user mapping XML ({} bytes)", xml.len());

    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_comments = true;

    let mut parser = MappingParser::default();
    let mut first = true;

    loop {
        let event = reader.read_event().map_err(|e| StructuralError::Malformed {
            position: reader.error_position() as u64,
            detail: e.to_string(),
        })?;
        let position = reader.buffer_position() as u64;
        let leading = std::mem::replace(&mut first, false);

        match event {
            Event::Start(element) => parser.open(&element, position)?,
            Event::Empty(element) => {
                parser.open(&element, position)?;
                parser.close(position)?;
            }
            Event::End(_) => parser.close(position)?,
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| StructuralError::Malformed {
                    position,
                    detail: e.to_string(),
                })?;
                if parser.stack.is_empty() && !text.trim().is_empty() {
                    return Err(StructuralError::Malformed {
                        position,
                        detail: "text outside of the document root".into(),
                    });
                }
            }
            Event::Decl(_) if !leading => {
                return Err(StructuralError::Malformed {
                    position,
                    detail: "XML declaration must start the document".into(),
                });
            }
            Event::DocType(_) if parser.root_seen => {
                return Err(StructuralError::Malformed {
                    position,
                    detail: "DOCTYPE after the document root".into(),
                });
            }
            Event::CData(_) if parser.stack.is_empty() => {
                return Err(StructuralError::Malformed {
                    position,
                    detail: "CDATA outside of the document root".into(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    parser.finish()
}

#[derive(Debug, Default)]
struct MappingParser {
    document: MappingDocument,
    stack: Vec<Frame>,
    root_seen: bool,
    config: Option<(String, ConfigurationEntry)>,
    refs: Option<(Holder, BTreeSet<String>)>,
}

impl MappingParser {
    fn state(&self) -> State {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.state)
            .unwrap_or(State::Document)
    }

    fn open(&mut self, element: &BytesStart<'_>, position: u64) -> Result<(), StructuralError> {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let mut attrs = Attributes::read(element, position)?;
        let state = self.state();

        if state == State::Document && name != ROOT_ELEMENT {
            if self.root_seen {
                return Err(StructuralError::Malformed {
                    position,
                    detail: format!("element <{}> after the document root", name),
                });
            }
            return Err(StructuralError::MissingRoot);
        }

        let next = match name.as_str() {
            ROOT_ELEMENT => {
                if state != State::Document {
                    return Err(StructuralError::Misplaced {
                        element: ROOT_ELEMENT,
                        context: "inside another element",
                    });
                }
                if self.root_seen {
                    return Err(StructuralError::Misplaced {
                        element: ROOT_ELEMENT,
                        context: "more than once",
                    });
                }
                self.root_seen = true;
                if let Some(service_name) = attrs.optional("serviceName") {
                    self.document.set_service_name(service_name);
                }
                State::TopLevel
            }

            "config" => {
                if state != State::TopLevel {
                    return Err(StructuralError::Misplaced {
                        element: "config",
                        context: "outside of the top level",
                    });
                }
                let config_name = attrs.required("config", "name")?;
                let protocol = attrs.required("config", "protocol")?;
                let entry = ConfigurationEntry::new(protocol).map_err(|source| {
                    StructuralError::InvalidConfig {
                        name: config_name.clone(),
                        source,
                    }
                })?;
                self.config = Some((config_name, entry));
                State::Config
            }

            "param" => {
                if state != State::Config {
                    return Err(StructuralError::Misplaced {
                        element: "param",
                        context: "outside of a config",
                    });
                }
                let param_name = attrs.required("param", "name")?;
                let value = attrs.required("param", "value")?;
                if let Some((config_name, entry)) = self.config.as_mut() {
                    entry.set_parameter(param_name, value).map_err(|source| {
                        StructuralError::InvalidConfig {
                            name: config_name.clone(),
                            source,
                        }
                    })?;
                }
                State::Param
            }

            "user" | "group" => {
                let (tag, next) = if name == "user" {
                    ("user", State::User)
                } else {
                    ("group", State::Group)
                };
                if state != State::TopLevel {
                    return Err(StructuralError::Misplaced {
                        element: tag,
                        context: "outside of the top level",
                    });
                }
                let holder_name = attrs.required(tag, "name")?;
                let holder = match next {
                    State::User => Holder::User(holder_name),
                    _ => Holder::Group(holder_name),
                };
                self.refs = Some((holder, BTreeSet::new()));
                next
            }

            "config-ref" => {
                if state != State::User && state != State::Group {
                    return Err(StructuralError::Misplaced {
                        element: "config-ref",
                        context: "outside of a user or group",
                    });
                }
                let config_name = attrs.required("config-ref", "name")?;
                if let Some((_, refs)) = self.refs.as_mut() {
                    refs.insert(config_name);
                }
                State::ConfigRef
            }

            _ => {
                warn!(element = %name, "ignoring unknown element in user mapping");
                self.stack.push(Frame { name, state: None });
                return Ok(());
            }
        };

        self.stack.push(Frame {
            name,
            state: Some(next),
        });
        Ok(())
    }

    fn close(&mut self, position: u64) -> Result<(), StructuralError> {
        let frame = self.stack.pop().ok_or(StructuralError::Malformed {
            position,
            detail: "end tag without a matching start tag".into(),
        })?;

        match frame.state {
            Some(State::Config) => {
                if let Some((name, entry)) = self.config.take() {
                    self.document.insert_config(name, entry);
                }
            }
            Some(State::User) | Some(State::Group) => match self.refs.take() {
                Some((Holder::User(name), refs)) => self.document.insert_user(name, refs),
                Some((Holder::Group(name), refs)) => self.document.insert_group(name, refs),
                None => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<MappingDocument, StructuralError> {
        if let Some(frame) = self.stack.last() {
            return Err(StructuralError::Unclosed(frame.name.clone()));
        }
        if !self.root_seen {
            return Err(StructuralError::MissingRoot);
        }

        let summary = self.document.summary();
        debug!(
            configs = summary.configs,
            users = summary.users,
            groups = summary.groups,
            "parsed user mapping"
        );
        Ok(self.document)
    }
}

/// Unescaped attributes of one element.
struct Attributes(HashMap<String, String>);

impl Attributes {
    fn read(element: &BytesStart<'_>, position: u64) -> Result<Self, StructuralError> {
        let mut values = HashMap::new();
        for attr in element.attributes() {
            let attr = attr.map_err(|e| StructuralError::Malformed {
                position,
                detail: e.to_string(),
            })?;
            let value = attr
                .unescape_value()
                .map_err(|e| StructuralError::Malformed {
                    position,
                    detail: e.to_string(),
                })?;
            values.insert(
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            );
        }
        Ok(Self(values))
    }

    fn required(
        &mut self,
        element: &'static str,
        attribute: &'static str,
    ) -> Result<String, StructuralError> {
        self.0
            .remove(attribute)
            .ok_or(StructuralError::MissingAttribute { element, attribute })
    }

    fn optional(&mut self, attribute: &str) -> Option<String> {
        self.0.remove(attribute)
    }
}
