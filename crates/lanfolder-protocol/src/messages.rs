//! Wire message types: ANNOUNCE, ANNOUNCE-REPLY and FILE-UPDATE.
//!
//! Decoding is pure. It never acts on message content, it only checks that
//! the namespace matches and the required fields are present and well formed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{validate_path, ProtocolError, Version, DELIMITER, MAX_DATAGRAM_SIZE, NAMESPACE};

/// Opaque node identifier, generated once per node and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.is_empty() || id.contains(DELIMITER) || id.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidField {
                field: "uuid",
                value: id,
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One shared file as announced on the wire: path is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub version: Version,
    pub size: u64,
}

/// Message kind as it appears after `type;`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Announce,
    AnnounceReply,
    FileUpdate,
}

impl MessageKind {
    /// Token written on the wire. ANNOUNCE keeps the `EXIST` spelling
    /// existing nodes use.
    pub fn wire_name(self) -> &'static str {
        match self {
            MessageKind::Announce => "EXIST",
            MessageKind::AnnounceReply => "REPLY",
            MessageKind::FileUpdate => "FILE",
        }
    }

    fn from_wire(token: &str) -> Result<Self, ProtocolError> {
        match token {
            "EXIST" | "ANNOUNCE" => Ok(MessageKind::Announce),
            "REPLY" => Ok(MessageKind::AnnounceReply),
            "FILE" => Ok(MessageKind::FileUpdate),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// "I exist, please sync with me and reply."
    Announce { peer_id: PeerId },
    /// Completes the handshake without asking for another reply.
    AnnounceReply { peer_id: PeerId },
    /// A single file changed on the sender.
    FileUpdate { peer_id: PeerId, entry: FileEntry },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Announce { .. } => MessageKind::Announce,
            Message::AnnounceReply { .. } => MessageKind::AnnounceReply,
            Message::FileUpdate { .. } => MessageKind::FileUpdate,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        match self {
            Message::Announce { peer_id }
            | Message::AnnounceReply { peer_id }
            | Message::FileUpdate { peer_id, .. } => peer_id,
        }
    }

    /// Render the datagram payload.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut fields: Vec<(&str, String)> = vec![
            ("type", self.kind().wire_name().to_string()),
            ("uuid", self.peer_id().to_string()),
        ];
        if let Message::FileUpdate { entry, .. } = self {
            validate_path(&entry.path)?;
            fields.push(("path", entry.path.clone()));
            fields.push(("ver", entry.version.to_string()));
            fields.push(("size", entry.size.to_string()));
        }

        let mut payload = String::from(NAMESPACE);
        for (key, value) in fields {
            payload.push(DELIMITER);
            payload.push_str(key);
            payload.push(DELIMITER);
            payload.push_str(&value);
        }

        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::DatagramTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(payload)
    }

    /// Parse a datagram payload. Fields after the namespace are key/value
    /// pairs in any order; unknown keys are ignored and the first occurrence
    /// of a repeated key wins.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(ProtocolError::DatagramTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        let text = std::str::from_utf8(payload)?.trim_end();

        let mut tokens = text.split(DELIMITER);
        if tokens.next() != Some(NAMESPACE) {
            return Err(ProtocolError::MissingNamespace);
        }

        let mut fields = Fields::default();
        while let Some(key) = tokens.next() {
            let Some(value) = tokens.next() else {
                return Err(ProtocolError::DanglingKey(key.to_string()));
            };
            fields.set(key, value);
        }

        let kind = MessageKind::from_wire(fields.require("type")?)?;
        let peer_id = PeerId::new(fields.require("uuid")?)?;

        Ok(match kind {
            MessageKind::Announce => Message::Announce { peer_id },
            MessageKind::AnnounceReply => Message::AnnounceReply { peer_id },
            MessageKind::FileUpdate => {
                let path = fields.require("path")?;
                validate_path(path)?;
                let version: Version = fields.require("ver")?.parse()?;
                let size_raw = fields.require("size")?;
                let size = size_raw.parse().map_err(|_| ProtocolError::InvalidField {
                    field: "size",
                    value: size_raw.to_string(),
                })?;
                Message::FileUpdate {
                    peer_id,
                    entry: FileEntry {
                        path: path.to_string(),
                        version,
                        size,
                    },
                }
            }
        })
    }
}

/// The recognised fields of one datagram.
#[derive(Default)]
struct Fields<'a> {
    kind: Option<&'a str>,
    uuid: Option<&'a str>,
    path: Option<&'a str>,
    ver: Option<&'a str>,
    size: Option<&'a str>,
}

impl<'a> Fields<'a> {
    fn set(&mut self, key: &str, value: &'a str) {
        let slot = match key {
            "type" => &mut self.kind,
            "uuid" => &mut self.uuid,
            "path" => &mut self.path,
            "ver" => &mut self.ver,
            "size" => &mut self.size,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    fn require(&self, key: &'static str) -> Result<&'a str, ProtocolError> {
        let value = match key {
            "type" => self.kind,
            "uuid" => self.uuid,
            "path" => self.path,
            "ver" => self.ver,
            "size" => self.size,
            _ => None,
        };
        value.ok_or(ProtocolError::MissingField(key))
    }
}
