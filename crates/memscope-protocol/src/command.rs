//! Commands sent by instrumented processes.
//!
//! A frame is a 4-byte command tag followed by the command's fields.
//! Every command encodes to exactly the layout it decodes from.

use crate::error::DecodeError;
use crate::wire::{WireReader, WireWriter};

/// Wire tags of the known commands.
pub mod tag {
    pub const REGISTER_PROCESS: u32 = 1;
    pub const ADD_WATCH: u32 = 2;
    pub const REMOVE_WATCH: u32 = 3;
    pub const ADD_CATEGORY: u32 = 4;
    pub const ADD_LOG_MESSAGE: u32 = 5;
}

/// A decoded command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Bind the connection to a process id
    RegisterProcess { pid: u64 },

    /// Add a memory watch under a category (0 = root set)
    AddWatch {
        type_name: String,
        name: String,
        parent: u32,
        handle: u32,
        base_address: u64,
        max_size: u32,
    },

    /// Remove a watch object by handle
    RemoveWatch { handle: u32 },

    /// Add a category under another category (0 = root set)
    AddCategory {
        name: String,
        parent: u32,
        handle: u32,
    },

    /// Forward a log line, optionally tagged with a filter
    AddLogMessage { message: String, filter: String },

    /// Any tag this server does not know; ignored by the receiver
    Unknown { tag: u32 },
}

impl Command {
    /// Decodes one frame (tag + fields). Trailing bytes are ignored.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(frame);

        let command = match r.read_u32("command tag")? {
            tag::REGISTER_PROCESS => Command::RegisterProcess {
                pid: r.read_u64("process id")?,
            },
            tag::ADD_WATCH => Command::AddWatch {
                type_name: r.read_string("type name")?,
                name: r.read_string("watch name")?,
                parent: r.read_u32("category handle")?,
                handle: r.read_u32("watch handle")?,
                base_address: r.read_u64("base address")?,
                max_size: r.read_u32("max size")?,
            },
            tag::REMOVE_WATCH => Command::RemoveWatch {
                handle: r.read_u32("watch handle")?,
            },
            tag::ADD_CATEGORY => Command::AddCategory {
                name: r.read_string("category name")?,
                parent: r.read_u32("category handle")?,
                handle: r.read_u32("handle")?,
            },
            tag::ADD_LOG_MESSAGE => Command::AddLogMessage {
                message: r.read_string("message")?,
                filter: r.read_string("filter")?,
            },
            other => Command::Unknown { tag: other },
        };

        Ok(command)
    }

    /// Encodes this command as one frame (tag + fields, no length prefix).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u32(self.tag());

        match self {
            Command::RegisterProcess { pid } => {
                w.put_u64(*pid);
            }
            Command::AddWatch {
                type_name,
                name,
                parent,
                handle,
                base_address,
                max_size,
            } => {
                w.put_string(type_name)
                    .put_string(name)
                    .put_u32(*parent)
                    .put_u32(*handle)
                    .put_u64(*base_address)
                    .put_u32(*max_size);
            }
            Command::RemoveWatch { handle } => {
                w.put_u32(*handle);
            }
            Command::AddCategory {
                name,
                parent,
                handle,
            } => {
                w.put_string(name).put_u32(*parent).put_u32(*handle);
            }
            Command::AddLogMessage { message, filter } => {
                w.put_string(message).put_string(filter);
            }
            Command::Unknown { .. } => {}
        }

        w.into_bytes()
    }

    pub fn tag(&self) -> u32 {
        match self {
            Command::RegisterProcess { .. } => tag::REGISTER_PROCESS,
            Command::AddWatch { .. } => tag::ADD_WATCH,
            Command::RemoveWatch { .. } => tag::REMOVE_WATCH,
            Command::AddCategory { .. } => tag::ADD_CATEGORY,
            Command::AddLogMessage { .. } => tag::ADD_LOG_MESSAGE,
            Command::Unknown { tag } => *tag,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterProcess { .. } => "RegisterProcess",
            Command::AddWatch { .. } => "AddWatch",
            Command::RemoveWatch { .. } => "RemoveWatch",
            Command::AddCategory { .. } => "AddCategory",
            Command::AddLogMessage { .. } => "AddLogMessage",
            Command::Unknown { .. } => "Unknown",
        }
    }

    /// Whether a connection from a non-loopback peer may run this command.
    #[must_use]
    pub fn allowed_remotely(&self) -> bool {
        matches!(self, Command::AddLogMessage { .. } | Command::Unknown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_watch() -> Command {
        Command::AddWatch {
            type_name: "Float32".to_string(),
            name: "Speed".to_string(),
            parent: 7,
            handle: 8,
            base_address: 0x7fff_0000_1234,
            max_size: 4,
        }
    }

    #[test]
    fn test_add_watch_round_trip() {
        let cmd = add_watch();
        assert_eq!(Command::decode(&cmd.encode()), Ok(cmd));
    }

    #[test]
    fn test_add_watch_field_order() {
        let bytes = add_watch().encode();
        let mut expected = vec![2, 0, 0, 0];
        expected.extend_from_slice(&7i32.to_le_bytes());
        expected.extend_from_slice(b"Float32");
        expected.extend_from_slice(&5i32.to_le_bytes());
        expected.extend_from_slice(b"Speed");
        expected.extend_from_slice(&7u32.to_le_bytes());
        expected.extend_from_slice(&8u32.to_le_bytes());
        expected.extend_from_slice(&0x7fff_0000_1234u64.to_le_bytes());
        expected.extend_from_slice(&4u32.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_other_commands_round_trip() {
        let commands = [
            Command::RegisterProcess { pid: 4242 },
            Command::RemoveWatch { handle: 99 },
            Command::AddCategory {
                name: "Player".to_string(),
                parent: 0,
                handle: 1,
            },
            Command::AddLogMessage {
                message: "loaded level".to_string(),
                filter: String::new(),
            },
        ];

        for cmd in commands {
            assert_eq!(Command::decode(&cmd.encode()).as_ref(), Ok(&cmd));
        }
    }

    #[test]
    fn test_unknown_tag_is_not_an_error() {
        let mut frame = 6u32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"whatever payload");
        assert_eq!(Command::decode(&frame), Ok(Command::Unknown { tag: 6 }));
    }

    #[test]
    fn test_truncated_frames() {
        assert!(matches!(
            Command::decode(&[1, 0]),
            Err(DecodeError::Truncated { field: "command tag", .. })
        ));
        assert!(matches!(
            Command::decode(&[1, 0, 0, 0, 1, 2, 3]),
            Err(DecodeError::Truncated { field: "process id", .. })
        ));
        assert!(matches!(
            Command::decode(&[3, 0, 0, 0]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut frame = Command::RemoveWatch { handle: 5 }.encode();
        frame.extend_from_slice(&[0xAA; 6]);
        assert_eq!(Command::decode(&frame), Ok(Command::RemoveWatch { handle: 5 }));
    }

    #[test]
    fn test_allowed_remotely() {
        assert!(!Command::RegisterProcess { pid: 1 }.allowed_remotely());
        assert!(!add_watch().allowed_remotely());
        assert!(Command::AddLogMessage {
            message: String::new(),
            filter: String::new()
        }
        .allowed_remotely());
    }
}
