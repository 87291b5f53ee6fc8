use bitflags::bitflags;

pub const HEADER_LEN: usize = 5;
pub const DEFAULT_BLOCK_SIZE: usize = 95;
pub const MAX_DATAGRAM_SIZE: usize = 1200;
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_LEN;
pub const DEFAULT_PORT: u16 = 50001;

const TYPE_MASK: u8 = 0x0F;

bitflags! {
    /// High nibble of the metadata byte. Bits other than `LAST` are reserved
    /// and dropped on decode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MessageFlags: u8 {
        const LAST = 0x10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Data = 0,
    Request = 1,
    Ack = 2,
    Error = 3,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Data => "DATA",
            MessageType::Request => "REQUEST",
            MessageType::Ack => "ACK",
            MessageType::Error => "ERROR",
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, MessageError> {
        match value {
            0 => Ok(MessageType::Data),
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Ack),
            3 => Ok(MessageType::Error),
            other => Err(MessageError::UnknownType(other)),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub is_last: bool,
    pub kind: MessageType,
    pub block: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("datagram of {len} bytes is shorter than the {} byte header", HEADER_LEN)]
    Truncated { len: usize },
    #[error("unknown message type {0}")]
    UnknownType(u8),
}

impl Message {
    pub fn new(is_last: bool, kind: MessageType, block: u32, payload: Vec<u8>) -> Self {
        Self {
            is_last,
            kind,
            block,
            payload,
        }
    }

    /// Initial request; the block number is the first one the client has not
    /// yet seen acknowledged, which is always 0.
    pub fn request(filename: &str) -> Self {
        Self::new(false, MessageType::Request, 0, filename.as_bytes().to_vec())
    }

    pub fn data(block: u32, payload: Vec<u8>, is_last: bool) -> Self {
        Self::new(is_last, MessageType::Data, block, payload)
    }

    pub fn ack(block: u32, is_last: bool) -> Self {
        Self::new(is_last, MessageType::Ack, block, Vec::new())
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(false, MessageType::Error, 0, reason.into().into_bytes())
    }

    pub fn flags(&self) -> MessageFlags {
        if self.is_last {
            MessageFlags::LAST
        } else {
            MessageFlags::empty()
        }
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.flags().bits() | self.kind as u8);
        buf.extend_from_slice(&self.block.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes one datagram. The payload is whatever follows the header; it is
    /// kept as raw bytes because DATA blocks need not be valid UTF-8.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < HEADER_LEN {
            return Err(MessageError::Truncated { len: data.len() });
        }

        let metadata = data[0];
        let kind = MessageType::from_u8(metadata & TYPE_MASK)?;
        let flags = MessageFlags::from_bits_truncate(metadata & !TYPE_MASK);
        let block = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);

        Ok(Self {
            is_last: flags.contains(MessageFlags::LAST),
            kind,
            block,
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}{}, {} bytes)",
            self.kind,
            self.block,
            if self.is_last { ", last" } else { "" },
            self.payload.len()
        )
    }
}
