pub mod serial;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketType {
    Initial,
    OneRtt,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameType {
    Ack,
    Stream,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub packet_number: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
}

/// Acknowledges a single packet, and advertises the sender's receive window (in packets).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AckFrame {
    pub packet_number: u32,
    pub window_size: u32,
}

/// A contiguous piece of a stream. The `length` field on the wire is always derived from
/// `payload`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamFrame {
    pub stream_id: u32,
    pub offset: u64,
    pub finished: bool,
    pub payload: Box<[u8]>,
}

impl StreamFrame {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Offset one past the final byte of this frame.
    pub fn end(&self) -> u64 {
        self.offset + self.payload.len() as u64
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    Ack(AckFrame),
    Stream(StreamFrame),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Ack(_) => FrameType::Ack,
            Frame::Stream(_) => FrameType::Stream,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub frame: Frame,
}

impl Packet {
    pub fn new(packet_type: PacketType, packet_number: u32, frame: Frame) -> Self {
        Self {
            header: PacketHeader {
                packet_type,
                packet_number,
            },
            frame,
        }
    }
}
