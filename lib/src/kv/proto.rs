//! Wire messages of the remote KV protocol. The server multiplexes every
//! cursor operation of one read transaction over a single bidirectional
//! stream; cursor ids are assigned by the server.

/// Client-to-server cursor command.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Cursor {
    #[prost(enumeration = "Op", tag = "1")]
    pub op: i32,
    #[prost(string, tag = "2")]
    pub bucket_name: String,
    #[prost(uint32, tag = "3")]
    pub cursor: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub k: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub v: Vec<u8>,
}

/// Server-to-client reply. The first message of a stream carries the
/// transaction id of the snapshot all subsequent reads observe.
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct Pair {
    #[prost(uint64, tag = "1")]
    pub tx_id: u64,
    #[prost(uint32, tag = "2")]
    pub cursor_id: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub k: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub v: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Op {
    Open = 0,
    Seek = 1,
    SeekExact = 2,
    SeekBoth = 3,
    SeekBothExact = 4,
    Current = 5,
    Next = 6,
    NextDup = 7,
    Prev = 8,
    Last = 9,
    First = 10,
    Close = 11,
}
