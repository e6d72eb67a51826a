//! Response Body Model (spec §4.F): a transport-agnostic tagged body that
//! lets adapters choose the cheapest transfer strategy available to them.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;

/// One SSE frame, ready to be serialized by a transport adapter. A typed
/// `Event` carries a name/data/id triple; `Comment` is a bare `: text` line
/// (spec §4.C, §6) used for keep-alives, which per the SSE spec must not be
/// mistaken for application data by a client's event listeners.
#[derive(Debug, Clone)]
pub enum SseFrame {
    Event {
        event: &'static str,
        data: String,
        id: Option<String>,
    },
    Comment(&'static str),
}

impl SseFrame {
    pub fn data(event: &'static str, data: String, id: String) -> Self {
        SseFrame::Event {
            event,
            data,
            id: Some(id),
        }
    }

    pub fn keepalive() -> Self {
        SseFrame::Comment("ping")
    }

    pub fn closed() -> Self {
        SseFrame::Event {
            event: "closed",
            data: String::new(),
            id: None,
        }
    }
}

/// A pull-driven source of SSE frames. The dispatcher only produces a frame
/// once the adapter asks for the next one, which is what gives the SSE
/// waiter its backpressure (spec §4.C): an adapter that stops polling never
/// causes unbounded buffering on the producer side.
pub type SseReceiver = mpsc::Receiver<SseFrame>;

/// Tagged response body (spec §4.F). Transport adapters pattern-match this
/// and pick direct write, zero-copy transfer, or subscribed streaming.
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    FileRegion {
        path: PathBuf,
        position: u64,
        length: u64,
    },
    Sse(SseReceiver),
}

impl ResponseBody {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        ResponseBody::Bytes(data.into())
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Empty => write!(f, "Empty"),
            ResponseBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ResponseBody::FileRegion { path, position, length } => {
                write!(f, "FileRegion({path:?}, {position}, {length})")
            }
            ResponseBody::Sse(_) => write!(f, "Sse(..)"),
        }
    }
}
