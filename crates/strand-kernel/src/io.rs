//! Stream I/O.
//!
//! [`Stream`] is the raw non-blocking primitive.  The kernel serializes
//! access per stream: reads and writes each form a FIFO queue, and only the
//! request at the head of a queue touches the stream.  A second read on a
//! stream that is already being read waits its turn instead of interleaving.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use crate::error::StrandError;
use crate::kernel::Kernel;
use crate::reactor::Token;
use crate::strand::{Action, Terminator};
use crate::value::{StrandId, Value};

// ---------------------------------------------------------------------------
// Stream primitive
// ---------------------------------------------------------------------------

/// Direction of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Read,
    Write,
}

/// A non-blocking byte stream.
///
/// Methods take `&self`: streams are shared as `Rc<dyn Stream>` between the
/// strands using them and the reactor watching them.
pub trait Stream {
    /// Read up to `max_len` bytes.  An empty buffer means end of stream;
    /// [`io::ErrorKind::WouldBlock`] means no data yet.
    fn read(&self, max_len: usize) -> io::Result<Vec<u8>>;

    /// Write a prefix of `data`, returning how many bytes were accepted.
    /// [`io::ErrorKind::WouldBlock`] means no room yet.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Whether a read or write would make progress right now.
    fn poll_ready(&self, interest: Interest) -> bool;
}

/// Identity of a stream, derived from its `Rc` allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey(usize);

impl StreamKey {
    pub fn of(stream: &Rc<dyn Stream>) -> Self {
        Self(Rc::as_ptr(stream).cast::<()>() as usize)
    }
}

/// In-memory byte pipe with an optional capacity.
///
/// Reads drain the buffer; once [`close`](Self::close)d and drained, reads
/// report end of stream and writes fail with `BrokenPipe`.
#[derive(Debug, Default)]
pub struct MemoryStream {
    inner: RefCell<Pipe>,
}

#[derive(Debug, Default)]
struct Pipe {
    buffer: VecDeque<u8>,
    capacity: Option<usize>,
    closed: bool,
}

impl MemoryStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipe that holds at most `capacity` unread bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RefCell::new(Pipe {
                capacity: Some(capacity),
                ..Pipe::default()
            }),
        }
    }

    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Stream for MemoryStream {
    fn read(&self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut pipe = self.inner.borrow_mut();
        if pipe.buffer.is_empty() {
            return if pipe.closed {
                Ok(Vec::new())
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = max_len.min(pipe.buffer.len());
        Ok(pipe.buffer.drain(..n).collect())
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut pipe = self.inner.borrow_mut();
        if pipe.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let room = pipe
            .capacity
            .map_or(data.len(), |cap| cap.saturating_sub(pipe.buffer.len()))
            .min(data.len());
        if room == 0 && !data.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        pipe.buffer.extend(&data[..room]);
        Ok(room)
    }

    fn poll_ready(&self, interest: Interest) -> bool {
        let pipe = self.inner.borrow();
        match interest {
            Interest::Read => pipe.closed || !pipe.buffer.is_empty(),
            Interest::Write => pipe.closed || pipe.capacity.is_none_or(|cap| pipe.buffer.len() < cap),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-stream request queues
// ---------------------------------------------------------------------------

/// A queued I/O request owned by one suspended strand.
trait Request {
    fn strand(&self) -> StrandId;
    fn epoch(&self) -> u64;
    /// Make as much progress as the stream allows.  `None` means blocked.
    fn advance(&mut self, stream: &dyn Stream) -> Option<Result<Value, StrandError>>;
}

pub(crate) struct ReadRequest {
    strand: StrandId,
    epoch: u64,
    min_len: usize,
    max_len: usize,
    buffer: Vec<u8>,
}

impl Request for ReadRequest {
    fn strand(&self) -> StrandId {
        self.strand
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn advance(&mut self, stream: &dyn Stream) -> Option<Result<Value, StrandError>> {
        while self.buffer.len() < self.max_len {
            match stream.read(self.max_len - self.buffer.len()) {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => self.buffer.extend(chunk),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.buffer.len() < self.min_len {
                        return None;
                    }
                    break;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
        Some(Ok(Value::Bytes(std::mem::take(&mut self.buffer))))
    }
}

pub(crate) struct WriteRequest {
    strand: StrandId,
    epoch: u64,
    data: Vec<u8>,
    written: usize,
}

impl Request for WriteRequest {
    fn strand(&self) -> StrandId {
        self.strand
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn advance(&mut self, stream: &dyn Stream) -> Option<Result<Value, StrandError>> {
        while self.written < self.data.len() {
            match stream.write(&self.data[self.written..]) {
                Ok(0) => return None,
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
        Some(Ok(Value::Int(self.written as i64)))
    }
}

/// Outcome of servicing the head of a lane.
pub(crate) enum LanePoll {
    /// The head request finished; resume its strand.
    Complete {
        strand: StrandId,
        epoch: u64,
        result: Result<Value, StrandError>,
    },
    /// The head request needs the stream to become ready.
    Blocked,
    /// No requests left.
    Empty,
}

/// FIFO of requests in one direction; only the head may be armed.
struct Lane<R> {
    requests: VecDeque<R>,
    token: Option<Token>,
}

impl<R: Request> Lane<R> {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            token: None,
        }
    }

    fn poll(
        &mut self,
        stream: &dyn Stream,
        is_current: impl Fn(StrandId, u64) -> bool,
    ) -> LanePoll {
        while let Some(head) = self.requests.front_mut() {
            if !is_current(head.strand(), head.epoch()) {
                tracing::trace!(strand = %head.strand(), "dropping stale i/o request");
                self.requests.pop_front();
                continue;
            }
            return match head.advance(stream) {
                Some(result) => {
                    let (strand, epoch) = (head.strand(), head.epoch());
                    self.requests.pop_front();
                    LanePoll::Complete {
                        strand,
                        epoch,
                        result,
                    }
                }
                None => LanePoll::Blocked,
            };
        }
        LanePoll::Empty
    }

    /// Remove `strand`'s request.  Returns the armed token if the removed
    /// request was the head.
    fn remove(&mut self, strand: StrandId) -> Option<Option<Token>> {
        let index = self.requests.iter().position(|r| r.strand() == strand)?;
        self.requests.remove(index);
        Some(if index == 0 { self.token.take() } else { None })
    }

    fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.token.is_none()
    }
}

/// Read and write queues of one stream.
pub(crate) struct StreamQueue {
    stream: Rc<dyn Stream>,
    reads: Lane<ReadRequest>,
    writes: Lane<WriteRequest>,
}

impl StreamQueue {
    fn new(stream: Rc<dyn Stream>) -> Self {
        Self {
            stream,
            reads: Lane::new(),
            writes: Lane::new(),
        }
    }

    fn poll(&mut self, interest: Interest, is_current: impl Fn(StrandId, u64) -> bool) -> LanePoll {
        match interest {
            Interest::Read => self.reads.poll(self.stream.as_ref(), is_current),
            Interest::Write => self.writes.poll(self.stream.as_ref(), is_current),
        }
    }

    fn token_mut(&mut self, interest: Interest) -> &mut Option<Token> {
        match interest {
            Interest::Read => &mut self.reads.token,
            Interest::Write => &mut self.writes.token,
        }
    }

    fn is_idle(&self) -> bool {
        self.reads.is_idle() && self.writes.is_idle()
    }
}

// ---------------------------------------------------------------------------
// Kernel operations
// ---------------------------------------------------------------------------

impl Kernel {
    /// Queue a read of `min_len..=max_len` bytes for `strand`.
    pub(crate) fn read(
        &mut self,
        strand: StrandId,
        stream: Rc<dyn Stream>,
        min_len: usize,
        max_len: usize,
    ) -> Result<(), StrandError> {
        if max_len == 0 || min_len > max_len {
            return Err(StrandError::InvalidArgument {
                operation: "read",
                reason: format!("need 1 <= max_len and min_len <= max_len, got {min_len}..={max_len}"),
            });
        }
        let epoch = self.epoch_of(strand);
        let key = StreamKey::of(&stream);
        let queue = self
            .streams
            .entry(key)
            .or_insert_with(|| StreamQueue::new(stream));
        queue.reads.requests.push_back(ReadRequest {
            strand,
            epoch,
            min_len,
            max_len,
            buffer: Vec::new(),
        });
        let armed = queue.reads.token.is_some();
        self.set_terminator(
            strand,
            Terminator::CancelIo {
                key,
                interest: Interest::Read,
            },
        );
        if !armed {
            self.service_stream(key, Interest::Read);
        }
        Ok(())
    }

    /// Queue a write of `data` for `strand`.
    pub(crate) fn write(
        &mut self,
        strand: StrandId,
        stream: Rc<dyn Stream>,
        data: Vec<u8>,
    ) -> Result<(), StrandError> {
        let epoch = self.epoch_of(strand);
        let key = StreamKey::of(&stream);
        let queue = self
            .streams
            .entry(key)
            .or_insert_with(|| StreamQueue::new(stream));
        queue.writes.requests.push_back(WriteRequest {
            strand,
            epoch,
            data,
            written: 0,
        });
        let armed = queue.writes.token.is_some();
        self.set_terminator(
            strand,
            Terminator::CancelIo {
                key,
                interest: Interest::Write,
            },
        );
        if !armed {
            self.service_stream(key, Interest::Write);
        }
        Ok(())
    }

    /// Advance the head of a stream's queue until it blocks or empties.
    pub(crate) fn service_stream(&mut self, key: StreamKey, interest: Interest) {
        loop {
            let registry = &self.registry;
            let Some(queue) = self.streams.get_mut(&key) else {
                return;
            };
            *queue.token_mut(interest) = None;
            let polled = queue.poll(interest, |id, epoch| registry.is_current(id, epoch));

            match polled {
                LanePoll::Complete {
                    strand,
                    epoch,
                    result,
                } => {
                    tracing::trace!(%strand, ?interest, ok = result.is_ok(), "i/o request complete");
                    self.resume_strand(strand, Some(epoch), Action::from(result));
                }
                LanePoll::Blocked => {
                    let source = Rc::clone(&queue.stream);
                    let token = self.watch_stream(source, key, interest);
                    if let Some(queue) = self.streams.get_mut(&key) {
                        *queue.token_mut(interest) = Some(token);
                    }
                    return;
                }
                LanePoll::Empty => {
                    if queue.is_idle() {
                        self.streams.remove(&key);
                    }
                    return;
                }
            }
        }
    }

    /// Terminator for a strand waiting on I/O: drop its request and, if it
    /// was the armed head, hand the stream to the next request.
    pub(crate) fn cancel_io(&mut self, key: StreamKey, interest: Interest, strand: StrandId) {
        let Some(queue) = self.streams.get_mut(&key) else {
            return;
        };
        let removed = match interest {
            Interest::Read => queue.reads.remove(strand),
            Interest::Write => queue.writes.remove(strand),
        };
        match removed {
            Some(Some(token)) => {
                self.cancel_token(token);
                self.service_stream(key, interest);
            }
            Some(None) | None => {
                if queue.is_idle() {
                    self.streams.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_reports_would_block_then_eof() {
        let stream = MemoryStream::new();
        let err = stream.read(4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(!stream.poll_ready(Interest::Read));

        stream.write(b"abc").unwrap();
        assert_eq!(stream.read(2).unwrap(), b"ab");
        stream.close();
        assert_eq!(stream.read(8).unwrap(), b"c");
        assert!(stream.read(8).unwrap().is_empty());
        assert_eq!(
            stream.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn memory_stream_capacity_limits_writes() {
        let stream = MemoryStream::with_capacity(2);
        assert_eq!(stream.write(b"abc").unwrap(), 2);
        assert!(!stream.poll_ready(Interest::Write));
        assert_eq!(
            stream.write(b"c").unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        stream.read(1).unwrap();
        assert!(stream.poll_ready(Interest::Write));
    }

    #[test]
    fn read_request_waits_for_min_len() {
        let stream = MemoryStream::new();
        let mut request = ReadRequest {
            strand: StrandId::new(1),
            epoch: 0,
            min_len: 4,
            max_len: 8,
            buffer: Vec::new(),
        };
        stream.write(b"ab").unwrap();
        assert!(request.advance(&stream).is_none());
        stream.write(b"cd").unwrap();
        assert_eq!(
            request.advance(&stream),
            Some(Ok(Value::Bytes(b"abcd".to_vec())))
        );
    }

    #[test]
    fn read_request_resolves_short_at_eof() {
        let stream = MemoryStream::new();
        stream.write(b"z").unwrap();
        stream.close();
        let mut request = ReadRequest {
            strand: StrandId::new(1),
            epoch: 0,
            min_len: 4,
            max_len: 8,
            buffer: Vec::new(),
        };
        assert_eq!(request.advance(&stream), Some(Ok(Value::Bytes(b"z".to_vec()))));
    }

    #[test]
    fn write_request_resumes_after_backpressure() {
        let stream = MemoryStream::with_capacity(2);
        let mut request = WriteRequest {
            strand: StrandId::new(1),
            epoch: 0,
            data: b"abcd".to_vec(),
            written: 0,
        };
        assert!(request.advance(&stream).is_none());
        assert_eq!(request.written, 2);
        stream.read(2).unwrap();
        assert_eq!(request.advance(&stream), Some(Ok(Value::Int(4))));
    }

    #[test]
    fn lane_skips_stale_heads_and_keeps_fifo() {
        let stream = MemoryStream::new();
        stream.write(b"xy").unwrap();
        let mut lane = Lane::new();
        for (id, epoch) in [(1, 0), (2, 0)] {
            lane.requests.push_back(ReadRequest {
                strand: StrandId::new(id),
                epoch,
                min_len: 1,
                max_len: 1,
                buffer: Vec::new(),
            });
        }
        let stale = StrandId::new(1);
        match lane.poll(&stream, |id, _| id != stale) {
            LanePoll::Complete { strand, result, .. } => {
                assert_eq!(strand, StrandId::new(2));
                assert_eq!(result, Ok(Value::Bytes(b"x".to_vec())));
            }
            _ => panic!("expected the second request to complete"),
        }
        assert!(matches!(lane.poll(&stream, |_, _| true), LanePoll::Empty));
    }
}
