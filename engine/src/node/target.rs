//! Target-side connection state: a FIFO of messages awaiting
//! socket-write completion (`send_data`), a FIFO of messages awaiting a
//! response (`sent_data`), and the response message currently being
//! assembled (`msg_rcv`). Invariant: messages dequeue from `send_data`
//! in enqueue order, and when replies are enabled a response always
//! matches the head of `sent_data`.
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::buffer::msg::Msg;
use crate::ids::TargetId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

pub struct TargetNode {
    pub id: TargetId,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub noreply: bool,
    pub send_data: VecDeque<Msg>,
    pub sent_data: VecDeque<Msg>,
    pub msg_rcv: Option<Msg>,
    /// Bytes of `send_data`'s head message already written to the
    /// socket, so a `WouldBlock` mid-write resumes instead of
    /// re-sending the prefix already on the wire.
    pub send_progress: usize,
    /// Set for an `RDBFILE` target: a bare file sink rather than a live
    /// connection. `addr` is unused for these nodes.
    pub file_sink: Option<PathBuf>,
}

impl TargetNode {
    pub fn new(id: TargetId, addr: SocketAddr, noreply: bool) -> Self {
        TargetNode {
            id,
            addr,
            state: ConnectionState::Closed,
            noreply,
            send_data: VecDeque::new(),
            sent_data: VecDeque::new(),
            msg_rcv: None,
            send_progress: 0,
            file_sink: None,
        }
    }

    /// Builds a target that dumps RESP straight to a file descriptor
    /// instead of a live `TcpStream`.
    pub fn new_file(id: TargetId, path: PathBuf, noreply: bool) -> Self {
        let mut node = TargetNode::new(id, "0.0.0.0:0".parse().unwrap(), noreply);
        node.file_sink = Some(path);
        node
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn mark_open(&mut self) {
        self.state = ConnectionState::Open;
    }

    /// Enqueues a message for delivery; when replies are not expected the
    /// message never transits `sent_data` — see `complete_send`.
    pub fn enqueue_send(&mut self, msg: Msg) {
        self.send_data.push_back(msg);
    }

    /// Moves the head of `send_data` into `sent_data` once fully written,
    /// unless `noreply`, in which case it is dropped immediately and
    /// `sent_data` must remain empty.
    pub fn complete_send(&mut self) -> Option<Msg> {
        let msg = self.send_data.pop_front()?;
        self.send_progress = 0;
        if self.noreply {
            assert!(
                self.sent_data.is_empty(),
                "sent_data must stay empty in noreply mode"
            );
            None
        } else {
            self.sent_data.push_back(msg);
            None
        }
    }

    /// Pops the request awaiting a response, enforcing FIFO pairing.
    pub fn pop_matching_request(&mut self) -> Option<Msg> {
        self.sent_data.pop_front()
    }

    /// Socket error: close, and drain+release in-flight replied requests
    /// (they can never be matched now); `send_data` is retained so the
    /// reconnect cron can resend it.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Closed;
        self.sent_data.clear();
        self.msg_rcv = None;
        self.send_progress = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::msg::MsgDirection;
    use crate::ids::MsgId;

    fn addr() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    #[test]
    fn completed_sends_move_to_sent_data_when_replies_enabled() {
        let mut t = TargetNode::new(TargetId(1), addr(), false);
        t.enqueue_send(Msg::new(MsgId(1), MsgDirection::Request));
        t.complete_send();
        assert_eq!(t.send_data.len(), 0);
        assert_eq!(t.sent_data.len(), 1);
    }

    #[test]
    fn noreply_target_never_populates_sent_data() {
        let mut t = TargetNode::new(TargetId(1), addr(), true);
        t.enqueue_send(Msg::new(MsgId(1), MsgDirection::Request));
        t.complete_send();
        assert!(t.sent_data.is_empty());
    }

    #[test]
    fn disconnect_drains_sent_data_but_keeps_send_data() {
        let mut t = TargetNode::new(TargetId(1), addr(), false);
        t.enqueue_send(Msg::new(MsgId(1), MsgDirection::Request));
        t.enqueue_send(Msg::new(MsgId(2), MsgDirection::Request));
        t.complete_send();
        assert_eq!(t.sent_data.len(), 1);
        assert_eq!(t.send_data.len(), 1);
        t.disconnect();
        assert_eq!(t.sent_data.len(), 0);
        assert_eq!(t.send_data.len(), 1);
    }

    #[test]
    fn requests_pop_in_fifo_order() {
        let mut t = TargetNode::new(TargetId(1), addr(), false);
        t.enqueue_send(Msg::new(MsgId(1), MsgDirection::Request));
        t.enqueue_send(Msg::new(MsgId(2), MsgDirection::Request));
        t.complete_send();
        t.complete_send();
        assert_eq!(t.pop_matching_request().unwrap().id, MsgId(1));
        assert_eq!(t.pop_matching_request().unwrap().id, MsgId(2));
    }
}
