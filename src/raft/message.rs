use super::{Index, NodeID, Term};

use serde_derive::{Deserialize, Serialize};

/// The broadcast address. Also used as the leader field when the sender does
/// not know of a leader.
pub const BROADCAST: &str = "FFFF";

/// A message passed between replicas, or between a client and a replica. Each
/// datagram carries exactly one envelope as a single JSON object, with the
/// payload fields flattened alongside the addressing fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The sender.
    pub src: NodeID,
    /// The recipient, or the broadcast address.
    pub dst: NodeID,
    /// The sender's assumed leader, or the broadcast address if unknown.
    pub leader: NodeID,
    /// The message payload.
    #[serde(flatten)]
    pub message: Message,
}

/// A message payload, tagged by the wire-level `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Sent once to the broadcast address when a replica starts up.
    #[serde(rename = "hello")]
    Hello,

    /// A client read of a single key.
    #[serde(rename = "get")]
    Get {
        key: String,
        #[serde(rename = "MID")]
        mid: String,
    },

    /// A client write of a single key.
    #[serde(rename = "put")]
    Put {
        key: String,
        value: String,
        #[serde(rename = "MID")]
        mid: String,
    },

    /// A successful client response. Carries the value for gets only.
    #[serde(rename = "ok")]
    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    /// Tells a client to retry its request at the leader given in the
    /// envelope's leader field.
    #[serde(rename = "redirect")]
    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },

    /// A failed client response. Part of the protocol, but never emitted by
    /// this core; clients rely on redirects and timeouts.
    #[serde(rename = "fail")]
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },

    /// Candidates solicit votes from all peers when campaigning.
    #[serde(rename = "vote")]
    Vote {
        term: Term,
        #[serde(rename = "candidateId")]
        candidate_id: NodeID,
        /// The index of the candidate's last log entry, or -1 if its log is
        /// empty.
        #[serde(rename = "lastLogIndex")]
        last_log_index: Index,
        /// The term of the candidate's last log entry, or the candidate's
        /// current term if its log is empty.
        #[serde(rename = "lastLogTerm")]
        last_log_term: Term,
    },

    /// A vote request response.
    #[serde(rename = "vote ack")]
    VoteAck {
        term: Term,
        #[serde(rename = "voteGranted")]
        granted: bool,
    },

    /// Leaders replicate log entries to a peer, and assert leadership via
    /// empty-entry heartbeats.
    #[serde(rename = "append")]
    Append {
        term: Term,
        /// The index of the entry immediately preceding the sent entries, or
        /// -1 when replicating from the start of the log.
        prev_log_index: Index,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: Index,
    },

    /// A peer's response to an append.
    #[serde(rename = "ack")]
    Ack {
        term: Term,
        success: bool,
        /// The peer's last log index after processing the append.
        confirmed_index: Index,
    },
}

/// A replicated log entry: a single client write, stamped with the term of
/// the leader that accepted it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub key: String,
    pub value: String,
    /// The client-assigned request id, answered when the entry commits.
    #[serde(rename = "MID")]
    pub mid: String,
    /// The client to answer.
    pub putter: NodeID,
}

impl LogEntry {
    /// Whether two entries are the same for divergence checks. The request id
    /// and client are bookkeeping and don't participate.
    pub fn matches(&self, other: &LogEntry) -> bool {
        self.term == other.term && self.key == other.key && self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entry(term: Term, key: &str, value: &str) -> LogEntry {
        LogEntry {
            term,
            key: key.into(),
            value: value.into(),
            mid: "M1".into(),
            putter: "C1".into(),
        }
    }

    #[test]
    fn put_wire_format() {
        let env = Envelope {
            src: "C1".into(),
            dst: "0000".into(),
            leader: BROADCAST.into(),
            message: Message::Put { key: "x".into(), value: "1".into(), mid: "M1".into() },
        };
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({
                "src": "C1",
                "dst": "0000",
                "leader": "FFFF",
                "type": "put",
                "key": "x",
                "value": "1",
                "MID": "M1",
            })
        );
    }

    #[test]
    fn vote_wire_format() {
        let env = Envelope {
            src: "0001".into(),
            dst: BROADCAST.into(),
            leader: BROADCAST.into(),
            message: Message::Vote {
                term: 3,
                candidate_id: "0001".into(),
                last_log_index: -1,
                last_log_term: 3,
            },
        };
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({
                "src": "0001",
                "dst": "FFFF",
                "leader": "FFFF",
                "type": "vote",
                "term": 3,
                "candidateId": "0001",
                "lastLogIndex": -1,
                "lastLogTerm": 3,
            })
        );
    }

    #[test]
    fn vote_ack_type_tag_contains_space() {
        let env = Envelope {
            src: "0002".into(),
            dst: "0001".into(),
            leader: BROADCAST.into(),
            message: Message::VoteAck { term: 3, granted: true },
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "vote ack");
        assert_eq!(value["voteGranted"], true);
    }

    #[test]
    fn ok_omits_value_for_puts() {
        let put_ok = Message::Ok { mid: "M1".into(), value: None };
        assert_eq!(serde_json::to_value(&put_ok).unwrap(), json!({"type": "ok", "MID": "M1"}));

        let get_ok = Message::Ok { mid: "M2".into(), value: Some("".into()) };
        assert_eq!(
            serde_json::to_value(&get_ok).unwrap(),
            json!({"type": "ok", "MID": "M2", "value": ""})
        );
    }

    #[test]
    fn append_round_trip() {
        let env = Envelope {
            src: "0001".into(),
            dst: "0002".into(),
            leader: "0001".into(),
            message: Message::Append {
                term: 2,
                prev_log_index: -1,
                prev_log_term: 2,
                entries: vec![entry(2, "x", "1")],
                leader_commit: -1,
            },
        };
        let data = serde_json::to_vec(&env).unwrap();
        assert_eq!(serde_json::from_slice::<Envelope>(&data).unwrap(), env);
    }

    #[test]
    fn parses_client_datagram() {
        let data = r#"{"src":"C7","dst":"0000","leader":"FFFF","type":"get","key":"x","MID":"M9"}"#;
        assert_eq!(
            serde_json::from_str::<Envelope>(data).unwrap(),
            Envelope {
                src: "C7".into(),
                dst: "0000".into(),
                leader: BROADCAST.into(),
                message: Message::Get { key: "x".into(), mid: "M9".into() },
            }
        );
    }

    #[test]
    fn entry_matches_ignores_bookkeeping() {
        let a = entry(1, "x", "1");
        let mut b = a.clone();
        b.mid = "M2".into();
        b.putter = "C2".into();
        assert!(a.matches(&b));

        let mut c = a.clone();
        c.term = 2;
        assert!(!a.matches(&c));

        let mut d = a.clone();
        d.value = "2".into();
        assert!(!a.matches(&d));
    }
}
