//! Tests for record framing.

use claude_stream_host::cli::{classify, AgentEvent, LineFramer, RecordReader};
use tokio_test::io::Builder;

const TRANSCRIPT: &str = concat!(
    r#"{"type":"system","subtype":"init","session_id":"s1","tools":[]}"#,
    "\n",
    r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"héllo "}}}"#,
    "\n",
    "diagnostic: not a protocol line\n",
    r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"wörld"}}}"#,
    "\n",
    r#"{"type":"result","subtype":"success","is_error":false,"session_id":"s1","result":"héllo wörld"}"#,
    "\n",
);

fn frame_in_chunks(bytes: &[u8], chunk_size: usize) -> Vec<String> {
    let mut framer = LineFramer::new();
    let mut records = Vec::new();
    for chunk in bytes.chunks(chunk_size) {
        records.extend(framer.feed(chunk));
    }
    assert!(framer.pending().is_empty());
    records
}

#[test]
fn framing_is_independent_of_chunk_boundaries() {
    let whole = frame_in_chunks(TRANSCRIPT.as_bytes(), TRANSCRIPT.len());
    assert_eq!(whole.len(), 5);

    // Sizes of 1 and 3 split the multi-byte characters.
    for size in [1, 2, 3, 7, 64] {
        assert_eq!(frame_in_chunks(TRANSCRIPT.as_bytes(), size), whole, "chunk size {size}");
    }
}

#[test]
fn framer_holds_fragment_until_newline() {
    let mut framer = LineFramer::new();

    assert!(framer.feed(b"{\"type\":").is_empty());
    assert_eq!(framer.pending(), b"{\"type\":");

    let records = framer.feed(b"\"x\"}\n{\"ne");
    assert_eq!(records, vec![r#"{"type":"x"}"#.to_string()]);
    assert_eq!(framer.pending(), b"{\"ne");
}

#[test]
fn framer_discards_unterminated_remainder() {
    let mut framer = LineFramer::new();
    framer.feed(b"partial");
    assert_eq!(framer.discard_remainder(), 7);
    assert!(framer.pending().is_empty());
    assert_eq!(framer.discard_remainder(), 0);
}

#[test]
fn framed_transcript_classifies_into_turn() {
    let events: Vec<AgentEvent> = frame_in_chunks(TRANSCRIPT.as_bytes(), 5)
        .iter()
        .filter_map(|record| classify(record).ok())
        .collect();

    assert_eq!(events.len(), 4);
    assert_eq!(events[0].session_id(), Some("s1"));
    assert!(matches!(&events[1], AgentEvent::TextDelta { text } if text == "héllo "));
    assert!(matches!(&events[2], AgentEvent::TextDelta { text } if text == "wörld"));
    assert!(events[3].is_terminal());
}

#[tokio::test]
async fn record_reader_reassembles_split_reads() {
    let mock = Builder::new()
        .read(b"{\"type\":\"system\",\"subtype\":\"init\",")
        .read(b"\"session_id\":\"s1\"}\nnoise\n")
        .read(b"trailing without newline")
        .build();
    let mut reader = RecordReader::new(mock);

    let first = tokio_test::assert_ok!(reader.next_chunk().await).unwrap();
    assert!(first.records.is_empty());
    assert!(!first.bytes.is_empty());

    let second = tokio_test::assert_ok!(reader.next_chunk().await).unwrap();
    assert_eq!(
        second.records,
        vec![
            r#"{"type":"system","subtype":"init","session_id":"s1"}"#.to_string(),
            "noise".to_string(),
        ]
    );

    let third = tokio_test::assert_ok!(reader.next_chunk().await).unwrap();
    assert!(third.records.is_empty());

    assert!(tokio_test::assert_ok!(reader.next_chunk().await).is_none());
}
