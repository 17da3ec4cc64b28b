use anyhow::Result;

use crate::error::StableError;
use crate::fixtures;
use crate::record::AffinityRecord;
use crate::ANNOTATION_STATEFULSET_STABLE_RECORD;

#[test]
fn decode_absent_annotation_yields_empty_record() -> Result<()> {
    let record = AffinityRecord::decode(&fixtures::statefulset(None))?;
    assert!(record.records.is_empty(), "expected empty record, got {:?}", record);
    Ok(())
}

#[test]
fn decode_empty_and_null_values_yield_empty_record() -> Result<()> {
    for raw in ["", "  ", "null", "{}", r#"{"Records":null}"#] {
        let record = AffinityRecord::decode(&fixtures::statefulset(Some(raw)))?;
        assert!(record.records.is_empty(), "expected empty record for {:?}, got {:?}", raw, record);
    }
    Ok(())
}

#[test]
fn decode_existing_record() -> Result<()> {
    let record = AffinityRecord::decode(&fixtures::statefulset(Some(r#"{"Records":{"web-0":"node1","web-1":"node2"}}"#)))?;
    assert_eq!(record.records.len(), 2, "expected 2 entries, got {}", record.records.len());
    assert_eq!(record.node_for("web-0"), Some("node1"));
    assert_eq!(record.node_for("web-1"), Some("node2"));
    assert_eq!(record.node_for("web-2"), None);
    Ok(())
}

#[test]
fn decode_malformed_record_is_an_error() {
    for raw in ["not json", r#"{"Records":{"web-0":1}}"#, r#"{"Records":["web-0"]}"#] {
        let res = AffinityRecord::decode(&fixtures::statefulset(Some(raw)));
        assert!(matches!(res, Err(StableError::MalformedRecord(_))), "expected malformed record error for {:?}, got {:?}", raw, res);
    }
}

#[test]
fn encode_uses_capitalized_records_field() -> Result<()> {
    let mut record = AffinityRecord::default();
    assert!(record.insert_if_absent("web-1", "node2"), "expected insert into empty record to change it");
    assert!(record.insert_if_absent("web-0", "node1"), "expected insert of new replica to change record");
    let encoded = record.encode()?;
    assert_eq!(encoded, r#"{"Records":{"web-0":"node1","web-1":"node2"}}"#);
    Ok(())
}

#[test]
fn insert_if_absent_never_overwrites() {
    let mut record = AffinityRecord::default();
    assert!(record.insert_if_absent("web-0", "node1"));
    assert!(!record.insert_if_absent("web-0", "node2"), "expected existing entry to be kept");
    assert_eq!(record.node_for("web-0"), Some("node1"));
}

#[test]
fn apply_to_preserves_other_annotations() -> Result<()> {
    let mut sts = fixtures::statefulset(None);
    sts.metadata.annotations = Some([("other".to_string(), "value".to_string())].into_iter().collect());
    let mut record = AffinityRecord::default();
    record.insert_if_absent("web-0", "node1");
    record.apply_to(&mut sts)?;

    let annotations = sts.metadata.annotations.unwrap_or_default();
    assert_eq!(annotations.get("other").map(String::as_str), Some("value"));
    assert_eq!(
        annotations.get(ANNOTATION_STATEFULSET_STABLE_RECORD).map(String::as_str),
        Some(r#"{"Records":{"web-0":"node1"}}"#)
    );
    Ok(())
}
