//! End-to-end scenarios over the public API

use std::sync::Arc;
use std::thread;

use chrono::{NaiveDate, NaiveTime};

use icsforms::codec::{self, CodecError, DesOptions};
use icsforms::fields::{FieldValue, GroupRow, RuleKind};
use icsforms::schema::{ics, SchemaCatalog};
use icsforms::session::TrackerError;
use icsforms::version::{CommitMode, Incoming, VersionError, VersionStatus, VersionStore};

fn store() -> VersionStore {
    VersionStore::new(Arc::new(SchemaCatalog::standard().unwrap()))
}

#[test]
fn test_general_message_scenario() {
    let store = store();
    let catalog = store.catalog().clone();

    let mut session = store.new_form(ics::ICS_213).unwrap();
    session.apply("to", FieldValue::text("Ops")).unwrap();
    session.apply("from", FieldValue::text("Planning")).unwrap();
    session.apply("subject", FieldValue::text("Resupply")).unwrap();
    let v1 = store.commit(&mut session, CommitMode::Strict, "planning").unwrap();
    assert_eq!(v1.version_id(), 1);
    assert_eq!(v1.parent_version_id(), None);

    let mut session = store.begin_edit(v1.form_id()).unwrap();
    session.apply("subject", FieldValue::text("Resupply Urgent")).unwrap();
    let v2 = store.commit(&mut session, CommitMode::Strict, "planning").unwrap();
    assert_eq!(v2.version_id(), 2);
    assert_eq!(v2.parent_version_id(), Some(1));

    let instance = store.form(v1.form_id()).unwrap();
    let text = codec::delta::encode(&v1, &v2, &*instance, &catalog, &DesOptions::default()).unwrap();
    let body: Vec<&str> = text
        .lines()
        .skip(1)
        .filter(|line| !line.starts_with("CKSUM="))
        .collect();
    assert_eq!(body, vec!["SU=Resupply Urgent"]);

    let delta = codec::delta::decode(&text, &catalog).unwrap();
    let rebuilt = codec::delta::apply(&delta, &v1).unwrap();
    assert_eq!(&rebuilt, v2.fields());

    assert_eq!(store.status(v1.form_id(), 1).unwrap(), VersionStatus::Superseded);
    assert_eq!(store.status(v1.form_id(), 2).unwrap(), VersionStatus::Current);
}

#[test]
fn test_corrupted_checksum_leaves_store_untouched() {
    let sender = store();
    let mut session = sender.new_form(ics::ICS_213).unwrap();
    session.apply("to", FieldValue::text("Ops")).unwrap();
    session.apply("from", FieldValue::text("Planning")).unwrap();
    session.apply("subject", FieldValue::text("Resupply")).unwrap();
    let v1 = sender.commit(&mut session, CommitMode::Strict, "planning").unwrap();

    let receiver = store();
    let original = receiver
        .receive(Incoming::from_version(&v1), "radio")
        .unwrap();

    let text = codec::des::encode(&v1, receiver.catalog(), &DesOptions::default()).unwrap();
    let checksum_at = text.rfind("CKSUM=").unwrap() + "CKSUM=".len();
    let mut corrupted = text.clone();
    let digit = if &text[checksum_at..checksum_at + 1] == "0" { "1" } else { "0" };
    corrupted.replace_range(checksum_at..checksum_at + 1, digit);

    let err = codec::des::decode(&corrupted, receiver.catalog()).unwrap_err();
    assert!(matches!(err, CodecError::ChecksumMismatch { .. }));
    assert!(err.is_retransmittable());

    let history = receiver.history(v1.form_id()).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(receiver.latest(v1.form_id()).unwrap(), original);
}

#[test]
fn test_validation_blocks_strict_commit() {
    let store = store();
    let mut session = store.new_form(ics::ICS_214).unwrap();
    session.apply("incident_name", FieldValue::text("Ridge Fire")).unwrap();
    session.apply("name", FieldValue::text("J. Ortiz")).unwrap();
    session
        .apply("op_start_date", FieldValue::Date(NaiveDate::from_ymd_opt(2024, 8, 2).unwrap()))
        .unwrap();
    session
        .apply("op_start_time", FieldValue::Time(NaiveTime::from_hms_opt(6, 0, 0).unwrap()))
        .unwrap();
    session
        .apply("op_end_date", FieldValue::Date(NaiveDate::from_ymd_opt(2024, 8, 1).unwrap()))
        .unwrap();
    session
        .apply("op_end_time", FieldValue::Time(NaiveTime::from_hms_opt(18, 0, 0).unwrap()))
        .unwrap();

    let mut row = GroupRow::new();
    row.insert(
        "activity_time".into(),
        FieldValue::DateTime(NaiveDate::from_ymd_opt(2024, 8, 2).unwrap().and_hms_opt(7, 15, 0).unwrap()),
    );
    session.apply("activities", FieldValue::Group(vec![row])).unwrap();

    let err = store.commit(&mut session, CommitMode::Strict, "unit").unwrap_err();
    let report = err.violations().expect("violation list");
    assert!(report.has("activity_note", RuleKind::MissingRequired));
    assert!(report.has("op_end_date", RuleKind::CrossFieldInconsistent));
    assert_eq!(report.len(), 2);
    assert!(session.is_dirty());

    let draft = store.commit(&mut session, CommitMode::Draft, "unit").unwrap();
    assert!(draft.is_incomplete());
    assert!(!session.is_dirty());
}

#[test]
fn test_concurrent_commits_one_wins() {
    let store = Arc::new(store());
    let mut seed = store.new_form(ics::ICS_213).unwrap();
    seed.apply("to", FieldValue::text("Ops")).unwrap();
    seed.apply("from", FieldValue::text("Planning")).unwrap();
    seed.apply("subject", FieldValue::text("Resupply")).unwrap();
    let v1 = store.commit(&mut seed, CommitMode::Strict, "planning").unwrap();

    let handles: Vec<_> = ["Water", "Fuel"]
        .into_iter()
        .map(|item| {
            let store = store.clone();
            let mut session = store.begin_edit(v1.form_id()).unwrap();
            session.apply("message", FieldValue::text(item)).unwrap();
            thread::spawn(move || {
                let result = store.commit(&mut session, CommitMode::Strict, item);
                (session, result)
            })
        })
        .collect();

    let mut outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
    assert_eq!(winners, 1);

    let (loser, result) = outcomes
        .iter_mut()
        .find(|(_, r)| r.is_err())
        .unwrap();
    assert!(matches!(
        result,
        Err(VersionError::ConcurrentModification { .. })
    ));

    loser.rebase(store.latest(v1.form_id()).unwrap()).unwrap();
    let v3 = store.commit(loser, CommitMode::Strict, "retry").unwrap();
    assert_eq!(v3.version_id(), 3);
    assert_eq!(v3.parent_version_id(), Some(2));
}

#[test]
fn test_rebase_after_commit_keeps_other_writer() {
    let store = store();
    let mut ours = store.new_form(ics::ICS_213).unwrap();
    ours.apply("to", FieldValue::text("Ops")).unwrap();
    ours.apply("from", FieldValue::text("Planning")).unwrap();
    ours.apply("subject", FieldValue::text("Resupply")).unwrap();
    let v1 = store.commit(&mut ours, CommitMode::Strict, "planning").unwrap();

    let mut theirs = store.begin_edit(v1.form_id()).unwrap();
    theirs.apply("subject", FieldValue::text("Evacuate")).unwrap();
    let v2 = store.commit(&mut theirs, CommitMode::Strict, "ops").unwrap();

    ours.apply("message", FieldValue::text("Road 4 closed")).unwrap();
    assert!(matches!(
        store.commit(&mut ours, CommitMode::Strict, "planning"),
        Err(VersionError::ConcurrentModification { .. })
    ));
    ours.rebase(v2.clone()).unwrap();
    let v3 = store.commit(&mut ours, CommitMode::Strict, "planning").unwrap();

    assert_eq!(v3.parent_version_id(), Some(2));
    assert_eq!(v3.field("subject"), Some(&FieldValue::text("Evacuate")));
    assert_eq!(v3.field("message"), Some(&FieldValue::text("Road 4 closed")));
    assert_eq!(store.status(v1.form_id(), 2).unwrap(), VersionStatus::Superseded);
}

#[test]
fn test_undo_redo_through_session() {
    let store = store();
    let mut session = store.new_form(ics::ICS_213).unwrap();
    assert_eq!(session.undo().unwrap_err(), TrackerError::NothingToUndo);

    session.apply("to", FieldValue::text("Ops")).unwrap();
    session.apply("to", FieldValue::text("Logistics")).unwrap();
    session.clear("to").unwrap();
    assert!(!session.get("to").unwrap().is_set());

    session.undo().unwrap();
    assert_eq!(session.get("to").unwrap().value(), Some(&FieldValue::text("Logistics")));
    session.undo().unwrap();
    session.undo().unwrap();
    assert!(!session.is_dirty());
    assert!(session.undo().unwrap_err().is_benign());

    session.redo().unwrap();
    assert_eq!(session.get("to").unwrap().value(), Some(&FieldValue::text("Ops")));
    assert_eq!(session.tracker().history().len(), 3);

    // Priority reports its default while unset.
    let priority = session.get("priority").unwrap();
    assert!(!priority.is_set());
    assert_eq!(priority.value(), Some(&FieldValue::enum_tag("ROUTINE")));
}

#[test]
fn test_radio_plan_over_des() {
    let store = store();
    let mut session = store.new_form(ics::ICS_205).unwrap();
    session.apply("incident_name", FieldValue::text("Ridge Fire")).unwrap();

    let mut command = GroupRow::new();
    command.insert("channel_number".into(), FieldValue::number(1.0));
    command.insert("function".into(), FieldValue::text("Command"));
    command.insert("rx_freq".into(), FieldValue::number(151.265));
    command.insert("tx_freq".into(), FieldValue::number(159.3));
    command.insert("mode".into(), FieldValue::enum_tag("A"));
    let mut tactical = GroupRow::new();
    tactical.insert("channel_number".into(), FieldValue::number(2.0));
    tactical.insert("function".into(), FieldValue::text("Tac 1 = Div A | B"));
    session
        .apply("channels", FieldValue::Group(vec![command, tactical]))
        .unwrap();
    let v1 = store.commit(&mut session, CommitMode::Strict, "coml").unwrap();

    let text = codec::des::encode(&v1, store.catalog(), &DesOptions::piped()).unwrap();
    assert_eq!(text.lines().count(), 1);
    let form = codec::des::decode(&text, store.catalog()).unwrap();
    assert_eq!(&form.fields, v1.fields());

    let receiver = self::store();
    let received = receiver
        .receive(
            Incoming {
                form_id: v1.form_id(),
                form_type: form.form_type,
                fields: form.fields,
                ..Default::default()
            },
            "radio",
        )
        .unwrap();
    assert!(!received.is_incomplete());
}

#[test]
fn test_unknown_code_requests_retransmission() {
    let catalog = SchemaCatalog::standard().unwrap();
    let store = store();
    let mut session = store.new_form(ics::ICS_213).unwrap();
    session.apply("to", FieldValue::text("Ops")).unwrap();
    let v1 = store.commit(&mut session, CommitMode::Draft, "ops").unwrap();

    // Re-frame the payload with a token the catalog does not know.
    let text = codec::des::encode(&v1, &catalog, &DesOptions::default()).unwrap();
    let mut tokens: Vec<String> = text.lines().map(str::to_string).collect();
    tokens.pop();
    tokens.push("QQ=1".into());
    let sum = tokens
        .join("|")
        .bytes()
        .fold(0u8, |acc, b| acc.wrapping_add(b));
    tokens.push(format!("CKSUM={:02X}", sum));

    let err = codec::des::decode(&tokens.join("\n"), &catalog).unwrap_err();
    assert_eq!(err, CodecError::UnknownFieldCode("QQ".into()));
    assert!(err.is_retransmittable());
}
