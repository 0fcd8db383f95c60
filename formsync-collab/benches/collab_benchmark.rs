use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use formsync_collab::mutations;
use formsync_collab::presence::{AwarenessMessage, PresenceRoom, PresenceState};
use formsync_collab::protocol::SyncMessage;
use formsync_collab::{FormSession, SessionConfig};
use formsync_core::{FieldType, FieldUpdate, FormDocument};
use std::hint::black_box;
use uuid::Uuid;

fn bench_delta_codec(c: &mut Criterion) {
    let peer = Uuid::new_v4();
    let delta = vec![0u8; 64]; // Typical single-field edit

    c.bench_function("delta_encode_64B", |b| {
        b.iter(|| {
            let msg = SyncMessage::delta(black_box(peer), "form", black_box(1), black_box(delta.clone()));
            black_box(msg.encode().unwrap());
        })
    });

    let encoded = SyncMessage::delta(peer, "form", 1, delta.clone()).encode().unwrap();
    c.bench_function("delta_decode_64B", |b| {
        b.iter(|| black_box(SyncMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_awareness(c: &mut Criterion) {
    let state = PresenceState::new("user-1", "Alice")
        .with_email(Some("alice@example.com".into()))
        .with_focus(Some("page-1".into()), Some("field-1".into()));
    let message = AwarenessMessage::Announce(state);

    c.bench_function("awareness_encode", |b| {
        b.iter(|| black_box(message.encode().unwrap()))
    });

    let mut group = c.benchmark_group("Presence");
    for peers in [10usize, 100] {
        let mut room = PresenceRoom::new(Some("me".into()));
        for i in 0..peers {
            let state = PresenceState::new(format!("user-{i}"), format!("User {i}"));
            room.handle_message(Uuid::new_v4(), &AwarenessMessage::Announce(state));
        }
        group.throughput(Throughput::Elements(peers as u64));
        group.bench_function(format!("collaborators_{peers}"), |b| {
            b.iter(|| black_box(room.collaborators()))
        });
    }
    group.finish();
}

fn page_with_fields(fields: usize) -> (FormSession, String) {
    let mut session = FormSession::new(SessionConfig::default());
    session.open_offline("bench", None).unwrap();
    session.add_empty_page();
    let page_id = session.snapshot().pages[0].id.clone();
    for _ in 0..fields {
        session.add_field(&page_id, FieldType::TextInput, &FieldUpdate::new());
    }
    (session, page_id)
}

fn bench_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("Edits");

    group.bench_function("plan_and_apply_add_field", |b| {
        let document = FormDocument::new();
        {
            let mut txn = document.transact_mut_with("bench");
            document.ensure_structure(&mut txn);
        }
        let plan = mutations::add_empty_page(&document).unwrap();
        {
            let mut txn = document.transact_mut_with("bench");
            mutations::apply_all(&mut txn, &document, &plan.edits);
        }
        let page_id = plan.created.unwrap();

        b.iter(|| {
            let plan = mutations::add_field(&document, &page_id, FieldType::Number, &FieldUpdate::new()).unwrap();
            let mut txn = document.transact_mut_with("bench");
            black_box(mutations::apply_all(&mut txn, &document, &plan.edits));
        })
    });

    for fields in [10usize, 50] {
        group.bench_function(format!("session_reorder_{fields}_fields"), |b| {
            b.iter_batched(
                || page_with_fields(fields),
                |(mut session, page_id)| {
                    black_box(session.reorder_fields(&page_id, 0, fields - 1));
                    session
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_delta_codec, bench_awareness, bench_edits);
criterion_main!(benches);
