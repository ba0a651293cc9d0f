use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Aggregate, DesignSession, DomainEvent, FulfillmentStatus, Money, NewOrder, OrderItem,
    OrderService, PaymentStatus, PriceBreakdown, SessionEvent, ShippingAddress, Stage, StyleHints,
    customer_status,
};
use event_store::{EventEnvelope, InMemoryEventStore, Version};

fn make_envelope(aggregate_id: AggregateId, version: i64, event: &SessionEvent) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("DesignSession")
        .event_type(event.event_type())
        .version(Version::new(version))
        .payload(event)
        .unwrap()
        .build()
        .unwrap()
}

/// Events of a session that ran the whole pipeline, with progress reports
/// in every stage.
fn full_session_history(session_id: AggregateId) -> Vec<SessionEvent> {
    let mut session = DesignSession::default();
    let mut history = Vec::new();

    let events = session
        .create(
            session_id,
            None,
            "blue wave pattern",
            StyleHints::new(["minimal"]),
            "en-US",
        )
        .unwrap();
    session.apply_events(events.clone());
    history.extend(events);

    let events = session.start_generation("job-bench").unwrap();
    session.apply_events(events.clone());
    history.extend(events);

    while let Some(next) = session.stage().next() {
        let stage = session.stage();
        for step in 1..=5u8 {
            let progress = stage.baseline() + step;
            let events = session.report_progress(stage, progress, "working").unwrap();
            session.apply_events(events.clone());
            history.extend(events);
        }
        let events = session.advance(stage, next, 0, "next").unwrap();
        session.apply_events(events.clone());
        history.extend(events);
    }

    history
}

fn bench_session_replay(c: &mut Criterion) {
    let session_id = AggregateId::new();
    let history = full_session_history(session_id);

    c.bench_function("domain/session_replay_fold", |b| {
        b.iter(|| {
            let mut session = DesignSession::default();
            session.apply_events(history.iter().cloned());
            assert_eq!(session.stage(), Stage::Ready);
        });
    });

    let envelopes: Vec<EventEnvelope> = history
        .iter()
        .enumerate()
        .map(|(i, e)| make_envelope(session_id, i as i64 + 1, e))
        .collect();

    c.bench_function("domain/session_replay_decode", |b| {
        b.iter(|| {
            let mut session = DesignSession::default();
            for envelope in &envelopes {
                let event: SessionEvent = envelope.decode().unwrap();
                session.apply(event);
                session.set_version(envelope.version);
            }
            assert_eq!(session.progress(), 100);
        });
    });
}

fn bench_order_create(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let lines = vec![OrderItem::new("tee-black-m", 2, Money::from_minor(2500))];
    let breakdown = PriceBreakdown::compute(
        &lines,
        Money::from_minor(500),
        Money::from_minor(300),
        Money::zero(),
        "USD",
    )
    .unwrap();
    let address = ShippingAddress {
        name: "Ada".to_string(),
        line1: "1 Loop Rd".to_string(),
        city: "Springfield".to_string(),
        postal_code: "12345".to_string(),
        country: "US".to_string(),
        ..Default::default()
    };

    c.bench_function("domain/create_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                let service = OrderService::new(InMemoryEventStore::new());
                let new_order = NewOrder {
                    owner: None,
                    session_id: None,
                    payment_ref: "pi_bench".to_string(),
                    items: lines.clone(),
                    breakdown: breakdown.clone(),
                    shipping_address: address.clone(),
                };
                let result = service
                    .create_order(AggregateId::new(), new_order)
                    .await
                    .unwrap();
                assert!(result.aggregate.needs_submission());
            });
        });
    });
}

fn bench_customer_status(c: &mut Criterion) {
    let payments = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Paid,
        PaymentStatus::PartiallyRefunded,
        PaymentStatus::Refunded,
        PaymentStatus::Failed,
    ];
    let fulfillments = [
        FulfillmentStatus::Unsubmitted,
        FulfillmentStatus::Submitted,
        FulfillmentStatus::InProduction,
        FulfillmentStatus::Shipped,
        FulfillmentStatus::Delivered,
        FulfillmentStatus::Failed,
        FulfillmentStatus::Canceled,
    ];

    c.bench_function("domain/customer_status_all_pairs", |b| {
        b.iter(|| {
            let mut count = 0usize;
            for p in payments {
                for f in fulfillments {
                    count += customer_status(p, f).message().len();
                }
            }
            count
        });
    });
}

criterion_group!(
    benches,
    bench_session_replay,
    bench_order_create,
    bench_customer_status
);
criterion_main!(benches);
