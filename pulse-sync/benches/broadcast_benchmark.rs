use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulse_core::{ProposalFields, SharedState};
use pulse_sync::broadcast::BroadcastEngine;
use pulse_sync::protocol::{ClientMessage, ServerMessage};
use pulse_sync::registry::{Connection, ConnectionId, ConnectionRegistry};
use pulse_sync::router::Router;

fn sample_proposal_event() -> ServerMessage {
    let mut state = SharedState::new();
    let proposal = state.add_proposal(ProposalFields {
        title: "Community Garden Project".into(),
        description: "Create a community garden downtown".into(),
        creator_id: "user-abc".into(),
        treasury_phone: "+254712345678".into(),
    });
    ServerMessage::NewProposal(proposal)
}

fn bench_envelope_encode(c: &mut Criterion) {
    let msg = sample_proposal_event();
    c.bench_function("new_proposal_encode", |b| {
        b.iter(|| black_box(black_box(&msg).to_frame().unwrap()))
    });
}

fn bench_command_parse(c: &mut Criterion) {
    let text = ClientMessage::AddVote {
        proposal_id: "proposal-1-abcdef0".into(),
        in_favor: true,
        user_id: "user-abc".into(),
    }
    .encode()
    .unwrap();

    c.bench_function("add_vote_parse", |b| {
        b.iter(|| black_box(ClientMessage::parse(black_box(&text)).unwrap()))
    });
}

fn bench_fan_out_100(c: &mut Criterion) {
    let engine = BroadcastEngine::new();
    let mut registry = ConnectionRegistry::new();
    let mut receivers = Vec::new();
    for i in 0..100 {
        let (conn, rx) = Connection::channel(ConnectionId(i), 1024);
        registry.register(&format!("user-{i}"), conn);
        receivers.push(rx);
    }
    let msg = sample_proposal_event();

    c.bench_function("broadcast_100_connections", |b| {
        b.iter(|| {
            black_box(engine.broadcast(&registry, &msg));
            for rx in &mut receivers {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

fn bench_router_vote(c: &mut Criterion) {
    let mut router = Router::new();
    let (conn, mut rx) = Connection::channel(ConnectionId(1), 1024);
    router.dispatch(&conn, ClientMessage::RegisterUser { user_id: "user-abc".into() });
    router.dispatch(
        &conn,
        ClientMessage::AddProposal {
            title: "Garden".into(),
            description: "d".into(),
            creator_id: "user-abc".into(),
            treasury_phone: "+254712345678".into(),
        },
    );
    let proposal_id = router.state().proposals()[0].id.clone();

    c.bench_function("router_add_vote", |b| {
        let mut in_favor = false;
        b.iter(|| {
            in_favor = !in_favor;
            black_box(router.dispatch(
                &conn,
                ClientMessage::AddVote {
                    proposal_id: proposal_id.clone(),
                    in_favor,
                    user_id: "user-abc".into(),
                },
            ));
            while rx.try_recv().is_ok() {}
        })
    });
}

criterion_group!(
    benches,
    bench_envelope_encode,
    bench_command_parse,
    bench_fan_out_100,
    bench_router_vote
);
criterion_main!(benches);
