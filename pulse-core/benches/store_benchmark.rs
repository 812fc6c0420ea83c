use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulse_core::{ProposalFields, SharedState};

fn fields(i: usize) -> ProposalFields {
    ProposalFields {
        title: format!("Proposal {i}"),
        description: "Benchmark proposal".into(),
        creator_id: "user-bench".into(),
        treasury_phone: "+254700000000".into(),
    }
}

fn bench_add_proposal(c: &mut Criterion) {
    c.bench_function("add_proposal", |b| {
        let mut state = SharedState::new();
        let mut i = 0;
        b.iter(|| {
            i += 1;
            black_box(state.add_proposal(fields(i)));
        })
    });
}

fn bench_vote_replace(c: &mut Criterion) {
    let mut state = SharedState::new();
    let proposal = state.add_proposal(fields(0));
    for u in 0..100 {
        state.add_vote(&proposal.id, &format!("user-{u}"), true).unwrap();
    }

    c.bench_function("add_vote_replace_100_voters", |b| {
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            black_box(state.add_vote(&proposal.id, "user-50", flip).unwrap());
        })
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let mut state = SharedState::new();
    for u in 0..100 {
        state.add_user(&format!("user-{u}"));
    }
    for i in 0..100 {
        let p = state.add_proposal(fields(i));
        state.add_comment(&p.id, "user-1", "looks good").unwrap();
        state.add_vote(&p.id, "user-1", true).unwrap();
    }

    c.bench_function("snapshot_100_proposals", |b| {
        b.iter(|| black_box(state.snapshot()))
    });
}

criterion_group!(benches, bench_add_proposal, bench_vote_replace, bench_snapshot);
criterion_main!(benches);
