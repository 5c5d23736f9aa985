use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use artboard_core::collection::{add_to_collection, visible_items};
use artboard_core::{Artifact, ArtifactType, Command, DragEngine, ProjectArtifact, Vec2};
use std::time::Instant;
use uuid::Uuid;

fn create_page(n: usize) -> Vec<ProjectArtifact> {
    let page_id = Uuid::new_v4();
    (0..n)
        .map(|i| {
            let artifact = Artifact::new(ArtifactType::Image, format!("img-{i}"), "https://cdn/img.png");
            ProjectArtifact::new(Uuid::nil(), page_id, i as u32, artifact)
        })
        .collect()
}

fn bench_optimistic_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("Command Projection");
    group.throughput(Throughput::Elements(1));

    // 500 placements: a large board page
    let items = create_page(500);
    let mut ids: Vec<_> = items.iter().map(|a| a.id).collect();
    ids.reverse();
    let cmd = Command::reorder(&items, ids);

    group.bench_function("reorder_500", |b| {
        b.iter(|| black_box(cmd.optimistic_state(black_box(&items))))
    });

    let delete = Command::delete(&items, items[250].id);
    group.bench_function("delete_compact_500", |b| {
        b.iter(|| black_box(delete.optimistic_state(black_box(&items))))
    });

    group.finish();
}

fn bench_drop(c: &mut Criterion) {
    let mut group = c.benchmark_group("Drag Engine");

    let mut items = create_page(200);
    let head = items[0].id;
    for i in 1..20 {
        let member = items[i].id;
        add_to_collection(&mut items, head, member, None);
    }
    items[0].is_expanded = true;

    group.bench_function("visible_items_200", |b| {
        b.iter(|| black_box(visible_items(black_box(&items))))
    });

    group.bench_function("drop_reorder_200", |b| {
        b.iter(|| {
            let mut engine = DragEngine::default();
            let now = Instant::now();
            engine.start_drag(items[150].id, Vec2::ZERO, now);
            black_box(engine.end_drag(5, &items, now));
        })
    });

    group.finish();
}

criterion_group!(benches, bench_optimistic_reorder, bench_drop);
criterion_main!(benches);
