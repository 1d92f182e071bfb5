use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use jumppad_core::{ApplyOptions, Engine, EngineConfig, Graph, Registry};
use jumppad_runtime::MockClients;
use jumppad_schema::kinds::RandomUuid;
use jumppad_schema::{Resource, ResourceSet};
use serde_json::json;

const WIDTH: usize = 10;

/// `layers` layers of `WIDTH` resources, each depending on every resource
/// of the layer above.
fn layered(layers: usize) -> ResourceSet {
    let mut set = ResourceSet::new();
    for layer in 0..layers {
        for i in 0..WIDTH {
            let mut r = Resource::new(&format!("n{layer}-{i}"), RandomUuid::default());
            if layer > 0 {
                r.info_mut().depends_on = (0..WIDTH)
                    .map(|j| format!("resource.random_uuid.n{}-{j}", layer - 1))
                    .collect();
            }
            set.insert(r).unwrap();
        }
    }
    set
}

fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    for layers in [10, 50] {
        let set = layered(layers);
        group.bench_with_input(BenchmarkId::from_parameter(set.len()), &set, |b, set| {
            b.iter(|| Graph::build(set).unwrap());
        });
    }
    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let resources: Vec<_> = (0..20)
        .flat_map(|layer| {
            (0..WIDTH).map(move |i| {
                let deps: Vec<String> = if layer == 0 {
                    Vec::new()
                } else {
                    vec![format!("resource.random_uuid.n{}-{i}", layer - 1)]
                };
                json!({"type": "random_uuid", "name": format!("n{layer}-{i}"), "depends_on": deps})
            })
        })
        .collect();
    let blueprint = serde_json::to_string(&json!({ "resources": resources })).unwrap();

    c.bench_function("engine_apply_mock_200", |b| {
        b.iter_with_setup(
            || {
                let home = tempfile::tempdir().unwrap();
                let project = tempfile::tempdir().unwrap();
                std::fs::write(project.path().join("main.json"), &blueprint).unwrap();
                let mock = MockClients::new();
                let engine = Engine::new(
                    EngineConfig::with_home(home.path()),
                    Registry::builtin(),
                    mock.clients(),
                );
                (home, project, engine)
            },
            |(_home, project, engine)| {
                let report = engine.apply(project.path(), &ApplyOptions::default()).unwrap();
                assert!(report.is_success());
            },
        );
    });
}

criterion_group!(benches, bench_graph_build, bench_apply);
criterion_main!(benches);
