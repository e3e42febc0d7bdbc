use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use recipe_forge_core::complexity::{ComplexityAnalyzer, ComplexityConfig};
use recipe_forge_core::executor::ParallelExecutor;
use recipe_forge_core::graph::DependencyResolver;
use recipe_forge_core::recipe::{ComponentMetadata, ComponentType, Priority, Requirement, Requirements};
use recipe_forge_core::state::checksum;
use recipe_forge_core::{RecipeRegistry, RecipeUnit};
use std::collections::BTreeMap;

/// `width` recipes per level, each depending on every recipe of the level below
fn layered_registry(levels: usize, width: usize) -> RecipeRegistry {
    let mut registry = RecipeRegistry::new();
    for level in 0..levels {
        for i in 0..width {
            let name = format!("unit-{}-{}", level, i);
            let deps: Vec<String> =
                if level == 0 { Vec::new() } else { (0..width).map(|j| format!("unit-{}-{}", level - 1, j)).collect() };
            registry.insert(recipe(&name, deps));
        }
    }
    registry
}

fn recipe(name: &str, deps: Vec<String>) -> RecipeUnit {
    let requirements = Requirements {
        purpose: format!("Provide {}", name),
        requirements: (0..5)
            .map(|i| Requirement::new(format!("{}-R{}", name, i), format!("Requirement {} of {}", i, name), Priority::Must))
            .collect(),
        success_criteria: Vec::new(),
    };
    let metadata = ComponentMetadata::new(name, ComponentType::Library).with_dependencies(deps);
    match RecipeUnit::new(name, requirements, None, metadata) {
        Ok(unit) => unit,
        Err(e) => panic!("invalid bench recipe: {}", e),
    }
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_all");
    for (levels, width) in [(5, 4), (10, 10), (20, 20)] {
        let registry = layered_registry(levels, width);
        group.bench_with_input(BenchmarkId::from_parameter(levels * width), &registry, |b, registry| {
            b.iter(|| DependencyResolver::new(black_box(registry)).resolve_all().unwrap());
        });
    }
    group.finish();

    let registry = layered_registry(20, 20);
    c.bench_function("resolve_single_target_400", |b| {
        b.iter(|| DependencyResolver::new(&registry).resolve(black_box("unit-19-0")).unwrap());
    });
    c.bench_function("impact_400", |b| {
        b.iter(|| DependencyResolver::new(&registry).impact(black_box("unit-0-0")).unwrap());
    });
}

fn bench_checksum_and_metrics(c: &mut Criterion) {
    let unit = recipe("cache", vec!["model".to_string(), "store".to_string()]);

    c.bench_function("checksum", |b| b.iter(|| checksum(black_box(&unit))));

    let analyzer = ComplexityAnalyzer::new(ComplexityConfig::default());
    c.bench_function("complexity_uncached", |b| b.iter(|| analyzer.evaluate(black_box(&unit))));
    c.bench_function("complexity_cached", |b| b.iter(|| analyzer.analyze(black_box(&unit))));
}

fn bench_executor(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let registry = layered_registry(10, 10);
    let plan = DependencyResolver::new(&registry).resolve_all().unwrap();

    c.bench_function("execute_noop_100", |b| {
        b.to_async(&runtime).iter(|| async {
            ParallelExecutor::new(8)
                .execute(&plan.layers, &BTreeMap::new(), |_| async { Ok(true) })
                .await
        });
    });
}

criterion_group!(benches, bench_resolution, bench_checksum_and_metrics, bench_executor);
criterion_main!(benches);
