use criterion::{black_box, criterion_group, criterion_main, Criterion};

use karpenter_core::resource::instance_type::MinValuesPolicy;
use karpenter_core::resource::offering::{CapacityType, Offering};
use karpenter_core::resource::requirements::Requirements;
use karpenter_core::resource::resource_list::{Overhead, ResourceList};
use karpenter_core::resource::{InstanceType, InstanceTypes};

fn synthetic_fleet(n: usize) -> InstanceTypes {
    let types = (0..n)
        .map(|i| {
            let zone = ["us-east-1a", "us-east-1b", "us-east-1c"][i % 3];
            let offerings = vec![
                Offering::new(zone, CapacityType::OnDemand, 1.0 + (i % 37) as f64 * 0.1),
                Offering::new(zone, CapacityType::Spot, 0.3 + (i % 19) as f64 * 0.05),
            ];
            InstanceType::new(
                format!("type-{i}"),
                Requirements::new(),
                offerings,
                ResourceList::from_pairs([("cpu", 4000), ("memory", 16_000_000_000)]),
                Overhead::default(),
            )
        })
        .collect();
    InstanceTypes::new(types)
}

fn bench_order_by_price(c: &mut Criterion) {
    let fleet = synthetic_fleet(500);
    let requirements = Requirements::new();

    c.bench_function("order_by_price_500_types", |b| {
        b.iter(|| black_box(&fleet).order_by_price(black_box(&requirements)))
    });
}

fn bench_truncate(c: &mut Criterion) {
    let fleet = synthetic_fleet(500);
    let requirements = Requirements::new();

    c.bench_function("truncate_500_types_to_50", |b| {
        b.iter(|| {
            black_box(&fleet)
                .truncate(black_box(&requirements), 50, MinValuesPolicy::BestEffort)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_order_by_price, bench_truncate);
criterion_main!(benches);
