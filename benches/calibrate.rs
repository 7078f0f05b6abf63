use criterion::{black_box, Criterion};

use gammacal::sources::{CO60, EU152};
use gammacal::{CalibrationMode, Calibrator, CalibratorConfig, KnownEnergies};

fn calibration(c: &mut Criterion) {
    let energies = KnownEnergies::from_sources([&EU152, &CO60]);
    // Channels for E = 0.5 * ch + 3
    let positions: Vec<usize> = energies
        .as_slice()
        .iter()
        .map(|e| ((e - 3.0) / 0.5).round() as usize)
        .collect();

    let search = Calibrator::default();
    c.bench_function("linear_search", |b| {
        b.iter(|| search.calibrate(black_box(&positions), energies.as_slice()))
    });

    let search_only = Calibrator::new(
        CalibrationMode::LinearSearch,
        CalibratorConfig::default().refine(false),
    );
    c.bench_function("linear_search_unrefined", |b| {
        b.iter(|| search_only.calibrate(black_box(&positions), energies.as_slice()))
    });

    let regression = Calibrator::new(
        CalibrationMode::PolynomialRegression,
        CalibratorConfig::default(),
    );
    c.bench_function("polynomial_regression", |b| {
        b.iter(|| regression.calibrate(black_box(&positions), energies.as_slice()))
    });
}

criterion::criterion_group!(benches, calibration);
criterion::criterion_main!(benches);
