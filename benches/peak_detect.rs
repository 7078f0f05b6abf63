use criterion::{black_box, Criterion};

use gammacal::fitter::PeakShapeModel;
use gammacal::pipeline::{ColumnProcessor, ProcessorConfig};
use gammacal::{
    CalibrationMode, FitDiagnostics, GaussianPeakShape, KnownEnergies, LevenbergMarquardt,
    PeakDetector, Spectrum, SpectrumMatrix,
};

fn synthetic_spectrum() -> Spectrum {
    let lines = [
        GaussianPeakShape::new(900.0, 120.5, 2.0, 0.0, 0.0),
        GaussianPeakShape::new(600.0, 410.5, 2.5, 0.0, 0.0),
        GaussianPeakShape::new(450.0, 700.5, 3.0, 0.0, 0.0),
        GaussianPeakShape::new(300.0, 850.5, 3.0, 0.0, 0.0),
    ];
    let counts: Vec<f64> = (0..1024)
        .map(|i| {
            let x = i as f64 + 0.5;
            20.0 + lines.iter().map(|m| m.density(x)).sum::<f64>()
        })
        .collect();
    Spectrum::from_counts(&counts)
}

fn detection(c: &mut Criterion) {
    let spectrum = synthetic_spectrum();
    let detector = PeakDetector::builder().number_of_peaks(4).build();
    let fitter = LevenbergMarquardt::default();

    c.bench_function("detect_peaks", |b| {
        b.iter(|| {
            let mut diagnostics = FitDiagnostics::default();
            detector.detect_peaks(black_box(&spectrum), &fitter, &mut diagnostics)
        })
    });

    let mut matrix =
        SpectrumMatrix::new(16, spectrum.counts().len(), spectrum.x_min, spectrum.x_max).unwrap();
    for column in 1..=matrix.columns {
        matrix.set_column(column, &spectrum);
    }
    let energies = KnownEnergies::new(vec![243.0, 823.0, 1403.0, 1703.0]);
    let processor = ColumnProcessor::new(ProcessorConfig::new(detector, CalibrationMode::LinearSearch));
    c.bench_function("process_matrix", |b| {
        b.iter(|| processor.process_matrix(black_box(&matrix), &energies))
    });
}

criterion::criterion_group!(benches, detection);
criterion::criterion_main!(benches);
