use std::env;
use std::io;
use std::path::Path;
use std::process;
use std::time::Instant;

use gammacal::pipeline::{ColumnProcessor, ProcessorConfig};
use gammacal::{text, CalibrationMode, KnownEnergies, PeakDetector};

const USAGE: &str =
    "Usage: gammacal <matrix_file> <energy_file|source[,source...]> <number_of_peaks> [linear|polynomial]";

fn invalid_input<E: ToString>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err.to_string())
}

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 || args.len() > 5 {
        eprintln!("{USAGE}");
        process::exit(1);
    }

    let matrix = text::load_matrix(&args[1])?;
    let energies = if Path::new(&args[2]).is_file() {
        text::load_energies(&args[2])?
    } else {
        KnownEnergies::from_names(&args[2]).map_err(invalid_input)?
    };
    let number_of_peaks: usize = args[3].parse().map_err(invalid_input)?;
    let mode = match args.get(4).map(String::as_str) {
        None | Some("linear") => CalibrationMode::LinearSearch,
        Some("polynomial") => CalibrationMode::PolynomialRegression,
        Some(other) => {
            return Err(invalid_input(format!(
                "Unknown calibration mode {other:?}\n{USAGE}"
            )))
        }
    };

    let detector = PeakDetector::builder()
        .number_of_peaks(number_of_peaks)
        .build();
    let processor = ColumnProcessor::new(ProcessorConfig::new(detector, mode));

    let start = Instant::now();
    let run = processor
        .process_matrix(&matrix, &energies)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let elapsed = Instant::now() - start;

    text::write_reports(io::stdout().lock(), &run.reports())?;

    eprintln!(
        "Processed {} columns ({} skipped) in {} milliseconds",
        run.columns.len(),
        run.skipped.len(),
        elapsed.as_millis()
    );
    eprintln!(
        "Calibrated {} of {} columns against {} energies {}",
        run.calibrated_columns(),
        run.columns.len(),
        energies.len(),
        energies.name
    );
    for column in run.columns.iter() {
        match (&column.calibration, column.peak_to_total()) {
            (Ok(calibration), Some(pt)) => eprintln!(
                "\tColumn {}: {}, P/T = {:0.4} ± {:0.4}",
                column.column, calibration.mapping, pt.ratio, pt.error
            ),
            (Ok(calibration), None) => {
                eprintln!("\tColumn {}: {}", column.column, calibration.mapping)
            }
            (Err(err), _) => eprintln!("\tColumn {}: uncalibrated, {}", column.column, err),
        }
    }
    eprintln!(
        "Scanned candidates: {}, good fits: {}, bad fits: {}",
        run.diagnostics.scanned_bins, run.diagnostics.good_fits, run.diagnostics.bad_fits
    );
    Ok(())
}
