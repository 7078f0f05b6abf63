//! Plain text readers and writers for spectrum matrices, energy lists and peak reports.
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path;

use crate::peak::PeakReport;
use crate::sources::KnownEnergies;
use crate::spectrum::SpectrumMatrix;

fn invalid_data(line_number: usize, message: String) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line {line_number}: {message}"),
    )
}

fn parse_values(line: &str, line_number: usize) -> io::Result<Vec<f64>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|e| invalid_data(line_number, format!("{tok:?} is not a number: {e}")))
        })
        .collect()
}

/// Iterate over the non-blank lines which are not `#` comments, with their 1-based line numbers
fn content_lines<R: BufRead>(reader: R) -> impl Iterator<Item = io::Result<(usize, String)>> {
    reader
        .lines()
        .enumerate()
        .map(|(i, line)| line.map(|line| (i + 1, line)))
        .filter(|line| match line {
            Ok((_, text)) => {
                let text = text.trim();
                !text.is_empty() && !text.starts_with('#')
            }
            Err(_) => true,
        })
}

/// Read a whitespace separated table with one row per energy bin and one column
/// per detector channel.
pub fn read_matrix<R: BufRead>(reader: R) -> io::Result<SpectrumMatrix> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in content_lines(reader) {
        let (line_number, text) = line?;
        let row = parse_values(&text, line_number)?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(invalid_data(
                    line_number,
                    format!("expected {} columns, found {}", first.len(), row.len()),
                ));
            }
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "the matrix table is empty",
        ));
    }
    SpectrumMatrix::from_rows(rows)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "ragged matrix table"))
}

pub fn load_matrix<P: AsRef<path::Path>>(path: P) -> io::Result<SpectrumMatrix> {
    let reader = io::BufReader::new(fs::File::open(path)?);
    read_matrix(reader)
}

/// Read reference energies, any number per line, into an ascending list
pub fn read_energies<R: BufRead>(reader: R) -> io::Result<KnownEnergies> {
    let mut energies = Vec::new();
    for line in content_lines(reader) {
        let (line_number, text) = line?;
        energies.extend(parse_values(&text, line_number)?);
    }
    Ok(KnownEnergies::new(energies))
}

pub fn load_energies<P: AsRef<path::Path>>(path: P) -> io::Result<KnownEnergies> {
    let reader = io::BufReader::new(fs::File::open(path)?);
    read_energies(reader)
}

fn fmt_optional(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "NA".to_string(),
    }
}

/// Write one tab separated line per report, preceded by a header line
pub fn write_reports<W: Write>(mut writer: W, reports: &[PeakReport]) -> io::Result<()> {
    writer.write_all(b"column\tpeak\tbin\tarea\tresolution\tenergy\n")?;
    for report in reports {
        writer.write_all(
            format!(
                "{}\t{}\t{}\t{}\t{}\t{}\n",
                report.column,
                report.peak_index,
                report.position_bin,
                fmt_optional(report.area),
                fmt_optional(report.resolution),
                fmt_optional(report.energy)
            )
            .as_bytes(),
        )?;
    }
    writer.flush()
}

pub fn reports_to_file<P: AsRef<path::Path>>(reports: &[PeakReport], path: P) -> io::Result<()> {
    let file = fs::File::create(path)?;
    write_reports(io::BufWriter::new(file), reports)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_matrix() {
        let text = "# channel counts\n1 10\n\n2 20\n3 30\n";
        let matrix = read_matrix(text.as_bytes()).unwrap();
        assert_eq!(matrix.columns, 2);
        assert_eq!(matrix.rows, 3);
        assert_eq!(matrix.get(2, 3), 30.0);
        assert_eq!(matrix.y_max, 3.0);
    }

    #[test]
    fn test_read_matrix_errors() {
        let err = read_matrix("1 2\n3\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().starts_with("line 2"), "{err}");

        let err = read_matrix("1 x\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = read_matrix("# nothing\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_energies() {
        let energies = read_energies("1332.49\n1173.23 661.66\n".as_bytes()).unwrap();
        assert_eq!(energies.as_slice(), &[661.66, 1173.23, 1332.49]);
    }

    #[test]
    fn test_write_reports() {
        let reports = [
            PeakReport {
                column: 3,
                peak_index: 0,
                position_bin: 101,
                area: Some(12.5),
                resolution: Some(0.25),
                energy: None,
            },
            PeakReport {
                column: 3,
                peak_index: 1,
                position_bin: 0,
                area: None,
                resolution: None,
                energy: None,
            },
        ];
        let mut buffer = Vec::new();
        write_reports(&mut buffer, &reports).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "3\t0\t101\t12.5\t0.25\tNA");
        assert_eq!(lines[2], "3\t1\t0\tNA\tNA\tNA");
    }
}
