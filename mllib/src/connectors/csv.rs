use std::fs;

use serde::Deserialize;

use super::{Dataset, assemble};
use crate::{MlError, Result};

/// Parameters understood by the csv connector.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CsvParams {
    /// The label column, the last column when unset.
    pub label: Option<String>,
    /// A column to ignore when building features.
    pub id: Option<String>,
    pub separator: Option<String>,
    /// Added to every label so that they start at `0`.
    pub label_offset: i64,
    pub scale: bool,
    pub test_split: f64,
    pub shuffle: bool,
}

impl CsvParams {
    fn separator(&self) -> &str {
        self.separator.as_deref().unwrap_or(",")
    }
}

/// Loads every csv file in `uris` into a single dataset.
///
/// Every file must start with a header row and share the same columns.
pub(super) fn load_files(
    params: &CsvParams,
    uris: Vec<String>,
    nclasses: Option<usize>,
) -> Result<Dataset> {
    let mut rows = Vec::new();
    let mut labels = Vec::new();

    for uri in &uris {
        let text = fs::read_to_string(uri).map_err(|e| MlError::Data {
            uri: uri.clone(),
            msg: e.to_string(),
        })?;

        let (file_rows, file_labels) = parse_table(params, &text, uri)?;
        rows.extend(file_rows);
        labels.extend(file_labels);
    }

    if labels.is_empty() {
        return Err(MlError::Data {
            uri: uris.join(","),
            msg: "no samples".to_string(),
        });
    }

    let max_label = labels.iter().copied().max().unwrap_or(0);
    let nclasses = nclasses.unwrap_or(max_label + 1);
    if max_label >= nclasses {
        return Err(MlError::Data {
            uri: uris.join(","),
            msg: format!("label {max_label} out of range for {nclasses} classes"),
        });
    }

    let classes = (0..nclasses).map(|c| c.to_string()).collect();
    assemble(rows, labels, classes, &uris.join(","))
}

fn parse_table(params: &CsvParams, text: &str, uri: &str) -> Result<(Vec<Vec<f32>>, Vec<usize>)> {
    let sep = params.separator();
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header: Vec<&str> = match lines.next() {
        Some(line) => line.split(sep).map(str::trim).collect(),
        None => return Ok((Vec::new(), Vec::new())),
    };

    let label_col = match &params.label {
        Some(name) => column(&header, name, uri)?,
        None => header.len().saturating_sub(1),
    };
    let id_col = params
        .id
        .as_ref()
        .map(|name| column(&header, name, uri))
        .transpose()?;

    let mut rows = Vec::new();
    let mut labels = Vec::new();

    for (n, line) in lines.enumerate() {
        let mut row = Vec::with_capacity(header.len());
        let mut label = None;

        for (i, cell) in line.split(sep).map(str::trim).enumerate() {
            if Some(i) == id_col {
                continue;
            }

            let value: f64 = cell.parse().map_err(|_| MlError::Data {
                uri: uri.to_string(),
                msg: format!("line {}: {cell:?} is not a number", n + 2),
            })?;

            if i == label_col {
                label = Some(value as i64 + params.label_offset);
            } else {
                row.push(value as f32);
            }
        }

        match label {
            Some(l) if l >= 0 => labels.push(l as usize),
            Some(l) => {
                return Err(MlError::Data {
                    uri: uri.to_string(),
                    msg: format!("line {}: negative label {l}", n + 2),
                });
            }
            None => {
                return Err(MlError::Data {
                    uri: uri.to_string(),
                    msg: format!("line {}: missing label column", n + 2),
                });
            }
        }
        rows.push(row);
    }

    Ok((rows, labels))
}

fn column(header: &[&str], name: &str, uri: &str) -> Result<usize> {
    header
        .iter()
        .position(|h| *h == name)
        .ok_or_else(|| MlError::Data {
            uri: uri.to_string(),
            msg: format!("no column named {name}"),
        })
}

/// Parses one inline row of features, as sent for prediction.
pub(super) fn parse_inline(params: &CsvParams, item: &str) -> Result<Vec<f32>> {
    item.split(params.separator())
        .map(str::trim)
        .map(|cell| {
            cell.parse::<f32>().map_err(|_| {
                MlError::InvalidParams(format!("{cell:?} in {item:?} is not a number"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "Id,a,b,Cover_Type\n1,0.5,1.0,2\n2,0.1,0.2,1\n\n3,0.0,3.0,3\n";

    #[test]
    fn test_named_label_and_id_columns() {
        let params = CsvParams {
            label: Some("Cover_Type".into()),
            id: Some("Id".into()),
            label_offset: -1,
            ..Default::default()
        };

        let (rows, labels) = parse_table(&params, TABLE, "t.csv").unwrap();
        assert_eq!(rows, vec![vec![0.5, 1.0], vec![0.1, 0.2], vec![0.0, 3.0]]);
        assert_eq!(labels, vec![1, 0, 2]);
    }

    #[test]
    fn test_label_defaults_to_last_column() {
        let (rows, labels) = parse_table(&CsvParams::default(), "x,y\n1,0\n2,1\n", "t.csv").unwrap();
        assert_eq!(rows, vec![vec![1.0], vec![2.0]]);
        assert_eq!(labels, vec![0, 1]);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let params = CsvParams {
            label: Some("nope".into()),
            ..Default::default()
        };
        assert!(matches!(
            parse_table(&params, TABLE, "t.csv"),
            Err(MlError::Data { .. })
        ));
    }

    #[test]
    fn test_negative_labels_are_rejected() {
        let params = CsvParams {
            label_offset: -5,
            ..Default::default()
        };
        assert!(parse_table(&params, "x,y\n1,0\n", "t.csv").is_err());
    }

    #[test]
    fn test_inline_rows() {
        let params = CsvParams::default();
        assert_eq!(parse_inline(&params, "1, 2.5,3").unwrap(), vec![1.0, 2.5, 3.0]);
        assert!(matches!(
            parse_inline(&params, "1,x"),
            Err(MlError::InvalidParams(_))
        ));
    }
}
