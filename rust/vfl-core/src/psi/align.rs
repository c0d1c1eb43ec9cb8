//! Alignment of sample tables along an intersection.
//!
//! A sample table is a list of rows of cells; the first row is the header naming the columns.

use std::collections::HashMap;

use super::PsiError;

fn id_column(rows: &[Vec<String>], id_name: &str) -> Result<usize, PsiError> {
    let header = rows.first().ok_or(PsiError::EmptyInput("sample table"))?;
    header
        .iter()
        .position(|name| name == id_name)
        .ok_or_else(|| PsiError::IdColumnMissing(id_name.to_string()))
}

/// Extracts the sample ids of a table in row order.
///
/// # Errors
/// Fails if the table is empty, has no column `id_name` or a row is shorter than the header.
pub fn retrieve_ids(rows: &[Vec<String>], id_name: &str) -> Result<Vec<String>, PsiError> {
    let column = id_column(rows, id_name)?;
    rows.iter()
        .enumerate()
        .skip(1)
        .map(|(index, row)| row.get(column).cloned().ok_or(PsiError::RaggedRow(index)))
        .collect()
}

/// Rewrites a table along the intersection `ids`.
///
/// The ids are sorted ascending; the resulting table keeps the header, holds the row of the
/// `i`-th id in row `i + 1` and drops the id column. Rows whose id is not shared are dropped.
///
/// # Errors
/// Fails if the table or `ids` is empty, the id column is missing, a row is shorter than the
/// header or an id of the intersection does not occur in the table.
pub fn rearrange_rows(
    rows: &[Vec<String>],
    id_name: &str,
    ids: &[String],
) -> Result<Vec<Vec<String>>, PsiError> {
    if ids.is_empty() {
        return Err(PsiError::EmptyInput("intersection"));
    }
    let column = id_column(rows, id_name)?;

    let mut sorted = ids.to_vec();
    sorted.sort();
    let positions: HashMap<&str, usize> = sorted
        .iter()
        .enumerate()
        .map(|(position, id)| (id.as_str(), position))
        .collect();

    let strip = |row: &Vec<String>| -> Vec<String> {
        row.iter()
            .enumerate()
            .filter(|(index, _)| *index != column)
            .map(|(_, cell)| cell.clone())
            .collect()
    };

    let mut aligned: Vec<Option<Vec<String>>> = vec![None; sorted.len()];
    for (index, row) in rows.iter().enumerate().skip(1) {
        let id = row.get(column).ok_or(PsiError::RaggedRow(index))?;
        if let Some(position) = positions.get(id.as_str()) {
            aligned[*position] = Some(strip(row));
        }
    }

    let mut table = Vec::with_capacity(sorted.len() + 1);
    table.push(strip(&rows[0]));
    for (row, id) in aligned.into_iter().zip(sorted.iter()) {
        table.push(row.ok_or_else(|| PsiError::UnknownSampleId(id.clone()))?);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_retrieve_ids() {
        let rows = table(&[&["x1", "id"], &["0.5", "b"], &["1.5", "a"]]);
        assert_eq!(retrieve_ids(&rows, "id").unwrap(), vec!["b", "a"]);
        assert_eq!(
            retrieve_ids(&rows, "key").unwrap_err(),
            PsiError::IdColumnMissing("key".into())
        );
        assert_eq!(
            retrieve_ids(&[], "id").unwrap_err(),
            PsiError::EmptyInput("sample table")
        );
        let ragged = table(&[&["x1", "id"], &["0.5"]]);
        assert_eq!(retrieve_ids(&ragged, "id").unwrap_err(), PsiError::RaggedRow(1));
    }

    #[test]
    fn test_rearrange_rows() {
        let rows = table(&[
            &["x1", "id", "x2"],
            &["1", "c", "10"],
            &["2", "a", "20"],
            &["3", "b", "30"],
            &["4", "d", "40"],
        ]);
        let ids = vec!["c".to_string(), "a".to_string()];
        assert_eq!(
            rearrange_rows(&rows, "id", &ids).unwrap(),
            table(&[&["x1", "x2"], &["2", "20"], &["1", "10"]])
        );
    }

    #[test]
    fn test_rearrange_rows_errors() {
        let rows = table(&[&["id", "x"], &["a", "1"]]);
        assert_eq!(
            rearrange_rows(&rows, "id", &[]).unwrap_err(),
            PsiError::EmptyInput("intersection")
        );
        assert_eq!(
            rearrange_rows(&rows, "id", &["z".to_string()]).unwrap_err(),
            PsiError::UnknownSampleId("z".into())
        );
    }
}
