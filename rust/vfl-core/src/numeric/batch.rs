//! Mini-batch selection.

use crate::crypto::Sha256;

use super::TrainRow;

/// Selects the batch of rows used in round `round`.
///
/// With `batch_size == 0` or at least as many rows requested as there are, the whole set is used.
/// Otherwise the set is split into `rows.len() / batch_size` segments of `batch_size` rows and
/// round `r` uses segment `r mod segments`. When `reshuffle` is set and the first segment is due,
/// all rows are first reordered by the `SHA-256` digest of `"{position}+{round}"`, and the new
/// order is written back. The order only depends on positions and the round, so two parties with
/// aligned rows draw the same samples.
pub fn batch_select(rows: &mut Vec<TrainRow>, batch_size: usize, round: u64, reshuffle: bool) -> Vec<TrainRow> {
    if batch_size == 0 || batch_size >= rows.len() {
        return rows.clone();
    }
    let segments = (rows.len() / batch_size) as u64;
    let segment = (round % segments) as usize;
    if reshuffle && segment == 0 {
        let mut keyed: Vec<(Sha256, TrainRow)> = rows
            .drain(..)
            .enumerate()
            .map(|(position, row)| (Sha256::hash(format!("{}+{}", position, round).as_bytes()), row))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| a.as_slice().cmp(b.as_slice()));
        rows.extend(keyed.into_iter().map(|(_, row)| row));
    }
    let start = segment * batch_size;
    rows[start..start + batch_size].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(count: usize) -> Vec<TrainRow> {
        (0..count)
            .map(|id| TrainRow {
                id,
                x: vec![id as f64],
                y: None,
            })
            .collect()
    }

    fn ids(batch: &[TrainRow]) -> Vec<usize> {
        batch.iter().map(|row| row.id).collect()
    }

    #[test]
    fn test_full_batch() {
        let mut set = rows(5);
        assert_eq!(batch_select(&mut set, 0, 3, true).len(), 5);
        assert_eq!(batch_select(&mut set, 5, 3, true).len(), 5);
        assert_eq!(batch_select(&mut set, 9, 3, true).len(), 5);
        assert_eq!(ids(&set), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_segments_without_reshuffle() {
        let mut set = rows(10);
        assert_eq!(ids(&batch_select(&mut set, 3, 0, false)), vec![0, 1, 2]);
        assert_eq!(ids(&batch_select(&mut set, 3, 1, false)), vec![3, 4, 5]);
        assert_eq!(ids(&batch_select(&mut set, 3, 2, false)), vec![6, 7, 8]);
        assert_eq!(ids(&batch_select(&mut set, 3, 3, false)), vec![0, 1, 2]);
    }

    #[test]
    fn test_reshuffle_is_deterministic_and_persistent() {
        let mut a = rows(12);
        let mut b = rows(12);
        let batch_a = batch_select(&mut a, 4, 3, true);
        let batch_b = batch_select(&mut b, 4, 3, true);
        assert_eq!(batch_a, batch_b);
        assert_eq!(a, b);

        let mut sorted = ids(&a);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..12).collect::<Vec<_>>());

        // the next segment reads the reshuffled order without reshuffling again
        let next = batch_select(&mut a, 4, 4, true);
        assert_eq!(next, a[4..8].to_vec());
        // without reshuffle the first segment keeps the stored order
        assert_eq!(batch_select(&mut b, 4, 6, false), b[0..4].to_vec());
    }
}
