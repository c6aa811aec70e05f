use std::num::NonZeroUsize;

use crate::domain::{Batch, FileId};

/// Splits `ids` into `ceil(n / batch_size)` contiguous batches in input order.
pub fn plan_batches(ids: &[FileId], batch_size: NonZeroUsize) -> Vec<Batch> {
    ids.chunks(batch_size.get())
        .enumerate()
        .map(|(index, chunk)| Batch::new(index, chunk.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<FileId> {
        values.iter().map(|value| value.parse().unwrap()).collect()
    }

    fn size(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).unwrap()
    }

    #[test]
    fn five_ids_in_pairs() {
        let batches = plan_batches(&ids(&["A", "B", "C", "D", "E"]), size(2));
        let layout: Vec<Vec<&str>> = batches
            .iter()
            .map(|batch| batch.ids().iter().map(FileId::as_str).collect())
            .collect();
        assert_eq!(layout, vec![vec!["A", "B"], vec!["C", "D"], vec!["E"]]);
        assert_eq!(
            batches.iter().map(Batch::ordinal).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn batches_cover_input_exactly() {
        for n in 1..=23usize {
            let input: Vec<FileId> = (0..n).map(|i| format!("id-{i}").parse().unwrap()).collect();
            for b in 1..=9usize {
                let batches = plan_batches(&input, size(b));
                assert_eq!(batches.len(), n.div_ceil(b), "n={n} b={b}");

                let (last, full) = batches.split_last().unwrap();
                assert!(full.iter().all(|batch| batch.len() == b));
                assert!(!last.is_empty() && last.len() <= b);

                let rejoined: Vec<FileId> = batches
                    .iter()
                    .flat_map(|batch| batch.ids().iter().cloned())
                    .collect();
                assert_eq!(rejoined, input);
            }
        }
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(plan_batches(&[], size(100)).is_empty());
    }
}
