/// Marks the members of one longest strictly increasing subsequence of `seq`.
///
/// Patience sorting, O(n log n). Ties between equally long runs resolve to the
/// run ending at the smallest tail, so results are deterministic.
pub(crate) fn longest_increasing_run(seq: &[usize]) -> Vec<bool> {
    // tails[k] = index into seq of the smallest tail of an increasing run of length k + 1.
    let mut tails: Vec<usize> = Vec::with_capacity(seq.len());
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &v) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < v);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut keep = vec![false; seq.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = prev[i];
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kept(seq: &[usize]) -> usize {
        longest_increasing_run(seq).into_iter().filter(|k| *k).count()
    }

    #[test]
    fn empty_sequence() {
        assert!(longest_increasing_run(&[]).is_empty());
    }

    #[test]
    fn sorted_sequence_keeps_everything() {
        assert_eq!(kept(&[0, 1, 2, 3, 4]), 5);
    }

    #[test]
    fn reversed_sequence_keeps_one() {
        assert_eq!(kept(&[4, 3, 2, 1, 0]), 1);
    }

    #[test]
    fn single_relocation_leaves_one_out() {
        // Element 4 moved to the front.
        assert_eq!(kept(&[4, 0, 1, 2, 3]), 4);
        // Element 0 moved to the back.
        assert_eq!(kept(&[1, 2, 3, 4, 0]), 4);
        // Adjacent swap.
        assert_eq!(kept(&[1, 0, 2]), 2);
    }

    #[test]
    fn membership_forms_an_increasing_run() {
        let seq = [3, 1, 4, 5, 9, 2, 6];
        let keep = longest_increasing_run(&seq);
        let run: Vec<usize> = seq.iter().zip(&keep).filter(|(_, k)| **k).map(|(v, _)| *v).collect();
        assert_eq!(run.len(), 4);
        assert!(run.windows(2).all(|w| w[0] < w[1]));
    }
}
