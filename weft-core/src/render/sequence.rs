//! Longest increasing subsequence.
//!
//! Used by the keyed diff to find the children that can stay where they
//! are. Runs in O(n log n): `tails[k]` holds the index of the smallest
//! value that ends an increasing run of length `k + 1`, and every element
//! remembers the index that precedes it in the run it extended, so the
//! answer is recovered by walking predecessors back from the last tail.

/// Indices of a longest strictly increasing subsequence of `values`.
///
/// Zeros mark "no value" and never take part in the sequence. The returned
/// indices are ascending.
pub fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    let mut predecessors: Vec<Option<usize>> = vec![None; values.len()];
    let mut tails: Vec<usize> = Vec::new();

    for (index, &value) in values.iter().enumerate() {
        if value == 0 {
            continue;
        }

        let position = tails.partition_point(|&tail| values[tail] < value);
        if position > 0 {
            predecessors[index] = Some(tails[position - 1]);
        }
        if position == tails.len() {
            tails.push(index);
        } else {
            tails[position] = index;
        }
    }

    let mut sequence = vec![0; tails.len()];
    let mut cursor = tails.last().copied();
    for slot in sequence.iter_mut().rev() {
        if let Some(index) = cursor {
            *slot = index;
            cursor = predecessors[index];
        }
    }
    sequence
}
