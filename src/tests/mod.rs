mod test_graphs;

use std::fmt::Debug;

use rand::{rngs::StdRng, Rng};

// Integration and other tests

/// Ensure two arrays are nearly equal
pub fn assert_close(a_vec: &[f32], b_vec: &[f32]) {
    assert_eq!(a_vec.len(), b_vec.len(), "Number of elements doesn't match");
    for (a, b) in a_vec.iter().zip(b_vec.iter()) {
        if (a - b).abs() > 1e-3 {
            panic!(
                "{a} is not close to {b}, avg distance: {}",
                a_vec
                    .iter()
                    .zip(b_vec.iter())
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f32>()
                    / a_vec.len() as f32
            );
        }
    }
}

/// Ensure two arrays are exactly equal
pub fn assert_exact<T: PartialEq + Debug>(a_vec: &[T], b_vec: &[T]) {
    assert_eq!(a_vec.len(), b_vec.len(), "Number of elements doesn't match");
    for (a, b) in a_vec.iter().zip(b_vec.iter()) {
        if a != b {
            panic!("{a:?} is not equal to {b:?}");
        }
    }
}

pub fn random_vec_rng(n: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-0.5..0.5)).collect()
}
