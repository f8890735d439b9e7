use crate::{closed_constraints, constraint_lines};
use fenris_constraints::constraints::{AffineConstraints, ConstraintLine};
use fenris_sparse::DynamicSparsityPattern;
use nalgebra::DMatrix;
use nalgebra_sparse::pattern::SparsityPattern;
use proptest::collection::vec;
use proptest::prelude::*;

fn averaging_constraints() -> AffineConstraints<f64> {
    closed_constraints(vec![ConstraintLine::new(2).with_entries([(0, 0.5), (1, 0.5)])])
}

fn entries(pattern: &DynamicSparsityPattern) -> Vec<(usize, usize)> {
    pattern.entries().collect()
}

#[test]
fn minimal_pattern_only_has_diagonal_for_constrained_dofs() {
    let constraints = averaging_constraints();
    let mut pattern = DynamicSparsityPattern::new(4, 4);
    constraints.add_entries_local_to_global(&[3, 2, 0], &mut pattern, false, None);

    let expected = vec![
        (0, 0),
        (0, 1),
        (0, 3),
        (1, 0),
        (1, 1),
        (1, 3),
        (2, 2),
        (3, 0),
        (3, 1),
        (3, 3),
    ];
    assert_eq!(entries(&pattern), expected);
}

#[test]
fn kept_constrained_entries_include_full_rows_and_columns() {
    let constraints = averaging_constraints();
    let mut pattern = DynamicSparsityPattern::new(4, 4);
    constraints.add_entries_local_to_global(&[3, 2], &mut pattern, true, None);

    let expected = vec![(0, 0), (0, 1), (0, 3), (1, 0), (1, 1), (1, 3), (2, 2), (2, 3), (3, 0), (3, 1), (3, 2), (3, 3)];
    assert_eq!(entries(&pattern), expected);
}

#[test]
fn mask_restricts_unconstrained_couplings() {
    let constraints = averaging_constraints();
    let mask = DMatrix::from_row_slice(2, 2, &[true, false, false, true]);
    let mut pattern = DynamicSparsityPattern::new(4, 4);
    constraints.add_entries_local_to_global(&[3, 1], &mut pattern, false, Some(&mask));
    assert_eq!(entries(&pattern), vec![(1, 1), (3, 3)]);
}

#[test]
fn mask_applies_to_redistributed_couplings() {
    let constraints = averaging_constraints();
    // Only the coupling between local DoFs 0 and 1 (global 2 and 3) is present
    let mask = DMatrix::from_row_slice(2, 2, &[false, true, false, false]);
    let mut pattern = DynamicSparsityPattern::new(4, 4);
    constraints.add_entries_local_to_global(&[2, 3], &mut pattern, false, Some(&mask));
    assert_eq!(entries(&pattern), vec![(0, 3), (1, 3), (2, 2)]);
}

#[test]
#[should_panic(expected = "DoF mask must be square")]
fn mask_with_wrong_dimensions_panics() {
    let constraints = averaging_constraints();
    let mask = DMatrix::repeat(3, 2, true);
    let mut pattern = DynamicSparsityPattern::new(4, 4);
    constraints.add_entries_local_to_global(&[2, 3], &mut pattern, false, Some(&mask));
}

#[test]
fn condensed_sparsity_pattern_removes_constrained_dofs() {
    let constraints = averaging_constraints();
    // Tridiagonal pattern on 4 DoFs
    let mut uncondensed = DynamicSparsityPattern::new(4, 4);
    for i in 0..4 {
        uncondensed.add_entries(i, &[i.saturating_sub(1), i, (i + 1).min(3)]);
    }
    let condensed = constraints.condensed_sparsity_pattern(&uncondensed.to_sparsity_pattern());

    // DoF 2 couples to 1 and 3, so after elimination 0 and 1 couple to everything
    let expected = SparsityPattern::try_from_offsets_and_indices(3, 3, vec![0, 3, 6, 9], vec![0, 1, 2, 0, 1, 2, 0, 1, 2])
        .unwrap();
    assert_eq!(condensed, expected);
}

#[test]
fn condense_sparsity_pattern_in_place_adds_redistributed_entries() {
    let constraints = averaging_constraints();
    let mut pattern = DynamicSparsityPattern::new(4, 4);
    pattern.add_entries(2, &[3]);
    pattern.add_entries(3, &[2, 3]);
    constraints.condense_sparsity_pattern_in_place(&mut pattern);

    let expected = vec![(0, 3), (1, 3), (2, 2), (2, 3), (3, 0), (3, 1), (3, 2), (3, 3)];
    assert_eq!(entries(&pattern), expected);
}

fn local_dofs_and_mask(n: usize) -> impl Strategy<Value = (Vec<usize>, DMatrix<bool>)> {
    (1..6usize).prop_flat_map(move |m| {
        (vec(0..n, m), vec(any::<bool>(), m * m)).prop_map(move |(dofs, mask)| (dofs, DMatrix::from_vec(m, m, mask)))
    })
}

proptest! {
    #[test]
    fn minimal_pattern_never_couples_constrained_dofs(
        lines in constraint_lines(8),
        (dofs, mask) in local_dofs_and_mask(8),
        use_mask in any::<bool>()
    ) {
        let constraints = closed_constraints(lines);
        let mut pattern = DynamicSparsityPattern::new(8, 8);
        let mask = if use_mask { Some(&mask) } else { None };
        constraints.add_entries_local_to_global(&dofs, &mut pattern, false, mask);

        for (row, col) in pattern.entries() {
            if constraints.is_constrained(row) || constraints.is_constrained(col) {
                prop_assert_eq!(row, col);
            }
        }
        for &dof in &dofs {
            if constraints.is_constrained(dof) {
                prop_assert!(pattern.contains(dof, dof));
            }
        }
    }
}
