use fenris_constraints::constraints::{AffineConstraints, ConstraintError, ConstraintLine, MergeConflictBehavior};

#[test]
fn close_flattens_constraint_chains() {
    // x0 = 0.5 x1 + 0.5 x2, x1 = x3 + 1
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    constraints.add_entries(0, [(1, 0.5), (2, 0.5)]).unwrap();
    constraints.add_line(1);
    constraints.add_entry(1, 3, 1.0).unwrap();
    constraints.set_inhomogeneity(1, 1.0);
    assert!(!constraints.is_closed());

    constraints.close().unwrap();
    assert!(constraints.is_closed());
    assert_eq!(constraints.n_constraints(), 2);

    let line = constraints.constraint_line_for(0).unwrap();
    assert_eq!(line.entries, vec![(2, 0.5), (3, 0.5)]);
    assert_eq!(line.inhomogeneity, 0.5);

    let line = constraints.constraint_line_for(1).unwrap();
    assert_eq!(line.entries, vec![(3, 1.0)]);
    assert_eq!(line.inhomogeneity, 1.0);

    assert!(constraints.is_constrained(0));
    assert!(!constraints.is_constrained(2));
    assert!(!constraints.is_constrained(100));
    assert!(constraints.constraint_line_for(3).is_none());
    assert!(constraints.has_inhomogeneities());
    assert!(constraints.is_inhomogeneously_constrained(0));
}

#[test]
fn close_resolves_long_chains_in_any_order() {
    // x4 = x3, x3 = 2 x2, x2 = x1 + 1, x1 = 0.5 x0
    let lines = vec![
        ConstraintLine::new(4).with_entries([(3, 1.0)]),
        ConstraintLine::new(2)
            .with_entries([(1, 1.0)])
            .with_inhomogeneity(1.0),
        ConstraintLine::new(3).with_entries([(2, 2.0)]),
        ConstraintLine::new(1).with_entries([(0, 0.5)]),
    ];
    let mut constraints = AffineConstraints::from_lines(lines).unwrap();
    constraints.close().unwrap();

    let dofs: Vec<_> = constraints
        .lines()
        .iter()
        .map(|line| line.line)
        .collect();
    assert_eq!(dofs, vec![1, 2, 3, 4]);

    let line = constraints.constraint_line_for(4).unwrap();
    assert_eq!(line.entries, vec![(0, 1.0)]);
    assert_eq!(line.inhomogeneity, 2.0);
    for line in constraints.lines() {
        assert!(line
            .entries
            .iter()
            .all(|&(target, _)| !constraints.is_constrained(target)));
    }
}

#[test]
fn close_merges_duplicate_targets_and_drops_zeros() {
    // x0 = x1 + x3, x1 = 2 x2 - x3
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    constraints.add_entries(0, [(1, 1.0), (3, 1.0)]).unwrap();
    constraints.add_line(1);
    constraints.add_entries(1, [(2, 2.0), (3, -1.0)]).unwrap();
    constraints.close().unwrap();

    // x0 = 2 x2 - x3 + x3 = 2 x2
    let line = constraints.constraint_line_for(0).unwrap();
    assert_eq!(line.entries, vec![(2, 2.0)]);
}

#[test]
fn close_reports_cycles() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    constraints.add_entry(0, 1, 1.0).unwrap();
    constraints.add_line(1);
    constraints.add_entry(1, 2, 0.5).unwrap();
    constraints.add_line(2);
    constraints.add_entry(2, 0, 1.0).unwrap();

    let error = constraints.close().unwrap_err();
    assert_eq!(error, ConstraintError::CyclicConstraint { dofs: vec![0, 1, 2] });
    assert!(!constraints.is_closed());
    assert!(error.to_string().contains("cycle"));
}

#[test]
fn close_is_idempotent() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(3);
    constraints.add_entry(3, 1, 0.25).unwrap();
    constraints.close().unwrap();
    let lines = constraints.lines().to_vec();
    constraints.close().unwrap();
    assert_eq!(constraints.lines(), lines.as_slice());
}

#[test]
fn add_entry_detects_self_references_and_conflicts() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    assert_eq!(
        constraints.add_entry(0, 0, 1.0),
        Err(ConstraintError::SelfReferentialConstraint { dof: 0 })
    );

    constraints.add_entry(0, 1, 0.5).unwrap();
    // Identical entries are accepted
    constraints.add_entry(0, 1, 0.5).unwrap();
    assert_eq!(
        constraints.add_entry(0, 1, 0.25),
        Err(ConstraintError::ConflictingEntry {
            line: 0,
            target: 1,
            existing: "0.5".to_string(),
            new: "0.25".to_string(),
        })
    );

    constraints.close().unwrap();
    assert_eq!(constraints.constraint_line_for(0).unwrap().entries, vec![(1, 0.5)]);
}

#[test]
fn from_lines_rejects_repeated_dofs() {
    let lines = vec![
        ConstraintLine::new(2).with_entries([(0, 1.0)]),
        ConstraintLine::new(2)
            .with_entries([(1, 1.0)])
            .with_inhomogeneity(5.0),
    ];
    let error = AffineConstraints::<f64>::from_lines(lines).unwrap_err();
    assert!(matches!(error, ConstraintError::MergeConflict { dof: 2 }));
}

#[test]
fn add_line_for_constrained_dof_is_ignored() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(2);
    constraints.add_entry(2, 0, 1.0).unwrap();
    constraints.add_line(2);
    constraints.close().unwrap();

    assert_eq!(constraints.n_constraints(), 1);
    assert!(constraints.is_identity_constrained(2));
    assert!(!constraints.is_inhomogeneously_constrained(2));
}

#[test]
fn set_inhomogeneity_overwrites_previous_value() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(1);
    constraints.set_inhomogeneity(1, 3.0);
    constraints.set_inhomogeneity(1, -2.0);
    constraints.close().unwrap();
    assert_eq!(constraints.constraint_line_for(1).unwrap().inhomogeneity, -2.0);
    assert!(!constraints.is_identity_constrained(1));
}

#[test]
#[should_panic(expected = "Cannot modify closed affine constraints")]
fn closed_constraints_cannot_be_modified() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    constraints.close().unwrap();
    constraints.add_line(1);
}

#[test]
#[should_panic(expected = "must be closed")]
fn open_constraints_cannot_be_queried() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    constraints.is_constrained(0);
}

#[test]
fn clear_reopens_constraints() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    constraints.close().unwrap();
    constraints.clear();
    assert!(!constraints.is_closed());
    constraints.add_line(5);
    constraints.close().unwrap();
    assert!(!constraints.is_constrained(0));
    assert!(constraints.is_constrained(5));
}

fn merge_operands() -> (AffineConstraints<f64>, AffineConstraints<f64>) {
    let mut left = AffineConstraints::new();
    left.add_line(0);
    left.set_inhomogeneity(0, 1.0);
    left.close().unwrap();

    let mut right = AffineConstraints::new();
    right.add_line(0);
    right.set_inhomogeneity(0, 2.0);
    right.add_line(1);
    right.add_entry(1, 2, 1.0).unwrap();
    (left, right)
}

#[test]
fn merge_respects_conflict_behavior() {
    let (mut left, right) = merge_operands();
    assert_eq!(
        left.merge(&right, MergeConflictBehavior::NoConflictsAllowed),
        Err(ConstraintError::MergeConflict { dof: 0 })
    );
    // Failed merges leave the store untouched
    assert!(left.is_closed());
    assert_eq!(left.n_constraints(), 1);

    let (mut left, right) = merge_operands();
    left.merge(&right, MergeConflictBehavior::LeftObjectWins)
        .unwrap();
    assert!(!left.is_closed());
    left.close().unwrap();
    assert_eq!(left.n_constraints(), 2);
    assert_eq!(left.constraint_line_for(0).unwrap().inhomogeneity, 1.0);
    assert!(left.is_identity_constrained(1));

    let (mut left, right) = merge_operands();
    left.merge(&right, MergeConflictBehavior::RightObjectWins)
        .unwrap();
    left.close().unwrap();
    assert_eq!(left.constraint_line_for(0).unwrap().inhomogeneity, 2.0);
}

#[test]
fn merge_without_conflicts_is_a_union() {
    let mut left = AffineConstraints::<f64>::new();
    left.add_line(4);
    let mut right = AffineConstraints::<f64>::new();
    right.add_line(2);
    right.add_entry(2, 4, 0.5).unwrap();

    left.merge(&right, MergeConflictBehavior::NoConflictsAllowed)
        .unwrap();
    left.close().unwrap();
    // The merged chain through DoF 4 is resolved as well
    assert!(left
        .constraint_line_for(2)
        .unwrap()
        .entries
        .is_empty());
    assert_eq!(left.n_constraints(), 2);
}

#[test]
fn display_lists_entries_and_inhomogeneities() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(0);
    constraints.add_entries(0, [(2, 0.5), (3, 0.5)]).unwrap();
    constraints.set_inhomogeneity(0, 0.5);
    constraints.add_line(4);
    constraints.set_inhomogeneity(4, 2.0);
    constraints.close().unwrap();

    let expected = "    0 2:  0.5\n    0 3:  0.5\n    0: 0.5\n    4 = 2\n";
    assert_eq!(constraints.to_string(), expected);
}

#[test]
fn constraint_lines_serialize_to_json() {
    let line = ConstraintLine::new(3)
        .with_entries([(1, 0.5)])
        .with_inhomogeneity(1.5);
    let json = serde_json::to_string(&line).unwrap();
    let deserialized: ConstraintLine<f64> = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, line);
}

#[test]
fn cloned_constraints_are_independent() {
    let mut constraints = AffineConstraints::<f64>::new();
    constraints.add_line(1);
    constraints.add_entry(1, 0, 1.0).unwrap();
    let mut clone = constraints.clone();
    clone.add_line(2);
    constraints.close().unwrap();
    clone.close().unwrap();
    assert_eq!(constraints.n_constraints(), 1);
    assert_eq!(clone.n_constraints(), 2);
}
