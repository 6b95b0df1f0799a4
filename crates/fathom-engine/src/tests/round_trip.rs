use crate::{Canvas, EngineError, ValidationErrorKind};

#[test]
fn constraints_survive_serialization_and_a_post_load_solve() {
    // x + y = 10, x − y = 2. The serializer historically dropped the
    // constraint list; a post-load solve is the regression oracle.
    let canvas = Canvas::new();
    let _scope = canvas.enter();
    let x = canvas.solver_var("x");
    let y = canvas.solver_var("y");
    let c1 = canvas.add_var(10.0, "c1").unwrap();
    x.must_equal(&c1.sub(&y).unwrap()).unwrap();
    y.must_equal(&x.sub(2.0).unwrap()).unwrap();

    canvas.solve().unwrap();
    assert!((x.scalar().unwrap() - 6.0).abs() < 1e-6);

    let bytes = canvas.to_bytes().unwrap();
    let loaded = Canvas::from_bytes(&bytes).unwrap();
    assert_eq!(loaded.node_count(), canvas.node_count());

    // Logical ids are stable across the round trip.
    let x2 = loaded.var_by_id(x.id()).unwrap();
    assert_eq!(x2.name(), "x");

    // The stored solution is readable before any recompute...
    assert!((x2.scalar().unwrap() - 6.0).abs() < 1e-6);

    // ...and the system still solves after a fresh compile.
    loaded.solve().unwrap();
    assert!((x2.scalar().unwrap() - 6.0).abs() < 1e-6);
}

#[test]
fn values_and_results_survive_the_round_trip() {
    let canvas = Canvas::new();
    let _scope = canvas.enter();
    let a = canvas.add_var(vec![1.0, 2.0, 3.0], "a").unwrap();
    let b = canvas.add_var(4.0, "b").unwrap();
    let c = a.mul(&b).unwrap();
    canvas.compute_all().unwrap();

    let loaded = Canvas::from_bytes(&canvas.to_bytes().unwrap()).unwrap();
    let a2 = loaded.var_by_id(a.id()).unwrap();
    let c2 = loaded.var_by_id(c.id()).unwrap();

    // Input values travel inside the snapshot; formulas recompile and
    // recompute on the loaded side.
    assert_eq!(loaded.get_value(&a2).unwrap(), vec![1.0, 2.0, 3.0]);
    loaded.compute_all().unwrap();
    assert_eq!(loaded.get_value(&c2).unwrap(), vec![4.0, 8.0, 12.0]);
}

#[test]
fn metadata_round_trips_with_its_validation_behavior() {
    let canvas = Canvas::new();
    let _scope = canvas.enter();
    let rev = canvas
        .add_var(100.0, "Revenue")
        .unwrap()
        .with_unit("USD")
        .unwrap();
    let vol = canvas
        .add_var(50.0, "Volume")
        .unwrap()
        .with_unit("MWh")
        .unwrap();
    rev.add(&vol).unwrap();

    let loaded = Canvas::from_bytes(&canvas.to_bytes().unwrap()).unwrap();
    match loaded.validate() {
        Err(EngineError::Validation(err)) => {
            assert_eq!(err.kind, ValidationErrorKind::UnitMismatch);
        }
        other => panic!("expected the unit mismatch to survive, got {other:?}"),
    }
}

#[test]
fn garbage_bytes_are_a_structured_error() {
    assert!(matches!(
        Canvas::from_bytes(&[0xde, 0xad, 0xbe, 0xef]),
        Err(EngineError::Graph(_))
    ));
}
