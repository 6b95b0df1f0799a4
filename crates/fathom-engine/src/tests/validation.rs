use crate::{Canvas, EngineError, TemporalType, Unit, ValidationErrorKind, Var};

fn expect_validation_error(canvas: &Canvas, kind: ValidationErrorKind) -> String {
    match canvas.validate() {
        Err(EngineError::Validation(err)) => {
            assert_eq!(err.kind, kind);
            err.detail
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

fn flow(canvas: &Canvas, value: f64, name: &str, unit: &str) -> Var {
    canvas
        .add_var(value, name)
        .unwrap()
        .with_unit(unit)
        .unwrap()
        .with_temporal(TemporalType::Flow)
        .unwrap()
}

fn stock(canvas: &Canvas, value: f64, name: &str, unit: &str) -> Var {
    canvas
        .add_var(value, name)
        .unwrap()
        .with_unit(unit)
        .unwrap()
        .with_temporal(TemporalType::Stock)
        .unwrap()
}

#[test]
fn adding_usd_to_mwh_is_a_unit_mismatch() {
    let canvas = Canvas::new();
    let revenue = flow(&canvas, 100.0, "Revenue", "USD");
    let volume = flow(&canvas, 50.0, "Volume", "MWh");
    revenue.add(&volume).unwrap();

    let detail = expect_validation_error(&canvas, ValidationErrorKind::UnitMismatch);
    assert!(detail.contains("Unit Mismatch"));
    assert!(detail.contains("USD") && detail.contains("MWh"));
}

#[test]
fn stock_plus_stock_is_ambiguous() {
    let canvas = Canvas::new();
    let opening = stock(&canvas, 1000.0, "OB", "USD");
    let closing = stock(&canvas, 1200.0, "CB", "USD");
    opening.add(&closing).unwrap();

    let detail = expect_validation_error(&canvas, ValidationErrorKind::TemporalAmbiguous);
    assert!(detail.contains("Ambiguous: Stock +/- Stock"));
}

#[test]
fn stock_plus_flow_validates_and_infers_stock() {
    let canvas = Canvas::new();
    let balance = stock(&canvas, 1000.0, "Balance", "USD");
    let revenue = flow(&canvas, 100.0, "Revenue", "USD");
    let rolled = balance.add(&revenue).unwrap();
    rolled.declare_type(None, Some(TemporalType::Stock)).unwrap();

    canvas.validate().unwrap();
}

#[test]
fn price_times_volume_infers_usd() {
    let canvas = Canvas::new();
    let price = flow(&canvas, 3.5, "Price", "USD/MWh");
    let volume = flow(&canvas, 50.0, "Volume", "MWh");
    let revenue = price.mul(&volume).unwrap();

    // Declaring the cancelled unit verifies against the inference.
    revenue.declare_type(Some("USD"), None).unwrap();
    canvas.validate().unwrap();
}

#[test]
fn declared_unit_must_match_inferred() {
    let canvas = Canvas::new();
    let revenue = flow(&canvas, 100.0, "Revenue", "USD");
    let costs = flow(&canvas, 40.0, "Costs", "USD");
    let margin = revenue.sub(&costs).unwrap();
    margin.declare_type(Some("EUR"), None).unwrap();

    let detail = expect_validation_error(&canvas, ValidationErrorKind::DeclaredVsInferred);
    assert!(detail.contains("Declared unit 'EUR' does not match inferred unit 'USD'"));
}

#[test]
fn declared_temporal_must_match_inferred() {
    let canvas = Canvas::new();
    let revenue = flow(&canvas, 100.0, "Revenue", "USD");
    let costs = flow(&canvas, 40.0, "Costs", "USD");
    let margin = revenue.sub(&costs).unwrap();
    margin.declare_type(None, Some(TemporalType::Stock)).unwrap();

    let detail = expect_validation_error(&canvas, ValidationErrorKind::DeclaredVsInferred);
    assert!(detail.contains("Declared temporal type 'Stock' does not match inferred type 'Flow'"));
}

#[test]
fn untyped_parents_pass_inference_but_fail_a_declaration() {
    let canvas = Canvas::new();
    let a = canvas.add_var(10.0, "A").unwrap();
    let b = canvas.add_var(5.0, "B").unwrap();
    let sum = a.add(&b).unwrap();
    canvas.validate().unwrap();

    sum.declare_type(Some("USD"), None).unwrap();
    let detail = expect_validation_error(&canvas, ValidationErrorKind::DeclaredVsInferred);
    assert!(detail.contains("inferred unit 'None'"));
}

#[test]
fn overwriting_a_declaration_reports_the_previous_value() {
    let canvas = Canvas::new();
    let revenue = flow(&canvas, 100.0, "Revenue", "USD");

    let summary = revenue.declare_type(Some("EUR"), None).unwrap();
    assert!(summary.is_overwrite());
    assert_eq!(summary.previous_unit, Some(Unit::parse("USD")));

    let summary = revenue
        .declare_type(None, Some(TemporalType::Stock))
        .unwrap();
    assert_eq!(summary.previous_temporal, Some(TemporalType::Flow));
}

#[test]
fn declaring_types_on_an_untyped_var_is_silent() {
    let canvas = Canvas::new();
    let untyped = canvas.add_var(10.0, "Untyped").unwrap();
    let summary = untyped
        .declare_type(Some("USD"), Some(TemporalType::Flow))
        .unwrap();
    assert!(!summary.is_overwrite());

    // Re-declaring the same values is not an overwrite either.
    let summary = untyped
        .declare_type(Some("USD"), Some(TemporalType::Flow))
        .unwrap();
    assert!(!summary.is_overwrite());
}

#[test]
fn metadata_mutation_invalidates_the_validation_cache() {
    let canvas = Canvas::new();
    let revenue = flow(&canvas, 100.0, "Revenue", "USD");
    let extra = canvas
        .add_var(10.0, "Extra")
        .unwrap()
        .with_unit("USD")
        .unwrap();
    revenue.add(&extra).unwrap();

    canvas.validate().unwrap();

    // Mutating to an incompatible unit must surface on the next pass.
    extra.declare_type(Some("MWh"), None).unwrap();
    expect_validation_error(&canvas, ValidationErrorKind::UnitMismatch);
}

#[test]
fn validation_does_not_block_compute() {
    // A type-invalid graph still computes; validation is opt-in.
    let canvas = Canvas::new();
    let revenue = flow(&canvas, 100.0, "Revenue", "USD");
    let volume = flow(&canvas, 50.0, "Volume", "MWh");
    let bogus = revenue.add(&volume).unwrap();

    assert!(canvas.validate().is_err());
    canvas.compute_all().unwrap();
    assert_eq!(canvas.get_value(&bogus).unwrap(), vec![150.0]);
}
