use crate::Canvas;

#[test]
fn trace_renders_an_audit_log_down_to_the_inputs() {
    let canvas = Canvas::new();
    let _scope = canvas.enter();
    let revenue = canvas.add_var(100.0, "Revenue").unwrap();
    let costs = canvas.add_var(60.0, "Costs").unwrap();
    let profit = revenue.sub(&costs).unwrap();
    profit.rename("Profit").unwrap();

    canvas.compute_all().unwrap();
    let trace = canvas.trace(&profit).unwrap();

    assert!(trace.contains("AUDIT TRACE"));
    assert!(trace.contains("Profit"));
    assert!(trace.contains("Revenue"));
    assert!(trace.contains("Costs"));
    assert!(trace.contains("100.000"));
    assert!(trace.contains("40.000"));
}

#[test]
fn tracing_an_input_shows_its_base_case() {
    let canvas = Canvas::new();
    let _scope = canvas.enter();
    let revenue = canvas.add_var(100.0, "Revenue").unwrap();
    canvas.compute_all().unwrap();

    let trace = canvas.trace(&revenue).unwrap();
    assert!(trace.contains("Revenue"));
    assert!(trace.contains("constant"));
    assert!(trace.contains("100.000"));
}

#[test]
fn non_finite_values_are_rendered_explicitly() {
    let canvas = Canvas::new();
    let _scope = canvas.enter();
    let zero = canvas.add_var(0.0, "Zero").unwrap();
    let one = canvas.add_var(1.0, "One").unwrap();
    let nan = zero.div(&zero).unwrap();
    let inf = one.div(&zero).unwrap();
    canvas.compute_all().unwrap();

    assert!(canvas.trace(&nan).unwrap().contains("NaN"));
    assert!(canvas.trace(&inf).unwrap().contains("+Inf"));
}

#[test]
fn shared_subtrees_print_once() {
    let canvas = Canvas::new();
    let _scope = canvas.enter();
    let a = canvas.add_var(2.0, "Shared").unwrap();
    let square = a.mul(&a).unwrap();
    canvas.compute_all().unwrap();

    let trace = canvas.trace(&square).unwrap();
    assert!(trace.contains("(see above)"));
}
