#[test]
fn event_macro_expands() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/event_basic.rs");
    t.pass("tests/ui/event_overrides.rs");
}
