// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use yare::parameterized;

use super::*;

struct MapSource(HashMap<(Scope, &'static str), Value>);

impl MapSource {
    fn new(entries: &[(Scope, &'static str, Value)]) -> Self {
        Self(entries.iter().map(|(s, n, v)| ((*s, *n), v.clone())).collect())
    }
}

impl FieldSource for MapSource {
    fn field(&self, scope: Scope, name: &str) -> Option<Value> {
        self.0.iter().find(|((s, n), _)| *s == scope && *n == name).map(|(_, v)| v.clone())
    }
}

fn host(cpu: f64) -> MapSource {
    MapSource::new(&[(Scope::Host, "cpu_percent", Value::Num(cpu))])
}

#[parameterized(
    threshold = { "host.cpu_percent > 90" },
    conjunction = { "container.mem_percent > 80 and container.state == \"running\"" },
    disjunction = { "disk.percent > 95 or disk.free < 1000000" },
    negation = { "not container.state == \"running\"" },
    parens = { "(host.load1 > 4 or host.load5 > 2) and host.cpu_percent > 50" },
    single_quotes = { "container.health == 'unhealthy'" },
    negative_number = { "container.exit_code != -1" },
    bare_ident = { "container.restart_count" },
)]
fn parses(input: &str) {
    if let Err(e) = Expr::parse(input) {
        panic!("expected '{input}' to parse, got {e}");
    }
}

#[parameterized(
    trailing_op = { "host.cpu_percent >" },
    missing_operand = { "> 90" },
    unterminated_string = { "container.state == \"running" },
    unknown_scope = { "node.cpu_percent > 1" },
    bare_word = { "cpu_percent > 1" },
    double_dot = { "host.cpu.percent > 1" },
    literal_type_mismatch = { "5 == \"five\"" },
    trailing_garbage = { "host.cpu_percent > 1 container.pids" },
    lone_dash = { "host.cpu_percent > -" },
    stray_symbol = { "host.cpu_percent > 90 #" },
)]
fn rejects(input: &str) {
    assert!(Expr::parse(input).is_err(), "expected '{input}' to be rejected");
}

#[test]
fn scope_follows_identifiers() {
    assert_eq!(Expr::parse("host.cpu_percent > 1").unwrap().scope().unwrap(), Scope::Host);
    assert_eq!(Expr::parse("container.pids > 1").unwrap().scope().unwrap(), Scope::Container);
    assert_eq!(Expr::parse("disk.percent > 1").unwrap().scope().unwrap(), Scope::Disk);
    // host combines with either entity scope
    assert_eq!(
        Expr::parse("container.mem_percent > 80 and host.cpu_percent > 50")
            .unwrap()
            .scope()
            .unwrap(),
        Scope::Container
    );
    assert!(Expr::parse("container.pids > 1 and disk.percent > 1")
        .unwrap()
        .scope()
        .is_err());
}

#[test]
fn numeric_comparisons() {
    let expr = Expr::parse("host.cpu_percent > 90").unwrap();
    assert!(!expr.eval(&host(50.0)));
    assert!(!expr.eval(&host(90.0)));
    assert!(expr.eval(&host(90.5)));

    let expr = Expr::parse("host.cpu_percent <= 90").unwrap();
    assert!(expr.eval(&host(90.0)));
    assert!(!expr.eval(&host(90.5)));
}

#[test]
fn string_equality() {
    let source = MapSource::new(&[(Scope::Container, "state", Value::Str("exited".to_owned()))]);
    assert!(Expr::parse("container.state == \"exited\"").unwrap().eval(&source));
    assert!(Expr::parse("container.state != \"running\"").unwrap().eval(&source));
    // Ordering on strings is meaningless here and evaluates false.
    assert!(!Expr::parse("container.state > \"a\"").unwrap().eval(&source));
}

#[test]
fn boolean_operators_and_precedence() {
    let source = MapSource::new(&[
        (Scope::Host, "cpu_percent", Value::Num(95.0)),
        (Scope::Host, "load1", Value::Num(0.1)),
    ]);
    // "and" binds tighter than "or".
    let expr = Expr::parse("host.load1 > 4 and host.cpu_percent > 90 or host.cpu_percent > 94")
        .unwrap();
    assert!(expr.eval(&source));

    let expr = Expr::parse("not host.cpu_percent > 90").unwrap();
    assert!(!expr.eval(&source));
}

#[test]
fn unknown_identifier_is_false_not_error() {
    let expr = Expr::parse("host.made_up_field > 1").unwrap();
    assert!(!expr.eval(&host(99.0)));

    // Negation of an unknown comparison is true: the comparison itself
    // is false, `not` flips it. Documented hazard of total evaluation.
    let expr = Expr::parse("not host.made_up_field > 1").unwrap();
    assert!(expr.eval(&host(99.0)));
}

#[test]
fn dynamic_type_mismatch_is_false() {
    let source = MapSource::new(&[(Scope::Container, "state", Value::Str("running".to_owned()))]);
    assert!(!Expr::parse("container.state == 1").unwrap().eval(&source));
}

#[test]
fn bare_operand_truthiness() {
    let source = MapSource::new(&[
        (Scope::Container, "restart_count", Value::Num(3.0)),
        (Scope::Container, "health", Value::Str(String::new())),
    ]);
    assert!(Expr::parse("container.restart_count").unwrap().eval(&source));
    assert!(!Expr::parse("container.health").unwrap().eval(&source));
    assert!(!Expr::parse("container.absent").unwrap().eval(&source));
}
