use criterion::{criterion_group, criterion_main, Criterion};
use sportsync::services::validation::{check_password_strength, sanitize_text, validate_email};
use std::hint::black_box;

fn benchmark_sanitize(c: &mut Criterion) {
    let plain = "Great game last night! Looking forward to the regional final. ".repeat(16);
    // Nested vectors force several stripping passes.
    let hostile = "<scr<script>ipt>javajavascript:script:alert(1) <a onon=click=x>".repeat(16);

    let mut group = c.benchmark_group("sanitize_text");

    group.bench_function("plain_post", |b| b.iter(|| sanitize_text(black_box(&plain))));

    group.bench_function("nested_markup", |b| {
        b.iter(|| sanitize_text(black_box(&hostile)))
    });

    group.finish();
}

fn benchmark_auth_forms(c: &mut Criterion) {
    c.bench_function("check_password_strength", |b| {
        b.iter(|| check_password_strength(black_box("Str0ng!Pass-for-2026")))
    });

    c.bench_function("validate_email", |b| {
        b.iter(|| validate_email(black_box("  Sam.Rivera+team@Example.com ")))
    });
}

criterion_group!(benches, benchmark_sanitize, benchmark_auth_forms);
criterion_main!(benches);
