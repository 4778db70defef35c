use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use kc::{lexer::Lexer, token::Token};

/// A program large enough to dominate per-call overhead: many small
/// definitions plus a numeric tail.
fn build_input() -> String {
    let mut src = String::with_capacity(64 * 1024);
    for i in 0..512 {
        src.push_str(&format!(
            "def f{i}(a b) if a < b then a * {i} else b / {i} # comment\n"
        ));
        src.push_str(&format!("f{i}(1.5, 2.25);\n"));
    }
    src
}

fn lex_all(input: &str) -> usize {
    let mut lexer = Lexer::new(input.as_bytes());
    let mut count = 0;
    loop {
        match lexer.next_token() {
            Token::Eof => break,
            _ => count += 1,
        }
    }
    count
}

fn criterion_benchmark(c: &mut Criterion) {
    let input = build_input();
    c.bench_function("lex", |b| b.iter(|| lex_all(black_box(&input))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
