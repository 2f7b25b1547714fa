use criterion::{criterion_group, criterion_main, Criterion};

const SOURCE: &str = r#"
class Point {
    int x;
    int y;

    int sum() {
        return x + y;
    }
}

int run() {
    Point p;
    p.x = 3;
    p.y = 4;
    int total = 0;
    int i = 0;
    while (i < 100) {
        total = total + p.sum();
        i = i + 1;
    }
    return total;
}
"#;

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("compile_to_clif", |b| {
        b.iter(|| axc::compile_to_clif(SOURCE, "").expect("compiles"))
    });
}

criterion_group!(benches, compile_benchmark);
criterion_main!(benches);
