use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use panel_backup::snapshot::{MockFramebuffer, stitch};

/// Viewport-sized captures of a tall page scrolled in full-region steps
fn scrolled_captures(width: u32, height: u32, steps: usize) -> (Vec<Vec<u8>>, Vec<f64>) {
    let mut images = Vec::with_capacity(steps);
    for step in 0..steps {
        let mut fb = MockFramebuffer::new(width, height);
        for y in 0..height {
            let row = step as u32 * height + y;
            fb.draw_row(y, [(row % 251) as u8, (row / 251 % 251) as u8, 0]);
        }
        images.push(fb.to_png().expect("encode capture"));
    }
    let deltas = vec![f64::from(height); steps.saturating_sub(1)];
    (images, deltas)
}

fn benchmark_stitch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch");
    for steps in [2usize, 4, 8] {
        let (images, deltas) = scrolled_captures(800, 500, steps);
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, _| {
            b.iter(|| {
                let stitched = stitch(black_box(&images), black_box(&deltas), 800.0);
                assert!(stitched.is_some());
            })
        });
    }
    group.finish();

    let (images, deltas) = scrolled_captures(1600, 1000, 3);
    c.bench_function("stitch_high_dpi", |b| {
        b.iter(|| {
            let stitched = stitch(black_box(&images), black_box(&deltas), 800.0);
            assert!(stitched.is_some());
        })
    });
}

criterion_group!(benches, benchmark_stitch);
criterion_main!(benches);
