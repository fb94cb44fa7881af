use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scandium_core::{GrayImage, PixelRect, Timestamp};
use scandium_landability::features::{edge_density, laplacian_variance};
use scandium_landability::{HeuristicScorer, LandabilityAssessor, LandabilityScorer, RoiPolicy, RoiSample};

fn textured(w: usize, h: usize, seed: u32) -> GrayImage {
    let mut img = GrayImage::new(w, h);
    let mut s = seed;
    for y in 0..h {
        for x in 0..w {
            s = s.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let base = 100 + ((x / 16 + y / 16) % 2) as i32 * 60;
            let n = ((s >> 16) % 21) as i32 - 10;
            img.set(x, y, (base + n).clamp(0, 255) as u8);
        }
    }
    img
}

fn bench_features(c: &mut Criterion) {
    let img = textured(640, 480, 7);
    c.bench_function("laplacian_variance_640x480", |b| {
        b.iter(|| laplacian_variance(black_box(&img.view())))
    });
    c.bench_function("edge_density_640x480", |b| {
        b.iter(|| edge_density(black_box(&img.view()), 50.0, 150.0))
    });
}

fn bench_score(c: &mut Criterion) {
    let cur = textured(640, 480, 7);
    let prev = textured(640, 480, 8);
    let sample = RoiSample {
        current: cur.view(),
        previous: Some(prev.view()),
        rect: PixelRect {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        },
        timestamp: Timestamp(0),
    };
    let mut scorer = HeuristicScorer::default();
    c.bench_function("heuristic_score_640x480", |b| {
        b.iter(|| scorer.score(black_box(&sample)))
    });

    let frame = textured(1280, 720, 3);
    let mut assessor = LandabilityAssessor::new(RoiPolicy::default(), Box::new(HeuristicScorer::default()));
    c.bench_function("assess_center_roi_1280x720", |b| {
        b.iter(|| assessor.assess(black_box(&frame.view()), None, Timestamp(0)))
    });
}

criterion_group!(heuristic, bench_features, bench_score);
criterion_main!(heuristic);
