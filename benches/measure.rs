use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;
use scan_metrics::config::CoverageConfig;
use scan_metrics::coverage::CoverageAnalyzer;
use scan_metrics::measure::{snap_to_surface, surface_distance};
use scan_metrics::types::Mesh;

/// Generate an `n` x `n` grid of quads on the XZ plane spanning [0,1]^2.
fn make_grid(n: usize) -> Mesh {
    let verts_per_side = n + 1;
    let mut vertices = Vec::with_capacity(verts_per_side * verts_per_side);
    for z in 0..verts_per_side {
        for x in 0..verts_per_side {
            vertices.push(Vec3::new(x as f32 / n as f32, 0.0, z as f32 / n as f32));
        }
    }

    let mut faces = Vec::with_capacity(n * n * 2);
    for z in 0..n {
        for x in 0..n {
            let tl = (z * verts_per_side + x) as u32;
            let tr = tl + 1;
            let bl = tl + verts_per_side as u32;
            let br = bl + 1;
            faces.push([tl, bl, tr]);
            faces.push([tr, bl, br]);
        }
    }
    Mesh::new(vertices, faces)
}

fn bench_snap(c: &mut Criterion) {
    // 20K triangles, brute-force closest point
    let mesh = make_grid(100);
    let p = Vec3::new(0.37, 0.25, 0.81);

    c.bench_function("snap_to_surface_20k", |b| {
        b.iter(|| snap_to_surface(p, &mesh));
    });
}

fn bench_geodesic(c: &mut Criterion) {
    let mesh = make_grid(100);
    let from = Vec3::new(0.0, 0.0, 0.0);
    let to = Vec3::new(1.0, 0.0, 1.0);

    c.bench_function("surface_distance_corner_to_corner_20k", |b| {
        b.iter(|| surface_distance(from, to, &mesh));
    });
}

fn bench_coverage(c: &mut Criterion) {
    let mesh = make_grid(50);

    c.bench_function("coverage_update_mesh_5k", |b| {
        b.iter(|| {
            let mut analyzer = CoverageAnalyzer::new(CoverageConfig::default());
            analyzer.start().unwrap();
            analyzer.update_with_mesh(&mesh, Some(Vec3::new(0.5, 1.5, 0.5)));
            analyzer.statistics()
        });
    });
}

criterion_group!(benches, bench_snap, bench_geodesic, bench_coverage);
criterion_main!(benches);
