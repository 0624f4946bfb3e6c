use criterion::{black_box, criterion_group, criterion_main, Criterion};
use criterion::measurement::WallTime;
use std::collections::BTreeMap;

use ramps::model_checking::color_product::double_by_color;
use ramps::model_checking::value_iteration::value_iteration;
use ramps::{ParityMDP, SolverConfig, SweepMode, Transition, MDP};

enum Grid {
    SMALL,
    MEDIUM,
    LARGE
}

/// Square grid where every move succeeds with probability 0.8 and otherwise stays put. The far corner has
/// colour 2, the diagonal cells colour 1 and a column of traps colour 3.
fn setup(grid: Grid) -> ParityMDP {
    let w: usize = match grid {
        Grid::SMALL => 10,
        Grid::MEDIUM => 30,
        Grid::LARGE => 60
    };
    let n = w * w;
    let actions: Vec<String> = vec!["north", "south", "east", "west"].into_iter().map(|x| x.to_string()).collect();
    let moves: [(i64, i64); 4] = [(0, -1), (0, 1), (1, 0), (-1, 0)];
    let mut transitions: Vec<Vec<Transition>> = vec![Vec::new(); n];
    for s in 0..n {
        let (x, y) = ((s % w) as i64, (s / w) as i64);
        for (a, (dx, dy)) in moves.iter().enumerate() {
            let (nx, ny) = (x + dx, y + dy);
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= w as i64 {
                continue;
            }
            let d = ny as usize * w + nx as usize;
            transitions[s].push(Transition::new(a, &[(d, 0.8), (s, 0.2)]));
        }
    }
    let states: Vec<(usize, u32)> = (0..n)
        .map(|s| {
            let (x, y) = (s % w, s / w);
            let color = if s == n - 1 {
                2
            } else if x == w / 2 && y > 0 && y < w - 1 {
                3
            } else if x == y {
                1
            } else {
                0
            };
            (s, color)
        })
        .collect();
    let base = MDP::new(actions, transitions.clone(), Some(0));
    ParityMDP::new(&base, &states, transitions, None)
}

pub fn value_iteration_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let pmdp = setup(Grid::LARGE);
    let graph = double_by_color(&pmdp, 2);
    let fixed: BTreeMap<usize, f64> = vec![(pmdp.num_states() - 1, 1.0)].into_iter().collect();
    let double_buffered = SolverConfig { epsilon: 1e-4, ..SolverConfig::default() };
    let in_place = SolverConfig { sweep: SweepMode::InPlace, ..double_buffered };

    c.bench_function("value iteration double buffered", |b|
        b.iter(|| value_iteration(black_box(&graph.transitions), &fixed, &double_buffered)));
    c.bench_function("value iteration in place", |b|
        b.iter(|| value_iteration(black_box(&graph.transitions), &fixed, &in_place)))
}

pub fn probe_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let small = setup(Grid::SMALL);
    let medium = setup(Grid::MEDIUM);
    let config = SolverConfig::default();

    c.bench_function("probe 10x10", |b|
        b.iter(|| small.compute_ra_policy(black_box(0.5), &config)));
    c.bench_function("probe 30x30", |b|
        b.iter(|| medium.compute_ra_policy(black_box(0.5), &config)))
}

criterion_group!(benches, value_iteration_benchmark, probe_benchmark);
criterion_main!(benches);
