use std::time::Instant;

use signal_sim::math::Point2d;
use signal_sim::{Comparison, Network, PanelMetrics, SimulationConfig, SpawnError};

/// The spacing between neighbouring junctions of the grid.
const BLOCK: f64 = 250.0;
const STREET_WIDTH: f64 = 20.0;
const FRAME: f64 = 0.05;
const SPAWN_INTERVAL: f64 = 2.0;
const MINUTES: usize = 10;

/// A 2×2 grid of four-way junctions, with a parking lot at the end of every outer street.
fn grid() -> Network {
    let mut net = Network::new();
    let mut junctions = [[None; 2]; 2];
    for (i, row) in junctions.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            let pos = Point2d::new(j as f64 * BLOCK, i as f64 * BLOCK);
            *cell = Some(net.add_location(&format!("junction {}{}", i, j), pos));
        }
    }
    let junction = |i: usize, j: usize| junctions[i][j].unwrap();

    for i in 0..2 {
        net.add_street("avenue", junction(i, 0), junction(i, 1), STREET_WIDTH)
            .unwrap();
        net.add_street("road", junction(0, i), junction(1, i), STREET_WIDTH)
            .unwrap();
    }

    for i in 0..2 {
        for j in 0..2 {
            let centre = net.location(junction(i, j)).unwrap().pos();
            let outward = [
                (if j == 0 { -1.0 } else { 1.0 }, 0.0),
                (0.0, if i == 0 { -1.0 } else { 1.0 }),
            ];
            for (dx, dy) in outward {
                let pos = Point2d::new(centre.x + dx * BLOCK, centre.y + dy * BLOCK);
                let lot = net.add_location("parking", pos);
                net.add_street("access", lot, junction(i, j), STREET_WIDTH)
                    .unwrap();
            }
        }
    }
    net
}

fn print_panel(name: &str, m: &PanelMetrics) {
    println!(
        "  {:<8} vehicles {:>3}  trips {:>4}  stops/veh {:>5.2}  \
         waiting {:>8.1} s  speed {:>5.2}  street time {:>5.2} s",
        name,
        m.vehicles,
        m.trips_completed,
        m.stops_per_vehicle,
        m.time_waiting,
        m.average_speed,
        m.average_travel_time,
    );
}

fn main() {
    let config = SimulationConfig {
        seed: Some(1),
        ..Default::default()
    };
    let mut cmp = Comparison::new(grid(), config);

    println!("Simulating...");
    let start = Instant::now();
    let frames_per_minute = (60.0 / FRAME) as usize;
    let spawn_every = (SPAWN_INTERVAL / FRAME) as usize;

    let mut blocked = 0;
    for minute in 1..=MINUTES {
        for frame in 0..frames_per_minute {
            if frame % spawn_every == 0 {
                match cmp.spawn_random() {
                    Ok(_) => {}
                    Err(SpawnError::Blocked { .. }) => blocked += 1,
                    Err(err) => println!("spawn failed: {}", err),
                }
            }
            cmp.step(FRAME);
        }
        let metrics = cmp.metrics();
        println!(
            "After {} min ({:?} elapsed, {} spawns blocked):",
            minute,
            start.elapsed(),
            blocked
        );
        print_panel("fixed", &metrics.fixed);
        print_panel("adaptive", &metrics.adaptive);
    }
}
