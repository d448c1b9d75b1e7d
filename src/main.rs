use std::env;
use std::fs;
use std::process;

use timemark::{Placement, TimelineMapper};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: timemark <score.yaml>");
        process::exit(1);
    }
    let input_path = &args[1];

    // Read input file
    let source = match fs::read_to_string(input_path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", input_path, e);
            process::exit(1);
        }
    };

    let score = match timemark::load(&source) {
        Ok(score) => score,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Some(title) = &score.title {
        println!("{}", title);
    }
    println!(
        "{} measures, {:.3}s",
        score.measure_count(),
        score.timeline().duration()
    );

    for marker in score.time_markers() {
        let seconds = marker.time_location_seconds();
        let tick = score.timeline().utick_to_tick(score.timeline().time_to_tick(seconds));
        let status = if marker.needs_relocation() { " (unplaced)" } else { "" };

        let measure = marker
            .placement()
            .and_then(|placement| match placement {
                Placement::Segment(id) => score.segment(id).map(|s| s.measure()),
                Placement::Measure(id) => Some(id),
            })
            .and_then(|id| score.measure_number(id));
        let measure = measure.map_or_else(|| "-".to_string(), |n| n.to_string());

        let extent = marker.page_extent(&score);
        println!(
            "{:>8.3}s  tick {:>6}  m. {:>3}  [{:.1}, {:.1}, {:.1}, {:.1}]  {}{}",
            seconds,
            tick,
            measure,
            extent.x0,
            extent.y0,
            extent.x1,
            extent.y1,
            marker.text(),
            status
        );
    }
}
