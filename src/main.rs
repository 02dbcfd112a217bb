use clap::Parser;
use colored::*;
use imgtile::args::{validate_args, Args};
use imgtile::tile_processing::TileResult;
use imgtile::{debug_logging, logging, tile_data, tile_processing};

fn print_banner() {
    let version: &str = env!("CARGO_PKG_VERSION");
    println!(
        r#"
        ▀█▀ █▀▄▀█ █▀▀ ▀█▀ █ █   █▀▀
         █  █ ▀ █ █ █  █  █ █   █▀▀
        ▀▀▀ ▀   ▀ ▀▀▀  ▀  ▀ ▀▀▀ ▀▀▀

                version {}
        "#,
        version.bright_white().bold()
    );
}

fn print_summary(results: &[TileResult]) {
    for result in results {
        let shapes: Vec<String> = result
            .levels
            .iter()
            .map(|l| format!("{}@{}", l.shapes.len(), l.resolution))
            .collect();
        println!(
            "{} shapes {}, roads {}, restrictions {}, merged {}, overlaps removed {}",
            result.name.bold(),
            shapes.join(" "),
            result.roads.len(),
            result.restrictions.len(),
            result.stats.merge.merged,
            result.stats.overlaps.removed
        );
        if result.stats.multipolygons_failed > 0 {
            println!(
                "  {} {} multipolygon(s) could not be cut",
                "Warning:".yellow().bold(),
                result.stats.multipolygons_failed
            );
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    validate_args(args)?;
    let config = args.to_config();

    println!("{} Reading tiles...", "[1/4]".bold());
    let tiles = tile_data::read_tile_dump(&args.input)?;
    println!("  {} tile(s) in {}", tiles.len(), args.input.display());

    println!("{} Processing tiles...", "[2/4]".bold());
    let results = tile_processing::process_tiles(tiles, &config);

    println!("{} Writing results...", "[3/4]".bold());
    match &args.output {
        Some(path) => tile_data::write_results(path, &results)?,
        None => print_summary(&results),
    }

    println!("{} Done.", "[4/4]".bold());
    Ok(())
}

fn main() {
    print_banner();

    let args: Args = Args::parse();
    logging::init(args.debug);

    let outcome = run(&args);
    debug_logging::write_debug_log();

    if let Err(e) = outcome {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
