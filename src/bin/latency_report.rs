use clap::Parser;
use collar_lob::{CountingSink, InstrumentConfig, MatchingLoop, OrderRequest, SharedClock, Side};
use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

/// Per-request latency of a single book driven synchronously.
#[derive(Parser, Debug)]
#[command(name = "latency-report")]
#[command(about = "Measure per-request matching latency", long_about = None)]
struct Args {
    /// Requests to time
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    iterations: u32,

    /// Collar span in ticks
    #[arg(long, default_value_t = 1_000)]
    limits_per_book: u32,

    /// Orders one price level must hold
    #[arg(long, default_value_t = 2_560)]
    orders_per_limit: u32,

    /// Center price of the generated flow
    #[arg(long, default_value_t = 10_000)]
    mid: i32,

    /// Half-width of the generated price band
    #[arg(long, default_value_t = 50)]
    band: i32,

    /// Every Nth request is a market order (0 = none)
    #[arg(long, default_value_t = 10)]
    market_every: u32,

    /// Pin to the last CPU core
    #[arg(long, default_value_t = false)]
    pin: bool,

    #[arg(short = 'l', long, default_value = "warn", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Deterministic request flow around `mid`.
fn request(args: &Args, order_id: u32) -> OrderRequest {
    let side = if order_id % 2 == 0 { Side::Bid } else { Side::Ask };
    let quantity = 1 + (order_id % 20) as u16;
    let id = order_id as i32;

    if args.market_every != 0 && order_id % args.market_every == 0 {
        return OrderRequest::market(side, quantity, id);
    }

    // Spread prices over the band; asks skew up, bids down
    let offset = ((order_id.wrapping_mul(7919)) % (args.band as u32 + 1)) as i32;
    let price = match side {
        Side::Bid => args.mid - offset + args.band / 4,
        Side::Ask => args.mid + offset - args.band / 4,
    };
    OrderRequest::limit(side, price.max(1), quantity, id)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level);

    println!("Preparing Latency Benchmark...");

    if args.pin {
        if let Some(core) = core_affinity::get_core_ids().and_then(|ids| ids.last().copied()) {
            core_affinity::set_for_current(core);
        }
    }

    let config = InstrumentConfig::new("BENCH", 0, args.limits_per_book, args.orders_per_limit);
    let mut engine = MatchingLoop::new(&config, SharedClock::system())?;
    engine.warm_up();
    let mut sink = CountingSink::default();

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 1_000_000, 3)?;

    println!("Running {} iterations...", args.iterations);

    let mut total_duration = Duration::ZERO;
    for order_id in 1..=args.iterations {
        let req = request(&args, order_id);

        // Critical measurement section
        let start = Instant::now();
        std::hint::black_box(engine.step(&req, &mut sink)?);
        let elapsed = start.elapsed();

        // Saturate outliers instead of failing the run
        histogram.saturating_record(elapsed.as_nanos() as u64);
        total_duration += elapsed;
    }

    let stats = engine.stats();
    let pools = engine.book().pool_stats();

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", args.iterations);
    println!("Throughput: {:.2} ops/sec", args.iterations as f64 / total_duration.as_secs_f64());
    println!("---------------------------");
    println!("Min:    {:6} ns", histogram.min());
    println!("P50:    {:6} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:6} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:6} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:6} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:6} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:6} ns", histogram.max());
    println!("---------------------------");
    println!("Fills:       {}", stats.fills);
    println!("Rejections:  {}", stats.rejections);
    println!("Prunes:      {} ({} levels)", stats.prunes, stats.pruned_levels);
    println!("Levels:      {}/{}", pools.levels_in_use, pools.level_capacity);
    println!("Chunks:      {}/{}", pools.chunks_in_use, pools.chunk_capacity);
    println!(
        "Best:        {} / {}",
        engine.book().best_bid(),
        engine.book().best_ask()
    );

    println!("\nDistribution:");
    for v in histogram.iter_log(100, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:8} ns: {:10} count", v.value_iterated_to(), count);
        }
    }

    Ok(())
}
