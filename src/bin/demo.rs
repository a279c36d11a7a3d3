use argh::FromArgs;

use torrent_msm::{
    testing::{combine, harness_pairs},
    Config, Engine,
};

#[derive(FromArgs)]
/// Drive the accumulation engine against the reference model.
struct Args {
    /// log2 number of pairs
    #[argh(positional)]
    size: u8,

    /// scalar width in bits
    #[argh(option, default = "16")]
    scalar_bits: usize,

    /// window width in bits
    #[argh(option, default = "4")]
    window_bits: usize,

    /// rng seed
    #[argh(option, default = "0")]
    seed: u64,

    /// share one multiplier across paired multiplies
    #[argh(switch)]
    arbitrated: bool,

    /// verbose output
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn main() {
    let args: Args = argh::from_env();

    let cfg = Config {
        scalar_bits: args.scalar_bits,
        window_bits: args.window_bits,
        arbitrated_mul: args.arbitrated,
        ..Config::default()
    };
    let mut engine = match Engine::new(cfg.clone()) {
        Ok(engine) => engine,
        Err(fault) => {
            eprintln!("configuration fault: {}", fault);
            std::process::exit(2);
        }
    };
    if args.verbose {
        println!(
            "{} windows, pipeline latency {}",
            cfg.num_windows(),
            cfg.latency()
        );
    }

    let (pairs, expected) = harness_pairs(&cfg, 1 << args.size, args.seed);
    let results = engine.accumulate(&pairs).unwrap();
    let total = combine(&cfg, &results);

    if args.verbose {
        println!("{:?}", engine.stats());
    }

    if total == expected {
        println!("\n==> SUCCESS <==");
    } else {
        println!("\n==> FAILURE <==");
        std::process::exit(1);
    }
}
