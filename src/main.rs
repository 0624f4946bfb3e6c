use std::fs::File;
use std::io::{self, Write};
use std::str::FromStr;

use clap::{clap_app, App, ArgMatches};
use petgraph::dot::Dot;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ramps::model_checking::search::{write_probes, DEFAULT_SEGMENTS};
use ramps::model_checking::simulate::Simulator;
use ramps::{print_policy, read_input, search, ActionRecording, RampsError, Result, SearchConfig, SearchSegment, SweepMode};

fn app<'a, 'b>() -> App<'a, 'b> {
    clap_app!(ramps =>
        (version: "0.1")
        (about: "Risk-aware finite-memory strategy synthesis for MDPs with parity objectives")
        (@arg PREFIX: +required "Input file prefix. Reads <PREFIX>.tra and <PREFIX>.parity, and <PREFIX>.sta and \
        <PREFIX>.lab when present")
        (@arg SES: --ses [SPEC] default_value(DEFAULT_SEGMENTS) "Comma separated search segments: \
        b:<tolerance>:<epsilon> - binary search
        i:<step>:<epsilon> - incremental search
        ")
        (@arg MIN: --min [QUALITY] default_value("0.0") "Initial lower bound on the quality")
        (@arg MAX: --max [QUALITY] default_value("1.0") "Initial upper bound on the quality")
        (@arg EAGER: --strategyStoringValueIteration "Record the best action in every value iteration sweep")
        (@arg SWEEP: --sweep [MODE] possible_values(&["double-buffered", "in-place"]) default_value("double-buffered")
            "Value iteration sweep: double-buffered is reproducible, in-place updates a shared vector")
        (@arg DOT: --dot [FILE] "Write the parity MDP as a graphviz file")
        (@arg PROBES: --probes [FILE] "Write the probe history as csv")
        (@arg SIMULATE: --simulate [STEPS] "Simulate the synthesised strategy for STEPS moves")
        (@arg SEED: --seed [N] default_value("0") "Seed of the simulation")
        (@arg VERBOSE: -v --verbose [VERBOSITY] default_value("0") "Level of verbosity \
        0 - warnings
        1 - probes
        2 - algorithm debugging
        3 - value iteration sweeps
        ")
    )
}

fn main() {
    let matches = app().get_matches();
    let verbose: u32 = match parse_arg(&matches, "VERBOSE") {
        Ok(x) => x.unwrap_or(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(verbose);
    if let Err(e) = run(&matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u32) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Everything the command line configures besides logging.
#[derive(Debug, Clone, PartialEq)]
struct Options {
    prefix: String,
    search: SearchConfig,
    dot: Option<String>,
    probes: Option<String>,
    simulate: Option<usize>,
    seed: u64
}

fn options(matches: &ArgMatches) -> Result<Options> {
    let prefix = matches.value_of("PREFIX")
        .ok_or_else(|| RampsError::Usage("missing input file prefix".to_string()))?;
    let segments = SearchSegment::parse_list(matches.value_of("SES").unwrap_or(DEFAULT_SEGMENTS))?;
    let min_quality: f64 = parse_arg(matches, "MIN")?.unwrap_or(0.0);
    let max_quality: f64 = parse_arg(matches, "MAX")?.unwrap_or(1.0);
    let mut search = SearchConfig::new(segments, min_quality, max_quality)?;
    if matches.is_present("EAGER") {
        search.recording = ActionRecording::Eager;
    }
    if matches.value_of("SWEEP") == Some("in-place") {
        search.sweep = SweepMode::InPlace;
    }
    Ok(Options {
        prefix: prefix.to_string(),
        search,
        dot: matches.value_of("DOT").map(|x| x.to_string()),
        probes: matches.value_of("PROBES").map(|x| x.to_string()),
        simulate: parse_arg(matches, "SIMULATE")?,
        seed: parse_arg(matches, "SEED")?.unwrap_or(0)
    })
}

fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    match matches.value_of(name) {
        Some(x) => x.parse::<T>()
            .map(Some)
            .map_err(|_| RampsError::Usage(format!("invalid value '{}' for {}", x, name))),
        None => Ok(None)
    }
}

fn create_file(path: &str) -> Result<File> {
    File::create(path).map_err(|source| RampsError::Io { path: path.to_string(), source })
}

fn run(matches: &ArgMatches) -> Result<()> {
    let opts = options(matches)?;
    let (mdp, pmdp) = read_input(&opts.prefix)?;
    info!(states = pmdp.num_states(), nof_colors = pmdp.nof_colors, "read parity MDP {}", opts.prefix);
    if let Some(initial) = mdp.initial {
        if pmdp.base[0] != initial {
            warn!("parity state 0 maps to base state {} but the base initial state is {}", pmdp.base[0], initial);
        }
    }

    if let Some(path) = opts.dot.as_ref() {
        let dot = format!("{}", Dot::new(&pmdp.generate_graph()));
        create_file(path)?
            .write_all(dot.as_bytes())
            .map_err(|source| RampsError::Io { path: path.to_string(), source })?;
    }

    let outcome = search(&pmdp, &opts.search)?;
    if let Some(path) = opts.probes.as_ref() {
        write_probes(&outcome.probes, create_file(path)?)?;
    }

    let stdout = io::stdout();
    let to_stdout = |source| RampsError::Io { path: "<stdout>".to_string(), source };
    match outcome.best.as_ref() {
        Some(best) => {
            print_policy(&pmdp, &best.strategy, stdout.lock()).map_err(to_stdout)?;
            eprintln!("Quality: {}", best.quality);
            if let Some(steps) = opts.simulate {
                let mut rng = StdRng::seed_from_u64(opts.seed);
                for step in Simulator::new(&pmdp, &best.strategy).run(steps, &mut rng) {
                    info!(
                        state = step.s,
                        base = pmdp.base[step.s],
                        memory = step.memory,
                        action = pmdp.action_name(step.s, step.action).unwrap_or("?"),
                        "simulation step"
                    );
                }
            }
        }
        None => {
            writeln!(stdout.lock(), "0").map_err(to_stdout)?;
            eprintln!("No strategy reaches quality {}", opts.search.min_quality);
        }
    }
    Ok(())
}
