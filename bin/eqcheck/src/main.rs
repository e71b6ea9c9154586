use std::{
    ffi::OsString,
    fs::File,
    io::{self, BufReader},
    num::NonZeroU64,
    path::{Path, PathBuf},
    time::Duration,
};

use itertools::Itertools;
use mealy_learning::{
    active::{DEFAULT_BATCH_SIZE, DEFAULT_BOUND, DEFAULT_POOL_SIZE},
    prelude::*,
};
use owo_colors::OwoColorize;
use thiserror::Error;
use tracing::{debug, error, info, trace};
use tracing_subscriber::{filter, prelude::*};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

#[derive(Debug, Error)]
enum CheckError {
    #[error("unable to open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("unable to read a Mealy machine from {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: DotParseError,
    },
    #[error("unable to start membership query workers: {0}")]
    Workers(io::Error),
    #[error(transparent)]
    Alphabets(#[from] NoAlphabets),
    #[error("equivalence check failed in stage {}: {0}", .0.stage())]
    Equivalence(#[from] EquivalenceError),
    #[error("unable to write to stdout: {0}")]
    Output(io::Error),
    #[error("missing argument --{0}")]
    MissingArgument(&'static str),
}

fn alphabet_arg() -> Arg {
    Arg::new("alphabet")
        .short('a')
        .long("alphabet")
        .action(ArgAction::Append)
        .value_name("SYMBOLS")
        .help("comma separated input symbols, may be given multiple times to search over several alphabets in order")
}

fn cli() -> clap::Command {
    Command::new("eqcheck")
    .about("Searches for counterexamples to a Mealy machine hypothesis with an external test generator")
    .subcommand_required(true)
    .arg(
        Arg::new("verbosity")
        .short('v')
        .long("verbosity")
        .num_args(0..=1)
        .require_equals(true)
        .value_parser(["info", "debug", "trace"])
        .default_missing_value("info")
    )
    .subcommand(
        Command::new("check")
        .about("compares a hypothesis against a system given as DOT file, using the words produced by the generator as tests")
        .arg(Arg::new("sut").long("sut").required(true).value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("hypothesis").long("hypothesis").required(true).value_parser(value_parser!(PathBuf)))
        .arg(alphabet_arg())
        .arg(
            Arg::new("bound")
            .long("bound")
            .value_parser(value_parser!(NonZeroU64))
            .help("number of tests the generator may produce in the first attempt")
        )
        .arg(
            Arg::new("max-bound")
            .long("max-bound")
            .value_parser(value_parser!(u64))
            .help("give up once the bound grows beyond this value instead of searching indefinitely")
        )
        .arg(
            Arg::new("workers")
            .long("workers")
            .value_parser(value_parser!(usize))
            .help("number of threads answering membership queries [default: 4]")
        )
        .arg(
            Arg::new("batch-size")
            .long("batch-size")
            .value_parser(value_parser!(usize))
            .help("number of queries handed to a worker at once [default: 5]")
        )
        .arg(
            Arg::new("close-input")
            .long("close-input")
            .action(ArgAction::SetTrue)
            .help("close the generator's stdin once the hypothesis has been written")
        )
        .arg(
            Arg::new("grace-ms")
            .long("grace-ms")
            .value_parser(value_parser!(u64))
            .default_value("1000")
            .help("how long the generator may take to exit after its output ended")
        )
        .arg(Arg::new("generator").long("generator").required(true).value_parser(value_parser!(OsString)))
        .arg(Arg::new("args").num_args(0..).last(true).value_parser(value_parser!(OsString)))
    )
    .subcommand(
        Command::new("dot")
        .about("prints the DOT description of a Mealy machine as it is sent to the generator")
        .arg(Arg::new("file").required(true).value_parser(value_parser!(PathBuf)))
        .arg(alphabet_arg())
    )
}

fn setup_logging(matches: &ArgMatches) {
    let level = match matches
        .try_get_one::<String>("verbosity")
        .ok()
        .flatten()
        .map(|m| m.as_str())
    {
        Some("trace") => filter::LevelFilter::TRACE,
        Some("debug") => filter::LevelFilter::DEBUG,
        Some("info") => filter::LevelFilter::INFO,
        _ => filter::LevelFilter::INFO,
    };

    let stderr_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(stderr_log.with_filter(level))
        .init();

    trace!("setup {level} logging");
}

fn argument<'a, T: Clone + Send + Sync + 'static>(
    matches: &'a ArgMatches,
    id: &'static str,
) -> Result<&'a T, CheckError> {
    matches
        .get_one::<T>(id)
        .ok_or(CheckError::MissingArgument(id))
}

fn load(path: &Path) -> Result<MealyMachine, CheckError> {
    let file = File::open(path).map_err(|source| CheckError::Open {
        path: path.to_owned(),
        source,
    })?;
    let mm = MealyMachine::from_dot(BufReader::new(file)).map_err(|source| CheckError::Parse {
        path: path.to_owned(),
        source,
    })?;
    debug!("read Mealy machine with {} states from {}", mm.size(), path.display());
    Ok(mm)
}

/// Each occurrence of `--alphabet` gives one alphabet. Without any, the alphabet of
/// `fallback` is used.
fn alphabets(matches: &ArgMatches, fallback: &MealyMachine) -> Vec<Alphabet> {
    match matches.get_many::<String>("alphabet") {
        Some(values) => values
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect::<Alphabet>()
            })
            .collect(),
        None => vec![fallback.alphabet().clone()],
    }
}

fn check(matches: &ArgMatches) -> Result<(), CheckError> {
    let sut = load(argument::<PathBuf>(matches, "sut")?)?;
    let hypothesis = load(argument::<PathBuf>(matches, "hypothesis")?)?;
    let alphabets = alphabets(matches, &sut);

    let workers = matches
        .get_one::<usize>("workers")
        .copied()
        .unwrap_or(DEFAULT_POOL_SIZE);
    let batch_size = matches
        .get_one::<usize>("batch-size")
        .copied()
        .unwrap_or(DEFAULT_BATCH_SIZE);
    let parallel = ParallelOracle::new(workers, batch_size, || SimulatorOracle::new(sut.clone()))
        .map_err(CheckError::Workers)?;
    let testing = CountingOracle::new(parallel, "testing");
    let counter = testing.counter().clone();

    let command = GeneratorCommand::new(argument::<OsString>(matches, "generator")?)
    .args(matches.get_many::<OsString>("args").into_iter().flatten());
    let config = SubprocessConfig::new(command)
        .with_close_input(matches.get_flag("close-input"))
        .with_exit_grace(Duration::from_millis(
            *argument::<u64>(matches, "grace-ms")?,
        ));

    let bound = matches
        .get_one::<NonZeroU64>("bound")
        .copied()
        .unwrap_or(DEFAULT_BOUND);
    let mut oracle =
        AdaptiveOracle::new(alphabets, SubprocessOracle::new(config, testing))?.with_bound(bound);
    info!(
        "searching over {} with initial bound {bound}",
        oracle.alphabets().iter().join(", ")
    );

    let found = match matches.get_one::<u64>("max-bound") {
        None => oracle.find_counterexample(&hypothesis, hypothesis.alphabet())?,
        Some(&max) => loop {
            if let Some(ce) = oracle.search_round(&hypothesis)? {
                break Some(ce);
            }
            if oracle.state().bound() > max {
                info!("giving up, bound {} exceeds {max}", oracle.state().bound());
                break None;
            }
        },
    };

    match &found {
        Some(ce) => {
            let predicted = hypothesis
                .transform(&ce.input)
                .map(|w| w.to_string())
                .unwrap_or_else(|| "undefined".to_string());
            println!("{}", "counterexample found".red().bold());
            println!("  input:      {}", ce.input);
            println!("  system:     {}", ce.output.green());
            println!("  hypothesis: {}", predicted.red());
        }
        None => println!("{}", "no counterexample".green().bold()),
    }
    println!("{}", statistics(&counter.counts(), oracle.state()));
    Ok(())
}

fn statistics(counts: &QueryCounts, state: SearchState) -> String {
    let mut builder = tabled::builder::Builder::default();
    builder.push_record([String::new(), "value".to_string()]);
    builder.push_record(["queries".to_string(), counts.queries.to_string()]);
    builder.push_record(["symbols".to_string(), counts.symbols.to_string()]);
    builder.push_record(["bound".to_string(), state.bound().to_string()]);
    builder.push_record(["alphabet".to_string(), state.alphabet_index().to_string()]);
    builder
        .build()
        .with(tabled::settings::Style::rounded())
        .to_string()
}

fn dot(matches: &ArgMatches) -> Result<(), CheckError> {
    let mm = load(argument::<PathBuf>(matches, "file")?)?;
    for alphabet in alphabets(matches, &mm) {
        mm.write_dot(&alphabet, io::stdout().lock())
            .map_err(CheckError::Output)?;
    }
    Ok(())
}

pub fn main() {
    let matches = cli().get_matches();

    setup_logging(&matches);

    let outcome = match matches.subcommand() {
        Some(("check", sub_matches)) => check(sub_matches),
        Some(("dot", sub_matches)) => dot(sub_matches),
        _ => unreachable!(),
    };

    if let Err(e) = outcome {
        error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use mealy_learning::prelude::*;

    use super::{alphabets, cli, statistics};

    #[test]
    fn cli_is_consistent() {
        cli().debug_assert();
    }

    #[test_log::test]
    fn generator_arguments_follow_the_separator() {
        let matches = cli()
            .try_get_matches_from([
                "eqcheck", "check", "--sut", "s.dot", "--hypothesis", "h.dot", "--generator",
                "./generator", "--close-input", "--", "--depth", "3",
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert!(sub.get_flag("close-input"));
        assert_eq!(
            sub.get_many::<OsString>("args").unwrap().collect::<Vec<_>>(),
            vec!["--depth", "3"]
        );
    }

    #[test_log::test]
    fn alphabets_are_taken_in_order() {
        let sut = MealyMachine::builder()
            .with_transitions([(0, "a", "x", 0), (0, "b", "y", 0), (0, "c", "z", 0)])
            .into_mealy(0);
        let matches = cli()
            .try_get_matches_from(["eqcheck", "dot", "s.dot", "-a", "b, a", "--alphabet=c"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(
            alphabets(sub, &sut),
            vec![
                ["b", "a"].into_iter().collect::<Alphabet>(),
                ["c"].into_iter().collect::<Alphabet>()
            ]
        );

        let matches = cli()
            .try_get_matches_from(["eqcheck", "dot", "s.dot"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(alphabets(sub, &sut), vec![sut.alphabet().clone()]);
    }

    #[test_log::test]
    fn statistics_table_lists_counts() {
        let table = statistics(
            &QueryCounts {
                queries: 12,
                symbols: 40,
            },
            SearchState::default(),
        );
        assert!(table.contains("queries"));
        assert!(table.contains("40"));
        assert!(table.contains("100"));
    }
}
