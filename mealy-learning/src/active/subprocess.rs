use std::{
    ffi::OsString,
    fmt::Display,
    io::{self, BufRead, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use itertools::Itertools;
use mealy_core::prelude::*;
use tracing::{debug, info_span, trace, warn};

use super::{Counterexample, EquivalenceError, MembershipOracle, ProtocolViolation, Query};

mod drain;
use drain::ErrorDrain;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// The external program that generates test words, given as executable and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl GeneratorCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: Into<OsString>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl Display for GeneratorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "`{}`",
            std::iter::once(&self.program)
                .chain(&self.args)
                .map(|s| s.to_string_lossy())
                .join(" ")
        )
    }
}

/// Configuration of a [`SubprocessOracle`].
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    pub command: GeneratorCommand,
    /// Close the input of the generator once the hypothesis is written. By default it
    /// stays open until the attempt is over.
    pub close_input: bool,
    /// How long to wait for the generator to exit after it closed its output.
    pub exit_grace: Duration,
    /// How long teardown waits for the diagnostic drain to finish.
    pub drain_timeout: Duration,
}

impl SubprocessConfig {
    pub fn new(command: GeneratorCommand) -> Self {
        Self {
            command,
            close_input: false,
            exit_grace: Duration::from_secs(1),
            drain_timeout: Duration::from_millis(10),
        }
    }

    pub fn with_close_input(mut self, close_input: bool) -> Self {
        self.close_input = close_input;
        self
    }

    pub fn with_exit_grace(mut self, exit_grace: Duration) -> Self {
        self.exit_grace = exit_grace;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

/// Result of a single search attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The system disagreed with the hypothesis on a tested word.
    Counterexample(Counterexample),
    /// More than `bound` words were offered, the attempt was abandoned.
    BoundExceeded,
    /// The generator finished regularly after `tested` words without a discrepancy.
    Exhausted { tested: u64 },
}

/// Everything that belongs to one running generator. Dropping it closes all streams,
/// terminates the process if it still runs and joins the diagnostic drain.
struct Attempt {
    child: Child,
    input: Option<ChildStdin>,
    output: Option<BufReader<ChildStdout>>,
    drain: Option<ErrorDrain>,
    drain_timeout: Duration,
}

impl Attempt {
    fn launch(config: &SubprocessConfig) -> Result<Self, EquivalenceError> {
        let launch_error = |source: io::Error| EquivalenceError::Launch {
            command: config.command.to_string(),
            source,
        };
        let mut child = config.command.command().spawn().map_err(launch_error)?;
        debug!("started external program {} with pid {}", config.command, child.id());

        let input = child.stdin.take();
        let output = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take();
        // from here on, dropping `attempt` cleans up after the child
        let mut attempt = Self {
            child,
            input,
            output,
            drain: None,
            drain_timeout: config.drain_timeout,
        };
        if let Some(stderr) = stderr {
            let drain = ErrorDrain::spawn(stderr, "generator".into()).map_err(launch_error)?;
            attempt.drain = Some(drain);
        }
        Ok(attempt)
    }

    fn write_hypothesis(
        &mut self,
        hypothesis: &MealyMachine,
        inputs: &Alphabet,
        close: bool,
    ) -> Result<(), EquivalenceError> {
        let Some(input) = self.input.as_mut() else {
            return Err(EquivalenceError::Communication(io::ErrorKind::BrokenPipe.into()));
        };
        hypothesis
            .write_dot(inputs, io::BufWriter::new(input))
            .map_err(EquivalenceError::Communication)?;
        if close {
            self.input.take();
        }
        Ok(())
    }

    fn next_line(&mut self, buf: &mut String) -> Result<bool, EquivalenceError> {
        let Some(output) = self.output.as_mut() else {
            return Ok(false);
        };
        buf.clear();
        let read = output
            .read_line(buf)
            .map_err(EquivalenceError::Communication)?;
        Ok(read > 0)
    }

    /// Polls for the exit status until the process ended or `grace` elapsed.
    fn wait_for_exit(&mut self, grace: Duration) -> Result<Option<ExitStatus>, EquivalenceError> {
        let start = Instant::now();
        loop {
            if let Some(status) = self
                .child
                .try_wait()
                .map_err(EquivalenceError::Communication)?
            {
                return Ok(Some(status));
            }
            if start.elapsed() >= grace {
                return Ok(None);
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn teardown(&mut self) {
        self.input.take();
        self.output.take();
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                trace!("terminating external program {}", self.child.id());
                if let Err(e) = self.child.kill() {
                    warn!("could not terminate external program: {e}");
                }
                if let Err(e) = self.child.wait() {
                    warn!("could not reap external program: {e}");
                }
            }
            Err(e) => warn!("could not query state of external program: {e}"),
        }
        if let Some(drain) = self.drain.take() {
            drain.join(self.drain_timeout);
        }
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Uses an external program to find counterexamples. The hypothesis is written to the
/// standard input of the program in DOT format, the program then writes test words to
/// its standard output, one per line with symbols separated by whitespace. Every word is
/// run on the system under learning and on the hypothesis, the first disagreement is a
/// counterexample. If the program ends regularly, with exit code zero, then no
/// counterexample exists for the tests it produced.
///
/// A new process is started for every call of [`SubprocessOracle::search`] and torn down
/// before the call returns, whatever the outcome.
pub struct SubprocessOracle<M> {
    config: SubprocessConfig,
    sul: M,
}

impl<M: MembershipOracle> SubprocessOracle<M> {
    pub fn new(config: SubprocessConfig, sul: M) -> Self {
        Self { config, sul }
    }

    pub fn config(&self) -> &SubprocessConfig {
        &self.config
    }

    pub fn sul(&self) -> &M {
        &self.sul
    }

    /// Runs one attempt, testing at most `bound` words generated for `hypothesis`
    /// restricted to `inputs`.
    pub fn search(
        &self,
        hypothesis: &MealyMachine,
        inputs: &Alphabet,
        bound: u64,
    ) -> Result<AttemptOutcome, EquivalenceError> {
        let _span = info_span!("attempt", bound, inputs = %inputs).entered();
        let mut attempt = Attempt::launch(&self.config)?;
        attempt.write_hypothesis(hypothesis, inputs, self.config.close_input)?;

        let mut tested = 0u64;
        let mut line = String::new();
        while attempt.next_line(&mut line)? {
            // every line counts, a blank one is the empty word
            let word = Word::from_tokens(&line);
            tested += 1;
            if tested > bound {
                debug!("Bound is reached");
                return Ok(AttemptOutcome::BoundExceeded);
            }

            let expected = hypothesis
                .transform(&word)
                .ok_or_else(|| ProtocolViolation::UnknownInput(word.clone()))?;
            let observed = self.sul.answer_query(&Query::from_word(word.clone()))?;
            if expected == observed {
                continue;
            }

            debug!("found counterexample {word:?} after {tested} tests");
            trace!("hypothesis gives {expected:?}, system gives {observed:?}");
            return Ok(AttemptOutcome::Counterexample(Counterexample::new(
                word, observed,
            )));
        }

        // the output is closed, so the program should have exited by now
        match attempt.wait_for_exit(self.config.exit_grace)? {
            None => {
                warn!("No counterexample but process stream still active!");
                Err(ProtocolViolation::StillRunning.into())
            }
            Some(status) if !status.success() => {
                warn!("Something went wrong with the process: {status}");
                Err(ProtocolViolation::Failed(status).into())
            }
            Some(_) => {
                debug!("external program finished after {tested} tests");
                Ok(AttemptOutcome::Exhausted { tested })
            }
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use std::time::{Duration, Instant};

    use mealy_core::{prelude::*, word};

    use super::{AttemptOutcome, GeneratorCommand, SubprocessConfig, SubprocessOracle};
    use crate::active::{
        oracle::tests::mod3, CountingOracle, EquivalenceError, ProtocolViolation,
        SimulatorOracle,
    };

    /// Shell snippet that consumes the hypothesis up to its closing brace, so scripts
    /// never race against the payload being written.
    pub(crate) const READ_HYPOTHESIS: &str =
        "while IFS= read -r l; do case \"$l\" in '}'*) break;; esac; done";

    pub(crate) fn script(body: &str) -> SubprocessConfig {
        SubprocessConfig::new(
            GeneratorCommand::new("sh")
                .arg("-c")
                .arg(format!("{READ_HYPOTHESIS}; {body}")),
        )
        .with_exit_grace(Duration::from_secs(2))
    }

    /// Like [`mod3`] but it does not reset after the third `b`.
    pub(crate) fn faulty_mod3() -> MealyMachine {
        let mut mm = mod3();
        mm.add_transition(2, "b".into(), "3".into(), 2);
        mm
    }

    pub(crate) fn oracle(
        config: SubprocessConfig,
    ) -> SubprocessOracle<CountingOracle<SimulatorOracle>> {
        SubprocessOracle::new(config, CountingOracle::new(SimulatorOracle::new(mod3()), "testing"))
    }

    #[test_log::test]
    fn reports_the_output_of_the_system() {
        let oracle = oracle(script("echo 'a b'; echo 'b b b a'; echo 'a a'"));
        let outcome = oracle
            .search(&faulty_mod3(), mod3().alphabet(), 100)
            .unwrap();
        assert_eq!(
            outcome,
            AttemptOutcome::Counterexample(crate::active::Counterexample::new(
                word!["b", "b", "b", "a"],
                word!["1", "2", "0", "0"],
            ))
        );
        assert_eq!(faulty_mod3().transform(&word!["b", "b", "b", "a"]), Some(word!["1", "2", "3", "2"]));
        assert_eq!(oracle.sul().counter().counts().queries, 2);
    }

    #[test_log::test]
    fn scenario_single_mismatching_line() {
        let hypothesis: MealyMachine = MealyMachine::builder()
            .with_transitions([(0, "a", "x", 1), (1, "b", "y", 2), (2, "c", "z", 0)])
            .into_mealy(0);
        let sut: MealyMachine = MealyMachine::builder()
            .with_transitions([(0, "a", "x", 1), (1, "b", "y", 2), (2, "c", "w", 0)])
            .into_mealy(0);
        let oracle = SubprocessOracle::new(script("echo 'a b c'"), SimulatorOracle::new(sut));
        let outcome = oracle
            .search(&hypothesis, hypothesis.alphabet(), 100)
            .unwrap();
        let AttemptOutcome::Counterexample(ce) = outcome else {
            panic!("expected a counterexample, got {outcome:?}");
        };
        assert_eq!(ce.input, word!["a", "b", "c"]);
        assert_eq!(ce.output, word!["x", "y", "w"]);
    }

    #[test_log::test]
    fn matching_lines_and_clean_exit_mean_no_counterexample() {
        let oracle = oracle(script(
            "for w in 'a' 'b a' '' 'b b b' 'a b a b' 'b'; do echo \"$w\"; done; exit 0",
        ));
        let outcome = oracle.search(&mod3(), mod3().alphabet(), 100).unwrap();
        assert_eq!(outcome, AttemptOutcome::Exhausted { tested: 6 });
        assert_eq!(oracle.sul().counter().counts().queries, 6);
    }

    #[test_log::test]
    fn stops_once_the_bound_is_exceeded() {
        let oracle = oracle(script("echo a; echo b; echo 'a a'; echo 'b b b'; exec sleep 30"));
        let start = Instant::now();
        let outcome = oracle
            .search(&faulty_mod3(), mod3().alphabet(), 3)
            .unwrap();
        assert_eq!(outcome, AttemptOutcome::BoundExceeded);
        assert_eq!(oracle.sul().counter().counts().queries, 3);
        // the sleeping generator was not waited for
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test_log::test]
    fn blank_lines_count_towards_the_bound() {
        let oracle = oracle(script("for i in 1 2 3 4 5; do echo ''; done; exit 0"));
        let outcome = oracle.search(&mod3(), mod3().alphabet(), 3).unwrap();
        assert_eq!(outcome, AttemptOutcome::BoundExceeded);
        assert_eq!(oracle.sul().counter().counts().queries, 3);
        assert_eq!(oracle.sul().counter().counts().symbols, 0);
    }

    #[test_log::test]
    fn diagnostics_larger_than_the_pipe_buffer_do_not_block() {
        // about 2 MB on stderr before the first test word
        let oracle = oracle(script(
            "yes \"$(printf '%0500d' 0)\" | head -c 2000000 >&2; echo 'b b b a'",
        ));
        let start = Instant::now();
        let outcome = oracle
            .search(&faulty_mod3(), mod3().alphabet(), 100)
            .unwrap();
        assert!(matches!(outcome, AttemptOutcome::Counterexample(_)));
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    fn is_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap()
            .success()
    }

    #[test_log::test]
    fn generator_is_gone_once_the_attempt_returns() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let run = |words: &str, bound: u64| {
            let oracle = oracle(script(&format!(
                "echo $$ > '{}'; {words} exec sleep 30",
                pidfile.display()
            )));
            let result = oracle.search(&faulty_mod3(), mod3().alphabet(), bound);
            let pid = std::fs::read_to_string(&pidfile).unwrap();
            (result, pid.trim().to_string())
        };

        let (result, pid) = run("echo 'b b b a';", 100);
        assert!(matches!(result, Ok(AttemptOutcome::Counterexample(_))));
        assert!(!is_alive(&pid));

        let (result, pid) = run("echo a; echo b;", 1);
        assert!(matches!(result, Ok(AttemptOutcome::BoundExceeded)));
        assert!(!is_alive(&pid));

        let (result, pid) = run("echo 'a z';", 100);
        assert!(matches!(
            result,
            Err(EquivalenceError::Protocol(ProtocolViolation::UnknownInput(_)))
        ));
        assert!(!is_alive(&pid));
    }

    #[test_log::test]
    fn non_zero_exit_is_a_protocol_violation() {
        let oracle = oracle(script("echo 'a'; echo broken >&2; exit 3"));
        let err = oracle.search(&mod3(), mod3().alphabet(), 100).unwrap_err();
        assert!(matches!(
            err,
            EquivalenceError::Protocol(ProtocolViolation::Failed(status)) if status.code() == Some(3)
        ));
        assert_eq!(err.stage(), "protocol");
    }

    #[test_log::test]
    fn closing_output_while_running_is_a_protocol_violation() {
        let config = script("exec 1>&-; exec sleep 30").with_exit_grace(Duration::from_millis(100));
        let err = oracle(config)
            .search(&mod3(), mod3().alphabet(), 100)
            .unwrap_err();
        assert!(matches!(
            err,
            EquivalenceError::Protocol(ProtocolViolation::StillRunning)
        ));
    }

    #[test_log::test]
    fn words_outside_the_hypothesis_are_rejected() {
        let oracle = oracle(script("echo 'a z'"));
        let err = oracle.search(&mod3(), mod3().alphabet(), 100).unwrap_err();
        assert!(matches!(
            err,
            EquivalenceError::Protocol(ProtocolViolation::UnknownInput(_))
        ));
        assert_eq!(oracle.sul().counter().counts().queries, 0);
    }

    #[test_log::test]
    fn missing_program_is_a_launch_failure() {
        let oracle = oracle(SubprocessConfig::new(GeneratorCommand::new(
            "/nonexistent/test-generator",
        )));
        let err = oracle.search(&mod3(), mod3().alphabet(), 100).unwrap_err();
        assert!(matches!(err, EquivalenceError::Launch { .. }));
        assert_eq!(err.stage(), "launch");
    }

    #[test_log::test]
    fn only_transitions_of_the_attempted_alphabet_are_sent() {
        let sub: Alphabet = ["a"].into_iter().collect();
        // tests `b` only if the hypothesis mentions it
        let oracle = oracle(
            SubprocessConfig::new(GeneratorCommand::new("sh").arg("-c").arg(
                "seen=''; while IFS= read -r l; do case \"$l\" in *'\"b /'*) seen=1;; '}'*) break;; esac; done; \
                 if [ -n \"$seen\" ]; then echo 'b b b'; else echo 'a'; fi",
            ))
            .with_close_input(true),
        );
        let hypothesis = faulty_mod3();
        assert_eq!(
            oracle.search(&hypothesis, &sub, 100).unwrap(),
            AttemptOutcome::Exhausted { tested: 1 }
        );
        assert!(matches!(
            oracle.search(&hypothesis, hypothesis.alphabet(), 100).unwrap(),
            AttemptOutcome::Counterexample(_)
        ));
    }
}
