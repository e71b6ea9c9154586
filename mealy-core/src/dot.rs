use std::io::{self, BufRead, Write};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{alphabet::Alphabet, mealy::MealyMachine, StateIndex, Symbol};

/// Errors that can occur when reading a [`MealyMachine`] from its DOT representation.
#[derive(Debug, Error)]
pub enum DotParseError {
    /// Reading from the underlying source failed.
    #[error("could not read DOT input: {0}")]
    Io(#[from] io::Error),
    /// A transition label is not of the form `input / output`.
    #[error("line {line}: expected a label of the form \"input / output\", got \"{label}\"")]
    MalformedLabel {
        /// One-based line number.
        line: usize,
        /// The offending label.
        label: String,
    },
    /// A line contains `->` but no node on one of its sides.
    #[error("line {line}: transition lacks a source or target state")]
    MalformedEdge {
        /// One-based line number.
        line: usize,
    },
    /// Not a single transition was found.
    #[error("DOT input does not contain any transitions")]
    NoTransitions,
}

const START_MARKER: &str = "__start";

fn state_ident(q: StateIndex) -> String {
    format!("s{q}")
}

fn escape(label: impl std::fmt::Display) -> String {
    label.to_string().replace('"', "\\\"")
}

impl<I: Symbol, O: Symbol> MealyMachine<I, O> {
    /// Writes the DOT representation of `self` to `out`, only considering transitions on
    /// symbols of `inputs`. The initial state is always written first, so tools that number
    /// states in order of appearance assign it the index `0`.
    pub fn write_dot<W: Write>(&self, inputs: &Alphabet<I>, mut out: W) -> io::Result<()> {
        let order = std::iter::once(self.initial())
            .chain(self.state_indices().filter(|q| *q != self.initial()))
            .collect::<Vec<_>>();

        writeln!(out, "digraph g {{")?;
        writeln!(out)?;
        for q in &order {
            writeln!(out, "\t{} [shape=\"circle\" label=\"{q}\"];", state_ident(*q))?;
        }
        for q in &order {
            for input in inputs.iter() {
                let Some((target, output)) = self.edge(*q, input) else {
                    continue;
                };
                writeln!(
                    out,
                    "\t{} -> {} [label=\"{} / {}\"];",
                    state_ident(*q),
                    state_ident(target),
                    escape(input),
                    escape(output)
                )?;
            }
        }
        writeln!(out)?;
        writeln!(out, "{START_MARKER}0 [label=\"\" shape=\"none\"];")?;
        writeln!(out, "{START_MARKER}0 -> {};", state_ident(self.initial()))?;
        writeln!(out, "}}")?;
        out.flush()
    }

    /// Computes the DOT representation over the full alphabet of `self`.
    pub fn dot_representation(&self) -> String {
        let mut buf = Vec::new();
        self.write_dot(self.alphabet(), &mut buf)
            .expect("writing to a Vec<u8> can not fail");
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl MealyMachine<String, String> {
    /// Reads a machine from DOT. Every line containing `->` and a quoted label
    /// `"input / output"` is a transition, all other lines are ignored. States are
    /// numbered in the order of their first appearance. An edge from a node whose name
    /// starts with `__start` marks the initial state, if there is none, the first state
    /// that appears becomes initial.
    pub fn from_dot<R: BufRead>(reader: R) -> Result<Self, DotParseError> {
        let mut mm = MealyMachine::new(Alphabet::empty());
        let mut names: IndexMap<String, StateIndex> = IndexMap::new();
        let mut initial = None;
        let mut transitions = 0usize;

        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let lineno = n + 1;
            let Some(arrow) = line.find("->") else {
                continue;
            };

            let source = node_name(&line[..arrow]);
            let target = node_name(&line[arrow + 2..]);
            let (Some(source), Some(target)) = (source, target) else {
                return Err(DotParseError::MalformedEdge { line: lineno });
            };

            if source.starts_with(START_MARKER) {
                let fresh = names.len();
                initial = Some(*names.entry(target.to_string()).or_insert(fresh));
                continue;
            }

            let Some(label) = quoted(&line) else {
                trace!("skipping unlabelled edge on line {lineno}");
                continue;
            };
            let mut parts = label.split_whitespace();
            let (Some(input), Some("/"), Some(output), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(DotParseError::MalformedLabel {
                    line: lineno,
                    label: label.to_string(),
                });
            };

            let fresh = names.len();
            let p = *names.entry(source.to_string()).or_insert(fresh);
            let fresh = names.len();
            let q = *names.entry(target.to_string()).or_insert(fresh);
            mm.add_transition(p, input.to_string(), output.to_string(), q);
            transitions += 1;
        }

        if transitions == 0 {
            return Err(DotParseError::NoTransitions);
        }
        mm.ensure_state(names.len().saturating_sub(1));
        mm.set_initial(initial.unwrap_or(0));
        debug!(
            "read Mealy machine with {} states and {} inputs from DOT",
            mm.size(),
            mm.alphabet().len()
        );
        Ok(mm)
    }
}

fn node_name(fragment: &str) -> Option<&str> {
    let token = fragment
        .split(|c: char| c.is_whitespace() || c == '[' || c == ';')
        .find(|t| !t.is_empty())?;
    Some(token.trim_matches('"'))
}

fn quoted(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let len = line[start..].find('"')?;
    Some(&line[start..start + len])
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    const ESM: &str = r#"digraph g {
	s0 [shape="circle" label="0"];
	s1 [shape="circle" label="1"];
	s1 -> s0 [label="22 / B"];
	s0 -> s1 [label="21.1 / A"];
	s0 -> s0 [label="22 / C"];
	s1 -> s1 [label="21.1 / A"];

__start0 [label="" shape="none"];
__start0 -> s0;
}"#;

    #[test_log::test]
    fn reads_transitions_and_start_marker() {
        let mm = MealyMachine::from_dot(ESM.as_bytes()).unwrap();
        assert_eq!(mm.size(), 2);
        assert_eq!(mm.alphabet().len(), 2);
        assert!(mm.is_complete());
        // s1 appears first and is numbered 0, the start marker points to s0
        assert_eq!(mm.initial(), 1);
        assert_eq!(
            mm.transform(&word!["21.1", "22", "22"]),
            Some(word!["A", "B", "C"])
        );
    }

    #[test_log::test]
    fn written_dot_puts_initial_state_first_and_can_be_read_back() {
        let mm = MealyMachine::from_dot(ESM.as_bytes()).unwrap();
        let dot = mm.dot_representation();
        let first_edge = dot.lines().find(|l| l.contains("->")).unwrap();
        assert!(first_edge.trim_start().starts_with("s1 ->"), "{dot}");
        assert!(dot.contains("__start0 -> s1;"));

        let back = MealyMachine::from_dot(dot.as_bytes()).unwrap();
        for w in [word!["21.1"], word!["22", "21.1", "22"], word!["22", "22"]] {
            assert_eq!(back.transform(&w), mm.transform(&w));
        }
    }

    #[test]
    fn restricting_the_alphabet_drops_other_transitions() {
        let mm = MealyMachine::from_dot(ESM.as_bytes()).unwrap();
        let sub: Alphabet = ["22"].into_iter().collect();
        let mut buf = Vec::new();
        mm.write_dot(&sub, &mut buf).unwrap();
        let dot = String::from_utf8(buf).unwrap();
        assert_eq!(dot.matches("[label=\"22 /").count(), 2);
        assert!(!dot.contains("21.1"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let bad_label = "digraph g {\n s0 -> s1 [label=\"a\"];\n}";
        assert!(matches!(
            MealyMachine::from_dot(bad_label.as_bytes()),
            Err(DotParseError::MalformedLabel { line: 2, .. })
        ));
        assert!(matches!(
            MealyMachine::from_dot("digraph g {\n}".as_bytes()),
            Err(DotParseError::NoTransitions)
        ));
    }
}
