use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use ndarray::aview1;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::mdp::*;
use crate::error::{RampsError, Result};

/// Sum over all entries of `|b - a|`.
pub fn absolute_diff_sum(a: &[f64], b: &[f64]) -> f64 {
    (&aview1(b) - &aview1(a)).mapv(f64::abs).sum()
}

// ------------------------------------------
// Explicit (.tra / .sta / .lab) base MDP files
// ------------------------------------------

/// Reads `<prefix>.tra`, and when present `<prefix>.sta` and `<prefix>.lab`.
pub fn read_explicit_mdp(prefix: &str) -> Result<MDP> {
    let tra_path = format!("{}.tra", prefix);
    let tra = read_file(&tra_path)?;
    let (num_states, actions, transitions) = parse_tra(&tra, &tra_path)?;

    let sta_path = format!("{}.sta", prefix);
    let states = match read_optional_file(&sta_path)? {
        Some(sta) => parse_sta(&sta, &sta_path, num_states)?,
        None => (0..num_states).map(|i| MDPState { label: vec![i.to_string()] }).collect()
    };

    let lab_path = format!("{}.lab", prefix);
    let initial = match read_optional_file(&lab_path)? {
        Some(lab) => parse_lab(&lab, &lab_path, num_states)?,
        None => None
    };
    if initial.is_none() {
        warn!("no initial state labelled in {}", lab_path);
    }
    debug!("read MDP {}: {} states, {} actions", prefix, num_states, actions.len());
    Ok(MDP {
        actions,
        states,
        transitions,
        initial
    })
}

/// Parses a transition file: a header `nStates nChoices nTransitions` followed by `src action dest prob [label]`
/// lines. Edges sharing `(src, action)` are one transition. Actions are named by their label when given,
/// otherwise by the action token, and indexed in order of first appearance.
pub fn parse_tra(text: &str, file: &str) -> Result<(usize, Vec<String>, Vec<Vec<Transition>>)> {
    let header_re: Regex = Regex::new(r"^\s*(?P<states>\d+)\s+\d+\s+\d+\s*$").expect("valid regex");
    let edge_re: Regex = Regex::new(
        r"^\s*(?P<src>\d+)\s+(?P<choice>\S+)\s+(?P<dest>\d+)\s+(?P<p>\S+)(?:\s+(?P<label>\S+))?\s*$"
    ).expect("valid regex");

    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let num_states: usize = match lines.next() {
        Some((_, l)) => match header_re.captures(l) {
            Some(c) => parse_number(&c["states"], file, 1)?,
            None => return Err(RampsError::parse(file, 1, "expected header 'nStates nChoices nTransitions'"))
        },
        None => return Err(RampsError::parse(file, 1, "empty transition file"))
    };

    let mut actions: Vec<String> = Vec::new();
    let mut action_index: HashMap<String, usize> = HashMap::new();
    let mut transitions: Vec<Vec<Transition>> = vec![Vec::new(); num_states];
    let mut choice_index: HashMap<(usize, String), usize> = HashMap::new();
    for (i, l) in lines {
        let line = i + 1;
        let c = edge_re.captures(l)
            .ok_or_else(|| RampsError::parse(file, line, format!("expected 'src action dest prob', got '{}'", l.trim())))?;
        let src: usize = parse_number(&c["src"], file, line)?;
        let dest: usize = parse_number(&c["dest"], file, line)?;
        let p: f64 = c["p"].parse()
            .map_err(|_| RampsError::parse(file, line, format!("bad probability '{}'", &c["p"])))?;
        if src >= num_states || dest >= num_states {
            return Err(RampsError::parse(file, line, format!("state out of range ({} states)", num_states)));
        }
        let choice = c["choice"].to_string();
        let name = c.name("label").map(|x| x.as_str().to_string()).unwrap_or_else(|| choice.clone());
        let a = match action_index.get(&name) {
            Some(a) => *a,
            None => {
                actions.push(name.clone());
                action_index.insert(name, actions.len() - 1);
                actions.len() - 1
            }
        };
        let t = match choice_index.get(&(src, choice.clone())) {
            Some(t) => *t,
            None => {
                transitions[src].push(Transition { a, s_prime: Vec::new() });
                choice_index.insert((src, choice), transitions[src].len() - 1);
                transitions[src].len() - 1
            }
        };
        transitions[src][t].s_prime.push(TransitionPair { s: dest, p });
    }
    check_distributions(&transitions, actions.len())
        .map_err(|(s, reason)| RampsError::Invalid { file: file.to_string(), reason: format!("state {}: {}", s, reason) })?;
    normalize_distributions(&mut transitions);
    Ok((num_states, actions, transitions))
}

/// Parses a state file: a `(var,...)` header, then `id:(v1,...)` per state.
pub fn parse_sta(text: &str, file: &str, num_states: usize) -> Result<Vec<MDPState>> {
    let re: Regex = Regex::new(r"^\s*(?P<id>\d+):\((?P<vals>[^)]*)\)\s*$").expect("valid regex");
    let mut states: Vec<MDPState> = (0..num_states).map(|i| MDPState { label: vec![i.to_string()] }).collect();
    for (i, l) in text.lines().enumerate().skip(1).filter(|(_, l)| !l.trim().is_empty()) {
        let c = re.captures(l)
            .ok_or_else(|| RampsError::parse(file, i + 1, format!("expected 'id:(...)', got '{}'", l.trim())))?;
        let id: usize = parse_number(&c["id"], file, i + 1)?;
        if id >= num_states {
            return Err(RampsError::parse(file, i + 1, format!("state {} out of range ({} states)", id, num_states)));
        }
        states[id].label = c["vals"].split(',').map(|x| x.trim().to_string()).collect();
    }
    Ok(states)
}

/// Parses a label file and returns the state carrying the `init` label, if any.
pub fn parse_lab(text: &str, file: &str, num_states: usize) -> Result<Option<usize>> {
    let decl_re: Regex = Regex::new(r#"(?P<id>\d+)="(?P<name>[^"]*)""#).expect("valid regex");
    let line_re: Regex = Regex::new(r"^\s*(?P<s>\d+):(?P<ids>[\d\s]*)$").expect("valid regex");
    let mut lines = text.lines().enumerate();
    let init_id: Option<String> = match lines.next() {
        Some((_, header)) => decl_re.captures_iter(header)
            .find(|c| &c["name"] == "init")
            .map(|c| c["id"].to_string()),
        None => None
    };
    let init_id = match init_id {
        Some(x) => x,
        None => return Ok(None)
    };
    for (i, l) in lines.filter(|(_, l)| !l.trim().is_empty()) {
        let c = line_re.captures(l)
            .ok_or_else(|| RampsError::parse(file, i + 1, format!("expected 'state: ids', got '{}'", l.trim())))?;
        if c["ids"].split_whitespace().any(|x| x == init_id) {
            let s: usize = parse_number(&c["s"], file, i + 1)?;
            if s >= num_states {
                return Err(RampsError::parse(file, i + 1, format!("state {} out of range ({} states)", s, num_states)));
            }
            return Ok(Some(s));
        }
    }
    Ok(None)
}

// ------------------------------------------
// Parity product (JSON)
// ------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ParityFile {
    pub nof_colors: Option<u32>,
    pub states: Vec<ParityFileState>,
    pub transitions: Vec<ParityFileTransition>
}

#[derive(Debug, Deserialize)]
pub struct ParityFileState {
    pub base: usize,
    pub color: u32
}

#[derive(Debug, Deserialize)]
pub struct ParityFileTransition {
    pub s: usize,
    pub a: String,
    pub s_prime: Vec<ParityFilePair>
}

#[derive(Debug, Deserialize)]
pub struct ParityFilePair {
    pub s: usize,
    pub p: f64
}

pub fn read_parity_json<P: AsRef<Path>>(path: P, base_mdp: &MDP) -> Result<ParityMDP> {
    let display = path.as_ref().display().to_string();
    let text = read_file(&display)?;
    let u: ParityFile = serde_json::from_str(&text)
        .map_err(|source| RampsError::Json { path: display.clone(), source })?;
    build_parity_mdp(u, base_mdp, &display)
}

pub fn build_parity_mdp(u: ParityFile, base_mdp: &MDP, file: &str) -> Result<ParityMDP> {
    let invalid = |reason: String| RampsError::Invalid { file: file.to_string(), reason };
    if u.states.is_empty() {
        return Err(invalid("parity model has no states".to_string()));
    }
    let n = u.states.len();
    for (i, state) in u.states.iter().enumerate() {
        if state.base >= base_mdp.states.len() {
            return Err(invalid(format!("state {} maps to unknown base state {}", i, state.base)));
        }
        if let Some(k) = u.nof_colors {
            if state.color >= k {
                return Err(invalid(format!("state {} has colour {} but nof_colors is {}", i, state.color, k)));
            }
        }
    }
    let mut transitions: Vec<Vec<Transition>> = vec![Vec::new(); n];
    for t in u.transitions.into_iter() {
        if t.s >= n {
            return Err(invalid(format!("transition from unknown state {}", t.s)));
        }
        let a = base_mdp.actions.iter().position(|x| *x == t.a)
            .ok_or_else(|| invalid(format!("state {} uses unknown action '{}'", t.s, t.a)))?;
        transitions[t.s].push(Transition {
            a,
            s_prime: t.s_prime.iter().map(|x| TransitionPair { s: x.s, p: x.p }).collect()
        });
    }
    check_distributions(&transitions, base_mdp.actions.len())
        .map_err(|(s, reason)| invalid(format!("state {}: {}", s, reason)))?;
    normalize_distributions(&mut transitions);
    let states: Vec<(usize, u32)> = u.states.iter().map(|x| (x.base, x.color)).collect();
    Ok(ParityMDP::new(base_mdp, &states, transitions, u.nof_colors))
}

/// Reads the base MDP from `<prefix>.tra/.sta/.lab` and the parity product from `<prefix>.parity`.
pub fn read_input(prefix: &str) -> Result<(MDP, ParityMDP)> {
    let mdp = read_explicit_mdp(prefix)?;
    let pmdp = read_parity_json(format!("{}.parity", prefix), &mdp)?;
    Ok((mdp, pmdp))
}

fn read_file(path: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|source| RampsError::Io { path: path.to_string(), source })
}

fn read_optional_file(path: &str) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(x) => Ok(Some(x)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RampsError::Io { path: path.to_string(), source })
    }
}

fn parse_number(s: &str, file: &str, line: usize) -> Result<usize> {
    s.parse::<usize>().map_err(|_| RampsError::parse(file, line, format!("bad integer '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRA: &str = "3 3 5\n0 0 1 0.5\n0 0 2 0.5\n0 1 0 1.0\n1 0 1 1.0\n2 0 2 1\n";

    #[test]
    fn absolute_diff_sums_all_entries() {
        assert_eq!(absolute_diff_sum(&[0.0, 1.0, 0.5], &[0.25, 0.5, 0.5]), 0.75);
        assert_eq!(absolute_diff_sum(&[], &[]), 0.0);
    }

    #[test]
    fn tra_groups_edges_by_source_and_action() {
        let (n, actions, transitions) = parse_tra(TRA, "t.tra").unwrap();
        assert_eq!(n, 3);
        assert_eq!(actions, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(transitions[0].len(), 2);
        assert_eq!(transitions[0][0], Transition::new(0, &[(1, 0.5), (2, 0.5)]));
        assert_eq!(transitions[0][1], Transition::new(1, &[(0, 1.0)]));
        assert_eq!(transitions[2][0], Transition::new(0, &[(2, 1.0)]));
    }

    #[test]
    fn tra_uses_action_labels_when_present() {
        let (_, actions, transitions) = parse_tra("2 2 2\n0 0 1 1.0 north\n1 0 1 1.0 stay\n", "t.tra").unwrap();
        assert_eq!(actions, vec!["north".to_string(), "stay".to_string()]);
        assert_eq!(transitions[1][0].a, 1);
    }

    #[test]
    fn tra_rejects_broken_distributions() {
        match parse_tra("2 1 1\n0 0 1 0.7\n", "t.tra") {
            Err(RampsError::Invalid { reason, .. }) => assert!(reason.contains("sum to")),
            other => panic!("unexpected {:?}", other)
        }
        match parse_tra("2 1 1\n0 0 5 1.0\n", "t.tra") {
            Err(RampsError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other)
        }
        assert!(parse_tra("0 0 1 0.7\n", "t.tra").is_err());
    }

    #[test]
    fn sta_and_lab() {
        let states = parse_sta("(x,y)\n0:(0,0)\n1:(1,0)\n", "t.sta", 3).unwrap();
        assert_eq!(states[1].label, vec!["1".to_string(), "0".to_string()]);
        assert_eq!(states[2].label, vec!["2".to_string()]);
        let init = parse_lab("0=\"init\" 1=\"deadlock\"\n2: 0\n1: 1\n", "t.lab", 3).unwrap();
        assert_eq!(init, Some(2));
        assert_eq!(parse_lab("0=\"deadlock\"\n1: 0\n", "t.lab", 3).unwrap(), None);
    }

    #[test]
    fn parity_json_resolves_action_names() {
        let (n, actions, transitions) = parse_tra(TRA, "t.tra").unwrap();
        let base = MDP { actions, states: vec![MDPState::default(); n], transitions, initial: Some(0) };
        let json = r#"{
            "states": [{"base": 0, "color": 1}, {"base": 1, "color": 2}],
            "transitions": [
                {"s": 0, "a": "0", "s_prime": [{"s": 1, "p": 0.25}, {"s": 0, "p": 0.75}]},
                {"s": 1, "a": "1", "s_prime": [{"s": 1, "p": 1.0}]}
            ]
        }"#;
        let u: ParityFile = serde_json::from_str(json).unwrap();
        let pmdp = build_parity_mdp(u, &base, "t.parity").unwrap();
        assert_eq!(pmdp.nof_colors, 3);
        assert_eq!(pmdp.base, vec![0, 1]);
        assert_eq!(pmdp.colors, vec![1, 2]);
        assert_eq!(pmdp.transitions[1][0].a, 1);
    }

    #[test]
    fn parity_json_rejects_unknown_actions_and_colors() {
        let base = MDP::new(vec!["a".to_string()], vec![vec![]], None);
        let unknown: ParityFile = serde_json::from_str(
            r#"{"states": [{"base": 0, "color": 0}], "transitions": [{"s": 0, "a": "b", "s_prime": [{"s": 0, "p": 1.0}]}]}"#
        ).unwrap();
        assert!(build_parity_mdp(unknown, &base, "t.parity").is_err());
        let color: ParityFile = serde_json::from_str(
            r#"{"nof_colors": 1, "states": [{"base": 0, "color": 3}], "transitions": []}"#
        ).unwrap();
        assert!(build_parity_mdp(color, &base, "t.parity").is_err());
        let empty: ParityFile = serde_json::from_str(r#"{"states": [], "transitions": []}"#).unwrap();
        assert!(build_parity_mdp(empty, &base, "t.parity").is_err());
    }
}
