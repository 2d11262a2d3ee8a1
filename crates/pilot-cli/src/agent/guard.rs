//! Repetition guard
//!
//! Stops the agent from spinning on the same action forever. The loop owns
//! the `GuardState`; `guard` only reads and updates it.

use serde_json::{Map, Value};

use crate::tools::ActionKind;

/// Default number of identical consecutive proposals tolerated
pub const DEFAULT_TOLERANCE: u32 = 2;

/// Comparable identity of an action: its name plus canonical arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    action: ActionKind,
    args: String,
}

impl Signature {
    pub fn new(action: ActionKind, args: &Map<String, Value>) -> Self {
        Self {
            action,
            args: canonical_json(&Value::Object(args.clone())),
        }
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }
}

/// Serialize with object keys sorted at every level.
///
/// `Map` keeps insertion order under serde_json's `preserve_order`, so keys
/// are emitted by hand rather than trusting `to_string`.
fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    write(&map[key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Bookkeeping carried between iterations
#[derive(Debug, Clone)]
pub struct GuardState {
    last_signature: Option<Signature>,
    remaining: u32,
    tolerance: u32,
}

impl GuardState {
    pub fn new(tolerance: u32) -> Self {
        Self {
            last_signature: None,
            remaining: tolerance,
            tolerance,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn tolerance(&self) -> u32 {
        self.tolerance
    }

    /// Remember the signature of the action that actually ran
    pub fn record(&mut self, executed: Signature) {
        self.last_signature = Some(executed);
    }
}

impl Default for GuardState {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Execute the proposal as is
    Proceed,
    /// Replace the proposal with the observe-only fallback
    ForceFallback,
}

/// Judge a proposed action against the previous one.
pub fn guard(signature: &Signature, state: &mut GuardState) -> GuardVerdict {
    if state.last_signature.as_ref() != Some(signature) {
        state.remaining = state.tolerance;
        return GuardVerdict::Proceed;
    }

    state.remaining = state.remaining.saturating_sub(1);
    if state.remaining == 0 {
        state.remaining = state.tolerance;
        return GuardVerdict::ForceFallback;
    }

    GuardVerdict::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sig(action: ActionKind, args: Value) -> Signature {
        Signature::new(action, args.as_object().unwrap())
    }

    fn fallback_sig() -> Signature {
        Signature::new(ActionKind::FALLBACK, &Map::new())
    }

    /// Run proposals through the guard the way the loop does
    fn run(proposals: &[Signature], state: &mut GuardState) -> Vec<GuardVerdict> {
        proposals
            .iter()
            .map(|s| {
                let verdict = guard(s, state);
                let executed = match verdict {
                    GuardVerdict::Proceed => s.clone(),
                    GuardVerdict::ForceFallback => fallback_sig(),
                };
                state.record(executed);
                verdict
            })
            .collect()
    }

    #[test]
    fn test_signature_ignores_key_order() {
        let mut a = Map::new();
        a.insert("url".to_string(), json!("https://example.com"));
        a.insert("tab".to_string(), json!(1));
        let mut b = Map::new();
        b.insert("tab".to_string(), json!(1));
        b.insert("url".to_string(), json!("https://example.com"));

        assert_eq!(Signature::new(ActionKind::OpenUrl, &a), Signature::new(ActionKind::OpenUrl, &b));
    }

    #[test]
    fn test_signature_ignores_nested_key_order() {
        let a = sig(ActionKind::Click, json!({"opts": {"x": 1, "y": [{"b": 2, "a": 1}]}}));
        let b = sig(ActionKind::Click, json!({"opts": {"y": [{"a": 1, "b": 2}], "x": 1}}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_distinguishes_action_and_values() {
        let base = sig(ActionKind::Type, json!({"text": "hi"}));
        assert_ne!(base, sig(ActionKind::Type, json!({"text": "ho"})));
        assert_ne!(base, sig(ActionKind::Click, json!({"text": "hi"})));
    }

    #[test]
    fn test_canonical_json_sorted() {
        assert_eq!(
            canonical_json(&json!({"b": 1, "a": {"d": null, "c": "x"}})),
            r#"{"a":{"c":"x","d":null},"b":1}"#
        );
    }

    #[test]
    fn test_fallback_every_tolerance_plus_one() {
        let mut state = GuardState::new(2);
        let s = sig(ActionKind::Click, json!({"text_or_selector": "Next"}));
        let proposals = vec![s; 9];

        let forced: Vec<usize> = run(&proposals, &mut state)
            .into_iter()
            .enumerate()
            .filter(|(_, v)| *v == GuardVerdict::ForceFallback)
            .map(|(i, _)| i + 1)
            .collect();

        assert_eq!(forced, vec![3, 6, 9]);
    }

    #[test]
    fn test_fallback_cadence_other_tolerance() {
        let mut state = GuardState::new(3);
        let s = sig(ActionKind::Wait, json!({"seconds": 1}));
        let verdicts = run(&vec![s; 8], &mut state);

        let forced: Vec<usize> = verdicts
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == GuardVerdict::ForceFallback)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(forced, vec![4, 8]);
    }

    #[test]
    fn test_differing_signature_resets_tolerance() {
        let mut state = GuardState::new(2);
        let a = sig(ActionKind::Click, json!({"text_or_selector": "A"}));
        let b = sig(ActionKind::Click, json!({"text_or_selector": "B"}));

        run(&[a.clone(), a.clone()], &mut state);
        assert_eq!(state.remaining(), 1);

        run(&[b.clone()], &mut state);
        assert_eq!(state.remaining(), 2);

        // The streak starts over after the interruption
        let verdicts = run(&[a.clone(), a.clone(), a], &mut state);
        assert_eq!(
            verdicts,
            vec![GuardVerdict::Proceed, GuardVerdict::Proceed, GuardVerdict::ForceFallback]
        );
    }

    #[test]
    fn test_first_proposal_always_proceeds() {
        let mut state = GuardState::default();
        assert_eq!(guard(&fallback_sig(), &mut state), GuardVerdict::Proceed);
        assert_eq!(state.remaining(), DEFAULT_TOLERANCE);
    }
}
