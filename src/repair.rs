//! Conversation repair pipeline plus the read-only scans around it.
//!
//! Stage order: completeness gate, disallowed-speaker gate, empty-turn
//! removal, system-turn removal, consecutive-speaker collapse. The gates
//! drop whole conversations; the remaining stages each return a new turn
//! list and the number of turns they removed.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::conversation::{Conversation, Turn};

/// Everything the repair pass changed, keyed by conversation id.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RepairReport {
    pub total_conversations: usize,
    pub kept_conversations: usize,
    pub missing_num_tokens: Vec<String>,
    pub disallowed_speaker: Vec<String>,
    pub empty_removed: IndexMap<String, usize>,
    pub system_removed: IndexMap<String, usize>,
    pub consecutive_removed: IndexMap<String, usize>,
}

impl RepairReport {
    pub fn empty_total(&self) -> usize {
        self.empty_removed.values().sum()
    }

    pub fn system_total(&self) -> usize {
        self.system_removed.values().sum()
    }

    pub fn consecutive_total(&self) -> usize {
        self.consecutive_removed.values().sum()
    }
}

fn tally(map: &mut IndexMap<String, usize>, id: &str, n: usize) {
    if n > 0 {
        *map.entry(id.to_string()).or_default() += n;
    }
}

pub fn remove_empty_turns(turns: Vec<Turn>) -> (Vec<Turn>, usize) {
    let before = turns.len();
    let kept: Vec<Turn> = turns.into_iter().filter(|t| !t.is_empty()).collect();
    let removed = before - kept.len();
    (kept, removed)
}

pub fn remove_system_turns(turns: Vec<Turn>) -> (Vec<Turn>, usize) {
    let before = turns.len();
    let kept: Vec<Turn> = turns.into_iter().filter(|t| !t.is_system()).collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Drops a human/gpt turn whose speaker matches the last kept turn.
pub fn collapse_consecutive_speakers(turns: Vec<Turn>) -> (Vec<Turn>, usize) {
    let mut kept: Vec<Turn> = Vec::with_capacity(turns.len());
    let mut removed = 0;
    for turn in turns {
        let repeats = kept
            .last()
            .is_some_and(|prev| prev.speaker() == turn.speaker() && turn.collapsible());
        if repeats {
            removed += 1;
        } else {
            kept.push(turn);
        }
    }
    (kept, removed)
}

/// Incremental form of [`fix_conversations`], one record at a time.
#[derive(Debug, Default)]
pub struct Repairer {
    report: RepairReport,
}

impl Repairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the repaired record, or `None` when a gate dropped it.
    pub fn repair(&mut self, mut conv: Conversation) -> Option<Conversation> {
        self.report.total_conversations += 1;

        let Some(turns) = conv.conversations.take() else {
            self.report.kept_conversations += 1;
            return Some(conv);
        };
        let id = conv.id_label();

        if turns.iter().any(Turn::lacks_token_count) {
            self.report.missing_num_tokens.push(id);
            return None;
        }
        if turns.iter().any(Turn::is_disallowed) {
            self.report.disallowed_speaker.push(id);
            return None;
        }

        let (turns, n) = remove_empty_turns(turns);
        tally(&mut self.report.empty_removed, &id, n);
        let (turns, n) = remove_system_turns(turns);
        tally(&mut self.report.system_removed, &id, n);
        let (turns, n) = collapse_consecutive_speakers(turns);
        tally(&mut self.report.consecutive_removed, &id, n);

        // rewritten whenever the key exists, null included
        if conv.num_round.is_some() {
            conv.num_round = Some(Value::from(turns.len()));
        }
        conv.conversations = Some(turns);
        self.report.kept_conversations += 1;
        Some(conv)
    }

    pub fn finish(self) -> RepairReport {
        self.report
    }
}

/// Runs the whole pipeline; output keeps input order.
pub fn fix_conversations(data: Vec<Conversation>) -> (Vec<Conversation>, RepairReport) {
    let mut repairer = Repairer::new();
    let fixed = data.into_iter().filter_map(|c| repairer.repair(c)).collect();
    (fixed, repairer.finish())
}

/// Turn positions (0-based) that would trigger each repair rule.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ConversationIssues {
    /// position of the record in the scanned input
    pub index: usize,
    pub id: String,
    pub empty_positions: Vec<usize>,
    pub consecutive_positions: Vec<usize>,
    pub system_positions: Vec<usize>,
    pub disallowed_positions: Vec<usize>,
    pub missing_num_tokens_positions: Vec<usize>,
}

impl ConversationIssues {
    pub fn has_issues(&self) -> bool {
        !(self.empty_positions.is_empty()
            && self.consecutive_positions.is_empty()
            && self.system_positions.is_empty()
            && self.disallowed_positions.is_empty()
            && self.missing_num_tokens_positions.is_empty())
    }

    /// Sorted, de-duplicated union of all flagged positions.
    pub fn all_positions(&self) -> Vec<usize> {
        let mut all: Vec<usize> = [
            &self.empty_positions,
            &self.system_positions,
            &self.disallowed_positions,
            &self.consecutive_positions,
            &self.missing_num_tokens_positions,
        ]
        .into_iter()
        .flatten()
        .copied()
        .collect();
        all.sort_unstable();
        all.dedup();
        all
    }
}

// shared by the diagnostic scan and the validation scan; the consecutive
// check looks at the directly preceding turn, not the last kept one
fn scan_turns(turns: &[Turn], mut visit: impl FnMut(usize, Issue)) {
    let mut prev: Option<&str> = None;
    for (i, turn) in turns.iter().enumerate() {
        if turn.is_empty() {
            visit(i, Issue::Empty);
        }
        if turn.is_system() {
            visit(i, Issue::System);
        }
        if turn.is_disallowed() {
            visit(i, Issue::Disallowed);
        }
        if turn.lacks_token_count() {
            visit(i, Issue::MissingNumTokens);
        }
        if prev == Some(turn.speaker()) && turn.collapsible() {
            visit(i, Issue::Consecutive);
        }
        prev = Some(turn.speaker());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Issue {
    Empty,
    System,
    Disallowed,
    MissingNumTokens,
    Consecutive,
}

/// Read-only scan; records without a turn list are ignored.
pub fn find_problematic_conversations(data: &[Conversation]) -> Vec<ConversationIssues> {
    data.iter()
        .enumerate()
        .filter_map(|(index, conv)| {
            let turns = conv.conversations.as_ref()?;
            let mut issues = ConversationIssues {
                index,
                id: conv.id_label(),
                ..Default::default()
            };
            scan_turns(turns, |pos, issue| match issue {
                Issue::Empty => issues.empty_positions.push(pos),
                Issue::System => issues.system_positions.push(pos),
                Issue::Disallowed => issues.disallowed_positions.push(pos),
                Issue::MissingNumTokens => issues.missing_num_tokens_positions.push(pos),
                Issue::Consecutive => issues.consecutive_positions.push(pos),
            });
            issues.has_issues().then_some(issues)
        })
        .collect()
}

/// Lingering issue counts per category in an already repaired dataset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IssueCounts {
    pub empty: usize,
    pub system: usize,
    pub disallowed_speaker: usize,
    pub consecutive: usize,
    pub missing_num_tokens: usize,
}

impl IssueCounts {
    pub fn total(&self) -> usize {
        self.empty + self.system + self.disallowed_speaker + self.consecutive + self.missing_num_tokens
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }

    /// (category, count) pairs with a nonzero count.
    pub fn nonzero(&self) -> Vec<(&'static str, usize)> {
        [
            ("empty", self.empty),
            ("system", self.system),
            ("disallowed_speaker", self.disallowed_speaker),
            ("consecutive", self.consecutive),
            ("missing_num_tokens", self.missing_num_tokens),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .collect()
    }
}

pub fn validate_fixed(data: &[Conversation]) -> IssueCounts {
    let mut counts = IssueCounts::default();
    for turns in data.iter().filter_map(|c| c.conversations.as_ref()) {
        scan_turns(turns, |_, issue| match issue {
            Issue::Empty => counts.empty += 1,
            Issue::System => counts.system += 1,
            Issue::Disallowed => counts.disallowed_speaker += 1,
            Issue::MissingNumTokens => counts.missing_num_tokens += 1,
            Issue::Consecutive => counts.consecutive += 1,
        });
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn turns_of(conv: &Conversation) -> Vec<(&str, &str)> {
        conv.conversations
            .as_ref()
            .unwrap()
            .iter()
            .map(|t| (t.speaker(), t.text()))
            .collect()
    }

    #[test]
    fn collapse_keeps_first_of_a_run() {
        let conv = Conversation::new(
            "c1",
            vec![
                Turn::new("human", "hi"),
                Turn::new("human", "hi again"),
                Turn::new("gpt", "ok").with_tokens(1),
            ],
        );
        let (fixed, report) = fix_conversations(vec![conv]);
        assert_eq!(turns_of(&fixed[0]), vec![("human", "hi"), ("gpt", "ok")]);
        assert_eq!(report.consecutive_removed.get("c1"), Some(&1));
    }

    #[test]
    fn empty_and_system_turns_removed() {
        let conv = Conversation::new(
            "c2",
            vec![
                Turn::new("system", "rules"),
                Turn::new("human", ""),
                Turn::new("gpt", "a").with_tokens(2),
            ],
        );
        let (fixed, report) = fix_conversations(vec![conv]);
        assert_eq!(turns_of(&fixed[0]), vec![("gpt", "a")]);
        assert_eq!(report.empty_removed.get("c2"), Some(&1));
        assert_eq!(report.system_removed.get("c2"), Some(&1));
        assert!(report.consecutive_removed.is_empty());
    }

    #[test]
    fn gates_drop_whole_conversation() {
        let data = vec![
            Conversation::new("no-tokens", vec![Turn::new("human", "q"), Turn::new("gpt", "a")]),
            Conversation::new(
                "bing",
                vec![Turn::new("human", "q"), Turn::new("bing", "a"), Turn::new("gpt", "b").with_tokens(1)],
            ),
            Conversation::new("both", vec![Turn::new("chatgpt", "x"), Turn::new("gpt", "y")]),
            Conversation::new("ok", vec![Turn::new("human", "q"), Turn::new("gpt", "a").with_tokens(1)]),
        ];
        let (fixed, report) = fix_conversations(data);
        let ids: Vec<String> = fixed.iter().map(Conversation::id_label).collect();
        assert_eq!(ids, vec!["ok"]);
        // the completeness gate runs first
        assert_eq!(report.missing_num_tokens, vec!["no-tokens", "both"]);
        assert_eq!(report.disallowed_speaker, vec!["bing"]);
        assert_eq!(report.total_conversations, 4);
        assert_eq!(report.kept_conversations, 1);
    }

    #[test]
    fn num_round_rewritten_only_when_present() {
        let mut with_round = Conversation::new(
            "r",
            vec![Turn::new("human", "a"), Turn::new("human", "b"), Turn::new("gpt", "c").with_tokens(1)],
        );
        with_round.num_round = Some(serde_json::json!(3));
        let without = Conversation::new("n", vec![Turn::new("human", "a")]);
        let (fixed, _) = fix_conversations(vec![with_round, without]);
        assert_eq!(fixed[0].num_round, Some(serde_json::json!(2)));
        assert_eq!(fixed[1].num_round, None);
    }

    #[test]
    fn null_num_round_is_rewritten() {
        let raw = serde_json::json!({
            "id": "nr",
            "conversations": [{"from": "human", "value": "q"}],
            "num_round": null
        });
        let conv: Conversation = serde_json::from_value(raw).unwrap();
        let (fixed, _) = fix_conversations(vec![conv]);
        assert_eq!(fixed[0].num_round, Some(serde_json::json!(1)));
    }

    #[test]
    fn token_gate_checks_key_presence_only() {
        let raw = serde_json::json!([
            {"id": "null", "conversations": [{"from": "gpt", "value": "a", "num_tokens": null}]},
            {"id": "float", "conversations": [{"from": "gpt", "value": "a", "num_tokens": 12.0}]},
            {"id": "absent", "conversations": [{"from": "gpt", "value": "a"}]}
        ]);
        let data: Vec<Conversation> = serde_json::from_value(raw).unwrap();
        let (fixed, report) = fix_conversations(data);
        let kept: Vec<String> = fixed.iter().map(Conversation::id_label).collect();
        assert_eq!(kept, vec!["null", "float"]);
        assert_eq!(report.missing_num_tokens, vec!["absent"]);
        // the null survives the rewrite
        assert_eq!(
            fixed[0].conversations.as_ref().unwrap()[0].get("num_tokens"),
            Some(&Value::Null)
        );
    }

    #[test]
    fn records_without_turns_pass_through() {
        let mut bare = Conversation::new("bare", vec![]);
        bare.conversations = None;
        let (fixed, report) = fix_conversations(vec![bare.clone()]);
        assert_eq!(fixed, vec![bare]);
        assert_eq!(report.kept_conversations, 1);
    }

    #[test]
    fn other_speakers_never_collapse() {
        let (turns, removed) = collapse_consecutive_speakers(vec![
            Turn::new("tool", "a"),
            Turn::new("tool", "b"),
            Turn::new("human", "c"),
            Turn::new("tool", "d"),
            Turn::new("human", "e"),
        ]);
        assert_eq!(removed, 0);
        assert_eq!(turns.len(), 5);
    }

    #[test]
    fn collapse_compares_with_last_kept_turn() {
        let (turns, removed) = collapse_consecutive_speakers(vec![
            Turn::new("gpt", "1"),
            Turn::new("gpt", "2"),
            Turn::new("gpt", "3"),
            Turn::new("human", "4"),
        ]);
        assert_eq!(removed, 2);
        let values: Vec<&str> = turns.iter().map(|t| t.text()).collect();
        assert_eq!(values, vec!["1", "4"]);
    }

    #[test]
    fn empty_removal_can_create_new_runs() {
        let conv = Conversation::new(
            "runs",
            vec![
                Turn::new("human", "a"),
                Turn::new("gpt", "  ").with_tokens(0),
                Turn::new("human", "b"),
                Turn::new("gpt", "c").with_tokens(4),
            ],
        );
        let (fixed, report) = fix_conversations(vec![conv]);
        assert_eq!(turns_of(&fixed[0]), vec![("human", "a"), ("gpt", "c")]);
        assert_eq!(report.empty_total(), 1);
        assert_eq!(report.consecutive_total(), 1);
    }

    #[test]
    fn scan_reports_positions_without_mutating() {
        let data = vec![
            Conversation::new(
                "p",
                vec![
                    Turn::new("system", "s"),
                    Turn::new("human", ""),
                    Turn::new("human", "x"),
                    Turn::new("gpt", "y"),
                    Turn::new("bard", "z"),
                ],
            ),
            Conversation::new("clean", vec![Turn::new("human", "q"), Turn::new("gpt", "a").with_tokens(1)]),
        ];
        let before = data.clone();
        let issues = find_problematic_conversations(&data);
        assert_eq!(data, before);
        assert_eq!(issues.len(), 1);
        let p = &issues[0];
        assert_eq!((p.index, p.id.as_str()), (0, "p"));
        assert_eq!(p.system_positions, vec![0]);
        assert_eq!(p.empty_positions, vec![1]);
        assert_eq!(p.consecutive_positions, vec![2]);
        assert_eq!(p.missing_num_tokens_positions, vec![3]);
        assert_eq!(p.disallowed_positions, vec![4]);
        assert_eq!(p.all_positions(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn validate_counts_lingering_issues() {
        let data = vec![Conversation::new(
            "v",
            vec![Turn::new("gpt", ""), Turn::new("gpt", "b"), Turn::new("system", "c")],
        )];
        let counts = validate_fixed(&data);
        assert_eq!(
            counts,
            IssueCounts {
                empty: 1,
                system: 1,
                disallowed_speaker: 0,
                consecutive: 1,
                missing_num_tokens: 2,
            }
        );
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.nonzero().len(), 4);
    }

    #[test]
    fn repaired_output_validates_clean() {
        let data = vec![
            Conversation::new(
                "a",
                vec![
                    Turn::new("system", "be nice"),
                    Turn::new("human", "q1"),
                    Turn::new("human", " "),
                    Turn::new("human", "q2"),
                    Turn::new("gpt", "a1").with_tokens(3),
                    Turn::new("gpt", "a2").with_tokens(3),
                    Turn::new("tool", "t"),
                    Turn::new("tool", "t2"),
                ],
            ),
            Conversation::new("b", vec![Turn::new("gpt", "x")]),
            Conversation::new("c", vec![Turn::new("bard", "x")]),
            Conversation::new("d", vec![Turn::new("", ""), Turn::new("human", "ok")]),
        ];
        assert!(!validate_fixed(&data).is_clean());
        let (fixed, _) = fix_conversations(data);
        assert!(validate_fixed(&fixed).is_clean());
    }
}
