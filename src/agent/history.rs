use crate::providers::ChatMessage;
use crate::storage::MessageRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Hard ceiling on the records fetched per window, independent of the token
/// budget.
pub const MAX_HISTORY_MESSAGES: usize = 50;

/// Turns further back than this never enter a window.
const LOOKBACK_SECS: i64 = 60 * 60;

/// A silence longer than this between adjacent turns is read as the start of
/// an unrelated conversation.
const MAX_ADJACENT_GAP_MS: i64 = 5 * 60 * 1000;

pub fn lookback_horizon(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(LOOKBACK_SECS)
}

/// Assembles the prompt for one new question from the session's recent turns.
///
/// `history` must be newest first, the way `recent_for_session` returns it.
/// Walking newest to oldest, a record is admitted only while the token total
/// of already-admitted records stays within `max_token` and the gap to the
/// previously admitted timestamp (starting from `now`) stays within five
/// minutes; the first stop is final, so the window is always a contiguous
/// suffix of the conversation. Admitted turns are emitted oldest first, the
/// new question last.
pub fn build_prompt(
    history: &[MessageRecord],
    question: &str,
    now: DateTime<Utc>,
    max_token: i64,
) -> Vec<ChatMessage> {
    let mut prompt: VecDeque<ChatMessage> = VecDeque::with_capacity(history.len() * 2 + 1);
    let mut token_size: i64 = 0;
    let mut last_time = now;

    for record in history {
        let gap_ms = (last_time - record.created_at).num_milliseconds();
        if token_size > max_token || gap_ms > MAX_ADJACENT_GAP_MS {
            break;
        }
        prompt.push_front(ChatMessage::assistant(record.answer.clone()));
        prompt.push_front(ChatMessage::user(record.question.clone()));
        token_size += record.token;
        last_time = record.created_at;
    }

    prompt.push_back(ChatMessage::user(question));
    prompt.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(minutes_ago: i64, token: i64, tag: &str) -> MessageRecord {
        MessageRecord {
            id: minutes_ago,
            session_id: "u1".to_string(),
            msgid: format!("m-{tag}"),
            question: format!("q-{tag}"),
            answer: format!("a-{tag}"),
            token,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            deleted_at: None,
        }
    }

    #[test]
    fn empty_history_yields_only_the_question() {
        let prompt = build_prompt(&[], "你好", Utc::now(), 1024);
        assert_eq!(prompt, vec![ChatMessage::user("你好")]);
    }

    #[test]
    fn turns_within_budget_and_gap_come_out_oldest_first() {
        let history = vec![record(1, 10, "new"), record(2, 10, "mid"), record(3, 10, "old")];
        let prompt = build_prompt(&history, "next", Utc::now(), 1024);

        let contents: Vec<&str> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["q-old", "a-old", "q-mid", "a-mid", "q-new", "a-new", "next"]
        );
        assert_eq!(prompt.last().unwrap().role, "user");
    }

    #[test]
    fn a_long_silence_cuts_the_window() {
        // 1 minute then 7 minutes ago: the 6-minute gap excludes the older turn.
        let history = vec![record(1, 10, "new"), record(7, 10, "old")];
        let prompt = build_prompt(&history, "next", Utc::now(), 1024);

        let contents: Vec<&str> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q-new", "a-new", "next"]);
    }

    #[test]
    fn a_stale_newest_turn_is_excluded_outright() {
        let history = vec![record(6, 10, "stale")];
        let prompt = build_prompt(&history, "next", Utc::now(), 1024);
        assert_eq!(prompt, vec![ChatMessage::user("next")]);
    }

    #[test]
    fn window_stops_once_the_budget_is_exceeded() {
        let history = vec![record(1, 8, "a"), record(2, 5, "b"), record(3, 5, "c")];
        // After a and b the total is 13 > 10, so c is out.
        let prompt = build_prompt(&history, "next", Utc::now(), 10);

        let contents: Vec<&str> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q-b", "a-b", "q-a", "a-a", "next"]);
    }

    #[test]
    fn the_most_recent_turn_is_admitted_even_over_budget() {
        // The stop condition compares the running total of already-admitted
        // records, which is zero before the first one.
        let history = vec![record(1, 5000, "big"), record(2, 1, "older")];
        let prompt = build_prompt(&history, "next", Utc::now(), 1024);

        let contents: Vec<&str> = prompt.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q-big", "a-big", "next"]);
    }
}
