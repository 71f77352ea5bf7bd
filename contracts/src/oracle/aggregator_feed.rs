//! Round-based price feed.
//!
//! Every published answer opens a new round. A round that was started but
//! never answered reports `answered_in_round < round_id` and no update time;
//! consumers must treat such a round as unavailable.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{FeedError, FeedReading, PriceFeed};

/// One round as reported by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundData {
    pub round_id: u64,
    pub answer: i128,
    pub started_at: DateTime<Utc>,
    /// `None` while the round is still open.
    pub updated_at: Option<DateTime<Utc>>,
    /// Round in which `answer` was computed.
    pub answered_in_round: u64,
}

impl RoundData {
    pub fn is_complete(&self) -> bool {
        self.updated_at.is_some() && self.answered_in_round >= self.round_id
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    rounds: Vec<RoundData>,
    offline: bool,
}

/// In-process aggregator with a full round history.
#[derive(Debug)]
pub struct AggregatorFeed {
    description: String,
    decimals: u8,
    state: RwLock<AggregatorState>,
}

impl AggregatorFeed {
    pub fn new(description: impl Into<String>, decimals: u8) -> Self {
        Self {
            description: description.into(),
            decimals,
            state: RwLock::new(AggregatorState::default()),
        }
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Publishes `answer` as a new, complete round. Returns its round id.
    pub fn push_answer(&self, answer: i128, at: DateTime<Utc>) -> u64 {
        let mut state = self.state.write();
        let round_id = state.rounds.len() as u64 + 1;
        state.rounds.push(RoundData {
            round_id,
            answer,
            started_at: at,
            updated_at: Some(at),
            answered_in_round: round_id,
        });
        round_id
    }

    /// Opens a round that has no answer yet. The previous answer is carried
    /// forward, as the aggregator does between rounds.
    pub fn start_round(&self, at: DateTime<Utc>) -> u64 {
        let mut state = self.state.write();
        let (answer, answered_in_round) = state
            .rounds
            .last()
            .map(|r| (r.answer, r.answered_in_round))
            .unwrap_or((0, 0));
        let round_id = state.rounds.len() as u64 + 1;
        state.rounds.push(RoundData {
            round_id,
            answer,
            started_at: at,
            updated_at: None,
            answered_in_round,
        });
        round_id
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.write().offline = offline;
        tracing::debug!(feed = %self.description, offline, "aggregator availability changed");
    }

    pub fn latest_round_data(&self) -> Option<RoundData> {
        self.state.read().rounds.last().copied()
    }

    pub fn get_round_data(&self, round_id: u64) -> Option<RoundData> {
        let index = usize::try_from(round_id.checked_sub(1)?).ok()?;
        self.state.read().rounds.get(index).copied()
    }
}

impl PriceFeed for AggregatorFeed {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn latest_reading(&self) -> Result<FeedReading, FeedError> {
        let state = self.state.read();
        if state.offline {
            return Err(FeedError::Offline);
        }
        let round = state.rounds.last().ok_or(FeedError::NoData)?;
        match (round.is_complete(), round.updated_at) {
            (true, Some(updated_at)) => Ok(FeedReading {
                answer: round.answer,
                decimals: self.decimals,
                updated_at,
            }),
            _ => Err(FeedError::IncompleteRound {
                round_id: round.round_id,
                answered_in_round: round.answered_in_round,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn empty_feed_has_no_data() {
        let feed = AggregatorFeed::new("UST3M / USD", 8);
        assert_eq!(feed.latest_reading(), Err(FeedError::NoData));
    }

    #[test]
    fn latest_complete_round_is_reported() {
        let feed = AggregatorFeed::new("UST3M / USD", 8);
        feed.push_answer(100_000_000, t(1_000));
        let round = feed.push_answer(101_000_000, t(2_000));
        assert_eq!(round, 2);

        let reading = feed.latest_reading().unwrap();
        assert_eq!(reading.answer, 101_000_000);
        assert_eq!(reading.decimals, 8);
        assert_eq!(reading.updated_at, t(2_000));
        assert_eq!(feed.get_round_data(1).unwrap().answer, 100_000_000);
        assert!(feed.get_round_data(0).is_none());
    }

    #[test]
    fn open_round_is_unavailable() {
        let feed = AggregatorFeed::new("UST3M / USD", 8);
        feed.push_answer(100_000_000, t(1_000));
        feed.start_round(t(2_000));
        assert_eq!(
            feed.latest_reading(),
            Err(FeedError::IncompleteRound {
                round_id: 2,
                answered_in_round: 1,
            })
        );
    }

    #[test]
    fn offline_feed_fails() {
        let feed = AggregatorFeed::new("UST3M / USD", 8);
        feed.push_answer(100_000_000, t(1_000));
        feed.set_offline(true);
        assert_eq!(feed.latest_reading(), Err(FeedError::Offline));
        feed.set_offline(false);
        assert!(feed.latest_reading().is_ok());
    }
}
