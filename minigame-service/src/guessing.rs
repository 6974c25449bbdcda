// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Repeated "who is this?" rounds over a fixed pool of subjects.

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use arcade_common::{
    CORRECT_ANSWER_EMOJI, ChannelId, ChatEvent, Difficulty, Embed, Gender, GuessingStatus,
    MessageHandle, MessageId, OutboundMessage, SKIP_KEYWORD, STOP_KEYWORDS, UserId,
    normalize_answer,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    AppState,
    catalog::Subject,
    collaborators::announce,
    error::GameError,
    registry::SessionHandle,
    turn_clock::{TurnClock, Wake},
};

#[derive(Debug, Clone)]
pub struct GuessingSettings {
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub gender: Gender,
    pub difficulty: Difficulty,
    pub max_rounds: u32,
    pub round_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guess {
    Correct {
        user_id: UserId,
        message_id: MessageId,
    },
    Skip,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Correct(UserId),
    Skipped,
    TimedOut,
    Stopped,
}

pub struct GuessingGame {
    settings: GuessingSettings,
    pool: Vec<Subject>,
    current: Option<Subject>,
    accepted_answers: HashSet<String>,
    scores: BTreeMap<UserId, u32>,
    round_count: u32,
    status: GuessingStatus,
    force_stopped: bool,
    scores_taken: bool,
}

impl GuessingGame {
    pub fn new(settings: GuessingSettings, pool: Vec<Subject>) -> Self {
        Self {
            settings,
            pool,
            current: None,
            accepted_answers: HashSet::new(),
            scores: BTreeMap::new(),
            round_count: 0,
            status: GuessingStatus::RoundStarting,
            force_stopped: false,
            scores_taken: false,
        }
    }

    pub fn settings(&self) -> &GuessingSettings {
        &self.settings
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn status(&self) -> GuessingStatus {
        self.status
    }

    pub fn scores(&self) -> &BTreeMap<UserId, u32> {
        &self.scores
    }

    pub fn is_over(&self) -> bool {
        self.force_stopped
            || self.round_count >= self.settings.max_rounds
            || self.status == GuessingStatus::Finished
    }

    pub fn start_round<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Subject, GameError> {
        if self.is_over() {
            return Err(GameError::wrong_state("The guessing game is already over."));
        }
        if self.pool.is_empty() {
            return Err(GameError::Setup(
                "No subjects match the chosen gender and difficulty.".to_string(),
            ));
        }

        let subject = self.pool[rng.random_range(0..self.pool.len())].clone();
        let accepted_answers = subject.accepted_answers();
        if accepted_answers.is_empty() {
            return Err(GameError::Setup(format!(
                "Subject {} has no usable answers.",
                subject.id
            )));
        }

        self.accepted_answers = accepted_answers;
        self.current = Some(subject.clone());
        self.status = GuessingStatus::AwaitingAnswer;
        Ok(subject)
    }

    /// Maps a chat event to its meaning for the open round, if it has one.
    pub fn classify(&self, event: &ChatEvent) -> Option<Guess> {
        if self.status != GuessingStatus::AwaitingAnswer {
            return None;
        }
        let ChatEvent::Message {
            channel_id,
            author_id,
            message_id,
            content,
            author_is_bot,
        } = event
        else {
            return None;
        };
        if *channel_id != self.settings.channel_id || *author_is_bot {
            return None;
        }

        let guess = normalize_answer(content);
        if self.accepted_answers.contains(&guess) {
            return Some(Guess::Correct {
                user_id: *author_id,
                message_id: *message_id,
            });
        }
        if *author_id != self.settings.host_id {
            return None;
        }
        if guess == SKIP_KEYWORD {
            Some(Guess::Skip)
        } else if STOP_KEYWORDS.contains(&guess.as_str()) {
            Some(Guess::Stop)
        } else {
            None
        }
    }

    pub fn resolve(&mut self, outcome: RoundOutcome) {
        match outcome {
            RoundOutcome::Correct(user_id) => {
                *self.scores.entry(user_id).or_default() += 1;
                self.advance_round();
            }
            RoundOutcome::Skipped | RoundOutcome::TimedOut => self.advance_round(),
            RoundOutcome::Stopped => self.force_stopped = true,
        }
        self.current = None;
        self.accepted_answers.clear();
        self.status = if self.is_over() {
            GuessingStatus::Finished
        } else {
            GuessingStatus::RoundResolved
        };
    }

    fn advance_round(&mut self) {
        self.round_count = (self.round_count + 1).min(self.settings.max_rounds);
    }

    pub fn abort(&mut self) {
        self.force_stopped = true;
        self.current = None;
        self.accepted_answers.clear();
        self.status = GuessingStatus::Finished;
    }

    /// Hands out the final scores once; afterwards returns `None`.
    pub fn take_final_scores(&mut self) -> Option<BTreeMap<UserId, u32>> {
        if self.scores_taken {
            return None;
        }
        self.scores_taken = true;
        self.status = GuessingStatus::Finished;
        Some(self.scores.clone())
    }

    pub fn standings(&self) -> Vec<(UserId, u32)> {
        let mut standings: Vec<(UserId, u32)> =
            self.scores.iter().map(|(user, score)| (*user, *score)).collect();
        standings.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        standings
    }
}

fn prompt_message(game: &GuessingGame, subject: &Subject) -> OutboundMessage {
    let settings = game.settings();
    OutboundMessage::embed(Embed {
        title: format!(
            "Guessing Game: round {}/{}",
            game.round_count() + 1,
            settings.max_rounds
        ),
        description: "Who is this?".to_string(),
        image_url: subject.image_url.clone(),
        footer: Some(format!(
            "Answer within {} seconds",
            settings.round_timeout.as_secs()
        )),
    })
}

fn standings_message(game: &GuessingGame) -> OutboundMessage {
    let standings = game.standings();
    if standings.is_empty() {
        return OutboundMessage::text(
            "The current game has now ended. Nobody scored this time.",
        );
    }
    let lines: Vec<String> = standings
        .iter()
        .map(|(user_id, score)| format!("<@{user_id}> -> {score}"))
        .collect();
    OutboundMessage::text(format!(
        "The current game has now ended.\nGuessing game has finished. Scores:\n{}",
        lines.join("\n")
    ))
}

async fn publish_prompt(
    state: &AppState,
    channel_id: ChannelId,
    message: OutboundMessage,
) -> anyhow::Result<MessageHandle> {
    match state.transport.send(channel_id, message.clone()).await {
        Ok(handle) => Ok(handle),
        Err(first) => {
            warn!(channel_id, error = %first, "round prompt failed; retrying once");
            state.transport.send(channel_id, message).await
        }
    }
}

pub async fn run_guessing(
    state: AppState,
    handle: SessionHandle,
    mut game: GuessingGame,
    mut clock: TurnClock<broadcast::Receiver<ChatEvent>>,
) {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    let settings = game.settings().clone();
    let channel_id = settings.channel_id;

    info!(
        session_id = %handle.session_id,
        channel_id,
        host_id = settings.host_id,
        max_rounds = settings.max_rounds,
        difficulty = settings.difficulty.as_str(),
        "guessing session started"
    );
    announce(
        state.transport.as_ref(),
        channel_id,
        OutboundMessage::text(format!(
            "A guessing game has started: {} rounds on {} difficulty, {} seconds per round.",
            settings.max_rounds,
            settings.difficulty.as_str(),
            settings.round_timeout.as_secs()
        )),
    )
    .await;

    while !game.is_over() {
        if clock.stop_requested() {
            game.resolve(RoundOutcome::Stopped);
            break;
        }

        clock.drain();
        let subject = match game.start_round(&mut rng) {
            Ok(subject) => subject,
            Err(error) => {
                warn!(channel_id, error = %error, "guessing round could not start");
                announce(
                    state.transport.as_ref(),
                    channel_id,
                    OutboundMessage::text(error.to_string()),
                )
                .await;
                game.abort();
                break;
            }
        };

        let prompt = match publish_prompt(&state, channel_id, prompt_message(&game, &subject)).await
        {
            Ok(prompt) => prompt,
            Err(error) => {
                error!(channel_id, error = %error, "round prompt undeliverable; stopping session");
                game.resolve(RoundOutcome::Stopped);
                break;
            }
        };

        let wake = clock
            .await_event(|event| game.classify(&event), settings.round_timeout)
            .await;

        let outcome = match wake {
            Wake::Event(Guess::Correct {
                user_id,
                message_id,
            }) => {
                let answer = MessageHandle {
                    channel_id,
                    message_id,
                };
                if let Err(error) = state
                    .transport
                    .add_reaction(answer, CORRECT_ANSWER_EMOJI)
                    .await
                {
                    warn!(channel_id, error = %error, "failed to react to correct answer");
                }
                let mut answered = prompt_message(&game, &subject);
                if let Some(embed) = answered.embed.as_mut() {
                    embed.footer = Some(format!("Answered by <@{user_id}>: {}", subject.reveal()));
                }
                if let Err(error) = state.transport.edit(prompt, answered).await {
                    warn!(channel_id, error = %error, "failed to mark round as answered");
                }
                RoundOutcome::Correct(user_id)
            }
            Wake::Event(Guess::Skip) => {
                announce(
                    state.transport.as_ref(),
                    channel_id,
                    OutboundMessage::text(format!(
                        "Question skipped. The correct answer was {}.",
                        subject.reveal()
                    )),
                )
                .await;
                RoundOutcome::Skipped
            }
            Wake::TimedOut => {
                announce(
                    state.transport.as_ref(),
                    channel_id,
                    OutboundMessage::text(format!(
                        "Time's up! The correct answer was {}.",
                        subject.reveal()
                    )),
                )
                .await;
                RoundOutcome::TimedOut
            }
            Wake::Event(Guess::Stop) | Wake::Stopped => {
                if let Err(error) = state.transport.delete(prompt).await {
                    warn!(channel_id, error = %error, "failed to remove abandoned prompt");
                }
                RoundOutcome::Stopped
            }
        };

        game.resolve(outcome);
        handle
            .control
            .record_scores(settings.difficulty, game.scores());
        if outcome != RoundOutcome::Stopped {
            state.registry.record_round().await;
        }
    }

    finish_guessing(&state, &handle, &mut game).await;
}

async fn finish_guessing(state: &AppState, handle: &SessionHandle, game: &mut GuessingGame) {
    if !handle.control.claim_finalization() {
        warn!(session_id = %handle.session_id, "guessing session already cleaned up");
        return;
    }

    let channel_id = game.settings().channel_id;
    let scores = game.take_final_scores().unwrap_or_default();
    let failed = state
        .settlement
        .persist_scores(game.settings().difficulty, &scores)
        .await;

    announce(state.transport.as_ref(), channel_id, standings_message(game)).await;
    if !failed.is_empty() {
        announce(
            state.transport.as_ref(),
            channel_id,
            OutboundMessage::text("Some scores could not be saved."),
        )
        .await;
    }

    state
        .registry
        .remove(handle.channel_id, handle.session_id)
        .await;

    info!(
        session_id = %handle.session_id,
        channel_id,
        rounds = game.round_count(),
        players = scores.len(),
        "guessing session finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{SubjectCatalog, subject},
        registry::{SessionControl, SessionInbox},
        test_support::{RecordingTransport, harness, settle_tasks},
    };
    use chrono::Utc;
    use uuid::Uuid;

    const CHANNEL: ChannelId = 20;
    const HOST: UserId = 1;

    fn settings(max_rounds: u32, timeout_secs: u64) -> GuessingSettings {
        GuessingSettings {
            channel_id: CHANNEL,
            host_id: HOST,
            gender: Gender::All,
            difficulty: Difficulty::Medium,
            max_rounds,
            round_timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn pool() -> Vec<Subject> {
        vec![subject(1, "Irene", Gender::Female, Difficulty::Easy)]
    }

    fn message(author_id: UserId, content: &str) -> ChatEvent {
        ChatEvent::Message {
            channel_id: CHANNEL,
            author_id,
            message_id: 77,
            content: content.to_string(),
            author_is_bot: false,
        }
    }

    #[test]
    fn classify_recognises_answers_and_host_controls() {
        let mut game = GuessingGame::new(settings(3, 10), pool());
        assert_eq!(game.classify(&message(5, "irene")), None);

        game.start_round(&mut rand::rng()).unwrap();
        assert_eq!(
            game.classify(&message(5, "  IRENE ")),
            Some(Guess::Correct {
                user_id: 5,
                message_id: 77
            })
        );
        assert_eq!(game.classify(&message(5, "skip")), None);
        assert_eq!(game.classify(&message(HOST, "skip")), Some(Guess::Skip));
        assert_eq!(game.classify(&message(HOST, "End")), Some(Guess::Stop));
        assert_eq!(game.classify(&message(HOST, "wendy")), None);

        let elsewhere = ChatEvent::Message {
            channel_id: CHANNEL + 1,
            author_id: 5,
            message_id: 1,
            content: "irene".to_string(),
            author_is_bot: false,
        };
        assert_eq!(game.classify(&elsewhere), None);

        let from_bot = ChatEvent::Message {
            channel_id: CHANNEL,
            author_id: 5,
            message_id: 1,
            content: "irene".to_string(),
            author_is_bot: true,
        };
        assert_eq!(game.classify(&from_bot), None);
    }

    #[test]
    fn round_count_never_exceeds_max() {
        let mut game = GuessingGame::new(settings(2, 10), pool());
        let mut steps = 0;
        while !game.is_over() {
            game.start_round(&mut rand::rng()).unwrap();
            game.resolve(RoundOutcome::Correct(5));
            steps += 1;
            assert!(game.round_count() <= 2);
        }
        assert_eq!(steps, 2);
        assert_eq!(game.status(), GuessingStatus::Finished);
        assert!(game.start_round(&mut rand::rng()).is_err());

        game.resolve(RoundOutcome::TimedOut);
        assert_eq!(game.round_count(), 2);
        assert_eq!(game.scores().get(&5), Some(&2));
    }

    #[test]
    fn skip_advances_without_scoring_and_stop_does_not_advance() {
        let mut game = GuessingGame::new(settings(5, 10), pool());
        game.start_round(&mut rand::rng()).unwrap();
        game.resolve(RoundOutcome::Skipped);
        assert_eq!(game.round_count(), 1);
        assert!(game.scores().is_empty());

        game.start_round(&mut rand::rng()).unwrap();
        game.resolve(RoundOutcome::Stopped);
        assert_eq!(game.round_count(), 1);
        assert!(game.is_over());
    }

    #[test]
    fn empty_pool_is_a_setup_error() {
        let mut game = GuessingGame::new(settings(5, 10), Vec::new());
        assert!(matches!(
            game.start_round(&mut rand::rng()),
            Err(GameError::Setup(_))
        ));
    }

    #[test]
    fn final_scores_are_handed_out_once() {
        let mut game = GuessingGame::new(settings(5, 10), pool());
        game.start_round(&mut rand::rng()).unwrap();
        game.resolve(RoundOutcome::Correct(9));
        game.start_round(&mut rand::rng()).unwrap();
        game.resolve(RoundOutcome::Correct(4));
        game.start_round(&mut rand::rng()).unwrap();
        game.resolve(RoundOutcome::Correct(9));

        assert_eq!(game.standings(), vec![(9, 2), (4, 1)]);
        assert_eq!(
            game.take_final_scores(),
            Some(BTreeMap::from([(4, 1), (9, 2)]))
        );
        assert_eq!(game.take_final_scores(), None);
    }

    fn prompts(transport: &RecordingTransport) -> usize {
        transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| message.embed.is_some())
            .count()
    }

    async fn wait_for_prompts(transport: &RecordingTransport, count: usize) {
        while prompts(transport) < count {
            tokio::task::yield_now().await;
        }
    }

    async fn spawn_session(
        state: &AppState,
        settings: GuessingSettings,
    ) -> tokio::task::JoinHandle<()> {
        let (control, stop_rx) = SessionControl::new();
        let handle = SessionHandle {
            session_id: Uuid::new_v4(),
            channel_id: settings.channel_id,
            host_id: settings.host_id,
            created_at: Utc::now(),
            inbox: SessionInbox::Guessing,
            control,
        };
        state.registry.register(handle.clone()).await.unwrap();
        let clock = TurnClock::new(state.events.subscribe(), stop_rx);
        let game = GuessingGame::new(settings, pool());
        tokio::spawn(run_guessing(state.clone(), handle, game, clock))
    }

    #[tokio::test(start_paused = true)]
    async fn every_round_timing_out_finishes_with_zero_scores() {
        let harness = harness(SubjectCatalog::default());
        let task = spawn_session(&harness.state, settings(3, 5)).await;

        task.await.unwrap();

        let timeouts = harness
            .transport
            .texts()
            .iter()
            .filter(|text| text.starts_with("Time's up!"))
            .count();
        assert_eq!(timeouts, 3);
        assert_eq!(prompts(&harness.transport), 3);
        assert_eq!(harness.state.registry.rounds_played().await, 3);
        assert!(harness.storage.score_writes().is_empty());
        assert!(harness.transport.any_text_contains("Nobody scored"));
        assert!(harness.state.registry.find(CHANNEL).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn host_stop_mid_round_persists_earlier_scores_once() {
        let harness = harness(SubjectCatalog::default());
        let task = spawn_session(&harness.state, settings(10, 20)).await;
        let events = harness.state.events.clone();

        wait_for_prompts(&harness.transport, 1).await;
        events.publish(message(42, "Irene"));
        wait_for_prompts(&harness.transport, 2).await;
        events.publish(message(43, "irene full"));
        wait_for_prompts(&harness.transport, 3).await;
        events.publish(message(HOST, "stop"));

        task.await.unwrap();
        settle_tasks().await;

        let mut writes = harness.storage.score_writes();
        writes.sort();
        assert_eq!(
            writes,
            vec![(42, Difficulty::Medium, 1), (43, Difficulty::Medium, 1)]
        );
        assert_eq!(harness.transport.reactions.lock().unwrap().len(), 2);
        assert_eq!(harness.transport.deleted.lock().unwrap().len(), 1);
        assert_eq!(harness.state.registry.rounds_played().await, 2);
        assert!(harness.state.registry.find(CHANNEL).await.is_none());
        assert!(harness.transport.any_text_contains("<@42> -> 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn external_stop_ends_session_and_skips_cleanup_twice() {
        let harness = harness(SubjectCatalog::default());
        let task = spawn_session(&harness.state, settings(10, 20)).await;

        wait_for_prompts(&harness.transport, 1).await;
        let handle = harness.state.registry.find(CHANNEL).await.unwrap();
        handle.control.request_stop();
        task.await.unwrap();

        assert!(harness.state.registry.find(CHANNEL).await.is_none());
        assert!(!handle.control.claim_finalization());
        assert_eq!(harness.state.registry.sessions_finished().await, 1);
    }
}
